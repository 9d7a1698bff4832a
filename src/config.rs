//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::EngineConfig;
use crate::settlement::mock_wallet::WalletLatency;
use crate::types::{DEFAULT_BET, DEFAULT_INITIAL_BALANCE, HISTORY_LIMIT};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub game: GameConfig,
    #[serde(default)]
    pub fortune: FortuneConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GameConfig {
    pub initial_balance: i64,
    pub default_bet: u64,
    pub history_limit: usize,
    pub settle_delay_ms: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            initial_balance: DEFAULT_INITIAL_BALANCE,
            default_bet: DEFAULT_BET,
            history_limit: HISTORY_LIMIT,
            settle_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FortuneConfig {
    /// "gemini" | "openai"
    pub provider: String,
    pub model: Option<String>,
    pub api_key_env: String,
    /// Override for the provider's API base URL (gateways, local mocks).
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for FortuneConfig {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: None,
            api_key_env: "GEMINI_API_KEY".to_string(),
            base_url: None,
            timeout_secs: 20,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WalletConfig {
    /// Link the mock wallet so every round runs the settlement phases.
    pub enabled: bool,
    pub signature_latency_ms: u64,
    pub broadcast_latency_ms: u64,
    pub confirm_latency_ms: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        let latency = WalletLatency::default();
        Self {
            enabled: false,
            signature_latency_ms: latency.signature.as_millis() as u64,
            broadcast_latency_ms: latency.broadcast.as_millis() as u64,
            confirm_latency_ms: latency.confirm.as_millis() as u64,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 3000 }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.game.history_limit == 0 {
            anyhow::bail!("game.history_limit must be at least 1");
        }
        Ok(())
    }

    /// Resolve an environment variable name to its value.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// The fortune API key, if its env var is set and non-empty.
    pub fn fortune_api_key(&self) -> Option<SecretString> {
        Self::resolve_env(&self.fortune.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::new)
    }
}

impl GameConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            initial_balance: self.initial_balance,
            default_bet: self.default_bet,
            history_limit: self.history_limit,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
        }
    }
}

impl WalletConfig {
    pub fn latency(&self) -> WalletLatency {
        WalletLatency {
            signature: Duration::from_millis(self.signature_latency_ms),
            broadcast: Duration::from_millis(self.broadcast_latency_ms),
            confirm: Duration::from_millis(self.confirm_latency_ms),
        }
    }
}
