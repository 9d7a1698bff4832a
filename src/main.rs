//! LUCKFLIP: coin-flip wagering engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! opens the table, and serves the JSON API until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use luckflip::api;
use luckflip::config;
use luckflip::engine::{spawn_table, FortuneDesk, RoundEngine};
use luckflip::fortune::gemini::GeminiClient;
use luckflip::fortune::openai::OpenAiCompatClient;
use luckflip::fortune::FortuneProvider;
use luckflip::settlement::mock_wallet::MockWallet;

const BANNER: &str = r#"
  _            _     __ _ _
 | |_   _  ___| | __/ _| (_)_ __
 | | | | |/ __| |/ / |_| | | '_ \
 | | |_| | (__|   <|  _| | | |_) |
 |_|\__,_|\___|_|\_\_| |_|_| .__/
                           |_|
  Heads or tails. Call it.
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        initial_balance = cfg.game.initial_balance,
        default_bet = cfg.game.default_bet,
        wallet = cfg.wallet.enabled,
        fortune_provider = %cfg.fortune.provider,
        "LUCKFLIP starting up"
    );

    // -- Engine ----------------------------------------------------------

    let mut engine = RoundEngine::new(cfg.game.engine_config());
    if cfg.wallet.enabled {
        engine.link_settlement(Arc::new(MockWallet::new(cfg.wallet.latency())));
    }

    // -- Fortune provider ------------------------------------------------

    let provider = build_fortune_provider(&cfg)?;
    let desk = FortuneDesk {
        provider,
        timeout: Duration::from_secs(cfg.fortune.timeout_secs),
    };

    let (table, table_task) = spawn_table(engine, desk);

    // -- Serve -----------------------------------------------------------

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received.");
    };
    api::serve(table, cfg.server.port, shutdown).await?;

    // The router owned the last handle; the table drains and exits.
    let _ = table_task.await;
    info!("LUCKFLIP shut down cleanly.");

    Ok(())
}

/// Pick the fortune provider named in config, or none without an API key.
fn build_fortune_provider(cfg: &config::AppConfig) -> Result<Option<Arc<dyn FortuneProvider>>> {
    let Some(api_key) = cfg.fortune_api_key() else {
        warn!(
            env = %cfg.fortune.api_key_env,
            "No fortune API key configured, fortunes will use the fallback text"
        );
        return Ok(None);
    };

    let model = cfg.fortune.model.clone();
    let base_url = cfg.fortune.base_url.clone();

    let provider: Arc<dyn FortuneProvider> = match cfg.fortune.provider.as_str() {
        "gemini" => {
            info!(model = ?model, "Using Gemini fortune provider");
            Arc::new(GeminiClient::new(api_key, model, base_url)?)
        }
        "openai" => {
            info!(model = ?model, base_url = ?base_url, "Using OpenAI-compatible fortune provider");
            Arc::new(OpenAiCompatClient::new(api_key, model, base_url)?)
        }
        other => {
            warn!(provider = other, "Unknown fortune provider, defaulting to Gemini");
            Arc::new(GeminiClient::new(api_key, model, base_url)?)
        }
    };

    Ok(Some(provider))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("luckflip=info"));

    let json_logging = std::env::var("LUCKFLIP_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
