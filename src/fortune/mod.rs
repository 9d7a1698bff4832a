//! Fortune integration: decorative flavor text from an LLM.
//!
//! Defines the `FortuneProvider` trait and provides implementations for
//! Gemini and OpenAI-compatible chat APIs. Provider failures never reach
//! the round lifecycle: `consult` always yields a reading, degrading to
//! `Fortune::fallback()`.

pub mod gemini;
pub mod openai;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::{Fortune, FortuneReading, Tally};

/// A fortune is requested after every block of this many rounds.
pub const FORTUNE_EVERY_ROUNDS: u64 = 3;

/// Default upper bound on a single fortune lookup.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);

/// Abstraction over fortune text generators.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FortuneProvider: Send + Sync {
    /// Produce a short comment on the player's luck.
    async fn fetch_fortune(&self, wins: u64, losses: u64, streak: u64) -> Result<Fortune>;

    /// Provider identifier for logging.
    fn label(&self) -> &'static str;
}

/// Whether the counts after a settled round earn a fortune.
pub fn is_due(tally: &Tally) -> bool {
    let rounds = tally.rounds();
    rounds > 0 && rounds % FORTUNE_EVERY_ROUNDS == 0
}

/// Ask `provider` for a fortune, substituting the fallback on any failure.
pub async fn consult(
    provider: Option<&dyn FortuneProvider>,
    tally: Tally,
    timeout: Duration,
) -> FortuneReading {
    let round = tally.rounds();

    let Some(provider) = provider else {
        debug!(round, "No fortune provider configured, using fallback");
        return FortuneReading {
            round,
            fortune: Fortune::fallback(),
            from_fallback: true,
        };
    };

    let lookup = provider.fetch_fortune(tally.wins, tally.losses, tally.streak);
    match tokio::time::timeout(timeout, lookup).await {
        Ok(Ok(fortune)) => {
            debug!(round, provider = provider.label(), fortune = %fortune, "Fortune received");
            FortuneReading {
                round,
                fortune,
                from_fallback: false,
            }
        }
        Ok(Err(e)) => {
            warn!(round, provider = provider.label(), error = %e, "Fortune lookup failed");
            FortuneReading {
                round,
                fortune: Fortune::fallback(),
                from_fallback: true,
            }
        }
        Err(_) => {
            warn!(round, provider = provider.label(), timeout_secs = timeout.as_secs(), "Fortune lookup timed out");
            FortuneReading {
                round,
                fortune: Fortune::fallback(),
                from_fallback: true,
            }
        }
    }
}

/// Prompt shared by every provider.
pub fn build_prompt(wins: u64, losses: u64, streak: u64) -> String {
    format!(
        "The player has {wins} wins and {losses} losses, with a current streak of {streak}. \
         Provide a very short, witty comment about their luck as a coin flip master. \
         Keep it under 15 words. Respond with JSON: {{\"message\": \"...\", \"advice\": \"...\"}}"
    )
}

#[derive(Debug, Deserialize)]
struct RawFortune {
    message: String,
    #[serde(default)]
    advice: String,
}

/// Parse a `{message, advice}` JSON object out of model output.
///
/// Tolerates markdown code fences and surrounding prose.
pub fn parse_fortune(text: &str) -> Result<Fortune> {
    let trimmed = text.trim();
    let start = trimmed.find('{').context("No JSON object in fortune response")?;
    let end = trimmed.rfind('}').context("Unterminated JSON object in fortune response")?;
    if end < start {
        anyhow::bail!("Malformed JSON object in fortune response");
    }

    let raw: RawFortune = serde_json::from_str(&trimmed[start..=end])
        .context("Failed to parse fortune JSON")?;

    let message = raw.message.trim().to_string();
    if message.is_empty() {
        anyhow::bail!("Fortune message is empty");
    }

    Ok(Fortune {
        message,
        advice: raw.advice.trim().to_string(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
