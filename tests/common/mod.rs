//! Deterministic collaborators for integration testing.
//!
//! In-memory fortune and settlement providers whose calls are recorded
//! so tests can assert on exactly when the engine reached them.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use luckflip::engine::{EngineConfig, RoundEngine, ScriptedCoin};
use luckflip::fortune::FortuneProvider;
use luckflip::settlement::{SettlementEvent, SettlementProvider};
use luckflip::types::{Fortune, SettlementError, SettlementPhase, Side};

/// Engine with no settle delay and a scripted coin.
pub fn scripted_engine(sequence: Vec<Side>) -> RoundEngine {
    let config = EngineConfig {
        settle_delay: Duration::ZERO,
        ..EngineConfig::default()
    };
    RoundEngine::with_coin(config, Box::new(ScriptedCoin::new(sequence)))
}

/// Records every `(wins, losses, streak)` it is asked about.
#[derive(Clone, Default)]
pub struct RecordingFortune {
    calls: Arc<Mutex<Vec<(u64, u64, u64)>>>,
    fail: bool,
}

impl RecordingFortune {
    pub fn new() -> Self {
        Self::default()
    }

    /// A provider that fails every call after recording it.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<(u64, u64, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FortuneProvider for RecordingFortune {
    async fn fetch_fortune(&self, wins: u64, losses: u64, streak: u64) -> Result<Fortune> {
        self.calls.lock().unwrap().push((wins, losses, streak));
        if self.fail {
            return Err(anyhow!("fortune service unavailable"));
        }
        Ok(Fortune {
            message: format!("{wins} up, {losses} down."),
            advice: format!("Streak {streak}, keep going."),
        })
    }

    fn label(&self) -> &'static str {
        "recording"
    }
}

/// Settlement pipeline driven by a fixed script of events.
pub struct ScriptedWallet {
    events: Vec<Result<SettlementEvent, SettlementError>>,
    submissions: Arc<Mutex<Vec<(u64, Side)>>>,
}

impl ScriptedWallet {
    /// Full happy path with a known reference.
    pub fn confirming(reference: &str) -> Self {
        Self::with_events(vec![
            Ok(SettlementEvent::Phase(SettlementPhase::AwaitingSignature)),
            Ok(SettlementEvent::Phase(SettlementPhase::Broadcasting)),
            Ok(SettlementEvent::Broadcast(reference.to_string())),
            Ok(SettlementEvent::Phase(SettlementPhase::Confirming)),
        ])
    }

    /// Fails once the broadcast has begun.
    pub fn dropping_after_broadcast() -> Self {
        Self::with_events(vec![
            Ok(SettlementEvent::Phase(SettlementPhase::AwaitingSignature)),
            Ok(SettlementEvent::Phase(SettlementPhase::Broadcasting)),
            Ok(SettlementEvent::Broadcast("doomed".to_string())),
            Err(SettlementError::Rejected {
                provider: "scripted".to_string(),
                reason: "confirmation timed out".to_string(),
            }),
        ])
    }

    pub fn with_events(events: Vec<Result<SettlementEvent, SettlementError>>) -> Self {
        Self {
            events,
            submissions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn submissions(&self) -> Arc<Mutex<Vec<(u64, Side)>>> {
        Arc::clone(&self.submissions)
    }
}

impl SettlementProvider for ScriptedWallet {
    fn submit(
        &self,
        bet: u64,
        choice: Side,
    ) -> BoxStream<'static, Result<SettlementEvent, SettlementError>> {
        self.submissions.lock().unwrap().push((bet, choice));
        stream::iter(self.events.clone()).boxed()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
