//! Mock wallet.
//!
//! Simulates sign → broadcast → confirm with fixed latencies. The
//! reference token is minted when broadcasting begins.

use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;
use tracing::debug;

use super::{SettlementEvent, SettlementProvider};
use crate::types::{SettlementError, SettlementPhase, Side};

const DEFAULT_SIGNATURE_MS: u64 = 1200;
const DEFAULT_BROADCAST_MS: u64 = 800;
const DEFAULT_CONFIRM_MS: u64 = 1500;

/// Per-phase simulated latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletLatency {
    pub signature: Duration,
    pub broadcast: Duration,
    pub confirm: Duration,
}

impl Default for WalletLatency {
    fn default() -> Self {
        Self {
            signature: Duration::from_millis(DEFAULT_SIGNATURE_MS),
            broadcast: Duration::from_millis(DEFAULT_BROADCAST_MS),
            confirm: Duration::from_millis(DEFAULT_CONFIRM_MS),
        }
    }
}

impl WalletLatency {
    /// No waiting at all; for tests and simulations.
    pub fn instant() -> Self {
        Self {
            signature: Duration::ZERO,
            broadcast: Duration::ZERO,
            confirm: Duration::ZERO,
        }
    }
}

enum Step {
    Sign,
    Broadcast,
    Reference(String),
    Confirm,
    Finish,
}

pub struct MockWallet {
    latency: WalletLatency,
}

impl MockWallet {
    pub fn new(latency: WalletLatency) -> Self {
        Self { latency }
    }

    /// A fresh reference token, hex without dashes.
    pub fn mint_reference() -> String {
        uuid::Uuid::new_v4().simple().to_string()
    }
}

impl Default for MockWallet {
    fn default() -> Self {
        Self::new(WalletLatency::default())
    }
}

impl SettlementProvider for MockWallet {
    fn submit(
        &self,
        bet: u64,
        choice: Side,
    ) -> BoxStream<'static, Result<SettlementEvent, SettlementError>> {
        let latency = self.latency;
        debug!(bet, choice = %choice, "Mock wallet submission");

        stream::unfold(Step::Sign, move |step| async move {
            let next: Option<(Result<SettlementEvent, SettlementError>, Step)> = match step {
                Step::Sign => Some((
                    Ok(SettlementEvent::Phase(SettlementPhase::AwaitingSignature)),
                    Step::Broadcast,
                )),
                Step::Broadcast => {
                    tokio::time::sleep(latency.signature).await;
                    Some((
                        Ok(SettlementEvent::Phase(SettlementPhase::Broadcasting)),
                        Step::Reference(MockWallet::mint_reference()),
                    ))
                }
                Step::Reference(reference) => {
                    Some((Ok(SettlementEvent::Broadcast(reference)), Step::Confirm))
                }
                Step::Confirm => {
                    tokio::time::sleep(latency.broadcast).await;
                    Some((
                        Ok(SettlementEvent::Phase(SettlementPhase::Confirming)),
                        Step::Finish,
                    ))
                }
                Step::Finish => {
                    tokio::time::sleep(latency.confirm).await;
                    None
                }
            };
            next
        })
        .boxed()
    }

    fn name(&self) -> &str {
        "mock-wallet"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
