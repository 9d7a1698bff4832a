//! Settlement providers.
//!
//! Defines the `SettlementProvider` trait consumed by the round engine
//! when a wallet is linked, plus the mocked wallet pipeline.

pub mod mock_wallet;

use futures::stream::BoxStream;

use crate::types::{SettlementError, SettlementPhase, Side};

/// One step reported by a settlement pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementEvent {
    /// A waiting phase has started.
    Phase(SettlementPhase),
    /// The wager was broadcast under this reference.
    Broadcast(String),
}

/// Abstraction over an external confirmation pipeline.
///
/// `submit` returns a stream of phase events that must include exactly
/// one `Broadcast` reference. The stream ending marks confirmation.
/// Any `Err` item aborts the round.
pub trait SettlementProvider: Send + Sync {
    fn submit(
        &self,
        bet: u64,
        choice: Side,
    ) -> BoxStream<'static, Result<SettlementEvent, SettlementError>>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}
