//! Shared types for the LUCKFLIP engine.
//!
//! These types form the data model used across all modules. The engine
//! owns the only mutable `GameState`; everything else sees clones.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Starting balance for a fresh table.
pub const DEFAULT_INITIAL_BALANCE: i64 = 1000;
/// Bet amount preselected on a fresh table.
pub const DEFAULT_BET: u64 = 50;
/// Maximum number of rounds kept in the recent-activity log.
pub const HISTORY_LIMIT: usize = 50;

// ---------------------------------------------------------------------------
// Side
// ---------------------------------------------------------------------------

/// A face of the coin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Heads,
    Tails,
}

impl Side {
    /// The opposite face.
    pub fn opposite(&self) -> Self {
        match self {
            Side::Heads => Side::Tails,
            Side::Tails => Side::Heads,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Heads => write!(f, "HEADS"),
            Side::Tails => write!(f, "TAILS"),
        }
    }
}

/// Parse a side name (case-insensitive, `H`/`T` accepted).
impl std::str::FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "heads" | "h" => Ok(Side::Heads),
            "tails" | "t" => Ok(Side::Tails),
            other => anyhow::bail!("Unknown coin side: {other}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Round phases
// ---------------------------------------------------------------------------

/// Where the table sits in the round lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoundPhase {
    /// No side picked.
    Idle,
    /// Side picked, waiting for a flip.
    Ready,
    /// A flip is in flight (settlement phases or settle delay).
    Settling,
    /// Result available, waiting for acknowledgement.
    Settled,
}

impl fmt::Display for RoundPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundPhase::Idle => write!(f, "IDLE"),
            RoundPhase::Ready => write!(f, "READY"),
            RoundPhase::Settling => write!(f, "SETTLING"),
            RoundPhase::Settled => write!(f, "SETTLED"),
        }
    }
}

/// Waiting phases of a linked (wallet-backed) round, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementPhase {
    AwaitingSignature,
    Broadcasting,
    Confirming,
}

impl SettlementPhase {
    pub const SEQUENCE: [SettlementPhase; 3] = [
        SettlementPhase::AwaitingSignature,
        SettlementPhase::Broadcasting,
        SettlementPhase::Confirming,
    ];
}

impl fmt::Display for SettlementPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementPhase::AwaitingSignature => write!(f, "awaiting signature"),
            SettlementPhase::Broadcasting => write!(f, "broadcasting"),
            SettlementPhase::Confirming => write!(f, "confirming"),
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// One settled round. Never modified after it enters the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub choice: Side,
    pub result: Side,
    pub amount: u64,
    pub is_win: bool,
    /// Epoch milliseconds at settlement.
    pub timestamp: i64,
    pub settlement_ref: Option<String>,
}

impl fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: called {}, landed {} (${})",
            if self.is_win { "WIN" } else { "LOSS" },
            self.choice,
            self.result,
            self.amount,
        )
    }
}

// ---------------------------------------------------------------------------
// Game state
// ---------------------------------------------------------------------------

/// Complete table state. Owned by `RoundEngine`; callers get clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    pub balance: i64,
    pub bet_amount: u64,
    pub choice: Option<Side>,
    pub last_result: Option<Side>,
    pub is_flipping: bool,
    /// Most recent first.
    pub history: VecDeque<HistoryEntry>,
    pub streak: u64,
    pub wins: u64,
    pub losses: u64,
    pub settlement_phase: Option<SettlementPhase>,
}

impl GameState {
    pub fn new(initial_balance: i64, default_bet: u64) -> Self {
        Self {
            balance: initial_balance,
            bet_amount: default_bet,
            choice: None,
            last_result: None,
            is_flipping: false,
            history: VecDeque::new(),
            streak: 0,
            wins: 0,
            losses: 0,
            settlement_phase: None,
        }
    }

    /// Lifetime number of settled rounds.
    pub fn rounds_played(&self) -> u64 {
        self.wins + self.losses
    }

    /// Derived lifecycle phase.
    pub fn phase(&self) -> RoundPhase {
        if self.is_flipping {
            RoundPhase::Settling
        } else if self.last_result.is_some() {
            RoundPhase::Settled
        } else if self.choice.is_some() {
            RoundPhase::Ready
        } else {
            RoundPhase::Idle
        }
    }

    pub fn tally(&self) -> Tally {
        Tally {
            wins: self.wins,
            losses: self.losses,
            streak: self.streak,
        }
    }

    /// Win rate over lifetime rounds (0.0 if none played).
    pub fn win_rate(&self) -> f64 {
        let total = self.rounds_played();
        if total == 0 {
            0.0
        } else {
            self.wins as f64 / total as f64
        }
    }
}

impl Default for GameState {
    fn default() -> Self {
        Self::new(DEFAULT_INITIAL_BALANCE, DEFAULT_BET)
    }
}

/// Read-only counters handed to the fortune provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Tally {
    pub wins: u64,
    pub losses: u64,
    pub streak: u64,
}

impl Tally {
    pub fn rounds(&self) -> u64 {
        self.wins + self.losses
    }
}

// ---------------------------------------------------------------------------
// Round outcome
// ---------------------------------------------------------------------------

/// What a settled flip reports back to its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundOutcome {
    pub entry: HistoryEntry,
    pub balance_before: i64,
    pub balance_after: i64,
    pub tally: Tally,
    /// This round completed a block of rounds that earns a fortune.
    pub fortune_due: bool,
}

impl RoundOutcome {
    pub fn is_win(&self) -> bool {
        self.entry.is_win
    }
}

// ---------------------------------------------------------------------------
// Fortune
// ---------------------------------------------------------------------------

/// Flavor text from the fortune provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fortune {
    pub message: String,
    pub advice: String,
}

impl Fortune {
    /// The pair shown whenever the provider is missing or fails.
    pub fn fallback() -> Self {
        Self {
            message: "The universe is silent today.".to_string(),
            advice: "Keep flipping to find your path.".to_string(),
        }
    }
}

impl fmt::Display for Fortune {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" ({})", self.message, self.advice)
    }
}

/// A fortune tagged with the round count it was requested for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FortuneReading {
    pub round: u64,
    pub fortune: Fortune,
    pub from_fallback: bool,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Failures of the optional settlement preface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
    #[error("Settlement rejected by {provider}: {reason}")]
    Rejected { provider: String, reason: String },

    #[error("Settlement finished without a reference")]
    MissingReference,

    #[error("Settlement pipeline stopped before confirming")]
    Interrupted,
}

/// Reasons a round operation is refused or aborted.
///
/// `Display` strings are short enough to show to the player as-is.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoundError {
    #[error("Insufficient balance! Reduce your bet.")]
    InsufficientBalance { bet: u64, balance: i64 },

    #[error("Pick a side first!")]
    NoSideSelected,

    #[error("A flip is already in progress.")]
    RoundInProgress,

    #[error("Settlement failed: {0}")]
    Settlement(#[from] SettlementError),

    #[error("The table is closed.")]
    TableClosed,
}

impl RoundError {
    /// Errors caused by the player's own input (recoverable immediately).
    pub fn is_user_input(&self) -> bool {
        matches!(
            self,
            RoundError::InsufficientBalance { .. } | RoundError::NoSideSelected
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
