//! Round engine: the single owner of `GameState`.
//!
//! A flip is owned by the engine, not by the caller's future:
//!
//! 1. `start_flip` checks preconditions, marks the table as flipping and
//!    spawns the preface (settlement pipeline plus settle delay). The
//!    spawned task always runs to completion.
//! 2. Preface events are applied as they arrive. The final one draws the
//!    coin and applies the accounting, or restores READY if settlement
//!    failed.
//!
//! Every operation first applies events the preface has already sent, so
//! a dropped `flip` future never leaves the engine stuck in SETTLING.
//! The table actor drives the same stages from its select loop.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use super::coin::{Coin, RandomCoin};
use crate::fortune;
use crate::settlement::{SettlementEvent, SettlementProvider};
use crate::types::{
    GameState, HistoryEntry, RoundError, RoundOutcome, RoundPhase, SettlementError, Side,
    DEFAULT_BET, DEFAULT_INITIAL_BALANCE, HISTORY_LIMIT,
};

const DEFAULT_SETTLE_DELAY_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub initial_balance: i64,
    pub default_bet: u64,
    /// Entries kept in history, newest first.
    pub history_limit: usize,
    /// Pause between the end of settlement and the coin draw.
    pub settle_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: DEFAULT_INITIAL_BALANCE,
            default_bet: DEFAULT_BET,
            history_limit: HISTORY_LIMIT,
            settle_delay: Duration::from_millis(DEFAULT_SETTLE_DELAY_MS),
        }
    }
}

// ---------------------------------------------------------------------------
// In-flight round
// ---------------------------------------------------------------------------

const PREFACE_BUFFER: usize = 8;

/// A round that passed its preconditions and awaits resolution.
#[derive(Debug)]
struct PendingRound {
    bet: u64,
    choice: Side,
    settlement_ref: Option<String>,
    events: mpsc::Receiver<PrefaceEvent>,
}

/// Progress reported by the spawned preface task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PrefaceEvent {
    Settlement(SettlementEvent),
    Failed(SettlementError),
    /// Settlement (if any) confirmed and the settle delay elapsed.
    Resolved,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct RoundEngine {
    state: GameState,
    history_limit: usize,
    settle_delay: Duration,
    coin: Box<dyn Coin>,
    settlement: Option<Arc<dyn SettlementProvider>>,
    notice: Option<String>,
    pending: Option<PendingRound>,
    resolution: Option<Result<RoundOutcome, RoundError>>,
}

impl RoundEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_coin(config, Box::new(RandomCoin::new()))
    }

    pub fn with_coin(config: EngineConfig, coin: Box<dyn Coin>) -> Self {
        Self {
            state: GameState::new(config.initial_balance, config.default_bet),
            history_limit: config.history_limit,
            settle_delay: config.settle_delay,
            coin,
            settlement: None,
            notice: None,
            pending: None,
            resolution: None,
        }
    }

    /// Link a settlement provider (wallet connected).
    pub fn link_settlement(&mut self, provider: Arc<dyn SettlementProvider>) {
        info!(provider = provider.name(), "Settlement provider linked");
        self.settlement = Some(provider);
    }

    pub fn unlink_settlement(&mut self) {
        self.settlement = None;
    }

    pub fn is_linked(&self) -> bool {
        self.settlement.is_some()
    }

    /// True while a round is waiting on its preface.
    pub fn is_settling(&self) -> bool {
        self.pending.is_some()
    }

    /// Copy of the current state, including the live settlement phase.
    pub fn snapshot(&mut self) -> GameState {
        self.catch_up();
        self.state.clone()
    }

    pub fn phase(&mut self) -> RoundPhase {
        self.catch_up();
        self.state.phase()
    }

    /// Last user-facing rejection message, if any.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    // -- Player operations -----------------------------------------------

    pub fn select_side(&mut self, side: Side) -> Result<(), RoundError> {
        self.catch_up();
        if self.state.is_flipping {
            return Err(self.reject(RoundError::RoundInProgress));
        }
        self.state.choice = Some(side);
        self.notice = None;
        debug!(side = %side, "Side selected");
        Ok(())
    }

    /// Set the wager. Negative amounts clamp to zero. Returns the stored bet.
    pub fn set_bet(&mut self, amount: i64) -> Result<u64, RoundError> {
        self.catch_up();
        if self.state.is_flipping {
            return Err(self.reject(RoundError::RoundInProgress));
        }
        let bet = amount.max(0) as u64;
        self.state.bet_amount = bet;
        self.notice = None;
        debug!(bet, "Bet set");
        Ok(bet)
    }

    /// Clear the choice and last result. Ignored while a flip is in flight.
    pub fn reset_round(&mut self) {
        self.catch_up();
        if self.state.is_flipping {
            debug!("Reset ignored while a flip is in flight");
            return;
        }
        self.state.choice = None;
        self.state.last_result = None;
        self.notice = None;
    }

    /// Run a complete round.
    ///
    /// The round belongs to the engine, not to this future. If the future
    /// is dropped the preface keeps running and its result is applied by
    /// the next operation on the engine.
    pub async fn flip(&mut self) -> Result<RoundOutcome, RoundError> {
        self.start_flip()?;
        // Anything resolved while starting belonged to an abandoned flip.
        self.resolution = None;

        loop {
            let event = self.next_preface_event().await;
            self.apply_preface_event(event);
            if let Some(result) = self.take_resolution() {
                return result;
            }
        }
    }

    // -- Flip stages -------------------------------------------------------

    /// Check preconditions, enter SETTLING and spawn the preface task.
    pub(crate) fn start_flip(&mut self) -> Result<(), RoundError> {
        self.catch_up();
        if self.state.is_flipping {
            return Err(self.reject(RoundError::RoundInProgress));
        }
        let bet = self.state.bet_amount;
        if i128::from(bet) > i128::from(self.state.balance) {
            return Err(self.reject(RoundError::InsufficientBalance {
                bet,
                balance: self.state.balance,
            }));
        }
        let Some(choice) = self.state.choice else {
            return Err(self.reject(RoundError::NoSideSelected));
        };

        self.state.is_flipping = true;
        self.state.last_result = None;
        self.state.settlement_phase = None;
        self.notice = None;

        let (tx, events) = mpsc::channel(PREFACE_BUFFER);
        tokio::spawn(run_preface(
            self.settlement.clone(),
            bet,
            choice,
            self.settle_delay,
            tx,
        ));

        debug!(bet, choice = %choice, linked = self.is_linked(), "Flip started");
        self.pending = Some(PendingRound {
            bet,
            choice,
            settlement_ref: None,
            events,
        });
        Ok(())
    }

    /// Wait for the in-flight round's next preface event. Pends forever
    /// when no round is in flight; `None` means the preface task vanished.
    pub(crate) async fn next_preface_event(&mut self) -> Option<PrefaceEvent> {
        match self.pending.as_mut() {
            Some(round) => round.events.recv().await,
            None => std::future::pending().await,
        }
    }

    /// Apply one preface event. A final event resolves the round and
    /// leaves its result for `take_resolution`.
    pub(crate) fn apply_preface_event(&mut self, event: Option<PrefaceEvent>) {
        let Some(mut round) = self.pending.take() else {
            return;
        };

        let result = match event {
            Some(PrefaceEvent::Settlement(event)) => {
                self.observe_settlement(&mut round, event);
                self.pending = Some(round);
                return;
            }
            Some(PrefaceEvent::Resolved) => Ok(self.complete_flip(round)),
            Some(PrefaceEvent::Failed(e)) => Err(self.abort_flip(round, e)),
            None => Err(self.abort_flip(round, SettlementError::Interrupted)),
        };
        self.resolution = Some(result);
    }

    /// Result of the most recently resolved round, once.
    pub(crate) fn take_resolution(&mut self) -> Option<Result<RoundOutcome, RoundError>> {
        self.resolution.take()
    }

    /// Apply whatever the preface task has already reported.
    fn catch_up(&mut self) {
        while let Some(round) = self.pending.as_mut() {
            let event = match round.events.try_recv() {
                Ok(event) => Some(event),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => None,
            };
            self.apply_preface_event(event);
        }
    }

    fn observe_settlement(&mut self, round: &mut PendingRound, event: SettlementEvent) {
        match event {
            SettlementEvent::Phase(phase) => {
                debug!(phase = %phase, "Settlement phase");
                self.state.settlement_phase = Some(phase);
            }
            SettlementEvent::Broadcast(reference) => {
                debug!(reference = %reference, "Wager broadcast");
                round.settlement_ref = Some(reference);
            }
        }
    }

    /// Abandon a round whose settlement failed. Balance, counters and
    /// history are untouched; the choice is kept so the table is READY.
    fn abort_flip(&mut self, round: PendingRound, error: SettlementError) -> RoundError {
        warn!(
            bet = round.bet,
            choice = %round.choice,
            error = %error,
            "Settlement failed, round aborted"
        );
        self.state.is_flipping = false;
        self.state.settlement_phase = None;
        self.reject(RoundError::Settlement(error))
    }

    /// Draw the coin and settle `round`.
    fn complete_flip(&mut self, round: PendingRound) -> RoundOutcome {
        let outcome = self.coin.toss();
        let is_win = outcome == round.choice;
        let balance_before = self.state.balance;
        let stake = round.bet as i64;

        if is_win {
            self.state.balance += stake;
            self.state.wins += 1;
            self.state.streak += 1;
        } else {
            self.state.balance -= stake;
            self.state.losses += 1;
            self.state.streak = 0;
        }

        let entry = HistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            choice: round.choice,
            result: outcome,
            amount: round.bet,
            is_win,
            timestamp: chrono::Utc::now().timestamp_millis(),
            settlement_ref: round.settlement_ref,
        };
        self.state.history.push_front(entry.clone());
        self.state.history.truncate(self.history_limit);

        self.state.is_flipping = false;
        self.state.settlement_phase = None;
        self.state.last_result = Some(outcome);

        let tally = self.state.tally();
        let outcome = RoundOutcome {
            entry,
            balance_before,
            balance_after: self.state.balance,
            tally,
            fortune_due: fortune::is_due(&tally),
        };

        info!(
            entry = %outcome.entry,
            balance = self.state.balance,
            streak = tally.streak,
            rounds = tally.rounds(),
            win_rate = self.state.win_rate(),
            "Round settled"
        );

        outcome
    }

    fn reject(&mut self, error: RoundError) -> RoundError {
        debug!(error = %error, "Round operation rejected");
        self.notice = Some(error.to_string());
        error
    }
}

/// Drive the optional settlement stream, then wait out the settle delay.
async fn run_preface(
    provider: Option<Arc<dyn SettlementProvider>>,
    bet: u64,
    choice: Side,
    settle_delay: Duration,
    tx: mpsc::Sender<PrefaceEvent>,
) {
    if let Some(provider) = provider {
        let mut events = provider.submit(bet, choice);
        let mut referenced = false;

        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if matches!(event, SettlementEvent::Broadcast(_)) {
                        referenced = true;
                    }
                    // A closed receiver means nobody is listening; keep
                    // going so the external pipeline still completes.
                    let _ = tx.send(PrefaceEvent::Settlement(event)).await;
                }
                Err(e) => {
                    let _ = tx.send(PrefaceEvent::Failed(e)).await;
                    return;
                }
            }
        }

        if !referenced {
            let _ = tx.send(PrefaceEvent::Failed(SettlementError::MissingReference)).await;
            return;
        }
    }

    tokio::time::sleep(settle_delay).await;
    let _ = tx.send(PrefaceEvent::Resolved).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::coin::ScriptedCoin;
    use crate::settlement::mock_wallet::{MockWallet, WalletLatency};
    use crate::types::SettlementPhase;
    use futures::stream::{self, BoxStream};
    use tokio_test::{assert_err, assert_ok};

    fn instant_config() -> EngineConfig {
        EngineConfig {
            settle_delay: Duration::ZERO,
            ..EngineConfig::default()
        }
    }

    fn engine_with(sequence: Vec<Side>) -> RoundEngine {
        RoundEngine::with_coin(instant_config(), Box::new(ScriptedCoin::new(sequence)))
    }

    struct RejectingWallet;

    impl SettlementProvider for RejectingWallet {
        fn submit(
            &self,
            _bet: u64,
            _choice: Side,
        ) -> BoxStream<'static, Result<SettlementEvent, SettlementError>> {
            stream::iter(vec![
                Ok(SettlementEvent::Phase(SettlementPhase::AwaitingSignature)),
                Err(SettlementError::Rejected {
                    provider: "test".into(),
                    reason: "user declined".into(),
                }),
            ])
            .boxed()
        }

        fn name(&self) -> &str {
            "rejecting"
        }
    }

    struct SilentWallet;

    impl SettlementProvider for SilentWallet {
        fn submit(
            &self,
            _bet: u64,
            _choice: Side,
        ) -> BoxStream<'static, Result<SettlementEvent, SettlementError>> {
            stream::iter(vec![Ok(SettlementEvent::Phase(SettlementPhase::AwaitingSignature))])
                .boxed()
        }

        fn name(&self) -> &str {
            "silent"
        }
    }

    #[tokio::test]
    async fn test_winning_flip() {
        let mut engine = engine_with(vec![Side::Heads]);
        engine.select_side(Side::Heads).unwrap();

        let outcome = engine.flip().await.unwrap();
        let state = engine.snapshot();

        assert!(outcome.is_win());
        assert_eq!(state.balance, 1050);
        assert_eq!(state.wins, 1);
        assert_eq!(state.losses, 0);
        assert_eq!(state.streak, 1);
        assert_eq!(state.last_result, Some(Side::Heads));
        assert!(!state.is_flipping);
        assert_eq!(state.phase(), RoundPhase::Settled);

        let entry = &state.history[0];
        assert_eq!(entry.choice, Side::Heads);
        assert_eq!(entry.result, Side::Heads);
        assert_eq!(entry.amount, 50);
        assert!(entry.is_win);
        assert!(entry.settlement_ref.is_none());
    }

    #[tokio::test]
    async fn test_losing_flip() {
        let mut engine = engine_with(vec![Side::Tails]);
        engine.select_side(Side::Heads).unwrap();

        let outcome = engine.flip().await.unwrap();
        let state = engine.snapshot();

        assert!(!outcome.is_win());
        assert_eq!(outcome.balance_before, 1000);
        assert_eq!(outcome.balance_after, 950);
        assert_eq!(state.balance, 950);
        assert_eq!(state.wins, 0);
        assert_eq!(state.losses, 1);
        assert_eq!(state.streak, 0);
    }

    #[tokio::test]
    async fn test_insufficient_balance_leaves_state() {
        let mut engine = engine_with(vec![Side::Heads]);
        engine.select_side(Side::Heads).unwrap();
        engine.set_bet(1001).unwrap();
        let before = engine.snapshot();

        let err = engine.flip().await.unwrap_err();
        assert_eq!(err, RoundError::InsufficientBalance { bet: 1001, balance: 1000 });
        assert_eq!(engine.snapshot(), before);
        assert_eq!(engine.notice(), Some("Insufficient balance! Reduce your bet."));
    }

    #[tokio::test]
    async fn test_no_side_leaves_state() {
        let mut engine = engine_with(vec![Side::Heads]);
        let before = engine.snapshot();

        let err = engine.flip().await.unwrap_err();
        assert_eq!(err, RoundError::NoSideSelected);
        assert_eq!(engine.snapshot(), before);
        assert_eq!(engine.notice(), Some("Pick a side first!"));
    }

    #[tokio::test]
    async fn test_balance_checked_before_side() {
        let mut engine = engine_with(vec![Side::Heads]);
        engine.set_bet(5000).unwrap();
        let err = engine.flip().await.unwrap_err();
        assert!(matches!(err, RoundError::InsufficientBalance { .. }));
    }

    fn slow_engine(outcome: Side) -> RoundEngine {
        let config = EngineConfig {
            settle_delay: Duration::from_millis(1000),
            ..EngineConfig::default()
        };
        RoundEngine::with_coin(config, Box::new(ScriptedCoin::always(outcome)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_rejected_while_flipping() {
        let mut engine = slow_engine(Side::Heads);
        engine.select_side(Side::Heads).unwrap();
        assert_ok!(engine.start_flip());
        let during = engine.snapshot();

        assert_eq!(engine.start_flip().unwrap_err(), RoundError::RoundInProgress);
        assert_err!(engine.select_side(Side::Tails));
        assert_err!(engine.set_bet(10));
        engine.reset_round();

        assert_eq!(engine.snapshot(), during);
        assert_eq!(engine.phase(), RoundPhase::Settling);
        assert!(engine.is_settling());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_flip_still_settles() {
        let mut engine = slow_engine(Side::Heads);
        engine.select_side(Side::Heads).unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(10), engine.flip()).await;
        assert!(abandoned.is_err());
        assert_eq!(engine.phase(), RoundPhase::Settling);
        assert_eq!(engine.select_side(Side::Tails).unwrap_err(), RoundError::RoundInProgress);

        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(engine.phase(), RoundPhase::Settled);
        let state = engine.snapshot();
        assert_eq!(state.balance, 1050);
        assert_eq!(state.wins, 1);
        assert_eq!(state.history.len(), 1);
        assert!(!state.is_flipping);

        engine.reset_round();
        assert_eq!(engine.phase(), RoundPhase::Idle);
        engine.select_side(Side::Heads).unwrap();
        let outcome = engine.flip().await.unwrap();
        assert_eq!(outcome.tally.rounds(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_flip_applies_abandoned_round_first() {
        let mut engine = slow_engine(Side::Tails);
        engine.select_side(Side::Heads).unwrap();

        let abandoned = tokio::time::timeout(Duration::from_millis(10), engine.flip()).await;
        assert!(abandoned.is_err());
        tokio::time::sleep(Duration::from_secs(2)).await;

        // The abandoned loss lands before the new round starts.
        let outcome = engine.flip().await.unwrap();
        assert_eq!(outcome.balance_before, 950);
        assert_eq!(outcome.balance_after, 900);
        assert_eq!(outcome.tally.losses, 2);
    }

    #[test]
    fn test_set_bet_clamps_negative() {
        let mut engine = engine_with(vec![Side::Heads]);
        assert_eq!(engine.set_bet(-20).unwrap(), 0);
        assert_eq!(engine.snapshot().bet_amount, 0);
    }

    #[tokio::test]
    async fn test_reset_round_is_idempotent() {
        let mut engine = engine_with(vec![Side::Tails]);
        engine.select_side(Side::Tails).unwrap();
        engine.flip().await.unwrap();

        engine.reset_round();
        let once = engine.snapshot();
        engine.reset_round();

        assert_eq!(engine.snapshot(), once);
        assert_eq!(once.choice, None);
        assert_eq!(once.last_result, None);
        assert_eq!(once.wins, 1);
        assert_eq!(engine.phase(), RoundPhase::Idle);
    }

    #[tokio::test]
    async fn test_streak_and_history_order() {
        let mut engine = engine_with(vec![Side::Heads, Side::Heads, Side::Heads, Side::Tails, Side::Heads]);
        engine.select_side(Side::Heads).unwrap();

        let mut streaks = Vec::new();
        for _ in 0..5 {
            engine.flip().await.unwrap();
            streaks.push(engine.snapshot().streak);
        }

        assert_eq!(streaks, vec![1, 2, 3, 0, 1]);
        let state = engine.snapshot();
        assert_eq!(state.balance, 1000 + 50 * 3);
        assert_eq!(state.history[0].result, Side::Heads);
        assert_eq!(state.history[1].result, Side::Tails);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let mut engine = engine_with(vec![Side::Heads, Side::Tails]);
        engine.select_side(Side::Heads).unwrap();
        engine.set_bet(1).unwrap();

        let mut last_id = String::new();
        for _ in 0..60 {
            let outcome = engine.flip().await.unwrap();
            last_id = outcome.entry.id;
        }

        let state = engine.snapshot();
        assert_eq!(state.history.len(), HISTORY_LIMIT);
        assert_eq!(state.rounds_played(), 60);
        assert_eq!(state.history[0].id, last_id);
    }

    #[tokio::test]
    async fn test_fortune_due_every_third_round() {
        let mut engine = engine_with(vec![Side::Heads, Side::Tails]);
        engine.select_side(Side::Heads).unwrap();

        let mut due = Vec::new();
        for _ in 0..9 {
            due.push(engine.flip().await.unwrap().fortune_due);
        }
        assert_eq!(
            due,
            vec![false, false, true, false, false, true, false, false, true]
        );
    }

    #[tokio::test]
    async fn test_linked_round_records_reference() {
        let mut engine = engine_with(vec![Side::Tails]);
        engine.link_settlement(Arc::new(MockWallet::new(WalletLatency::instant())));
        engine.select_side(Side::Tails).unwrap();

        let outcome = engine.flip().await.unwrap();
        let state = engine.snapshot();

        let reference = outcome.entry.settlement_ref.clone().unwrap();
        assert_eq!(state.history[0].settlement_ref.as_deref(), Some(reference.as_str()));
        assert_eq!(state.settlement_phase, None);
        assert_eq!(state.balance, 1050);
    }

    #[tokio::test]
    async fn test_rejected_settlement_aborts_round() {
        let mut engine = engine_with(vec![Side::Heads]);
        engine.link_settlement(Arc::new(RejectingWallet));
        engine.select_side(Side::Heads).unwrap();
        let before = engine.snapshot();

        let err = engine.flip().await.unwrap_err();
        assert!(matches!(err, RoundError::Settlement(SettlementError::Rejected { .. })));
        assert_eq!(engine.snapshot(), before);
        assert_eq!(engine.phase(), RoundPhase::Ready);
    }

    #[tokio::test]
    async fn test_settlement_without_reference_aborts() {
        let mut engine = engine_with(vec![Side::Heads]);
        engine.link_settlement(Arc::new(SilentWallet));
        engine.select_side(Side::Heads).unwrap();

        let err = engine.flip().await.unwrap_err();
        assert_eq!(err, RoundError::Settlement(SettlementError::MissingReference));
        assert_eq!(engine.snapshot().rounds_played(), 0);
        assert!(!engine.snapshot().is_flipping);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delay_precedes_draw() {
        let config = EngineConfig {
            settle_delay: Duration::from_millis(1000),
            ..EngineConfig::default()
        };
        let mut engine = RoundEngine::with_coin(config, Box::new(ScriptedCoin::always(Side::Heads)));
        engine.select_side(Side::Heads).unwrap();

        let started = tokio::time::Instant::now();
        engine.flip().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test]
    async fn test_zero_bet_with_zero_balance_allowed() {
        let config = EngineConfig {
            initial_balance: 0,
            default_bet: 0,
            ..instant_config()
        };
        let mut engine = RoundEngine::with_coin(config, Box::new(ScriptedCoin::always(Side::Tails)));
        engine.select_side(Side::Heads).unwrap();

        let outcome = engine.flip().await.unwrap();
        assert_eq!(outcome.balance_after, 0);
        assert_eq!(engine.snapshot().losses, 1);
    }
}
