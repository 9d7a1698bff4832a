//! Table: single-consumer command queue around a `RoundEngine`.
//!
//! One task owns the engine. Handles send commands over an mpsc channel
//! and receive replies on oneshots. While a round is in flight the actor
//! keeps serving commands, so re-entrant flips and side changes are
//! rejected rather than queued. Fortune lookups run as detached tasks
//! and report back through a weak sender.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::round::RoundEngine;
use crate::fortune::{self, FortuneProvider};
use crate::types::{FortuneReading, GameState, RoundError, RoundOutcome, RoundPhase, Side, Tally};

const COMMAND_BUFFER: usize = 64;

// ---------------------------------------------------------------------------
// Public surface
// ---------------------------------------------------------------------------

/// Everything a UI needs to render the table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSnapshot {
    pub state: GameState,
    pub phase: RoundPhase,
    pub fortune: Option<FortuneReading>,
    pub notice: Option<String>,
}

/// Resolves when an accepted flip settles (or its settlement aborts).
#[derive(Debug)]
pub struct FlipTicket {
    rx: oneshot::Receiver<Result<RoundOutcome, RoundError>>,
}

impl FlipTicket {
    pub async fn settled(self) -> Result<RoundOutcome, RoundError> {
        self.rx.await.map_err(|_| RoundError::TableClosed)?
    }
}

/// Cloneable handle to a running table.
#[derive(Clone)]
pub struct TableHandle {
    tx: mpsc::Sender<Command>,
}

impl TableHandle {
    pub async fn select_side(&self, side: Side) -> Result<(), RoundError> {
        self.request(|reply| Command::SelectSide { side, reply }).await?
    }

    pub async fn set_bet(&self, amount: i64) -> Result<u64, RoundError> {
        self.request(|reply| Command::SetBet { amount, reply }).await?
    }

    /// Start a flip. Precondition failures are returned immediately; an
    /// accepted flip yields a ticket that resolves at settlement.
    pub async fn flip(&self) -> Result<FlipTicket, RoundError> {
        self.request(|reply| Command::Flip { reply }).await?
    }

    /// Start a flip and wait for it to settle.
    pub async fn flip_and_settle(&self) -> Result<RoundOutcome, RoundError> {
        self.flip().await?.settled().await
    }

    pub async fn reset_round(&self) -> Result<(), RoundError> {
        self.request(|reply| Command::Reset { reply }).await
    }

    pub async fn snapshot(&self) -> Result<TableSnapshot, RoundError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, RoundError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| RoundError::TableClosed)?;
        rx.await.map_err(|_| RoundError::TableClosed)
    }
}

/// Fortune dispatch settings for a table.
#[derive(Clone)]
pub struct FortuneDesk {
    pub provider: Option<Arc<dyn FortuneProvider>>,
    pub timeout: Duration,
}

impl Default for FortuneDesk {
    fn default() -> Self {
        Self {
            provider: None,
            timeout: fortune::DEFAULT_TIMEOUT,
        }
    }
}

/// Spawn the actor owning `engine`. The task ends when every handle is
/// dropped and no round is in flight.
pub fn spawn_table(engine: RoundEngine, desk: FortuneDesk) -> (TableHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
    let actor = TableActor {
        engine,
        desk,
        rx,
        loopback: tx.downgrade(),
        waiting: None,
        fortune: None,
    };
    let task = tokio::spawn(actor.run());
    (TableHandle { tx }, task)
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

enum Command {
    SelectSide {
        side: Side,
        reply: oneshot::Sender<Result<(), RoundError>>,
    },
    SetBet {
        amount: i64,
        reply: oneshot::Sender<Result<u64, RoundError>>,
    },
    Flip {
        reply: oneshot::Sender<Result<FlipTicket, RoundError>>,
    },
    Reset {
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<TableSnapshot>,
    },
    FortuneReady(FortuneReading),
}

type Reply = oneshot::Sender<Result<RoundOutcome, RoundError>>;

struct TableActor {
    engine: RoundEngine,
    desk: FortuneDesk,
    rx: mpsc::Receiver<Command>,
    loopback: mpsc::WeakSender<Command>,
    /// Ticket holder of the round in flight.
    waiting: Option<Reply>,
    fortune: Option<FortuneReading>,
}

impl TableActor {
    async fn run(mut self) {
        info!("Table open");
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command),
                    None if !self.engine.is_settling() => break,
                    // Handles are gone but a round is still settling.
                    None => self.drain_in_flight().await,
                },
                event = self.engine.next_preface_event() => {
                    self.engine.apply_preface_event(event);
                }
            }
            self.deliver_resolution();
        }
        info!(rounds = self.engine.snapshot().rounds_played(), "Table closed");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::SelectSide { side, reply } => {
                let _ = reply.send(self.engine.select_side(side));
            }
            Command::SetBet { amount, reply } => {
                let _ = reply.send(self.engine.set_bet(amount));
            }
            Command::Flip { reply } => {
                let started = self.engine.start_flip();
                // Starting may settle the previous round first; its ticket
                // must be answered before a new one is issued.
                self.deliver_resolution();
                let result = started.map(|()| {
                    let (done, rx) = oneshot::channel();
                    self.waiting = Some(done);
                    FlipTicket { rx }
                });
                let _ = reply.send(result);
            }
            Command::Reset { reply } => {
                self.engine.reset_round();
                let _ = reply.send(());
            }
            Command::Snapshot { reply } => {
                let state = self.engine.snapshot();
                let _ = reply.send(TableSnapshot {
                    phase: state.phase(),
                    state,
                    fortune: self.fortune.clone(),
                    notice: self.engine.notice().map(str::to_string),
                });
            }
            Command::FortuneReady(reading) => {
                let newer = self
                    .fortune
                    .as_ref()
                    .map_or(true, |current| reading.round >= current.round);
                if newer {
                    debug!(round = reading.round, fallback = reading.from_fallback, "Fortune stored");
                    self.fortune = Some(reading);
                }
            }
        }
    }

    /// Answer the ticket of a round the engine just resolved.
    fn deliver_resolution(&mut self) {
        let Some(result) = self.engine.take_resolution() else {
            return;
        };
        if let Ok(outcome) = &result {
            if outcome.fortune_due {
                self.dispatch_fortune(outcome.tally);
            }
        }
        match self.waiting.take() {
            Some(reply) => {
                let _ = reply.send(result);
            }
            None => debug!("Round resolved with no ticket holder"),
        }
    }

    async fn drain_in_flight(&mut self) {
        while self.engine.is_settling() {
            let event = self.engine.next_preface_event().await;
            self.engine.apply_preface_event(event);
            self.deliver_resolution();
        }
    }

    fn dispatch_fortune(&self, tally: Tally) {
        let provider = self.desk.provider.clone();
        let timeout = self.desk.timeout;
        let loopback = self.loopback.clone();

        tokio::spawn(async move {
            let reading = fortune::consult(provider.as_deref(), tally, timeout).await;
            if let Some(tx) = loopback.upgrade() {
                let _ = tx.send(Command::FortuneReady(reading)).await;
            }
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
