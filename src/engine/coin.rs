//! Coin: the single source of randomness for round resolution.
//!
//! `RandomCoin` draws a fair bit from `StdRng`. `ScriptedCoin` replays a
//! fixed sequence so tests can force outcomes.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::Side;

/// Produces one coin face per call.
pub trait Coin: Send {
    fn toss(&mut self) -> Side;
}

/// Uniform 50/50 coin.
pub struct RandomCoin {
    rng: StdRng,
}

impl RandomCoin {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic coin for reproducible simulations.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomCoin {
    fn default() -> Self {
        Self::new()
    }
}

impl Coin for RandomCoin {
    fn toss(&mut self) -> Side {
        if self.rng.gen::<bool>() {
            Side::Heads
        } else {
            Side::Tails
        }
    }
}

/// Replays `sequence` in order, wrapping around at the end.
pub struct ScriptedCoin {
    sequence: Vec<Side>,
    cursor: usize,
}

impl ScriptedCoin {
    /// An empty sequence is treated as always-heads.
    pub fn new(sequence: Vec<Side>) -> Self {
        let sequence = if sequence.is_empty() {
            vec![Side::Heads]
        } else {
            sequence
        };
        Self { sequence, cursor: 0 }
    }

    pub fn always(side: Side) -> Self {
        Self::new(vec![side])
    }
}

impl Coin for ScriptedCoin {
    fn toss(&mut self) -> Side {
        let side = self.sequence[self.cursor % self.sequence.len()];
        self.cursor += 1;
        side
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
