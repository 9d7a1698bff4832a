//! Core engine: coin, round lifecycle, and the table actor.

pub mod coin;
pub mod round;
pub mod table;

pub use coin::{Coin, RandomCoin, ScriptedCoin};
pub use round::{EngineConfig, RoundEngine};
pub use table::{spawn_table, FortuneDesk, TableHandle, TableSnapshot};
