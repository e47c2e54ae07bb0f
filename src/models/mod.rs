//! Persistence models for the engine's tables.

pub mod deal;
pub mod recovery;
pub mod task;
pub mod verification;
pub mod wallet;
