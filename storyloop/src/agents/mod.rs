//! Orchestration that drives the generator through the pure loop logic.

pub mod checkers;
pub mod events;
pub mod outline;
pub mod qc;
pub mod repair;
pub mod summary;
