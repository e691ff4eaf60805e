//! Generation, evaluation and repair loops for long-form fiction.
//!
//! The crate drives an external text generator through four cooperating loops:
//! an outline agent that generates and critiques outlines until a target score
//! is reached, chapter quality control with bounded repair, a tiered rolling
//! summary kept within a character budget, and an event ledger that flags
//! chapters narrating a completed event again.
//!
//! - **[`core`]**: Pure, deterministic logic (scoring, planning, compression,
//!   ledger matching). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (config, prompt rendering, the
//!   generator process, retries, JSON files).
//! - **[`agents`]**: Orchestration of core logic with a generator.

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod outline;
pub mod progress;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
