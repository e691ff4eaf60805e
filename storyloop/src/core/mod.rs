//! Deterministic, pure logic shared by the generation loops.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod agent_state;
pub mod budget;
pub mod compress;
pub mod lenient_json;
pub mod memory;
pub mod planner;
pub mod qc;
pub mod repair_instruction;
pub mod timeline;
pub mod types;
