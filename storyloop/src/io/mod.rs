//! Side-effecting collaborators: config, generators, prompts and result files.

pub mod config;
pub mod generator;
pub mod process;
pub mod prompt;
pub mod report;
pub mod retry;
pub mod structured;
