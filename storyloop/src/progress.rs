//! Ordered progress notifications emitted by the outline and repair loops.
//!
//! Callers pass an `FnMut(&ProgressEvent)`; events arrive in the order the loop
//! performs the work. Nothing here is persisted.

use std::fmt;

use serde::Serialize;

use crate::core::planner::ToolKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    IterationStarted {
        iteration: u32,
        ceiling: u32,
    },
    ToolSelected {
        iteration: u32,
        tool: ToolKind,
        reason: String,
    },
    OutlineGenerated {
        version: u32,
        chapters: usize,
    },
    OutlineEvaluated {
        version: u32,
        score: f64,
        passed: bool,
    },
    ToolFailed {
        tool: ToolKind,
        error: String,
    },
    AgentFinished {
        reason: String,
        iterations: u32,
    },
    RepairAttemptStarted {
        chapter: u32,
        attempt: u32,
        max_attempts: u32,
        critical: usize,
        major: usize,
    },
    RepairGenerationFailed {
        chapter: u32,
        attempt: u32,
        error: String,
    },
    RepairRechecked {
        chapter: u32,
        attempt: u32,
        score: f64,
        passed: bool,
    },
    RepairFinished {
        chapter: u32,
        attempts: u32,
        score: f64,
        success: bool,
    },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IterationStarted { iteration, ceiling } => {
                write!(f, "iteration {iteration}/{ceiling}")
            }
            Self::ToolSelected { tool, reason, .. } => write!(f, "{tool}: {reason}"),
            Self::OutlineGenerated { version, chapters } => {
                write!(f, "outline v{version} generated ({chapters} chapters)")
            }
            Self::OutlineEvaluated {
                version,
                score,
                passed,
            } => write!(
                f,
                "outline v{version} scored {score:.1} ({})",
                if *passed { "pass" } else { "fail" }
            ),
            Self::ToolFailed { tool, error } => write!(f, "{tool} failed: {error}"),
            Self::AgentFinished { reason, iterations } => {
                write!(f, "finished after {iterations} iterations: {reason}")
            }
            Self::RepairAttemptStarted {
                chapter,
                attempt,
                max_attempts,
                critical,
                major,
            } => write!(
                f,
                "chapter {chapter}: repair attempt {attempt}/{max_attempts} ({critical} critical, {major} major)"
            ),
            Self::RepairGenerationFailed {
                chapter,
                attempt,
                error,
            } => write!(f, "chapter {chapter}: repair attempt {attempt} failed: {error}"),
            Self::RepairRechecked {
                chapter,
                attempt,
                score,
                passed,
            } => write!(
                f,
                "chapter {chapter}: score {score:.1} after attempt {attempt}{}",
                if *passed { " (pass)" } else { "" }
            ),
            Self::RepairFinished {
                chapter,
                attempts,
                score,
                success,
            } => write!(
                f,
                "chapter {chapter}: {} after {attempts} attempts, score {score:.1}",
                if *success { "accepted" } else { "not accepted" }
            ),
        }
    }
}
