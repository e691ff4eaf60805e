//! Planner vocabulary and the deterministic rule-based strategy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::agent_state::{AgentState, MAX_ATTEMPTS, TARGET_REACHED};
use crate::core::budget::max_outline_versions;

/// The closed set of tools the outline agent can dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Generate,
    Evaluate,
    Finish,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [ToolKind::Generate, ToolKind::Evaluate, ToolKind::Finish];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Evaluate => "evaluate",
            Self::Finish => "finish",
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool identifier outside the legal set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown tool '{0}' (expected one of: generate, evaluate, finish)")]
pub struct UnknownTool(pub String);

impl FromStr for ToolKind {
    type Err = UnknownTool;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|tool| tool.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| UnknownTool(wanted.to_string()))
    }
}

/// Which planner strategy drives the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlannerKind {
    #[default]
    Rule,
    Model,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown planner '{0}' (expected 'rule' or 'model')")]
pub struct UnknownPlanner(pub String);

impl FromStr for PlannerKind {
    type Err = UnknownPlanner;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rule" => Ok(Self::Rule),
            "model" => Ok(Self::Model),
            other => Err(UnknownPlanner(other.to_string())),
        }
    }
}

/// One planner choice, consumed by the iteration that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannerDecision {
    pub tool: ToolKind,
    pub reason: String,
    /// Free-text guidance for the tool (e.g. weaknesses to address).
    pub input: Option<String>,
}

impl PlannerDecision {
    pub fn new(tool: ToolKind, reason: impl Into<String>) -> Self {
        Self {
            tool,
            reason: reason.into(),
            input: None,
        }
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

/// Deterministic generate → evaluate → (repeat | finish) alternation.
pub fn rule_based_decision(state: &AgentState) -> PlannerDecision {
    if let Some(reason) = state.done_reason() {
        return PlannerDecision::new(ToolKind::Finish, reason);
    }
    if state.latest_outline().is_none() {
        let reason = match state.last_failure() {
            Some(err) => format!("retry generation after failure: {err}"),
            None => "no outline yet".to_string(),
        };
        return PlannerDecision::new(ToolKind::Generate, reason);
    }
    let outline_version = state.outline_version();
    let Some(evaluation) = state.latest_evaluation() else {
        return PlannerDecision::new(
            ToolKind::Evaluate,
            format!("evaluate outline v{outline_version}"),
        );
    };
    if evaluation.passed {
        return PlannerDecision::new(ToolKind::Finish, TARGET_REACHED);
    }
    if outline_version >= max_outline_versions(state.params().max_retries) {
        return PlannerDecision::new(ToolKind::Finish, MAX_ATTEMPTS);
    }

    let decision = PlannerDecision::new(
        ToolKind::Generate,
        format!(
            "outline v{outline_version} scored {:.1} below target {:.1}",
            evaluation.score,
            state.params().target_score
        ),
    );
    if evaluation.weaknesses.is_empty() {
        decision
    } else {
        decision.with_input(evaluation.weaknesses.join("\n"))
    }
}
