//! Outline agent state machine and termination policy.
//!
//! State is owned by exactly one run and advances by value: every transition
//! consumes the previous state and returns the next one. History is append-only.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::core::budget::{hard_iteration_ceiling, max_outline_versions};
use crate::core::planner::ToolKind;
use crate::outline::{Outline, OutlineEvaluation};

pub const TARGET_REACHED: &str = "target score reached";
pub const MAX_ATTEMPTS: &str = "max attempts reached, reporting best";
pub const SAFETY_CEILING: &str = "safety ceiling reached";

/// Caller-supplied parameters for one outline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentParams {
    pub goal: String,
    pub target_chapters: u32,
    pub target_words: u32,
    /// Acceptance threshold on the 0–10 evaluation scale.
    pub target_score: f64,
    pub max_retries: u32,
}

impl AgentParams {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            target_chapters: 12,
            target_words: 3000,
            target_score: 8.0,
            max_retries: 2,
        }
    }
}

/// Immutable record of one agent action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
    pub tool: ToolKind,
    pub reason: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Outcome of a successful tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    Generated { outline: Outline, summary: String },
    Evaluated { evaluation: OutlineEvaluation },
}

/// The highest-scoring outline and the evaluation that scored it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BestCandidate {
    pub outline: Outline,
    pub evaluation: OutlineEvaluation,
}

/// The run finished without the artifacts a result needs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AgentError {
    #[error("agent finished after {iterations} iterations without producing an outline")]
    NoOutline { iterations: u32 },
    #[error("agent finished after {iterations} iterations without evaluating an outline")]
    NoEvaluation { iterations: u32 },
}

#[derive(Debug, Clone)]
pub struct AgentState {
    params: AgentParams,
    iteration: u32,
    outline_version: u32,
    history: Vec<HistoryEntry>,
    latest_outline: Option<Outline>,
    latest_evaluation: Option<OutlineEvaluation>,
    best: Option<BestCandidate>,
    last_failure: Option<String>,
    done: bool,
    done_reason: Option<String>,
}

impl AgentState {
    pub fn new(params: AgentParams) -> Self {
        Self {
            params,
            iteration: 0,
            outline_version: 0,
            history: Vec::new(),
            latest_outline: None,
            latest_evaluation: None,
            best: None,
            last_failure: None,
            done: false,
            done_reason: None,
        }
    }

    pub fn params(&self) -> &AgentParams {
        &self.params
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn outline_version(&self) -> u32 {
        self.outline_version
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn latest_outline(&self) -> Option<&Outline> {
        self.latest_outline.as_ref()
    }

    pub fn latest_evaluation(&self) -> Option<&OutlineEvaluation> {
        self.latest_evaluation.as_ref()
    }

    pub fn best(&self) -> Option<&BestCandidate> {
        self.best.as_ref()
    }

    /// Error text of the most recent failed tool call, cleared by the next
    /// successful generation.
    pub fn last_failure(&self) -> Option<&str> {
        self.last_failure.as_deref()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn done_reason(&self) -> Option<&str> {
        self.done_reason.as_deref()
    }

    pub fn iteration_ceiling(&self) -> u32 {
        hard_iteration_ceiling(self.params.max_retries)
    }

    pub fn begin_iteration(mut self) -> Self {
        self.iteration += 1;
        self
    }

    /// Fold a successful tool result into the state.
    pub fn apply(mut self, result: ToolResult, reason: &str) -> Self {
        match result {
            ToolResult::Generated { outline, summary } => {
                self.outline_version += 1;
                self.latest_outline = Some(outline);
                self.latest_evaluation = None;
                self.last_failure = None;
                self.push_history(ToolKind::Generate, reason, summary, None);
            }
            ToolResult::Evaluated { evaluation } => {
                let is_best = self
                    .best
                    .as_ref()
                    .is_none_or(|best| evaluation.score > best.evaluation.score);
                if is_best && let Some(outline) = self.latest_outline.clone() {
                    self.best = Some(BestCandidate {
                        outline,
                        evaluation: evaluation.clone(),
                    });
                }
                self.push_history(
                    ToolKind::Evaluate,
                    reason,
                    evaluation.summary.clone(),
                    Some(evaluation.score),
                );
                self.latest_evaluation = Some(evaluation);
            }
        }
        self
    }

    /// Record a failed tool call so the planner can see it.
    pub fn record_failure(mut self, tool: ToolKind, reason: &str, error: &str) -> Self {
        self.last_failure = Some(error.to_string());
        self.push_history(tool, reason, format!("{tool} failed: {error}"), None);
        self
    }

    /// Transition to done. Only the first call has any effect.
    pub fn mark_done(mut self, reason: &str) -> Self {
        if self.done {
            return self;
        }
        self.done = true;
        self.done_reason = Some(reason.to_string());
        self.push_history(ToolKind::Finish, reason, reason.to_string(), None);
        self
    }

    /// Termination checks that do not depend on the planner, in priority order.
    pub fn termination_reason(&self) -> Option<&'static str> {
        let latest_passed = self.latest_evaluation.as_ref().map(|e| e.passed);
        if latest_passed == Some(true) {
            return Some(TARGET_REACHED);
        }
        if self.outline_version >= max_outline_versions(self.params.max_retries)
            && latest_passed == Some(false)
        {
            return Some(MAX_ATTEMPTS);
        }
        if self.iteration >= self.iteration_ceiling() {
            return Some(SAFETY_CEILING);
        }
        None
    }

    /// Produce the final result, preferring the best pair over the latest one.
    pub fn into_outcome(self) -> Result<OutlineRunOutcome, AgentError> {
        let iterations = self.iteration;
        let (outline, evaluation) = match self.best {
            Some(best) => (best.outline, best.evaluation),
            None => {
                let outline = self
                    .latest_outline
                    .ok_or(AgentError::NoOutline { iterations })?;
                let evaluation = self
                    .latest_evaluation
                    .ok_or(AgentError::NoEvaluation { iterations })?;
                (outline, evaluation)
            }
        };
        Ok(OutlineRunOutcome {
            target_reached: evaluation.passed,
            outline,
            evaluation,
            done_reason: self.done_reason.unwrap_or_else(|| "stopped".to_string()),
            iterations,
            outline_versions: self.outline_version,
            history: self.history,
        })
    }

    fn push_history(&mut self, tool: ToolKind, reason: &str, summary: String, score: Option<f64>) {
        self.history.push(HistoryEntry {
            iteration: self.iteration,
            timestamp: Utc::now(),
            tool,
            reason: reason.to_string(),
            summary,
            score,
        });
    }
}

/// Final result of an outline run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlineRunOutcome {
    pub outline: Outline,
    pub evaluation: OutlineEvaluation,
    pub target_reached: bool,
    pub done_reason: String,
    pub iterations: u32,
    pub outline_versions: u32,
    pub history: Vec<HistoryEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::outline_fixture;

    fn evaluation(score: f64) -> OutlineEvaluation {
        OutlineEvaluation::judge(score, 8.0, format!("scored {score}"), Vec::new(), Vec::new())
    }

    fn generated(chapters: usize) -> ToolResult {
        ToolResult::Generated {
            outline: outline_fixture(chapters),
            summary: format!("{chapters} chapters"),
        }
    }

    #[test]
    fn generation_clears_latest_evaluation() {
        let state = AgentState::new(AgentParams::new("goal"))
            .apply(generated(2), "draft")
            .apply(
                ToolResult::Evaluated {
                    evaluation: evaluation(5.0),
                },
                "check",
            )
            .apply(generated(3), "redraft");
        assert_eq!(state.outline_version(), 2);
        assert!(state.latest_evaluation().is_none());
        assert_eq!(state.history().len(), 3);
    }

    #[test]
    fn best_is_replaced_only_on_strictly_higher_score() {
        let state = AgentState::new(AgentParams::new("goal"))
            .apply(generated(2), "v1")
            .apply(ToolResult::Evaluated { evaluation: evaluation(6.0) }, "e1")
            .apply(generated(3), "v2")
            .apply(ToolResult::Evaluated { evaluation: evaluation(6.0) }, "e2")
            .apply(generated(4), "v3")
            .apply(ToolResult::Evaluated { evaluation: evaluation(5.0) }, "e3");

        let best = state.best().expect("best");
        assert_eq!(best.evaluation.score, 6.0);
        assert_eq!(best.outline.chapter_count(), 2);
    }

    #[test]
    fn mark_done_is_idempotent() {
        let state = AgentState::new(AgentParams::new("goal")).mark_done("first");
        let history_len = state.history().len();
        let state = state.mark_done("second");
        assert_eq!(state.done_reason(), Some("first"));
        assert_eq!(state.history().len(), history_len);
        assert!(state.is_done());
    }

    #[test]
    fn termination_prefers_target_over_exhaustion() {
        let params = AgentParams {
            max_retries: 0,
            ..AgentParams::new("goal")
        };
        let state = AgentState::new(params)
            .apply(generated(2), "v1")
            .apply(ToolResult::Evaluated { evaluation: evaluation(9.0) }, "e1");
        assert_eq!(state.termination_reason(), Some(TARGET_REACHED));
    }

    #[test]
    fn termination_reports_exhaustion_only_after_failed_evaluation() {
        let params = AgentParams {
            max_retries: 0,
            ..AgentParams::new("goal")
        };
        let state = AgentState::new(params).apply(generated(2), "v1");
        assert_eq!(state.termination_reason(), None);
        let state = state.apply(ToolResult::Evaluated { evaluation: evaluation(3.0) }, "e1");
        assert_eq!(state.termination_reason(), Some(MAX_ATTEMPTS));
    }

    #[test]
    fn ceiling_terminates_a_stalled_run() {
        let mut state = AgentState::new(AgentParams {
            max_retries: 1,
            ..AgentParams::new("goal")
        });
        for _ in 0..6 {
            state = state.begin_iteration();
        }
        assert_eq!(state.termination_reason(), Some(SAFETY_CEILING));
    }

    #[test]
    fn outcome_requires_outline_and_evaluation() {
        let err = AgentState::new(AgentParams::new("goal"))
            .begin_iteration()
            .into_outcome()
            .expect_err("no outline");
        assert_eq!(err, AgentError::NoOutline { iterations: 1 });

        let err = AgentState::new(AgentParams::new("goal"))
            .apply(generated(2), "v1")
            .into_outcome()
            .expect_err("no evaluation");
        assert_eq!(err, AgentError::NoEvaluation { iterations: 0 });
    }

    #[test]
    fn outcome_prefers_best_over_latest() {
        let outcome = AgentState::new(AgentParams::new("goal"))
            .apply(generated(2), "v1")
            .apply(ToolResult::Evaluated { evaluation: evaluation(7.0) }, "e1")
            .apply(generated(5), "v2")
            .apply(ToolResult::Evaluated { evaluation: evaluation(4.0) }, "e2")
            .mark_done(MAX_ATTEMPTS)
            .into_outcome()
            .expect("outcome");
        assert_eq!(outcome.evaluation.score, 7.0);
        assert_eq!(outcome.outline.chapter_count(), 2);
        assert!(!outcome.target_reached);
        assert_eq!(outcome.done_reason, MAX_ATTEMPTS);
    }
}
