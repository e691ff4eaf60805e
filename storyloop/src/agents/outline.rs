//! The outline agent: a planner-driven generate/evaluate loop.
//!
//! Each iteration asks a [`Planner`] for one [`ToolKind`], dispatches it through
//! a fixed handler table and folds the result into [`AgentState`]. Tool
//! failures never escape the loop; they are recorded in the history where the
//! planner can see them. The only error a run returns is finishing without an
//! outline or without an evaluation.

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::core::agent_state::{AgentParams, AgentState, OutlineRunOutcome, ToolResult};
use crate::core::budget::max_outline_versions;
use crate::core::planner::{PlannerDecision, PlannerKind, ToolKind, rule_based_decision};
use crate::io::config::AgentConfig;
use crate::io::generator::TextGenerator;
use crate::io::prompt::{EvaluatePromptInput, OutlinePromptInput, PlannerPromptInput, PromptEngine};
use crate::io::structured::{ReplySchema, StructuredReply, generate_structured};
use crate::outline::{Outline, OutlineEvaluation};
use crate::progress::ProgressEvent;

/// Chooses the next tool from the current state.
pub trait Planner {
    fn decide(&self, state: &AgentState) -> PlannerDecision;
}

/// Deterministic generate → evaluate → (regenerate | finish) alternation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleBasedPlanner;

impl Planner for RuleBasedPlanner {
    fn decide(&self, state: &AgentState) -> PlannerDecision {
        rule_based_decision(state)
    }
}

#[derive(Debug, Deserialize)]
struct PlannerReply {
    tool: String,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    input: Option<String>,
}

/// Asks the generator which tool to run next.
///
/// Any failure (generation, malformed reply, unknown tool) falls back to the
/// rule-based decision for that iteration.
pub struct ModelPlanner<'a, G: ?Sized> {
    generator: &'a G,
    prompts: &'a PromptEngine,
    temperature: f32,
}

impl<'a, G: TextGenerator + ?Sized> ModelPlanner<'a, G> {
    pub fn new(generator: &'a G, prompts: &'a PromptEngine, temperature: f32) -> Self {
        Self {
            generator,
            prompts,
            temperature,
        }
    }

    fn ask(&self, state: &AgentState) -> Result<PlannerDecision> {
        let params = state.params();
        let input = PlannerPromptInput {
            goal: &params.goal,
            iteration: state.iteration(),
            ceiling: state.iteration_ceiling(),
            outline_version: state.outline_version(),
            max_versions: max_outline_versions(params.max_retries),
            has_outline: state.latest_outline().is_some(),
            latest_score: state.latest_evaluation().map(|e| e.score),
            best_score: state.best().map(|b| b.evaluation.score),
            target_score: params.target_score,
            last_failure: state.last_failure(),
            history: state
                .history()
                .iter()
                .map(|h| format!("#{} {}: {}", h.iteration, h.tool, h.summary))
                .collect(),
        };
        let prompt = self.prompts.planner(&input)?;
        let reply: PlannerReply =
            match generate_structured(self.generator, prompt, self.temperature, ReplySchema::PlannerDecision)? {
                StructuredReply::Parsed(parsed) => parsed.value,
                StructuredReply::Malformed(failure) => {
                    return Err(anyhow::Error::new(failure).context("planner reply was malformed"));
                }
            };
        let tool: ToolKind = reply.tool.parse()?;
        let reason = if reply.reason.trim().is_empty() {
            format!("model planner chose {tool}")
        } else {
            reply.reason.trim().to_string()
        };
        let decision = PlannerDecision::new(tool, reason);
        Ok(match reply.input.filter(|s| !s.trim().is_empty()) {
            Some(input) => decision.with_input(input),
            None => decision,
        })
    }
}

impl<G: TextGenerator + ?Sized> Planner for ModelPlanner<'_, G> {
    fn decide(&self, state: &AgentState) -> PlannerDecision {
        match self.ask(state) {
            Ok(decision) => decision,
            Err(err) => {
                warn!(iteration = state.iteration(), err = %format!("{err:#}"), "model planner failed, using rule-based decision");
                rule_based_decision(state)
            }
        }
    }
}

/// Build the planner a run was configured with.
pub fn planner_for<'a, G: TextGenerator + ?Sized>(
    kind: PlannerKind,
    generator: &'a G,
    prompts: &'a PromptEngine,
    temperature: f32,
) -> Box<dyn Planner + 'a> {
    match kind {
        PlannerKind::Rule => Box::new(RuleBasedPlanner),
        PlannerKind::Model => Box::new(ModelPlanner::new(generator, prompts, temperature)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlineAgentSettings {
    pub generate_temperature: f32,
    pub evaluate_temperature: f32,
}

impl OutlineAgentSettings {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            generate_temperature: config.generate_temperature,
            evaluate_temperature: config.evaluate_temperature,
        }
    }
}

impl Default for OutlineAgentSettings {
    fn default() -> Self {
        Self::from_config(&AgentConfig::default())
    }
}

type ToolHandler<'a, G> = fn(&OutlineAgent<'a, G>, &AgentState, Option<&str>) -> Result<ToolResult>;

/// Runs the outline loop against one generator.
pub struct OutlineAgent<'a, G: ?Sized> {
    generator: &'a G,
    prompts: &'a PromptEngine,
    settings: OutlineAgentSettings,
    recent_events: Vec<String>,
}

impl<'a, G: TextGenerator + ?Sized> OutlineAgent<'a, G> {
    pub fn new(generator: &'a G, prompts: &'a PromptEngine, settings: OutlineAgentSettings) -> Self {
        Self {
            generator,
            prompts,
            settings,
            recent_events: Vec::new(),
        }
    }

    /// Completed story events shown to the generation tool.
    pub fn with_recent_events(mut self, events: Vec<String>) -> Self {
        self.recent_events = events;
        self
    }

    fn handler(tool: ToolKind) -> Option<ToolHandler<'a, G>> {
        match tool {
            ToolKind::Generate => Some(Self::generate_tool),
            ToolKind::Evaluate => Some(Self::evaluate_tool),
            ToolKind::Finish => None,
        }
    }

    #[instrument(skip_all, fields(max_retries = params.max_retries, target_score = params.target_score))]
    pub fn run<P, F>(&self, params: AgentParams, planner: &P, mut on_progress: F) -> Result<OutlineRunOutcome>
    where
        P: Planner + ?Sized,
        F: FnMut(&ProgressEvent),
    {
        let mut state = AgentState::new(params);
        loop {
            if let Some(reason) = state.termination_reason() {
                state = state.mark_done(reason);
                break;
            }
            state = state.begin_iteration();
            on_progress(&ProgressEvent::IterationStarted {
                iteration: state.iteration(),
                ceiling: state.iteration_ceiling(),
            });

            let decision = planner.decide(&state);
            debug!(iteration = state.iteration(), tool = %decision.tool, reason = %decision.reason, "planner decided");
            on_progress(&ProgressEvent::ToolSelected {
                iteration: state.iteration(),
                tool: decision.tool,
                reason: decision.reason.clone(),
            });

            let Some(handler) = Self::handler(decision.tool) else {
                state = state.mark_done(&decision.reason);
                break;
            };
            match handler(self, &state, decision.input.as_deref()) {
                Ok(result) => {
                    state = state.apply(result, &decision.reason);
                    emit_applied(&state, decision.tool, &mut on_progress);
                }
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(iteration = state.iteration(), tool = %decision.tool, err = %error, "tool failed");
                    on_progress(&ProgressEvent::ToolFailed {
                        tool: decision.tool,
                        error: error.clone(),
                    });
                    state = state.record_failure(decision.tool, &decision.reason, &error);
                }
            }
        }

        let reason = state.done_reason().unwrap_or_default().to_string();
        info!(
            iterations = state.iteration(),
            outline_versions = state.outline_version(),
            best_score = state.best().map(|b| b.evaluation.score),
            reason = %reason,
            "outline agent finished"
        );
        on_progress(&ProgressEvent::AgentFinished {
            reason,
            iterations: state.iteration(),
        });
        Ok(state.into_outcome()?)
    }

    fn generate_tool(&self, state: &AgentState, input: Option<&str>) -> Result<ToolResult> {
        let params = state.params();
        let weaknesses: Vec<String> = state
            .latest_evaluation()
            .map(|e| e.weaknesses.clone())
            .unwrap_or_default();
        // Guidance that only restates the evaluator feedback is not repeated.
        let guidance = input.filter(|g| !g.trim().is_empty() && *g != weaknesses.join("\n"));
        let prompt = self.prompts.outline_generate(&OutlinePromptInput {
            goal: &params.goal,
            target_chapters: params.target_chapters,
            target_words: params.target_words,
            version: state.outline_version() + 1,
            guidance,
            previous_outline: state.latest_outline().map(Outline::to_markdown),
            weaknesses: &weaknesses,
            recent_events: &self.recent_events,
            failure: state.last_failure(),
        })?;

        let reply = generate_structured::<_, Outline>(
            self.generator,
            prompt,
            self.settings.generate_temperature,
            ReplySchema::Outline,
        )
        .context("generate outline")?;
        let mut outline = match reply {
            StructuredReply::Parsed(parsed) => parsed.value,
            StructuredReply::Malformed(failure) => {
                return Err(anyhow::Error::new(failure).context("outline reply was malformed"));
            }
        };
        outline.renumber();
        let summary = format!(
            "\"{}\" with {} chapters in {} volumes",
            outline.title.trim(),
            outline.chapter_count(),
            outline.volumes.len()
        );
        Ok(ToolResult::Generated { outline, summary })
    }

    fn evaluate_tool(&self, state: &AgentState, _input: Option<&str>) -> Result<ToolResult> {
        let outline = state
            .latest_outline()
            .ok_or_else(|| anyhow!("no outline to evaluate"))?;
        let params = state.params();
        let prompt = self.prompts.outline_evaluate(&EvaluatePromptInput {
            goal: &params.goal,
            target_chapters: params.target_chapters,
            target_words: params.target_words,
            target_score: params.target_score,
            outline: outline.to_markdown(),
        })?;

        let reply = generate_structured::<_, EvaluationReply>(
            self.generator,
            prompt,
            self.settings.evaluate_temperature,
            ReplySchema::Evaluation,
        )
        .context("evaluate outline")?;
        let reply = match reply {
            StructuredReply::Parsed(parsed) => parsed.value,
            StructuredReply::Malformed(failure) => {
                return Err(anyhow::Error::new(failure).context("evaluation reply was malformed"));
            }
        };
        Ok(ToolResult::Evaluated {
            evaluation: OutlineEvaluation::judge(
                reply.score,
                params.target_score,
                reply.summary,
                reply.strengths,
                reply.weaknesses,
            ),
        })
    }
}

#[derive(Debug, Deserialize)]
struct EvaluationReply {
    score: f64,
    summary: String,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
}

fn emit_applied<F: FnMut(&ProgressEvent)>(state: &AgentState, tool: ToolKind, on_progress: &mut F) {
    match tool {
        ToolKind::Generate => {
            if let Some(outline) = state.latest_outline() {
                on_progress(&ProgressEvent::OutlineGenerated {
                    version: state.outline_version(),
                    chapters: outline.chapter_count(),
                });
            }
        }
        ToolKind::Evaluate => {
            if let Some(evaluation) = state.latest_evaluation() {
                on_progress(&ProgressEvent::OutlineEvaluated {
                    version: state.outline_version(),
                    score: evaluation.score,
                    passed: evaluation.passed,
                });
            }
        }
        ToolKind::Finish => {}
    }
}
