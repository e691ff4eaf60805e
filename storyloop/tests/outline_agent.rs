//! End-to-end outline agent runs against a scripted generator.
//!
//! Each scenario scripts the full reply sequence (outline, evaluation, ...)
//! and checks how many iterations the loop took and why it stopped.

use storyloop::agents::outline::{OutlineAgent, OutlineAgentSettings, RuleBasedPlanner};
use storyloop::core::agent_state::{AgentParams, MAX_ATTEMPTS, TARGET_REACHED};
use storyloop::io::prompt::PromptEngine;
use storyloop::progress::ProgressEvent;
use storyloop::test_support::{ScriptedGenerator, outline_fixture};

fn outline_json(chapters: usize) -> String {
    serde_json::to_string(&outline_fixture(chapters)).expect("serialize outline")
}

fn evaluation_json(score: f64, weakness: &str) -> String {
    format!(
        r#"{{"score": {score}, "summary": "scored {score}", "strengths": ["clear premise"], "weaknesses": ["{weakness}"]}}"#
    )
}

fn params(max_retries: u32) -> AgentParams {
    AgentParams {
        max_retries,
        target_score: 8.0,
        ..AgentParams::new("A courier crosses a burning empire")
    }
}

/// One retry allowed, first outline scores 6, second scores 9.
///
/// ```text
/// iter 1: generate  -> outline v1
/// iter 2: evaluate  -> 6.0 (below 8.0)
/// iter 3: generate  -> outline v2
/// iter 4: evaluate  -> 9.0 -> target reached
/// ```
#[test]
fn retry_reaches_target_on_second_outline() {
    let prompts = PromptEngine::new(40_000).expect("prompts");
    let generator = ScriptedGenerator::texts([
        outline_json(3),
        evaluation_json(6.0, "the middle act sags"),
        outline_json(4),
        evaluation_json(9.0, "minor pacing"),
    ]);
    let agent = OutlineAgent::new(&generator, &prompts, OutlineAgentSettings::default());
    let mut events = Vec::new();
    let outcome = agent
        .run(params(1), &RuleBasedPlanner, |e| events.push(e.clone()))
        .expect("run");

    assert!(outcome.target_reached);
    assert_eq!(outcome.done_reason, TARGET_REACHED);
    assert_eq!(outcome.iterations, 4);
    assert_eq!(outcome.outline_versions, 2);
    assert_eq!(outcome.evaluation.score, 9.0);
    assert_eq!(outcome.outline.chapter_count(), 4);
    // four tool calls plus the finish entry
    assert_eq!(outcome.history.len(), 5);
    assert_eq!(generator.remaining(), 0);

    let generated = events
        .iter()
        .filter(|e| matches!(e, ProgressEvent::OutlineGenerated { .. }))
        .count();
    assert_eq!(generated, 2);
    assert!(matches!(
        events.last(),
        Some(ProgressEvent::AgentFinished { iterations: 4, .. })
    ));
    assert!(generator.requests()[2].prompt.contains("the middle act sags"));
}

/// Retries exhausted below target: the best outline is reported, not the latest.
#[test]
fn exhausted_retries_report_best_outline() {
    let prompts = PromptEngine::new(40_000).expect("prompts");
    let generator = ScriptedGenerator::texts([
        outline_json(3),
        evaluation_json(7.0, "thin antagonist"),
        outline_json(5),
        evaluation_json(5.5, "rushed ending"),
    ]);
    let agent = OutlineAgent::new(&generator, &prompts, OutlineAgentSettings::default());
    let outcome = agent.run(params(1), &RuleBasedPlanner, |_| {}).expect("run");

    assert!(!outcome.target_reached);
    assert_eq!(outcome.done_reason, MAX_ATTEMPTS);
    assert_eq!(outcome.iterations, 4);
    assert_eq!(outcome.evaluation.score, 7.0);
    assert_eq!(outcome.outline.chapter_count(), 3);
}

/// Zero retries: a single generate/evaluate pair, whatever the score.
#[test]
fn zero_retries_stops_after_first_evaluation() {
    let prompts = PromptEngine::new(40_000).expect("prompts");
    let generator = ScriptedGenerator::texts([outline_json(2), evaluation_json(4.0, "everything")]);
    let agent = OutlineAgent::new(&generator, &prompts, OutlineAgentSettings::default());
    let outcome = agent.run(params(0), &RuleBasedPlanner, |_| {}).expect("run");

    assert_eq!(outcome.iterations, 2);
    assert_eq!(outcome.outline_versions, 1);
    assert_eq!(outcome.done_reason, MAX_ATTEMPTS);
}
