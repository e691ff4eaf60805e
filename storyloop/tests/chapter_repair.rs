//! QC plus repair lifecycle, driven through the standard checker set.
//!
//! The scripted generator answers in call order: the three dimension
//! checkers (structure, character, pacing), then one revision per repair
//! attempt followed by a full re-check.

use storyloop::agents::qc::QcRunner;
use storyloop::agents::repair::{ChapterRepairer, PendingChapter, RepairSettings};
use storyloop::core::types::{ChapterDraft, Severity};
use storyloop::io::config::QcConfig;
use storyloop::io::prompt::PromptEngine;
use storyloop::progress::ProgressEvent;
use storyloop::test_support::ScriptedGenerator;

const CLEAN: &str = r#"{"score": 85, "issues": []}"#;
const VANISHING: &str = r#"{"score": 50, "issues": [{"severity": "critical", "category": "logic", "description": "Ren vanishes mid-scene"}]}"#;

fn draft(index: u32, text: &str) -> ChapterDraft {
    ChapterDraft {
        index,
        total_chapters: 10,
        goal: Some("Ren reaches the river fort".to_string()),
        text: text.to_string(),
    }
}

#[test]
fn high_scoring_chapter_with_minor_issue_needs_no_repair() {
    let prompts = PromptEngine::new(40_000).expect("prompts");
    let generator = ScriptedGenerator::texts([
        r#"{"score": 92, "issues": []}"#,
        r#"{"score": 92, "issues": []}"#,
        r#"{"score": 92, "issues": [{"severity": "minor", "description": "one long paragraph"}]}"#,
    ]);
    let runner = QcRunner::standard(&generator, &prompts, &QcConfig::default(), None);
    let chapter = draft(4, "Ren reached the fort at dusk.");
    let qc = runner.run(&chapter).result;
    assert_eq!(qc.score(), 92.0);
    assert_eq!(qc.count(Severity::Minor), 1);

    let repairer = ChapterRepairer::new(&generator, &prompts, &runner, RepairSettings::default());
    let result = repairer.repair(&chapter, qc, |_| {});

    assert_eq!(result.attempts, 0);
    assert!(result.success);
    assert_eq!(result.text, chapter.text);
    assert_eq!(generator.requests().len(), 3);
}

#[test]
fn critical_issue_is_repaired_in_one_attempt() {
    let prompts = PromptEngine::new(40_000).expect("prompts");
    let generator = ScriptedGenerator::texts([
        VANISHING,
        CLEAN,
        CLEAN,
        "```\nRen stayed at the gate until the captain arrived.\n```",
        CLEAN,
        CLEAN,
        CLEAN,
    ]);
    let runner = QcRunner::standard(&generator, &prompts, &QcConfig::default(), None);
    let chapter = draft(5, "Ren was at the gate. Then the captain spoke to no one.");
    let qc = runner.run(&chapter).result;
    assert_eq!(qc.score(), 59.0);
    assert!(!qc.passed());

    let repairer = ChapterRepairer::new(&generator, &prompts, &runner, RepairSettings::default());
    let mut events = Vec::new();
    let result = repairer.repair(&chapter, qc, |e| events.push(e.clone()));

    assert_eq!(result.attempts, 1);
    assert!(result.success);
    assert!(result.final_qc.passed());
    assert_eq!(result.text, "Ren stayed at the gate until the captain arrived.");
    assert!(generator.requests()[3].prompt.contains("Ren vanishes mid-scene"));
    assert!(matches!(
        events.first(),
        Some(ProgressEvent::RepairAttemptStarted { critical: 1, .. })
    ));
    assert_eq!(generator.remaining(), 0);
}

#[test]
fn persistent_critical_issue_exhausts_attempts_and_fails() {
    let prompts = PromptEngine::new(40_000).expect("prompts");
    let generator = ScriptedGenerator::texts([
        VANISHING, CLEAN, CLEAN, "first revision", VANISHING, CLEAN, CLEAN, "second revision", VANISHING, CLEAN,
        CLEAN,
    ]);
    let runner = QcRunner::standard(&generator, &prompts, &QcConfig::default(), None);
    let chapter = draft(6, "Ren was at the gate.");
    let qc = runner.run(&chapter).result;

    let repairer = ChapterRepairer::new(&generator, &prompts, &runner, RepairSettings::default());
    let result = repairer.repair(&chapter, qc, |_| {});

    assert_eq!(result.attempts, 2);
    assert!(!result.success);
    assert_eq!(result.final_qc.score(), 59.0);
    assert_eq!(result.text, "second revision");
}

#[test]
fn batch_passes_clean_chapters_through_and_repairs_the_rest() {
    let prompts = PromptEngine::new(40_000).expect("prompts");
    let generator = ScriptedGenerator::texts([
        CLEAN,
        CLEAN,
        CLEAN,
        VANISHING,
        CLEAN,
        CLEAN,
        "Ren stayed at the gate.",
        CLEAN,
        CLEAN,
        CLEAN,
    ]);
    let runner = QcRunner::standard(&generator, &prompts, &QcConfig::default(), None);
    let pending: Vec<PendingChapter> = [draft(1, "Ren left home."), draft(2, "Ren vanished.")]
        .into_iter()
        .map(|draft| {
            let qc = runner.run(&draft).result;
            PendingChapter { draft, qc }
        })
        .collect();

    let repairer = ChapterRepairer::new(&generator, &prompts, &runner, RepairSettings::default());
    let report = repairer.repair_batch(pending, |_| {});
    let stats = report.stats();

    assert_eq!(stats.passed_through, 1);
    assert_eq!(stats.attempted, 1);
    assert_eq!(stats.succeeded, 1);
    assert!(report.all_succeeded());
    assert_eq!(report.chapters[0].result.text, "Ren left home.");
    assert_eq!(report.chapters[1].result.text, "Ren stayed at the gate.");
}
