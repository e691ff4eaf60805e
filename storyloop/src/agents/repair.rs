//! Bounded automatic repair of chapters that failed QC.
//!
//! A repair pass sends the chapter and an instruction built from its blocking
//! issues to the generator, then re-inspects the result. The loop never retries
//! a failed generation; it stops and reports what it had.

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::agents::qc::ChapterInspector;
use crate::core::repair_instruction::build_repair_instruction;
use crate::core::types::{ChapterDraft, QcResult, Severity};
use crate::io::config::RepairConfig;
use crate::io::generator::{GenerateRequest, TextGenerator};
use crate::io::prompt::{PromptEngine, RepairPromptInput};
use crate::progress::ProgressEvent;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepairSettings {
    pub max_attempts: u32,
    /// Score at which an unpassed chapter still counts as a success.
    pub acceptance_floor: f64,
    pub max_major_issues: usize,
    pub temperature: f32,
}

impl RepairSettings {
    pub fn from_config(config: &RepairConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            acceptance_floor: config.acceptance_floor,
            max_major_issues: config.max_major_issues,
            temperature: config.temperature,
        }
    }
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self::from_config(&RepairConfig::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairResult {
    pub text: String,
    pub attempts: u32,
    pub final_qc: QcResult,
    pub success: bool,
    pub log: Vec<String>,
}

/// One chapter waiting for repair, with the QC verdict it currently has.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingChapter {
    pub draft: ChapterDraft,
    pub qc: QcResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChapterRepairOutcome {
    pub index: u32,
    /// The chapter had already passed and was not touched.
    pub passed_through: bool,
    pub result: RepairResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchStats {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub passed_through: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchRepairReport {
    pub chapters: Vec<ChapterRepairOutcome>,
}

impl BatchRepairReport {
    pub fn stats(&self) -> BatchStats {
        let mut stats = BatchStats::default();
        for chapter in &self.chapters {
            if chapter.passed_through {
                stats.passed_through += 1;
            } else {
                stats.attempted += 1;
                if chapter.result.success {
                    stats.succeeded += 1;
                } else {
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    pub fn all_succeeded(&self) -> bool {
        self.chapters.iter().all(|c| c.result.success)
    }
}

pub struct ChapterRepairer<'a, G: ?Sized, I: ?Sized> {
    generator: &'a G,
    prompts: &'a PromptEngine,
    inspector: &'a I,
    settings: RepairSettings,
}

impl<'a, G, I> ChapterRepairer<'a, G, I>
where
    G: TextGenerator + ?Sized,
    I: ChapterInspector + ?Sized,
{
    pub fn new(generator: &'a G, prompts: &'a PromptEngine, inspector: &'a I, settings: RepairSettings) -> Self {
        Self {
            generator,
            prompts,
            inspector,
            settings,
        }
    }

    /// Repair one chapter starting from its current QC verdict.
    #[instrument(skip_all, fields(chapter = chapter.index, initial_score = initial.score()))]
    pub fn repair<F: FnMut(&ProgressEvent)>(
        &self,
        chapter: &ChapterDraft,
        initial: QcResult,
        mut on_progress: F,
    ) -> RepairResult {
        let mut log = vec![format!("initial QC: {}", describe(&initial))];
        let mut working = chapter.clone();
        let mut qc = initial;
        let mut attempts = 0u32;

        if qc.passed() {
            log.push("chapter already passed QC, nothing to repair".to_string());
        }
        while !qc.passed() && attempts < self.settings.max_attempts {
            if !qc.has_blocking_issues() {
                log.push("no critical or major issues remain, stopping".to_string());
                break;
            }
            attempts += 1;
            on_progress(&ProgressEvent::RepairAttemptStarted {
                chapter: chapter.index,
                attempt: attempts,
                max_attempts: self.settings.max_attempts,
                critical: qc.count(Severity::Critical),
                major: qc.count(Severity::Major),
            });
            log.push(format!(
                "attempt {attempts}: fixing {} critical and {} major issues",
                qc.count(Severity::Critical),
                qc.count(Severity::Major).min(self.settings.max_major_issues)
            ));

            let revised = match self.revise(&working, &qc) {
                Ok(text) => text,
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(chapter = chapter.index, attempt = attempts, err = %error, "repair generation failed");
                    log.push(format!("attempt {attempts}: generation failed, stopping: {error}"));
                    on_progress(&ProgressEvent::RepairGenerationFailed {
                        chapter: chapter.index,
                        attempt: attempts,
                        error,
                    });
                    break;
                }
            };
            working = working.with_text(revised);
            qc = self.inspector.inspect(&working);
            log.push(format!("attempt {attempts}: re-checked, {}", describe(&qc)));
            on_progress(&ProgressEvent::RepairRechecked {
                chapter: chapter.index,
                attempt: attempts,
                score: qc.score(),
                passed: qc.passed(),
            });
            if qc.passed() {
                log.push(format!("attempt {attempts}: chapter passed QC"));
            }
        }

        // Only minor issues left is a success regardless of score.
        let blocking = qc.has_blocking_issues();
        let success = qc.passed() || !blocking || qc.score() >= self.settings.acceptance_floor;
        if !qc.passed() && success {
            if blocking {
                log.push(format!(
                    "accepted at score {:.1} (floor {:.1}) without a formal pass",
                    qc.score(),
                    self.settings.acceptance_floor
                ));
            } else {
                log.push(format!(
                    "accepted at score {:.1}: no critical or major issues",
                    qc.score()
                ));
            }
        }
        info!(chapter = chapter.index, attempts, score = qc.score(), success, "repair finished");
        on_progress(&ProgressEvent::RepairFinished {
            chapter: chapter.index,
            attempts,
            score: qc.score(),
            success,
        });
        RepairResult {
            text: working.text,
            attempts,
            final_qc: qc,
            success,
            log,
        }
    }

    /// Repair chapters one at a time. Passed chapters are returned untouched.
    pub fn repair_batch<F: FnMut(&ProgressEvent)>(
        &self,
        chapters: Vec<PendingChapter>,
        mut on_progress: F,
    ) -> BatchRepairReport {
        let chapters = chapters
            .into_iter()
            .map(|pending| {
                let index = pending.draft.index;
                if pending.qc.passed() {
                    debug!(chapter = index, "chapter already passed, skipping repair");
                    return ChapterRepairOutcome {
                        index,
                        passed_through: true,
                        result: RepairResult {
                            text: pending.draft.text,
                            attempts: 0,
                            success: true,
                            log: vec!["chapter already passed QC, nothing to repair".to_string()],
                            final_qc: pending.qc,
                        },
                    };
                }
                ChapterRepairOutcome {
                    index,
                    passed_through: false,
                    result: self.repair(&pending.draft, pending.qc, &mut on_progress),
                }
            })
            .collect();
        BatchRepairReport { chapters }
    }

    fn revise(&self, chapter: &ChapterDraft, qc: &QcResult) -> anyhow::Result<String> {
        let instruction = build_repair_instruction(qc, chapter.position(), self.settings.max_major_issues);
        let prompt = self.prompts.chapter_repair(&RepairPromptInput {
            instruction: &instruction,
            text: &chapter.text,
        })?;
        let request = GenerateRequest::new(prompt.system, prompt.prompt, self.settings.temperature);
        let text = strip_fence(&self.generator.generate(&request)?);
        if text.is_empty() {
            anyhow::bail!("generator returned an empty revision");
        }
        Ok(text)
    }
}

fn describe(qc: &QcResult) -> String {
    format!(
        "score {:.1}, {} critical, {} major, {} minor{}",
        qc.score(),
        qc.count(Severity::Critical),
        qc.count(Severity::Major),
        qc.count(Severity::Minor),
        if qc.passed() { ", passed" } else { "" }
    )
}

/// Drop a single surrounding markdown fence, if the whole reply is fenced.
fn strip_fence(reply: &str) -> String {
    let trimmed = reply.trim();
    if let Some(body) = trimmed.strip_prefix("```")
        && let Some(body) = body.strip_suffix("```")
    {
        let body = body.split_once('\n').map_or("", |(_, rest)| rest);
        return body.trim().to_string();
    }
    trimmed.to_string()
}
