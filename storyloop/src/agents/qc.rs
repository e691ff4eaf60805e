//! Runs every checker against a chapter and aggregates one verdict.

use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::agents::checkers::{Checker, Dimension, DuplicateEventChecker, ModelChecker};
use crate::core::qc::{QcPolicy, WeightedReport, aggregate};
use crate::core::types::{ChapterDraft, CheckerReport, QcResult};
use crate::io::config::QcConfig;
use crate::io::generator::TextGenerator;
use crate::io::prompt::PromptEngine;

/// Anything that can judge a chapter. The repair loop re-inspects through this.
pub trait ChapterInspector {
    fn inspect(&self, chapter: &ChapterDraft) -> QcResult;
}

impl<F: Fn(&ChapterDraft) -> QcResult> ChapterInspector for F {
    fn inspect(&self, chapter: &ChapterDraft) -> QcResult {
        self(chapter)
    }
}

/// Full QC output: the verdict plus what each checker said.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcRun {
    pub result: QcResult,
    pub reports: Vec<CheckerReport>,
    /// Checkers that failed and were given the fallback score.
    pub failed_checkers: Vec<String>,
}

pub struct QcRunner<'a> {
    checkers: Vec<(Box<dyn Checker + 'a>, f64)>,
    policy: QcPolicy,
    fallback_score: f64,
}

impl<'a> QcRunner<'a> {
    pub fn new(policy: QcPolicy, fallback_score: f64) -> Self {
        Self {
            checkers: Vec::new(),
            policy,
            fallback_score,
        }
    }

    pub fn with_checker(mut self, checker: impl Checker + 'a, weight: f64) -> Self {
        self.checkers.push((Box::new(checker), weight));
        self
    }

    /// The model-backed dimensions plus, when a ledger is given, the duplicate
    /// event checker, weighted from `config`.
    pub fn standard<G: TextGenerator + ?Sized>(
        generator: &'a G,
        prompts: &'a PromptEngine,
        config: &QcConfig,
        duplicates: Option<DuplicateEventChecker<'a>>,
    ) -> Self {
        let mut runner = Self::new(config.policy(), config.fallback_score);
        for dimension in Dimension::ALL {
            runner = runner.with_checker(
                ModelChecker::new(dimension, generator, prompts, config.temperature),
                config.weights.for_checker(dimension.name()),
            );
        }
        if let Some(checker) = duplicates {
            runner = runner.with_checker(checker, config.weights.for_checker(DuplicateEventChecker::NAME));
        }
        runner
    }

    pub fn checker_names(&self) -> Vec<&str> {
        self.checkers.iter().map(|(c, _)| c.name()).collect()
    }

    #[instrument(skip_all, fields(chapter = chapter.index, checkers = self.checkers.len()))]
    pub fn run(&self, chapter: &ChapterDraft) -> QcRun {
        let mut weighted = Vec::with_capacity(self.checkers.len());
        let mut failed_checkers = Vec::new();
        for (checker, weight) in &self.checkers {
            let report = match checker.check(chapter) {
                Ok(report) => report,
                Err(err) => {
                    warn!(checker = checker.name(), fallback = self.fallback_score, err = %format!("{err:#}"), "checker failed, using fallback score");
                    failed_checkers.push(checker.name().to_string());
                    CheckerReport::new(checker.name(), self.fallback_score, Vec::new())
                }
            };
            debug!(checker = %report.checker, score = report.score, issues = report.issues.len(), "checker finished");
            weighted.push(WeightedReport {
                report,
                weight: *weight,
            });
        }
        let result = aggregate(&weighted, &self.policy);
        QcRun {
            result,
            reports: weighted.into_iter().map(|w| w.report).collect(),
            failed_checkers,
        }
    }
}

impl ChapterInspector for QcRunner<'_> {
    fn inspect(&self, chapter: &ChapterDraft) -> QcResult {
        self.run(chapter).result
    }
}
