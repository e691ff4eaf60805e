//! Shared deterministic types for chapter quality control.
//!
//! Checkers produce these values, the aggregator combines them, and the repair
//! loop reads them. Nothing mutates an issue after it has been created.

use serde::{Deserialize, Serialize};

/// What kind of defect an issue describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QcCategory {
    Structure,
    Character,
    Plot,
    Pacing,
    Style,
    Continuity,
    Logic,
    #[default]
    #[serde(other)]
    Other,
}

impl QcCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Structure => "structure",
            Self::Character => "character",
            Self::Plot => "plot",
            Self::Pacing => "pacing",
            Self::Style => "style",
            Self::Continuity => "continuity",
            Self::Logic => "logic",
            Self::Other => "other",
        }
    }
}

/// Issue severity. Declaration order is priority order: critical sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Major => "major",
            Self::Minor => "minor",
        }
    }

    /// Critical and major issues block acceptance and drive repair.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::Critical | Self::Major)
    }
}

/// A single defect found in a chapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QcIssue {
    #[serde(default)]
    pub category: QcCategory,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(
        default,
        alias = "suggestedFix",
        skip_serializing_if = "Option::is_none"
    )]
    pub suggested_fix: Option<String>,
}

impl QcIssue {
    pub fn new(category: QcCategory, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            description: description.into(),
            location: None,
            suggested_fix: None,
        }
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }

    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.suggested_fix = Some(fix.into());
        self
    }
}

/// Partial result from one checker, before aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckerReport {
    pub checker: String,
    /// Partial score on a 0–100 scale.
    pub score: f64,
    pub issues: Vec<QcIssue>,
}

impl CheckerReport {
    pub fn new(checker: impl Into<String>, score: f64, issues: Vec<QcIssue>) -> Self {
        Self {
            checker: checker.into(),
            score: score.clamp(0.0, 100.0),
            issues,
        }
    }
}

/// Aggregated quality verdict for a chapter.
///
/// Fields are private so `passed` can only come from [`QcResult::new`], which
/// derives it from the score and the presence of critical issues.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QcResult {
    score: f64,
    issues: Vec<QcIssue>,
    passed: bool,
}

impl QcResult {
    /// Build a result; issues are stably reordered critical → major → minor.
    pub fn new(score: f64, mut issues: Vec<QcIssue>, pass_score: f64) -> Self {
        issues.sort_by_key(|issue| issue.severity);
        let score = score.clamp(0.0, 100.0);
        let passed = score >= pass_score && !issues.iter().any(|i| i.severity == Severity::Critical);
        Self {
            score,
            issues,
            passed,
        }
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn issues(&self) -> &[QcIssue] {
        &self.issues
    }

    pub fn passed(&self) -> bool {
        self.passed
    }

    pub fn issues_with(&self, severity: Severity) -> impl Iterator<Item = &QcIssue> {
        self.issues.iter().filter(move |i| i.severity == severity)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.issues_with(severity).count()
    }

    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(|i| i.severity.is_blocking())
    }
}

/// Where a chapter sits in the book; controls the ending constraints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChapterPosition {
    pub index: u32,
    pub total: u32,
}

impl ChapterPosition {
    pub fn is_final(self) -> bool {
        self.index >= self.total
    }
}

/// The chapter under inspection, with enough position context for checkers
/// and repair instructions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterDraft {
    /// 1-based chapter index.
    pub index: u32,
    pub total_chapters: u32,
    #[serde(default)]
    pub goal: Option<String>,
    pub text: String,
}

impl ChapterDraft {
    pub fn position(&self) -> ChapterPosition {
        ChapterPosition {
            index: self.index,
            total: self.total_chapters,
        }
    }

    pub fn is_final(&self) -> bool {
        self.position().is_final()
    }

    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..self.clone()
        }
    }
}
