//! Independent chapter checkers.
//!
//! Each checker looks at one dimension of a chapter and returns a partial score
//! with issues. Checkers do not know about each other or about aggregation.

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::core::timeline::{CharacterRoster, TimelineLedger};
use crate::core::types::{ChapterDraft, CheckerReport, QcCategory, QcIssue, Severity};
use crate::io::generator::TextGenerator;
use crate::io::prompt::{CheckPromptInput, PromptEngine};
use crate::io::structured::{ReplySchema, StructuredReply, generate_structured};

/// Partial score lost per restated event.
const DUPLICATE_PENALTY: f64 = 20.0;

pub trait Checker {
    /// Stable name, also used to look up the checker's weight.
    fn name(&self) -> &str;
    fn check(&self, chapter: &ChapterDraft) -> Result<CheckerReport>;
}

/// A dimension judged by the generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    /// Structure and whether the chapter achieves its goal.
    Structure,
    Character,
    Pacing,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Structure, Dimension::Character, Dimension::Pacing];

    pub fn name(self) -> &'static str {
        match self {
            Self::Structure => "structure",
            Self::Character => "character",
            Self::Pacing => "pacing",
        }
    }

    fn focus(self) -> &'static str {
        match self {
            Self::Structure => {
                "Check the chapter's structure: does it have a clear arc, does it achieve its goal, does every scene serve that goal, and does the ending fit the chapter's position in the book?"
            }
            Self::Character => {
                "Check character consistency: do names, abilities, relationships, motives and voices match what the chapter establishes, and are actions in character?"
            }
            Self::Pacing => {
                "Check pacing: are there scenes that drag or rush, repeated beats, summaries where a scene is needed, or tension that collapses?"
            }
        }
    }

    fn category(self) -> QcCategory {
        match self {
            Self::Structure => QcCategory::Structure,
            Self::Character => QcCategory::Character,
            Self::Pacing => QcCategory::Pacing,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CheckerReply {
    score: f64,
    #[serde(default)]
    issues: Vec<QcIssue>,
}

/// Asks the generator to judge one [`Dimension`].
pub struct ModelChecker<'a, G: ?Sized> {
    dimension: Dimension,
    generator: &'a G,
    prompts: &'a PromptEngine,
    temperature: f32,
}

impl<'a, G: TextGenerator + ?Sized> ModelChecker<'a, G> {
    pub fn new(dimension: Dimension, generator: &'a G, prompts: &'a PromptEngine, temperature: f32) -> Self {
        Self {
            dimension,
            generator,
            prompts,
            temperature,
        }
    }
}

impl<G: TextGenerator + ?Sized> Checker for ModelChecker<'_, G> {
    fn name(&self) -> &str {
        self.dimension.name()
    }

    fn check(&self, chapter: &ChapterDraft) -> Result<CheckerReport> {
        let prompt = self.prompts.chapter_check(&CheckPromptInput {
            dimension: self.dimension.name(),
            focus: self.dimension.focus(),
            chapter_index: chapter.index,
            total_chapters: chapter.total_chapters,
            is_final: chapter.is_final(),
            goal: chapter.goal.as_deref(),
            text: &chapter.text,
        })?;
        let reply = generate_structured::<_, CheckerReply>(
            self.generator,
            prompt,
            self.temperature,
            ReplySchema::CheckerReport,
        )
        .with_context(|| format!("{} check", self.dimension.name()))?;
        let reply = match reply {
            StructuredReply::Parsed(parsed) => parsed.value,
            StructuredReply::Malformed(failure) => {
                return Err(anyhow::Error::new(failure)
                    .context(format!("{} checker reply was malformed", self.dimension.name())));
            }
        };
        let issues = reply
            .issues
            .into_iter()
            .filter(|issue| !issue.description.trim().is_empty())
            .map(|mut issue| {
                if issue.category == QcCategory::Other {
                    issue.category = self.dimension.category();
                }
                issue
            })
            .collect();
        Ok(CheckerReport::new(self.dimension.name(), reply.score, issues))
    }
}

/// Flags chapters that narrate an already-completed ledger event again.
pub struct DuplicateEventChecker<'a> {
    ledger: &'a TimelineLedger,
    roster: &'a CharacterRoster,
    min_fragment_chars: usize,
}

impl<'a> DuplicateEventChecker<'a> {
    pub const NAME: &'static str = "duplication";

    pub fn new(ledger: &'a TimelineLedger, roster: &'a CharacterRoster, min_fragment_chars: usize) -> Self {
        Self {
            ledger,
            roster,
            min_fragment_chars,
        }
    }
}

impl Checker for DuplicateEventChecker<'_> {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn check(&self, chapter: &ChapterDraft) -> Result<CheckerReport> {
        let report = self
            .ledger
            .check_duplication(&chapter.text, self.roster, self.min_fragment_chars);
        let issues: Vec<QcIssue> = report
            .matches
            .iter()
            .map(|m| {
                QcIssue::new(
                    QcCategory::Continuity,
                    Severity::Major,
                    format!("The chapter narrates an event that already happened: {}", m.summary),
                )
                .with_location(format!("{} / \"{}\" / \"{}\"", m.character, m.fragment, m.keyword))
                .with_fix("Refer to the earlier event briefly instead of staging it again, or change what happens.")
            })
            .collect();
        let score = 100.0 - DUPLICATE_PENALTY * issues.len() as f64;
        Ok(CheckerReport::new(Self::NAME, score, issues))
    }
}
