//! Outline data model: a book split into volumes of planned chapters.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// A complete outline candidate produced by the generation tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outline {
    pub title: String,
    #[serde(default)]
    pub premise: String,
    pub volumes: Vec<Volume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub title: String,
    pub chapters: Vec<ChapterPlan>,
}

/// One planned chapter and what it must achieve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterPlan {
    /// 1-based position across the whole book. Assigned by [`Outline::renumber`].
    #[serde(default)]
    pub index: u32,
    pub title: String,
    pub goal: String,
}

impl Outline {
    /// Iterate all chapters in reading order.
    pub fn chapters(&self) -> impl Iterator<Item = &ChapterPlan> {
        self.volumes.iter().flat_map(|v| v.chapters.iter())
    }

    pub fn chapter_count(&self) -> usize {
        self.volumes.iter().map(|v| v.chapters.len()).sum()
    }

    /// Assign sequential 1-based indices across volumes.
    ///
    /// Models number chapters inconsistently (per volume, from zero, or not at
    /// all), so indices are always rewritten after parsing.
    pub fn renumber(&mut self) {
        let mut next = 1u32;
        for chapter in self.volumes.iter_mut().flat_map(|v| v.chapters.iter_mut()) {
            chapter.index = next;
            next += 1;
        }
    }

    /// Render as markdown for prompts and human review.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n", self.title.trim());
        if !self.premise.trim().is_empty() {
            let _ = write!(out, "\n{}\n", self.premise.trim());
        }
        for volume in &self.volumes {
            let _ = write!(out, "\n## {}\n", volume.title.trim());
            for chapter in &volume.chapters {
                let _ = writeln!(
                    out,
                    "- Chapter {}: {} | {}",
                    chapter.index,
                    chapter.title.trim(),
                    chapter.goal.trim()
                );
            }
        }
        out
    }
}

/// Critique of one outline version on a 0–10 scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlineEvaluation {
    pub score: f64,
    pub passed: bool,
    pub summary: String,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

impl OutlineEvaluation {
    /// Judge a raw critique against the run's target score.
    pub fn judge(
        score: f64,
        target_score: f64,
        summary: String,
        strengths: Vec<String>,
        weaknesses: Vec<String>,
    ) -> Self {
        let score = score.clamp(0.0, 10.0);
        Self {
            score,
            passed: score >= target_score,
            summary,
            strengths,
            weaknesses,
        }
    }
}
