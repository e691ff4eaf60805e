//! Fold a new chapter into the tiered rolling summary.
//!
//! The summarizer may answer with the three tiers or with one flat summary;
//! either way the result is normalized to the canonical tiered text and
//! compressed to the configured budget. A reply that cannot be parsed leaves
//! the previous summary and open loops untouched.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::compress::compress_memory;
use crate::core::memory::{
    RollingSummaryMemory, dedupe_open_loops, format_rolling_summary_memory, parse_rolling_summary_memory,
};
use crate::io::config::MemoryConfig;
use crate::io::generator::TextGenerator;
use crate::io::prompt::{PromptEngine, SummaryPromptInput};
use crate::io::structured::{ReplySchema, StructuredReply, generate_structured};

/// The memory carried from chapter to chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummaryState {
    /// Canonical tiered text.
    pub summary: String,
    pub open_loops: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryUpdate {
    pub state: SummaryState,
    /// False when the reply was malformed and `state` is the previous one.
    pub updated: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SummaryReply {
    #[serde(alias = "longTerm")]
    long_term: Option<String>,
    #[serde(alias = "midTerm")]
    mid_term: Option<String>,
    recent: Option<String>,
    #[serde(alias = "rollingSummary")]
    rolling_summary: Option<String>,
    #[serde(alias = "openLoops")]
    open_loops: Option<Vec<String>>,
}

pub struct SummaryUpdater<'a, G: ?Sized> {
    generator: &'a G,
    prompts: &'a PromptEngine,
    config: MemoryConfig,
}

impl<'a, G: TextGenerator + ?Sized> SummaryUpdater<'a, G> {
    pub fn new(generator: &'a G, prompts: &'a PromptEngine, config: MemoryConfig) -> Self {
        Self {
            generator,
            prompts,
            config,
        }
    }

    #[instrument(skip_all, fields(chapter = chapter, previous_chars = previous.summary.chars().count()))]
    pub fn update(&self, previous: &SummaryState, chapter: u32, text: &str) -> Result<SummaryUpdate> {
        let previous_summary = normalize_memory(&previous.summary, &self.config);
        let prompt = self.prompts.summary_update(&SummaryPromptInput {
            chapter_index: chapter,
            previous_summary: &previous_summary,
            open_loops: &previous.open_loops,
            budget_chars: self.config.budget_chars,
            text,
        })?;
        let reply = generate_structured::<_, SummaryReply>(
            self.generator,
            prompt,
            self.config.temperature,
            ReplySchema::SummaryUpdate,
        )
        .with_context(|| format!("update summary for chapter {chapter}"))?;
        let reply = match reply {
            StructuredReply::Parsed(parsed) => parsed.value,
            StructuredReply::Malformed(_) => {
                warn!(chapter, "summary reply was malformed, keeping previous summary");
                return Ok(SummaryUpdate {
                    state: previous.clone(),
                    updated: false,
                });
            }
        };

        let memory = reply_memory(&reply, &self.config);
        let compressed = compress_memory(&memory, self.config.budget_chars);
        debug!(
            before_chars = memory.char_count(),
            after_chars = compressed.char_count(),
            budget = self.config.budget_chars,
            "compressed summary"
        );
        let open_loops = match &reply.open_loops {
            Some(loops) => dedupe_open_loops(loops, self.config.max_open_loops),
            None => previous.open_loops.clone(),
        };
        Ok(SummaryUpdate {
            state: SummaryState {
                summary: format_rolling_summary_memory(&compressed),
                open_loops,
            },
            updated: true,
        })
    }
}

fn reply_memory(reply: &SummaryReply, config: &MemoryConfig) -> RollingSummaryMemory {
    let tiered = reply.long_term.is_some() || reply.mid_term.is_some() || reply.recent.is_some();
    if tiered {
        let tier = |t: &Option<String>| t.as_deref().unwrap_or_default().trim().to_string();
        return RollingSummaryMemory {
            long_term: tier(&reply.long_term),
            mid_term: tier(&reply.mid_term),
            recent: tier(&reply.recent),
        };
    }
    parse_rolling_summary_memory(
        reply.rolling_summary.as_deref().unwrap_or_default(),
        config.legacy_split(),
    )
}

/// Normalize stored summary text and fit it to the budget.
pub fn normalize_memory(text: &str, config: &MemoryConfig) -> String {
    let memory = parse_rolling_summary_memory(text, config.legacy_split());
    format_rolling_summary_memory(&compress_memory(&memory, config.budget_chars))
}
