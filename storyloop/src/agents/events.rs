//! Extract plot events from chapter text and record them in the ledger.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::core::timeline::{CharacterRoster, EventProposal, IngestOutcome, TimelineLedger};
use crate::io::config::LedgerConfig;
use crate::io::generator::TextGenerator;
use crate::io::prompt::{ExtractPromptInput, PromptEngine};
use crate::io::structured::{ReplySchema, StructuredReply, generate_structured};

#[derive(Debug, Deserialize)]
struct ExtractedEvents {
    events: Vec<EventProposal>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionReport {
    pub chapter: u32,
    /// The reply could not be parsed and nothing was extracted.
    pub malformed: bool,
    pub outcomes: Vec<IngestOutcome>,
}

impl ExtractionReport {
    pub fn added(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, IngestOutcome::Added { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.len() - self.added()
    }
}

pub struct EventExtractor<'a, G: ?Sized> {
    generator: &'a G,
    prompts: &'a PromptEngine,
    temperature: f32,
    recent_window: usize,
}

impl<'a, G: TextGenerator + ?Sized> EventExtractor<'a, G> {
    pub fn new(generator: &'a G, prompts: &'a PromptEngine, config: &LedgerConfig) -> Self {
        Self {
            generator,
            prompts,
            temperature: config.temperature,
            recent_window: config.recent_window,
        }
    }

    /// Ask the generator for the events `text` narrates.
    ///
    /// Returns `None` when the reply is malformed; generation failures are errors.
    pub fn propose(
        &self,
        chapter: u32,
        text: &str,
        ledger: &TimelineLedger,
        roster: &CharacterRoster,
    ) -> Result<Option<Vec<EventProposal>>> {
        let recent = ledger.recent_completed_summaries(self.recent_window);
        let prompt = self.prompts.extract_events(&ExtractPromptInput {
            chapter_index: chapter,
            characters: roster.characters().iter().map(|c| c.name.as_str()).collect(),
            recent_events: &recent,
            text,
        })?;
        let reply = generate_structured::<_, ExtractedEvents>(
            self.generator,
            prompt,
            self.temperature,
            ReplySchema::Events,
        )
        .with_context(|| format!("extract events from chapter {chapter}"))?;
        Ok(match reply {
            StructuredReply::Parsed(parsed) => Some(parsed.value.events),
            StructuredReply::Malformed(_) => None,
        })
    }

    /// Extract events from `text` and ingest them into `ledger`.
    #[instrument(skip_all, fields(chapter = chapter, ledger_len = ledger.len()))]
    pub fn extract_into(
        &self,
        chapter: u32,
        text: &str,
        ledger: &mut TimelineLedger,
        roster: &CharacterRoster,
    ) -> Result<ExtractionReport> {
        let Some(proposals) = self.propose(chapter, text, ledger, roster)? else {
            warn!(chapter, "event extraction reply was malformed, ledger unchanged");
            return Ok(ExtractionReport {
                chapter,
                malformed: true,
                outcomes: Vec::new(),
            });
        };
        let outcomes: Vec<IngestOutcome> = proposals
            .iter()
            .map(|proposal| ledger.ingest(proposal, chapter, roster))
            .collect();
        let report = ExtractionReport {
            chapter,
            malformed: false,
            outcomes,
        };
        info!(chapter, added = report.added(), skipped = report.skipped(), "events extracted");
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::timeline::EventStatus;
    use crate::io::generator::GenerateError;
    use crate::test_support::{FailingGenerator, ScriptedGenerator, ledger_fixture, roster_fixture};

    const REPLY: &str = r#"{"events": [
        {"type": "battle", "summary": "Ren fights the guard captain", "characters": ["Ren"], "core_action": "Ren fights the guard captain"},
        {"type": "encounter", "summary": "Ren meets a smuggler", "characters": ["Ren", "Oskar"], "core_action": "meets a smuggler", "completed": false},
    ]}"#;

    #[test]
    fn extracted_events_are_deduplicated_against_the_ledger() {
        let prompts = PromptEngine::new(40_000).expect("prompts");
        let generator = ScriptedGenerator::texts([REPLY]);
        let extractor = EventExtractor::new(&generator, &prompts, &LedgerConfig::default());
        let roster = roster_fixture();
        let mut ledger = ledger_fixture();

        let report = extractor
            .extract_into(3, "chapter text", &mut ledger, &roster)
            .expect("extract");
        assert_eq!(report.added(), 1);
        assert_eq!(report.skipped(), 1);
        assert_eq!(ledger.len(), 2);
        let met = ledger.events().last().expect("new event");
        assert_eq!(met.status, EventStatus::InProgress);
        assert_eq!(met.character_ids, vec!["c-ren"]);

        let prompt = &generator.requests()[0].prompt;
        assert!(prompt.contains("- Mara"));
        assert!(prompt.contains("Ren fights the guard captain"));
    }

    #[test]
    fn malformed_reply_leaves_ledger_unchanged() {
        let prompts = PromptEngine::new(40_000).expect("prompts");
        let generator = ScriptedGenerator::texts(["Nothing happened, really."]);
        let extractor = EventExtractor::new(&generator, &prompts, &LedgerConfig::default());
        let mut ledger = ledger_fixture();
        let report = extractor
            .extract_into(3, "text", &mut ledger, &roster_fixture())
            .expect("extract");
        assert!(report.malformed);
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn generation_failure_is_an_error() {
        let prompts = PromptEngine::new(40_000).expect("prompts");
        let generator = FailingGenerator::new(GenerateError::Fatal("down".into()));
        let extractor = EventExtractor::new(&generator, &prompts, &LedgerConfig::default());
        let mut ledger = TimelineLedger::new();
        assert!(
            extractor
                .extract_into(1, "text", &mut ledger, &roster_fixture())
                .is_err()
        );
    }
}
