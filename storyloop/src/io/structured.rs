//! Generator calls whose reply must be structured JSON.
//!
//! Generation failures propagate as errors. A reply that cannot be parsed is
//! not an error: it comes back as [`StructuredReply::Malformed`] so each caller
//! can apply its own conservative fallback.

use std::sync::LazyLock;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::lenient_json::{ParseFailure, Parsed, parse_lenient};
use crate::io::generator::{GenerateRequest, TextGenerator};
use crate::io::prompt::RenderedPrompt;

macro_rules! embedded_schema {
    ($name:ident, $file:literal) => {
        static $name: LazyLock<Value> = LazyLock::new(|| {
            serde_json::from_str(include_str!(concat!("../../schemas/", $file)))
                .expect("embedded schema is valid json")
        });
    };
}

embedded_schema!(OUTLINE_SCHEMA, "outline.schema.json");
embedded_schema!(EVALUATION_SCHEMA, "evaluation.schema.json");
embedded_schema!(PLANNER_SCHEMA, "planner_decision.schema.json");
embedded_schema!(CHECKER_SCHEMA, "checker_report.schema.json");
embedded_schema!(EVENTS_SCHEMA, "events.schema.json");
embedded_schema!(SUMMARY_SCHEMA, "summary_update.schema.json");

/// The schema a reply must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplySchema {
    Outline,
    Evaluation,
    PlannerDecision,
    CheckerReport,
    Events,
    SummaryUpdate,
}

impl ReplySchema {
    pub fn name(self) -> &'static str {
        match self {
            Self::Outline => "outline",
            Self::Evaluation => "evaluation",
            Self::PlannerDecision => "planner_decision",
            Self::CheckerReport => "checker_report",
            Self::Events => "events",
            Self::SummaryUpdate => "summary_update",
        }
    }

    pub fn schema(self) -> &'static Value {
        match self {
            Self::Outline => &OUTLINE_SCHEMA,
            Self::Evaluation => &EVALUATION_SCHEMA,
            Self::PlannerDecision => &PLANNER_SCHEMA,
            Self::CheckerReport => &CHECKER_SCHEMA,
            Self::Events => &EVENTS_SCHEMA,
            Self::SummaryUpdate => &SUMMARY_SCHEMA,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StructuredReply<T> {
    Parsed(Parsed<T>),
    Malformed(ParseFailure),
}

impl<T> StructuredReply<T> {
    pub fn into_value(self) -> Option<T> {
        match self {
            Self::Parsed(parsed) => Some(parsed.value),
            Self::Malformed(_) => None,
        }
    }
}

/// Generate from `prompt` and parse the reply against `schema`.
pub fn generate_structured<G, T>(
    generator: &G,
    prompt: RenderedPrompt,
    temperature: f32,
    schema: ReplySchema,
) -> Result<StructuredReply<T>>
where
    G: TextGenerator + ?Sized,
    T: DeserializeOwned,
{
    let request = GenerateRequest::new(prompt.system, prompt.prompt, temperature);
    let raw = generator.generate(&request)?;
    Ok(match parse_lenient::<T>(&raw, Some(schema.schema())) {
        Ok(parsed) => {
            debug!(schema = schema.name(), layer = %parsed.layer, repaired = parsed.repaired, "parsed structured reply");
            StructuredReply::Parsed(parsed)
        }
        Err(failure) => {
            warn!(schema = schema.name(), reply_bytes = raw.len(), err = %failure, "malformed structured reply");
            StructuredReply::Malformed(failure)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outline::Outline;
    use crate::test_support::{ScriptedGenerator, ScriptedReply};

    fn prompt() -> RenderedPrompt {
        RenderedPrompt {
            system: "sys".to_string(),
            prompt: "p".to_string(),
        }
    }

    #[test]
    fn every_embedded_schema_compiles() {
        for schema in [
            ReplySchema::Outline,
            ReplySchema::Evaluation,
            ReplySchema::PlannerDecision,
            ReplySchema::CheckerReport,
            ReplySchema::Events,
            ReplySchema::SummaryUpdate,
        ] {
            jsonschema::options()
                .with_draft(jsonschema::Draft::Draft202012)
                .build(schema.schema())
                .unwrap_or_else(|e| panic!("{} schema: {e}", schema.name()));
        }
    }

    #[test]
    fn malformed_reply_is_not_an_error() {
        let generator = ScriptedGenerator::texts(["I refuse to outline this."]);
        let reply: StructuredReply<Outline> =
            generate_structured(&generator, prompt(), 0.5, ReplySchema::Outline).expect("call ok");
        assert!(matches!(reply, StructuredReply::Malformed(_)));
    }

    #[test]
    fn schema_rejects_outline_without_chapters() {
        let generator = ScriptedGenerator::texts([r#"{"title": "T", "volumes": [{"title": "V", "chapters": []}]}"#]);
        let reply: StructuredReply<Outline> =
            generate_structured(&generator, prompt(), 0.5, ReplySchema::Outline).expect("call ok");
        assert!(reply.into_value().is_none());
    }

    #[test]
    fn generation_failure_propagates() {
        let generator = ScriptedGenerator::new(vec![ScriptedReply::Fail(
            crate::io::generator::GenerateError::Fatal("offline".into()),
        )]);
        let result: Result<StructuredReply<Outline>> =
            generate_structured(&generator, prompt(), 0.5, ReplySchema::Outline);
        assert!(result.is_err());
        assert_eq!(generator.requests()[0].system, "sys");
    }
}
