//! Lenient parsing of structured (JSON) model replies.
//!
//! Layers are tried in order: the whole reply, each fenced code block, then the
//! outermost brace (or bracket) span. Every candidate is also retried with
//! trailing commas removed. A candidate is accepted only when it parses, passes
//! the optional JSON Schema (Draft 2020-12) and deserializes into the target type.

use std::fmt;
use std::sync::LazyLock;

use jsonschema::Draft;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").expect("fence regex is valid")
});

static TRAILING_COMMA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("trailing comma regex is valid"));

/// Which extraction layer produced the accepted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseLayer {
    Strict,
    Fenced,
    BraceSpan,
}

impl fmt::Display for ParseLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::Fenced => "fenced",
            Self::BraceSpan => "brace-span",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub layer: ParseLayer,
    /// Trailing commas had to be removed.
    pub repaired: bool,
}

/// Every layer failed. Carries one message per attempt for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("structured reply could not be parsed ({} attempts): {}", attempts.len(), attempts.join("; "))]
pub struct ParseFailure {
    pub attempts: Vec<String>,
}

pub fn parse_lenient<T: DeserializeOwned>(
    raw: &str,
    schema: Option<&Value>,
) -> Result<Parsed<T>, ParseFailure> {
    let mut attempts = Vec::new();
    let validator = match schema {
        Some(schema) => match jsonschema::options().with_draft(Draft::Draft202012).build(schema) {
            Ok(v) => Some(v),
            Err(err) => {
                attempts.push(format!("compile schema: {err}"));
                return Err(ParseFailure { attempts });
            }
        },
        None => None,
    };

    for (layer, candidate) in candidates(raw) {
        let repaired = TRAILING_COMMA_RE.replace_all(candidate, "$1");
        let mut variants = vec![(candidate, false)];
        if repaired != candidate {
            variants.push((repaired.as_ref(), true));
        }
        for (text, was_repaired) in variants {
            match decode::<T>(text, validator.as_ref()) {
                Ok(value) => {
                    return Ok(Parsed {
                        value,
                        layer,
                        repaired: was_repaired,
                    });
                }
                Err(msg) => attempts.push(format!("{layer}: {msg}")),
            }
        }
    }

    if attempts.is_empty() {
        attempts.push("empty reply".to_string());
    }
    Err(ParseFailure { attempts })
}

fn candidates(raw: &str) -> Vec<(ParseLayer, &str)> {
    let mut out = Vec::new();
    let trimmed = raw.trim().trim_start_matches('\u{feff}');
    if trimmed.is_empty() {
        return out;
    }
    out.push((ParseLayer::Strict, trimmed));
    for caps in FENCE_RE.captures_iter(raw) {
        if let Some(body) = caps.get(1) {
            let body = body.as_str().trim();
            if !body.is_empty() {
                out.push((ParseLayer::Fenced, body));
            }
        }
    }
    if let Some(span) = outer_span(raw) {
        out.push((ParseLayer::BraceSpan, span));
    }
    out
}

/// From the first opening brace or bracket to the last matching closer.
fn outer_span(raw: &str) -> Option<&str> {
    let start = raw.find(['{', '['])?;
    let closer = if raw[start..].starts_with('{') { '}' } else { ']' };
    let end = raw.rfind(closer)?;
    (end > start).then(|| &raw[start..=end])
}

fn decode<T: DeserializeOwned>(
    text: &str,
    validator: Option<&jsonschema::Validator>,
) -> Result<T, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| format!("invalid json: {e}"))?;
    if let Some(validator) = validator {
        let messages: Vec<String> = validator
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !messages.is_empty() {
            return Err(format!("schema: {}", messages.join(", ")));
        }
    }
    serde_json::from_value(value).map_err(|e| format!("shape: {e}"))
}
