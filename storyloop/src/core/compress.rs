//! Sentence-aware truncation and budgeted compression of tiered memory.

use crate::core::memory::{RollingSummaryMemory, byte_offset};

/// Characters that end a sentence. Terminators stay attached to their sentence.
pub const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '。', '！', '？', '；', ';', '\n'];

/// Closing marks absorbed into the preceding sentence.
const CLOSERS: &[char] = &['"', '\'', '”', '’', '」', '』', ')', '）'];

/// Which end of a tier survives truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepEnd {
    /// Keep the oldest sentences.
    Head,
    /// Keep the newest sentences.
    Tail,
}

/// Share of the budget given to each tier, in percent. Rounding remainder
/// goes to the recent tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierShares {
    pub long_term: usize,
    pub mid_term: usize,
}

impl Default for TierShares {
    fn default() -> Self {
        Self {
            long_term: 20,
            mid_term: 30,
        }
    }
}

/// Split into sentence byte ranges, skipping whitespace-only pieces.
pub fn sentence_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !SENTENCE_TERMINATORS.contains(&c) {
            continue;
        }
        let mut end = i + c.len_utf8();
        while let Some(&(j, next)) = chars.peek() {
            if SENTENCE_TERMINATORS.contains(&next) || CLOSERS.contains(&next) {
                end = j + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        if !text[start..end].trim().is_empty() {
            spans.push((start, end));
        }
        start = end;
    }
    if !text[start..].trim().is_empty() {
        spans.push((start, text.len()));
    }
    spans
}

pub fn split_sentences(text: &str) -> Vec<&str> {
    sentence_spans(text)
        .into_iter()
        .map(|(s, e)| text[s..e].trim())
        .collect()
}

/// Truncate `text` to at most `budget` characters on whole-sentence boundaries.
///
/// Sentences are accumulated greedily from the kept end until the next one would
/// overflow. When not even one sentence fits, a hard character slice is taken
/// from the kept end instead.
pub fn truncate_at_sentence(text: &str, budget: usize, keep: KeepEnd) -> String {
    let text = text.trim();
    if text.chars().count() <= budget {
        return text.to_string();
    }
    if budget == 0 {
        return String::new();
    }

    let spans = sentence_spans(text);
    let mut kept: Option<&str> = None;
    match keep {
        KeepEnd::Tail => {
            for &(start, _) in spans.iter().rev() {
                let candidate = text[start..].trim();
                if candidate.chars().count() > budget {
                    break;
                }
                kept = Some(candidate);
            }
        }
        KeepEnd::Head => {
            for &(_, end) in &spans {
                let candidate = text[..end].trim();
                if candidate.chars().count() > budget {
                    break;
                }
                kept = Some(candidate);
            }
        }
    }

    match kept {
        Some(kept) => kept.to_string(),
        None => hard_slice(text, budget, keep),
    }
}

fn hard_slice(text: &str, budget: usize, keep: KeepEnd) -> String {
    match keep {
        KeepEnd::Head => text[..byte_offset(text, budget)].to_string(),
        KeepEnd::Tail => {
            let total = text.chars().count();
            text[byte_offset(text, total.saturating_sub(budget))..].to_string()
        }
    }
}

/// Fit a tiered memory into `budget_chars` total characters.
pub fn compress_memory(memory: &RollingSummaryMemory, budget_chars: usize) -> RollingSummaryMemory {
    compress_memory_with(memory, budget_chars, TierShares::default())
}

pub fn compress_memory_with(
    memory: &RollingSummaryMemory,
    budget_chars: usize,
    shares: TierShares,
) -> RollingSummaryMemory {
    let long_budget = budget_chars * shares.long_term / 100;
    let mid_budget = budget_chars * shares.mid_term / 100;
    let recent_budget = budget_chars.saturating_sub(long_budget + mid_budget);
    RollingSummaryMemory {
        long_term: truncate_at_sentence(&memory.long_term, long_budget, KeepEnd::Head),
        mid_term: truncate_at_sentence(&memory.mid_term, mid_budget, KeepEnd::Tail),
        recent: truncate_at_sentence(&memory.recent, recent_budget, KeepEnd::Tail),
    }
}
