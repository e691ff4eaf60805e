//! Three-tier rolling summary: parse, format, normalize.
//!
//! A summary is a single text blob with one heading per tier. Parsing tolerates
//! heading variants (any number of `#`, hyphen or space, optional "memory",
//! bracketed CJK labels). Text without any recognizable heading is split
//! positionally from the tail, so parsing never fails.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

pub const LONG_TERM_HEADING: &str = "## Long-Term Memory";
pub const MID_TERM_HEADING: &str = "## Mid-Term Memory";
pub const RECENT_HEADING: &str = "## Recent Memory";

static HEADING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?mi)^[ \t]*(?:#{1,6}[ \t]*|[\[【][ \t]*)(long[- ]?term|mid[- ]?term|recent|长期|中期|近期)(?:[ \t]*memory|记忆)?[ \t]*[\]】]?[ \t]*:?[ \t]*$",
    )
    .expect("heading regex is valid")
});

/// Narrative history in three disjoint tiers, oldest to newest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollingSummaryMemory {
    pub long_term: String,
    pub mid_term: String,
    pub recent: String,
}

impl RollingSummaryMemory {
    pub fn is_empty(&self) -> bool {
        self.long_term.is_empty() && self.mid_term.is_empty() && self.recent.is_empty()
    }

    pub fn char_count(&self) -> usize {
        self.long_term.chars().count() + self.mid_term.chars().count() + self.recent.chars().count()
    }
}

/// Character sizes for the positional split of heading-less summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacySplit {
    pub recent_chars: usize,
    pub mid_chars: usize,
}

impl Default for LegacySplit {
    fn default() -> Self {
        Self {
            recent_chars: 800,
            mid_chars: 1200,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Long,
    Mid,
    Recent,
}

impl Tier {
    fn from_label(label: &str) -> Self {
        let label = label.to_lowercase();
        if label.starts_with("long") || label.starts_with('长') {
            Self::Long
        } else if label.starts_with("mid") || label.starts_with('中') {
            Self::Mid
        } else {
            Self::Recent
        }
    }
}

pub fn parse_rolling_summary_memory(text: &str, legacy: LegacySplit) -> RollingSummaryMemory {
    let headings: Vec<_> = HEADING_RE
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.get(1)?;
            Some((whole.start(), whole.end(), Tier::from_label(label.as_str())))
        })
        .collect();

    if headings.is_empty() {
        return split_legacy(text, legacy);
    }

    let mut memory = RollingSummaryMemory::default();
    let preamble = text[..headings[0].0].trim();
    if !preamble.is_empty() {
        memory.long_term.push_str(preamble);
    }

    for (i, &(_, body_start, tier)) in headings.iter().enumerate() {
        let body_end = headings.get(i + 1).map_or(text.len(), |next| next.0);
        let body = text[body_start..body_end].trim();
        if body.is_empty() {
            continue;
        }
        let slot = match tier {
            Tier::Long => &mut memory.long_term,
            Tier::Mid => &mut memory.mid_term,
            Tier::Recent => &mut memory.recent,
        };
        if !slot.is_empty() {
            slot.push_str("\n\n");
        }
        slot.push_str(body);
    }
    memory
}

/// Render with the canonical headings. An entirely empty memory renders as "".
pub fn format_rolling_summary_memory(memory: &RollingSummaryMemory) -> String {
    if memory.is_empty() {
        return String::new();
    }
    format!(
        "{LONG_TERM_HEADING}\n{}\n\n{MID_TERM_HEADING}\n{}\n\n{RECENT_HEADING}\n{}\n",
        memory.long_term.trim(),
        memory.mid_term.trim(),
        memory.recent.trim()
    )
}

pub fn normalize_rolling_summary(text: &str, legacy: LegacySplit) -> String {
    format_rolling_summary_memory(&parse_rolling_summary_memory(text, legacy))
}

fn split_legacy(text: &str, legacy: LegacySplit) -> RollingSummaryMemory {
    let text = text.trim();
    let total = text.chars().count();
    if total == 0 {
        return RollingSummaryMemory::default();
    }
    if legacy.recent_chars == 0 || total <= legacy.recent_chars {
        return RollingSummaryMemory {
            recent: text.to_string(),
            ..RollingSummaryMemory::default()
        };
    }

    let recent_start = byte_offset(text, total - legacy.recent_chars);
    let mid_start = byte_offset(text, total.saturating_sub(legacy.recent_chars + legacy.mid_chars));
    RollingSummaryMemory {
        long_term: text[..mid_start].trim().to_string(),
        mid_term: text[mid_start..recent_start].trim().to_string(),
        recent: text[recent_start..].trim().to_string(),
    }
}

/// Trim, drop empties and case-insensitive repeats, keep at most `cap`.
pub fn dedupe_open_loops<S: AsRef<str>>(loops: &[S], cap: usize) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    loops
        .iter()
        .map(|l| l.as_ref().trim())
        .filter(|l| !l.is_empty() && seen.insert(l.to_lowercase()))
        .take(cap)
        .map(str::to_string)
        .collect()
}

/// Byte offset of the `n`th char, or the string length past the end.
pub(crate) fn byte_offset(text: &str, n: usize) -> usize {
    text.char_indices().nth(n).map_or(text.len(), |(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn canonical() -> String {
        format!(
            "{LONG_TERM_HEADING}\nRen was born in the salt city.\n\n{MID_TERM_HEADING}\nRen took the courier oath.\n\n{RECENT_HEADING}\nRen reached the burning pass.\n"
        )
    }

    #[test]
    fn parses_canonical_headings() {
        let memory = parse_rolling_summary_memory(&canonical(), LegacySplit::default());
        assert_eq!(memory.long_term, "Ren was born in the salt city.");
        assert_eq!(memory.mid_term, "Ren took the courier oath.");
        assert_eq!(memory.recent, "Ren reached the burning pass.");
    }

    #[test]
    fn format_of_parse_equals_normalize_and_is_stable() {
        let input = canonical();
        let legacy = LegacySplit::default();
        let normalized = normalize_rolling_summary(&input, legacy);
        assert_eq!(
            format_rolling_summary_memory(&parse_rolling_summary_memory(&input, legacy)),
            normalized
        );
        assert_eq!(normalize_rolling_summary(&normalized, legacy), normalized);
        assert_eq!(normalized, input);
    }

    #[test]
    fn tolerates_heading_variants_and_preamble() {
        let text = "Prologue notes.\n# long term\nold\n### Mid Term Memory:\nmiddle\n【近期记忆】\nnew";
        let memory = parse_rolling_summary_memory(text, LegacySplit::default());
        assert_eq!(memory.long_term, "Prologue notes.\n\nold");
        assert_eq!(memory.mid_term, "middle");
        assert_eq!(memory.recent, "new");
    }

    #[test]
    fn legacy_text_splits_from_the_tail() {
        let text = "a".repeat(5) + &"b".repeat(3) + &"c".repeat(2);
        let memory = parse_rolling_summary_memory(
            &text,
            LegacySplit {
                recent_chars: 2,
                mid_chars: 3,
            },
        );
        assert_eq!(memory.recent, "cc");
        assert_eq!(memory.mid_term, "bbb");
        assert_eq!(memory.long_term, "aaaaa");
    }

    #[test]
    fn short_legacy_text_is_all_recent() {
        let memory = parse_rolling_summary_memory("  just one line  ", LegacySplit::default());
        assert_eq!(memory.recent, "just one line");
        assert!(memory.long_term.is_empty());
        assert!(memory.mid_term.is_empty());
    }

    #[test]
    fn legacy_split_respects_char_boundaries() {
        let memory = parse_rolling_summary_memory(
            "长风破浪会有时直挂云帆济沧海",
            LegacySplit {
                recent_chars: 4,
                mid_chars: 3,
            },
        );
        assert_eq!(memory.recent, "帆济沧海");
        assert_eq!(memory.mid_term, "直挂云");
        assert_eq!(memory.long_term, "长风破浪会有时");
    }

    #[test]
    fn empty_memory_formats_as_empty_string() {
        assert_eq!(format_rolling_summary_memory(&RollingSummaryMemory::default()), "");
        assert_eq!(normalize_rolling_summary("   ", LegacySplit::default()), "");
    }

    #[test]
    fn open_loops_are_deduped_case_insensitively_and_capped() {
        let loops = ["Who sent the letter?", " who sent the letter? ", "", "The debt to Mara", "Ash"];
        assert_eq!(
            dedupe_open_loops(&loops, 2),
            vec!["Who sent the letter?", "The debt to Mara"]
        );
    }
}
