//! Event ledger: a deduplicated record of what has happened in the story.
//!
//! Events are keyed by `(type, sorted character ids, normalized core action)`.
//! A ledger never holds two events with the same key, and event status only
//! moves forward (`planned → in_progress → completed`).

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::outline::Outline;

/// Kinds of story events the ledger distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Battle,
    Conflict,
    Encounter,
    Revelation,
    Romance,
    Betrayal,
    Journey,
    Death,
    Growth,
    #[serde(other)]
    Other,
}

impl EventType {
    pub const ALL: [EventType; 10] = [
        EventType::Battle,
        EventType::Conflict,
        EventType::Encounter,
        EventType::Revelation,
        EventType::Romance,
        EventType::Betrayal,
        EventType::Journey,
        EventType::Death,
        EventType::Growth,
        EventType::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Battle => "battle",
            Self::Conflict => "conflict",
            Self::Encounter => "encounter",
            Self::Revelation => "revelation",
            Self::Romance => "romance",
            Self::Betrayal => "betrayal",
            Self::Journey => "journey",
            Self::Death => "death",
            Self::Growth => "growth",
            Self::Other => "other",
        }
    }

    /// Lowercase keywords that signal this kind of event in prose.
    pub fn keywords(self) -> &'static [&'static str] {
        match self {
            Self::Battle => &[
                "fight", "battle", "strike", "attack", "clash", "duel", "defend", "sword", "blade",
                "wound", "战斗", "交手", "出手",
            ],
            Self::Conflict => &[
                "argue", "quarrel", "confront", "threat", "dispute", "rival", "争执", "对峙",
            ],
            Self::Encounter => &["meet", "encounter", "arrive", "greet", "stranger", "相遇", "初见"],
            Self::Revelation => &[
                "reveal", "discover", "secret", "truth", "learn", "realize", "uncover", "真相",
                "秘密",
            ],
            Self::Romance => &["love", "kiss", "embrace", "confess", "heart", "爱", "心动"],
            Self::Betrayal => &["betray", "traitor", "deceive", "backstab", "treachery", "背叛"],
            Self::Journey => &[
                "travel", "journey", "road", "cross", "depart", "leave", "voyage", "启程", "出发",
            ],
            Self::Death => &["die", "death", "dead", "kill", "funeral", "grave", "死", "葬"],
            Self::Growth => &[
                "train", "master", "breakthrough", "learn", "power", "level", "突破", "修炼",
            ],
            Self::Other => &[],
        }
    }

    /// Parse a model-supplied type name; anything unrecognized is `Other`.
    pub fn parse_lenient(raw: &str) -> Self {
        let wanted = raw.trim().to_lowercase().replace([' ', '-'], "_");
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .unwrap_or(Self::Other)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pick the event type whose keywords occur most often in `text`.
/// Ties go to the earlier type; no hits at all yields `Other`.
pub fn infer_event_type(text: &str) -> EventType {
    let lower = text.to_lowercase();
    let mut best = (EventType::Other, 0usize);
    for event_type in EventType::ALL {
        let hits = event_type
            .keywords()
            .iter()
            .filter(|kw| mentions_keyword(&lower, kw))
            .count();
        if hits > best.1 {
            best = (event_type, hits);
        }
    }
    best.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Planned,
    InProgress,
    Completed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub id: String,
    pub event_type: EventType,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    /// Sorted, deduplicated character ids.
    pub character_ids: Vec<String>,
    pub status: EventStatus,
    #[serde(default)]
    pub planned_chapter: Option<u32>,
    #[serde(default)]
    pub started_chapter: Option<u32>,
    #[serde(default)]
    pub completed_chapter: Option<u32>,
    pub unique_key: String,
    #[serde(default)]
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A candidate event extracted from chapter text, before resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventProposal {
    #[serde(rename = "type", alias = "event_type")]
    pub event_type: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    /// Character names as written in the text.
    #[serde(default)]
    pub characters: Vec<String>,
    #[serde(alias = "coreAction")]
    pub core_action: String,
    #[serde(default = "default_completed")]
    pub completed: bool,
    #[serde(default)]
    pub evidence: Option<String>,
}

fn default_completed() -> bool {
    true
}

/// A known character and the names that refer to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Case-insensitive name → id lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Character>", into = "Vec<Character>")]
pub struct CharacterRoster {
    characters: Vec<Character>,
    name_index: BTreeMap<String, String>,
}

impl From<Vec<Character>> for CharacterRoster {
    fn from(characters: Vec<Character>) -> Self {
        let mut roster = Self::default();
        for character in characters {
            roster.insert(character);
        }
        roster
    }
}

impl From<CharacterRoster> for Vec<Character> {
    fn from(roster: CharacterRoster) -> Self {
        roster.characters
    }
}

impl CharacterRoster {
    pub fn insert(&mut self, character: Character) {
        for name in std::iter::once(&character.name).chain(&character.aliases) {
            let key = name.trim().to_lowercase();
            if !key.is_empty() {
                self.name_index.insert(key, character.id.clone());
            }
        }
        self.characters.retain(|c| c.id != character.id);
        self.characters.push(character);
    }

    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.name_index
            .get(&name.trim().to_lowercase())
            .map(String::as_str)
    }

    pub fn get(&self, id: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.id == id)
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    /// Every indexed name (lowercase) with its character id.
    pub fn names(&self) -> impl Iterator<Item = (&str, &str)> {
        self.name_index.iter().map(|(n, id)| (n.as_str(), id.as_str()))
    }

    /// Lowercase names for `id`: primary name first, then aliases.
    fn names_of(&self, id: &str) -> Vec<String> {
        self.get(id)
            .map(|c| {
                std::iter::once(&c.name)
                    .chain(&c.aliases)
                    .map(|n| n.trim().to_lowercase())
                    .filter(|n| !n.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_core_action(action: &str) -> String {
    action
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deduplication key. Character ids are sorted so order never matters.
pub fn unique_key(event_type: EventType, character_ids: &[String], core_action: &str) -> String {
    let mut ids: Vec<&str> = character_ids.iter().map(String::as_str).collect();
    ids.sort_unstable();
    ids.dedup();
    format!(
        "{}|{}|{}",
        event_type.as_str(),
        ids.join(","),
        normalize_core_action(core_action)
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("duplicate event key '{0}'")]
    DuplicateKey(String),
    #[error("unknown event '{0}'")]
    UnknownEvent(String),
    #[error("event '{id}' cannot move from {from} back to {to}")]
    BackwardTransition {
        id: String,
        from: EventStatus,
        to: EventStatus,
    },
}

/// What happened to one proposal during ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Added {
        id: String,
        dropped_names: Vec<String>,
    },
    Skipped {
        unique_key: String,
        existing_id: String,
    },
}

/// One completed event that the new text appears to restate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateMatch {
    pub event_id: String,
    pub summary: String,
    pub character: String,
    pub fragment: String,
    pub keyword: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DuplicationReport {
    pub has_duplication: bool,
    pub matches: Vec<DuplicateMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<TimelineEvent>", into = "Vec<TimelineEvent>")]
pub struct TimelineLedger {
    events: Vec<TimelineEvent>,
}

impl TryFrom<Vec<TimelineEvent>> for TimelineLedger {
    type Error = LedgerError;

    fn try_from(events: Vec<TimelineEvent>) -> Result<Self, Self::Error> {
        let mut seen = HashSet::new();
        for event in &events {
            if !seen.insert(event.unique_key.as_str()) {
                return Err(LedgerError::DuplicateKey(event.unique_key.clone()));
            }
        }
        Ok(Self { events })
    }
}

impl From<TimelineLedger> for Vec<TimelineEvent> {
    fn from(ledger: TimelineLedger) -> Self {
        ledger.events
    }
}

impl TimelineLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&TimelineEvent> {
        self.events.iter().find(|e| e.id == id)
    }

    pub fn find_by_key(&self, key: &str) -> Option<&TimelineEvent> {
        self.events.iter().find(|e| e.unique_key == key)
    }

    pub fn by_status(&self, status: EventStatus) -> impl Iterator<Item = &TimelineEvent> {
        self.events.iter().filter(move |e| e.status == status)
    }

    pub fn involving<'a>(&'a self, character_id: &'a str) -> impl Iterator<Item = &'a TimelineEvent> {
        self.events
            .iter()
            .filter(move |e| e.character_ids.iter().any(|id| id == character_id))
    }

    /// Summaries of the `limit` most recently completed events, oldest first.
    pub fn recent_completed_summaries(&self, limit: usize) -> Vec<String> {
        let mut completed: Vec<(usize, &TimelineEvent)> = self
            .events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.status == EventStatus::Completed)
            .collect();
        completed.sort_by_key(|(pos, e)| (e.completed_chapter.unwrap_or(0), *pos));
        let skip = completed.len().saturating_sub(limit);
        completed
            .into_iter()
            .skip(skip)
            .map(|(_, e)| e.summary.clone())
            .collect()
    }

    /// Resolve and insert one extracted proposal.
    ///
    /// Unresolvable character names are dropped. A proposal whose key already
    /// exists is skipped, never an error.
    pub fn ingest(&mut self, proposal: &EventProposal, chapter: u32, roster: &CharacterRoster) -> IngestOutcome {
        let mut character_ids = Vec::new();
        let mut dropped_names = Vec::new();
        for name in &proposal.characters {
            match roster.resolve(name) {
                Some(id) => character_ids.push(id.to_string()),
                None => {
                    debug!(name = %name, "dropping unresolved character name");
                    dropped_names.push(name.clone());
                }
            }
        }
        character_ids.sort_unstable();
        character_ids.dedup();

        let event_type = EventType::parse_lenient(&proposal.event_type);
        let key = unique_key(event_type, &character_ids, &proposal.core_action);
        if let Some(existing) = self.find_by_key(&key) {
            debug!(unique_key = %key, existing_id = %existing.id, "skipping duplicate event");
            return IngestOutcome::Skipped {
                unique_key: key,
                existing_id: existing.id.clone(),
            };
        }

        let now = Utc::now();
        let (status, started, completed) = if proposal.completed {
            (EventStatus::Completed, Some(chapter), Some(chapter))
        } else {
            (EventStatus::InProgress, Some(chapter), None)
        };
        let id = Uuid::new_v4().to_string();
        self.events.push(TimelineEvent {
            id: id.clone(),
            event_type,
            summary: proposal.summary.trim().to_string(),
            description: proposal.description.trim().to_string(),
            character_ids,
            status,
            planned_chapter: None,
            started_chapter: started,
            completed_chapter: completed,
            unique_key: key,
            evidence: proposal.evidence.clone().filter(|e| !e.trim().is_empty()),
            created_at: now,
            updated_at: now,
        });
        IngestOutcome::Added { id, dropped_names }
    }

    /// Move an event forward in its lifecycle.
    pub fn advance(&mut self, id: &str, status: EventStatus, chapter: u32) -> Result<(), LedgerError> {
        let event = self
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LedgerError::UnknownEvent(id.to_string()))?;
        if status < event.status {
            return Err(LedgerError::BackwardTransition {
                id: id.to_string(),
                from: event.status,
                to: status,
            });
        }
        if status == event.status {
            return Ok(());
        }
        match status {
            EventStatus::Planned => {}
            EventStatus::InProgress => event.started_chapter = Some(chapter),
            EventStatus::Completed => {
                event.started_chapter.get_or_insert(chapter);
                event.completed_chapter = Some(chapter);
            }
        }
        event.status = status;
        event.updated_at = Utc::now();
        Ok(())
    }

    /// Synthesize one planned event per outline chapter. Returns how many were added.
    pub fn seed_from_outline(&mut self, outline: &Outline, roster: &CharacterRoster) -> usize {
        let mut added = 0;
        for chapter in outline.chapters() {
            let goal = chapter.goal.trim();
            if goal.is_empty() {
                continue;
            }
            let lower = goal.to_lowercase();
            let mut character_ids: Vec<String> = roster
                .names()
                .filter(|(name, _)| mentions(&lower, name))
                .map(|(_, id)| id.to_string())
                .collect();
            character_ids.sort_unstable();
            character_ids.dedup();

            let event_type = infer_event_type(goal);
            let key = unique_key(event_type, &character_ids, goal);
            if self.find_by_key(&key).is_some() {
                debug!(unique_key = %key, chapter = chapter.index, "skipping duplicate planned event");
                continue;
            }
            let now = Utc::now();
            self.events.push(TimelineEvent {
                id: Uuid::new_v4().to_string(),
                event_type,
                summary: goal.to_string(),
                description: chapter.title.trim().to_string(),
                character_ids,
                status: EventStatus::Planned,
                planned_chapter: Some(chapter.index),
                started_chapter: None,
                completed_chapter: None,
                unique_key: key,
                evidence: None,
                created_at: now,
                updated_at: now,
            });
            added += 1;
        }
        added
    }

    /// Flag completed events that `text` appears to narrate again.
    ///
    /// A match needs an involved character's name, a summary fragment of at
    /// least `min_fragment_chars` characters and a keyword of the event's type,
    /// all present in `text`.
    pub fn check_duplication(
        &self,
        text: &str,
        roster: &CharacterRoster,
        min_fragment_chars: usize,
    ) -> DuplicationReport {
        let lower = text.to_lowercase();
        let mut matches = Vec::new();
        for event in self.by_status(EventStatus::Completed) {
            let names: Vec<String> = event
                .character_ids
                .iter()
                .flat_map(|id| roster.names_of(id))
                .collect();
            let Some(character) = names.iter().find(|n| mentions(&lower, n)) else {
                continue;
            };
            let Some(keyword) = event
                .event_type
                .keywords()
                .iter()
                .find(|kw| mentions_keyword(&lower, kw))
            else {
                continue;
            };
            let fragments = summary_fragments(
                &event.summary,
                &names,
                event.event_type.keywords(),
                min_fragment_chars,
            );
            let Some(fragment) = fragments.into_iter().find(|f| lower.contains(f.as_str())) else {
                continue;
            };
            matches.push(DuplicateMatch {
                event_id: event.id.clone(),
                summary: event.summary.clone(),
                character: character.clone(),
                fragment,
                keyword: (*keyword).to_string(),
            });
        }
        DuplicationReport {
            has_duplication: !matches.is_empty(),
            matches,
        }
    }
}

/// Whole-word occurrence of `name` in `haystack`. Only ASCII alphanumerics count
/// as word characters, so CJK names still match inside running text.
fn mentions(haystack: &str, name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    haystack.match_indices(name).any(|(start, m)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + m.len()..].chars().next();
        !is_word_char(before) && !is_word_char(after)
    })
}

/// Keyword occurrence in lowercase `haystack`. ASCII keywords must start a
/// word and may only be followed by a short inflection ("fights", "killed"),
/// so "die" does not hit "soldier" and "heart" does not hit "hearth". CJK
/// keywords match anywhere.
fn mentions_keyword(haystack: &str, keyword: &str) -> bool {
    if keyword.is_empty() {
        return false;
    }
    if !keyword.is_ascii() {
        return haystack.contains(keyword);
    }
    haystack.match_indices(keyword).any(|(start, m)| {
        if is_word_char(haystack[..start].chars().next_back()) {
            return false;
        }
        let rest = &haystack[start + m.len()..];
        let suffix_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        INFLECTIONS.contains(&&rest[..suffix_len])
    })
}

const INFLECTIONS: &[&str] = &["", "s", "es", "d", "ed", "ing", "er", "ers"];

fn is_word_char(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_ascii_alphanumeric())
}

const FRAGMENT_BREAKS: &[char] = &[
    ',', '.', ';', ':', '!', '?', '，', '。', '；', '：', '！', '？', '、', '\n',
];

const STOPWORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "of", "to", "in", "on", "at", "with", "for", "from", "by",
    "his", "her", "their", "its", "is", "was", "are", "were", "be", "into", "over", "against",
    "as", "then", "after", "before",
];

/// Lowercase content fragments of an event summary.
///
/// Clauses are split on punctuation. Space-separated clauses are broken into
/// runs of consecutive content words, with stopwords, character names and
/// words carrying a type keyword acting as separators; unspaced (CJK) clauses
/// are used whole with names and keywords removed. A fragment therefore never
/// restates the name or keyword signal.
fn summary_fragments(summary: &str, names: &[String], keywords: &[&str], min_chars: usize) -> Vec<String> {
    let name_tokens: HashSet<&str> = names.iter().flat_map(|n| n.split_whitespace()).collect();
    let mut fragments = Vec::new();
    for clause in summary.to_lowercase().split(FRAGMENT_BREAKS) {
        let clause = clause.trim();
        if clause.is_empty() {
            continue;
        }
        if !clause.contains(char::is_whitespace) {
            let stripped = names
                .iter()
                .map(String::as_str)
                .chain(keywords.iter().copied())
                .fold(clause.to_string(), |acc, word| acc.replace(word, " "));
            fragments.extend(
                stripped
                    .split_whitespace()
                    .filter(|f| f.chars().count() >= min_chars && !STOPWORDS.contains(f))
                    .map(str::to_string),
            );
            continue;
        }
        let mut run: Vec<&str> = Vec::new();
        for word in clause.split_whitespace().chain(std::iter::once("")) {
            let is_break = word.is_empty()
                || STOPWORDS.contains(&word)
                || name_tokens.contains(word)
                || keywords.iter().any(|kw| mentions_keyword(word, kw));
            if !is_break {
                run.push(word);
                continue;
            }
            if !run.is_empty() {
                let fragment = run.join(" ");
                if fragment.chars().count() >= min_chars {
                    fragments.push(fragment);
                }
                run.clear();
            }
        }
    }
    fragments.sort_by_key(|f| std::cmp::Reverse(f.chars().count()));
    fragments
}
