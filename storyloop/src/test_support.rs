//! Test-only generators and fixtures.

use std::cell::RefCell;
use std::collections::VecDeque;

use anyhow::Result;

use crate::core::timeline::{Character, CharacterRoster, EventProposal, TimelineLedger};
use crate::core::types::{QcCategory, QcIssue, QcResult, Severity};
use crate::io::generator::{GenerateError, GenerateRequest, TextGenerator};
use crate::outline::{ChapterPlan, Outline, Volume};

/// One queued reply for [`ScriptedGenerator`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    Text(String),
    Fail(GenerateError),
}

/// Returns queued replies in order and records every request.
///
/// An exhausted queue fails with a transient error, like a flaky backend.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    replies: RefCell<VecDeque<ScriptedReply>>,
    requests: RefCell<Vec<GenerateRequest>>,
}

impl ScriptedGenerator {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| ScriptedReply::Text(t.into())).collect())
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.borrow().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.borrow().len()
    }
}

impl TextGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerateRequest) -> Result<String> {
        self.requests.borrow_mut().push(request.clone());
        match self.replies.borrow_mut().pop_front() {
            Some(ScriptedReply::Text(text)) => Ok(text),
            Some(ScriptedReply::Fail(err)) => Err(err.into()),
            None => Err(GenerateError::Transient("script exhausted".to_string()).into()),
        }
    }
}

/// Fails every call with the same error and counts the calls.
#[derive(Debug)]
pub struct FailingGenerator {
    error: GenerateError,
    calls: RefCell<usize>,
}

impl FailingGenerator {
    pub fn new(error: GenerateError) -> Self {
        Self {
            error,
            calls: RefCell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        *self.calls.borrow()
    }
}

impl TextGenerator for FailingGenerator {
    fn generate(&self, _request: &GenerateRequest) -> Result<String> {
        *self.calls.borrow_mut() += 1;
        Err(self.error.clone().into())
    }
}

/// A one-volume outline with `chapters` generic chapters.
pub fn outline_fixture(chapters: usize) -> Outline {
    let goals: Vec<String> = (1..=chapters).map(|n| format!("chapter {n} goal")).collect();
    let goals: Vec<&str> = goals.iter().map(String::as_str).collect();
    outline_with_goals(&goals)
}

/// A one-volume outline with one chapter per goal, already renumbered.
pub fn outline_with_goals(goals: &[&str]) -> Outline {
    let mut outline = Outline {
        title: "Ash Road".to_string(),
        premise: "A courier crosses a burning empire.".to_string(),
        volumes: vec![Volume {
            title: "Embers".to_string(),
            chapters: goals
                .iter()
                .enumerate()
                .map(|(n, goal)| ChapterPlan {
                    index: 0,
                    title: format!("Chapter {}", n + 1),
                    goal: (*goal).to_string(),
                })
                .collect(),
        }],
    };
    outline.renumber();
    outline
}

/// Ren (`c-ren`, alias "the courier") and Mara (`c-mara`).
pub fn roster_fixture() -> CharacterRoster {
    CharacterRoster::from(vec![
        Character {
            id: "c-ren".to_string(),
            name: "Ren".to_string(),
            aliases: vec!["the courier".to_string()],
        },
        Character {
            id: "c-mara".to_string(),
            name: "Mara".to_string(),
            aliases: Vec::new(),
        },
    ])
}

/// A completed battle proposal for the given characters.
pub fn battle_proposal(characters: &[&str], summary: &str) -> EventProposal {
    EventProposal {
        event_type: "battle".to_string(),
        summary: summary.to_string(),
        description: String::new(),
        characters: characters.iter().map(|s| s.to_string()).collect(),
        core_action: summary.to_string(),
        completed: true,
        evidence: None,
    }
}

/// A ledger holding "Ren fights the guard captain", completed in chapter 2.
pub fn ledger_fixture() -> TimelineLedger {
    let mut ledger = TimelineLedger::new();
    ledger.ingest(
        &battle_proposal(&["Ren"], "Ren fights the guard captain"),
        2,
        &roster_fixture(),
    );
    ledger
}

/// A QC result at `score` with one issue per listed severity.
pub fn qc_fixture(score: f64, severities: &[Severity]) -> QcResult {
    let issues = severities
        .iter()
        .enumerate()
        .map(|(n, severity)| {
            QcIssue::new(
                QcCategory::Plot,
                *severity,
                format!("{} issue {}", severity.as_str(), n + 1),
            )
        })
        .collect();
    QcResult::new(score, issues, 75.0)
}
