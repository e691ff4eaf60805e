//! Prompt rendering for every generator call.
//!
//! Templates are minijinja markdown files compiled into the binary. Each one is
//! split into sections by `<!-- section:KEY required|droppable -->` markers. The
//! `system` section becomes the system instruction; the rest form the prompt,
//! which is fitted to a byte budget by dropping droppable sections in a fixed
//! order before truncating as a last resort.

use std::sync::LazyLock;

use anyhow::{Context, Result};
use minijinja::Environment;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

const TEMPLATES: &[(&str, &str)] = &[
    ("outline_generate", include_str!("prompts/outline_generate.md")),
    ("outline_evaluate", include_str!("prompts/outline_evaluate.md")),
    ("planner", include_str!("prompts/planner.md")),
    ("chapter_check", include_str!("prompts/chapter_check.md")),
    ("chapter_repair", include_str!("prompts/chapter_repair.md")),
    ("extract_events", include_str!("prompts/extract_events.md")),
    ("summary_update", include_str!("prompts/summary_update.md")),
];

/// Droppable sections, least important first.
const DROP_ORDER: &[&str] = &[
    "history", "events", "previous", "loops", "failure", "feedback", "guidance",
];

const TRUNCATION_MARK: &str = "\n[truncated]";

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->").expect("section regex is valid")
});

/// A rendered system instruction plus user prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub prompt: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutlinePromptInput<'a> {
    pub goal: &'a str,
    pub target_chapters: u32,
    pub target_words: u32,
    /// Version number the new outline will get.
    pub version: u32,
    pub guidance: Option<&'a str>,
    pub previous_outline: Option<String>,
    pub weaknesses: &'a [String],
    pub recent_events: &'a [String],
    pub failure: Option<&'a str>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluatePromptInput<'a> {
    pub goal: &'a str,
    pub target_chapters: u32,
    pub target_words: u32,
    pub target_score: f64,
    pub outline: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlannerPromptInput<'a> {
    pub goal: &'a str,
    pub iteration: u32,
    pub ceiling: u32,
    pub outline_version: u32,
    pub max_versions: u32,
    pub has_outline: bool,
    pub latest_score: Option<f64>,
    pub best_score: Option<f64>,
    pub target_score: f64,
    pub last_failure: Option<&'a str>,
    pub history: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckPromptInput<'a> {
    pub dimension: &'a str,
    pub focus: &'a str,
    pub chapter_index: u32,
    pub total_chapters: u32,
    pub is_final: bool,
    pub goal: Option<&'a str>,
    pub text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairPromptInput<'a> {
    pub instruction: &'a str,
    pub text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractPromptInput<'a> {
    pub chapter_index: u32,
    pub characters: Vec<&'a str>,
    pub recent_events: &'a [String],
    pub text: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SummaryPromptInput<'a> {
    pub chapter_index: u32,
    pub previous_summary: &'a str,
    pub open_loops: &'a [String],
    pub budget_chars: usize,
    pub text: &'a str,
}

/// Template environment plus the prompt byte budget.
pub struct PromptEngine {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptEngine {
    pub fn new(budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .with_context(|| format!("compile prompt template {name}"))?;
        }
        Ok(Self { env, budget_bytes })
    }

    pub fn outline_generate(&self, input: &OutlinePromptInput<'_>) -> Result<RenderedPrompt> {
        self.render("outline_generate", input)
    }

    pub fn outline_evaluate(&self, input: &EvaluatePromptInput<'_>) -> Result<RenderedPrompt> {
        self.render("outline_evaluate", input)
    }

    pub fn planner(&self, input: &PlannerPromptInput<'_>) -> Result<RenderedPrompt> {
        self.render("planner", input)
    }

    pub fn chapter_check(&self, input: &CheckPromptInput<'_>) -> Result<RenderedPrompt> {
        self.render("chapter_check", input)
    }

    pub fn chapter_repair(&self, input: &RepairPromptInput<'_>) -> Result<RenderedPrompt> {
        self.render("chapter_repair", input)
    }

    pub fn extract_events(&self, input: &ExtractPromptInput<'_>) -> Result<RenderedPrompt> {
        self.render("extract_events", input)
    }

    pub fn summary_update(&self, input: &SummaryPromptInput<'_>) -> Result<RenderedPrompt> {
        self.render("summary_update", input)
    }

    fn render<S: Serialize>(&self, name: &str, input: &S) -> Result<RenderedPrompt> {
        let rendered = self
            .env
            .get_template(name)
            .and_then(|template| template.render(input))
            .with_context(|| format!("render prompt template {name}"))?;

        let mut sections = parse_sections(&rendered);
        let system = match sections.iter().position(|s| s.key == "system") {
            Some(idx) => sections.remove(idx).content,
            None => String::new(),
        };
        apply_budget(&mut sections, self.budget_bytes);
        Ok(RenderedPrompt {
            system,
            prompt: join_sections(&sections),
        })
    }
}

#[derive(Debug, Clone)]
struct Section {
    key: String,
    required: bool,
    content: String,
}

fn parse_sections(rendered: &str) -> Vec<Section> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::new();
    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let content = rendered[whole.end()..end].trim().to_string();
        let required = kind.as_str() == "required";
        if !content.is_empty() || required {
            sections.push(Section {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

fn total_len(sections: &[Section]) -> usize {
    sections.iter().map(|s| s.content.len()).sum::<usize>()
        + 2 * sections.len().saturating_sub(1)
}

fn apply_budget(sections: &mut Vec<Section>, budget: usize) {
    for key in DROP_ORDER {
        if total_len(sections) <= budget {
            return;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == *key && !s.required) {
            debug!(section = key, bytes_dropped = sections[idx].content.len(), "dropped prompt section for budget");
            sections.remove(idx);
        }
    }

    let over = total_len(sections).saturating_sub(budget);
    if over == 0 {
        return;
    }
    // Shrink the largest section; it is almost always the chapter or outline body.
    let Some(largest) = sections.iter_mut().max_by_key(|s| s.content.len()) else {
        return;
    };
    let before = largest.content.len();
    let keep = before.saturating_sub(over + TRUNCATION_MARK.len());
    largest.content.truncate(char_floor(&largest.content, keep));
    largest.content.push_str(TRUNCATION_MARK);
    debug!(section = %largest.key, before, after = largest.content.len(), "truncated prompt section for budget");
}

fn char_floor(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn join_sections(sections: &[Section]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outline_input<'a>(weaknesses: &'a [String], events: &'a [String]) -> OutlinePromptInput<'a> {
        OutlinePromptInput {
            goal: "A courier crosses a burning empire",
            target_chapters: 12,
            target_words: 3000,
            version: 2,
            guidance: Some("tighten the middle act"),
            previous_outline: Some("# Ash Road\n- Chapter 1: Gate".to_string()),
            weaknesses,
            recent_events: events,
            failure: None,
        }
    }

    #[test]
    fn every_template_compiles() {
        PromptEngine::new(10_000).expect("templates compile");
    }

    #[test]
    fn system_section_is_split_from_prompt() {
        let engine = PromptEngine::new(10_000).expect("engine");
        let weaknesses = vec!["flat middle act".to_string()];
        let rendered = engine
            .outline_generate(&outline_input(&weaknesses, &[]))
            .expect("render");
        assert!(!rendered.system.is_empty());
        assert!(!rendered.prompt.contains("section:"));
        assert!(rendered.prompt.contains("A courier crosses a burning empire"));
        assert!(rendered.prompt.contains("flat middle act"));
        assert!(rendered.prompt.contains("tighten the middle act"));
    }

    #[test]
    fn goal_precedes_feedback_sections() {
        let engine = PromptEngine::new(10_000).expect("engine");
        let weaknesses = vec!["flat middle act".to_string()];
        let events = vec!["Ren fled the salt city".to_string()];
        let prompt = engine
            .outline_generate(&outline_input(&weaknesses, &events))
            .expect("render")
            .prompt;
        let goal = prompt.find("### Goal").expect("goal");
        let previous = prompt.find("### Previous Outline").expect("previous");
        let feedback = prompt.find("### Evaluator Feedback").expect("feedback");
        let events = prompt.find("### Story So Far").expect("events");
        assert!(goal < previous && previous < feedback);
        assert!(goal < events);
    }

    #[test]
    fn budget_drops_droppable_sections_first() {
        let engine = PromptEngine::new(700).expect("engine");
        let weaknesses = vec!["weak ".repeat(20)];
        let events: Vec<String> = (0..20).map(|n| format!("event number {n} happened")).collect();
        let prompt = engine
            .outline_generate(&outline_input(&weaknesses, &events))
            .expect("render")
            .prompt;
        assert!(!prompt.contains("### Story So Far"), "events dropped");
        assert!(prompt.contains("### Goal"), "goal kept");
        assert!(prompt.contains("### Output"), "output contract kept");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let mut sections = vec![Section {
            key: "chapter".to_string(),
            required: true,
            content: "长".repeat(100),
        }];
        apply_budget(&mut sections, 50);
        assert!(sections[0].content.ends_with("[truncated]"));
        assert!(sections[0].content.len() <= 50);
    }
}
