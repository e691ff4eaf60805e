//! Reference caller for the storyloop generation loops.
//!
//! Every command reads JSON or text inputs, runs one loop against the
//! configured generator command and writes its result as JSON, either to
//! `--out` or to stdout. Progress lines go to stderr.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use storyloop::agents::checkers::DuplicateEventChecker;
use storyloop::agents::events::EventExtractor;
use storyloop::agents::outline::{OutlineAgent, OutlineAgentSettings, planner_for};
use storyloop::agents::qc::QcRunner;
use storyloop::agents::repair::{BatchStats, ChapterRepairOutcome, ChapterRepairer, PendingChapter, RepairSettings};
use storyloop::agents::summary::{SummaryState, SummaryUpdater, normalize_memory};
use storyloop::core::agent_state::AgentParams;
use storyloop::core::planner::PlannerKind;
use storyloop::core::timeline::{CharacterRoster, TimelineLedger};
use storyloop::core::types::ChapterDraft;
use storyloop::exit_codes;
use storyloop::io::config::{DEFAULT_CONFIG_FILE, StoryloopConfig, load_config};
use storyloop::io::generator::CommandGenerator;
use storyloop::io::prompt::PromptEngine;
use storyloop::io::report::{read_json, write_atomic, write_json};
use storyloop::io::retry::{RetryPolicy, RetryingGenerator};
use storyloop::logging;
use storyloop::outline::Outline;
use storyloop::progress::ProgressEvent;

#[derive(Parser)]
#[command(
    name = "storyloop",
    version,
    about = "Generation, evaluation and repair loops for long-form fiction"
)]
struct Cli {
    /// Config file; missing means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Apply the `[projects.<id>]` overrides from the config.
    #[arg(long, global = true)]
    project: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate and critique an outline until it reaches the target score.
    Outline {
        #[arg(long)]
        goal: String,
        #[arg(long, default_value_t = 12)]
        chapters: u32,
        #[arg(long, default_value_t = 3000)]
        words: u32,
        /// Overrides `agent.target_score`.
        #[arg(long)]
        target_score: Option<f64>,
        /// Overrides `agent.max_retries`.
        #[arg(long)]
        max_retries: Option<u32>,
        /// Overrides `agent.planner` (`rule` or `model`).
        #[arg(long)]
        planner: Option<PlannerKind>,
        /// Ledger whose recent completed events are shown to the generator.
        #[arg(long)]
        ledger: Option<PathBuf>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run quality control on one chapter (a ChapterDraft JSON file).
    Qc {
        #[arg(long)]
        chapter: PathBuf,
        #[command(flatten)]
        story: StoryFiles,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check and repair chapters (a JSON array of ChapterDraft).
    Repair {
        #[arg(long)]
        chapters: PathBuf,
        #[command(flatten)]
        story: StoryFiles,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Normalize and compress a rolling summary text file.
    Compress {
        #[arg(long)]
        input: PathBuf,
        /// Overrides `memory.budget_chars`.
        #[arg(long)]
        budget: Option<usize>,
        /// Write the result here instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Fold a chapter into the rolling summary state file.
    Summarize {
        #[arg(long)]
        chapter: PathBuf,
        /// Summary state JSON; created when missing and updated in place.
        #[arg(long)]
        state: PathBuf,
    },
    /// Report completed ledger events a chapter narrates again.
    Duplicates {
        #[arg(long)]
        chapter: PathBuf,
        #[arg(long)]
        ledger: PathBuf,
        #[arg(long)]
        roster: PathBuf,
    },
    /// Extract events from a chapter into the ledger file.
    ExtractEvents {
        #[arg(long)]
        chapter: PathBuf,
        /// Ledger JSON; created when missing and updated in place.
        #[arg(long)]
        ledger: PathBuf,
        #[arg(long)]
        roster: PathBuf,
    },
    /// Add one planned event per outline chapter to the ledger file.
    SeedEvents {
        #[arg(long)]
        outline: PathBuf,
        #[arg(long)]
        ledger: PathBuf,
        #[arg(long)]
        roster: PathBuf,
    },
}

/// Ledger and roster enabling the duplicate event checker.
#[derive(clap::Args)]
struct StoryFiles {
    #[arg(long, requires = "roster")]
    ledger: Option<PathBuf>,
    #[arg(long, requires = "ledger")]
    roster: Option<PathBuf>,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let cfg = load_config(&cli.config, cli.project.as_deref())
        .with_context(|| format!("load config {}", cli.config.display()))?;
    match cli.command {
        Command::Outline {
            goal,
            chapters,
            words,
            target_score,
            max_retries,
            planner,
            ledger,
            out,
        } => {
            let params = AgentParams {
                target_chapters: chapters,
                target_words: words,
                target_score: target_score.unwrap_or(cfg.agent.target_score),
                max_retries: max_retries.unwrap_or(cfg.agent.max_retries),
                ..AgentParams::new(goal)
            };
            cmd_outline(&cfg, params, planner.unwrap_or(cfg.agent.planner), ledger.as_deref(), out.as_deref())
        }
        Command::Qc {
            chapter,
            story,
            out,
        } => cmd_qc(&cfg, &chapter, &story, out.as_deref()),
        Command::Repair {
            chapters,
            story,
            out,
        } => cmd_repair(&cfg, &chapters, &story, out.as_deref()),
        Command::Compress { input, budget, out } => cmd_compress(&cfg, &input, budget, out.as_deref()),
        Command::Summarize { chapter, state } => cmd_summarize(&cfg, &chapter, &state),
        Command::Duplicates {
            chapter,
            ledger,
            roster,
        } => cmd_duplicates(&cfg, &chapter, &ledger, &roster),
        Command::ExtractEvents {
            chapter,
            ledger,
            roster,
        } => cmd_extract_events(&cfg, &chapter, &ledger, &roster),
        Command::SeedEvents {
            outline,
            ledger,
            roster,
        } => cmd_seed_events(&outline, &ledger, &roster),
    }
}

type Generator = RetryingGenerator<CommandGenerator>;

fn generator(cfg: &StoryloopConfig) -> Generator {
    RetryingGenerator::new(
        CommandGenerator::from_config(&cfg.generator),
        RetryPolicy::from_config(&cfg.generator.retry),
    )
}

fn print_progress(event: &ProgressEvent) {
    eprintln!("{event}");
}

fn cmd_outline(
    cfg: &StoryloopConfig,
    params: AgentParams,
    planner: PlannerKind,
    ledger: Option<&Path>,
    out: Option<&Path>,
) -> Result<i32> {
    let generator = generator(cfg);
    let prompts = PromptEngine::new(cfg.agent.prompt_budget_bytes)?;
    let recent = match ledger {
        Some(path) => load_ledger(path)?.recent_completed_summaries(cfg.ledger.recent_window),
        None => Vec::new(),
    };
    let planner = planner_for(planner, &generator, &prompts, cfg.agent.planner_temperature);
    let agent = OutlineAgent::new(&generator, &prompts, OutlineAgentSettings::from_config(&cfg.agent))
        .with_recent_events(recent);
    let outcome = agent.run(params, planner.as_ref(), print_progress)?;
    emit(out, &outcome)?;
    Ok(if outcome.target_reached {
        exit_codes::OK
    } else {
        exit_codes::UNMET
    })
}

fn cmd_qc(cfg: &StoryloopConfig, chapter: &Path, story: &StoryFiles, out: Option<&Path>) -> Result<i32> {
    let draft: ChapterDraft = read_json(chapter)?;
    let generator = generator(cfg);
    let prompts = PromptEngine::new(cfg.agent.prompt_budget_bytes)?;
    let story = story.load()?;
    let runner = QcRunner::standard(&generator, &prompts, &cfg.qc, duplicate_checker(cfg, story.as_ref()));
    let run = runner.run(&draft);
    emit(out, &run)?;
    Ok(if run.result.passed() {
        exit_codes::OK
    } else {
        exit_codes::UNMET
    })
}

#[derive(Serialize)]
struct RepairReportView<'a> {
    stats: BatchStats,
    chapters: &'a [ChapterRepairOutcome],
}

fn cmd_repair(cfg: &StoryloopConfig, chapters: &Path, story: &StoryFiles, out: Option<&Path>) -> Result<i32> {
    let drafts: Vec<ChapterDraft> = read_json(chapters)?;
    let generator = generator(cfg);
    let prompts = PromptEngine::new(cfg.agent.prompt_budget_bytes)?;
    let story = story.load()?;
    let runner = QcRunner::standard(&generator, &prompts, &cfg.qc, duplicate_checker(cfg, story.as_ref()));

    let pending = drafts
        .into_iter()
        .map(|draft| {
            let qc = runner.run(&draft).result;
            eprintln!("chapter {}: initial score {:.1}", draft.index, qc.score());
            PendingChapter { draft, qc }
        })
        .collect();
    let repairer = ChapterRepairer::new(
        &generator,
        &prompts,
        &runner,
        RepairSettings::from_config(&cfg.repair),
    );
    let report = repairer.repair_batch(pending, print_progress);
    emit(
        out,
        &RepairReportView {
            stats: report.stats(),
            chapters: &report.chapters,
        },
    )?;
    Ok(if report.all_succeeded() {
        exit_codes::OK
    } else {
        exit_codes::UNMET
    })
}

fn cmd_compress(cfg: &StoryloopConfig, input: &Path, budget: Option<usize>, out: Option<&Path>) -> Result<i32> {
    let text = fs::read_to_string(input).with_context(|| format!("read {}", input.display()))?;
    let mut memory = cfg.memory.clone();
    if let Some(budget) = budget {
        memory.budget_chars = budget;
    }
    let compressed = normalize_memory(&text, &memory);
    match out {
        Some(path) => write_atomic(path, compressed.as_bytes())?,
        None => print!("{compressed}"),
    }
    Ok(exit_codes::OK)
}

fn cmd_summarize(cfg: &StoryloopConfig, chapter: &Path, state_path: &Path) -> Result<i32> {
    let draft: ChapterDraft = read_json(chapter)?;
    let previous: SummaryState = if state_path.exists() {
        read_json(state_path)?
    } else {
        SummaryState::default()
    };
    let generator = generator(cfg);
    let prompts = PromptEngine::new(cfg.agent.prompt_budget_bytes)?;
    let update = SummaryUpdater::new(&generator, &prompts, cfg.memory.clone()).update(
        &previous,
        draft.index,
        &draft.text,
    )?;
    if update.updated {
        write_json(state_path, &update.state)?;
    }
    emit(None, &update)?;
    Ok(exit_codes::OK)
}

fn cmd_duplicates(cfg: &StoryloopConfig, chapter: &Path, ledger: &Path, roster: &Path) -> Result<i32> {
    let draft: ChapterDraft = read_json(chapter)?;
    let ledger = load_ledger(ledger)?;
    let roster: CharacterRoster = read_json(roster)?;
    let report = ledger.check_duplication(&draft.text, &roster, cfg.ledger.min_fragment_chars);
    emit(None, &report)?;
    Ok(if report.has_duplication {
        exit_codes::UNMET
    } else {
        exit_codes::OK
    })
}

fn cmd_extract_events(cfg: &StoryloopConfig, chapter: &Path, ledger_path: &Path, roster: &Path) -> Result<i32> {
    let draft: ChapterDraft = read_json(chapter)?;
    let mut ledger = load_ledger(ledger_path)?;
    let roster: CharacterRoster = read_json(roster)?;
    let generator = generator(cfg);
    let prompts = PromptEngine::new(cfg.agent.prompt_budget_bytes)?;
    let report = EventExtractor::new(&generator, &prompts, &cfg.ledger).extract_into(
        draft.index,
        &draft.text,
        &mut ledger,
        &roster,
    )?;
    if report.added() > 0 {
        write_json(ledger_path, &ledger)?;
    }
    emit(None, &report)?;
    Ok(exit_codes::OK)
}

fn cmd_seed_events(outline: &Path, ledger_path: &Path, roster: &Path) -> Result<i32> {
    let mut outline: Outline = read_json(outline)?;
    outline.renumber();
    let mut ledger = load_ledger(ledger_path)?;
    let roster: CharacterRoster = read_json(roster)?;
    let added = ledger.seed_from_outline(&outline, &roster);
    write_json(ledger_path, &ledger)?;
    eprintln!("seeded {added} planned events");
    Ok(exit_codes::OK)
}

impl StoryFiles {
    fn load(&self) -> Result<Option<(TimelineLedger, CharacterRoster)>> {
        match (&self.ledger, &self.roster) {
            (Some(ledger), Some(roster)) => Ok(Some((load_ledger(ledger)?, read_json(roster)?))),
            _ => Ok(None),
        }
    }
}

fn duplicate_checker<'a>(
    cfg: &StoryloopConfig,
    story: Option<&'a (TimelineLedger, CharacterRoster)>,
) -> Option<DuplicateEventChecker<'a>> {
    story.map(|(ledger, roster)| DuplicateEventChecker::new(ledger, roster, cfg.ledger.min_fragment_chars))
}

/// A missing ledger file is an empty ledger.
fn load_ledger(path: &Path) -> Result<TimelineLedger> {
    if path.exists() {
        read_json(path)
    } else {
        Ok(TimelineLedger::new())
    }
}

fn emit<T: Serialize>(out: Option<&Path>, value: &T) -> Result<()> {
    match out {
        Some(path) => write_json(path, value),
        None => {
            let payload = serde_json::to_string_pretty(value).context("serialize json")?;
            println!("{payload}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_outline_with_overrides() {
        let cli = Cli::parse_from([
            "storyloop",
            "--project",
            "saga",
            "outline",
            "--goal",
            "A courier crosses a burning empire",
            "--max-retries",
            "1",
            "--planner",
            "model",
        ]);
        assert_eq!(cli.project.as_deref(), Some("saga"));
        match cli.command {
            Command::Outline {
                max_retries,
                planner,
                chapters,
                ..
            } => {
                assert_eq!(max_retries, Some(1));
                assert_eq!(planner, Some(PlannerKind::Model));
                assert_eq!(chapters, 12);
            }
            _ => panic!("expected outline command"),
        }
    }

    #[test]
    fn parse_rejects_unknown_planner() {
        assert!(
            Cli::try_parse_from(["storyloop", "outline", "--goal", "g", "--planner", "oracle"]).is_err()
        );
    }

    #[test]
    fn ledger_requires_roster() {
        assert!(
            Cli::try_parse_from(["storyloop", "qc", "--chapter", "c.json", "--ledger", "l.json"]).is_err()
        );
        assert!(
            Cli::try_parse_from([
                "storyloop",
                "qc",
                "--chapter",
                "c.json",
                "--ledger",
                "l.json",
                "--roster",
                "r.json"
            ])
            .is_ok()
        );
    }

    #[test]
    fn parse_seed_events() {
        let cli = Cli::parse_from([
            "storyloop",
            "seed-events",
            "--outline",
            "outline.json",
            "--ledger",
            "ledger.json",
            "--roster",
            "roster.json",
        ]);
        assert!(matches!(cli.command, Command::SeedEvents { .. }));
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }
}
