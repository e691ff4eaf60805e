//! Loop configuration stored in `storyloop.toml`.
//!
//! Every field has a default, so an empty or missing file is a valid config.
//! Per-project overrides live under `[projects.<id>]` and are deep-merged over
//! the base tables by [`StoryloopConfig::for_project`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};

use crate::core::memory::LegacySplit;
use crate::core::planner::PlannerKind;
use crate::core::qc::QcPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "storyloop.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoryloopConfig {
    pub agent: AgentConfig,
    pub qc: QcConfig,
    pub repair: RepairConfig,
    pub memory: MemoryConfig,
    pub ledger: LedgerConfig,
    pub generator: GeneratorConfig,
    /// Partial override tables keyed by project id.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub projects: BTreeMap<String, toml::Table>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Outline acceptance threshold on the 0–10 evaluation scale.
    pub target_score: f64,
    pub max_retries: u32,
    pub planner: PlannerKind,
    pub generate_temperature: f32,
    pub evaluate_temperature: f32,
    pub planner_temperature: f32,
    /// Prompts above this size drop their droppable sections.
    pub prompt_budget_bytes: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            target_score: 8.0,
            max_retries: 2,
            planner: PlannerKind::Rule,
            generate_temperature: 0.8,
            evaluate_temperature: 0.2,
            planner_temperature: 0.1,
            prompt_budget_bytes: 40_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QcConfig {
    pub pass_score: f64,
    pub critical_cap: f64,
    /// Partial score given to a checker that failed to run.
    pub fallback_score: f64,
    pub temperature: f32,
    pub weights: QcWeights,
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            pass_score: 75.0,
            critical_cap: 59.0,
            fallback_score: 75.0,
            temperature: 0.2,
            weights: QcWeights::default(),
        }
    }
}

impl QcConfig {
    pub fn policy(&self) -> QcPolicy {
        QcPolicy {
            pass_score: self.pass_score,
            critical_cap: self.critical_cap,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QcWeights {
    pub structure: f64,
    pub character: f64,
    pub pacing: f64,
    pub duplication: f64,
}

impl Default for QcWeights {
    fn default() -> Self {
        Self {
            structure: 1.0,
            character: 1.0,
            pacing: 1.0,
            duplication: 1.0,
        }
    }
}

impl QcWeights {
    /// Weight for a checker by name; unknown checkers weigh 1.
    pub fn for_checker(&self, name: &str) -> f64 {
        match name {
            "structure" => self.structure,
            "character" => self.character,
            "pacing" => self.pacing,
            "duplication" => self.duplication,
            _ => 1.0,
        }
    }

    fn all(&self) -> [f64; 4] {
        [self.structure, self.character, self.pacing, self.duplication]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RepairConfig {
    pub max_attempts: u32,
    /// Score at which an unpassed chapter is still accepted.
    pub acceptance_floor: f64,
    pub max_major_issues: usize,
    pub temperature: f32,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            acceptance_floor: 70.0,
            max_major_issues: 5,
            temperature: 0.4,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MemoryConfig {
    pub budget_chars: usize,
    pub legacy_recent_chars: usize,
    pub legacy_mid_chars: usize,
    pub max_open_loops: usize,
    pub temperature: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            budget_chars: 3000,
            legacy_recent_chars: 800,
            legacy_mid_chars: 1200,
            max_open_loops: 12,
            temperature: 0.3,
        }
    }
}

impl MemoryConfig {
    pub fn legacy_split(&self) -> LegacySplit {
        LegacySplit {
            recent_chars: self.legacy_recent_chars,
            mid_chars: self.legacy_mid_chars,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Completed events shown to the extractor as context.
    pub recent_window: usize,
    pub min_fragment_chars: usize,
    pub temperature: f32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            recent_window: 10,
            min_fragment_chars: 3,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Argv of the generator command. `{temperature}` is substituted per call.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
    pub retry: RetryConfig,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "llm".to_string(),
                "--temperature".to_string(),
                "{temperature}".to_string(),
            ],
            timeout_secs: 300,
            output_limit_bytes: 1024 * 1024,
            retry: RetryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub rate_limit_multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            rate_limit_multiplier: 4,
        }
    }
}

impl StoryloopConfig {
    pub fn validate(&self) -> Result<()> {
        let agent = &self.agent;
        if !(agent.target_score > 0.0 && agent.target_score <= 10.0) {
            bail!("agent.target_score must be in (0, 10]");
        }
        if agent.prompt_budget_bytes == 0 {
            bail!("agent.prompt_budget_bytes must be > 0");
        }
        for (name, t) in [
            ("agent.generate_temperature", agent.generate_temperature),
            ("agent.evaluate_temperature", agent.evaluate_temperature),
            ("agent.planner_temperature", agent.planner_temperature),
            ("qc.temperature", self.qc.temperature),
            ("repair.temperature", self.repair.temperature),
            ("memory.temperature", self.memory.temperature),
            ("ledger.temperature", self.ledger.temperature),
        ] {
            if !(0.0..=2.0).contains(&t) {
                bail!("{name} must be in [0, 2]");
            }
        }
        for (name, score) in [
            ("qc.pass_score", self.qc.pass_score),
            ("qc.critical_cap", self.qc.critical_cap),
            ("qc.fallback_score", self.qc.fallback_score),
            ("repair.acceptance_floor", self.repair.acceptance_floor),
        ] {
            if !(0.0..=100.0).contains(&score) {
                bail!("{name} must be in [0, 100]");
            }
        }
        if self.qc.critical_cap >= self.qc.pass_score {
            bail!("qc.critical_cap must be below qc.pass_score");
        }
        let weights = self.qc.weights.all();
        if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
            bail!("qc.weights must be finite and >= 0");
        }
        if weights.iter().sum::<f64>() <= 0.0 {
            bail!("qc.weights must not all be zero");
        }
        if self.memory.budget_chars == 0 {
            bail!("memory.budget_chars must be > 0");
        }
        if self.memory.legacy_recent_chars == 0 {
            bail!("memory.legacy_recent_chars must be > 0");
        }
        if self.ledger.min_fragment_chars == 0 {
            bail!("ledger.min_fragment_chars must be > 0");
        }
        let generator = &self.generator;
        if generator.command.is_empty() || generator.command[0].trim().is_empty() {
            bail!("generator.command must be a non-empty array");
        }
        if generator.timeout_secs == 0 {
            bail!("generator.timeout_secs must be > 0");
        }
        if generator.output_limit_bytes == 0 {
            bail!("generator.output_limit_bytes must be > 0");
        }
        if generator.retry.max_attempts == 0 {
            bail!("generator.retry.max_attempts must be > 0");
        }
        Ok(())
    }

    /// Effective config for `project`: its override table deep-merged over
    /// this config. The result carries no project tables of its own.
    pub fn for_project(&self, project: &str) -> Result<Self> {
        let overrides = self
            .projects
            .get(project)
            .ok_or_else(|| anyhow!("unknown project '{project}'"))?;
        let encoded = toml::to_string(self).context("serialize base config")?;
        let mut base: toml::Table = toml::from_str(&encoded).context("reparse base config")?;
        base.remove("projects");
        let merged = deep_merge(&base, overrides);
        let encoded = toml::to_string(&merged).context("serialize merged config")?;
        let cfg: Self = toml::from_str(&encoded)
            .with_context(|| format!("apply overrides for project '{project}'"))?;
        cfg.validate()
            .with_context(|| format!("validate config for project '{project}'"))?;
        Ok(cfg)
    }
}

/// Recursively merge `overlay` into `base`. Tables merge key by key; any other
/// overlay value replaces the base value.
pub fn deep_merge(base: &toml::Table, overlay: &toml::Table) -> toml::Table {
    let mut merged = base.clone();
    for (key, value) in overlay {
        let next = match (merged.get(key), value) {
            (Some(toml::Value::Table(b)), toml::Value::Table(o)) => toml::Value::Table(deep_merge(b, o)),
            _ => value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    merged
}

/// Load config from a TOML file, optionally resolved for one project.
///
/// A missing file yields the defaults (and then has no projects to resolve).
pub fn load_config(path: &Path, project: Option<&str>) -> Result<StoryloopConfig> {
    let cfg = if path.exists() {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        toml::from_str::<StoryloopConfig>(&contents)
            .with_context(|| format!("parse {}", path.display()))?
    } else {
        StoryloopConfig::default()
    };
    cfg.validate()?;
    match project {
        Some(id) => cfg.for_project(id),
        None => Ok(cfg),
    }
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &StoryloopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::report::write_atomic(path, buf.as_bytes())
}
