//! Runner configuration stored under `.bounded-runner/config.toml`.
//!
//! Values come from the TOML file (missing file or fields use defaults) and are
//! then overridden by environment variables. The budget is fixed for the
//! lifetime of a run once loaded.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::budget::{Budget, validate_ratio};
use crate::core::resource_limit::DEFAULT_TRACKED_TOOL;
use crate::core::todo_completion::DEFAULT_COMPLETION_THRESHOLD;

pub const DEFAULT_CONFIG_PATH: &str = ".bounded-runner/config.toml";

pub const ENV_API_BASE: &str = "OPENAI_API_BASE";
pub const ENV_MODEL_NAME: &str = "OPENAI_MODEL_NAME";
pub const ENV_MAX_STEPS: &str = "RUNNER_MAX_STEPS";
pub const ENV_MAX_TOOL_CALLS: &str = "RUNNER_MAX_TOOL_CALLS";
pub const ENV_WARN_RATIO: &str = "RUNNER_WARN_RATIO";
pub const ENV_TODO_THRESHOLD: &str = "RUNNER_TODO_THRESHOLD";

/// Runner configuration (TOML).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RunnerConfig {
    /// System prompt template, relative to the working directory. Falls back
    /// to a generic prompt when unset or missing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_path: Option<PathBuf>,
    /// Directory for per-run event transcripts, relative to the working
    /// directory. Disabled when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcript_dir: Option<PathBuf>,
    pub budget: BudgetConfig,
    pub model: ModelConfig,
    pub sandbox: SandboxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BudgetConfig {
    /// Advisory ceiling on calls to `tracked_tool`.
    pub max_tool_calls: u32,
    /// Step ceiling that forces completion.
    pub max_steps: u32,
    /// Fraction of `max_tool_calls` that triggers the one-time warning.
    pub warn_ratio: f64,
    /// Fraction of completed todos that triggers finalization.
    pub todo_completion_threshold: f64,
    pub tracked_tool: String,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        let budget = Budget::default();
        Self {
            max_tool_calls: budget.max_tool_calls,
            max_steps: budget.max_steps,
            warn_ratio: budget.warn_ratio,
            todo_completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            tracked_tool: DEFAULT_TRACKED_TOOL.to_string(),
        }
    }
}

impl BudgetConfig {
    pub fn budget(&self) -> Budget {
        Budget {
            max_tool_calls: self.max_tool_calls,
            max_steps: self.max_steps,
            warn_ratio: self.warn_ratio,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key. The key itself is never stored.
    pub api_key_env: String,
    pub temperature: f64,
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.0,
            request_timeout_secs: 300,
        }
    }
}

impl ModelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => Ok(key),
            _ => Err(anyhow!(
                "missing API key: set {} in the environment",
                self.api_key_env
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Reject paths that resolve outside the working directory.
    pub virtual_mode: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self { virtual_mode: true }
    }
}

impl RunnerConfig {
    pub fn validate(&self) -> Result<()> {
        self.budget.budget().validate()?;
        validate_ratio(
            "todo_completion_threshold",
            self.budget.todo_completion_threshold,
        )?;
        if self.budget.tracked_tool.trim().is_empty() {
            return Err(anyhow!("budget.tracked_tool must be non-empty"));
        }
        if self.model.model.trim().is_empty() {
            return Err(anyhow!("model.model must be non-empty"));
        }
        if !(self.model.base_url.starts_with("http://")
            || self.model.base_url.starts_with("https://"))
        {
            return Err(anyhow!(
                "model.base_url must be an http(s) URL, got '{}'",
                self.model.base_url
            ));
        }
        if self.model.request_timeout_secs == 0 {
            return Err(anyhow!("model.request_timeout_secs must be > 0"));
        }
        Ok(())
    }

    /// Apply overrides from `vars` (normally the process environment).
    pub fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        if let Some(base) = vars.get(ENV_API_BASE).filter(|v| !v.trim().is_empty()) {
            self.model.base_url = base.trim().to_string();
        }
        if let Some(model) = vars.get(ENV_MODEL_NAME).filter(|v| !v.trim().is_empty()) {
            self.model.model = model.trim().to_string();
        }
        if let Some(value) = parse_var(vars, ENV_MAX_STEPS)? {
            self.budget.max_steps = value;
        }
        if let Some(value) = parse_var(vars, ENV_MAX_TOOL_CALLS)? {
            self.budget.max_tool_calls = value;
        }
        if let Some(value) = parse_var(vars, ENV_WARN_RATIO)? {
            self.budget.warn_ratio = value;
        }
        if let Some(value) = parse_var(vars, ENV_TODO_THRESHOLD)? {
            self.budget.todo_completion_threshold = value;
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(vars: &HashMap<String, String>, name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    let Some(raw) = vars.get(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .map_err(|err| anyhow!("invalid {name}='{raw}': {err}"))
}

/// Load config from a TOML file without environment overrides.
///
/// If the file is missing, returns `RunnerConfig::default()`.
pub fn load_config(path: &Path) -> Result<RunnerConfig> {
    let cfg = read_config(path)?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from `path` and apply process environment overrides.
pub fn load_effective_config(path: &Path) -> Result<RunnerConfig> {
    let vars: HashMap<String, String> = std::env::vars().collect();
    load_config_with_env(path, &vars)
}

/// Load config from `path`, apply overrides from `vars`, then validate once.
pub fn load_config_with_env(path: &Path, vars: &HashMap<String, String>) -> Result<RunnerConfig> {
    let mut cfg = read_config(path)?;
    cfg.apply_env(vars)?;
    cfg.validate()
        .with_context(|| format!("validate {} with environment overrides", path.display()))?;
    Ok(cfg)
}

/// Parse the TOML file without validating. Missing file yields defaults.
fn read_config(path: &Path) -> Result<RunnerConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing; using defaults");
        return Ok(RunnerConfig::default());
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &RunnerConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
