//! System prompt loading and rendering.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use tracing::{debug, warn};

/// Prompt used when no template is configured or the file is missing.
pub const FALLBACK_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

const TEMPLATE_NAME: &str = "system";

/// Read the system prompt template, falling back to [`FALLBACK_SYSTEM_PROMPT`].
pub fn load_template(path: Option<&Path>) -> Result<String> {
    let Some(path) = path else {
        return Ok(FALLBACK_SYSTEM_PROMPT.to_string());
    };
    if !path.exists() {
        warn!(path = %path.display(), "system prompt missing; using fallback");
        return Ok(FALLBACK_SYSTEM_PROMPT.to_string());
    }
    let template =
        fs::read_to_string(path).with_context(|| format!("read prompt {}", path.display()))?;
    debug!(path = %path.display(), bytes = template.len(), "loaded system prompt");
    Ok(template)
}

/// Render a system prompt template with the task and working directory.
pub fn render_system_prompt(template: &str, task: &str, working_directory: &Path) -> Result<String> {
    let mut env = Environment::new();
    env.add_template(TEMPLATE_NAME, template)
        .context("parse system prompt template")?;
    let rendered = env
        .get_template(TEMPLATE_NAME)?
        .render(context! {
            task => task.trim(),
            working_directory => working_directory.display().to_string(),
        })
        .context("render system prompt")?;
    Ok(rendered)
}

/// Load and render the configured system prompt.
pub fn build_system_prompt(
    path: Option<&Path>,
    task: &str,
    working_directory: &Path,
) -> Result<String> {
    let template = load_template(path)?;
    render_system_prompt(&template, task, working_directory)
}
