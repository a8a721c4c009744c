//! Resource budget for one supervised run.

use anyhow::{Result, anyhow};

/// Limits enforced by the resource tracker. Immutable for the lifetime of a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Budget {
    /// Advisory ceiling on calls to the tracked tool.
    pub max_tool_calls: u32,
    /// Authoritative step ceiling; reaching it injects the step-limit signal.
    pub max_steps: u32,
    /// Fraction of `max_tool_calls` at which a one-time warning fires.
    pub warn_ratio: f64,
}

impl Default for Budget {
    fn default() -> Self {
        Self {
            max_tool_calls: 30,
            max_steps: 50,
            warn_ratio: 0.8,
        }
    }
}

impl Budget {
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(anyhow!("max_steps must be > 0"));
        }
        if self.max_tool_calls == 0 {
            return Err(anyhow!("max_tool_calls must be > 0"));
        }
        validate_ratio("warn_ratio", self.warn_ratio)
    }

    /// True once `seen` calls reach `warn_ratio * max_tool_calls`.
    pub fn warn_reached(&self, seen: u32) -> bool {
        f64::from(seen) >= self.warn_ratio * f64::from(self.max_tool_calls)
    }

    pub fn ceiling_reached(&self, seen: u32) -> bool {
        seen >= self.max_tool_calls
    }

    pub fn step_limit_reached(&self, steps: u32) -> bool {
        steps >= self.max_steps
    }
}

/// Check that a ratio lies in `(0, 1]`.
pub fn validate_ratio(label: &str, ratio: f64) -> Result<()> {
    if !ratio.is_finite() || ratio <= 0.0 || ratio > 1.0 {
        return Err(anyhow!("{label} must be in (0, 1], got {ratio}"));
    }
    Ok(())
}
