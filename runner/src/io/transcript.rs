//! Per-run transcripts under the configured transcript directory.
//!
//! Each run gets `<dir>/<run_id>/events.jsonl` (one raw event per line, in
//! arrival order) and `<dir>/<run_id>/meta.json` written once the run ends.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::event::RawEvent;

#[derive(Debug, Clone)]
pub struct TranscriptPaths {
    pub dir: PathBuf,
    pub events_path: PathBuf,
    pub meta_path: PathBuf,
}

impl TranscriptPaths {
    pub fn new(root: &Path, run_id: &str) -> Self {
        let dir = root.join(run_id);
        Self {
            events_path: dir.join("events.jsonl"),
            meta_path: dir.join("meta.json"),
            dir,
        }
    }
}

/// Summary written after the run ends.
#[derive(Debug, Clone, Serialize)]
pub struct RunMeta {
    pub run_id: String,
    pub task: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub events: usize,
    /// Serialized run stop reason.
    pub stop: serde_json::Value,
}

/// Append-only event sink for one run.
pub struct TranscriptWriter {
    paths: TranscriptPaths,
    events: Mutex<File>,
}

impl TranscriptWriter {
    pub fn create(root: &Path, run_id: &str) -> Result<Self> {
        let paths = TranscriptPaths::new(root, run_id);
        fs::create_dir_all(&paths.dir)
            .with_context(|| format!("create transcript dir {}", paths.dir.display()))?;
        let events = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&paths.events_path)
            .with_context(|| format!("open {}", paths.events_path.display()))?;
        Ok(Self {
            paths,
            events: Mutex::new(events),
        })
    }

    pub fn paths(&self) -> &TranscriptPaths {
        &self.paths
    }

    pub fn append_event(&self, event: &RawEvent) -> Result<()> {
        let mut line = serde_json::to_string(event).context("serialize event")?;
        line.push('\n');
        let mut file = self
            .events
            .lock()
            .map_err(|_| anyhow!("transcript writer lock poisoned"))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", self.paths.events_path.display()))
    }

    pub fn write_meta(&self, meta: &RunMeta) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(meta)?;
        buf.push('\n');
        fs::write(&self.paths.meta_path, buf)
            .with_context(|| format!("write {}", self.paths.meta_path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transcript_paths_are_stable() {
        let paths = TranscriptPaths::new(Path::new("/tmp/runs"), "run-1");
        assert!(paths.dir.ends_with("runs/run-1"));
        assert!(paths.events_path.ends_with("run-1/events.jsonl"));
        assert!(paths.meta_path.ends_with("run-1/meta.json"));
    }

    #[test]
    fn events_are_appended_in_order() {
        let temp = tempfile::tempdir().expect("tempdir");
        let writer = TranscriptWriter::create(temp.path(), "run-1").expect("create");
        writer.append_event(&json!({"agent": {"messages": []}})).expect("append");
        writer.append_event(&json!({"tools": {"messages": []}})).expect("append");

        let contents = fs::read_to_string(&writer.paths().events_path).expect("read");
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(r#"{"agent""#));
        assert!(lines[1].starts_with(r#"{"tools""#));
    }

    #[test]
    fn meta_is_pretty_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let writer = TranscriptWriter::create(temp.path(), "run-2").expect("create");
        let now = Utc::now();
        writer
            .write_meta(&RunMeta {
                run_id: "run-2".to_string(),
                task: "docs".to_string(),
                started_at: now,
                ended_at: now,
                duration_ms: 0,
                events: 3,
                stop: json!({"reason": "finished"}),
            })
            .expect("meta");
        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&writer.paths().meta_path).expect("read"))
                .expect("json");
        assert_eq!(written["events"], json!(3));
        assert_eq!(written["stop"]["reason"], json!("finished"));
    }
}
