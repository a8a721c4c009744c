//! Filesystem backend confined to a root directory.
//!
//! In virtual mode every path is interpreted relative to the root (a leading
//! `/` names the root itself), and any path that resolves outside the root,
//! lexically or through a symlink, is rejected with
//! [`SandboxError::PathViolation`]. Without virtual mode paths are used as
//! given, with relative paths joined onto the root.

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("path '{path}' escapes the sandbox root")]
    PathViolation { path: String },
    #[error("{op} '{path}': {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
}

impl SandboxError {
    pub fn is_path_violation(&self) -> bool {
        matches!(self, Self::PathViolation { .. })
    }

    fn io(op: &'static str, path: &str, source: io::Error) -> Self {
        Self::Io {
            op,
            path: path.to_string(),
            source,
        }
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntryInfo {
    /// Path as the agent sees it (root-relative with a leading `/` in virtual mode).
    pub path: String,
    pub is_dir: bool,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct SandboxedFs {
    root: PathBuf,
    virtual_mode: bool,
}

impl SandboxedFs {
    /// Create a backend rooted at `root`, which must be an existing directory.
    pub fn new(root: &Path, virtual_mode: bool) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("resolve sandbox root {}", root.display()))?;
        if !root.is_dir() {
            anyhow::bail!("sandbox root {} is not a directory", root.display());
        }
        debug!(root = %root.display(), virtual_mode, "sandbox ready");
        Ok(Self { root, virtual_mode })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an agent-supplied path to a host path.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        if !self.virtual_mode {
            let candidate = Path::new(path);
            return Ok(if candidate.is_absolute() {
                candidate.to_path_buf()
            } else {
                self.root.join(candidate)
            });
        }

        let mut resolved = self.root.clone();
        for component in Path::new(path).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::ParentDir => {
                    if resolved == self.root {
                        return Err(self.violation(path));
                    }
                    resolved.pop();
                }
                Component::CurDir | Component::RootDir => {}
                Component::Prefix(_) => return Err(self.violation(path)),
            }
        }

        // Symlinks inside the root may still point outside it.
        if let Some(existing) = nearest_existing(&resolved)
            && let Ok(real) = existing.canonicalize()
            && !real.starts_with(&self.root)
        {
            return Err(self.violation(path));
        }
        Ok(resolved)
    }

    #[instrument(skip(self))]
    pub fn read_to_string(&self, path: &str) -> Result<String, SandboxError> {
        let resolved = self.resolve(path)?;
        fs::read_to_string(&resolved).map_err(|err| SandboxError::io("read", path, err))
    }

    /// Write `contents`, creating parent directories as needed.
    #[instrument(skip(self, contents), fields(bytes = contents.len()))]
    pub fn write(&self, path: &str, contents: &str) -> Result<(), SandboxError> {
        let resolved = self.resolve(path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|err| SandboxError::io("create dir", path, err))?;
        }
        fs::write(&resolved, contents).map_err(|err| SandboxError::io("write", path, err))
    }

    /// List a directory, sorted by path.
    #[instrument(skip(self))]
    pub fn list(&self, path: &str) -> Result<Vec<DirEntryInfo>, SandboxError> {
        let resolved = self.resolve(path)?;
        let entries = fs::read_dir(&resolved).map_err(|err| SandboxError::io("list", path, err))?;
        let mut listing = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| SandboxError::io("list", path, err))?;
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => {
                    warn!(entry = %entry.path().display(), error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            listing.push(DirEntryInfo {
                path: self.display_path(&entry.path()),
                is_dir: metadata.is_dir(),
                size: metadata.len(),
            });
        }
        listing.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(listing)
    }

    fn display_path(&self, host_path: &Path) -> String {
        if !self.virtual_mode {
            return host_path.display().to_string();
        }
        match host_path.strip_prefix(&self.root) {
            Ok(relative) => format!("/{}", relative.display()),
            Err(_) => host_path.display().to_string(),
        }
    }

    fn violation(&self, path: &str) -> SandboxError {
        warn!(path, root = %self.root.display(), "rejected path outside sandbox");
        SandboxError::PathViolation {
            path: path.to_string(),
        }
    }
}

fn nearest_existing(path: &Path) -> Option<&Path> {
    path.ancestors().find(|candidate| candidate.exists())
}
