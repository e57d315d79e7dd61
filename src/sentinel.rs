//! Completion sentinels: the only durable proof that a stage succeeded.
use crate::history::now_epoch_ms;
use crate::stage::Stage;
use crate::workspace::{remove_file_if_exists, write_atomic};
use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Presence queries and atomic create/delete over one workspace's sentinels.
#[derive(Debug, Clone)]
pub struct CompletionStore {
    root: PathBuf,
}

impl CompletionStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub fn sentinel_path(&self, stage: &Stage) -> PathBuf {
        self.root.join(stage.sentinel)
    }

    /// A stage counts as complete only when its sentinel exists and is non-empty.
    pub fn is_complete(&self, stage: &Stage) -> Result<bool> {
        sentinel_present(&self.sentinel_path(stage))
    }

    /// Stages of `stages` that currently carry a sentinel, in order.
    pub fn completed<'a>(&self, stages: &'a [Stage]) -> Result<Vec<&'a Stage>> {
        let mut done = Vec::new();
        for stage in stages {
            if self.is_complete(stage)? {
                done.push(stage);
            }
        }
        Ok(done)
    }

    /// Publish the sentinel for `stage` via temporary file and rename.
    pub fn mark_complete(&self, stage: &Stage) -> Result<()> {
        let path = self.sentinel_path(stage);
        let body = format!("{} finished at {}\n", stage.name, now_epoch_ms()?);
        write_atomic(&path, body.as_bytes())?;
        tracing::debug!(stage = stage.name, sentinel = %path.display(), "sentinel written");
        Ok(())
    }

    /// Delete the sentinel for `stage`; deleting an absent sentinel is not an error.
    pub fn clear(&self, stage: &Stage) -> Result<()> {
        remove_file_if_exists(&self.sentinel_path(stage))
    }

    pub fn clear_all(&self, stages: &[Stage]) -> Result<()> {
        for stage in stages {
            self.clear(stage)?;
        }
        Ok(())
    }
}

/// Whether a sentinel file exists with content.
pub fn sentinel_present(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.is_file() && meta.len() > 0),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("inspect {}", path.display())),
    }
}
