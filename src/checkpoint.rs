//! Human-in-the-loop checkpoints.
//!
//! A checkpoint blocks the run until a human-confirmed artifact exists, is
//! well-formed and has stopped changing. There is no timeout: killing the
//! process is the way out, and since the sentinel is only written after
//! confirmation, that is always safe to resume from.
use crate::sentinel::CompletionStore;
use crate::stage::{ArtifactFormat, Stage, StageKind};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct Checkpoint {
    poll_interval: Duration,
}

impl Checkpoint {
    pub fn new(poll_interval: Duration) -> Self {
        Self { poll_interval }
    }

    /// Resolve an interactive stage and write its sentinel.
    ///
    /// `present` runs only when no confirmation exists yet; it shows the
    /// review artifact or pre-populates suggestions, but its output never
    /// completes the checkpoint on its own.
    pub fn resolve<F>(
        &self,
        stage: &Stage,
        output_root: &Path,
        store: &CompletionStore,
        present: F,
    ) -> Result<()>
    where
        F: FnOnce(&str) -> Result<()>,
    {
        let StageKind::Interactive {
            presenter,
            confirmation,
            format,
        } = stage.kind
        else {
            return Err(anyhow!("stage {} is not interactive", stage.name));
        };
        let confirmation_path = output_root.join(confirmation);

        if !is_well_formed(&confirmation_path, format)? {
            if let Some(module) = presenter {
                present(module)?;
            }
            self.await_confirmation(stage, &confirmation_path, format)?;
        }

        tracing::info!(stage = stage.name, artifact = %confirmation_path.display(), "checkpoint confirmed");
        store.mark_complete(stage)
    }

    /// Block until `path` holds a well-formed confirmation that has stopped
    /// growing.
    ///
    /// The artifact must be well formed at the same size on two consecutive
    /// polls, so a file still being written in chunks is not taken. Writers
    /// that rename a finished temp file into place still wait one poll.
    pub fn await_confirmation(
        &self,
        stage: &Stage,
        path: &Path,
        format: ArtifactFormat,
    ) -> Result<()> {
        let mut watch = ConfirmationWatch::new(path, format);
        let mut announced = false;
        loop {
            if watch.observe()? {
                return Ok(());
            }
            if !announced {
                eprintln!(
                    "checkpoint {}: waiting for {} (write it to continue, or interrupt and rerun later)",
                    stage.name,
                    path.display()
                );
                announced = true;
            }
            thread::sleep(self.poll_interval);
        }
    }
}

/// Successive observations of one confirmation artifact.
struct ConfirmationWatch<'a> {
    path: &'a Path,
    format: ArtifactFormat,
    last_len: Option<u64>,
}

impl<'a> ConfirmationWatch<'a> {
    fn new(path: &'a Path, format: ArtifactFormat) -> Self {
        Self {
            path,
            format,
            last_len: None,
        }
    }

    /// True once the artifact is well formed with the size seen last time.
    fn observe(&mut self) -> Result<bool> {
        let len = well_formed_len(self.path, self.format)?;
        let settled = len.is_some() && len == self.last_len;
        self.last_len = len;
        Ok(settled)
    }
}

/// Whether a confirmation artifact is present, non-empty and parses.
///
/// Anything else means "not yet resolved" rather than an error.
pub fn is_well_formed(path: &Path, format: ArtifactFormat) -> Result<bool> {
    Ok(well_formed_len(path, format)?.is_some())
}

fn well_formed_len(path: &Path, format: ArtifactFormat) -> Result<Option<u64>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    let well_formed = match format {
        ArtifactFormat::Text => !String::from_utf8_lossy(&bytes).trim().is_empty(),
        ArtifactFormat::Json => {
            !bytes.is_empty() && serde_json::from_slice::<serde_json::Value>(&bytes).is_ok()
        }
    };
    if !well_formed {
        tracing::debug!(artifact = %path.display(), "confirmation not well-formed yet");
        return Ok(None);
    }
    Ok(Some(bytes.len() as u64))
}
