//! External worker invocation.
//!
//! The worker is a black box behind the [`Worker`] trait: it receives a
//! module name, an environment and a fixed set of directory mounts, and
//! reports how it exited. [`WorkerInvoker`] layers the completion contract on
//! top: a zero exit plus a non-empty sentinel is success, anything else is a
//! failure carrying the captured diagnostics.
mod container;
mod process;

pub use container::ContainerWorker;
pub use process::ProcessWorker;

use crate::sentinel::sentinel_present;
use crate::util::truncate_tail;
use crate::workspace::remove_file_if_exists;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Instant;

/// Upper bound on diagnostics text carried in errors; the tail is kept.
pub const MAX_DIAGNOSTICS_BYTES: usize = 64 * 1024;

/// Directory roles in the worker mount contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MountRole {
    SmallInputs,
    Output,
    Images,
    WorkerCode,
}

impl MountRole {
    /// Path the directory appears at inside a container.
    pub fn container_path(self) -> &'static str {
        match self {
            Self::SmallInputs => "/small_inputs",
            Self::Output => "/output",
            Self::Images => "/images",
            Self::WorkerCode => "/workdir_app/scripts",
        }
    }

    /// Variable exporting the host path to a non-container worker.
    pub fn env_name(self) -> &'static str {
        match self {
            Self::SmallInputs => "ASTRUN_MOUNT_SMALL_INPUTS",
            Self::Output => "ASTRUN_MOUNT_OUTPUT",
            Self::Images => "ASTRUN_MOUNT_IMAGES",
            Self::WorkerCode => "ASTRUN_MOUNT_WORKER_CODE",
        }
    }

    pub fn read_only(self) -> bool {
        !matches!(self, Self::Output)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub role: MountRole,
    pub host: PathBuf,
}

/// One worker launch, built fresh per stage and dropped after the call.
#[derive(Debug, Clone)]
pub struct WorkerInvocation {
    pub module: String,
    pub env: BTreeMap<String, String>,
    pub mounts: Vec<Mount>,
    /// The module drives a GUI and needs a display.
    pub interactive: bool,
    /// Host path the worker's stderr is captured into; inside the output mount.
    pub diagnostics_path: PathBuf,
}

impl WorkerInvocation {
    pub fn mount(&self, role: MountRole) -> Option<&Path> {
        self.mounts
            .iter()
            .find(|mount| mount.role == role)
            .map(|mount| mount.host.as_path())
    }
}

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn describe(&self) -> String {
        match self.code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

impl From<ExitStatus> for WorkerExit {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// Capability to run one worker module to completion.
///
/// Implementations block until the worker exits. An `Err` means the worker
/// could not be launched at all, which is an environment problem rather than
/// a stage failure.
pub trait Worker {
    /// Check that the engine can run workers before any stage starts.
    fn probe(&self) -> Result<()>;

    fn run(&self, invocation: &WorkerInvocation) -> Result<WorkerExit>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Exit(String),
    MissingSentinel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeOutcome {
    Success,
    Failure {
        reason: FailureReason,
        diagnostics: String,
    },
}

/// Launches workers and applies the exit-plus-sentinel completion contract.
pub struct WorkerInvoker<'a> {
    worker: &'a dyn Worker,
}

impl<'a> WorkerInvoker<'a> {
    pub fn new(worker: &'a dyn Worker) -> Self {
        Self { worker }
    }

    /// Run `invocation` once; never retried.
    ///
    /// With an `expected_sentinel`, success additionally requires that file
    /// to exist and be non-empty. A worker exiting non-zero never leaves that
    /// sentinel behind, and the diagnostics file is removed on success.
    pub fn invoke(
        &self,
        invocation: &WorkerInvocation,
        expected_sentinel: Option<&Path>,
    ) -> Result<InvokeOutcome> {
        remove_file_if_exists(&invocation.diagnostics_path)?;

        let start = Instant::now();
        tracing::info!(
            module = %invocation.module,
            interactive = invocation.interactive,
            "launching worker"
        );
        let exit = self
            .worker
            .run(invocation)
            .with_context(|| format!("launch worker module {}", invocation.module))?;
        tracing::info!(
            module = %invocation.module,
            elapsed_ms = start.elapsed().as_millis(),
            status = %exit.describe(),
            "worker exited"
        );

        if !exit.success() {
            if let Some(sentinel) = expected_sentinel {
                remove_file_if_exists(sentinel)?;
            }
            return Ok(InvokeOutcome::Failure {
                reason: FailureReason::Exit(exit.describe()),
                diagnostics: read_diagnostics(&invocation.diagnostics_path)?,
            });
        }

        if let Some(sentinel) = expected_sentinel {
            if !sentinel_present(sentinel)? {
                return Ok(InvokeOutcome::Failure {
                    reason: FailureReason::MissingSentinel,
                    diagnostics: read_diagnostics(&invocation.diagnostics_path)?,
                });
            }
        }

        remove_file_if_exists(&invocation.diagnostics_path)?;
        Ok(InvokeOutcome::Success)
    }
}

/// Read captured diagnostics, tolerating a worker that wrote none.
fn read_diagnostics(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Ok("(no diagnostics captured)".to_string());
    }
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let text = String::from_utf8_lossy(&bytes);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok("(no diagnostics captured)".to_string());
    }
    Ok(truncate_tail(trimmed, MAX_DIAGNOSTICS_BYTES))
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
