//! Stage sequencing with resume, drift invalidation and early stop.
//!
//! A run walks the pipeline's fixed stage list in order. Sentinels decide
//! what is skipped, the plate-layout drift gate decides whether prior
//! sentinels can be trusted at all, and a failure leaves the workspace
//! exactly as far as it got so the next invocation resumes from there.
use crate::checkpoint::Checkpoint;
use crate::error::PipelineError;
use crate::history::{History, HistoryEntry, HistoryEvent, RunRecord, RUN_RECORD_SCHEMA_VERSION};
use crate::layout::{self, CachedLayout, Drift, Table};
use crate::params::{HostOs, RunParameters};
use crate::sentinel::CompletionStore;
use crate::stage::{Pipeline, Stage, StageKind};
use crate::worker::{FailureReason, InvokeOutcome, Mount, MountRole, WorkerInvocation, WorkerInvoker};
use crate::workspace::Workspace;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// What to do when the supplied plate layout differs from the cached one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriftPolicy {
    /// Warn, wait out the grace period, then wipe the workspace.
    Invalidate { grace: Duration },
    /// Wipe the workspace before running, whatever the layout says.
    Replace,
    /// Warn and keep every existing sentinel.
    Keep,
}

/// An input file copied into the small-inputs mount under a fixed name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInput {
    pub source: PathBuf,
    pub name: String,
}

/// Host-side inputs of one run.
#[derive(Debug, Clone, Default)]
pub struct RunInputs {
    /// Layout checked for drift; it must also appear in `staged`.
    pub plate_layout: Option<PathBuf>,
    pub staged: Vec<StagedInput>,
    pub images: Option<PathBuf>,
    pub worker_code: Option<PathBuf>,
}

/// What a successful run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub executed: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
    pub invalidated: bool,
    /// Set when a stop-after directive ended the run early.
    pub stopped_after: Option<&'static str>,
}

pub struct Sequencer<'a> {
    pipeline: Pipeline,
    workspace: &'a Workspace,
    params: &'a RunParameters,
    inputs: &'a RunInputs,
    invoker: WorkerInvoker<'a>,
    checkpoint: Checkpoint,
    drift_policy: DriftPolicy,
    host_os: HostOs,
    store: CompletionStore,
    history: History,
}

impl<'a> Sequencer<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pipeline: Pipeline,
        workspace: &'a Workspace,
        params: &'a RunParameters,
        inputs: &'a RunInputs,
        invoker: WorkerInvoker<'a>,
        checkpoint: Checkpoint,
        drift_policy: DriftPolicy,
        host_os: HostOs,
    ) -> Self {
        Self {
            pipeline,
            workspace,
            params,
            inputs,
            invoker,
            checkpoint,
            drift_policy,
            host_os,
            store: CompletionStore::new(workspace.root()),
            history: History::new(workspace.paths().history_path()),
        }
    }

    /// Execute every stage that has not completed yet, in order.
    pub fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::default();
        let incoming_layout = self.load_incoming_layout()?;
        report.invalidated = self.gate_drift(incoming_layout.as_ref())?;

        self.workspace.prepare()?;
        for input in &self.inputs.staged {
            self.workspace.stage_input(&input.source, &input.name)?;
        }
        self.record_run_start(incoming_layout.as_ref())?;

        let stages = self.pipeline.stages();
        for (index, stage) in stages.iter().enumerate() {
            if self.store.is_complete(stage)? {
                tracing::info!(stage = stage.name, "stage already complete; skipping");
                self.history.record(HistoryEvent::Skipped, Some(stage.name))?;
                report.skipped.push(stage.name);
            } else {
                self.execute(stage)?;
                report.executed.push(stage.name);
            }

            // Stopping after the last stage is a full run and still cleans up.
            if self.params.stops_after(stage.name) && index + 1 < stages.len() {
                tracing::info!(stage = stage.name, "stopping after stage as requested");
                self.history
                    .record(HistoryEvent::StoppedAfter, Some(stage.name))?;
                report.stopped_after = Some(stage.name);
                return Ok(report);
            }
        }

        self.finish()?;
        Ok(report)
    }

    fn load_incoming_layout(&self) -> Result<Option<(PathBuf, Table)>> {
        let Some(path) = &self.inputs.plate_layout else {
            return Ok(None);
        };
        let table = layout::load_table(path)
            .with_context(|| format!("load plate layout {}", path.display()))?;
        Ok(Some((path.clone(), table)))
    }

    /// Decide whether prior sentinels survive; returns true if the workspace was wiped.
    fn gate_drift(&self, incoming: Option<&(PathBuf, Table)>) -> Result<bool> {
        if self.drift_policy == DriftPolicy::Replace {
            if self.workspace.has_content()? {
                self.workspace.wipe()?;
                self.history.append(
                    &HistoryEntry::new(HistoryEvent::Invalidated)?.message("replace requested"),
                )?;
                return Ok(true);
            }
            return Ok(false);
        }

        let Some((path, table)) = incoming else {
            return Ok(false);
        };
        let cached_path = self.workspace.paths().cached_layout_path();
        let verdict = match layout::detect_drift(&cached_path, table)? {
            Drift::NoBaseline if !self.store.completed(self.pipeline.stages())?.is_empty() => {
                Drift::Changed {
                    detail: "completed stages exist but no cached plate layout to verify them against"
                        .to_string(),
                }
            }
            verdict => verdict,
        };
        let Drift::Changed { detail } = verdict else {
            return Ok(false);
        };

        match self.drift_policy {
            DriftPolicy::Keep => {
                eprintln!(
                    "WARNING: plate layout {} differs from the one this workspace was computed with ({detail}); keeping existing results as requested.",
                    path.display()
                );
                tracing::warn!(%detail, "plate layout drift ignored");
                Ok(false)
            }
            DriftPolicy::Invalidate { grace } => {
                eprintln!(
                    "WARNING: plate layout {} differs from the one this workspace was computed with ({detail}).\nAll previous results in {} will be removed in {} seconds; interrupt now to keep them.",
                    path.display(),
                    self.workspace.root().display(),
                    grace.as_secs()
                );
                thread::sleep(grace);
                self.workspace.wipe()?;
                self.history.append(
                    &HistoryEntry::new(HistoryEvent::Invalidated)?.message(detail),
                )?;
                Ok(true)
            }
            DriftPolicy::Replace => Ok(false),
        }
    }

    fn record_run_start(&self, incoming: Option<&(PathBuf, Table)>) -> Result<()> {
        let paths = self.workspace.paths();
        let mut fingerprint = None;
        if let Some((path, table)) = incoming {
            let cached_path = paths.cached_layout_path();
            // An existing baseline is only replaced by an invalidation.
            let cached = match layout::load_cached(&cached_path)? {
                Some(cached) => cached,
                None => {
                    let cached = CachedLayout::new(path, table.clone());
                    layout::store_cached(&cached_path, &cached)?;
                    cached
                }
            };
            fingerprint = Some(cached.fingerprint);
        }
        let record = RunRecord {
            schema_version: RUN_RECORD_SCHEMA_VERSION,
            started_at_epoch_ms: crate::history::now_epoch_ms()?,
            pipeline: self.pipeline.name(),
            host_os: self.host_os,
            params: self.params,
            layout_fingerprint: fingerprint,
        };
        crate::history::write_run_record(&paths.run_parameters_path(), &record)?;
        self.history.append(
            &HistoryEntry::new(HistoryEvent::RunStarted)?.message(self.pipeline.name()),
        )
    }

    fn execute(&self, stage: &Stage) -> Result<()> {
        let start = Instant::now();
        tracing::info!(stage = stage.name, "running stage");
        let result = match stage.kind {
            StageKind::Automated => self.run_automated(stage),
            StageKind::Interactive { .. } => self.checkpoint.resolve(
                stage,
                self.workspace.root(),
                &self.store,
                |module| self.run_presenter(stage, module),
            ),
        };
        let elapsed_ms = start.elapsed().as_millis();

        let result = result.and_then(|()| {
            if self.store.is_complete(stage)? {
                Ok(())
            } else {
                Err(PipelineError::MissingSentinel {
                    stage: stage.name.to_string(),
                    sentinel: stage.sentinel.to_string(),
                    diagnostics: String::new(),
                }
                .into())
            }
        });

        match &result {
            Ok(()) => {
                tracing::info!(stage = stage.name, elapsed_ms, "stage complete");
                self.history.append(
                    &HistoryEntry::new(HistoryEvent::Completed)?
                        .stage(stage.name)
                        .elapsed_ms(elapsed_ms),
                )?;
            }
            Err(err) => {
                tracing::error!(stage = stage.name, elapsed_ms, error = %err, "stage failed");
                self.history.append(
                    &HistoryEntry::new(HistoryEvent::Failed)?
                        .stage(stage.name)
                        .elapsed_ms(elapsed_ms)
                        .message(err.to_string()),
                )?;
            }
        }
        result
    }

    fn run_automated(&self, stage: &Stage) -> Result<()> {
        let invocation = self.invocation(stage.module(), false);
        let sentinel = self.store.sentinel_path(stage);
        let outcome = self.invoker.invoke(&invocation, Some(&sentinel))?;
        outcome_to_result(stage, outcome)
    }

    fn run_presenter(&self, stage: &Stage, module: &str) -> Result<()> {
        let invocation = self.invocation(module, true);
        let outcome = self.invoker.invoke(&invocation, None)?;
        outcome_to_result(stage, outcome)
    }

    fn invocation(&self, module: &str, interactive: bool) -> WorkerInvocation {
        let paths = self.workspace.paths();
        let mut mounts = vec![
            Mount {
                role: MountRole::SmallInputs,
                host: paths.small_inputs_dir(),
            },
            Mount {
                role: MountRole::Output,
                host: paths.root().to_path_buf(),
            },
        ];
        if let Some(images) = &self.inputs.images {
            mounts.push(Mount {
                role: MountRole::Images,
                host: images.clone(),
            });
        }
        if let Some(code) = &self.inputs.worker_code {
            mounts.push(Mount {
                role: MountRole::WorkerCode,
                host: code.clone(),
            });
        }
        WorkerInvocation {
            module: module.to_string(),
            env: self.params.worker_env(),
            mounts,
            interactive,
            diagnostics_path: paths.diagnostics_path(),
        }
    }

    /// Remove sentinels and scratch once every stage has succeeded.
    fn finish(&self) -> Result<()> {
        self.store.clear_all(self.pipeline.stages())?;
        if !self.params.keep_tmp_files {
            self.workspace.remove_scratch()?;
        }
        self.history.record(HistoryEvent::RunFinished, None)?;
        tracing::info!(pipeline = self.pipeline.name(), "pipeline finished");
        Ok(())
    }
}

fn outcome_to_result(stage: &Stage, outcome: InvokeOutcome) -> Result<()> {
    match outcome {
        InvokeOutcome::Success => Ok(()),
        InvokeOutcome::Failure {
            reason: FailureReason::Exit(reason),
            diagnostics,
        } => Err(PipelineError::StageFailed {
            stage: stage.name.to_string(),
            reason,
            diagnostics,
        }
        .into()),
        InvokeOutcome::Failure {
            reason: FailureReason::MissingSentinel,
            diagnostics,
        } => Err(PipelineError::MissingSentinel {
            stage: stage.name.to_string(),
            sentinel: stage.sentinel.to_string(),
            diagnostics,
        }
        .into()),
    }
}

#[cfg(test)]
#[path = "sequencer_tests.rs"]
mod tests;
