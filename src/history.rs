//! Run records and the append-only stage history.
//!
//! History is audit output only; sentinels remain the sole authority on what
//! has completed.
use crate::params::{HostOs, RunParameters};
use crate::workspace::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const RUN_RECORD_SCHEMA_VERSION: u32 = 1;

/// Current epoch time in milliseconds for history timestamps.
pub fn now_epoch_ms() -> Result<u128> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("compute timestamp")?
        .as_millis())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryEvent {
    RunStarted,
    Invalidated,
    Skipped,
    Completed,
    Failed,
    StoppedAfter,
    RunFinished,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub at_epoch_ms: u128,
    pub event: HistoryEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u128>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HistoryEntry {
    pub fn new(event: HistoryEvent) -> Result<Self> {
        Ok(Self {
            at_epoch_ms: now_epoch_ms()?,
            event,
            stage: None,
            elapsed_ms: None,
            message: None,
        })
    }

    pub fn stage(mut self, stage: &str) -> Self {
        self.stage = Some(stage.to_string());
        self
    }

    pub fn elapsed_ms(mut self, elapsed_ms: u128) -> Self {
        self.elapsed_ms = Some(elapsed_ms);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// JSONL history file inside a workspace.
#[derive(Debug, Clone)]
pub struct History {
    path: PathBuf,
}

impl History {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Append one entry as a single JSON line.
    pub fn append(&self, entry: &HistoryEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open {}", self.path.display()))?;
        let mut line = serde_json::to_string(entry).context("serialize history entry")?;
        line.push('\n');
        file.write_all(line.as_bytes())
            .with_context(|| format!("write {}", self.path.display()))?;
        Ok(())
    }

    pub fn record(&self, event: HistoryEvent, stage: Option<&str>) -> Result<()> {
        let mut entry = HistoryEntry::new(event)?;
        if let Some(stage) = stage {
            entry = entry.stage(stage);
        }
        self.append(&entry)
    }

    /// Read every entry; a missing file is an empty history.
    pub fn load(&self) -> Result<Vec<HistoryEntry>> {
        if !self.path.is_file() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&self.path)
            .with_context(|| format!("read {}", self.path.display()))?;
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).context("parse history entry"))
            .collect()
    }
}

/// Snapshot of how a run was launched, written at run start.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord<'a> {
    pub schema_version: u32,
    pub started_at_epoch_ms: u128,
    pub pipeline: &'static str,
    pub host_os: HostOs,
    pub params: &'a RunParameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_fingerprint: Option<String>,
}

pub fn write_run_record(path: &Path, record: &RunRecord<'_>) -> Result<()> {
    let text = serde_json::to_string_pretty(record).context("serialize run record")?;
    write_atomic(path, text.as_bytes())
}
