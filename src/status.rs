//! Read-only summary of a workspace's progress.
use crate::history::{History, HistoryEntry};
use crate::layout;
use crate::sentinel::CompletionStore;
use crate::stage::Pipeline;
use crate::workspace::Workspace;
use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    Complete,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageStatus {
    pub stage: &'static str,
    pub interactive: bool,
    pub state: StageState,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    pub workspace: String,
    pub pipeline: Pipeline,
    pub stages: Vec<StageStatus>,
    /// First stage a run would launch, if any.
    pub next_stage: Option<&'static str>,
    pub cached_layout: Option<String>,
    /// Whether a failed stage left its diagnostics behind.
    pub diagnostics_pending: bool,
    pub last_event: Option<HistoryEntry>,
}

pub fn build_status(workspace: &Workspace, pipeline: Pipeline) -> Result<StatusReport> {
    let store = CompletionStore::new(workspace.root());
    let mut stages = Vec::new();
    for stage in pipeline.stages() {
        let state = if store.is_complete(stage)? {
            StageState::Complete
        } else {
            StageState::Pending
        };
        stages.push(StageStatus {
            stage: stage.name,
            interactive: stage.is_interactive(),
            state,
        });
    }
    let next_stage = stages
        .iter()
        .find(|status| status.state == StageState::Pending)
        .map(|status| status.stage);
    let cached_layout = layout::load_cached(&workspace.paths().cached_layout_path())?
        .map(|cached| format!("{} ({})", cached.source_name, short_hash(&cached.fingerprint)));

    Ok(StatusReport {
        workspace: workspace.root().display().to_string(),
        pipeline,
        stages,
        next_stage,
        cached_layout,
        diagnostics_pending: workspace.paths().diagnostics_path().is_file(),
        last_event: History::new(workspace.paths().history_path()).load()?.pop(),
    })
}

pub fn render_json(report: &StatusReport) -> Result<String> {
    serde_json::to_string_pretty(report).context("serialize status")
}

pub fn render_text(report: &StatusReport) -> String {
    let mut lines = vec![
        format!("workspace: {}", report.workspace),
        format!("pipeline: {}", report.pipeline.name()),
    ];
    for status in &report.stages {
        let mark = match status.state {
            StageState::Complete => "complete",
            StageState::Pending => "pending",
        };
        let kind = if status.interactive { " (checkpoint)" } else { "" };
        lines.push(format!("  {:<36} {mark}{kind}", status.stage));
    }
    lines.push(format!(
        "plate layout: {}",
        report.cached_layout.as_deref().unwrap_or("none cached")
    ));
    lines.push(format!(
        "next: {}",
        report.next_stage.unwrap_or("nothing pending")
    ));
    if let Some(entry) = &report.last_event {
        let mut line = format!("last event: {:?}", entry.event);
        if let Some(stage) = &entry.stage {
            line.push(' ');
            line.push_str(stage);
        }
        if let Some(message) = &entry.message {
            line.push_str(&format!(" ({message})"));
        }
        lines.push(line);
    }
    if report.diagnostics_pending {
        lines.push(format!(
            "diagnostics from the last failure: {}",
            crate::paths::DIAGNOSTICS_FILE
        ));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn short_hash(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}
