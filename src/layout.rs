//! Plate-layout drift detection.
//!
//! A plate layout maps plate positions to strain, drug and concentration, so
//! completed stage outputs are only trustworthy against the layout they were
//! computed from. Layouts are compared as normalized tables, never as bytes:
//! re-saving a spreadsheet changes its bytes without changing its cells.
mod table;

pub use table::{load_table, Table};

use crate::workspace::write_atomic;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Verdict of comparing a supplied layout against the cached baseline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Drift {
    /// No baseline exists yet; the supplied layout becomes it.
    NoBaseline,
    Unchanged,
    Changed { detail: String },
}

/// Compare two normalized tables cell by cell.
pub fn compare(cached: &Table, incoming: &Table) -> Drift {
    match first_difference(cached, incoming) {
        None => Drift::Unchanged,
        Some(detail) => Drift::Changed { detail },
    }
}

/// Describe the first differing cell in row-major order, if any.
fn first_difference(cached: &Table, incoming: &Table) -> Option<String> {
    let (old_rows, new_rows) = (cached.rows(), incoming.rows());
    for row in 0..old_rows.len().max(new_rows.len()) {
        let (Some(old_row), Some(new_row)) = (old_rows.get(row), new_rows.get(row)) else {
            return Some(format!(
                "row count differs ({} cached, {} supplied)",
                old_rows.len(),
                new_rows.len()
            ));
        };
        for col in 0..old_row.len().max(new_row.len()) {
            let old = old_row.get(col).map(String::as_str).unwrap_or_default();
            let new = new_row.get(col).map(String::as_str).unwrap_or_default();
            if old != new {
                return Some(format!(
                    "row {}, column {}: {:?} became {:?}",
                    row + 1,
                    col + 1,
                    old,
                    new
                ));
            }
        }
    }
    None
}

/// The accepted baseline layout as stored inside a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedLayout {
    pub source_name: String,
    pub fingerprint: String,
    pub table: Table,
}

impl CachedLayout {
    pub fn new(source: &Path, table: Table) -> Self {
        let source_name = source
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            source_name,
            fingerprint: table.fingerprint(),
            table,
        }
    }
}

/// Load the cached layout; a missing file means no baseline.
pub fn load_cached(path: &Path) -> Result<Option<CachedLayout>> {
    if !path.is_file() {
        return Ok(None);
    }
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    let cached = serde_json::from_slice(&bytes)
        .with_context(|| format!("parse cached plate layout {}", path.display()))?;
    Ok(Some(cached))
}

pub fn store_cached(path: &Path, cached: &CachedLayout) -> Result<()> {
    let text = serde_json::to_string_pretty(cached).context("serialize cached plate layout")?;
    write_atomic(path, text.as_bytes())
}

/// Classify `incoming` against whatever baseline is cached at `cached_path`.
pub fn detect_drift(cached_path: &Path, incoming: &Table) -> Result<Drift> {
    let verdict = match load_cached(cached_path)? {
        None => Drift::NoBaseline,
        Some(cached) => compare(&cached.table, incoming),
    };
    tracing::info!(verdict = ?verdict, "plate layout drift check");
    Ok(verdict)
}

#[cfg(test)]
#[path = "layout_tests.rs"]
mod tests;
