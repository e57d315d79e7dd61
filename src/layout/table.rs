//! Format-independent table representation and loaders.
use crate::util::sha256_hex;
use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A rectangular-ish grid of normalized cell text.
///
/// Construction always normalizes, so two tables compare equal exactly when
/// their meaningful content matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn from_rows<I, R, S>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut rows: Vec<Vec<String>> = rows
            .into_iter()
            .map(|row| {
                let mut cells: Vec<String> = row
                    .into_iter()
                    .map(|cell| normalize_cell(cell.as_ref()))
                    .collect();
                while cells.last().is_some_and(String::is_empty) {
                    cells.pop();
                }
                cells
            })
            .collect();

        while rows.last().is_some_and(Vec::is_empty) {
            rows.pop();
        }
        let leading_rows = rows.iter().take_while(|row| row.is_empty()).count();
        rows.drain(..leading_rows);

        let leading_cols = rows
            .iter()
            .filter(|row| !row.is_empty())
            .map(|row| row.iter().take_while(|cell| cell.is_empty()).count())
            .min()
            .unwrap_or(0);
        if leading_cols > 0 {
            for row in &mut rows {
                let cut = leading_cols.min(row.len());
                row.drain(..cut);
            }
        }
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Stable content hash, recorded alongside runs for auditing.
    pub fn fingerprint(&self) -> String {
        let mut buf = Vec::new();
        for row in &self.rows {
            for cell in row {
                buf.extend_from_slice(cell.as_bytes());
                buf.push(0x1f);
            }
            buf.push(0x1e);
        }
        sha256_hex(&buf)
    }
}

/// Canonical text for one cell: trimmed, with plain decimals in a single
/// spelling.
///
/// `"1"`, `"1.0"` and `" 1.00 "` all normalize to `"1"` and `"0.10"` to
/// `"0.1"`. Text that only parses as a number in another notation, such as
/// `"007"` or `"1e3"`, is kept as written.
pub fn normalize_cell(raw: &str) -> String {
    let trimmed = raw.trim();
    if is_plain_decimal(trimmed) {
        if let Ok(value) = trimmed.parse::<f64>() {
            if value.is_finite() {
                return format_number(value);
            }
        }
    }
    trimmed.to_string()
}

/// Optional sign, digits without a redundant leading zero, optional fraction.
fn is_plain_decimal(text: &str) -> bool {
    let unsigned = text
        .strip_prefix('-')
        .or_else(|| text.strip_prefix('+'))
        .unwrap_or(text);
    let (whole, fraction) = match unsigned.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (unsigned, None),
    };
    let all_digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if !all_digits(whole) || (whole.len() > 1 && whole.starts_with('0')) {
        return false;
    }
    match fraction {
        Some(fraction) => all_digits(fraction),
        None => true,
    }
}

fn format_number(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    if value.fract() == 0.0 && value.abs() < 1e15 {
        return format!("{}", value as i64);
    }
    format!("{value}")
}

/// Load a table from a spreadsheet or delimited text file, by extension.
pub fn load_table(path: &Path) -> Result<Table> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let table = match extension.as_str() {
        "xlsx" | "xlsm" | "xlsb" | "xls" | "ods" => load_workbook(path)?,
        "csv" => load_delimited(path, b',')?,
        "tsv" | "tab" | "txt" => load_delimited(path, b'\t')?,
        other => {
            return Err(anyhow!(
                "unsupported table format {:?} for {}",
                other,
                path.display()
            ))
        }
    };
    tracing::debug!(path = %path.display(), rows = table.rows().len(), "loaded table");
    Ok(table)
}

fn load_workbook(path: &Path) -> Result<Table> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("open workbook {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| anyhow!("{} has no worksheets", path.display()))?
        .with_context(|| format!("read first worksheet of {}", path.display()))?;
    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect();
    Ok(Table::from_rows(rows))
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(text) => text.clone(),
        Data::Float(value) => format_number(*value),
        Data::Int(value) => value.to_string(),
        Data::Bool(value) => value.to_string(),
        other => other.to_string(),
    }
}

fn load_delimited(path: &Path, delimiter: u8) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.with_context(|| format!("parse {}", path.display()))?;
        rows.push(record.iter().map(str::to_string).collect::<Vec<_>>());
    }
    Ok(Table::from_rows(rows))
}
