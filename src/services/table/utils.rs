use std::collections::HashSet;
use calamine::Data;
use once_cell::sync::Lazy;
use polars::prelude::*;
use regex::Regex;
use crate::error::AppError;
use crate::models::{CellValue, FileType};

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w]").expect("valid regex"));

/// Suggested canonical name for every original column, index-aligned.
///
/// Each name is trimmed, whitespace runs become `_`, anything that is not a
/// letter, digit or `_` is dropped and the result is lowercased. An empty
/// result becomes `col`. Repeats get `_2`, `_3`, ... so suggestions are unique.
pub fn suggest_column_names(columns: &[String]) -> Vec<String> {
    let mut existing_names = HashSet::new();
    columns
        .iter()
        .map(|name| unique_name(suggest_column_name(name), &mut existing_names))
        .collect()
}

pub fn suggest_column_name(name: &str) -> String {
    let underscored = WHITESPACE_RUN.replace_all(name.trim(), "_");
    let cleaned = NON_WORD.replace_all(&underscored, "").to_lowercase();
    if cleaned.is_empty() {
        "col".to_string()
    } else {
        cleaned
    }
}

fn unique_name(base: String, existing_names: &mut HashSet<String>) -> String {
    let mut candidate = base.clone();
    let mut counter = 2;
    while !existing_names.insert(candidate.clone()) {
        candidate = format!("{}_{}", base, counter);
        counter += 1;
    }
    candidate
}

/// Header row of a spreadsheet as column names: blanks become `Unnamed: <idx>`,
/// repeats get a `.1`, `.2`, ... suffix.
pub fn dedupe_headers(raw: &[Data]) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.iter()
        .enumerate()
        .map(|(idx, cell)| {
            let base = match cell_text(cell) {
                Some(text) if !text.trim().is_empty() => text,
                _ => format!("Unnamed: {}", idx),
            };
            let mut name = base.clone();
            let mut counter = 1;
            while !seen.insert(name.clone()) {
                name = format!("{}.{}", base, counter);
                counter += 1;
            }
            name
        })
        .collect()
}

/// The one missing-value rule shared by parsing and set operations: a null
/// cell, or an empty string coming from a CSV source.
pub fn is_missing(value: &CellValue, file_type: FileType) -> bool {
    match value {
        CellValue::Null => true,
        CellValue::Text(s) => file_type == FileType::Csv && s.is_empty(),
        _ => false,
    }
}

/// Textual form of a spreadsheet cell; `None` for empty and error cells.
pub fn cell_text(cell: &Data) -> Option<String> {
    match cell {
        Data::Empty | Data::Error(_) => None,
        Data::String(s) => Some(s.clone()),
        Data::Int(i) => Some(i.to_string()),
        Data::Float(f) => Some(CellValue::from_float(*f).to_export_text()),
        Data::Bool(b) => Some(CellValue::Bool(*b).to_export_text()),
        Data::DateTime(d) => Some(
            d.as_datetime()
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| d.as_f64().to_string()),
        ),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Some(s.clone()),
    }
}

/// Typed value of one spreadsheet cell. Dates become text.
pub fn cell_value(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Null,
        Data::Int(i) => CellValue::Int(*i),
        Data::Float(f) => CellValue::from_float(*f),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::String(s) => CellValue::Text(s.clone()),
        Data::DateTime(_) | Data::DateTimeIso(_) | Data::DurationIso(_) => {
            cell_text(cell).map_or(CellValue::Null, CellValue::Text)
        }
    }
}

/// Every value of a column as a `CellValue`, in row order.
pub fn column_values(series: &Series) -> Result<Vec<CellValue>, AppError> {
    let values: Vec<CellValue> = match series.dtype() {
        DataType::String => series
            .str()?
            .into_iter()
            .map(|v| v.map_or(CellValue::Null, |s| CellValue::Text(s.to_string())))
            .collect(),
        DataType::Boolean => series
            .bool()?
            .into_iter()
            .map(|v| v.map_or(CellValue::Null, CellValue::Bool))
            .collect(),
        DataType::Int64 => series
            .i64()?
            .into_iter()
            .map(|v| v.map_or(CellValue::Null, CellValue::Int))
            .collect(),
        DataType::Int32 => series
            .i32()?
            .into_iter()
            .map(|v| v.map_or(CellValue::Null, |i| CellValue::Int(i as i64)))
            .collect(),
        DataType::Float64 => series
            .f64()?
            .into_iter()
            .map(|v| v.map_or(CellValue::Null, CellValue::from_float))
            .collect(),
        DataType::Float32 => series
            .f32()?
            .into_iter()
            .map(|v| v.map_or(CellValue::Null, |f| CellValue::from_float(f as f64)))
            .collect(),
        _ => {
            let as_text = series.cast(&DataType::String)?;
            return column_values(&as_text);
        }
    };
    Ok(values)
}

pub fn cell_to_json(value: &CellValue) -> serde_json::Value {
    match value {
        CellValue::Null => serde_json::Value::Null,
        CellValue::Bool(b) => serde_json::Value::Bool(*b),
        CellValue::Int(i) => serde_json::Value::from(*i),
        CellValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        CellValue::Text(s) => serde_json::Value::String(s.clone()),
    }
}
