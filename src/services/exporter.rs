use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Arc;
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use ::zip::write::SimpleFileOptions;
use ::zip::{CompressionMethod, ZipWriter};
use crate::error::AppError;
use crate::models::{CellValue, FileType};
use crate::services::session_store::SessionStore;
use crate::services::set_ops::member_key;
use crate::services::table::Table;

const XLSX_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl std::str::FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            _ => Err(AppError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// A finished download.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Full value set of a stored result as a one-column `value` table.
pub fn export_result<S: SessionStore>(
    store: &S,
    session_id: &str,
    result_id: &str,
    format: &str,
) -> Result<ExportFile, AppError> {
    let values = store.read_session(session_id, |session| {
        Ok(session.result(result_id)?.values.clone())
    })?;
    let format: ExportFormat = format.parse()?;
    let texts: Vec<String> = values.iter().map(CellValue::to_export_text).collect();

    let file = match format {
        ExportFormat::Csv => ExportFile {
            filename: "result.csv".to_string(),
            content_type: "text/csv; charset=utf-8",
            bytes: values_to_csv(&texts)?,
        },
        ExportFormat::Xlsx => ExportFile {
            filename: "result.xlsx".to_string(),
            content_type: XLSX_CONTENT_TYPE,
            bytes: values_to_xlsx(&texts)?,
        },
    };
    tracing::info!("Exported result {} ({} values) as {}", result_id, texts.len(), file.filename);
    Ok(file)
}

/// Quoted UTF-8 CSV with a BOM so spreadsheet tools keep the text as is.
fn values_to_csv(texts: &[String]) -> Result<Vec<u8>, AppError> {
    let mut buf = UTF8_BOM.to_vec();
    {
        let mut writer = csv::WriterBuilder::new()
            .quote_style(csv::QuoteStyle::Always)
            .from_writer(&mut buf);
        writer.write_record(["value"])?;
        for text in texts {
            writer.write_record([text])?;
        }
        writer.flush()?;
    }
    Ok(buf)
}

fn values_to_xlsx(texts: &[String]) -> Result<Vec<u8>, AppError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("result")?;
    let text_format = Format::new().set_num_format("@");
    sheet.set_column_width(0, 40)?;
    sheet.set_column_format(0, &text_format)?;

    sheet.write_string(0, 0, "value")?;
    for (idx, text) in texts.iter().enumerate() {
        sheet.write_string_with_format(xlsx_row(idx + 1)?, 0, text, &text_format)?;
    }
    Ok(workbook.save_to_buffer()?)
}

fn xlsx_row(idx: usize) -> Result<u32, AppError> {
    u32::try_from(idx).map_err(|_| AppError::ExportError(format!("row {} exceeds sheet size", idx)))
}

/// Rows of each file whose `column_name` cell, trimmed, is in the result.
/// One file gives a single workbook, several give a zip of workbooks.
pub fn export_raw<S: SessionStore>(
    store: &S,
    session_id: &str,
    result_id: &str,
    file_ids: &[String],
    column_name: &str,
) -> Result<ExportFile, AppError> {
    if file_ids.is_empty() {
        return Err(AppError::InvalidInput("No files selected for export".to_string()));
    }

    let (values, sources) = store.read_session(session_id, |session| {
        let values = session.result(result_id)?.values.clone();
        let sources = file_ids
            .iter()
            .map(|id| {
                let file = session.files.get(id)?;
                let parsed = file.parsed()?;
                let idx = file
                    .columns_normalized
                    .as_ref()
                    .and_then(|cols| cols.iter().position(|c| c == column_name))
                    .or_else(|| {
                        parsed.summary.columns_original.iter().position(|c| c == column_name)
                    })
                    .ok_or_else(|| AppError::ColumnNotFound {
                        file: file.filename.clone(),
                        column: column_name.to_string(),
                    })?;
                Ok(RawSource {
                    filename: file.filename.clone(),
                    file_type: file.file_type,
                    table: parsed.table.clone(),
                    column_idx: idx,
                })
            })
            .collect::<Result<Vec<_>, AppError>>()?;
        Ok((values, sources))
    })?;

    let order: HashMap<&CellValue, usize> = values.iter().enumerate().map(|(i, v)| (v, i)).collect();

    let mut filtered = Vec::with_capacity(sources.len());
    for source in &sources {
        let rows = matching_rows(source, &order)?;
        tracing::debug!(
            "{}: kept {} of {} rows",
            source.filename,
            rows.len(),
            source.table.height()
        );
        filtered.push((filtered_name(&source.filename), rows_to_xlsx(&source.table, &rows)?));
    }

    let file = if filtered.len() == 1 {
        let (filename, bytes) = filtered.remove(0);
        ExportFile { filename, content_type: XLSX_CONTENT_TYPE, bytes }
    } else {
        ExportFile {
            filename: "filtered_data.zip".to_string(),
            content_type: "application/zip",
            bytes: zip_files(&filtered)?,
        }
    };
    tracing::info!(
        "Raw export of result {} over {} files on '{}' as {}",
        result_id,
        sources.len(),
        column_name,
        file.filename
    );
    Ok(file)
}

struct RawSource {
    filename: String,
    file_type: FileType,
    table: Arc<Table>,
    column_idx: usize,
}

/// Indices of matching rows, ordered by the matched value's position in the
/// result and then by original row order.
fn matching_rows(
    source: &RawSource,
    order: &HashMap<&CellValue, usize>,
) -> Result<Vec<usize>, AppError> {
    let values = source.table.column(source.column_idx).ok_or_else(|| {
        AppError::Internal(format!("column {} missing from {}", source.column_idx, source.filename))
    })?;

    let mut matches: Vec<(usize, usize)> = values
        .iter()
        .enumerate()
        .filter_map(|(row, value)| {
            order
                .get(&member_key(value, source.file_type))
                .map(|position| (*position, row))
        })
        .collect();
    matches.sort_unstable();
    Ok(matches.into_iter().map(|(_, row)| row).collect())
}

fn filtered_name(filename: &str) -> String {
    let stem = std::path::Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("file");
    format!("{}_filtered.xlsx", stem)
}

fn rows_to_xlsx(table: &Table, rows: &[usize]) -> Result<Vec<u8>, AppError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("filtered")?;

    for (col, (name, values)) in table.iter_columns().enumerate() {
        let col = u16::try_from(col)
            .map_err(|_| AppError::ExportError(format!("column {} exceeds sheet size", col)))?;
        sheet.write_string(0, col, name)?;
        for (out_row, &row) in rows.iter().enumerate() {
            write_cell(sheet, xlsx_row(out_row + 1)?, col, &values[row])?;
        }
    }
    Ok(workbook.save_to_buffer()?)
}

fn write_cell(sheet: &mut Worksheet, row: u32, col: u16, value: &CellValue) -> Result<(), AppError> {
    match value {
        CellValue::Null => {}
        CellValue::Bool(b) => {
            sheet.write_boolean(row, col, *b)?;
        }
        CellValue::Int(i) => {
            sheet.write_number(row, col, *i as f64)?;
        }
        CellValue::Float(f) => {
            sheet.write_number(row, col, *f)?;
        }
        CellValue::Text(s) => {
            sheet.write_string(row, col, s)?;
        }
    }
    Ok(())
}

fn zip_files(files: &[(String, Vec<u8>)]) -> Result<Vec<u8>, AppError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for (name, bytes) in files {
        zip.start_file(name.as_str(), options)?;
        zip.write_all(bytes)?;
    }
    Ok(zip.finish()?.into_inner())
}
