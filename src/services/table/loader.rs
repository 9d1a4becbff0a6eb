use super::utils::*;
use std::io::Cursor;
use bytes::Bytes;
use calamine::{open_workbook_auto_from_rs, Reader};
use polars::prelude::*;
use crate::error::AppError;
use crate::models::{CellValue, FileType};
use super::types::Table;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const CSV_SCHEMA_INFERENCE_ROWS: usize = 1000;
const CSV_NULL_TOKENS: [&str; 4] = ["NA", "N/A", "null", "None"];

/// File type from the extension, case-insensitive.
pub fn detect_file_type(filename: &str) -> Result<FileType, AppError> {
    let name = filename.to_lowercase();
    if name.ends_with(".csv") {
        Ok(FileType::Csv)
    } else if name.ends_with(".xlsx") || name.ends_with(".xls") {
        Ok(FileType::Excel)
    } else {
        Err(AppError::UnsupportedFileType(filename.to_string()))
    }
}

/// Sheet names of a workbook, without loading any sheet contents.
pub fn excel_sheet_names(content: &Bytes) -> Result<Vec<String>, AppError> {
    let workbook = open_workbook_auto_from_rs(Cursor::new(content.clone()))
        .map_err(|e| {
            tracing::error!("Failed to open Excel file: {}", e);
            AppError::ParseError(format!("Failed to open Excel file: {}", e))
        })?;
    Ok(workbook.sheet_names().to_vec())
}

/// Reads one file (and sheet, for workbooks) into a table whose column
/// names are the source headers, in source order.
pub fn read_table(
    content: &Bytes,
    file_type: FileType,
    sheet_name: Option<&str>,
) -> Result<Table, AppError> {
    match file_type {
        FileType::Csv => Table::from_frame(&read_csv(content)?),
        FileType::Excel => {
            let sheet_name = sheet_name
                .ok_or_else(|| AppError::SheetRequired("Excel files need a sheet name".to_string()))?;
            read_excel_sheet(content, sheet_name)
        }
    }
}

/// Tries a bounded schema inference first, then a full scan for columns whose
/// type changes late in the file, then lossy decoding for non UTF-8 input.
fn read_csv(content: &Bytes) -> Result<DataFrame, AppError> {
    let body = content.strip_prefix(UTF8_BOM).unwrap_or(&content[..]);

    let attempts = [
        ("utf-8", CsvEncoding::Utf8, Some(CSV_SCHEMA_INFERENCE_ROWS)),
        ("utf-8", CsvEncoding::Utf8, None),
        ("lossy utf-8", CsvEncoding::LossyUtf8, None),
    ];
    let mut last_error = None;
    for (label, encoding, infer_rows) in attempts {
        match read_csv_with(body, encoding, infer_rows) {
            Ok(df) => return Ok(df),
            Err(e) => {
                tracing::warn!(
                    "CSV read failed ({}, inference rows {:?}): {}",
                    label,
                    infer_rows,
                    e
                );
                last_error = Some(e);
            }
        }
    }
    Err(AppError::ParseError(format!(
        "Failed to read CSV: {}",
        last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string())
    )))
}

fn read_csv_with(
    body: &[u8],
    encoding: CsvEncoding,
    infer_rows: Option<usize>,
) -> PolarsResult<DataFrame> {
    let null_tokens = CSV_NULL_TOKENS.iter().map(|s| s.to_string()).collect();
    CsvReader::new(Cursor::new(body.to_vec()))
        .has_header(true)
        .infer_schema(infer_rows)
        .with_encoding(encoding)
        .with_null_values(Some(NullValues::AllColumns(null_tokens)))
        .finish()
}

fn read_excel_sheet(content: &Bytes, sheet_name: &str) -> Result<Table, AppError> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(content.clone()))
        .map_err(|e| AppError::ParseError(format!("Failed to open Excel file: {}", e)))?;

    let range = workbook
        .worksheet_range(sheet_name)
        .map_err(|e| AppError::ParseError(format!("Failed to read worksheet {}: {}", sheet_name, e)))?;

    let mut rows = range.rows();
    let Some(header_row) = rows.next() else {
        tracing::warn!("Sheet {} is empty", sheet_name);
        return Ok(Table::default());
    };
    let headers = dedupe_headers(header_row);

    let mut cells: Vec<Vec<CellValue>> = vec![Vec::new(); headers.len()];
    for row in rows {
        for (col_idx, column) in cells.iter_mut().enumerate() {
            column.push(row.get(col_idx).map_or(CellValue::Null, cell_value));
        }
    }
    tracing::debug!(
        "Read sheet {} with {} rows and {} columns",
        sheet_name,
        cells.first().map_or(0, Vec::len),
        headers.len()
    );
    Table::new(headers, cells)
}
