use polars::prelude::DataFrame;
use crate::error::AppError;
use crate::models::CellValue;
use super::utils::column_values;

/// A parsed file or sheet, held column by column.
///
/// Every cell keeps its own scalar type, so a spreadsheet column mixing
/// numbers and text keeps its numbers as numbers.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    cells: Vec<Vec<CellValue>>,
    height: usize,
}

impl Table {
    pub fn new(columns: Vec<String>, cells: Vec<Vec<CellValue>>) -> Result<Self, AppError> {
        if columns.len() != cells.len() {
            return Err(AppError::Internal(format!(
                "{} column names for {} columns",
                columns.len(),
                cells.len()
            )));
        }
        let height = cells.first().map_or(0, Vec::len);
        if let Some(name) = columns
            .iter()
            .zip(&cells)
            .find_map(|(name, values)| (values.len() != height).then_some(name))
        {
            return Err(AppError::ParseError(format!("Column '{}' has a different row count", name)));
        }
        Ok(Self { columns, cells, height })
    }

    /// Converts a polars frame, keeping its column order.
    pub fn from_frame(df: &DataFrame) -> Result<Self, AppError> {
        let columns = df
            .get_column_names()
            .iter()
            .map(|name| name.to_string())
            .collect();
        let cells = df
            .get_columns()
            .iter()
            .map(column_values)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(columns, cells)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> Option<&[CellValue]> {
        self.cells.get(idx).map(Vec::as_slice)
    }

    pub fn iter_columns(&self) -> impl Iterator<Item = (&String, &[CellValue])> {
        self.columns.iter().zip(self.cells.iter().map(Vec::as_slice))
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }
}
