use super::types::Table;
use super::utils::*;
use crate::models::{FileType, NaCell, Parsed, PreviewRow};

/// Caps applied while summarizing a table.
#[derive(Debug, Clone, Copy)]
pub struct AnalysisLimits {
    pub preview_rows: usize,
    pub max_na_cells: usize,
}

pub struct TableAnalyzer {
    limits: AnalysisLimits,
}

impl TableAnalyzer {
    pub fn new(limits: AnalysisLimits) -> Self {
        Self { limits }
    }

    pub fn analyze(&self, table: &Table, file_type: FileType) -> Parsed {
        let start = std::time::Instant::now();

        let columns_original = table.columns().to_vec();
        let columns_suggestions = suggest_column_names(&columns_original);
        let na_cells = self.find_na_cells(table, file_type);
        let preview_rows = self.preview_rows(table);

        tracing::info!(
            "Analyzed {} rows x {} columns in {:?}, {} missing cells reported",
            table.height(),
            columns_original.len(),
            start.elapsed(),
            na_cells.len()
        );

        Parsed {
            columns_original,
            columns_suggestions,
            na_cells,
            preview_rows,
        }
    }

    /// Missing cells in row-major order, rows counted from 1.
    fn find_na_cells(&self, table: &Table, file_type: FileType) -> Vec<NaCell> {
        let mut out = Vec::new();

        for row in 0..table.height() {
            for (name, values) in table.iter_columns() {
                if !is_missing(&values[row], file_type) {
                    continue;
                }
                out.push(NaCell {
                    row: row + 1,
                    col: name.clone(),
                });
                if out.len() >= self.limits.max_na_cells {
                    tracing::debug!("Missing-cell report truncated at {}", out.len());
                    return out;
                }
            }
        }
        out
    }

    fn preview_rows(&self, table: &Table) -> Vec<PreviewRow> {
        (0..table.height().min(self.limits.preview_rows))
            .map(|row| {
                table
                    .iter_columns()
                    .map(|(name, values)| (name.clone(), cell_to_json(&values[row])))
                    .collect()
            })
            .collect()
    }
}
