use std::sync::Arc;
use crate::error::AppError;
use crate::models::{FileType, Parsed};
use crate::services::session_store::{ParsedTable, SessionStore};
use crate::services::table::{read_table, TableAnalyzer};

/// Reads `file_id` (and `sheet_name` for workbooks), caches the table on the
/// file and returns its column summary. Re-parsing overwrites the cache.
pub fn parse<S: SessionStore>(
    store: &S,
    analyzer: &TableAnalyzer,
    session_id: &str,
    file_id: &str,
    sheet_name: Option<&str>,
) -> Result<Parsed, AppError> {
    let start = std::time::Instant::now();

    let file = store.read_session(session_id, |session| Ok(session.files.get(file_id)?.clone()))?;

    let sheet_name = sheet_name.filter(|s| !s.is_empty());
    if file.file_type == FileType::Excel {
        match sheet_name {
            None => {
                return Err(AppError::SheetRequired(format!(
                    "{} is a workbook, choose one of {:?}",
                    file.filename, file.sheet_names
                )))
            }
            Some(name) if !file.sheet_names.iter().any(|s| s == name) => {
                return Err(AppError::SheetRequired(format!(
                    "Sheet '{}' does not exist in {}",
                    name, file.filename
                )))
            }
            Some(_) => {}
        }
    }
    let sheet_name = match file.file_type {
        FileType::Excel => sheet_name.map(str::to_string),
        FileType::Csv => None,
    };

    let table = read_table(&file.content, file.file_type, sheet_name.as_deref())?;
    let summary = analyzer.analyze(&table, file.file_type);

    store.update_session(session_id, |session| {
        let stored = session.files.get_mut(file_id)?;
        stored.set_parsed(ParsedTable {
            summary: summary.clone(),
            table: Arc::new(table),
            sheet_name,
        });
        Ok(())
    })?;

    tracing::info!(
        "Parsed {} ({} columns) in {:?}",
        file.filename,
        summary.columns_original.len(),
        start.elapsed()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session_store::{MemorySessionStore, StoredFile};
    use crate::services::table::loader::fixtures;
    use crate::services::table::AnalysisLimits;
    use bytes::Bytes;
    use std::time::Duration;

    fn setup(file: StoredFile) -> (MemorySessionStore, String, String) {
        let store = MemorySessionStore::new(Duration::from_secs(60), 10);
        let file_id = file.id.clone();
        let (session_id, _) = store.append_files(None, vec![file]).unwrap();
        (store, session_id, file_id)
    }

    fn analyzer() -> TableAnalyzer {
        TableAnalyzer::new(AnalysisLimits { preview_rows: 10, max_na_cells: 100 })
    }

    fn workbook_file() -> StoredFile {
        StoredFile::new(
            "people.xlsx".to_string(),
            FileType::Excel,
            Bytes::from(fixtures::people_workbook()),
            vec!["people".to_string(), "notes".to_string()],
        )
    }

    #[test]
    fn parses_csv_and_caches_result() {
        let file = StoredFile::new(
            "a.csv".to_string(),
            FileType::Csv,
            Bytes::from_static(b"Patient ID,Value\n1,\n2,x\n"),
            Vec::new(),
        );
        let (store, sid, fid) = setup(file);
        let parsed = parse(&store, &analyzer(), &sid, &fid, None).unwrap();
        assert_eq!(parsed.columns_original, vec!["Patient ID", "Value"]);
        assert_eq!(parsed.columns_suggestions, vec!["patient_id", "value"]);
        assert_eq!(parsed.na_cells.len(), 1);
        assert_eq!(parsed.na_cells[0].row, 1);

        let session = store.get_session(&sid).unwrap();
        assert!(session.files.get(&fid).unwrap().parsed.is_some());
    }

    #[test]
    fn workbook_needs_an_existing_sheet() {
        let (store, sid, fid) = setup(workbook_file());
        assert!(matches!(
            parse(&store, &analyzer(), &sid, &fid, None),
            Err(AppError::SheetRequired(_))
        ));
        assert!(matches!(
            parse(&store, &analyzer(), &sid, &fid, Some("missing")),
            Err(AppError::SheetRequired(_))
        ));

        let parsed = parse(&store, &analyzer(), &sid, &fid, Some("people")).unwrap();
        assert_eq!(parsed.columns_original, vec!["ID", "Name", "Score"]);
        assert_eq!(parsed.na_cells.len(), 2);
    }

    #[test]
    fn unknown_file_is_not_found() {
        let (store, sid, _) = setup(workbook_file());
        assert!(matches!(
            parse(&store, &analyzer(), &sid, "nope", Some("people")),
            Err(AppError::FileNotFound(_))
        ));
    }

    #[test]
    fn reparse_is_idempotent() {
        let (store, sid, fid) = setup(workbook_file());
        let first = parse(&store, &analyzer(), &sid, &fid, Some("people")).unwrap();
        let second = parse(&store, &analyzer(), &sid, &fid, Some("people")).unwrap();
        assert_eq!(first.columns_original, second.columns_original);
        assert_eq!(first.na_cells, second.na_cells);
    }
}
