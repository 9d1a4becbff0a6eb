use std::collections::{HashMap, HashSet};
use crate::error::AppError;
use crate::services::session_store::SessionStore;

/// Renames `columns` through `rename_map`, keeping their order.
///
/// The map's keys must be exactly the given columns; new names are trimmed
/// and must be non-empty and unique.
pub fn apply_rename_map(
    columns: &[String],
    rename_map: &HashMap<String, String>,
) -> Result<Vec<String>, AppError> {
    let missing: Vec<&String> = columns.iter().filter(|c| !rename_map.contains_key(*c)).collect();
    if !missing.is_empty() {
        return Err(AppError::InvalidRenameMap(format!("missing columns: {:?}", missing)));
    }
    let known: HashSet<&String> = columns.iter().collect();
    let mut extra: Vec<&String> = rename_map.keys().filter(|k| !known.contains(k)).collect();
    if !extra.is_empty() {
        extra.sort();
        return Err(AppError::InvalidRenameMap(format!("unknown columns: {:?}", extra)));
    }

    let mut seen = HashSet::with_capacity(columns.len());
    let mut normalized = Vec::with_capacity(columns.len());
    for column in columns {
        let new_name = rename_map[column].trim();
        if new_name.is_empty() {
            return Err(AppError::InvalidRenameMap(format!("empty new name for column '{}'", column)));
        }
        if !seen.insert(new_name) {
            return Err(AppError::InvalidRenameMap(format!("duplicate column name '{}'", new_name)));
        }
        normalized.push(new_name.to_string());
    }
    Ok(normalized)
}

/// Applies `rename_map` to a parsed file and stores the normalized columns.
pub fn normalize<S: SessionStore>(
    store: &S,
    session_id: &str,
    file_id: &str,
    rename_map: &HashMap<String, String>,
) -> Result<Vec<String>, AppError> {
    store.update_session(session_id, |session| {
        let file = session.files.get_mut(file_id)?;
        let normalized = apply_rename_map(&file.parsed()?.summary.columns_original, rename_map)?;
        tracing::info!("Normalized {} columns of {}", normalized.len(), file.filename);
        file.columns_normalized = Some(normalized.clone());
        Ok(normalized)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FileType;
    use crate::services::parser::parse;
    use crate::services::session_store::{MemorySessionStore, StoredFile};
    use crate::services::table::{AnalysisLimits, TableAnalyzer};
    use bytes::Bytes;
    use std::time::Duration;

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn map(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn keeps_original_order_and_trims() {
        let columns = cols(&["B", "A", "C"]);
        let renamed = apply_rename_map(
            &columns,
            &map(&[("A", " a "), ("C", "c"), ("B", "b")]),
        )
        .unwrap();
        assert_eq!(renamed, vec!["b", "a", "c"]);
        assert_eq!(renamed.len(), columns.len());
    }

    #[test]
    fn rejects_missing_extra_blank_and_duplicate() {
        let columns = cols(&["A", "B"]);
        for bad in [
            map(&[("A", "a")]),
            map(&[("A", "a"), ("B", "b"), ("C", "c")]),
            map(&[("A", "a"), ("B", "  ")]),
            map(&[("A", "x"), ("B", "x ")]),
        ] {
            assert!(matches!(
                apply_rename_map(&columns, &bad),
                Err(AppError::InvalidRenameMap(_))
            ));
        }
    }

    #[test]
    fn requires_a_parse_and_is_idempotent() {
        let store = MemorySessionStore::new(Duration::from_secs(60), 10);
        let file = StoredFile::new(
            "a.csv".to_string(),
            FileType::Csv,
            Bytes::from_static(b"ID,Name\n1,x\n"),
            Vec::new(),
        );
        let fid = file.id.clone();
        let (sid, _) = store.append_files(None, vec![file]).unwrap();
        let rename = map(&[("ID", "id"), ("Name", "name")]);

        assert!(matches!(
            normalize(&store, &sid, &fid, &rename),
            Err(AppError::NotParsed(_))
        ));

        let analyzer = TableAnalyzer::new(AnalysisLimits { preview_rows: 5, max_na_cells: 10 });
        parse(&store, &analyzer, &sid, &fid, None).unwrap();
        parse(&store, &analyzer, &sid, &fid, None).unwrap();
        let once = normalize(&store, &sid, &fid, &rename).unwrap();
        let twice = normalize(&store, &sid, &fid, &rename).unwrap();
        assert_eq!(once, vec!["id", "name"]);
        assert_eq!(once, twice);

        parse(&store, &analyzer, &sid, &fid, None).unwrap();
        let session = store.get_session(&sid).unwrap();
        assert_eq!(
            session.files.get(&fid).unwrap().effective_columns().unwrap(),
            &["id".to_string(), "name".to_string()]
        );
    }

    #[test]
    fn parsing_one_file_leaves_other_normalizations_alone() {
        let store = MemorySessionStore::new(Duration::from_secs(60), 10);
        let first = StoredFile::new(
            "a.csv".to_string(),
            FileType::Csv,
            Bytes::from_static(b"ID,Name\n1,x\n"),
            Vec::new(),
        );
        let second = StoredFile::new(
            "b.csv".to_string(),
            FileType::Csv,
            Bytes::from_static(b"Code\n7\n"),
            Vec::new(),
        );
        let (a, b) = (first.id.clone(), second.id.clone());
        let (sid, _) = store.append_files(None, vec![first, second]).unwrap();
        let analyzer = TableAnalyzer::new(AnalysisLimits { preview_rows: 5, max_na_cells: 10 });

        parse(&store, &analyzer, &sid, &b, None).unwrap();
        normalize(&store, &sid, &b, &map(&[("Code", "code")])).unwrap();
        parse(&store, &analyzer, &sid, &a, None).unwrap();
        normalize(&store, &sid, &a, &map(&[("ID", "id"), ("Name", "name")])).unwrap();
        parse(&store, &analyzer, &sid, &a, None).unwrap();

        let session = store.get_session(&sid).unwrap();
        assert_eq!(
            session.files.get(&b).unwrap().effective_columns().unwrap(),
            &["code".to_string()]
        );
    }
}
