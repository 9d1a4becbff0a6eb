use std::collections::{BTreeSet, HashSet};
use rayon::prelude::*;
use crate::error::AppError;
use crate::models::{CellValue, FileType, SetOpResult, SetOperation};
use crate::services::session_store::{new_id, SessionStore, StoredFile};
use crate::services::table::is_missing;

pub type ValueSet = HashSet<CellValue>;

#[derive(Debug, Clone)]
pub struct SetOpRequest {
    pub file_ids: Vec<String>,
    pub column_name: String,
    pub op: SetOperation,
    pub base_file_id: Option<String>,
    pub drop_na: bool,
}

#[derive(Debug, Clone)]
pub struct SetOpSummary {
    pub result_id: String,
    pub count: usize,
    pub values_preview: Vec<CellValue>,
}

#[derive(Debug, Clone, Copy)]
pub struct SetOpLimits {
    pub values_preview_limit: usize,
    pub max_result_values: usize,
}

/// Column names shared by every file, sorted. Each file contributes its
/// normalized columns when present, else its original ones. Unparsed files
/// contribute nothing.
pub fn common_columns(files: &[&StoredFile]) -> Vec<String> {
    if files.len() < 2 {
        return Vec::new();
    }
    let mut common: Option<BTreeSet<String>> = None;
    for file in files {
        let columns: BTreeSet<String> = file
            .effective_columns()
            .map(|cols| cols.iter().cloned().collect())
            .unwrap_or_default();
        common = Some(match common {
            None => columns,
            Some(acc) => acc.intersection(&columns).cloned().collect(),
        });
    }
    common.map(|set| set.into_iter().collect()).unwrap_or_default()
}

/// Session-level wrapper around [`common_columns`].
pub fn common_columns_for<S: SessionStore>(
    store: &S,
    session_id: &str,
    file_ids: &[String],
) -> Result<Vec<String>, AppError> {
    store.read_session(session_id, |session| {
        let files = file_ids
            .iter()
            .map(|id| session.files.get(id))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(common_columns(&files))
    })
}

/// Set member a cell stands for: null when missing, else the value with its
/// text trimmed. Raw export matches rows through the same key.
pub fn member_key(value: &CellValue, file_type: FileType) -> CellValue {
    if is_missing(value, file_type) {
        CellValue::Null
    } else {
        value.clone().trimmed()
    }
}

/// Unique values of one column. Text is always trimmed; with `drop_na`
/// missing cells are skipped, otherwise they collapse into a single null.
pub fn value_set(values: &[CellValue], file_type: FileType, drop_na: bool) -> ValueSet {
    values
        .iter()
        .filter(|value| !(drop_na && is_missing(value, file_type)))
        .map(|value| member_key(value, file_type))
        .collect()
}

pub fn intersection(sets: &[ValueSet]) -> ValueSet {
    let Some((first, rest)) = sets.split_first() else {
        return ValueSet::new();
    };
    first
        .iter()
        .filter(|v| rest.iter().all(|s| s.contains(*v)))
        .cloned()
        .collect()
}

/// Members of `base` found in none of `others`.
pub fn difference<'a>(base: &ValueSet, others: impl IntoIterator<Item = &'a ValueSet>) -> ValueSet {
    let others: Vec<&ValueSet> = others.into_iter().collect();
    base.iter()
        .filter(|v| !others.iter().any(|s| s.contains(*v)))
        .cloned()
        .collect()
}

/// Left-to-right reduction of pairwise symmetric difference: members that
/// occur in an odd number of sets.
pub fn symmetric_difference(sets: &[ValueSet]) -> ValueSet {
    sets.iter().fold(ValueSet::new(), |acc, s| {
        acc.symmetric_difference(s).cloned().collect()
    })
}

/// Applies `op` and returns the members sorted.
pub fn compute(sets: &[ValueSet], op: SetOperation, base_index: Option<usize>) -> Result<Vec<CellValue>, AppError> {
    let result = match op {
        SetOperation::Intersection => intersection(sets),
        SetOperation::Difference => {
            let base_index = base_index.filter(|i| *i < sets.len()).ok_or(AppError::BaseRequired)?;
            let others = sets
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != base_index)
                .map(|(_, s)| s);
            difference(&sets[base_index], others)
        }
        SetOperation::SymmetricDifference => symmetric_difference(sets),
    };
    let mut values: Vec<CellValue> = result.into_iter().collect();
    values.sort();
    Ok(values)
}

/// Runs a set operation over files of a session and stores the result.
pub fn run<S: SessionStore>(
    store: &S,
    session_id: &str,
    request: SetOpRequest,
    limits: SetOpLimits,
) -> Result<SetOpSummary, AppError> {
    let start = std::time::Instant::now();

    if request.file_ids.len() < 2 {
        return Err(AppError::NotEnoughFiles(request.file_ids.len()));
    }
    let base_index = match request.op {
        SetOperation::Difference => {
            let base = request.base_file_id.as_deref().ok_or(AppError::BaseRequired)?;
            Some(
                request
                    .file_ids
                    .iter()
                    .position(|id| id == base)
                    .ok_or(AppError::BaseRequired)?,
            )
        }
        _ => None,
    };

    // Column positions are resolved under the lock; extraction happens outside it.
    let columns = store.read_session(session_id, |session| {
        request
            .file_ids
            .iter()
            .map(|id| {
                let file = session.files.get(id)?;
                let effective = file.effective_columns()?;
                let idx = effective
                    .iter()
                    .position(|c| c == &request.column_name)
                    .ok_or_else(|| AppError::ColumnNotCommon(request.column_name.clone()))?;
                Ok((file.parsed()?.table.clone(), idx, file.file_type))
            })
            .collect::<Result<Vec<_>, AppError>>()
    })?;

    let sets = columns
        .par_iter()
        .map(|(table, idx, file_type)| {
            let values = table
                .column(*idx)
                .ok_or_else(|| AppError::Internal(format!("column {} missing from parsed table", idx)))?;
            Ok(value_set(values, *file_type, request.drop_na))
        })
        .collect::<Result<Vec<ValueSet>, AppError>>()?;

    let values = compute(&sets, request.op, base_index)?;
    if values.len() > limits.max_result_values {
        return Err(AppError::ResultTooLarge {
            count: values.len(),
            limit: limits.max_result_values,
        });
    }

    let result = SetOpResult {
        id: new_id(),
        op: request.op,
        file_ids: request.file_ids,
        column_name: request.column_name,
        values,
        created_at: chrono::Utc::now(),
    };
    let summary = SetOpSummary {
        result_id: result.id.clone(),
        count: result.count(),
        values_preview: result.values.iter().take(limits.values_preview_limit).cloned().collect(),
    };

    store.update_session(session_id, |session| {
        session.results.insert(result.id.clone(), result);
        Ok(())
    })?;

    tracing::info!(
        "{:?} over {} files produced {} values in {:?}",
        request.op,
        sets.len(),
        summary.count,
        start.elapsed()
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::normalizer::normalize;
    use crate::services::parser::parse;
    use crate::services::session_store::MemorySessionStore;
    use crate::services::table::loader::fixtures;
    use crate::services::table::{AnalysisLimits, TableAnalyzer};
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::time::Duration;

    fn text_set(values: &[&str]) -> ValueSet {
        value_set(&texts(values), FileType::Csv, true)
    }

    fn texts(values: &[&str]) -> Vec<CellValue> {
        values.iter().map(|v| CellValue::Text(v.to_string())).collect()
    }

    #[test]
    fn intersection_uses_trimmed_equality() {
        let sets = [text_set(&["x", "y ", "z"]), text_set(&[" x", "y", "w"])];
        let values = compute(&sets, SetOperation::Intersection, None).unwrap();
        assert_eq!(values, texts(&["x", "y"]));
    }

    #[test]
    fn difference_removes_union_of_others() {
        let sets = [text_set(&["1", "2", "3"]), text_set(&["2"])];
        let values = compute(&sets, SetOperation::Difference, Some(0)).unwrap();
        assert_eq!(values, texts(&["1", "3"]));

        let sets = [text_set(&["2"]), text_set(&["1", "2", "3"]), text_set(&["3", "4"])];
        let values = compute(&sets, SetOperation::Difference, Some(1)).unwrap();
        assert_eq!(values, texts(&["1"]));
    }

    #[test]
    fn symmetric_difference_reduces_left_to_right() {
        let sets = [text_set(&["a", "b"]), text_set(&["b", "c"]), text_set(&["c", "d"])];
        let values = compute(&sets, SetOperation::SymmetricDifference, None).unwrap();
        assert_eq!(values, texts(&["a", "d"]));

        // "a" appears three times, an odd count, so it stays.
        let sets = [text_set(&["a"]), text_set(&["a"]), text_set(&["a", "b"])];
        let values = compute(&sets, SetOperation::SymmetricDifference, None).unwrap();
        assert_eq!(values, texts(&["a", "b"]));
    }

    #[test]
    fn missing_values_follow_drop_na() {
        let raw = vec![
            CellValue::Text(" a ".into()),
            CellValue::Null,
            CellValue::Text(String::new()),
        ];
        let dropped = value_set(&raw, FileType::Csv, true);
        assert_eq!(dropped.len(), 1);
        assert!(dropped.contains(&CellValue::Text("a".into())));

        let kept = value_set(&raw, FileType::Csv, false);
        assert_eq!(kept.len(), 2);
        assert!(kept.contains(&CellValue::Null));
    }

    #[test]
    fn common_columns_needs_two_files() {
        assert!(common_columns(&[]).is_empty());
    }

    struct Fixture {
        store: MemorySessionStore,
        session_id: String,
        a: String,
        b: String,
    }

    fn fixture() -> Fixture {
        let store = MemorySessionStore::new(Duration::from_secs(60), 10);
        let file_a = StoredFile::new(
            "a.csv".to_string(),
            FileType::Csv,
            Bytes::from_static(b"Patient ID,v\nx,1\ny ,2\nz,3\n,4\n"),
            Vec::new(),
        );
        let file_b = StoredFile::new(
            "b.csv".to_string(),
            FileType::Csv,
            Bytes::from_static(b"patient_id,w\n x,1\ny,2\nw,3\n"),
            Vec::new(),
        );
        let (a, b) = (file_a.id.clone(), file_b.id.clone());
        let (session_id, _) = store.append_files(None, vec![file_a, file_b]).unwrap();
        let analyzer = TableAnalyzer::new(AnalysisLimits { preview_rows: 5, max_na_cells: 10 });
        parse(&store, &analyzer, &session_id, &a, None).unwrap();
        parse(&store, &analyzer, &session_id, &b, None).unwrap();
        Fixture { store, session_id, a, b }
    }

    fn limits() -> SetOpLimits {
        SetOpLimits { values_preview_limit: 1, max_result_values: 100 }
    }

    fn request(f: &Fixture, op: SetOperation, base: Option<&str>) -> SetOpRequest {
        SetOpRequest {
            file_ids: vec![f.a.clone(), f.b.clone()],
            column_name: "patient_id".to_string(),
            op,
            base_file_id: base.map(str::to_string),
            drop_na: true,
        }
    }

    #[test]
    fn run_uses_normalized_columns_and_stores_result() {
        let f = fixture();
        assert!(matches!(
            run(&f.store, &f.session_id, request(&f, SetOperation::Intersection, None), limits()),
            Err(AppError::ColumnNotCommon(_))
        ));

        let rename: HashMap<String, String> = [("Patient ID", "patient_id"), ("v", "v")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        normalize(&f.store, &f.session_id, &f.a, &rename).unwrap();
        assert_eq!(
            common_columns_for(&f.store, &f.session_id, &[f.a.clone(), f.b.clone()]).unwrap(),
            vec!["patient_id"]
        );

        let summary =
            run(&f.store, &f.session_id, request(&f, SetOperation::Intersection, None), limits()).unwrap();
        assert_eq!(summary.count, 2);
        assert_eq!(summary.values_preview, texts(&["x"]));

        let session = f.store.get_session(&f.session_id).unwrap();
        let stored = session.result(&summary.result_id).unwrap();
        assert_eq!(stored.values, texts(&["x", "y"]));
        assert_eq!(stored.file_ids, vec![f.a.clone(), f.b.clone()]);
    }

    #[test]
    fn run_validates_participants_and_base() {
        let f = fixture();
        let mut single = request(&f, SetOperation::Intersection, None);
        single.file_ids.truncate(1);
        assert!(matches!(
            run(&f.store, &f.session_id, single, limits()),
            Err(AppError::NotEnoughFiles(1))
        ));

        for base in [None, Some("elsewhere")] {
            assert!(matches!(
                run(&f.store, &f.session_id, request(&f, SetOperation::Difference, base), limits()),
                Err(AppError::BaseRequired)
            ));
        }

        let mut unknown = request(&f, SetOperation::Intersection, None);
        unknown.file_ids.insert(0, "ghost".to_string());
        assert!(matches!(
            run(&f.store, &f.session_id, unknown, limits()),
            Err(AppError::FileNotFound(_))
        ));
    }

    #[test]
    fn run_enforces_result_limit() {
        let f = fixture();
        let rename: HashMap<String, String> = [("Patient ID", "patient_id"), ("v", "v")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        normalize(&f.store, &f.session_id, &f.a, &rename).unwrap();
        let tight = SetOpLimits { values_preview_limit: 10, max_result_values: 1 };
        assert!(matches!(
            run(&f.store, &f.session_id, request(&f, SetOperation::SymmetricDifference, None), tight),
            Err(AppError::ResultTooLarge { .. })
        ));
    }

    #[test]
    fn keeping_missing_values_adds_one_null_member() {
        let f = fixture();
        let rename: HashMap<String, String> = [("Patient ID", "patient_id"), ("v", "v")]
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        normalize(&f.store, &f.session_id, &f.a, &rename).unwrap();

        let mut keep = request(&f, SetOperation::Difference, Some(f.a.as_str()));
        keep.drop_na = false;
        let summary = run(&f.store, &f.session_id, keep, limits()).unwrap();
        let session = f.store.get_session(&f.session_id).unwrap();
        assert_eq!(
            session.result(&summary.result_id).unwrap().values,
            vec![CellValue::Null, CellValue::Text("z".into())]
        );

        let drop = request(&f, SetOperation::Difference, Some(f.a.as_str()));
        let summary = run(&f.store, &f.session_id, drop, limits()).unwrap();
        assert_eq!(summary.count, 1);
    }

    #[test]
    fn numbers_match_across_workbook_and_csv() {
        let store = MemorySessionStore::new(Duration::from_secs(60), 10);
        let sheet = StoredFile::new(
            "ids.xlsx".to_string(),
            FileType::Excel,
            Bytes::from(fixtures::mixed_ids_workbook()),
            vec!["ids".to_string()],
        );
        let csv = StoredFile::new(
            "ids.csv".to_string(),
            FileType::Csv,
            Bytes::from_static(b"id\n1\n2\n"),
            Vec::new(),
        );
        let (x, c) = (sheet.id.clone(), csv.id.clone());
        let (sid, _) = store.append_files(None, vec![sheet, csv]).unwrap();
        let analyzer = TableAnalyzer::new(AnalysisLimits { preview_rows: 5, max_na_cells: 10 });
        parse(&store, &analyzer, &sid, &x, Some("ids")).unwrap();
        parse(&store, &analyzer, &sid, &c, None).unwrap();

        let summary = run(
            &store,
            &sid,
            SetOpRequest {
                file_ids: vec![x, c],
                column_name: "id".to_string(),
                op: SetOperation::Intersection,
                base_file_id: None,
                drop_na: true,
            },
            limits(),
        )
        .unwrap();
        assert_eq!(summary.count, 1);
        assert_eq!(summary.values_preview, vec![CellValue::Int(1)]);
    }
}
