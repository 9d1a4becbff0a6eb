use serde::{Deserialize, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Kind of uploaded file, detected from the extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Excel,
    Csv,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Excel => "excel",
            FileType::Csv => "csv",
        }
    }
}

/// A single scalar taken out of a table cell.
///
/// Floats holding an integral value are folded into `Int` on construction, so
/// `39882.0` read from a spreadsheet and `39882` read from a CSV are the same
/// member of a value set. NaN is folded into `Null`.
#[derive(Debug, Clone)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl CellValue {
    pub fn from_float(value: f64) -> Self {
        if value.is_nan() {
            CellValue::Null
        } else if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
            CellValue::Int(value as i64)
        } else {
            CellValue::Float(value)
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Text values lose surrounding whitespace; everything else is returned unchanged.
    pub fn trimmed(self) -> Self {
        match self {
            CellValue::Text(s) => {
                let trimmed = s.trim();
                if trimmed.len() == s.len() {
                    CellValue::Text(s)
                } else {
                    CellValue::Text(trimmed.to_string())
                }
            }
            other => other,
        }
    }

    /// Rendering used by exports: nulls are empty and integral numbers carry no `.0`.
    pub fn to_export_text(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Bool(true) => "True".to_string(),
            CellValue::Bool(false) => "False".to_string(),
            CellValue::Int(i) => i.to_string(),
            CellValue::Float(f) => f.to_string(),
            CellValue::Text(s) => s.clone(),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            CellValue::Null => 0,
            CellValue::Bool(_) => 1,
            CellValue::Int(_) | CellValue::Float(_) => 2,
            CellValue::Text(_) => 3,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_export_text())
    }
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (CellValue::Null, CellValue::Null) => true,
            (CellValue::Bool(a), CellValue::Bool(b)) => a == b,
            (CellValue::Int(a), CellValue::Int(b)) => a == b,
            (CellValue::Float(a), CellValue::Float(b)) => a.to_bits() == b.to_bits(),
            (CellValue::Text(a), CellValue::Text(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for CellValue {}

impl Hash for CellValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            CellValue::Null => {}
            CellValue::Bool(b) => b.hash(state),
            CellValue::Int(i) => i.hash(state),
            CellValue::Float(f) => f.to_bits().hash(state),
            CellValue::Text(s) => s.hash(state),
        }
    }
}

impl Ord for CellValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (CellValue::Bool(a), CellValue::Bool(b)) => a.cmp(b),
            (CellValue::Int(a), CellValue::Int(b)) => a.cmp(b),
            (CellValue::Float(a), CellValue::Float(b)) => a.total_cmp(b),
            (CellValue::Int(a), CellValue::Float(b)) => (*a as f64).total_cmp(b).then(Ordering::Less),
            (CellValue::Float(a), CellValue::Int(b)) => a.total_cmp(&(*b as f64)).then(Ordering::Greater),
            (CellValue::Text(a), CellValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for CellValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for CellValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            CellValue::Null => serializer.serialize_none(),
            CellValue::Bool(b) => serializer.serialize_bool(*b),
            CellValue::Int(i) => serializer.serialize_i64(*i),
            CellValue::Float(f) => serializer.serialize_f64(*f),
            CellValue::Text(s) => serializer.serialize_str(s),
        }
    }
}

/// Location of a missing cell. `row` is 1-based over data rows, header excluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NaCell {
    pub row: usize,
    pub col: String,
}

pub type PreviewRow = serde_json::Map<String, serde_json::Value>;

/// Column and missing-value summary of one parsed file/sheet.
#[derive(Debug, Clone, Serialize)]
pub struct Parsed {
    pub columns_original: Vec<String>,
    pub columns_suggestions: Vec<String>,
    pub na_cells: Vec<NaCell>,
    pub preview_rows: Vec<PreviewRow>,
}

/// What the client learns about a newly stored file.
#[derive(Debug, Clone, Serialize)]
pub struct FileSummary {
    pub file_id: String,
    pub filename: String,
    pub file_type: FileType,
    pub sheet_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetOperation {
    Intersection,
    Difference,
    SymmetricDifference,
}

/// Stored output of a set operation. Never mutated after insertion.
#[derive(Debug, Clone)]
pub struct SetOpResult {
    pub id: String,
    pub op: SetOperation,
    pub file_ids: Vec<String>,
    pub column_name: String,
    /// Sorted, unique.
    pub values: Vec<CellValue>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl SetOpResult {
    pub fn count(&self) -> usize {
        self.values.len()
    }
}
