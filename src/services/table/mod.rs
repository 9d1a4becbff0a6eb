pub mod analyzer;
pub mod loader;
pub mod types;
pub mod utils;

pub use analyzer::{AnalysisLimits, TableAnalyzer};
pub use loader::{detect_file_type, excel_sheet_names, read_table};
pub use types::Table;
pub use utils::is_missing;
