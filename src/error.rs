use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
};
use serde_json::json;
use axum::Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Sheet required: {0}")]
    SheetRequired(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("File has not been parsed yet: {0}")]
    NotParsed(String),
    #[error("Invalid rename map: {0}")]
    InvalidRenameMap(String),
    #[error("At least 2 files are required, got {0}")]
    NotEnoughFiles(usize),
    #[error("Column '{0}' is not present in every selected file")]
    ColumnNotCommon(String),
    #[error("Difference requires a base_file_id among file_ids")]
    BaseRequired,
    #[error("Result not found: {0}")]
    ResultNotFound(String),
    #[error("Column '{column}' not found in file {file}")]
    ColumnNotFound { file: String, column: String },
    #[error("Unsupported file type: {0} (only xlsx, xls and csv are accepted)")]
    UnsupportedFileType(String),
    #[error("Unsupported export format: {0} (only csv and xlsx are accepted)")]
    UnsupportedFormat(String),
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("File {filename} is {size} bytes, limit is {limit}")]
    FileTooLarge { filename: String, size: usize, limit: usize },
    #[error("A session holds at most {0} files")]
    TooManyFiles(usize),
    #[error("Result has {count} values, limit is {limit}")]
    ResultTooLarge { count: usize, limit: usize },
    #[error("Export error: {0}")]
    ExportError(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable kind, sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::SessionNotFound(_) => "session_not_found",
            AppError::FileNotFound(_) => "file_not_found",
            AppError::SheetRequired(_) => "sheet_required",
            AppError::ParseError(_) => "parse_error",
            AppError::NotParsed(_) => "not_parsed",
            AppError::InvalidRenameMap(_) => "invalid_rename_map",
            AppError::NotEnoughFiles(_) => "not_enough_files",
            AppError::ColumnNotCommon(_) => "column_not_common",
            AppError::BaseRequired => "base_required",
            AppError::ResultNotFound(_) => "result_not_found",
            AppError::ColumnNotFound { .. } => "column_not_found",
            AppError::UnsupportedFileType(_) => "unsupported_file_type",
            AppError::UnsupportedFormat(_) => "unsupported_format",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::FileTooLarge { .. } => "file_too_large",
            AppError::TooManyFiles(_) => "too_many_files",
            AppError::ResultTooLarge { .. } => "result_too_large",
            AppError::ExportError(_) => "export_error",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::SessionNotFound(_)
            | AppError::FileNotFound(_)
            | AppError::ResultNotFound(_) => StatusCode::NOT_FOUND,
            AppError::FileTooLarge { .. } | AppError::ResultTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            AppError::ExportError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl From<polars::error::PolarsError> for AppError {
    fn from(err: polars::error::PolarsError) -> Self {
        AppError::ParseError(err.to_string())
    }
}

impl From<calamine::Error> for AppError {
    fn from(err: calamine::Error) -> Self {
        AppError::ParseError(err.to_string())
    }
}

impl From<rust_xlsxwriter::XlsxError> for AppError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        AppError::ExportError(err.to_string())
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(err: zip::result::ZipError) -> Self {
        AppError::ExportError(err.to_string())
    }
}

impl From<csv::Error> for AppError {
    fn from(err: csv::Error) -> Self {
        AppError::ExportError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::warn!("Request rejected ({}): {}", self.code(), self);
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
        }));

        (status, body).into_response()
    }
}
