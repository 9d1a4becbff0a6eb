use bytes::Bytes;
use crate::error::AppError;
use crate::models::{FileSummary, FileType};
use crate::services::session_store::{AppendOutcome, SessionId, SessionStore, StoredFile};
use crate::services::table::{detect_file_type, excel_sheet_names};

/// One file part as received from the client.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub filename: String,
    pub content: Bytes,
}

#[derive(Debug)]
pub struct UploadOutcome {
    pub session_id: SessionId,
    pub placement: AppendOutcome,
    /// Only the files added by this call.
    pub files: Vec<FileSummary>,
}

/// Validates and stores a batch of uploaded files. Nothing is stored unless
/// every file passes validation.
pub fn upload<S: SessionStore>(
    store: &S,
    session_id: Option<&str>,
    files: Vec<IncomingFile>,
    max_file_size: usize,
) -> Result<UploadOutcome, AppError> {
    if files.is_empty() {
        return Err(AppError::InvalidInput("No files provided".to_string()));
    }

    let mut stored = Vec::with_capacity(files.len());
    for file in files {
        if file.filename.trim().is_empty() {
            return Err(AppError::InvalidInput("File name is empty".to_string()));
        }
        let file_type = detect_file_type(&file.filename)?;
        if file.content.len() > max_file_size {
            return Err(AppError::FileTooLarge {
                filename: file.filename,
                size: file.content.len(),
                limit: max_file_size,
            });
        }

        let sheet_names = match file_type {
            FileType::Excel => excel_sheet_names(&file.content)?,
            FileType::Csv => Vec::new(),
        };
        tracing::info!(
            "Accepted {} ({}, {}KB, {} sheets)",
            file.filename,
            file_type.as_str(),
            file.content.len() / 1024,
            sheet_names.len()
        );
        stored.push(StoredFile::new(file.filename, file_type, file.content, sheet_names));
    }

    let summaries: Vec<FileSummary> = stored.iter().map(StoredFile::summary).collect();
    let (session_id, placement) = store.append_files(session_id, stored)?;
    if let AppendOutcome::CreatedNew(reason) = placement {
        tracing::info!("Upload placed in new session {} ({:?})", session_id, reason);
    }

    Ok(UploadOutcome {
        session_id,
        placement,
        files: summaries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::session_store::{MemorySessionStore, NewSessionReason};
    use crate::services::table::loader::fixtures;
    use std::time::Duration;

    fn store() -> MemorySessionStore {
        MemorySessionStore::new(Duration::from_secs(60), 10)
    }

    fn incoming(name: &str, content: &'static [u8]) -> IncomingFile {
        IncomingFile { filename: name.to_string(), content: Bytes::from_static(content) }
    }

    #[test]
    fn returns_only_new_files_and_reads_sheet_names() {
        let store = store();
        let first = upload(&store, None, vec![incoming("a.csv", b"x\n1\n")], 1024).unwrap();
        assert_eq!(first.placement, AppendOutcome::CreatedNew(NewSessionReason::NoSessionGiven));
        assert_eq!(first.files.len(), 1);
        assert_eq!(first.files[0].sheet_names, None);

        let workbook = IncomingFile {
            filename: "b.xlsx".to_string(),
            content: Bytes::from(fixtures::people_workbook()),
        };
        let second = upload(&store, Some(&first.session_id), vec![workbook], 1 << 20).unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert_eq!(second.files.len(), 1);
        assert_eq!(
            second.files[0].sheet_names,
            Some(vec!["people".to_string(), "notes".to_string()])
        );
        assert_eq!(store.get_session(&first.session_id).unwrap().files.len(), 2);
    }

    #[test]
    fn rejects_unsupported_extension_without_storing() {
        let store = store();
        let err = upload(
            &store,
            None,
            vec![incoming("a.csv", b"x\n1\n"), incoming("b.json", b"{}")],
            1024,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedFileType(_)));
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn rejects_oversized_files() {
        let err = upload(&store(), None, vec![incoming("a.csv", b"x\n1\n2\n")], 3).unwrap_err();
        assert!(matches!(err, AppError::FileTooLarge { limit: 3, .. }));
    }

    #[test]
    fn rejects_corrupt_workbooks() {
        let err = upload(&store(), None, vec![incoming("a.xlsx", b"not a zip")], 1024).unwrap_err();
        assert!(matches!(err, AppError::ParseError(_)));
    }
}
