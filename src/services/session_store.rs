use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use crate::error::AppError;
use crate::models::{FileSummary, FileType, Parsed, SetOpResult};
use crate::services::table::Table;

pub type SessionId = String;
pub type FileId = String;
pub type ResultId = String;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Parse output cached on a file: the summary sent to the client plus the
/// table it was computed from.
#[derive(Debug, Clone)]
pub struct ParsedTable {
    pub summary: Parsed,
    pub table: Arc<Table>,
    pub sheet_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StoredFile {
    pub id: FileId,
    pub filename: String,
    pub file_type: FileType,
    pub content: Bytes,
    pub sheet_names: Vec<String>,
    pub parsed: Option<ParsedTable>,
    pub columns_normalized: Option<Vec<String>>,
}

impl StoredFile {
    pub fn new(filename: String, file_type: FileType, content: Bytes, sheet_names: Vec<String>) -> Self {
        Self {
            id: new_id(),
            filename,
            file_type,
            content,
            sheet_names,
            parsed: None,
            columns_normalized: None,
        }
    }

    pub fn summary(&self) -> FileSummary {
        FileSummary {
            file_id: self.id.clone(),
            filename: self.filename.clone(),
            file_type: self.file_type,
            sheet_names: match self.file_type {
                FileType::Excel => Some(self.sheet_names.clone()),
                FileType::Csv => None,
            },
        }
    }

    pub fn parsed(&self) -> Result<&ParsedTable, AppError> {
        self.parsed
            .as_ref()
            .ok_or_else(|| AppError::NotParsed(self.id.clone()))
    }

    /// Normalized names when set, else the original ones. Requires a parse.
    pub fn effective_columns(&self) -> Result<&[String], AppError> {
        let parsed = self.parsed()?;
        Ok(self
            .columns_normalized
            .as_deref()
            .unwrap_or(&parsed.summary.columns_original))
    }

    /// Replaces the cached parse. A normalization survives only when the
    /// column list is unchanged.
    pub fn set_parsed(&mut self, parsed: ParsedTable) {
        let same_columns = self
            .parsed
            .as_ref()
            .is_some_and(|old| old.summary.columns_original == parsed.summary.columns_original);
        if !same_columns {
            self.columns_normalized = None;
        }
        self.parsed = Some(parsed);
    }
}

/// Files of one session, keyed by id.
#[derive(Debug, Clone, Default)]
pub struct FileRegistry {
    files: HashMap<FileId, StoredFile>,
}

impl FileRegistry {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn insert(&mut self, file: StoredFile) {
        self.files.insert(file.id.clone(), file);
    }

    pub fn get(&self, file_id: &str) -> Result<&StoredFile, AppError> {
        self.files
            .get(file_id)
            .ok_or_else(|| AppError::FileNotFound(file_id.to_string()))
    }

    pub fn get_mut(&mut self, file_id: &str) -> Result<&mut StoredFile, AppError> {
        self.files
            .get_mut(file_id)
            .ok_or_else(|| AppError::FileNotFound(file_id.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub created_at: DateTime<Utc>,
    touched_at: Instant,
    pub files: FileRegistry,
    pub results: HashMap<ResultId, SetOpResult>,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            touched_at: Instant::now(),
            files: FileRegistry::default(),
            results: HashMap::new(),
        }
    }

    pub fn result(&self, result_id: &str) -> Result<&SetOpResult, AppError> {
        self.results
            .get(result_id)
            .ok_or_else(|| AppError::ResultNotFound(result_id.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewSessionReason {
    /// The caller did not name a session.
    NoSessionGiven,
    /// The named session is unknown or has expired.
    SessionNotFound,
}

/// How `append_files` placed the files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended,
    CreatedNew(NewSessionReason),
}

/// Storage for sessions. Closures passed to `read_session` and
/// `update_session` run while the session is locked, so each call is atomic
/// with respect to other requests on the same session.
pub trait SessionStore: Send + Sync {
    fn create_session(&self) -> SessionId;

    /// Snapshot of a session. Fails with `SessionNotFound` when unknown or expired.
    fn get_session(&self, session_id: &str) -> Result<Session, AppError>;

    /// Adds files to `session_id`, or to a fresh session when that one is
    /// absent. All files are stored or none are.
    fn append_files(
        &self,
        session_id: Option<&str>,
        files: Vec<StoredFile>,
    ) -> Result<(SessionId, AppendOutcome), AppError>;

    fn read_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&Session) -> Result<R, AppError>,
    ) -> Result<R, AppError>;

    fn update_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> Result<R, AppError>,
    ) -> Result<R, AppError>;

    /// Drops idle sessions and returns how many were removed.
    fn evict_expired(&self) -> usize;
}

pub struct MemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
    ttl: Duration,
    max_files_per_session: usize,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration, max_files_per_session: usize) -> Self {
        info!(
            "Creating in-memory session store (ttl={:?}, max_files_per_session={})",
            ttl, max_files_per_session
        );
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            max_files_per_session,
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        now.duration_since(session.touched_at) > self.ttl
    }

    /// Live session for `session_id`, touched; expired entries are removed.
    fn live_session<'a>(
        &self,
        sessions: &'a mut HashMap<SessionId, Session>,
        session_id: &str,
    ) -> Result<&'a mut Session, AppError> {
        let now = Instant::now();
        let expired = match sessions.get(session_id) {
            Some(session) => self.is_expired(session, now),
            None => return Err(AppError::SessionNotFound(session_id.to_string())),
        };
        if expired {
            debug!("Session {} expired", session_id);
            sessions.remove(session_id);
            return Err(AppError::SessionNotFound(session_id.to_string()));
        }
        let session = sessions
            .get_mut(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        session.touched_at = now;
        Ok(session)
    }
}

impl SessionStore for MemorySessionStore {
    fn create_session(&self) -> SessionId {
        let id = new_id();
        self.sessions.write().insert(id.clone(), Session::new(id.clone()));
        info!("Created session {}", id);
        id
    }

    fn get_session(&self, session_id: &str) -> Result<Session, AppError> {
        self.update_session(session_id, |session| Ok(session.clone()))
    }

    fn append_files(
        &self,
        session_id: Option<&str>,
        files: Vec<StoredFile>,
    ) -> Result<(SessionId, AppendOutcome), AppError> {
        if files.len() > self.max_files_per_session {
            return Err(AppError::TooManyFiles(self.max_files_per_session));
        }

        let mut sessions = self.sessions.write();

        let existing = match session_id {
            Some(id) => self.live_session(&mut sessions, id).ok().map(|s| s.id.clone()),
            None => None,
        };
        let (id, outcome) = match (existing, session_id) {
            (Some(id), _) => (id, AppendOutcome::Appended),
            (None, requested) => {
                let reason = if requested.is_some() {
                    NewSessionReason::SessionNotFound
                } else {
                    NewSessionReason::NoSessionGiven
                };
                let id = new_id();
                sessions.insert(id.clone(), Session::new(id.clone()));
                info!("Created session {} ({:?})", id, reason);
                (id, AppendOutcome::CreatedNew(reason))
            }
        };

        let session = sessions
            .get_mut(&id)
            .ok_or_else(|| AppError::Internal(format!("session {} vanished during append", id)))?;
        if session.files.len() + files.len() > self.max_files_per_session {
            return Err(AppError::TooManyFiles(self.max_files_per_session));
        }
        let added = files.len();
        for file in files {
            session.files.insert(file);
        }
        debug!("Session {} now holds {} files (+{})", id, session.files.len(), added);

        Ok((id, outcome))
    }

    fn read_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&Session) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        self.update_session(session_id, |session| f(session))
    }

    fn update_session<R>(
        &self,
        session_id: &str,
        f: impl FnOnce(&mut Session) -> Result<R, AppError>,
    ) -> Result<R, AppError> {
        let mut sessions = self.sessions.write();
        let session = self.live_session(&mut sessions, session_id)?;
        f(session)
    }

    fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session, now));
        let removed = before - sessions.len();
        if removed > 0 {
            info!("Evicted {} expired sessions, {} remain", removed, sessions.len());
        }
        removed
    }
}
