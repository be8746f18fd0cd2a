//! Correlation records between the connect and disconnect hooks
//!
//! The two hooks run in separate processes, so the remote session id is
//! handed over on disk: one small plaintext file per username in the
//! session directory, readable by the owner only.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Correlation record I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Malformed correlation record {path}")]
    Malformed { path: PathBuf },
    #[error("Username cannot be used as a record key: {0:?}")]
    InvalidKey(String),
}

/// What the connect hook leaves behind for the disconnect hook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationRecord {
    pub session_id: String,
    pub client_address: String,
    pub client_port: String,
}

impl CorrelationRecord {
    /// Three newline-separated fields: session id, client address, port
    pub fn encode(&self) -> String {
        format!(
            "{}\n{}\n{}",
            self.session_id, self.client_address, self.client_port
        )
    }

    /// Parse an encoded record. Only the session id is required.
    pub fn decode(content: &str) -> Option<Self> {
        let mut lines = content.lines().map(str::trim);
        let session_id = lines.next().filter(|id| !id.is_empty())?.to_string();
        let client_address = lines.next().unwrap_or_default().to_string();
        let client_port = lines.next().unwrap_or_default().to_string();
        Some(Self {
            session_id,
            client_address,
            client_port,
        })
    }
}

/// Username-keyed storage for correlation records
pub trait CorrelationStore {
    fn save(&self, username: &str, record: &CorrelationRecord) -> Result<(), StoreError>;

    /// `Ok(None)` when no record exists for the username
    fn load(&self, username: &str) -> Result<Option<CorrelationRecord>, StoreError>;

    /// Removing an absent record is not an error
    fn remove(&self, username: &str) -> Result<(), StoreError>;
}

/// One `session-<username>` file per record under a directory
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `username`.
    ///
    /// Usernames come from client certificates, so anything that could
    /// escape the directory is rejected rather than rewritten.
    pub fn record_path(&self, username: &str) -> Result<PathBuf, StoreError> {
        let safe = !username.is_empty()
            && username != "."
            && username != ".."
            && !username
                .chars()
                .any(|c| c == '/' || c == '\\' || c == '\0' || c.is_control());
        if !safe {
            return Err(StoreError::InvalidKey(username.to_string()));
        }
        Ok(self.dir.join(format!("session-{}", username)))
    }
}

impl CorrelationStore for FileStore {
    fn save(&self, username: &str, record: &CorrelationRecord) -> Result<(), StoreError> {
        let path = self.record_path(username)?;
        let io_err = |source: std::io::Error| StoreError::Io {
            path: path.clone(),
            source,
        };

        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options.open(&path).map_err(io_err)?;
        // A pre-existing file keeps its old mode through open(); tighten it
        // before the session id lands in it.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600)).map_err(io_err)?;
        }
        file.write_all(record.encode().as_bytes()).map_err(io_err)?;

        Ok(())
    }

    fn load(&self, username: &str) -> Result<Option<CorrelationRecord>, StoreError> {
        let path = self.record_path(username)?;
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        CorrelationRecord::decode(&content)
            .map(Some)
            .ok_or(StoreError::Malformed { path })
    }

    fn remove(&self, username: &str) -> Result<(), StoreError> {
        let path = self.record_path(username)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }
}
