use crate::config::IndexConfig;
use crate::error::{Result, SessionIndexError};
use std::path::{Path, PathBuf};

pub const MAX_SESSION_ID_LEN: usize = 128;
pub const LOCK_FILE_NAME: &str = ".lock";

/// On-disk locations of one session's artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub dir: PathBuf,
    pub index: PathBuf,
    pub metadata: PathBuf,
}

impl SessionPaths {
    pub fn resolve(config: &IndexConfig, session_id: &str) -> Result<Self> {
        validate_session_id(session_id)?;
        let dir = config.root.join(session_id);
        Ok(Self {
            index: dir.join(&config.index_file_name),
            metadata: dir.join(&config.metadata_file_name),
            dir,
        })
    }

    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.dir.join(LOCK_FILE_NAME)
    }
}

#[must_use]
pub fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Hard link to the committed metadata kept while a commit is in flight.
#[must_use]
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".prev");
    path.with_file_name(name)
}

#[must_use]
pub fn quarantine_path(path: &Path, unix_ms: u64) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".corrupt-{unix_ms}"));
    path.with_file_name(name)
}

/// Session ids become directory names. Anything that could escape the root
/// or alias another session is rejected rather than rewritten.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id != "."
        && session_id != ".."
        && session_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(SessionIndexError::InvalidSessionId(session_id.to_string()))
    }
}
