use crate::error::{Result, SessionIndexError};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_ROOT: &str = "data/vector_store";
pub const DEFAULT_INDEX_FILE_NAME: &str = "vector_index.json";
pub const DEFAULT_METADATA_FILE_NAME: &str = "meta.json";
pub const DEFAULT_K: usize = 3;

/// Where and how session artifacts are stored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Directory holding one sub-directory per session.
    pub root: PathBuf,
    pub index_file_name: String,
    pub metadata_file_name: String,
    pub default_k: usize,
    /// `fsync` temp files and the session directory on every save.
    pub sync_writes: bool,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            index_file_name: DEFAULT_INDEX_FILE_NAME.to_string(),
            metadata_file_name: DEFAULT_METADATA_FILE_NAME.to_string(),
            default_k: DEFAULT_K,
            sync_writes: true,
        }
    }
}

impl IndexConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Reads `DOCMIND_INDEX_PATH`, `DOCMIND_INDEX_DEFAULT_K` and
    /// `DOCMIND_INDEX_SYNC`; unset variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(root) = env::var("DOCMIND_INDEX_PATH") {
            if !root.trim().is_empty() {
                config.root = PathBuf::from(root.trim());
            }
        }
        if let Ok(raw) = env::var("DOCMIND_INDEX_DEFAULT_K") {
            config.default_k = raw.trim().parse::<usize>().map_err(|_| {
                SessionIndexError::Config(format!(
                    "DOCMIND_INDEX_DEFAULT_K must be a non-negative integer, got '{raw}'"
                ))
            })?;
        }
        if let Ok(raw) = env::var("DOCMIND_INDEX_SYNC") {
            config.sync_writes = parse_bool(&raw).ok_or_else(|| {
                SessionIndexError::Config(format!(
                    "DOCMIND_INDEX_SYNC must be true/false/1/0, got '{raw}'"
                ))
            })?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)
            .map_err(|err| SessionIndexError::Config(format!("invalid index config: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|err| SessionIndexError::persistence(path, err))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        for (field, name) in [
            ("index_file_name", &self.index_file_name),
            ("metadata_file_name", &self.metadata_file_name),
        ] {
            if name.is_empty()
                || name == "."
                || name == ".."
                || name.contains(['/', '\\'])
            {
                return Err(SessionIndexError::Config(format!(
                    "{field} must be a plain file name, got '{name}'"
                )));
            }
        }
        if self.index_file_name == self.metadata_file_name {
            return Err(SessionIndexError::Config(
                "index_file_name and metadata_file_name must differ".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
