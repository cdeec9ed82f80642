// src/error.rs

use thiserror::Error;

/// Failures of the relational store. Uniqueness conflicts are not errors;
/// they come back as `InsertOutcome::Exists`.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A caller asked for a column the table does not have.
    #[error("unknown column '{column}' for table '{table}'")]
    UnknownColumn { table: &'static str, column: String },

    /// Deletes must always be filtered.
    #[error("refusing to delete from '{0}' without a filter")]
    EmptyFilter(&'static str),
}

/// Failures of the on-disk image / JSON artifact store.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid file name '{0}': must be a single path component")]
    InvalidFileName(String),

    #[error("failed to serialize artifact: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Failures of the external extraction call.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("vision API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("empty response from vision model")]
    EmptyResponse,

    #[error("{0} env var required for this backend")]
    MissingApiKey(&'static str),

    #[error("vision server not reachable at {0}")]
    Unreachable(String),

    #[error("failed to load prompt: {0}")]
    Prompt(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failures of the upload / delete lifecycle, which touches both the
/// database and the filesystem.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// An image with this name is already on disk without a receipt row.
    #[error("image file already exists at {0}")]
    ImageExists(std::path::PathBuf),
}
