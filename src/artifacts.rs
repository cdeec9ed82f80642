// src/artifacts.rs

//! On-disk companions of a receipt row: the uploaded image and the JSON
//! artifact written after a successful parse. Both are keyed by the receipt's
//! file name and never overwritten.

use crate::error::ArtifactError;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{info, warn};

/// Outcome of a refuse-if-exists write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(PathBuf),
    AlreadyExists(PathBuf),
}

impl WriteOutcome {
    pub fn path(&self) -> &Path {
        match self {
            WriteOutcome::Written(p) | WriteOutcome::AlreadyExists(p) => p,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    image_dir: PathBuf,
    artifact_dir: PathBuf,
}

/// Receipt file names are used as keys on disk, so they must be a single
/// plain path component.
pub fn validate_file_name(name: &str) -> Result<&str, ArtifactError> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.contains('\0');
    if bad {
        return Err(ArtifactError::InvalidFileName(name.to_string()));
    }
    Ok(name)
}

/// `scontrino5.jpg` -> `scontrino5.json`.
pub fn artifact_name(file_name: &str) -> Result<String, ArtifactError> {
    let name = validate_file_name(file_name)?;
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ArtifactError::InvalidFileName(name.to_string()))?;
    Ok(format!("{stem}.json"))
}

impl ArtifactStore {
    pub fn new(image_dir: impl Into<PathBuf>, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            image_dir: image_dir.into(),
            artifact_dir: artifact_dir.into(),
        }
    }

    pub fn ensure_dirs(&self) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.image_dir)?;
        fs::create_dir_all(&self.artifact_dir)?;
        Ok(())
    }

    pub fn image_path(&self, file_name: &str) -> Result<PathBuf, ArtifactError> {
        Ok(self.image_dir.join(validate_file_name(file_name)?))
    }

    pub fn json_path(&self, file_name: &str) -> Result<PathBuf, ArtifactError> {
        Ok(self.artifact_dir.join(artifact_name(file_name)?))
    }

    pub fn json_exists(&self, file_name: &str) -> Result<bool, ArtifactError> {
        Ok(self.json_path(file_name)?.exists())
    }

    /// Store uploaded image bytes; an existing file is left untouched.
    pub fn save_image(&self, file_name: &str, bytes: &[u8]) -> Result<WriteOutcome, ArtifactError> {
        let path = self.image_path(file_name)?;
        fs::create_dir_all(&self.image_dir)?;
        write_new(&path, bytes)
    }

    pub fn read_image(&self, file_name: &str) -> Result<Vec<u8>, ArtifactError> {
        Ok(fs::read(self.image_path(file_name)?)?)
    }

    /// Write the receipt JSON artifact. The content lands in a uniquely named
    /// temporary file first and is then persisted without replacing, so the
    /// final name never holds a partial file and an existing artifact is
    /// never replaced.
    pub fn write_json<T: Serialize>(
        &self,
        file_name: &str,
        value: &T,
    ) -> Result<WriteOutcome, ArtifactError> {
        let path = self.json_path(file_name)?;
        fs::create_dir_all(&self.artifact_dir)?;

        let json = serde_json::to_string_pretty(value)?;
        let mut tmp = NamedTempFile::new_in(&self.artifact_dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.as_file().sync_all()?;

        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                info!(path = %path.display(), bytes = json.len(), "JSON artifact written");
                Ok(WriteOutcome::Written(path))
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                warn!(path = %path.display(), "JSON artifact already exists, not overwriting");
                Ok(WriteOutcome::AlreadyExists(path))
            }
            Err(e) => Err(e.error.into()),
        }
    }

    pub fn read_json(&self, file_name: &str) -> Result<Option<String>, ArtifactError> {
        match fs::read_to_string(self.json_path(file_name)?) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// `true` if an image was removed, `false` if there was none.
    pub fn remove_image(&self, file_name: &str) -> Result<bool, ArtifactError> {
        remove_if_present(&self.image_path(file_name)?)
    }

    pub fn remove_json(&self, file_name: &str) -> Result<bool, ArtifactError> {
        remove_if_present(&self.json_path(file_name)?)
    }
}

fn write_new(path: &Path, bytes: &[u8]) -> Result<WriteOutcome, ArtifactError> {
    match fs::OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(mut f) => {
            f.write_all(bytes)?;
            Ok(WriteOutcome::Written(path.to_path_buf()))
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            Ok(WriteOutcome::AlreadyExists(path.to_path_buf()))
        }
        Err(e) => Err(e.into()),
    }
}

fn remove_if_present(path: &Path) -> Result<bool, ArtifactError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
