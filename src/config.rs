use crate::error::ConfigError;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use std::{fs, path::Path};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub reconcile: ReconcileSection,
    #[serde(default)]
    pub vision: VisionSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageSection {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_image_dir")]
    pub image_dir: PathBuf,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: PathBuf,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("receipts/receipts.db")
}

fn default_image_dir() -> PathBuf {
    PathBuf::from("receipts/images")
}

fn default_artifact_dir() -> PathBuf {
    PathBuf::from("receipts/extracted_json")
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            image_dir: default_image_dir(),
            artifact_dir: default_artifact_dir(),
        }
    }
}

/// Tolerance used when comparing the declared total with the item sum.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ReconcileSection {
    /// Absolute floor, in receipt currency units.
    #[serde(default = "default_base_tolerance")]
    pub base_tolerance: f64,
    /// Fraction of the declared total.
    #[serde(default = "default_relative_tolerance")]
    pub relative_tolerance: f64,
}

fn default_base_tolerance() -> f64 {
    0.10
}

fn default_relative_tolerance() -> f64 {
    0.01
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            base_tolerance: default_base_tolerance(),
            relative_tolerance: default_relative_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisionBackend {
    Groq,
    Ollama,
    Remote,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionSection {
    #[serde(default = "default_backend")]
    pub backend: VisionBackend,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Overrides the built-in transcription prompt.
    #[serde(default)]
    pub ocr_prompt_path: Option<PathBuf>,
    /// Overrides the built-in JSON structuring prompt.
    #[serde(default)]
    pub json_prompt_path: Option<PathBuf>,
    #[serde(default = "default_groq")]
    pub groq: Endpoint,
    #[serde(default = "default_ollama")]
    pub ollama: Endpoint,
    #[serde(default = "default_remote")]
    pub remote: Endpoint,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Endpoint {
    pub base_url: String,
    pub model: String,
}

fn default_backend() -> VisionBackend {
    VisionBackend::Groq
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_groq() -> Endpoint {
    Endpoint {
        base_url: "https://api.groq.com/openai/v1".to_string(),
        model: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
    }
}

fn default_ollama() -> Endpoint {
    Endpoint {
        base_url: "http://localhost:11434/v1".to_string(),
        model: "llama3.2-vision".to_string(),
    }
}

fn default_remote() -> Endpoint {
    Endpoint {
        base_url: "https://api.openai.com/v1".to_string(),
        model: "gpt-4o-mini".to_string(),
    }
}

impl Default for VisionSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            timeout_ms: default_timeout_ms(),
            ocr_prompt_path: None,
            json_prompt_path: None,
            groq: default_groq(),
            ollama: default_ollama(),
            remote: default_remote(),
        }
    }
}

impl VisionSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Like `load`, but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match fs::read_to_string(path.as_ref()) {
            Ok(content) => Self::from_toml(&content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let cfg: Config = toml::from_str(content)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let r = &self.reconcile;
        let invalid = |t: f64| t.is_nan() || t < 0.0;
        if invalid(r.base_tolerance) || invalid(r.relative_tolerance) {
            return Err(ConfigError::Invalid(format!(
                "tolerances must be non-negative (base = {}, relative = {})",
                r.base_tolerance, r.relative_tolerance
            )));
        }
        if self.vision.timeout_ms == 0 {
            return Err(ConfigError::Invalid("vision.timeout_ms must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.storage.db_path, PathBuf::from("receipts/receipts.db"));
        assert_eq!(cfg.reconcile.base_tolerance, 0.10);
        assert_eq!(cfg.reconcile.relative_tolerance, 0.01);
        assert_eq!(cfg.vision.backend, VisionBackend::Groq);
        assert_eq!(cfg.vision.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_partial_sections() {
        let cfg = Config::from_toml(
            r#"
            [storage]
            artifact_dir = "out/json"

            [vision]
            backend = "ollama"
            timeout_ms = 500

            [vision.ollama]
            base_url = "http://gpu-box:11434/v1"
            model = "qwen2.5vl"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.storage.artifact_dir, PathBuf::from("out/json"));
        assert_eq!(cfg.storage.image_dir, PathBuf::from("receipts/images"));
        assert_eq!(cfg.vision.backend, VisionBackend::Ollama);
        assert_eq!(cfg.vision.ollama.model, "qwen2.5vl");
        assert_eq!(cfg.vision.groq.base_url, "https://api.groq.com/openai/v1");
    }

    #[test]
    fn test_rejects_negative_tolerance() {
        let err = Config::from_toml("[reconcile]\nbase_tolerance = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        let err = Config::from_toml("[reconcile]\nrelative_tolerance = nan\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let err = Config::from_toml("[vision]\ntimeout_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_or_default(dir.path().join("nope.toml")).unwrap();
        assert_eq!(cfg.vision.timeout_ms, 60_000);
    }
}
