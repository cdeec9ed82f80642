// src/ingest.rs

//! One-receipt ingestion: extraction call, JSON span, parse, reconciliation,
//! artifact, database. Every outcome is reported as an [`IngestStatus`];
//! nothing escapes as an error.

use crate::artifacts::{ArtifactStore, WriteOutcome, validate_file_name};
use crate::config::{Config, ReconcileSection};
use crate::error::{ArtifactError, LifecycleError, StoreError};
use crate::json_span::{JsonSpan, locate_json};
use crate::receipt::ReceiptData;
use crate::receipt_db::{ExtractedHeader, InsertOutcome, ItemRow, ReceiptStore};
use crate::reconcile::{ReconcileWarning, reconcile};
use crate::vision_extract::Extractor;
use std::fmt;
use std::time::Duration;
use tracing::{Instrument, error, info, info_span, warn};

/// Final status of one ingestion run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestStatus {
    Success,
    /// The receipt already had extracted data; nothing changed.
    Duplicate,
    EmptyExtraction,
    NoJsonFound,
    InvalidJson(String),
    OrphanReceipt,
    Error(String),
}

impl IngestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStatus::Success => "success",
            IngestStatus::Duplicate => "duplicate",
            IngestStatus::EmptyExtraction => "empty_extraction",
            IngestStatus::NoJsonFound => "no_json_found",
            IngestStatus::InvalidJson(_) => "invalid_json",
            IngestStatus::OrphanReceipt => "orphan_receipt",
            IngestStatus::Error(_) => "error",
        }
    }

    /// `success` and `duplicate` are both fine outcomes.
    pub fn is_failure(&self) -> bool {
        !matches!(self, IngestStatus::Success | IngestStatus::Duplicate)
    }
}

impl fmt::Display for IngestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestStatus::InvalidJson(msg) | IngestStatus::Error(msg) => {
                write!(f, "{}: {msg}", self.as_str())
            }
            other => f.write_str(other.as_str()),
        }
    }
}

impl From<StoreError> for IngestStatus {
    fn from(e: StoreError) -> Self {
        IngestStatus::Error(e.to_string())
    }
}

impl From<ArtifactError> for IngestStatus {
    fn from(e: ArtifactError) -> Self {
        IngestStatus::Error(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct IngestReport {
    pub file_name: String,
    pub status: IngestStatus,
    pub warnings: Vec<ReconcileWarning>,
    pub artifact: Option<WriteOutcome>,
    pub extracted_data_id: Option<i64>,
    pub items: usize,
}

impl IngestReport {
    fn new(file_name: &str, status: IngestStatus) -> Self {
        Self {
            file_name: file_name.to_string(),
            status,
            warnings: Vec::new(),
            artifact: None,
            extracted_data_id: None,
            items: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Saved { receipt_id: i64 },
    /// A receipt with this file name is already registered.
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalReport {
    pub row_deleted: bool,
    pub image_deleted: bool,
    pub artifact_deleted: bool,
}

pub struct IngestionCoordinator {
    store: ReceiptStore,
    artifacts: ArtifactStore,
    reconcile: ReconcileSection,
    timeout: Duration,
}

impl IngestionCoordinator {
    pub fn new(config: &Config, store: ReceiptStore) -> Self {
        Self {
            store,
            artifacts: ArtifactStore::new(&config.storage.image_dir, &config.storage.artifact_dir),
            reconcile: config.reconcile,
            timeout: config.vision.timeout(),
        }
    }

    pub fn store(&self) -> &ReceiptStore {
        &self.store
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Register an uploaded image: the receipt row is the dedup guard, the
    /// image is only written once the row is in. If the image cannot be
    /// written as new, the row is removed again.
    pub fn upload(&self, file_name: &str, bytes: &[u8]) -> Result<UploadOutcome, LifecycleError> {
        validate_file_name(file_name)?;
        let receipt_id = match self.store.insert_receipt(file_name)? {
            InsertOutcome::Exists => {
                info!(file = %file_name, "Receipt already registered, skipping upload");
                return Ok(UploadOutcome::AlreadyExists);
            }
            InsertOutcome::Inserted(id) => id,
        };

        let failure = match self.artifacts.save_image(file_name, bytes) {
            Ok(WriteOutcome::Written(path)) => {
                info!(file = %file_name, path = %path.display(), "Image stored");
                return Ok(UploadOutcome::Saved { receipt_id });
            }
            Ok(WriteOutcome::AlreadyExists(path)) => {
                warn!(path = %path.display(), "Stray image file already on disk, refusing upload");
                LifecycleError::ImageExists(path)
            }
            Err(e) => e.into(),
        };
        if let Err(cleanup) = self.store.delete_receipt(file_name) {
            error!(file = %file_name, error = %cleanup, "Failed to roll back receipt row");
        }
        Err(failure)
    }

    /// Delete a receipt row (cascading to its data), its image and its JSON
    /// artifact, in that order. Any of the three may already be gone.
    pub fn remove(&self, file_name: &str) -> Result<RemovalReport, LifecycleError> {
        validate_file_name(file_name)?;
        let report = RemovalReport {
            row_deleted: self.store.delete_receipt(file_name)?,
            image_deleted: self.artifacts.remove_image(file_name)?,
            artifact_deleted: self.artifacts.remove_json(file_name)?,
        };
        info!(file = %file_name, ?report, "Receipt removed");
        Ok(report)
    }

    /// Full pipeline: read the stored image, call the extractor under the
    /// configured timeout, then [`ingest_text`](Self::ingest_text).
    pub async fn ingest(&self, file_name: &str, extractor: &dyn Extractor) -> IngestReport {
        let image = match self.artifacts.read_image(file_name) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(file = %file_name, error = %e, "Cannot read receipt image");
                return IngestReport::new(file_name, e.into());
            }
        };

        let span = info_span!("extract", file = %file_name, bytes = image.len());
        let raw = match tokio::time::timeout(self.timeout, extractor.extract(&image))
            .instrument(span)
            .await
        {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                error!(file = %file_name, error = %e, "Extraction call failed");
                return IngestReport::new(file_name, IngestStatus::Error(e.to_string()));
            }
            Err(_) => {
                warn!(file = %file_name, timeout_ms = self.timeout.as_millis() as u64, "Extraction call timed out");
                String::new()
            }
        };

        self.ingest_text(file_name, &raw)
    }

    /// Steps after the extraction call, on already-obtained model output.
    pub fn ingest_text(&self, file_name: &str, raw: &str) -> IngestReport {
        let span = info_span!("ingest", file = %file_name);
        let _guard = span.enter();

        let mut report = IngestReport::new(file_name, IngestStatus::Success);
        report.status = self
            .process(file_name, raw, &mut report)
            .unwrap_or_else(|stopped| stopped);

        if report.status.is_failure() {
            warn!(status = %report.status, "Ingestion stopped");
        } else {
            info!(
                status = report.status.as_str(),
                warnings = report.warnings.len(),
                items = report.items,
                "Ingestion finished"
            );
        }
        report
    }

    /// `Err` carries the status at which the run stopped early.
    fn process(
        &self,
        file_name: &str,
        raw: &str,
        report: &mut IngestReport,
    ) -> Result<IngestStatus, IngestStatus> {
        if raw.trim().is_empty() {
            return Err(IngestStatus::EmptyExtraction);
        }

        let json = match locate_json(raw) {
            JsonSpan::Found(span) => span,
            JsonSpan::Truncated(_) => {
                return Err(IngestStatus::InvalidJson("unterminated JSON object".into()));
            }
            JsonSpan::Missing => return Err(IngestStatus::NoJsonFound),
        };

        let parsed = ReceiptData::from_json(json)
            .map_err(|e| IngestStatus::InvalidJson(e.to_string()))?;
        let (filled, total) = parsed.coverage();
        info!(
            filled,
            total,
            store = ?parsed.store_name,
            total_price = ?parsed.total_price(),
            items = parsed.items.len(),
            "Parsed receipt JSON"
        );

        let reconciled = reconcile(parsed, &self.reconcile);
        for w in &reconciled.warnings {
            warn!(warning = %w, "Reconciliation");
        }
        report.warnings = reconciled.warnings;
        let receipt = reconciled.receipt;

        // Never overwritten; an existing artifact means a previous run got
        // this far, and the database decides what happens next.
        let artifact = self.artifacts.write_json(file_name, &receipt)?;
        report.artifact = Some(artifact);

        let receipt_id = self
            .store
            .receipt_id(file_name)?
            .ok_or(IngestStatus::OrphanReceipt)?;

        let header = ExtractedHeader::from(&receipt);
        let items: Vec<ItemRow> = receipt.items.iter().map(ItemRow::from).collect();
        match self.store.commit_extraction(receipt_id, &header, &items)? {
            InsertOutcome::Exists => Ok(IngestStatus::Duplicate),
            InsertOutcome::Inserted(id) => {
                report.extracted_data_id = Some(id);
                report.items = items.len();
                Ok(IngestStatus::Success)
            }
        }
    }
}
