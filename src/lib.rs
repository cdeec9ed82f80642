//! Receipt ingestion core: turn vision-model output for a receipt image into
//! a reconciled, idempotently stored purchase record.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod ingest;
pub mod json_span;
pub mod receipt;
pub mod receipt_db;
pub mod reconcile;
pub mod vision_extract;

pub use config::Config;
pub use ingest::{IngestReport, IngestStatus, IngestionCoordinator};
pub use receipt_db::{InsertOutcome, ReceiptStore, Table};
pub use vision_extract::{Extractor, VisionClient};
