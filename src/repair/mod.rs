//! Idempotent repair passes over historically-corrupted data.
//!
//! Each pass is self-contained and safe to re-run after success. Enrichment
//! and tag deduplication run fail-fast; preview truncation runs best-effort
//! per artifact because artifacts are independent and partial progress is a
//! resumable outcome.

pub mod preview;
pub mod project_state;
pub mod tag_dedup;

pub use preview::{truncate_dataset_previews, PreviewRepairReport, MAX_PREVIEW_COLUMNS};
pub use project_state::{enrich_project_state, PROJECT_STATE_ONLINE};
pub use tag_dedup::{dedup_artifact_tags, TagDedupReport};

use crate::store::StoreError;
use thiserror::Error;

/// How a pass reacts to a failure on a single item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPolicy {
    /// Any item failure aborts the pass.
    FailFast,
    /// Item failures are logged and skipped; the pass continues.
    BestEffort,
}

#[derive(Debug, Error)]
pub enum RepairError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("malformed artifact payload: {0}")]
    MalformedPayload(String),
}
