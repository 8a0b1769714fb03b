//! Oversized dataset-preview truncation.
//!
//! Older clients stored dataset artifacts with unbounded preview metadata.
//! This pass trims the `header`, `preview` rows, `stats` keys and
//! `schema.fields` entries down to the allowed column count, rewriting the
//! payload in place without touching tag rows. Artifacts are independent, so
//! the pass runs per item: under the best-effort policy a malformed payload
//! is logged and skipped rather than aborting the run.

use crate::repair::{PassPolicy, RepairError};
use crate::store::{Artifact, MetaStore};
use serde_json::Value;
use tracing::{debug, info, warn};

/// Payload kind marking a dataset artifact.
pub const DATASET_KIND: &str = "dataset";

/// Maximum number of preview columns a dataset artifact may carry.
pub const MAX_PREVIEW_COLUMNS: usize = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreviewRepairReport {
    pub artifacts_fixed: usize,
    pub artifacts_failed: usize,
}

/// Truncate oversized previews on every dataset artifact in the store.
pub fn truncate_dataset_previews(
    store: &MetaStore,
    max_columns: usize,
    policy: PassPolicy,
) -> Result<PreviewRepairReport, RepairError> {
    info!("Fixing oversized dataset previews");
    let artifacts = store.list_artifacts()?;
    let mut report = PreviewRepairReport::default();

    for artifact in &artifacts {
        match repair_artifact_preview(store, artifact, max_columns) {
            Ok(true) => report.artifacts_fixed += 1,
            Ok(false) => {}
            Err(e) => match policy {
                PassPolicy::BestEffort => {
                    warn!(
                        project = %artifact.project,
                        key = %artifact.key,
                        uid = %artifact.uid,
                        error = %e,
                        "Failed fixing dataset artifact preview, continuing"
                    );
                    report.artifacts_failed += 1;
                }
                PassPolicy::FailFast => return Err(e),
            },
        }
    }

    Ok(report)
}

fn repair_artifact_preview(
    store: &MetaStore,
    artifact: &Artifact,
    max_columns: usize,
) -> Result<bool, RepairError> {
    let mut payload: Value = serde_json::from_str(&artifact.payload)
        .map_err(|e| RepairError::MalformedPayload(e.to_string()))?;

    if !truncate_dataset_payload(&mut payload, max_columns)? {
        return Ok(false);
    }

    debug!(
        project = %artifact.project,
        key = %artifact.key,
        uid = %artifact.uid,
        "Truncated oversized dataset preview, storing"
    );
    store.store_artifact_struct(artifact.id, &payload)?;
    Ok(true)
}

/// Truncate preview metadata in place. Returns whether the payload changed.
fn truncate_dataset_payload(payload: &mut Value, max_columns: usize) -> Result<bool, RepairError> {
    if payload.get("kind").and_then(Value::as_str) != Some(DATASET_KIND) {
        return Ok(false);
    }

    let header: Vec<String> = match payload.get("header") {
        Some(Value::Array(entries)) => entries
            .iter()
            .map(|entry| {
                entry
                    .as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| RepairError::MalformedPayload("non-string header entry".into()))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(RepairError::MalformedPayload("header is not an array".into()));
        }
        None => return Ok(false),
    };
    if header.len() <= max_columns {
        return Ok(false);
    }
    let columns_to_remove: Vec<String> = header[max_columns..].to_vec();

    // Align preview rows.
    if let Some(Value::Array(rows)) = payload.get_mut("preview") {
        for row in rows.iter_mut() {
            match row {
                Value::Array(cells) => {
                    if cells.len() < max_columns {
                        // Header oversized but this row already fits: the data
                        // is inconsistent with the header. Leave the row as is.
                        warn!(
                            row_len = cells.len(),
                            max_columns,
                            "Preview row shorter than oversized header, leaving row as is"
                        );
                    } else {
                        cells.truncate(max_columns);
                    }
                }
                _ => {
                    return Err(RepairError::MalformedPayload(
                        "preview row is not an array".into(),
                    ));
                }
            }
        }
    }

    // Align stats.
    if let Some(Value::Object(stats)) = payload.get_mut("stats") {
        for column in &columns_to_remove {
            stats.remove(column);
        }
    }

    // Align schema fields.
    if let Some(Value::Array(fields)) = payload
        .get_mut("schema")
        .and_then(|schema| schema.get_mut("fields"))
    {
        fields.retain(|field| {
            field
                .get("name")
                .and_then(Value::as_str)
                .map_or(true, |name| !columns_to_remove.iter().any(|c| c == name))
        });
    }

    // Lastly, align the header itself.
    if let Some(Value::Array(entries)) = payload.get_mut("header") {
        entries.truncate(max_columns);
    }

    Ok(true)
}
