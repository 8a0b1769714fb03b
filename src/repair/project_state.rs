//! Project state enrichment: backfill the two nullable state fields left
//! behind by older releases.

use crate::repair::RepairError;
use crate::store::MetaStore;
use tracing::{debug, info};

/// Canonical default for a project's desired state.
pub const PROJECT_STATE_ONLINE: &str = "online";

/// Set `desired_state` to the canonical online value where unset, then
/// default `state` to `desired_state` where unset. Only changed projects are
/// written back. Re-running after success is a no-op.
pub fn enrich_project_state(store: &MetaStore) -> Result<usize, RepairError> {
    info!("Enriching project state");
    let projects = store.list_projects()?;
    let mut enriched = 0;
    for mut project in projects {
        let mut changed = false;
        if is_unset(project.desired_state.as_deref()) {
            project.desired_state = Some(PROJECT_STATE_ONLINE.to_string());
            changed = true;
        }
        if is_unset(project.state.as_deref()) {
            project.state = project.desired_state.clone();
            changed = true;
        }
        if changed {
            debug!(name = %project.name, "Found project without state data, enriching");
            store.store_project(&project)?;
            enriched += 1;
        }
    }
    Ok(enriched)
}

// Historical rows hold NULL or empty strings interchangeably.
fn is_unset(value: Option<&str>) -> bool {
    value.map_or(true, str::is_empty)
}
