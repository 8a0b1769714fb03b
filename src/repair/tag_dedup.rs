//! Artifact tag deduplication.
//!
//! A (project, key, tag-name) scope must hold exactly one tag row. Historical
//! data can hold several, pointing at different artifact records. The pass
//! keeps the tag on the most recently updated artifact and stages every other
//! tag for deletion. All deletions are computed first and applied as one
//! transaction at the end, so an interruption mid-compute leaves the store in
//! its pre-repair state.

use crate::repair::RepairError;
use crate::store::{Artifact, ArtifactTag, MetaStore};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TagDedupReport {
    pub tags_deleted: usize,
    /// Tags referencing an artifact record absent from the snapshot. Logged
    /// and excluded from tie-breaking, never fatal.
    pub orphan_tags: usize,
    /// Groups whose winner was chosen among artifacts sharing the exact same
    /// update time.
    pub ambiguous_ties: usize,
    /// Groups where no artifact carried an update time at all.
    pub untimestamped_groups: usize,
}

/// Remove duplicated artifact tags across the whole store.
pub fn dedup_artifact_tags(store: &MetaStore) -> Result<TagDedupReport, RepairError> {
    info!("Fixing artifact tag duplications");
    let artifacts = store.list_artifacts()?;
    let tags = store.list_tags()?;

    let plan = plan_dedup(&artifacts, &tags);
    if !plan.tags_to_delete.is_empty() {
        info!(
            count = plan.tags_to_delete.len(),
            "Found duplicated artifact tags, removing duplications"
        );
        store.delete_tags(&plan.tags_to_delete)?;
    }

    Ok(TagDedupReport {
        tags_deleted: plan.tags_to_delete.len(),
        orphan_tags: plan.orphan_tags,
        ambiguous_ties: plan.ambiguous_ties,
        untimestamped_groups: plan.untimestamped_groups,
    })
}

#[derive(Debug, Default)]
struct DedupPlan {
    tags_to_delete: Vec<i64>,
    orphan_tags: usize,
    ambiguous_ties: usize,
    untimestamped_groups: usize,
}

enum TieBreak {
    Clean,
    SharedTimestamp,
    NoTimestamps,
}

/// Pure compute stage: which tag rows must go. No mutation happens here.
fn plan_dedup(artifacts: &[Artifact], tags: &[ArtifactTag]) -> DedupPlan {
    let mut plan = DedupPlan::default();

    let artifacts_by_id: HashMap<i64, &Artifact> =
        artifacts.iter().map(|artifact| (artifact.id, artifact)).collect();

    // (project, key, tag name) -> tags in input order.
    let mut groups: BTreeMap<(String, String, String), Vec<&ArtifactTag>> = BTreeMap::new();
    for tag in tags {
        match artifacts_by_id.get(&tag.obj_id) {
            Some(artifact) => {
                groups
                    .entry((artifact.project.clone(), artifact.key.clone(), tag.name.clone()))
                    .or_default()
                    .push(tag);
            }
            None => {
                warn!(
                    tag_id = tag.id,
                    name = %tag.name,
                    obj_id = tag.obj_id,
                    "Found orphan artifact tag, excluding it from deduplication"
                );
                plan.orphan_tags += 1;
            }
        }
    }

    for ((project, key, name), group) in &groups {
        if group.len() < 2 {
            continue;
        }

        let referenced: HashSet<i64> = group.iter().map(|tag| tag.obj_id).collect();
        // Candidates in original listing order, so ties and the no-timestamp
        // fallback both resolve to the first artifact encountered.
        let candidates: Vec<&Artifact> = artifacts
            .iter()
            .filter(|artifact| referenced.contains(&artifact.id))
            .collect();

        let (winner, tie_break) = find_last_updated(&candidates);
        match tie_break {
            TieBreak::Clean => {}
            TieBreak::SharedTimestamp => {
                warn!(
                    project = %project,
                    key = %key,
                    tag = %name,
                    "Several artifacts share the latest update time, keeping the first"
                );
                plan.ambiguous_ties += 1;
            }
            TieBreak::NoTimestamps => {
                warn!(
                    project = %project,
                    key = %key,
                    tag = %name,
                    "No artifact in tag group has an update time, keeping the first"
                );
                plan.untimestamped_groups += 1;
            }
        }

        for tag in group {
            if tag.obj_id != winner.id {
                debug!(
                    tag_id = tag.id,
                    tag = %name,
                    obj_id = tag.obj_id,
                    winner = winner.id,
                    "Staging duplicated tag for deletion"
                );
                plan.tags_to_delete.push(tag.id);
            }
        }
    }

    plan
}

/// The artifact with the latest `updated` timestamp. Ties keep the first
/// candidate; candidates without any timestamp fall back to the first one.
/// Callers guarantee `candidates` is non-empty.
fn find_last_updated<'a>(candidates: &[&'a Artifact]) -> (&'a Artifact, TieBreak) {
    debug_assert!(!candidates.is_empty());
    let mut winner: Option<&Artifact> = None;
    let mut winner_time = None;
    let mut at_winner_time = 0usize;

    for &artifact in candidates {
        let Some(updated) = artifact.updated else {
            continue;
        };
        match winner_time {
            None => {
                winner = Some(artifact);
                winner_time = Some(updated);
                at_winner_time = 1;
            }
            Some(current) if updated > current => {
                winner = Some(artifact);
                winner_time = Some(updated);
                at_winner_time = 1;
            }
            Some(current) if updated == current => at_winner_time += 1,
            Some(_) => {}
        }
    }

    match winner {
        Some(artifact) if at_winner_time > 1 => (artifact, TieBreak::SharedTimestamp),
        Some(artifact) => (artifact, TieBreak::Clean),
        None => (candidates[0], TieBreak::NoTimestamps),
    }
}
