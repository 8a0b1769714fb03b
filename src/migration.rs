//! Startup migration orchestration.
//!
//! Sequences schema migration, legacy store transfer, data-version
//! resolution, the repair passes, the marker update and default-resource
//! seeding under a single strictly-sequential control flow. Every stage is
//! idempotent, so a failed run is recovered by running again; the
//! orchestrator itself never retries.

use crate::config::InitConfig;
use crate::repair::{self, PassPolicy, RepairError};
use crate::store::{CatalogSource, MetaStore, StoreError, LAST_SOURCE_INDEX, LATEST_DATA_VERSION};
use crate::version;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("repair error: {0}")]
    Repair(#[from] RepairError),
    #[error("schema migration failed: {0}")]
    Schema(anyhow::Error),
    #[error("legacy store transfer failed: {0}")]
    Transfer(anyhow::Error),
}

/// Brings the physical schema to the version matching the current codebase.
pub trait SchemaMigrator {
    fn apply_latest_schema(&self, backup_enabled: bool) -> anyhow::Result<()>;
}

impl SchemaMigrator for MetaStore {
    fn apply_latest_schema(&self, backup_enabled: bool) -> anyhow::Result<()> {
        self.ensure_latest_schema(backup_enabled)?;
        Ok(())
    }
}

/// One-time bulk import from a prior non-relational storage format.
pub trait LegacyTransfer {
    fn transfer(&self) -> anyhow::Result<()>;
}

/// Stand-in used when no legacy store exists.
pub struct NoopLegacyTransfer;

impl LegacyTransfer for NoopLegacyTransfer {
    fn transfer(&self) -> anyhow::Result<()> {
        debug!("No legacy store configured, transfer is a no-op");
        Ok(())
    }
}

/// Orchestration phases, strictly sequential with no branching back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MigrationPhase {
    #[default]
    SchemaPending,
    LegacyTransferPending,
    VersionUnknown,
    VersionResolved,
    RepairPending,
    RepairDone,
    Seeded,
    Complete,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedStage {
    pub name: String,
    pub reason: String,
}

impl SkippedStage {
    fn new(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub projects_enriched: usize,
    pub tags_deleted: usize,
    pub orphan_tags: usize,
    pub previews_truncated: usize,
    pub preview_failures: usize,
}

/// Result of a startup migration run.
#[derive(Debug, Default)]
pub struct MigrationReport {
    /// Last phase reached. `Complete` on success.
    pub phase: MigrationPhase,
    pub schema_applied: bool,
    pub legacy_transferred: bool,
    pub resolved_version: Option<i64>,
    pub repairs: Option<RepairOutcome>,
    pub marker_written: Option<i64>,
    pub default_source_seeded: bool,
    /// Stages skipped and why.
    pub skipped: Vec<SkippedStage>,
}

/// Runs the whole startup sequence against an explicit store handle.
pub struct MigrationOrchestrator<'a> {
    store: &'a MetaStore,
    config: &'a InitConfig,
    schema: &'a dyn SchemaMigrator,
    legacy: &'a dyn LegacyTransfer,
}

impl<'a> MigrationOrchestrator<'a> {
    pub fn new(
        store: &'a MetaStore,
        config: &'a InitConfig,
        schema: &'a dyn SchemaMigrator,
        legacy: &'a dyn LegacyTransfer,
    ) -> Self {
        Self {
            store,
            config,
            schema,
            legacy,
        }
    }

    /// Run the startup migration to completion. `from_scratch` suppresses the
    /// legacy store transfer for brand-new deployments.
    pub fn run(&self, from_scratch: bool) -> Result<MigrationReport, MigrationError> {
        info!("Creating initial data");
        let mut report = MigrationReport::default();
        match self.run_phases(from_scratch, &mut report) {
            Ok(()) => {
                report.phase = MigrationPhase::Complete;
                info!("Initial data created");
                Ok(report)
            }
            Err(e) => {
                error!(phase = ?report.phase, error = %e, "Startup migration failed");
                report.phase = MigrationPhase::Failed;
                Err(e)
            }
        }
    }

    fn run_phases(
        &self,
        from_scratch: bool,
        report: &mut MigrationReport,
    ) -> Result<(), MigrationError> {
        report.phase = MigrationPhase::SchemaPending;
        if self.config.schema_migrations.is_enabled() {
            // A backup is only worth taking when the data is not already at
            // head; a fresh or fully-migrated store has nothing to lose.
            let backup_enabled =
                self.config.backup.is_enabled() && !version::is_latest_data_version(self.store)?;
            self.schema
                .apply_latest_schema(backup_enabled)
                .map_err(MigrationError::Schema)?;
            report.schema_applied = true;
        } else {
            info!("Schema migrations disabled, skipping");
            report
                .skipped
                .push(SkippedStage::new("schema", "disabled by configuration"));
        }

        report.phase = MigrationPhase::LegacyTransferPending;
        if from_scratch {
            info!("Initializing from scratch, skipping legacy store transfer");
            report
                .skipped
                .push(SkippedStage::new("legacy-transfer", "from scratch"));
        } else if self.config.legacy_transfer.is_enabled() {
            self.legacy.transfer().map_err(MigrationError::Transfer)?;
            report.legacy_transferred = true;
        } else {
            info!("Legacy store transfer disabled, skipping");
            report.skipped.push(SkippedStage::new(
                "legacy-transfer",
                "disabled by configuration",
            ));
        }

        if self.config.data_migrations.is_enabled() {
            report.phase = MigrationPhase::VersionUnknown;
            let current = version::resolve_current_data_version(self.store)?;
            report.phase = MigrationPhase::VersionResolved;
            report.resolved_version = Some(current);

            if current == LATEST_DATA_VERSION {
                info!(current, "Data version already at latest, no repairs needed");
            } else {
                info!(
                    current,
                    latest = LATEST_DATA_VERSION,
                    "Performing data migrations"
                );
                report.phase = MigrationPhase::RepairPending;
                let mut repairs = RepairOutcome::default();
                if current < 1 {
                    repairs.projects_enriched = repair::enrich_project_state(self.store)?;

                    let dedup = repair::dedup_artifact_tags(self.store)?;
                    repairs.tags_deleted = dedup.tags_deleted;
                    repairs.orphan_tags = dedup.orphan_tags;

                    let preview = repair::truncate_dataset_previews(
                        self.store,
                        repair::MAX_PREVIEW_COLUMNS,
                        PassPolicy::BestEffort,
                    )?;
                    repairs.previews_truncated = preview.artifacts_fixed;
                    repairs.preview_failures = preview.artifacts_failed;
                }
                report.phase = MigrationPhase::RepairDone;
                report.repairs = Some(repairs);

                self.store.write_data_version(LATEST_DATA_VERSION)?;
                report.marker_written = Some(LATEST_DATA_VERSION);
            }
        } else {
            info!("Data migrations disabled, skipping");
            report.skipped.push(SkippedStage::new(
                "data-migrations",
                "disabled by configuration",
            ));
        }

        self.seed_default_source(report)?;
        if let Some(seeded) = version::ensure_data_version(self.store)? {
            report.marker_written = Some(seeded);
        }
        report.phase = MigrationPhase::Seeded;

        Ok(())
    }

    fn seed_default_source(&self, report: &mut MigrationReport) -> Result<(), MigrationError> {
        let source_config = &self.config.default_source;
        if !source_config.create {
            info!("Not adding default catalog source, per configuration");
            return Ok(());
        }
        if self.store.get_catalog_source(&source_config.name)?.is_some() {
            return Ok(());
        }
        info!(name = %source_config.name, "Adding default catalog source");
        self.store.insert_catalog_source(&CatalogSource {
            idx: LAST_SOURCE_INDEX,
            name: source_config.name.clone(),
            description: source_config.description.clone(),
            url: source_config.url.clone(),
        })?;
        report.default_source_seeded = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct FailingSchema;
    impl SchemaMigrator for FailingSchema {
        fn apply_latest_schema(&self, _backup_enabled: bool) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("alembic exploded"))
        }
    }

    struct CountingTransfer {
        calls: Cell<usize>,
    }
    impl LegacyTransfer for CountingTransfer {
        fn transfer(&self) -> anyhow::Result<()> {
            self.calls.set(self.calls.get() + 1);
            Ok(())
        }
    }

    #[test]
    fn test_schema_failure_propagates() {
        let store = MetaStore::open_in_memory().unwrap();
        let config = InitConfig::default();
        let orchestrator =
            MigrationOrchestrator::new(&store, &config, &FailingSchema, &NoopLegacyTransfer);
        assert!(matches!(
            orchestrator.run(false),
            Err(MigrationError::Schema(_))
        ));
    }

    #[test]
    fn test_from_scratch_skips_legacy_transfer() {
        let store = MetaStore::open_in_memory().unwrap();
        let config = InitConfig::default();
        let transfer = CountingTransfer { calls: Cell::new(0) };
        let orchestrator = MigrationOrchestrator::new(&store, &config, &store, &transfer);

        let report = orchestrator.run(true).unwrap();
        assert_eq!(transfer.calls.get(), 0);
        assert!(!report.legacy_transferred);
        assert!(report
            .skipped
            .iter()
            .any(|s| s.name == "legacy-transfer" && s.reason == "from scratch"));
    }

    #[test]
    fn test_legacy_transfer_runs_when_enabled() {
        let store = MetaStore::open_in_memory().unwrap();
        let config = InitConfig::default();
        let transfer = CountingTransfer { calls: Cell::new(0) };
        let orchestrator = MigrationOrchestrator::new(&store, &config, &store, &transfer);

        let report = orchestrator.run(false).unwrap();
        assert_eq!(transfer.calls.get(), 1);
        assert!(report.legacy_transferred);
        assert_eq!(report.phase, MigrationPhase::Complete);
    }

    #[test]
    fn test_default_source_seeded_once() {
        let store = MetaStore::open_in_memory().unwrap();
        let config = InitConfig::default();
        let orchestrator =
            MigrationOrchestrator::new(&store, &config, &store, &NoopLegacyTransfer);

        let report = orchestrator.run(false).unwrap();
        assert!(report.default_source_seeded);

        let report = orchestrator.run(false).unwrap();
        assert!(!report.default_source_seeded);

        let source = store.get_catalog_source("hub").unwrap().unwrap();
        assert_eq!(source.idx, LAST_SOURCE_INDEX);
    }

    #[test]
    fn test_default_source_not_created_when_disabled() {
        let store = MetaStore::open_in_memory().unwrap();
        let mut config = InitConfig::default();
        config.default_source.create = false;
        let orchestrator =
            MigrationOrchestrator::new(&store, &config, &store, &NoopLegacyTransfer);

        let report = orchestrator.run(false).unwrap();
        assert!(!report.default_source_seeded);
        assert!(store.get_catalog_source("hub").unwrap().is_none());
    }
}
