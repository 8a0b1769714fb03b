//! Data-version resolution under incomplete evidence.
//!
//! When the marker cannot be read the resolver falls back to structural
//! evidence: no evidence of prior use means the store is fresh and starts at
//! the latest version; evidence of use without version tracking means the
//! store predates tracking. The project-count check runs before the failure
//! reason is consulted so an empty-but-already-upgraded store is never
//! misclassified as legacy.

use crate::store::{
    MetaStore, StoreError, VersionRead, DATA_VERSION_PRIOR_TO_TABLE_ADDITION, LATEST_DATA_VERSION,
};
use tracing::info;

/// Resolve the effective current data version.
pub fn resolve_current_data_version(store: &MetaStore) -> Result<i64, StoreError> {
    let reason = match store.read_data_version()? {
        VersionRead::Value(version) => return Ok(version),
        reason => reason,
    };

    // Marker unreadable: fall back to what the store contents say. A broken
    // project listing counts as "no projects" because a store that cannot
    // even list projects has never been used.
    let projects = match store.list_projects() {
        Ok(projects) => Some(projects),
        Err(StoreError::Sqlite(e)) => {
            info!(error = %e, "Could not list projects while resolving data version");
            None
        }
        Err(e) => return Err(e),
    };

    if projects.map_or(true, |p| p.is_empty()) {
        info!(
            version = LATEST_DATA_VERSION,
            "No projects in store, assuming latest data version"
        );
        return Ok(LATEST_DATA_VERSION);
    }

    if reason == VersionRead::TableMissing {
        info!(
            version = DATA_VERSION_PRIOR_TO_TABLE_ADDITION,
            "Data version table does not exist, assuming pre-tracking version"
        );
    } else {
        info!(
            version = DATA_VERSION_PRIOR_TO_TABLE_ADDITION,
            "Data version table exists without a version row, assuming pre-tracking version"
        );
    }
    Ok(DATA_VERSION_PRIOR_TO_TABLE_ADDITION)
}

/// Seed the marker with the resolved version if none exists yet. Returns the
/// seeded version, or `None` when a marker was already present.
pub fn ensure_data_version(store: &MetaStore) -> Result<Option<i64>, StoreError> {
    if let VersionRead::Value(_) = store.read_data_version()? {
        return Ok(None);
    }
    let version = resolve_current_data_version(store)?;
    info!(version, "No data version marker, seeding resolved version");
    store.write_data_version(version)?;
    Ok(Some(version))
}

/// Whether the store is already at the latest data version.
pub fn is_latest_data_version(store: &MetaStore) -> Result<bool, StoreError> {
    Ok(resolve_current_data_version(store)? == LATEST_DATA_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROJECTS_ONLY_SQL: &str = "
        CREATE TABLE projects (
          id INTEGER PRIMARY KEY AUTOINCREMENT,
          name TEXT NOT NULL UNIQUE,
          desired_state TEXT,
          state TEXT,
          created_at TEXT NOT NULL
        );
    ";

    #[test]
    fn test_fresh_store_resolves_latest() {
        // No tables at all: the project listing is broken, which reads as a
        // brand-new store.
        let store = MetaStore::open_in_memory().unwrap();
        assert_eq!(
            resolve_current_data_version(&store).unwrap(),
            LATEST_DATA_VERSION
        );
    }

    #[test]
    fn test_empty_upgraded_store_resolves_latest() {
        // Full schema, zero projects, no marker row. Project count must win
        // over the row-missing reason.
        let store = MetaStore::open_in_memory().unwrap();
        store.ensure_latest_schema(false).unwrap();
        assert_eq!(
            resolve_current_data_version(&store).unwrap(),
            LATEST_DATA_VERSION
        );
    }

    #[test]
    fn test_used_store_without_marker_table_resolves_pre_tracking() {
        let store = MetaStore::open_in_memory().unwrap();
        store.execute_batch(PROJECTS_ONLY_SQL).unwrap();
        store.insert_project("legacy", None, None).unwrap();
        assert_eq!(
            resolve_current_data_version(&store).unwrap(),
            DATA_VERSION_PRIOR_TO_TABLE_ADDITION
        );
    }

    #[test]
    fn test_used_store_without_marker_row_resolves_pre_tracking() {
        let store = MetaStore::open_in_memory().unwrap();
        store.ensure_latest_schema(false).unwrap();
        store.insert_project("legacy", None, None).unwrap();
        assert_eq!(
            resolve_current_data_version(&store).unwrap(),
            DATA_VERSION_PRIOR_TO_TABLE_ADDITION
        );
    }

    #[test]
    fn test_marker_value_wins_regardless_of_projects() {
        let store = MetaStore::open_in_memory().unwrap();
        store.ensure_latest_schema(false).unwrap();
        store.insert_project("p", None, None).unwrap();
        store.write_data_version(7).unwrap();
        assert_eq!(resolve_current_data_version(&store).unwrap(), 7);
    }

    #[test]
    fn test_invalid_marker_propagates() {
        let store = MetaStore::open_in_memory().unwrap();
        store.ensure_latest_schema(false).unwrap();
        store
            .execute_batch(
                "INSERT INTO data_versions (version, created_at) VALUES ('x', '2021-01-01T00:00:00Z');",
            )
            .unwrap();
        assert!(matches!(
            resolve_current_data_version(&store),
            Err(StoreError::InvalidMarker(_))
        ));
    }

    #[test]
    fn test_ensure_seeds_marker_once() {
        let store = MetaStore::open_in_memory().unwrap();
        store.ensure_latest_schema(false).unwrap();

        let seeded = ensure_data_version(&store).unwrap();
        assert_eq!(seeded, Some(LATEST_DATA_VERSION));

        // Second call is a no-op.
        assert_eq!(ensure_data_version(&store).unwrap(), None);
        assert_eq!(
            store.read_data_version().unwrap(),
            VersionRead::Value(LATEST_DATA_VERSION)
        );
    }

    #[test]
    fn test_ensure_seeds_pre_tracking_version_for_legacy_store() {
        let store = MetaStore::open_in_memory().unwrap();
        store.ensure_latest_schema(false).unwrap();
        store.insert_project("legacy", None, None).unwrap();

        let seeded = ensure_data_version(&store).unwrap();
        assert_eq!(seeded, Some(DATA_VERSION_PRIOR_TO_TABLE_ADDITION));
        assert!(!is_latest_data_version(&store).unwrap());
    }
}
