//! SQLite-backed metadata store for the platform (projects, artifacts, tags,
//! catalog sources) plus the data-version marker the migration engine keys on.
//!
//! The marker read is deliberately three-valued: a missing table, a missing
//! row and a present value are distinct, distinguishable states. The mapping
//! from SQLite's "no such table" failure happens here, once, so callers never
//! have to match on error strings.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Data version the current codebase writes.
pub const LATEST_DATA_VERSION: i64 = 1;

/// Data version assumed for stores created before version tracking existed.
/// Stores with evidence of prior use but no `data_versions` table predate the
/// table's introduction and still need the version 1 repairs.
pub const DATA_VERSION_PRIOR_TO_TABLE_ADDITION: i64 = 0;

/// Index reserved for the default catalog source.
pub const LAST_SOURCE_INDEX: i64 = -1;

const LATEST_SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS data_versions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  version TEXT NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL UNIQUE,
  desired_state TEXT,
  state TEXT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS artifacts (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  project TEXT NOT NULL,
  key TEXT NOT NULL,
  uid TEXT NOT NULL,
  struct_json TEXT NOT NULL,
  updated TEXT
);
CREATE INDEX IF NOT EXISTS idx_artifacts_project_key ON artifacts(project, key);

CREATE TABLE IF NOT EXISTS artifact_tags (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  project TEXT NOT NULL,
  name TEXT NOT NULL,
  obj_id INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_artifact_tags_project_name ON artifact_tags(project, name);

CREATE TABLE IF NOT EXISTS catalog_sources (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  idx INTEGER NOT NULL,
  name TEXT NOT NULL UNIQUE,
  description TEXT,
  url TEXT,
  created_at TEXT NOT NULL
);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid data version marker: {0:?}")]
    InvalidMarker(String),
    #[error("store has no backing file to back up")]
    NoBackingFile,
}

/// Outcome of reading the data-version marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionRead {
    /// Marker present, parsed.
    Value(i64),
    /// The `data_versions` table itself does not exist.
    TableMissing,
    /// Table exists but holds no row.
    RowMissing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub desired_state: Option<String>,
    pub state: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub id: i64,
    pub project: String,
    pub key: String,
    pub uid: String,
    /// Raw JSON payload. Parsed lazily by the repair passes so one malformed
    /// document cannot fail a snapshot read.
    pub payload: String,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactTag {
    pub id: i64,
    pub project: String,
    pub name: String,
    pub obj_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogSource {
    pub idx: i64,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
}

/// Metadata store handle. Owns a single connection; the orchestration run is
/// single-threaded so no pooling is needed.
pub struct MetaStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl MetaStore {
    /// Open or create the store at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn, path: None })
    }

    /// Bring the physical schema to the version matching the current
    /// codebase. Idempotent: every statement is `IF NOT EXISTS`.
    pub fn ensure_latest_schema(&self, backup_enabled: bool) -> Result<(), StoreError> {
        if backup_enabled {
            match &self.path {
                Some(path) if path.exists() => {
                    let backup_path = self.backup()?;
                    info!(backup = %backup_path.display(), "Backed up database before schema migration");
                }
                _ => debug!("No database file to back up, skipping backup"),
            }
        }

        self.conn.execute_batch(LATEST_SCHEMA_SQL)?;
        info!("Schema is at the latest version");
        Ok(())
    }

    /// Create a file-copy backup of the database (checkpointed first).
    pub fn backup(&self) -> Result<PathBuf, StoreError> {
        let path = self.path.as_ref().ok_or(StoreError::NoBackingFile)?;
        self.conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;

        let backup_path = path.with_extension("db.bak");
        std::fs::copy(path, &backup_path)?;

        Ok(backup_path)
    }

    /// Read the current data-version marker.
    ///
    /// Pure read: never guesses. Table-missing, row-missing and
    /// present-with-value come back as distinct [`VersionRead`] variants; any
    /// other failure propagates.
    pub fn read_data_version(&self) -> Result<VersionRead, StoreError> {
        let row: Result<String, rusqlite::Error> = self.conn.query_row(
            "SELECT version FROM data_versions ORDER BY id DESC LIMIT 1",
            [],
            |row| row.get(0),
        );

        match row {
            Ok(text) => text
                .trim()
                .parse::<i64>()
                .map(VersionRead::Value)
                .map_err(|_| StoreError::InvalidMarker(text)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(VersionRead::RowMissing),
            Err(rusqlite::Error::SqliteFailure(_, Some(ref msg)))
                if msg.contains("no such table") =>
            {
                Ok(VersionRead::TableMissing)
            }
            Err(e) => Err(StoreError::Sqlite(e)),
        }
    }

    /// Record a new data version. The latest row wins on read, so re-writing
    /// the same version is harmless.
    pub fn write_data_version(&self, version: i64) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO data_versions (version, created_at) VALUES (?1, ?2)",
            params![version.to_string(), now],
        )?;
        info!(version, "Recorded data version");
        Ok(())
    }

    /// Full snapshot of all projects.
    pub fn list_projects(&self) -> Result<Vec<Project>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, desired_state, state FROM projects ORDER BY id")?;
        let projects = stmt
            .query_map([], |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    desired_state: row.get(2)?,
                    state: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(projects)
    }

    /// Full snapshot of all artifacts, in insertion order.
    pub fn list_artifacts(&self) -> Result<Vec<Artifact>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, project, key, uid, struct_json, updated FROM artifacts ORDER BY id",
        )?;
        let artifacts = stmt
            .query_map([], |row| {
                Ok(Artifact {
                    id: row.get(0)?,
                    project: row.get(1)?,
                    key: row.get(2)?,
                    uid: row.get(3)?,
                    payload: row.get(4)?,
                    updated: row.get::<_, Option<String>>(5)?.as_deref().and_then(parse_updated),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(artifacts)
    }

    /// Full snapshot of all artifact tags, in insertion order.
    pub fn list_tags(&self) -> Result<Vec<ArtifactTag>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, project, name, obj_id FROM artifact_tags ORDER BY id")?;
        let tags = stmt
            .query_map([], |row| {
                Ok(ArtifactTag {
                    id: row.get(0)?,
                    project: row.get(1)?,
                    name: row.get(2)?,
                    obj_id: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }

    /// Persist a project's state fields in place.
    pub fn store_project(&self, project: &Project) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE projects SET desired_state = ?1, state = ?2 WHERE id = ?3",
            params![project.desired_state, project.state, project.id],
        )?;
        Ok(())
    }

    /// Rewrite an artifact's payload body. Tag rows are untouched: tag
    /// identity is preserved across payload repairs.
    pub fn store_artifact_struct(&self, artifact_id: i64, payload: &Value) -> Result<(), StoreError> {
        let text = serde_json::to_string(payload)?;
        self.conn.execute(
            "UPDATE artifacts SET struct_json = ?1 WHERE id = ?2",
            params![text, artifact_id],
        )?;
        Ok(())
    }

    /// Delete a batch of tags in a single transaction. Either all staged
    /// deletions apply or none do.
    pub fn delete_tags(&self, tag_ids: &[i64]) -> Result<usize, StoreError> {
        let tx = self.conn.unchecked_transaction()?;
        let mut deleted = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM artifact_tags WHERE id = ?1")?;
            for tag_id in tag_ids {
                deleted += stmt.execute(params![tag_id])?;
            }
        }
        tx.commit()?;
        Ok(deleted)
    }

    /// Look up a catalog source by name.
    pub fn get_catalog_source(&self, name: &str) -> Result<Option<CatalogSource>, StoreError> {
        let source = self
            .conn
            .query_row(
                "SELECT idx, name, description, url FROM catalog_sources WHERE name = ?1",
                params![name],
                |row| {
                    Ok(CatalogSource {
                        idx: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        url: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(source)
    }

    pub fn insert_catalog_source(&self, source: &CatalogSource) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO catalog_sources (idx, name, description, url, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![source.idx, source.name, source.description, source.url, now],
        )?;
        Ok(())
    }

    pub fn insert_project(
        &self,
        name: &str,
        desired_state: Option<&str>,
        state: Option<&str>,
    ) -> Result<i64, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO projects (name, desired_state, state, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![name, desired_state, state, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_artifact(
        &self,
        project: &str,
        key: &str,
        uid: &str,
        payload: &Value,
        updated: Option<DateTime<Utc>>,
    ) -> Result<i64, StoreError> {
        let text = serde_json::to_string(payload)?;
        self.conn.execute(
            "INSERT INTO artifacts (project, key, uid, struct_json, updated) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![project, key, uid, text, updated.map(|dt| dt.to_rfc3339())],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_tag(&self, project: &str, name: &str, obj_id: i64) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO artifact_tags (project, name, obj_id) VALUES (?1, ?2, ?3)",
            params![project, name, obj_id],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Execute raw SQL (for tests and fixtures)
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}

fn parse_updated(raw: &str) -> Option<DateTime<Utc>> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(e) => {
            warn!(raw, error = %e, "Unparseable artifact update timestamp, treating as unset");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store_with_schema() -> MetaStore {
        let store = MetaStore::open_in_memory().unwrap();
        store.ensure_latest_schema(false).unwrap();
        store
    }

    #[test]
    fn test_marker_table_missing() {
        let store = MetaStore::open_in_memory().unwrap();
        assert_eq!(store.read_data_version().unwrap(), VersionRead::TableMissing);
    }

    #[test]
    fn test_marker_row_missing() {
        let store = store_with_schema();
        assert_eq!(store.read_data_version().unwrap(), VersionRead::RowMissing);
    }

    #[test]
    fn test_marker_roundtrip() {
        let store = store_with_schema();
        store.write_data_version(1).unwrap();
        assert_eq!(store.read_data_version().unwrap(), VersionRead::Value(1));
    }

    #[test]
    fn test_marker_latest_write_wins() {
        let store = store_with_schema();
        store.write_data_version(0).unwrap();
        store.write_data_version(1).unwrap();
        assert_eq!(store.read_data_version().unwrap(), VersionRead::Value(1));
    }

    #[test]
    fn test_marker_invalid_text_is_an_error() {
        let store = store_with_schema();
        store
            .execute_batch(
                "INSERT INTO data_versions (version, created_at) VALUES ('banana', '2021-01-01T00:00:00Z');",
            )
            .unwrap();
        assert!(matches!(
            store.read_data_version(),
            Err(StoreError::InvalidMarker(_))
        ));
    }

    #[test]
    fn test_schema_application_is_idempotent() {
        let store = store_with_schema();
        store.ensure_latest_schema(false).unwrap();
        store.ensure_latest_schema(false).unwrap();
    }

    #[test]
    fn test_delete_tags_batch() {
        let store = store_with_schema();
        let artifact = store
            .insert_artifact("p", "k", "u1", &json!({"kind": "model"}), None)
            .unwrap();
        let t1 = store.insert_tag("p", "latest", artifact).unwrap();
        let t2 = store.insert_tag("p", "latest", artifact).unwrap();
        let t3 = store.insert_tag("p", "stable", artifact).unwrap();

        let deleted = store.delete_tags(&[t1, t2]).unwrap();
        assert_eq!(deleted, 2);

        let remaining = store.list_tags().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, t3);
    }

    #[test]
    fn test_payload_rewrite_preserves_tags() {
        let store = store_with_schema();
        let artifact = store
            .insert_artifact("p", "k", "u1", &json!({"kind": "dataset"}), None)
            .unwrap();
        let tag = store.insert_tag("p", "latest", artifact).unwrap();

        store
            .store_artifact_struct(artifact, &json!({"kind": "dataset", "fixed": true}))
            .unwrap();

        let tags = store.list_tags().unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].id, tag);
        assert_eq!(tags[0].obj_id, artifact);

        let artifacts = store.list_artifacts().unwrap();
        assert!(artifacts[0].payload.contains("fixed"));
    }

    #[test]
    fn test_unparseable_updated_timestamp_reads_as_unset() {
        let store = store_with_schema();
        store
            .execute_batch(
                "INSERT INTO artifacts (project, key, uid, struct_json, updated)
                 VALUES ('p', 'k', 'u1', '{}', 'not-a-timestamp');",
            )
            .unwrap();
        let artifacts = store.list_artifacts().unwrap();
        assert_eq!(artifacts.len(), 1);
        assert!(artifacts[0].updated.is_none());
    }
}
