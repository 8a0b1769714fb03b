//! metastore - startup-time initialization and data migration for the
//! platform metadata store (projects, artifacts, sources).
//!
//! The orchestration runs once at process startup, before the rest of the
//! platform is considered ready: bring the schema to the latest version,
//! import any legacy store, resolve the current data version, run the repair
//! passes where needed, record the marker and seed default rows. Every stage
//! is idempotent so a failed startup is recovered by starting again.

pub mod config;
pub mod migration;
pub mod repair;
pub mod store;
pub mod version;
