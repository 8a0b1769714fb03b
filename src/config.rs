//! Configuration surface consumed by the startup orchestration.
//!
//! Each stage switch, when disabled, causes the corresponding stage to be
//! skipped entirely (logged, not erroring).

use serde::{Deserialize, Serialize};

/// Enable/disable switch for a single orchestration stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageMode {
    Enabled,
    Disabled,
}

impl StageMode {
    pub fn is_enabled(self) -> bool {
        self == StageMode::Enabled
    }
}

/// Descriptor of the default catalog source seeded on startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultSourceConfig {
    pub name: String,
    /// When false, no default source is ever created.
    pub create: bool,
    pub description: Option<String>,
    pub url: Option<String>,
}

impl Default for DefaultSourceConfig {
    fn default() -> Self {
        Self {
            name: "hub".to_string(),
            create: true,
            description: None,
            url: None,
        }
    }
}

/// Startup orchestration configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    pub schema_migrations: StageMode,
    pub legacy_transfer: StageMode,
    pub data_migrations: StageMode,
    /// Back up the database file before schema migration.
    pub backup: StageMode,
    pub default_source: DefaultSourceConfig,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            schema_migrations: StageMode::Enabled,
            legacy_transfer: StageMode::Enabled,
            data_migrations: StageMode::Enabled,
            backup: StageMode::Disabled,
            default_source: DefaultSourceConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = InitConfig::default();
        assert!(config.schema_migrations.is_enabled());
        assert!(config.data_migrations.is_enabled());
        assert!(!config.backup.is_enabled());
        assert!(config.default_source.create);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: InitConfig =
            serde_json::from_str(r#"{"data_migrations": "disabled"}"#).unwrap();
        assert!(!config.data_migrations.is_enabled());
        assert!(config.schema_migrations.is_enabled());
        assert_eq!(config.default_source.name, "hub");
    }

    #[test]
    fn test_default_source_create_flag() {
        let config: InitConfig = serde_json::from_str(
            r#"{"default_source": {"name": "internal-hub", "create": false}}"#,
        )
        .unwrap();
        assert_eq!(config.default_source.name, "internal-hub");
        assert!(!config.default_source.create);
    }
}
