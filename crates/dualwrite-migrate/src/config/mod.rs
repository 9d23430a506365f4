//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::{MigrateError, Result};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        for table in &mut config.migration.tables {
            table.normalize_columns();
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Configured table by name, or a configuration error.
    pub fn table(&self, name: &str) -> Result<&crate::core::TableSpec> {
        self.migration.table(name).ok_or_else(|| {
            MigrateError::Config(format!("table '{}' is not configured", name))
        })
    }
}

impl StoreConfig {
    /// Build a connection string for tokio-postgres.
    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} dbname={} user={} password={} sslmode={}",
            self.host,
            self.port(),
            self.database,
            self.user,
            self.password,
            self.ssl_mode
        )
    }
}
