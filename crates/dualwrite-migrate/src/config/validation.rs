//! Configuration validation.

use std::collections::HashSet;

use super::{Config, StoreConfig, StoreType};
use crate::drivers::common::SslMode;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_store("base", &config.base)?;
    validate_store("target", &config.target)?;

    // Cannot migrate to the same database
    if config.base.same_database(&config.target) {
        return Err(MigrateError::Config(
            "base and target cannot be the same database".into(),
        ));
    }

    let migration = &config.migration;
    if migration.tables.is_empty() {
        return Err(MigrateError::Config(
            "migration.tables must list at least one table".into(),
        ));
    }

    let mut seen = HashSet::new();
    for table in &migration.tables {
        table.validate()?;
        if !seen.insert(table.name.to_lowercase()) {
            return Err(MigrateError::Config(format!(
                "migration.tables: duplicate table '{}'",
                table.name
            )));
        }
    }

    if migration.validator.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.validator.batch_size must be at least 1".into(),
        ));
    }
    if migration.validator.notify_timeout_ms == 0 {
        return Err(MigrateError::Config(
            "migration.validator.notify_timeout_ms must be at least 1".into(),
        ));
    }

    Ok(())
}

fn validate_store(side: &str, store: &StoreConfig) -> Result<()> {
    if store.max_connections == 0 {
        return Err(MigrateError::Config(format!(
            "{}.max_connections must be at least 1",
            side
        )));
    }

    match store.r#type {
        StoreType::Sqlite => {
            if store.path.as_deref().map_or(true, str::is_empty) {
                return Err(MigrateError::Config(format!(
                    "{}.path is required for sqlite",
                    side
                )));
            }
        }
        StoreType::Postgres | StoreType::Mysql => {
            if store.host.is_empty() {
                return Err(MigrateError::Config(format!("{}.host is required", side)));
            }
            if store.database.is_empty() {
                return Err(MigrateError::Config(format!(
                    "{}.database is required",
                    side
                )));
            }
            if store.user.is_empty() {
                return Err(MigrateError::Config(format!("{}.user is required", side)));
            }
        }
    }

    if store.r#type != StoreType::Sqlite {
        SslMode::parse(&store.ssl_mode)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;
    use crate::core::TableSpec;

    fn store(kind: StoreType, host: &str) -> StoreConfig {
        StoreConfig {
            r#type: kind,
            host: host.to_string(),
            port: None,
            database: "app".to_string(),
            user: "app".to_string(),
            password: "password".to_string(),
            ssl_mode: "disable".to_string(),
            path: None,
            max_connections: 4,
        }
    }

    fn valid_config() -> Config {
        Config {
            base: store(StoreType::Postgres, "base-host"),
            target: store(StoreType::Postgres, "target-host"),
            migration: MigrationConfig {
                tables: vec![TableSpec::new("users")],
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(validate(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_base_host() {
        let mut config = valid_config();
        config.base.host = String::new();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("base.host"));
    }

    #[test]
    fn test_same_database_rejected() {
        let mut config = valid_config();
        config.target.host = "base-host".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_sqlite_requires_path() {
        let mut config = valid_config();
        config.target = store(StoreType::Sqlite, "");
        assert!(validate(&config).is_err());
        config.target.path = Some("/tmp/target.db".into());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_batch_size() {
        let mut config = valid_config();
        config.migration.validator.batch_size = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_table_list_rules() {
        let mut config = valid_config();
        config.migration.tables.clear();
        assert!(validate(&config).is_err());

        config.migration.tables = vec![TableSpec::new("users"), TableSpec::new("Users")];
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_invalid_ssl_mode() {
        let mut config = valid_config();
        config.base.ssl_mode = "sometimes".into();
        assert!(validate(&config).is_err());
    }
}
