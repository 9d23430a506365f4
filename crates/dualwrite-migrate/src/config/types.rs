//! Configuration type definitions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::pattern::Pattern;
use crate::core::schema::TableSpec;
use crate::verify::ScanErrorPolicy;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Original system-of-record.
    pub base: StoreConfig,

    /// Destination store.
    pub target: StoreConfig,

    /// Routing, table and validator configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Supported store engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    Postgres,
    Mysql,
    Sqlite,
}

impl StoreType {
    pub fn as_str(self) -> &'static str {
        match self {
            StoreType::Postgres => "postgres",
            StoreType::Mysql => "mysql",
            StoreType::Sqlite => "sqlite",
        }
    }

    /// Default TCP port for network engines.
    pub fn default_port(self) -> Option<u16> {
        match self {
            StoreType::Postgres => Some(5432),
            StoreType::Mysql => Some(3306),
            StoreType::Sqlite => None,
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection settings for one store.
#[derive(Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Engine type.
    pub r#type: StoreType,

    /// Database host (network engines).
    #[serde(default)]
    pub host: String,

    /// Database port; defaults per engine.
    #[serde(default)]
    pub port: Option<u16>,

    /// Database name (network engines).
    #[serde(default)]
    pub database: String,

    /// Username.
    #[serde(default)]
    pub user: String,

    /// Password.
    #[serde(default)]
    pub password: String,

    /// SSL mode for PostgreSQL: disable, require, verify-ca, verify-full.
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,

    /// Database file for SQLite; `:memory:` for a private in-memory database.
    #[serde(default)]
    pub path: Option<String>,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

impl StoreConfig {
    /// Effective port, falling back to the engine default.
    pub fn port(&self) -> u16 {
        self.port
            .or_else(|| self.r#type.default_port())
            .unwrap_or_default()
    }

    /// Short description for logs; never includes credentials.
    pub fn describe(&self) -> String {
        match self.r#type {
            StoreType::Sqlite => format!(
                "sqlite:{}",
                self.path.as_deref().unwrap_or(":memory:")
            ),
            kind => format!("{}://{}:{}/{}", kind, self.host, self.port(), self.database),
        }
    }

    /// Whether two configurations address the same physical database.
    pub fn same_database(&self, other: &StoreConfig) -> bool {
        if self.r#type != other.r#type {
            return false;
        }
        match self.r#type {
            StoreType::Sqlite => match (self.path.as_deref(), other.path.as_deref()) {
                (Some(a), Some(b)) => a == b && a != ":memory:",
                _ => false,
            },
            _ => {
                self.host.eq_ignore_ascii_case(&other.host)
                    && self.port() == other.port()
                    && self.database == other.database
            }
        }
    }
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .field("path", &self.path)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Routing pattern applied at startup.
    #[serde(default)]
    pub pattern: Pattern,

    /// Tables under migration.
    #[serde(default)]
    pub tables: Vec<TableSpec>,

    /// Validator settings shared by all tables.
    #[serde(default)]
    pub validator: ValidatorConfig,
}

impl MigrationConfig {
    /// Look up a configured table by name.
    pub fn table(&self, name: &str) -> Option<&TableSpec> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }
}

/// Validator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Rows per page.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Per-event publish timeout in milliseconds.
    #[serde(default = "default_notify_timeout_ms")]
    pub notify_timeout_ms: u64,

    /// Poll interval for continuous validation; 0 means run once.
    #[serde(default)]
    pub sleep_interval_ms: u64,

    /// What the base-to-target scan does on a read error.
    #[serde(default = "default_forward_policy")]
    pub forward_error_policy: ScanErrorPolicy,

    /// What the target-to-base scan does on a read error.
    #[serde(default = "default_reverse_policy")]
    pub reverse_error_policy: ScanErrorPolicy,
}

impl ValidatorConfig {
    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }

    /// Continuous poll interval, if enabled.
    pub fn sleep_interval(&self) -> Option<Duration> {
        (self.sleep_interval_ms > 0).then(|| Duration::from_millis(self.sleep_interval_ms))
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            notify_timeout_ms: default_notify_timeout_ms(),
            sleep_interval_ms: 0,
            forward_error_policy: default_forward_policy(),
            reverse_error_policy: default_reverse_policy(),
        }
    }
}

fn default_ssl_mode() -> String {
    "disable".to_string()
}

fn default_max_connections() -> usize {
    10
}

fn default_batch_size() -> usize {
    100
}

fn default_notify_timeout_ms() -> u64 {
    1000
}

fn default_forward_policy() -> ScanErrorPolicy {
    ScanErrorPolicy::Abort
}

fn default_reverse_policy() -> ScanErrorPolicy {
    ScanErrorPolicy::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg(host: &str, db: &str) -> StoreConfig {
        StoreConfig {
            r#type: StoreType::Postgres,
            host: host.into(),
            port: None,
            database: db.into(),
            user: "app".into(),
            password: "hunter2".into(),
            ssl_mode: default_ssl_mode(),
            path: None,
            max_connections: 4,
        }
    }

    #[test]
    fn test_debug_redacts_password() {
        let text = format!("{:?}", pg("db1", "app"));
        assert!(text.contains("[REDACTED]"));
        assert!(!text.contains("hunter2"));
    }

    #[test]
    fn test_default_ports() {
        assert_eq!(pg("db1", "app").port(), 5432);
        let mut my = pg("db1", "app");
        my.r#type = StoreType::Mysql;
        assert_eq!(my.port(), 3306);
        my.port = Some(3307);
        assert_eq!(my.port(), 3307);
    }

    #[test]
    fn test_same_database() {
        assert!(pg("DB1", "app").same_database(&pg("db1", "app")));
        assert!(!pg("db1", "app").same_database(&pg("db2", "app")));

        let mem = StoreConfig {
            r#type: StoreType::Sqlite,
            path: Some(":memory:".into()),
            ..pg("", "")
        };
        assert!(!mem.same_database(&mem.clone()));
    }

    #[test]
    fn test_validator_defaults() {
        let v = ValidatorConfig::default();
        assert_eq!(v.batch_size, 100);
        assert_eq!(v.notify_timeout(), Duration::from_secs(1));
        assert_eq!(v.sleep_interval(), None);
        assert_eq!(v.forward_error_policy, ScanErrorPolicy::Abort);
        assert_eq!(v.reverse_error_policy, ScanErrorPolicy::Continue);
    }
}
