use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::identity::Role;
use crate::order::Station;

/// Root configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("workfloor.db")
}

/// Pipeline and dispatch behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowConfig {
    /// Open a delivery job when an order leaves packing.
    #[serde(default = "default_true")]
    pub auto_dispatch_delivery: bool,
    /// Completed jobs fetched per page when iterating a driver's history.
    #[serde(default = "default_history_page_size")]
    pub history_page_size: i64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            auto_dispatch_delivery: true,
            history_page_size: default_history_page_size(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_history_page_size() -> i64 {
    20
}

/// Station resolution policy
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IdentityConfig {
    /// Station an admin is placed at; unset means admins have no station.
    #[serde(default = "default_admin_station")]
    pub admin_station: Option<Station>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            admin_station: default_admin_station(),
        }
    }
}

fn default_admin_station() -> Option<Station> {
    Some(Station::Washing)
}

/// Station feed poller
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NotifierConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Viewers whose station feed is polled
    #[serde(default)]
    pub watchers: Vec<WatcherConfig>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: default_poll_interval_ms(),
            watchers: Vec::new(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    30_000
}

/// A viewer registered with the poller.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct WatcherConfig {
    pub viewer_id: String,
    pub role: Role,
}

/// Audit channel
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_buffer")]
    pub buffer_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_audit_buffer(),
        }
    }
}

fn default_audit_buffer() -> usize {
    1000
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Prometheus text exposition is written here after every poll.
    #[serde(default)]
    pub textfile_path: Option<PathBuf>,
}

/// Effective configuration as logged at startup
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub database_path: PathBuf,
    pub auto_dispatch_delivery: bool,
    pub history_page_size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_station: Option<Station>,
    pub notifier: SanitizedNotifierConfig,
    pub audit_buffer_size: usize,
    pub log_json: bool,
    pub metrics_textfile: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SanitizedNotifierConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    pub watchers: usize,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            database_path: config.database.path.clone(),
            auto_dispatch_delivery: config.workflow.auto_dispatch_delivery,
            history_page_size: config.workflow.history_page_size,
            admin_station: config.identity.admin_station,
            notifier: SanitizedNotifierConfig {
                enabled: config.notifier.enabled,
                poll_interval_ms: config.notifier.poll_interval_ms,
                watchers: config.notifier.watchers.len(),
            },
            audit_buffer_size: config.audit.buffer_size,
            log_json: config.logging.json,
            metrics_textfile: config.metrics.textfile_path.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "workfloor.db");
        assert!(config.workflow.auto_dispatch_delivery);
        assert_eq!(config.workflow.history_page_size, 20);
        assert_eq!(config.identity.admin_station, Some(Station::Washing));
        assert!(config.notifier.enabled);
        assert_eq!(config.notifier.poll_interval_ms, 30_000);
        assert!(config.notifier.watchers.is_empty());
        assert_eq!(config.audit.buffer_size, 1000);
        assert!(!config.logging.json);
        assert!(config.metrics.textfile_path.is_none());
    }

    #[test]
    fn test_deserialize_watchers() {
        let toml = r#"
[notifier]
poll_interval_ms = 5000

[[notifier.watchers]]
viewer_id = "ironing-board"
role = { type = "worker", station = "ironing" }

[[notifier.watchers]]
viewer_id = "admin"
role = { type = "admin" }
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.notifier.poll_interval_ms, 5000);
        assert_eq!(config.notifier.watchers.len(), 2);
        assert_eq!(
            config.notifier.watchers[0].role,
            Role::Worker {
                station: Station::Ironing
            }
        );
        assert_eq!(config.notifier.watchers[1].role, Role::Admin);
    }

    #[test]
    fn test_deserialize_custom_sections() {
        let toml = r#"
[database]
path = "/data/floor.sqlite"

[workflow]
auto_dispatch_delivery = false

[identity]
admin_station = "packing"

[metrics]
textfile_path = "/var/lib/node_exporter/workfloor.prom"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "/data/floor.sqlite");
        assert!(!config.workflow.auto_dispatch_delivery);
        assert_eq!(config.identity.admin_station, Some(Station::Packing));
        assert!(config.metrics.textfile_path.is_some());
    }

    #[test]
    fn test_sanitized_config() {
        let mut config = Config::default();
        config.notifier.watchers.push(WatcherConfig {
            viewer_id: "v".to_string(),
            role: Role::Admin,
        });

        let sanitized = SanitizedConfig::from(&config);
        assert_eq!(sanitized.database_path.to_str().unwrap(), "workfloor.db");
        assert_eq!(sanitized.notifier.watchers, 1);
        assert!(!sanitized.metrics_textfile);

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(json.contains("\"admin_station\":\"washing\""));
    }
}
