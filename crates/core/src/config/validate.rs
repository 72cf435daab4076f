use std::collections::HashSet;

use super::{types::Config, ConfigError};
use crate::identity::Role;

/// Validate configuration values serde cannot check.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.notifier.poll_interval_ms == 0 {
        return Err(ConfigError::ValidationError(
            "notifier.poll_interval_ms cannot be 0".to_string(),
        ));
    }

    if config.audit.buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "audit.buffer_size cannot be 0".to_string(),
        ));
    }

    if config.workflow.history_page_size <= 0 {
        return Err(ConfigError::ValidationError(
            "workflow.history_page_size must be positive".to_string(),
        ));
    }

    let mut viewers = HashSet::new();
    for watcher in &config.notifier.watchers {
        if watcher.viewer_id.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "notifier.watchers: viewer_id cannot be empty".to_string(),
            ));
        }
        if !viewers.insert(watcher.viewer_id.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "notifier.watchers: duplicate viewer_id '{}'",
                watcher.viewer_id
            )));
        }
        if matches!(watcher.role, Role::Driver) {
            return Err(ConfigError::ValidationError(format!(
                "notifier.watchers: '{}' is a driver and has no station feed",
                watcher.viewer_id
            )));
        }
    }

    Ok(())
}
