use std::collections::HashSet;

use super::{types::Config, ConfigError};

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Broker list and registry URL are set
/// - Worker count, TTL, scan batch and sweep interval are non-zero
/// - Sources have a name and URL, and names are unique
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    if config.broker.brokers.trim().is_empty() {
        return Err(invalid("broker.brokers cannot be empty"));
    }
    if config.registry.url.trim().is_empty() {
        return Err(invalid("registry.url cannot be empty"));
    }

    if config.reconciler.workers == 0 {
        return Err(invalid("reconciler.workers cannot be 0"));
    }
    if config.store.ttl_secs == 0 {
        return Err(invalid("store.ttl_secs cannot be 0"));
    }
    if config.store.scan_batch == 0 {
        return Err(invalid("store.scan_batch cannot be 0"));
    }
    if config.sweeper.interval_secs == 0 {
        return Err(invalid("sweeper.interval_secs cannot be 0"));
    }

    let mut names = HashSet::new();
    for (idx, source) in config.sources.iter().enumerate() {
        if source.name.trim().is_empty() {
            return Err(invalid(format!("sources[{idx}].name cannot be empty")));
        }
        if source.url.trim().is_empty() {
            return Err(invalid(format!(
                "sources[{idx}].url cannot be empty (source {})",
                source.name
            )));
        }
        if !names.insert(source.name.as_str()) {
            return Err(invalid(format!("duplicate source name: {}", source.name)));
        }
    }

    Ok(())
}
