//! Configuration validation logic.

use crate::Config;
use crate::loader::ConfigError;

const TLS_VERSIONS: [&str; 2] = ["tls12", "tls13"];

/// Position of a version name in ascending order, or `None` if unknown.
pub fn parse_tls_version(name: &str) -> Option<usize> {
    TLS_VERSIONS.iter().position(|v| *v == name)
}

pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.listen.trim().is_empty() {
        return Err(ConfigError::Validation("server.listen is empty".into()));
    }
    if config.server.backend.trim().is_empty() {
        return Err(ConfigError::Validation("server.backend is empty".into()));
    }
    if config.tls.cert.trim().is_empty() {
        return Err(ConfigError::Validation("tls.cert is empty".into()));
    }
    if config.tls.key.trim().is_empty() {
        return Err(ConfigError::Validation("tls.key is empty".into()));
    }
    if config.server.handshake_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "server.handshake_timeout_secs must be > 0".into(),
        ));
    }
    if config.server.high_water_mark == 0 {
        return Err(ConfigError::Validation(
            "server.high_water_mark must be > 0".into(),
        ));
    }
    if config.server.backlog == 0 {
        return Err(ConfigError::Validation("server.backlog must be > 0".into()));
    }
    if let Some(ciphers) = &config.tls.ciphers
        && ciphers.trim().is_empty()
    {
        return Err(ConfigError::Validation(
            "tls.ciphers is set but empty".into(),
        ));
    }
    if config.tls.truststore.as_deref().is_some_and(|p| p.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "tls.truststore is set but empty".into(),
        ));
    }

    let Some(min) = parse_tls_version(&config.tls.min_version) else {
        return Err(ConfigError::Validation(format!(
            "tls.min_version must be one of: {:?}",
            TLS_VERSIONS
        )));
    };
    let Some(max) = parse_tls_version(&config.tls.max_version) else {
        return Err(ConfigError::Validation(format!(
            "tls.max_version must be one of: {:?}",
            TLS_VERSIONS
        )));
    };
    if min > max {
        return Err(ConfigError::Validation(
            "tls.min_version cannot be greater than tls.max_version".into(),
        ));
    }
    Ok(())
}
