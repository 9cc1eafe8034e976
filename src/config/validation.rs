//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thread pool > 0, timeouts > 0)
//! - Check addin prefixes and auth mode requirements
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::IpAddr;

use crate::config::schema::{AuthMode, GatewayConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.www_address.parse::<IpAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.www_address",
            format!("'{}' is not an IP address", config.server.www_address),
        ));
    }
    if config.server.thread_pool_size == 0 {
        errors.push(ValidationError::new("server.thread_pool_size", "must be at least 1"));
    }
    if config.server.max_open_files == 0 {
        errors.push(ValidationError::new("server.max_open_files", "must be at least 1"));
    }
    if matches!(&config.server.run_as_user, Some(user) if user.trim().is_empty()) {
        errors.push(ValidationError::new("server.run_as_user", "must not be empty"));
    }
    if config.server.daemonize && config.observability.log_file.is_none() {
        errors.push(ValidationError::new(
            "observability.log_file",
            "required when daemonizing (stdout is detached)",
        ));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }

    if config.auth.mode == AuthMode::Header && config.auth.trusted_header.trim().is_empty() {
        errors.push(ValidationError::new("auth.trusted_header", "required in header mode"));
    }
    for (i, user) in config.auth.users.iter().enumerate() {
        let valid_hash = user.password_sha256.len() == 64
            && user.password_sha256.chars().all(|c| c.is_ascii_hexdigit());
        if !valid_hash {
            errors.push(ValidationError::new(
                format!("auth.users[{}].password_sha256", i),
                "must be 64 hex characters",
            ));
        }
    }

    if config.session.startup_timeout_secs == 0 {
        errors.push(ValidationError::new("session.startup_timeout_secs", "must be greater than 0"));
    }
    if config.session.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("session.sweep_interval_secs", "must be greater than 0"));
    }
    for (i, session) in config.session.static_sessions.iter().enumerate() {
        if session.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                format!("session.static[{}].address", i),
                format!("'{}' is not a socket address", session.address),
            ));
        }
    }

    let mut prefixes = HashSet::new();
    for (i, addin) in config.addins.iter().enumerate() {
        if !addin.prefix.starts_with('/') || addin.prefix.len() < 2 {
            errors.push(ValidationError::new(
                format!("addins[{}].prefix", i),
                "must start with '/' and name a path",
            ));
        }
        if !prefixes.insert(addin.prefix.as_str()) {
            errors.push(ValidationError::new(
                format!("addins[{}].prefix", i),
                format!("duplicate prefix '{}'", addin.prefix),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AddinConfig, UserCredential};
    use std::path::PathBuf;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.server.thread_pool_size = 0;
        config.server.www_address = "localhost".into();
        config.auth.users.push(UserCredential {
            name: "alice".into(),
            password_sha256: "abc".into(),
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.iter().any(|e| e.field == "server.thread_pool_size"));
        assert!(errors.iter().any(|e| e.field == "auth.users[0].password_sha256"));
    }

    #[test]
    fn test_duplicate_addin_prefix() {
        let mut config = GatewayConfig::default();
        for _ in 0..2 {
            config.addins.push(AddinConfig {
                prefix: "/reports".into(),
                directory: PathBuf::from("/srv/reports"),
                secure: false,
                optional_auth: false,
            });
        }

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("duplicate"));
    }

    #[test]
    fn test_daemonize_requires_log_file() {
        let mut config = GatewayConfig::default();
        config.server.daemonize = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "observability.log_file");
    }
}
