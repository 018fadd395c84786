//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check value ranges (capacity > 0, session timeouts within 1s..=7d)
//! - Check upstream definitions (unique names, URL schemes match the kind)
//! - Check normalization rules compile
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;

use crate::config::schema::{RelayConfig, UpstreamKind};

/// Upper bound for session and blocking timeouts: one week.
pub const MAX_SESSION_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
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

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }

    if config.admission.capacity == 0 {
        errors.push(ValidationError::new("admission.capacity", "must be greater than 0"));
    }

    if config.dedup.cooldown_secs == 0 {
        errors.push(ValidationError::new("dedup.cooldown_secs", "must be greater than 0"));
    }

    for (i, rule) in config.dedup.rules.iter().enumerate() {
        if let Err(e) = regex::Regex::new(&rule.pattern) {
            errors.push(ValidationError::new(
                format!("dedup.rules[{i}].pattern"),
                e.to_string(),
            ));
        }
    }

    let timeouts = [
        ("session.idle_timeout_secs", config.session.idle_timeout_secs),
        ("session.absolute_timeout_secs", config.session.absolute_timeout_secs),
        ("session.blocking_timeout_secs", config.session.blocking_timeout_secs),
    ];
    for (field, secs) in timeouts {
        if secs == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        } else if secs > MAX_SESSION_TIMEOUT_SECS {
            errors.push(ValidationError::new(
                field,
                format!("must be at most {MAX_SESSION_TIMEOUT_SECS}"),
            ));
        }
    }
    if config.session.channel_capacity == 0 {
        errors.push(ValidationError::new("session.channel_capacity", "must be greater than 0"));
    }

    let mut names = HashSet::new();
    for (i, upstream) in config.upstreams.iter().enumerate() {
        let field = format!("upstreams[{i}]");
        if upstream.name.is_empty() {
            errors.push(ValidationError::new(format!("{field}.name"), "must not be empty"));
        } else if !names.insert(upstream.name.as_str()) {
            errors.push(ValidationError::new(
                format!("{field}.name"),
                format!("duplicate upstream name '{}'", upstream.name),
            ));
        }

        match url::Url::parse(&upstream.url) {
            Ok(url) => {
                let allowed: &[&str] = match upstream.kind {
                    UpstreamKind::Sse => &["http", "https"],
                    UpstreamKind::Websocket => &["ws", "wss", "http", "https"],
                };
                if !allowed.contains(&url.scheme()) {
                    errors.push(ValidationError::new(
                        format!("{field}.url"),
                        format!("scheme '{}' not valid for {:?} upstream", url.scheme(), upstream.kind),
                    ));
                }
            }
            Err(e) => {
                errors.push(ValidationError::new(format!("{field}.url"), e.to_string()));
            }
        }

        if upstream.connect_timeout_secs == 0 {
            errors.push(ValidationError::new(
                format!("{field}.connect_timeout_secs"),
                "must be greater than 0",
            ));
        }
    }

    if config.routes.forward_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "routes.forward_timeout_secs",
            "must be greater than 0",
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            "is not a socket address",
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
