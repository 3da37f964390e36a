//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, windows > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ShieldConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ShieldConfig;
use crate::security::rate_limit::EndpointTier;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
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

/// Check the configuration, collecting every error.
pub fn validate_config(config: &ShieldConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);

    let cb = &config.protection.circuit_breaker;
    positive(&mut errors, "protection.circuit_breaker.max_concurrent", cb.max_concurrent);
    positive(&mut errors, "protection.circuit_breaker.max_requests_per_sec", cb.max_requests_per_sec);
    positive(&mut errors, "protection.circuit_breaker.open_timeout_secs", cb.open_timeout_secs);
    positive(
        &mut errors,
        "protection.circuit_breaker.half_open_max_requests",
        cb.half_open_max_requests,
    );

    let blocker = &config.protection.ip_blocker;
    positive(&mut errors, "protection.ip_blocker.max_violations", u64::from(blocker.max_violations));
    positive(&mut errors, "protection.ip_blocker.block_duration_secs", blocker.block_duration_secs);
    positive(&mut errors, "protection.ip_blocker.violation_window_secs", blocker.violation_window_secs);

    for tier in EndpointTier::ALL {
        let limit = config.protection.rate_limit.limit(tier);
        if !limit.rps.is_finite() {
            errors.push(ValidationError::new(
                format!("protection.rate_limit.{tier}.rps"),
                "must be a finite number",
            ));
        } else if !limit.is_unlimited() && limit.burst == 0 {
            errors.push(ValidationError::new(
                format!("protection.rate_limit.{tier}.burst"),
                "must be > 0 for a limited tier",
            ));
        }
    }
    for path in config.protection.rate_limit.endpoints.keys() {
        if !path.starts_with('/') {
            errors.push(ValidationError::new(
                "protection.rate_limit.endpoints",
                format!("path '{path}' must start with '/'"),
            ));
        }
    }

    let fp = &config.protection.fingerprint;
    positive(
        &mut errors,
        "protection.fingerprint.max_requests_per_fingerprint",
        fp.max_requests_per_fingerprint,
    );
    positive(&mut errors, "protection.fingerprint.window_secs", fp.window_secs);
    positive(
        &mut errors,
        "protection.fingerprint.suspicious_ip_threshold",
        fp.suspicious_ip_threshold as u64,
    );

    if config.admin.enabled {
        check_addr(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.trim().is_empty() {
            errors.push(ValidationError::new(
                "admin.api_key",
                "must be set when the admin API is enabled",
            ));
        }
    }

    if config.observability.metrics_enabled {
        check_addr(
            &mut errors,
            "observability.metrics_address",
            &config.observability.metrics_address,
        );
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn positive(errors: &mut Vec<ValidationError>, field: &str, value: u64) {
    if value == 0 {
        errors.push(ValidationError::new(field, "must be > 0"));
    }
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            field,
            format!("'{value}' is not a valid socket address"),
        ));
    }
}
