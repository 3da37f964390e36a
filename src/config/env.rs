//! Environment variable overrides.
//!
//! Applied after the config file is parsed and before validation. Unset or
//! blank variables leave the current value alone; unparseable ones are logged
//! and ignored.

use std::str::FromStr;

use crate::config::schema::ShieldConfig;
use crate::security::rate_limit::EndpointTier;

/// Overlay values from the process environment.
pub fn apply_env_overrides(config: &mut ShieldConfig) {
    apply_overrides(config, |key| std::env::var(key).ok());
}

/// Overlay values from `lookup` (key → raw value).
pub fn apply_overrides<F>(config: &mut ShieldConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    override_parsed(&get, "SHIELD_BIND_ADDRESS", &mut config.listener.bind_address);
    override_parsed(&get, "MAX_CONNECTIONS", &mut config.listener.max_connections);

    let protection = &mut config.protection;

    let cb = &mut protection.circuit_breaker;
    override_parsed(&get, "CIRCUIT_MAX_CONCURRENT", &mut cb.max_concurrent);
    override_parsed(&get, "CIRCUIT_MAX_RPS", &mut cb.max_requests_per_sec);
    override_parsed(&get, "CIRCUIT_OPEN_TIMEOUT_SECONDS", &mut cb.open_timeout_secs);

    let blocker = &mut protection.ip_blocker;
    override_parsed(&get, "IP_BLOCK_MAX_VIOLATIONS", &mut blocker.max_violations);
    override_minutes(&get, "IP_BLOCK_DURATION_MINUTES", &mut blocker.block_duration_secs);
    override_minutes(
        &get,
        "IP_BLOCK_VIOLATION_WINDOW_MINUTES",
        &mut blocker.violation_window_secs,
    );

    for tier in [
        EndpointTier::Standard,
        EndpointTier::Auth,
        EndpointTier::Expensive,
        EndpointTier::Webhook,
    ] {
        let name = tier.as_str().to_ascii_uppercase();
        let limit = protection.rate_limit.limit_mut(tier);
        override_parsed(&get, &format!("RATE_LIMIT_{name}_RPS"), &mut limit.rps);
        override_parsed(&get, &format!("RATE_LIMIT_{name}_BURST"), &mut limit.burst);
    }

    let fp = &mut protection.fingerprint;
    override_parsed(&get, "FINGERPRINT_MAX_REQUESTS", &mut fp.max_requests_per_fingerprint);
    override_minutes(&get, "FINGERPRINT_WINDOW_MINUTES", &mut fp.window_secs);
    override_parsed(&get, "FINGERPRINT_SUSPICIOUS_THRESHOLD", &mut fp.suspicious_ip_threshold);
    if let Some(raw) = get("BLOCK_SUSPICIOUS_AGENTS") {
        fp.block_suspicious_agents = parse_flag(&raw);
    }
}

/// `true`, `1` and `yes` (any case) enable a flag; anything else disables it.
pub fn parse_flag(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn override_parsed<T, G>(get: &G, key: &str, target: &mut T)
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    if let Some(value) = parse_var(get, key) {
        *target = value;
    }
}

fn override_minutes<G>(get: &G, key: &str, target_secs: &mut u64)
where
    G: Fn(&str) -> Option<String>,
{
    if let Some(minutes) = parse_var::<u64, _>(get, key) {
        *target_secs = minutes.saturating_mul(60);
    }
}

fn parse_var<T, G>(get: &G, key: &str) -> Option<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => {
            tracing::debug!(key, "Config value overridden from environment");
            Some(value)
        }
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn apply(vars: &[(&str, &str)]) -> ShieldConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut config = ShieldConfig::default();
        apply_overrides(&mut config, |key| vars.get(key).cloned());
        config
    }

    #[test]
    fn overrides_known_keys() {
        let config = apply(&[
            ("CIRCUIT_MAX_CONCURRENT", "50"),
            ("IP_BLOCK_DURATION_MINUTES", "30"),
            ("RATE_LIMIT_AUTH_RPS", "2.5"),
            ("RATE_LIMIT_AUTH_BURST", "4"),
            ("FINGERPRINT_WINDOW_MINUTES", "10"),
            ("BLOCK_SUSPICIOUS_AGENTS", "Yes"),
            ("MAX_CONNECTIONS", "64"),
        ]);

        assert_eq!(config.protection.circuit_breaker.max_concurrent, 50);
        assert_eq!(config.protection.ip_blocker.block_duration_secs, 1800);
        assert_eq!(config.protection.rate_limit.auth.rps, 2.5);
        assert_eq!(config.protection.rate_limit.auth.burst, 4);
        assert_eq!(config.protection.fingerprint.window_secs, 600);
        assert!(config.protection.fingerprint.block_suspicious_agents);
        assert_eq!(config.listener.max_connections, 64);
    }

    #[test]
    fn zero_connection_limit_passes_validation() {
        let config = apply(&[("MAX_CONNECTIONS", "0")]);
        assert_eq!(config.listener.max_connections, 0);
        assert!(crate::config::validation::validate_config(&config).is_ok());
    }

    #[test]
    fn bad_values_keep_defaults() {
        let config = apply(&[
            ("CIRCUIT_MAX_RPS", "lots"),
            ("IP_BLOCK_VIOLATION_WINDOW_MINUTES", "-3"),
            ("RATE_LIMIT_STANDARD_BURST", ""),
        ]);

        assert_eq!(config.protection.circuit_breaker.max_requests_per_sec, 500);
        assert_eq!(config.protection.ip_blocker.violation_window_secs, 300);
        assert_eq!(config.protection.rate_limit.standard.burst, 20);
    }

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("on"));
        assert!(!parse_flag("false"));
    }
}
