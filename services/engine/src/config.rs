//! Scan Configuration
//!
//! Defaults match the fixed rule catalogue; environment variables and CLI
//! flags may override them.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::audit::policy::WildcardMatching;

/// Default region the scan's provider handle is bound to
pub const DEFAULT_HOME_REGION: &str = "us-east-1";

/// Region of buckets whose location constraint is empty
pub const DEFAULT_PRIMARY_REGION: &str = "us-east-1";

/// Default number of regions or buckets evaluated concurrently
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Default inactivity threshold for access keys, in days
pub const DEFAULT_STALE_CREDENTIAL_DAYS: u32 = 90;

/// Errors reading configuration from the environment
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Scan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Region the default provider binding uses
    pub home_region: String,
    /// Region assumed for buckets without a location constraint
    pub primary_region: String,
    /// Upper bound on concurrent regional or per-bucket evaluations
    pub max_concurrency: usize,
    /// Abort the scan when it runs longer than this
    pub scan_timeout: Option<Duration>,
    /// Access keys unused for longer than this many days fail
    pub stale_credential_days: u32,
    /// How admin wildcards in policy statements are recognised
    pub wildcard_matching: WildcardMatching,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            home_region: DEFAULT_HOME_REGION.to_string(),
            primary_region: DEFAULT_PRIMARY_REGION.to_string(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            scan_timeout: None,
            stale_credential_days: DEFAULT_STALE_CREDENTIAL_DAYS,
            wildcard_matching: WildcardMatching::default(),
        }
    }
}

impl AuditConfig {
    /// Load configuration from the environment
    ///
    /// - `POSTURE_HOME_REGION` (falls back to `AWS_REGION`)
    /// - `POSTURE_MAX_CONCURRENCY`
    /// - `POSTURE_SCAN_TIMEOUT_SECS`
    /// - `POSTURE_STALE_CREDENTIAL_DAYS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(region) = lookup("POSTURE_HOME_REGION").or_else(|| lookup("AWS_REGION")) {
            if !region.trim().is_empty() {
                config.home_region = region.trim().to_string();
            }
        }

        if let Some(value) = lookup("POSTURE_MAX_CONCURRENCY") {
            config.max_concurrency = parse_positive("POSTURE_MAX_CONCURRENCY", &value)?;
        }

        if let Some(value) = lookup("POSTURE_SCAN_TIMEOUT_SECS") {
            let secs = parse_positive("POSTURE_SCAN_TIMEOUT_SECS", &value)?;
            config.scan_timeout = Some(Duration::from_secs(secs as u64));
        }

        if let Some(value) = lookup("POSTURE_STALE_CREDENTIAL_DAYS") {
            let days = parse_positive("POSTURE_STALE_CREDENTIAL_DAYS", &value)?;
            config.stale_credential_days =
                u32::try_from(days).map_err(|_| ConfigError::InvalidValue {
                    name: "POSTURE_STALE_CREDENTIAL_DAYS",
                    expected: "a positive number of days",
                    value,
                })?;
        }

        Ok(config)
    }

    pub fn with_home_region(mut self, region: &str) -> Self {
        self.home_region = region.to_string();
        self
    }

    pub fn with_primary_region(mut self, region: &str) -> Self {
        self.primary_region = region.to_string();
        self
    }

    /// Set the concurrency bound; values below one mean sequential
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = Some(timeout);
        self
    }

    pub fn with_stale_credential_days(mut self, days: u32) -> Self {
        self.stale_credential_days = days;
        self
    }

    pub fn with_wildcard_matching(mut self, matching: WildcardMatching) -> Self {
        self.wildcard_matching = matching;
        self
    }
}

fn parse_positive(name: &'static str, value: &str) -> Result<usize, ConfigError> {
    match value.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            name,
            expected: "a positive integer",
            value: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AuditConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.home_region, "us-east-1");
        assert_eq!(config.primary_region, "us-east-1");
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.scan_timeout, None);
        assert_eq!(config.stale_credential_days, 90);
        assert_eq!(config.wildcard_matching, WildcardMatching::BareString);
    }

    #[test]
    fn test_env_overrides() {
        let config = AuditConfig::from_lookup(lookup(&[
            ("AWS_REGION", "eu-west-1"),
            ("POSTURE_MAX_CONCURRENCY", "8"),
            ("POSTURE_SCAN_TIMEOUT_SECS", "30"),
            ("POSTURE_STALE_CREDENTIAL_DAYS", "45"),
        ]))
        .unwrap();

        assert_eq!(config.home_region, "eu-west-1");
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.scan_timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.stale_credential_days, 45);
    }

    #[test]
    fn test_posture_region_wins_over_aws_region() {
        let config = AuditConfig::from_lookup(lookup(&[
            ("AWS_REGION", "eu-west-1"),
            ("POSTURE_HOME_REGION", "ap-south-1"),
        ]))
        .unwrap();
        assert_eq!(config.home_region, "ap-south-1");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = AuditConfig::from_lookup(lookup(&[("POSTURE_MAX_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(err.to_string().contains("POSTURE_MAX_CONCURRENCY"));

        assert!(AuditConfig::from_lookup(lookup(&[("POSTURE_SCAN_TIMEOUT_SECS", "soon")])).is_err());
    }

    #[test]
    fn test_concurrency_floor() {
        assert_eq!(AuditConfig::default().with_max_concurrency(0).max_concurrency, 1);
    }
}
