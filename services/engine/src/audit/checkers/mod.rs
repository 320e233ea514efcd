//! Domain Checkers
//!
//! Each checker owns a fixed, ordered list of rules over one resource
//! category. Rules run strictly in declaration order and a checker's verdicts
//! are the concatenation of its rules' verdicts.
//!
//! - [`IdentityChecker`]: IAM users, root account, managed policies
//! - [`StorageChecker`]: S3 bucket encryption
//! - [`NetworkChecker`]: VPC flow logs and security groups, per region
//! - [`AuditTrailChecker`]: CloudTrail encryption, coverage and validation

pub mod audit_trail;
pub mod identity;
pub mod network;
pub mod storage;

pub use audit_trail::AuditTrailChecker;
pub use identity::IdentityChecker;
pub use network::NetworkChecker;
pub use storage::StorageChecker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

use super::providers::{RegionContext, SharedProvider};
use super::regions::RegionSet;
use super::types::{AuditError, Domain, Rule, Verdict};
use crate::config::AuditConfig;

/// Read-only state shared by every checker of one scan
#[derive(Clone)]
pub struct ScanContext {
    pub provider: SharedProvider,
    /// Default provider binding
    pub home: RegionContext,
    pub regions: RegionSet,
    pub config: Arc<AuditConfig>,
    /// Instant credential ages are measured against
    pub evaluated_at: DateTime<Utc>,
}

impl ScanContext {
    pub fn new(provider: SharedProvider, regions: RegionSet, config: AuditConfig) -> Self {
        Self {
            provider,
            home: RegionContext::new(config.home_region.as_str()),
            regions,
            config: Arc::new(config),
            evaluated_at: Utc::now(),
        }
    }

    pub fn at(mut self, evaluated_at: DateTime<Utc>) -> Self {
        self.evaluated_at = evaluated_at;
        self
    }

    pub fn concurrency(&self) -> usize {
        self.config.max_concurrency.max(1)
    }
}

/// A domain-scoped, ordered rule set
#[async_trait]
pub trait Checker: Send + Sync {
    fn domain(&self) -> Domain;

    /// Rules in evaluation order
    fn rules(&self) -> &'static [Rule];

    /// Evaluate a single rule
    async fn evaluate(&self, rule: Rule) -> Result<Vec<Verdict>, AuditError>;

    /// Evaluate every rule in order; the first error aborts the checker
    async fn check(&self) -> Result<Vec<Verdict>, AuditError> {
        let mut verdicts = Vec::new();

        for &rule in self.rules() {
            let rule_verdicts = self.evaluate(rule).await?;
            debug!(
                domain = %self.domain(),
                rule = %rule,
                verdicts = rule_verdicts.len(),
                "Rule evaluated"
            );
            verdicts.extend(rule_verdicts);
        }

        Ok(verdicts)
    }
}

/// The four checkers of a scan, in report order
pub fn all_checkers(scan: &ScanContext) -> Vec<Box<dyn Checker>> {
    vec![
        Box::new(IdentityChecker::new(scan.clone())),
        Box::new(StorageChecker::new(scan.clone())),
        Box::new(NetworkChecker::new(scan.clone())),
        Box::new(AuditTrailChecker::new(scan.clone())),
    ]
}

pub(crate) fn not_in_domain(rule: Rule, domain: Domain) -> AuditError {
    AuditError::RuleNotInDomain { rule, domain }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::audit::snapshot::SnapshotProvider;

    /// Scan context over a snapshot, evaluated at a fixed instant
    pub fn scan_over(provider: Arc<SnapshotProvider>, regions: &[&str]) -> ScanContext {
        ScanContext::new(
            provider,
            RegionSet::new(regions.iter().copied()),
            AuditConfig::default(),
        )
        .at(fixed_now())
    }

    pub fn fixed_now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    pub fn snapshot(json: &str) -> Arc<SnapshotProvider> {
        Arc::new(SnapshotProvider::from_json(json).unwrap())
    }
}
