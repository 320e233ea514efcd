//! Audit Orchestrator
//!
//! Resolves the region set, runs the four checkers in order and concatenates
//! their verdicts into one flat report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use tracing::{info, warn};
use uuid::Uuid;

use super::checkers::{all_checkers, ScanContext};
use super::providers::{RegionContext, SharedProvider};
use super::regions::RegionDirectory;
use super::types::{AuditError, Rule, Verdict};
use crate::config::AuditConfig;

/// Result of a complete scan
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub scan_id: Uuid,
    pub home_region: String,
    pub regions: Vec<String>,
    /// Rule-then-resource order
    pub verdicts: Vec<Verdict>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ScanReport {
    pub fn compliant_count(&self) -> usize {
        self.verdicts.iter().filter(|v| v.is_compliant()).count()
    }

    pub fn non_compliant_count(&self) -> usize {
        self.verdicts.len() - self.compliant_count()
    }
}

/// A rule that could not be evaluated in a partial scan
#[derive(Debug, Clone, Serialize)]
pub struct RuleFailure {
    pub rule: Rule,
    pub error: String,
}

/// Result of a scan that keeps going past failing rules
#[derive(Debug, Clone, Serialize)]
pub struct PartialReport {
    pub scan_id: Uuid,
    pub verdicts: Vec<Verdict>,
    pub failures: Vec<RuleFailure>,
    pub rules_evaluated: usize,
    pub rules_total: usize,
}

impl PartialReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        format!("{} of {} rules evaluated", self.rules_evaluated, self.rules_total)
    }
}

/// Runs compliance scans against one provider
pub struct Auditor {
    provider: SharedProvider,
    config: AuditConfig,
    /// Fixed evaluation instant; `None` means the wall clock at scan start
    evaluated_at: Option<DateTime<Utc>>,
}

impl Auditor {
    /// Construction performs no provider calls
    pub fn new(provider: SharedProvider, config: AuditConfig) -> Self {
        Self {
            provider,
            config,
            evaluated_at: None,
        }
    }

    /// Measure credential ages against `now` instead of the wall clock
    pub fn evaluated_at(mut self, now: DateTime<Utc>) -> Self {
        self.evaluated_at = Some(now);
        self
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Run a full scan. Any provider or policy error aborts the scan and no
    /// verdicts are returned.
    pub async fn scan(&self) -> Result<ScanReport, AuditError> {
        self.with_timeout(self.run()).await
    }

    /// Run a full scan and return only the verdicts
    pub async fn check(&self) -> Result<Vec<Verdict>, AuditError> {
        Ok(self.scan().await?.verdicts)
    }

    /// Run a full scan, aborting with [`AuditError::Cancelled`] as soon as
    /// `cancel` completes
    pub async fn scan_until<F>(&self, cancel: F) -> Result<ScanReport, AuditError>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.scan() => result,
            _ = cancel => {
                warn!("Scan cancelled");
                Err(AuditError::Cancelled)
            }
        }
    }

    /// Run every rule even when earlier rules fail. A failing rule
    /// contributes no verdicts and is listed in the report's failures.
    /// Region resolution failures and timeouts still abort.
    pub async fn scan_partial(&self) -> Result<PartialReport, AuditError> {
        self.with_timeout(self.run_partial()).await
    }

    async fn with_timeout<T>(
        &self,
        scan: impl Future<Output = Result<T, AuditError>>,
    ) -> Result<T, AuditError> {
        match self.config.scan_timeout {
            Some(limit) => match tokio::time::timeout(limit, scan).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(timeout = ?limit, "Scan timed out");
                    Err(AuditError::TimedOut(limit))
                }
            },
            None => scan.await,
        }
    }

    async fn prepare(&self) -> Result<ScanContext, AuditError> {
        let home = RegionContext::new(self.config.home_region.as_str());
        let regions = RegionDirectory::resolve(self.provider.as_ref(), &home).await?;

        let scan = ScanContext::new(self.provider.clone(), regions, self.config.clone());
        Ok(match self.evaluated_at {
            Some(now) => scan.at(now),
            None => scan,
        })
    }

    async fn run(&self) -> Result<ScanReport, AuditError> {
        let started_at = Utc::now();
        let scan_id = Uuid::new_v4();
        info!(scan_id = %scan_id, home = %self.config.home_region, "Starting compliance scan");

        let scan = self.prepare().await?;
        let mut verdicts = Vec::new();

        for checker in all_checkers(&scan) {
            let domain_verdicts = checker.check().await?;
            info!(
                scan_id = %scan_id,
                domain = %checker.domain(),
                verdicts = domain_verdicts.len(),
                "Checker complete"
            );
            verdicts.extend(domain_verdicts);
        }

        let completed_at = Utc::now();
        let report = ScanReport {
            scan_id,
            home_region: self.config.home_region.clone(),
            regions: scan.regions.to_vec(),
            verdicts,
            started_at,
            completed_at,
            duration_ms: (completed_at - started_at).num_milliseconds().max(0) as u64,
        };

        info!(
            scan_id = %scan_id,
            verdicts = report.verdicts.len(),
            non_compliant = report.non_compliant_count(),
            duration_ms = report.duration_ms,
            "Compliance scan complete"
        );
        Ok(report)
    }

    async fn run_partial(&self) -> Result<PartialReport, AuditError> {
        let scan_id = Uuid::new_v4();
        info!(scan_id = %scan_id, "Starting partial compliance scan");

        let scan = self.prepare().await?;
        let mut verdicts = Vec::new();
        let mut failures = Vec::new();
        let mut rules_total = 0;

        for checker in all_checkers(&scan) {
            for &rule in checker.rules() {
                rules_total += 1;
                match checker.evaluate(rule).await {
                    Ok(rule_verdicts) => verdicts.extend(rule_verdicts),
                    Err(e) => {
                        warn!(scan_id = %scan_id, rule = %rule, error = %e, "Rule failed");
                        failures.push(RuleFailure {
                            rule,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        let report = PartialReport {
            scan_id,
            verdicts,
            rules_evaluated: rules_total - failures.len(),
            failures,
            rules_total,
        };
        info!(scan_id = %scan_id, "{}", report.summary());
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::checkers::testing::fixed_now;
    use crate::audit::providers::Operation;
    use crate::audit::snapshot::SnapshotProvider;
    use std::sync::Arc;
    use std::time::Duration;

    const ACCOUNT: &str = r#"{
        "regions": ["us-east-1", "eu-west-1"],
        "users": [{"name": "alice", "arn": "arn:u/alice", "login_profile": {},
                   "mfa_devices": [{"serial_number": "mfa"}]}],
        "account_summary": {"account_mfa_enabled": 1, "account_access_keys_present": 1},
        "buckets": [{"name": "b1", "encryption": {"algorithm": "AES256"}},
                    {"name": "b2", "location": "eu-west-1"}],
        "regional": {
            "us-east-1": {"vpcs": [{"id": "vpc-1"}],
                          "security_groups": [{"id": "sg-1", "name": "default", "vpc_id": "vpc-1"}]},
            "eu-west-1": {"vpcs": [{"id": "vpc-2"}],
                          "flow_logs": [{"id": "fl", "resource_id": "vpc-2"}]}
        },
        "trails": [{"name": "org", "home_region": "us-east-1", "is_multi_region": true,
                    "kms_key_id": "k", "log_file_validation_enabled": true}],
        "event_selectors": {"org": [{"include_management_events": true}]}
    }"#;

    fn auditor(provider: SnapshotProvider, config: AuditConfig) -> Auditor {
        Auditor::new(Arc::new(provider), config).evaluated_at(fixed_now())
    }

    fn account() -> SnapshotProvider {
        SnapshotProvider::from_json(ACCOUNT).unwrap()
    }

    #[tokio::test]
    async fn test_scan_concatenates_in_checker_order() {
        let report = auditor(account(), AuditConfig::default()).scan().await.unwrap();

        let rules: Vec<Rule> = report.verdicts.iter().map(|v| v.rule()).collect();
        assert_eq!(
            rules,
            vec![
                Rule::ConsoleMfa,
                Rule::RootMfa,
                Rule::RootAccessKeys,
                Rule::NoUserPolicies,
                Rule::BucketEncryption,
                Rule::BucketEncryption,
                Rule::VpcFlowLogs,
                Rule::VpcFlowLogs,
                Rule::DefaultSecurityGroupNoRules,
                Rule::RestrictedSsh,
                Rule::TrailEncryption,
                Rule::MultiRegionTrail,
                Rule::LogFileValidation,
            ]
        );
        assert_eq!(report.regions, vec!["us-east-1", "eu-west-1"]);
        assert_eq!(report.home_region, "us-east-1");
        // root access keys, b2 encryption, vpc-1 flow logs
        assert_eq!(report.non_compliant_count(), 3);
        assert_eq!(report.compliant_count(), 10);
    }

    #[tokio::test]
    async fn test_order_independent_of_concurrency() {
        let mut outputs = Vec::new();
        for concurrency in [1, 8] {
            let config = AuditConfig::default().with_max_concurrency(concurrency);
            let verdicts = auditor(account(), config).check().await.unwrap();
            outputs.push(serde_json::to_string(&verdicts).unwrap());
        }
        assert_eq!(outputs[0], outputs[1]);
    }

    #[tokio::test]
    async fn test_failure_in_one_region_aborts_scan() {
        let provider = account().fail_on(Operation::DescribeFlowLogs, "vpc-2");
        let err = auditor(provider, AuditConfig::default()).check().await.unwrap_err();

        match err {
            AuditError::Provider(e) => {
                assert_eq!(e.operation, Operation::DescribeFlowLogs);
                assert_eq!(e.region.as_deref(), Some("eu-west-1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_region_resolution_failure() {
        let provider = account().fail_on(Operation::DescribeRegions, "");
        let auditor = auditor(provider, AuditConfig::default());

        assert!(matches!(auditor.scan().await, Err(AuditError::Provider(_))));
        assert!(matches!(auditor.scan_partial().await, Err(AuditError::Provider(_))));
    }

    #[tokio::test]
    async fn test_scan_timeout() {
        let provider = account().with_latency(Duration::from_millis(50));
        let config = AuditConfig::default().with_scan_timeout(Duration::from_millis(20));

        let err = auditor(provider, config).scan().await.unwrap_err();
        assert!(matches!(err, AuditError::TimedOut(d) if d == Duration::from_millis(20)));
    }

    #[tokio::test]
    async fn test_scan_cancelled() {
        let provider = account().with_latency(Duration::from_millis(50));
        let auditor = auditor(provider, AuditConfig::default());

        let err = auditor
            .scan_until(tokio::time::sleep(Duration::from_millis(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, AuditError::Cancelled));
    }

    #[tokio::test]
    async fn test_partial_scan_keeps_other_rules() {
        let provider = account().fail_on(Operation::ListBuckets, "");
        let auditor = auditor(provider, AuditConfig::default());

        assert!(auditor.scan().await.is_err());

        let report = auditor.scan_partial().await.unwrap();
        assert!(!report.is_complete());
        assert_eq!(report.rules_total, Rule::ALL.len());
        assert_eq!(report.rules_evaluated, Rule::ALL.len() - 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].rule, Rule::BucketEncryption);
        assert!(report.failures[0].error.contains("ListBuckets"));
        assert_eq!(report.verdicts.len(), 11);
        assert_eq!(report.summary(), "12 of 13 rules evaluated");
    }
}
