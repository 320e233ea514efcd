//! Audit Trail Checker
//!
//! A multi-region trail is listed from every region, a single-region trail
//! only from the region it was created in. Encryption therefore reads
//! multi-region trails once from the home view and single-region trails
//! region by region; the other rules use the home view only.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{not_in_domain, Checker, ScanContext};
use crate::audit::providers::{ResourceProvider, Trail};
use crate::audit::regions::fan_out_regions;
use crate::audit::types::{AuditError, Domain, Resource, ResourceType, Rule, Verdict};

const RULES: &[Rule] = &[
    Rule::TrailEncryption,
    Rule::MultiRegionTrail,
    Rule::LogFileValidation,
];

pub struct AuditTrailChecker {
    scan: ScanContext,
}

impl AuditTrailChecker {
    pub fn new(scan: ScanContext) -> Self {
        Self { scan }
    }

    fn provider(&self) -> &dyn ResourceProvider {
        self.scan.provider.as_ref()
    }

    /// Trails visible from the home region
    async fn home_trails(&self) -> Result<Vec<Trail>, AuditError> {
        Ok(self.provider().describe_trails(&self.scan.home).await?)
    }

    /// Every trail of the account exactly once: multi-region trails from the
    /// home view first, then single-region trails in region order. A
    /// single-region trail is only listed from its own region, so trails
    /// sharing a name in different regions stay distinct.
    async fn all_trails(&self) -> Result<Vec<Trail>, AuditError> {
        let mut trails: Vec<Trail> = self
            .home_trails()
            .await?
            .into_iter()
            .filter(|t| t.is_multi_region)
            .collect();

        let regional = fan_out_regions(&self.scan.regions, self.scan.concurrency(), |ctx| async move {
            let trails = self.provider().describe_trails(&ctx).await?;
            Ok::<_, AuditError>(trails.into_iter().filter(|t| !t.is_multi_region).collect::<Vec<_>>())
        })
        .await?;
        trails.extend(regional);
        Ok(trails)
    }

    async fn check_encryption(&self) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::TrailEncryption;
        let verdicts = self
            .all_trails()
            .await?
            .into_iter()
            .map(|trail| {
                let encrypted = trail.is_encrypted();
                let resource = trail_resource(trail);
                if encrypted {
                    Verdict::pass(resource, rule)
                } else {
                    Verdict::fail(resource, rule, "CloudTrail is not encrypted")
                }
            })
            .collect();
        Ok(verdicts)
    }

    /// Exactly one verdict: the first multi-region trail logging every
    /// management event, or a failure on the account. Event selectors of
    /// trails after the first match are never fetched.
    async fn check_multi_region(&self) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::MultiRegionTrail;
        let trails = self.home_trails().await?;

        for trail in trails.into_iter().filter(|t| t.is_multi_region) {
            let selectors = self
                .provider()
                .get_event_selectors(&self.scan.home, &trail.name)
                .await?;

            if selectors.iter().any(|s| s.logs_all_management_events()) {
                debug!(trail = %trail.name, "Multi-region trail logs all management events");
                return Ok(vec![Verdict::pass(trail_resource(trail), rule)]);
            }
        }

        Ok(vec![Verdict::fail(
            Resource::no_trail(),
            rule,
            "CloudTrail does not have multi-region trails enabled",
        )])
    }

    async fn check_log_validation(&self) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::LogFileValidation;
        let verdicts = self
            .home_trails()
            .await?
            .into_iter()
            .map(|trail| {
                let validated = trail.log_file_validation_enabled;
                let resource = trail_resource(trail);
                if validated {
                    Verdict::pass(resource, rule)
                } else {
                    Verdict::fail(resource, rule, "CloudTrail does not have log file validation enabled")
                }
            })
            .collect();
        Ok(verdicts)
    }
}

fn trail_resource(trail: Trail) -> Resource {
    Resource::new(ResourceType::CloudTrail, trail.name)
}

#[async_trait]
impl Checker for AuditTrailChecker {
    fn domain(&self) -> Domain {
        Domain::AuditTrail
    }

    fn rules(&self) -> &'static [Rule] {
        RULES
    }

    async fn evaluate(&self, rule: Rule) -> Result<Vec<Verdict>, AuditError> {
        let verdicts = match rule {
            Rule::TrailEncryption => self.check_encryption().await?,
            Rule::MultiRegionTrail => self.check_multi_region().await?,
            Rule::LogFileValidation => self.check_log_validation().await?,
            other => return Err(not_in_domain(other, Domain::AuditTrail)),
        };

        info!(rule = %rule, verdicts = verdicts.len(), "Audit trail rule complete");
        Ok(verdicts)
    }
}
