//! Storage Checker
//!
//! Bucket encryption must be read through a binding to the bucket's own
//! region, so every bucket is first located and then evaluated with a
//! per-bucket context. Buckets are evaluated concurrently, reported in
//! listing order.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{not_in_domain, Checker, ScanContext};
use crate::audit::providers::{Bucket, RegionContext};
use crate::audit::regions::ordered_fan_out;
use crate::audit::types::{AuditError, Domain, Resource, ResourceType, Rule, Verdict};

const RULES: &[Rule] = &[Rule::BucketEncryption];

pub struct StorageChecker {
    scan: ScanContext,
}

impl StorageChecker {
    pub fn new(scan: ScanContext) -> Self {
        Self { scan }
    }

    /// Region a bucket lives in; an empty location constraint means the
    /// primary region
    async fn locate(&self, bucket: &Bucket) -> Result<RegionContext, AuditError> {
        let location = self.scan.provider.get_bucket_location(&bucket.name).await?;
        let region = location
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| self.scan.config.primary_region.clone());
        Ok(RegionContext::new(region))
    }

    async fn check_bucket(&self, bucket: Bucket) -> Result<Verdict, AuditError> {
        let ctx = self.locate(&bucket).await?;
        let encryption = self
            .scan
            .provider
            .get_bucket_encryption(&ctx, &bucket.name)
            .await?;
        debug!(bucket = %bucket.name, region = %ctx, encrypted = encryption.is_some(), "Bucket evaluated");

        let resource = Resource::new(ResourceType::S3Bucket, bucket.name);
        Ok(match encryption {
            Some(_) => Verdict::pass(resource, Rule::BucketEncryption),
            None => Verdict::fail(resource, Rule::BucketEncryption, "Bucket is not encrypted"),
        })
    }

    async fn check_bucket_encryption(&self) -> Result<Vec<Verdict>, AuditError> {
        let buckets = self.scan.provider.list_buckets().await?;
        ordered_fan_out(buckets, self.scan.concurrency(), |bucket| self.check_bucket(bucket)).await
    }
}

#[async_trait]
impl Checker for StorageChecker {
    fn domain(&self) -> Domain {
        Domain::Storage
    }

    fn rules(&self) -> &'static [Rule] {
        RULES
    }

    async fn evaluate(&self, rule: Rule) -> Result<Vec<Verdict>, AuditError> {
        match rule {
            Rule::BucketEncryption => {
                let verdicts = self.check_bucket_encryption().await?;
                info!(rule = %rule, verdicts = verdicts.len(), "Storage rule complete");
                Ok(verdicts)
            }
            other => Err(not_in_domain(other, Domain::Storage)),
        }
    }
}
