//! Snapshot Provider
//!
//! A [`ResourceProvider`] backed by a point-in-time inventory held in memory,
//! usually loaded from a JSON export. Region visibility follows the upstream
//! APIs: bucket encryption must be read from the bucket's own region and a
//! single-region trail is only listed from the region it was created in.
//!
//! Failures can be injected per operation to rehearse the fail-fast policy,
//! and every call is logged so short-circuit behaviour can be observed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::providers::*;
use crate::config::DEFAULT_PRIMARY_REGION;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(flatten)]
    pub user: User,
    #[serde(default)]
    pub login_profile: Option<LoginProfile>,
    #[serde(default)]
    pub mfa_devices: Vec<MfaDevice>,
    #[serde(default)]
    pub access_keys: Vec<AccessKeyRecord>,
    #[serde(default)]
    pub inline_policies: Vec<String>,
    #[serde(default)]
    pub attached_policies: Vec<AttachedPolicy>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKeyRecord {
    #[serde(flatten)]
    pub key: AccessKey,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRecord {
    #[serde(flatten)]
    pub policy: ManagedPolicy,
    #[serde(default)]
    pub scope: PolicyScope,
    /// Version id to URL-encoded document
    #[serde(default)]
    pub versions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketRecord {
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub encryption: Option<BucketEncryption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionInventory {
    #[serde(default)]
    pub vpcs: Vec<Vpc>,
    #[serde(default)]
    pub flow_logs: Vec<FlowLog>,
    #[serde(default)]
    pub security_groups: Vec<SecurityGroup>,
}

/// Point-in-time inventory of one account
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub regions: Vec<String>,
    #[serde(default)]
    pub users: Vec<UserRecord>,
    #[serde(default)]
    pub account_summary: AccountSummary,
    #[serde(default)]
    pub policies: Vec<PolicyRecord>,
    #[serde(default)]
    pub buckets: Vec<BucketRecord>,
    /// Networking resources keyed by region
    #[serde(default)]
    pub regional: BTreeMap<String, RegionInventory>,
    #[serde(default)]
    pub trails: Vec<Trail>,
    /// Event selectors keyed by trail name
    #[serde(default)]
    pub event_selectors: BTreeMap<String, Vec<EventSelector>>,
}

/// Errors loading a snapshot
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Failed to read inventory snapshot: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid inventory snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

/// In-memory inventory provider
pub struct SnapshotProvider {
    inventory: Inventory,
    primary_region: String,
    faults: HashMap<(Operation, String), String>,
    latency: Option<Duration>,
    calls: Mutex<Vec<(Operation, String)>>,
}

impl SnapshotProvider {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory,
            primary_region: DEFAULT_PRIMARY_REGION.to_string(),
            faults: HashMap::new(),
            latency: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Override the region buckets without a location constraint live in
    pub fn with_primary_region(mut self, region: &str) -> Self {
        self.primary_region = region.to_string();
        self
    }

    /// Make `operation` fail whenever it is called with `key`: a user name,
    /// access key id, policy arn, bucket or trail name, or a region for
    /// region-wide listings. An empty key matches calls without an argument.
    pub fn fail_on(mut self, operation: Operation, key: &str) -> Self {
        self.faults.insert(
            (operation, key.to_string()),
            format!("injected failure for {key:?}"),
        );
        self
    }

    /// Delay every call by `latency` to stand in for a slow upstream API
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Every call made so far, in order
    pub fn call_log(&self) -> Vec<(Operation, String)> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Number of calls made to `operation`
    pub fn call_count(&self, operation: Operation) -> usize {
        self.call_log()
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    async fn record(&self, operation: Operation, key: &str) -> ProviderResult<()> {
        debug!(operation = %operation, key = %key, "Snapshot call");
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((operation, key.to_string()));

        match self.faults.get(&(operation, key.to_string())) {
            Some(message) => Err(ProviderError::new(operation, message.clone())),
            None => Ok(()),
        }
    }

    async fn record_in(
        &self,
        operation: Operation,
        ctx: &RegionContext,
        key: &str,
    ) -> ProviderResult<()> {
        self.record(operation, key)
            .await
            .map_err(|err| err.in_region(ctx))
    }

    fn user(&self, operation: Operation, user_name: &str) -> ProviderResult<&UserRecord> {
        self.inventory
            .users
            .iter()
            .find(|u| u.user.name == user_name)
            .ok_or_else(|| ProviderError::new(operation, format!("NoSuchEntity: user {user_name}")))
    }

    fn bucket(&self, operation: Operation, bucket: &str) -> ProviderResult<&BucketRecord> {
        self.inventory
            .buckets
            .iter()
            .find(|b| b.name == bucket)
            .ok_or_else(|| ProviderError::new(operation, format!("NoSuchBucket: {bucket}")))
    }

    fn region(&self, operation: Operation, ctx: &RegionContext) -> ProviderResult<Option<&RegionInventory>> {
        if !self.inventory.regions.is_empty()
            && !self.inventory.regions.iter().any(|r| r == ctx.region())
        {
            return Err(ProviderError::new(operation, "UnrecognizedClientException: region not enabled")
                .in_region(ctx));
        }
        Ok(self.inventory.regional.get(ctx.region()))
    }

    fn trail_visible(trail: &Trail, ctx: &RegionContext) -> bool {
        trail.is_multi_region || trail.home_region == ctx.region()
    }
}

#[async_trait]
impl ResourceProvider for SnapshotProvider {
    async fn list_regions(&self, ctx: &RegionContext) -> ProviderResult<Vec<String>> {
        self.record_in(Operation::DescribeRegions, ctx, "").await?;
        Ok(self.inventory.regions.clone())
    }

    async fn list_users(&self) -> ProviderResult<Vec<User>> {
        self.record(Operation::ListUsers, "").await?;
        Ok(self.inventory.users.iter().map(|u| u.user.clone()).collect())
    }

    async fn list_mfa_devices(&self, user_name: &str) -> ProviderResult<Vec<MfaDevice>> {
        self.record(Operation::ListMFADevices, user_name).await?;
        Ok(self.user(Operation::ListMFADevices, user_name)?.mfa_devices.clone())
    }

    async fn get_login_profile(&self, user_name: &str) -> ProviderResult<Option<LoginProfile>> {
        self.record(Operation::GetLoginProfile, user_name).await?;
        Ok(self.user(Operation::GetLoginProfile, user_name)?.login_profile.clone())
    }

    async fn list_access_keys(&self, user_name: &str) -> ProviderResult<Vec<AccessKey>> {
        self.record(Operation::ListAccessKeys, user_name).await?;
        Ok(self
            .user(Operation::ListAccessKeys, user_name)?
            .access_keys
            .iter()
            .map(|k| k.key.clone())
            .collect())
    }

    async fn get_access_key_last_used(
        &self,
        access_key_id: &str,
    ) -> ProviderResult<Option<DateTime<Utc>>> {
        self.record(Operation::GetAccessKeyLastUsed, access_key_id).await?;
        self.inventory
            .users
            .iter()
            .flat_map(|u| u.access_keys.iter())
            .find(|k| k.key.id == access_key_id)
            .map(|k| k.last_used)
            .ok_or_else(|| {
                ProviderError::new(
                    Operation::GetAccessKeyLastUsed,
                    format!("NoSuchEntity: access key {access_key_id}"),
                )
            })
    }

    async fn get_account_summary(&self) -> ProviderResult<AccountSummary> {
        self.record(Operation::GetAccountSummary, "").await?;
        Ok(self.inventory.account_summary)
    }

    async fn list_policies(&self, scope: PolicyScope) -> ProviderResult<Vec<ManagedPolicy>> {
        self.record(Operation::ListPolicies, "").await?;
        Ok(self
            .inventory
            .policies
            .iter()
            .filter(|p| scope == PolicyScope::All || p.scope == scope)
            .map(|p| p.policy.clone())
            .collect())
    }

    async fn get_policy_version(
        &self,
        policy_arn: &str,
        version_id: &str,
    ) -> ProviderResult<String> {
        self.record(Operation::GetPolicyVersion, policy_arn).await?;
        self.inventory
            .policies
            .iter()
            .find(|p| p.policy.arn == policy_arn)
            .and_then(|p| p.versions.get(version_id))
            .cloned()
            .ok_or_else(|| {
                ProviderError::new(
                    Operation::GetPolicyVersion,
                    format!("NoSuchEntity: {policy_arn} version {version_id}"),
                )
            })
    }

    async fn list_user_policies(&self, user_name: &str) -> ProviderResult<Vec<String>> {
        self.record(Operation::ListUserPolicies, user_name).await?;
        Ok(self.user(Operation::ListUserPolicies, user_name)?.inline_policies.clone())
    }

    async fn list_attached_user_policies(
        &self,
        user_name: &str,
    ) -> ProviderResult<Vec<AttachedPolicy>> {
        self.record(Operation::ListAttachedUserPolicies, user_name).await?;
        Ok(self
            .user(Operation::ListAttachedUserPolicies, user_name)?
            .attached_policies
            .clone())
    }

    async fn list_buckets(&self) -> ProviderResult<Vec<Bucket>> {
        self.record(Operation::ListBuckets, "").await?;
        Ok(self
            .inventory
            .buckets
            .iter()
            .map(|b| Bucket { name: b.name.clone() })
            .collect())
    }

    async fn get_bucket_location(&self, bucket: &str) -> ProviderResult<Option<String>> {
        self.record(Operation::GetBucketLocation, bucket).await?;
        Ok(self.bucket(Operation::GetBucketLocation, bucket)?.location.clone())
    }

    async fn get_bucket_encryption(
        &self,
        ctx: &RegionContext,
        bucket: &str,
    ) -> ProviderResult<Option<BucketEncryption>> {
        self.record_in(Operation::GetBucketEncryption, ctx, bucket).await?;
        let record = self.bucket(Operation::GetBucketEncryption, bucket)?;

        let home = record
            .location
            .as_deref()
            .filter(|l| !l.is_empty())
            .unwrap_or(self.primary_region.as_str());
        if home != ctx.region() {
            return Err(ProviderError::new(
                Operation::GetBucketEncryption,
                format!("PermanentRedirect: bucket {bucket} is in {home}"),
            )
            .in_region(ctx));
        }

        Ok(record.encryption.clone())
    }

    async fn describe_vpcs(&self, ctx: &RegionContext) -> ProviderResult<Vec<Vpc>> {
        self.record_in(Operation::DescribeVpcs, ctx, ctx.region()).await?;
        Ok(self
            .region(Operation::DescribeVpcs, ctx)?
            .map(|r| r.vpcs.clone())
            .unwrap_or_default())
    }

    async fn describe_flow_logs(
        &self,
        ctx: &RegionContext,
        vpc_id: &str,
    ) -> ProviderResult<Vec<FlowLog>> {
        self.record_in(Operation::DescribeFlowLogs, ctx, vpc_id).await?;
        Ok(self
            .region(Operation::DescribeFlowLogs, ctx)?
            .map(|r| {
                r.flow_logs
                    .iter()
                    .filter(|f| f.resource_id == vpc_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn describe_security_groups(
        &self,
        ctx: &RegionContext,
        filter: &SecurityGroupFilter,
    ) -> ProviderResult<Vec<SecurityGroup>> {
        let key = filter.vpc_id.as_deref().unwrap_or_default();
        self.record_in(Operation::DescribeSecurityGroups, ctx, key).await?;
        Ok(self
            .region(Operation::DescribeSecurityGroups, ctx)?
            .map(|r| {
                r.security_groups
                    .iter()
                    .filter(|g| filter.matches(g))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn describe_trails(&self, ctx: &RegionContext) -> ProviderResult<Vec<Trail>> {
        self.record_in(Operation::DescribeTrails, ctx, ctx.region()).await?;
        self.region(Operation::DescribeTrails, ctx)?;
        Ok(self
            .inventory
            .trails
            .iter()
            .filter(|t| Self::trail_visible(t, ctx))
            .cloned()
            .collect())
    }

    async fn get_event_selectors(
        &self,
        ctx: &RegionContext,
        trail_name: &str,
    ) -> ProviderResult<Vec<EventSelector>> {
        self.record_in(Operation::GetEventSelectors, ctx, trail_name).await?;
        let visible = self
            .inventory
            .trails
            .iter()
            .any(|t| t.name == trail_name && Self::trail_visible(t, ctx));
        if !visible {
            return Err(ProviderError::new(
                Operation::GetEventSelectors,
                format!("TrailNotFoundException: {trail_name}"),
            )
            .in_region(ctx));
        }

        Ok(self
            .inventory
            .event_selectors
            .get(trail_name)
            .cloned()
            .unwrap_or_default())
    }
}
