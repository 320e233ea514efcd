//! Resource Provider Capability
//!
//! Trait-based abstraction over the read-only cloud inventory a scan is
//! evaluated against. Region-scoped calls take an explicit [`RegionContext`]
//! instead of a client bound to a region, so one provider handle serves the
//! whole scan.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Shared, read-only provider handle
pub type SharedProvider = Arc<dyn ResourceProvider>;

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Region a provider call is bound to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionContext {
    region: String,
}

impl RegionContext {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }
}

impl std::fmt::Display for RegionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.region)
    }
}

/// Inventory operation, named after the upstream API call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    DescribeRegions,
    ListUsers,
    ListMFADevices,
    GetLoginProfile,
    ListAccessKeys,
    GetAccessKeyLastUsed,
    GetAccountSummary,
    ListPolicies,
    GetPolicyVersion,
    ListUserPolicies,
    ListAttachedUserPolicies,
    ListBuckets,
    GetBucketLocation,
    GetBucketEncryption,
    DescribeVpcs,
    DescribeFlowLogs,
    DescribeSecurityGroups,
    DescribeTrails,
    GetEventSelectors,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Failure of a single provider call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "{operation} failed{}: {message}",
    .region.as_deref().map(|r| format!(" in {r}")).unwrap_or_default()
)]
pub struct ProviderError {
    pub operation: Operation,
    pub region: Option<String>,
    pub message: String,
}

impl ProviderError {
    pub fn new(operation: Operation, message: impl Into<String>) -> Self {
        Self {
            operation,
            region: None,
            message: message.into(),
        }
    }

    pub fn in_region(mut self, ctx: &RegionContext) -> Self {
        self.region = Some(ctx.region().to_string());
        self
    }
}

// ---------------------------------------------------------------------------
// Identity inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub arn: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaDevice {
    pub serial_number: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginProfile {
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessKeyStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey {
    pub id: String,
    pub status: AccessKeyStatus,
}

impl AccessKey {
    pub fn is_active(&self) -> bool {
        self.status == AccessKeyStatus::Active
    }
}

/// Account-level credential counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSummary {
    #[serde(default)]
    pub account_mfa_enabled: i64,
    #[serde(default)]
    pub account_access_keys_present: i64,
}

/// Which managed policies to list
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PolicyScope {
    All,
    #[serde(rename = "AWS")]
    Aws,
    /// Customer-managed policies
    #[default]
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedPolicy {
    pub arn: String,
    #[serde(default)]
    pub name: String,
    pub default_version_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedPolicy {
    pub arn: String,
    #[serde(default)]
    pub name: String,
}

// ---------------------------------------------------------------------------
// Storage inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub name: String,
}

/// Server-side encryption configuration of a bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketEncryption {
    pub algorithm: String,
    #[serde(default)]
    pub kms_key_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Network inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vpc {
    pub id: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowLog {
    pub id: String,
    pub resource_id: String,
}

/// One inbound or outbound security group rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPermission {
    /// `tcp`, `udp`, `icmp` or `-1` for all protocols
    pub protocol: String,
    #[serde(default)]
    pub from_port: Option<i64>,
    #[serde(default)]
    pub to_port: Option<i64>,
    #[serde(default)]
    pub ipv4_ranges: Vec<String>,
    #[serde(default)]
    pub ipv6_ranges: Vec<String>,
}

impl IpPermission {
    pub fn is_tcp(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("tcp")
    }

    /// Whether `port` falls inside the rule's port range. A rule without a
    /// range covers nothing.
    pub fn covers_port(&self, port: i64) -> bool {
        match (self.from_port, self.to_port) {
            (Some(from), Some(to)) => from <= port && port <= to,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub vpc_id: String,
    #[serde(default)]
    pub ingress: Vec<IpPermission>,
    #[serde(default)]
    pub egress: Vec<IpPermission>,
}

impl SecurityGroup {
    pub fn has_no_rules(&self) -> bool {
        self.ingress.is_empty() && self.egress.is_empty()
    }
}

/// Filter for `describe_security_groups`; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecurityGroupFilter {
    pub vpc_id: Option<String>,
    pub group_name: Option<String>,
}

impl SecurityGroupFilter {
    pub fn in_vpc(vpc_id: &str) -> Self {
        Self {
            vpc_id: Some(vpc_id.to_string()),
            group_name: None,
        }
    }

    pub fn named(mut self, group_name: &str) -> Self {
        self.group_name = Some(group_name.to_string());
        self
    }

    pub fn matches(&self, group: &SecurityGroup) -> bool {
        self.vpc_id.as_deref().map_or(true, |v| v == group.vpc_id)
            && self.group_name.as_deref().map_or(true, |n| n == group.name)
    }
}

// ---------------------------------------------------------------------------
// Audit trail inventory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trail {
    pub name: String,
    #[serde(default)]
    pub arn: Option<String>,
    /// Region the trail was created in
    pub home_region: String,
    #[serde(default)]
    pub is_multi_region: bool,
    #[serde(default)]
    pub kms_key_id: Option<String>,
    #[serde(default)]
    pub log_file_validation_enabled: bool,
}

impl Trail {
    pub fn is_encrypted(&self) -> bool {
        self.kms_key_id.as_deref().is_some_and(|k| !k.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSelector {
    #[serde(default)]
    pub include_management_events: bool,
    #[serde(default)]
    pub exclude_management_event_sources: Vec<String>,
}

impl EventSelector {
    /// Whether the selector logs every management event
    pub fn logs_all_management_events(&self) -> bool {
        self.include_management_events && self.exclude_management_event_sources.is_empty()
    }
}

/// Read-only access to a cloud account's inventory
///
/// Identity and bucket listing calls are global; everything else is bound to
/// the region in the supplied context.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Regions enabled for the account, as seen from `ctx`
    async fn list_regions(&self, ctx: &RegionContext) -> ProviderResult<Vec<String>>;

    async fn list_users(&self) -> ProviderResult<Vec<User>>;

    async fn list_mfa_devices(&self, user_name: &str) -> ProviderResult<Vec<MfaDevice>>;

    /// `None` when the user has no console password
    async fn get_login_profile(&self, user_name: &str) -> ProviderResult<Option<LoginProfile>>;

    async fn list_access_keys(&self, user_name: &str) -> ProviderResult<Vec<AccessKey>>;

    /// `None` when the key has never been used
    async fn get_access_key_last_used(
        &self,
        access_key_id: &str,
    ) -> ProviderResult<Option<DateTime<Utc>>>;

    async fn get_account_summary(&self) -> ProviderResult<AccountSummary>;

    async fn list_policies(&self, scope: PolicyScope) -> ProviderResult<Vec<ManagedPolicy>>;

    /// URL-encoded JSON policy document of one policy version
    async fn get_policy_version(&self, policy_arn: &str, version_id: &str)
        -> ProviderResult<String>;

    /// Names of the user's inline policies
    async fn list_user_policies(&self, user_name: &str) -> ProviderResult<Vec<String>>;

    async fn list_attached_user_policies(
        &self,
        user_name: &str,
    ) -> ProviderResult<Vec<AttachedPolicy>>;

    async fn list_buckets(&self) -> ProviderResult<Vec<Bucket>>;

    /// Raw location constraint; `None` or empty for the primary region
    async fn get_bucket_location(&self, bucket: &str) -> ProviderResult<Option<String>>;

    async fn get_bucket_encryption(
        &self,
        ctx: &RegionContext,
        bucket: &str,
    ) -> ProviderResult<Option<BucketEncryption>>;

    async fn describe_vpcs(&self, ctx: &RegionContext) -> ProviderResult<Vec<Vpc>>;

    async fn describe_flow_logs(
        &self,
        ctx: &RegionContext,
        vpc_id: &str,
    ) -> ProviderResult<Vec<FlowLog>>;

    async fn describe_security_groups(
        &self,
        ctx: &RegionContext,
        filter: &SecurityGroupFilter,
    ) -> ProviderResult<Vec<SecurityGroup>>;

    /// Trails visible from `ctx`: every multi-region trail plus the
    /// single-region trails created in that region
    async fn describe_trails(&self, ctx: &RegionContext) -> ProviderResult<Vec<Trail>>;

    async fn get_event_selectors(
        &self,
        ctx: &RegionContext,
        trail_name: &str,
    ) -> ProviderResult<Vec<EventSelector>>;
}
