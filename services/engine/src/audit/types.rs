//! Compliance Verdict Types
//!
//! Core types shared by every checker: the rule catalogue, the resources a
//! rule is evaluated against, and the verdicts the engine emits.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::policy::PolicyParseError;
use super::providers::ProviderError;

/// Resource name used for account-wide root credential rules
pub const ROOT_ACCOUNT: &str = "root";

/// Resource name used when an account-wide rule has no satisfying resource
pub const NOT_APPLICABLE: &str = "N/A";

/// Category tag of an evaluated resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "aws/iam-user")]
    IamUser,
    #[serde(rename = "aws/iam-policy")]
    IamPolicy,
    #[serde(rename = "aws/s3-bucket")]
    S3Bucket,
    #[serde(rename = "aws/vpc")]
    Vpc,
    #[serde(rename = "aws/security-group")]
    SecurityGroup,
    #[serde(rename = "aws/cloudtrail")]
    CloudTrail,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::IamUser => "aws/iam-user",
            ResourceType::IamPolicy => "aws/iam-policy",
            ResourceType::S3Bucket => "aws/s3-bucket",
            ResourceType::Vpc => "aws/vpc",
            ResourceType::SecurityGroup => "aws/security-group",
            ResourceType::CloudTrail => "aws/cloudtrail",
        }
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resource a rule was evaluated against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resource {
    /// Resource category
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    /// Stable identifier (ARN, ID or account-unique name)
    pub name: String,
}

impl Resource {
    pub fn new(resource_type: ResourceType, name: impl Into<String>) -> Self {
        Self {
            resource_type,
            name: name.into(),
        }
    }

    /// Sentinel for the account root user
    pub fn root_account() -> Self {
        Self::new(ResourceType::IamUser, ROOT_ACCOUNT)
    }

    /// Sentinel for account-wide CloudTrail rules with no satisfying trail
    pub fn no_trail() -> Self {
        Self::new(ResourceType::CloudTrail, NOT_APPLICABLE)
    }
}

impl std::fmt::Display for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.name)
    }
}

/// Resource category a checker is responsible for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    Identity,
    Storage,
    Network,
    AuditTrail,
}

impl std::fmt::Display for Domain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Domain::Identity => write!(f, "identity"),
            Domain::Storage => write!(f, "storage"),
            Domain::Network => write!(f, "network"),
            Domain::AuditTrail => write!(f, "audit_trail"),
        }
    }
}

/// The fixed rule catalogue, in evaluation order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rule {
    ConsoleMfa,
    UnusedCredentials,
    RootMfa,
    RootAccessKeys,
    NoAdminPolicyStatements,
    NoUserPolicies,
    BucketEncryption,
    VpcFlowLogs,
    DefaultSecurityGroupNoRules,
    RestrictedSsh,
    TrailEncryption,
    MultiRegionTrail,
    LogFileValidation,
}

impl Rule {
    /// Every rule, in canonical report order
    pub const ALL: [Rule; 13] = [
        Rule::ConsoleMfa,
        Rule::UnusedCredentials,
        Rule::RootMfa,
        Rule::RootAccessKeys,
        Rule::NoAdminPolicyStatements,
        Rule::NoUserPolicies,
        Rule::BucketEncryption,
        Rule::VpcFlowLogs,
        Rule::DefaultSecurityGroupNoRules,
        Rule::RestrictedSsh,
        Rule::TrailEncryption,
        Rule::MultiRegionTrail,
        Rule::LogFileValidation,
    ];

    /// Checker domain that owns this rule
    pub fn domain(self) -> Domain {
        match self {
            Rule::ConsoleMfa
            | Rule::UnusedCredentials
            | Rule::RootMfa
            | Rule::RootAccessKeys
            | Rule::NoAdminPolicyStatements
            | Rule::NoUserPolicies => Domain::Identity,
            Rule::BucketEncryption => Domain::Storage,
            Rule::VpcFlowLogs | Rule::DefaultSecurityGroupNoRules | Rule::RestrictedSsh => {
                Domain::Network
            }
            Rule::TrailEncryption | Rule::MultiRegionTrail | Rule::LogFileValidation => {
                Domain::AuditTrail
            }
        }
    }

    /// Short machine identifier
    pub fn id(self) -> &'static str {
        match self {
            Rule::ConsoleMfa => "console-mfa",
            Rule::UnusedCredentials => "unused-credentials",
            Rule::RootMfa => "root-mfa",
            Rule::RootAccessKeys => "root-access-keys",
            Rule::NoAdminPolicyStatements => "no-admin-policy-statements",
            Rule::NoUserPolicies => "no-user-policies",
            Rule::BucketEncryption => "bucket-encryption",
            Rule::VpcFlowLogs => "vpc-flow-logs",
            Rule::DefaultSecurityGroupNoRules => "default-security-group-no-rules",
            Rule::RestrictedSsh => "restricted-ssh",
            Rule::TrailEncryption => "trail-encryption",
            Rule::MultiRegionTrail => "multi-region-trail",
            Rule::LogFileValidation => "log-file-validation",
        }
    }

    /// The rule statement carried in every verdict
    pub fn statement(self) -> &'static str {
        match self {
            Rule::ConsoleMfa => "IAM users with console access must have MFA enabled",
            Rule::UnusedCredentials => {
                "IAM users must not have credentials unused in the last 90 days"
            }
            Rule::RootMfa => "Root account must have MFA enabled",
            Rule::RootAccessKeys => "Root account must not have access keys",
            Rule::NoAdminPolicyStatements => {
                "IAM policies must not have statements with admin access"
            }
            Rule::NoUserPolicies => "IAM users must not have policies attached",
            Rule::BucketEncryption => "S3 buckets must be encrypted",
            Rule::VpcFlowLogs => "VPC flow logs must be enabled",
            Rule::DefaultSecurityGroupNoRules => {
                "VPC default security group must have no inbound or outbound rules"
            }
            Rule::RestrictedSsh => "SSH must not be accessible from 0.0.0.0/0 or ::/0",
            Rule::TrailEncryption => "CloudTrail must be encrypted",
            Rule::MultiRegionTrail => "CloudTrail must have multi-region trails enabled",
            Rule::LogFileValidation => "CloudTrail must have log file validation enabled",
        }
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Outcome of one rule against one resource
///
/// `reason` is non-empty exactly when the verdict is non-compliant. A passing
/// verdict may carry an informational `note` instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "VerdictRecord")]
pub struct Verdict {
    resource: Resource,
    rule: Rule,
    compliant: bool,
    reason: String,
    note: Option<String>,
}

impl Verdict {
    /// A compliant verdict
    pub fn pass(resource: Resource, rule: Rule) -> Self {
        Self {
            resource,
            rule,
            compliant: true,
            reason: String::new(),
            note: None,
        }
    }

    /// A non-compliant verdict. An empty reason is replaced with the rule
    /// statement so a failure never goes unexplained.
    pub fn fail(resource: Resource, rule: Rule, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.trim().is_empty() {
            reason = format!("Violates: {}", rule.statement());
        }

        Self {
            resource,
            rule,
            compliant: false,
            reason,
            note: None,
        }
    }

    /// Attach an informational note to a compliant verdict
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        if self.compliant {
            self.note = Some(note.into());
        }
        self
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    pub fn rule(&self) -> Rule {
        self.rule
    }

    pub fn statement(&self) -> &'static str {
        self.rule.statement()
    }

    pub fn is_compliant(&self) -> bool {
        self.compliant
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }
}

/// Flat wire shape of a verdict consumed by report renderers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerdictRecord {
    pub resource_type: ResourceType,
    pub resource_name: String,
    pub rule: String,
    pub compliant: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<Verdict> for VerdictRecord {
    fn from(verdict: Verdict) -> Self {
        Self {
            resource_type: verdict.resource.resource_type,
            resource_name: verdict.resource.name,
            rule: verdict.rule.statement().to_string(),
            compliant: verdict.compliant,
            reason: verdict.reason,
            note: verdict.note,
        }
    }
}

/// Terminal error of a scan
#[derive(Debug, Error)]
pub enum AuditError {
    /// An inventory call failed
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A policy document could not be decoded
    #[error(transparent)]
    PolicyParse(#[from] PolicyParseError),

    /// The scan exceeded its configured time limit
    #[error("Scan timed out after {0:?}")]
    TimedOut(Duration),

    /// The scan was cancelled by the caller
    #[error("Scan cancelled")]
    Cancelled,

    /// A checker was asked to evaluate a rule it does not own
    #[error("Rule {rule} is not evaluated by the {domain} checker")]
    RuleNotInDomain { rule: Rule, domain: Domain },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_present_iff_non_compliant() {
        let pass = Verdict::pass(Resource::root_account(), Rule::RootMfa);
        assert!(pass.is_compliant());
        assert!(pass.reason().is_empty());

        let fail = Verdict::fail(Resource::root_account(), Rule::RootMfa, "");
        assert!(!fail.is_compliant());
        assert_eq!(fail.reason(), "Violates: Root account must have MFA enabled");

        let blank = Verdict::fail(Resource::no_trail(), Rule::MultiRegionTrail, "   ");
        assert_eq!(
            blank.reason(),
            "Violates: CloudTrail must have multi-region trails enabled"
        );
    }

    #[test]
    fn test_note_only_on_compliant_verdicts() {
        let resource = Resource::new(ResourceType::IamUser, "arn:aws:iam::1:user/a");
        let pass = Verdict::pass(resource.clone(), Rule::ConsoleMfa).with_note("no console");
        assert_eq!(pass.note(), Some("no console"));
        assert!(pass.reason().is_empty());

        let fail = Verdict::fail(resource, Rule::ConsoleMfa, "no mfa").with_note("ignored");
        assert_eq!(fail.note(), None);
    }

    #[test]
    fn test_verdict_serializes_flat_record() {
        let verdict = Verdict::fail(
            Resource::new(ResourceType::S3Bucket, "logs"),
            Rule::BucketEncryption,
            "Bucket is not encrypted",
        );

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["resourceType"], "aws/s3-bucket");
        assert_eq!(json["resourceName"], "logs");
        assert_eq!(json["rule"], "S3 buckets must be encrypted");
        assert_eq!(json["compliant"], false);
        assert_eq!(json["reason"], "Bucket is not encrypted");
        assert!(json.get("note").is_none());
    }

    #[test]
    fn test_rule_catalogue_is_grouped_by_domain() {
        let domains: Vec<Domain> = Rule::ALL.iter().map(|r| r.domain()).collect();
        let mut deduped = domains.clone();
        deduped.dedup();
        assert_eq!(
            deduped,
            vec![
                Domain::Identity,
                Domain::Storage,
                Domain::Network,
                Domain::AuditTrail
            ]
        );
    }
}
