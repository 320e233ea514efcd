//! Identity Checker
//!
//! IAM credential hygiene: console MFA, stale access keys, root account
//! credentials, admin-granting managed policies and policies attached
//! directly to users.
//!
//! A user without a console password passes the console MFA rule with an
//! empty `reason`; the text "User does not have console access" is carried
//! in the verdict's `note` (the `note` field of the serialized record), since
//! a non-empty reason marks a failure.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info};

use super::{not_in_domain, Checker, ScanContext};
use crate::audit::policy::PolicyDocument;
use crate::audit::providers::{PolicyScope, ResourceProvider, User};
use crate::audit::types::{AuditError, Domain, Resource, ResourceType, Rule, Verdict};

const RULES: &[Rule] = &[
    Rule::ConsoleMfa,
    Rule::UnusedCredentials,
    Rule::RootMfa,
    Rule::RootAccessKeys,
    Rule::NoAdminPolicyStatements,
    Rule::NoUserPolicies,
];

/// Note on users that cannot sign in to the console
pub const NO_CONSOLE_ACCESS: &str = "User does not have console access";

pub struct IdentityChecker {
    scan: ScanContext,
}

impl IdentityChecker {
    pub fn new(scan: ScanContext) -> Self {
        Self { scan }
    }

    fn provider(&self) -> &dyn ResourceProvider {
        self.scan.provider.as_ref()
    }

    /// Users with a console password must have an MFA device. Users without
    /// one trivially satisfy the rule.
    async fn check_console_mfa(&self) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::ConsoleMfa;
        let users = self.provider().list_users().await?;
        let mut verdicts = Vec::with_capacity(users.len());

        for user in &users {
            let resource = user_arn(user);

            if self.provider().get_login_profile(&user.name).await?.is_none() {
                verdicts.push(Verdict::pass(resource, rule).with_note(NO_CONSOLE_ACCESS));
                continue;
            }

            let devices = self.provider().list_mfa_devices(&user.name).await?;
            if devices.is_empty() {
                verdicts.push(Verdict::fail(resource, rule, "User does not have MFA enabled"));
            } else {
                verdicts.push(Verdict::pass(resource, rule));
            }
        }

        Ok(verdicts)
    }

    /// One verdict per active access key; inactive keys are skipped
    async fn check_unused_credentials(&self) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::UnusedCredentials;
        let days = self.scan.config.stale_credential_days;
        let now = self.scan.evaluated_at;

        let users = self.provider().list_users().await?;
        let mut verdicts = Vec::new();

        for user in &users {
            let keys = self.provider().list_access_keys(&user.name).await?;

            for key in keys.iter().filter(|k| k.is_active()) {
                let last_used = self.provider().get_access_key_last_used(&key.id).await?;

                match last_used {
                    Some(used_at) if is_stale(used_at, days, now) => {
                        debug!(user = %user.name, key = %key.id, last_used = %used_at, "Stale access key");
                        verdicts.push(Verdict::fail(
                            user_arn(user),
                            rule,
                            format!("User has credentials unused for more than {days} days"),
                        ));
                    }
                    _ => verdicts.push(Verdict::pass(user_arn(user), rule)),
                }
            }
        }

        Ok(verdicts)
    }

    async fn check_root_mfa(&self) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::RootMfa;
        let summary = self.provider().get_account_summary().await?;

        let verdict = if summary.account_mfa_enabled == 0 {
            Verdict::fail(Resource::root_account(), rule, "Root account does not have MFA enabled")
        } else {
            Verdict::pass(Resource::root_account(), rule)
        };
        Ok(vec![verdict])
    }

    async fn check_root_access_keys(&self) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::RootAccessKeys;
        let summary = self.provider().get_account_summary().await?;

        let verdict = if summary.account_access_keys_present != 0 {
            Verdict::fail(Resource::root_account(), rule, "Root account has access keys")
        } else {
            Verdict::pass(Resource::root_account(), rule)
        };
        Ok(vec![verdict])
    }

    /// Customer-managed policies must not allow `*` on `*`. The first admin
    /// statement decides the policy; later statements are not inspected.
    async fn check_admin_policy_statements(&self) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::NoAdminPolicyStatements;
        let matching = self.scan.config.wildcard_matching;

        let policies = self.provider().list_policies(PolicyScope::Local).await?;
        let mut verdicts = Vec::with_capacity(policies.len());

        for policy in &policies {
            let encoded = self
                .provider()
                .get_policy_version(&policy.arn, &policy.default_version_id)
                .await?;
            let document = PolicyDocument::from_encoded(&policy.arn, &encoded)?;
            let resource = Resource::new(ResourceType::IamPolicy, &policy.arn);

            match document.admin_statement(matching) {
                Some(statement) => {
                    debug!(policy = %policy.arn, sid = ?statement.sid, "Admin statement found");
                    verdicts.push(Verdict::fail(
                        resource,
                        rule,
                        "Policy has statement with admin access",
                    ));
                }
                None => verdicts.push(Verdict::pass(resource, rule)),
            }
        }

        Ok(verdicts)
    }

    /// Inline policies take precedence; attached policies are only listed
    /// for users without inline ones.
    async fn check_no_user_policies(&self) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::NoUserPolicies;
        let users = self.provider().list_users().await?;
        let mut verdicts = Vec::with_capacity(users.len());

        for user in &users {
            let resource = Resource::new(ResourceType::IamUser, &user.name);

            if !self.provider().list_user_policies(&user.name).await?.is_empty() {
                verdicts.push(Verdict::fail(resource, rule, "User has inline policies attached"));
                continue;
            }

            if !self
                .provider()
                .list_attached_user_policies(&user.name)
                .await?
                .is_empty()
            {
                verdicts.push(Verdict::fail(resource, rule, "User has managed policies attached"));
                continue;
            }

            verdicts.push(Verdict::pass(resource, rule));
        }

        Ok(verdicts)
    }
}

/// Whether a key last used at `used_at` has been idle for more than `days`.
/// A window past the representable date range never expires.
fn is_stale(used_at: DateTime<Utc>, days: u32, now: DateTime<Utc>) -> bool {
    TimeDelta::try_days(i64::from(days))
        .and_then(|window| used_at.checked_add_signed(window))
        .is_some_and(|deadline| deadline < now)
}

fn user_arn(user: &User) -> Resource {
    Resource::new(ResourceType::IamUser, &user.arn)
}

#[async_trait]
impl Checker for IdentityChecker {
    fn domain(&self) -> Domain {
        Domain::Identity
    }

    fn rules(&self) -> &'static [Rule] {
        RULES
    }

    async fn evaluate(&self, rule: Rule) -> Result<Vec<Verdict>, AuditError> {
        let verdicts = match rule {
            Rule::ConsoleMfa => self.check_console_mfa().await?,
            Rule::UnusedCredentials => self.check_unused_credentials().await?,
            Rule::RootMfa => self.check_root_mfa().await?,
            Rule::RootAccessKeys => self.check_root_access_keys().await?,
            Rule::NoAdminPolicyStatements => self.check_admin_policy_statements().await?,
            Rule::NoUserPolicies => self.check_no_user_policies().await?,
            other => return Err(not_in_domain(other, Domain::Identity)),
        };

        info!(rule = %rule, verdicts = verdicts.len(), "Identity rule complete");
        Ok(verdicts)
    }
}
