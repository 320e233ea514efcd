//! Network Checker
//!
//! Every rule enumerates the VPCs of each region through a region-bound
//! context. Regions run concurrently up to the configured bound; within a
//! region VPCs are visited in listing order.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{not_in_domain, Checker, ScanContext};
use crate::audit::providers::{
    IpPermission, RegionContext, ResourceProvider, SecurityGroup, SecurityGroupFilter,
};
use crate::audit::regions::fan_out_regions;
use crate::audit::types::{AuditError, Domain, Resource, ResourceType, Rule, Verdict};

const RULES: &[Rule] = &[
    Rule::VpcFlowLogs,
    Rule::DefaultSecurityGroupNoRules,
    Rule::RestrictedSsh,
];

const SSH_PORT: i64 = 22;
const ANY_IPV4: &str = "0.0.0.0/0";
const ANY_IPV6: &str = "::/0";
const DEFAULT_GROUP_NAME: &str = "default";

/// Why an inbound rule exposes SSH to the internet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SshExposure {
    Ipv4,
    Ipv6,
}

impl SshExposure {
    fn reason(self) -> &'static str {
        match self {
            SshExposure::Ipv4 => "SSH is accessible from all IPv4 Addresses",
            SshExposure::Ipv6 => "SSH is accessible from all IPv6 Addresses",
        }
    }

    /// IPv4 sources of a permission are inspected before its IPv6 sources
    fn of(permission: &IpPermission) -> Option<Self> {
        if !permission.is_tcp() || !permission.covers_port(SSH_PORT) {
            return None;
        }
        if permission.ipv4_ranges.iter().any(|cidr| cidr == ANY_IPV4) {
            return Some(SshExposure::Ipv4);
        }
        if permission.ipv6_ranges.iter().any(|cidr| cidr == ANY_IPV6) {
            return Some(SshExposure::Ipv6);
        }
        None
    }

    /// First disqualifying inbound rule of a group
    fn first_in(group: &SecurityGroup) -> Option<Self> {
        group.ingress.iter().find_map(Self::of)
    }
}

pub struct NetworkChecker {
    scan: ScanContext,
}

impl NetworkChecker {
    pub fn new(scan: ScanContext) -> Self {
        Self { scan }
    }

    fn provider(&self) -> &dyn ResourceProvider {
        self.scan.provider.as_ref()
    }

    async fn flow_logs_in(&self, ctx: RegionContext) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::VpcFlowLogs;
        let vpcs = self.provider().describe_vpcs(&ctx).await?;
        let mut verdicts = Vec::with_capacity(vpcs.len());

        for vpc in vpcs {
            let flow_logs = self.provider().describe_flow_logs(&ctx, &vpc.id).await?;
            let resource = Resource::new(ResourceType::Vpc, vpc.id);

            if flow_logs.is_empty() {
                verdicts.push(Verdict::fail(resource, rule, "VPC flow logs are not enabled"));
            } else {
                verdicts.push(Verdict::pass(resource, rule));
            }
        }

        debug!(region = %ctx, verdicts = verdicts.len(), "Flow logs evaluated");
        Ok(verdicts)
    }

    async fn default_groups_in(&self, ctx: RegionContext) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::DefaultSecurityGroupNoRules;
        let vpcs = self.provider().describe_vpcs(&ctx).await?;
        let mut verdicts = Vec::new();

        for vpc in vpcs {
            let filter = SecurityGroupFilter::in_vpc(&vpc.id).named(DEFAULT_GROUP_NAME);
            let groups = self.provider().describe_security_groups(&ctx, &filter).await?;

            verdicts.extend(groups.into_iter().map(|group| {
                let compliant = group.has_no_rules();
                let resource = Resource::new(ResourceType::SecurityGroup, group.id);
                if compliant {
                    Verdict::pass(resource, rule)
                } else {
                    Verdict::fail(
                        resource,
                        rule,
                        "Default security group has inbound or outbound rules",
                    )
                }
            }));
        }

        debug!(region = %ctx, verdicts = verdicts.len(), "Default security groups evaluated");
        Ok(verdicts)
    }

    async fn ssh_exposure_in(&self, ctx: RegionContext) -> Result<Vec<Verdict>, AuditError> {
        let rule = Rule::RestrictedSsh;
        let vpcs = self.provider().describe_vpcs(&ctx).await?;
        let mut verdicts = Vec::new();

        for vpc in vpcs {
            let groups = self
                .provider()
                .describe_security_groups(&ctx, &SecurityGroupFilter::in_vpc(&vpc.id))
                .await?;

            for group in groups {
                let exposure = SshExposure::first_in(&group);
                let resource = Resource::new(ResourceType::SecurityGroup, group.id);
                verdicts.push(match exposure {
                    Some(exposure) => Verdict::fail(resource, rule, exposure.reason()),
                    None => Verdict::pass(resource, rule),
                });
            }
        }

        debug!(region = %ctx, verdicts = verdicts.len(), "SSH exposure evaluated");
        Ok(verdicts)
    }
}

#[async_trait]
impl Checker for NetworkChecker {
    fn domain(&self) -> Domain {
        Domain::Network
    }

    fn rules(&self) -> &'static [Rule] {
        RULES
    }

    async fn evaluate(&self, rule: Rule) -> Result<Vec<Verdict>, AuditError> {
        let regions = &self.scan.regions;
        let concurrency = self.scan.concurrency();

        let verdicts = match rule {
            Rule::VpcFlowLogs => {
                fan_out_regions(regions, concurrency, |ctx| self.flow_logs_in(ctx)).await?
            }
            Rule::DefaultSecurityGroupNoRules => {
                fan_out_regions(regions, concurrency, |ctx| self.default_groups_in(ctx)).await?
            }
            Rule::RestrictedSsh => {
                fan_out_regions(regions, concurrency, |ctx| self.ssh_exposure_in(ctx)).await?
            }
            other => return Err(not_in_domain(other, Domain::Network)),
        };

        info!(rule = %rule, regions = regions.len(), verdicts = verdicts.len(), "Network rule complete");
        Ok(verdicts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::checkers::testing::{scan_over, snapshot};
    use crate::audit::providers::Operation;
    use crate::audit::snapshot::SnapshotProvider;
    use std::sync::Arc;

    fn tcp(from: i64, to: i64, v4: &[&str], v6: &[&str]) -> IpPermission {
        IpPermission {
            protocol: "tcp".to_string(),
            from_port: Some(from),
            to_port: Some(to),
            ipv4_ranges: v4.iter().map(|s| s.to_string()).collect(),
            ipv6_ranges: v6.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn group(ingress: Vec<IpPermission>) -> SecurityGroup {
        SecurityGroup {
            id: "sg-1".to_string(),
            name: "web".to_string(),
            vpc_id: "vpc-1".to_string(),
            ingress,
            egress: vec![],
        }
    }

    const TWO_REGIONS: &str = r#"{
        "regions": ["us-east-1", "eu-west-1"],
        "regional": {
            "us-east-1": {
                "vpcs": [{"id": "vpc-a", "is_default": true}, {"id": "vpc-b"}],
                "flow_logs": [{"id": "fl-1", "resource_id": "vpc-b"}],
                "security_groups": [
                    {"id": "sg-a-default", "name": "default", "vpc_id": "vpc-a"},
                    {"id": "sg-a-web", "name": "web", "vpc_id": "vpc-a", "ingress": [
                        {"protocol": "tcp", "from_port": 20, "to_port": 25, "ipv4_ranges": ["0.0.0.0/0"]}
                    ]},
                    {"id": "sg-b-default", "name": "default", "vpc_id": "vpc-b",
                     "egress": [{"protocol": "-1", "ipv4_ranges": ["0.0.0.0/0"]}]}
                ]
            },
            "eu-west-1": {
                "vpcs": [{"id": "vpc-c"}],
                "security_groups": [
                    {"id": "sg-c-bastion", "name": "bastion", "vpc_id": "vpc-c", "ingress": [
                        {"protocol": "tcp", "from_port": 23, "to_port": 25, "ipv4_ranges": ["0.0.0.0/0"]},
                        {"protocol": "tcp", "from_port": 22, "to_port": 22, "ipv6_ranges": ["::/0"]}
                    ]}
                ]
            }
        }
    }"#;

    #[test]
    fn test_ssh_port_range() {
        assert_eq!(
            SshExposure::first_in(&group(vec![tcp(20, 25, &[ANY_IPV4], &[])])),
            Some(SshExposure::Ipv4)
        );
        assert_eq!(SshExposure::first_in(&group(vec![tcp(23, 25, &[ANY_IPV4], &[])])), None);
    }

    #[test]
    fn test_ssh_requires_tcp_and_any_address() {
        let mut udp = tcp(22, 22, &[ANY_IPV4], &[]);
        udp.protocol = "udp".to_string();
        assert_eq!(SshExposure::first_in(&group(vec![udp])), None);

        let narrow = tcp(22, 22, &["10.0.0.0/8"], &["2001:db8::/32"]);
        assert_eq!(SshExposure::first_in(&group(vec![narrow])), None);
    }

    #[test]
    fn test_ssh_first_disqualifying_rule_wins() {
        let both = tcp(22, 22, &[ANY_IPV4], &[ANY_IPV6]);
        assert_eq!(SshExposure::first_in(&group(vec![both])), Some(SshExposure::Ipv4));

        let v6_first = vec![tcp(0, 65535, &[], &[ANY_IPV6]), tcp(22, 22, &[ANY_IPV4], &[])];
        assert_eq!(SshExposure::first_in(&group(v6_first)), Some(SshExposure::Ipv6));
    }

    #[tokio::test]
    async fn test_rules_grouped_by_rule_then_region() {
        let checker =
            NetworkChecker::new(scan_over(snapshot(TWO_REGIONS), &["us-east-1", "eu-west-1"]));

        let verdicts = checker.check().await.unwrap();
        let summary: Vec<(Rule, &str, &str)> = verdicts
            .iter()
            .map(|v| (v.rule(), v.resource().name.as_str(), v.reason()))
            .collect();

        assert_eq!(
            summary,
            vec![
                (Rule::VpcFlowLogs, "vpc-a", "VPC flow logs are not enabled"),
                (Rule::VpcFlowLogs, "vpc-b", ""),
                (Rule::VpcFlowLogs, "vpc-c", "VPC flow logs are not enabled"),
                (Rule::DefaultSecurityGroupNoRules, "sg-a-default", ""),
                (
                    Rule::DefaultSecurityGroupNoRules,
                    "sg-b-default",
                    "Default security group has inbound or outbound rules"
                ),
                (Rule::RestrictedSsh, "sg-a-default", ""),
                (Rule::RestrictedSsh, "sg-a-web", "SSH is accessible from all IPv4 Addresses"),
                (Rule::RestrictedSsh, "sg-b-default", ""),
                (Rule::RestrictedSsh, "sg-c-bastion", "SSH is accessible from all IPv6 Addresses"),
            ]
        );
    }

    #[tokio::test]
    async fn test_region_without_vpcs_yields_nothing() {
        let checker = NetworkChecker::new(scan_over(
            snapshot(r#"{"regions": ["us-east-1", "sa-east-1"]}"#),
            &["us-east-1", "sa-east-1"],
        ));
        assert!(checker.check().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_regional_failure_aborts_rule() {
        let provider = Arc::new(
            SnapshotProvider::from_json(TWO_REGIONS)
                .unwrap()
                .fail_on(Operation::DescribeVpcs, "eu-west-1"),
        );
        let checker = NetworkChecker::new(scan_over(provider, &["us-east-1", "eu-west-1"]));

        let err = checker.evaluate(Rule::VpcFlowLogs).await.unwrap_err();
        match err {
            AuditError::Provider(e) => {
                assert_eq!(e.operation, Operation::DescribeVpcs);
                assert_eq!(e.region.as_deref(), Some("eu-west-1"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
