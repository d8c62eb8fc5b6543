//! Abstracts the cloud provider's instance and autoscaling-group operations behind a trait, so
//! the rotation core can be driven against an in-memory fake in tests and a real AWS client in
//! production. Grounded on `original_source/aws/helpers.go` and `rotator/aws_helpers.go`.

use crate::error::{self, CloudError};
use async_trait::async_trait;
use aws_sdk_autoscaling::types::AutoScalingGroup;
use regex::Regex;
use snafu::{OptionExt, ResultExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{event, instrument, Level};

#[cfg(feature = "mocks")]
use mockall::mock;

/// A point-in-time snapshot of one autoscaling group: its name, desired capacity, and the
/// instance IDs it currently contains.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupHandle {
    pub name: String,
    pub desired_capacity: i32,
    pub instance_ids: Vec<String>,
}

#[async_trait]
pub trait CloudGateway: Clone + Send + Sync {
    /// Returns every autoscaling group belonging to `cluster_id`, by name substring or by the
    /// `KubernetesCluster`/`Name` tag convention, paginating until the provider stops returning
    /// a continuation token.
    async fn list_groups(&self, cluster_id: &str) -> Result<Vec<GroupHandle>, CloudError>;

    /// Returns the current desired capacity and instance list of the named group.
    async fn describe_group(&self, name: &str) -> Result<GroupHandle, CloudError>;

    /// Resolves each instance ID to its private DNS name, preserving input order.
    async fn resolve_hostnames(&self, instance_ids: &[String]) -> Result<Vec<String>, CloudError>;

    /// Looks up the instance backing a node hostname. Returns `Ok(None)` (not an error) when no
    /// matching instance exists -- callers treat that as "already gone".
    async fn resolve_instance_id(&self, hostname: &str) -> Result<Option<String>, CloudError>;

    /// Detaches instances from a group, decrementing its desired capacity only if requested.
    /// Accepts either instance IDs or hostnames per entry, resolving hostnames internally the
    /// same way [`CloudGateway::terminate`] does. Entries that no longer resolve to a member of
    /// the group are silently skipped.
    async fn detach(
        &self,
        group_name: &str,
        node_identifiers: &[String],
        decrement_desired: bool,
    ) -> Result<(), CloudError>;

    /// Terminates instances, accepting either an instance ID or a resolvable hostname per entry.
    async fn terminate(&self, identifiers: &[String]) -> Result<(), CloudError>;

    /// Polls until the named group's instance count matches `desired_capacity`, failing with a
    /// timeout once `deadline` elapses.
    async fn wait_group_converged(
        &self,
        name: &str,
        desired_capacity: i32,
        deadline: Duration,
    ) -> Result<GroupHandle, CloudError>;
}

#[async_trait]
impl<T> CloudGateway for Arc<T>
where
    T: CloudGateway,
{
    async fn list_groups(&self, cluster_id: &str) -> Result<Vec<GroupHandle>, CloudError> {
        (**self).list_groups(cluster_id).await
    }

    async fn describe_group(&self, name: &str) -> Result<GroupHandle, CloudError> {
        (**self).describe_group(name).await
    }

    async fn resolve_hostnames(&self, instance_ids: &[String]) -> Result<Vec<String>, CloudError> {
        (**self).resolve_hostnames(instance_ids).await
    }

    async fn resolve_instance_id(&self, hostname: &str) -> Result<Option<String>, CloudError> {
        (**self).resolve_instance_id(hostname).await
    }

    async fn detach(
        &self,
        group_name: &str,
        node_identifiers: &[String],
        decrement_desired: bool,
    ) -> Result<(), CloudError> {
        (**self)
            .detach(group_name, node_identifiers, decrement_desired)
            .await
    }

    async fn terminate(&self, identifiers: &[String]) -> Result<(), CloudError> {
        (**self).terminate(identifiers).await
    }

    async fn wait_group_converged(
        &self,
        name: &str,
        desired_capacity: i32,
        deadline: Duration,
    ) -> Result<GroupHandle, CloudError> {
        (**self)
            .wait_group_converged(name, desired_capacity, deadline)
            .await
    }
}

#[cfg(feature = "mocks")]
mock! {
    pub CloudGateway {}

    #[async_trait]
    impl CloudGateway for CloudGateway {
        async fn list_groups(&self, cluster_id: &str) -> Result<Vec<GroupHandle>, CloudError>;
        async fn describe_group(&self, name: &str) -> Result<GroupHandle, CloudError>;
        async fn resolve_hostnames(&self, instance_ids: &[String]) -> Result<Vec<String>, CloudError>;
        async fn resolve_instance_id(&self, hostname: &str) -> Result<Option<String>, CloudError>;
        async fn detach(
            &self,
            group_name: &str,
            node_identifiers: &[String],
            decrement_desired: bool,
        ) -> Result<(), CloudError>;
        async fn terminate(&self, identifiers: &[String]) -> Result<(), CloudError>;
        async fn wait_group_converged(
            &self,
            name: &str,
            desired_capacity: i32,
            deadline: Duration,
        ) -> Result<GroupHandle, CloudError>;
    }

    impl Clone for CloudGateway {
        fn clone(&self) -> Self;
    }
}

/// Matches a raw EC2 instance ID, e.g. `i-0123456789abcdef0`.
fn instance_id_pattern() -> Regex {
    Regex::new(r"^i-[0-9a-f]{8,17}$").expect("static regex is valid")
}

/// Matches the default EC2 private-DNS hostname shape, capturing the dash-encoded private IP.
fn private_dns_pattern() -> Regex {
    Regex::new(r"^ip-(\d+)-(\d+)-(\d+)-(\d+)\.ec2\.internal$").expect("static regex is valid")
}

/// Extracts the dotted private IP address embedded in an EC2 private-DNS hostname, if the
/// hostname matches that convention.
pub fn extract_private_ip(hostname: &str) -> Option<String> {
    let captures = private_dns_pattern().captures(hostname)?;
    Some(format!(
        "{}.{}.{}.{}",
        &captures[1], &captures[2], &captures[3], &captures[4]
    ))
}

/// Concrete [`CloudGateway`] backed by `aws-sdk-autoscaling` and `aws-sdk-ec2`.
#[derive(Clone)]
pub struct Ec2AutoscalingGateway {
    asg_client: aws_sdk_autoscaling::Client,
    ec2_client: aws_sdk_ec2::Client,
}

impl Ec2AutoscalingGateway {
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Ec2AutoscalingGateway {
            asg_client: aws_sdk_autoscaling::Client::new(config),
            ec2_client: aws_sdk_ec2::Client::new(config),
        }
    }

    fn group_matches(group: &AutoScalingGroup, cluster_id: &str) -> bool {
        let name_contains_cluster = group
            .auto_scaling_group_name()
            .map(|name| name.contains(cluster_id))
            .unwrap_or(false);
        if name_contains_cluster {
            return true;
        }

        group.tags().unwrap_or_default().iter().any(|tag| {
            let key = tag.key().unwrap_or_default();
            let value = tag.value().unwrap_or_default();
            (key == "KubernetesCluster" && value == format!("{}-kops.k8s.local", cluster_id))
                || (key == "Name" && value.contains(cluster_id))
        })
    }

    fn to_handle(group: &AutoScalingGroup) -> GroupHandle {
        GroupHandle {
            name: group.auto_scaling_group_name().unwrap_or_default().to_string(),
            desired_capacity: group.desired_capacity().unwrap_or_default(),
            instance_ids: group
                .instances()
                .unwrap_or_default()
                .iter()
                .filter_map(|instance| instance.instance_id().map(str::to_string))
                .collect(),
        }
    }

    #[instrument(skip(self), err)]
    async fn describe_instance_by_filter(
        &self,
        filter_name: &str,
        value: &str,
    ) -> Result<Option<String>, CloudError> {
        let resp = self
            .ec2_client
            .describe_instances()
            .filters(
                aws_sdk_ec2::types::Filter::builder()
                    .name(filter_name)
                    .values(value)
                    .build(),
            )
            .send()
            .await
            .map_err(Box::new)
            .map_err(|e| e as Box<dyn std::error::Error + Send + Sync>)
            .context(error::ProviderSnafu {
                action: format!("describe-instances by {}", filter_name),
            })?;

        let instance_id = resp
            .reservations()
            .unwrap_or_default()
            .iter()
            .flat_map(|reservation| reservation.instances().unwrap_or_default())
            .find_map(|instance| instance.instance_id().map(str::to_string));

        Ok(instance_id)
    }
}

#[async_trait]
impl CloudGateway for Ec2AutoscalingGateway {
    #[instrument(skip(self), err)]
    async fn list_groups(&self, cluster_id: &str) -> Result<Vec<GroupHandle>, CloudError> {
        let mut groups = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let resp = self
                .asg_client
                .describe_auto_scaling_groups()
                .set_next_token(next_token.clone())
                .send()
                .await
                .map_err(Box::new)
                .map_err(|e| e as Box<dyn std::error::Error + Send + Sync>)
                .context(error::ProviderSnafu {
                    action: "describe-auto-scaling-groups",
                })?;

            for group in resp.auto_scaling_groups().unwrap_or_default() {
                if Self::group_matches(group, cluster_id) {
                    groups.push(Self::to_handle(group));
                }
            }

            next_token = resp.next_token().map(str::to_string);
            if next_token.is_none() {
                break;
            }
        }

        Ok(groups)
    }

    #[instrument(skip(self), err)]
    async fn describe_group(&self, name: &str) -> Result<GroupHandle, CloudError> {
        let resp = self
            .asg_client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(name)
            .send()
            .await
            .map_err(Box::new)
            .map_err(|e| e as Box<dyn std::error::Error + Send + Sync>)
            .context(error::ProviderSnafu {
                action: "describe-auto-scaling-groups",
            })?;

        let group = resp
            .auto_scaling_groups()
            .unwrap_or_default()
            .first()
            .context(error::CloudNotFoundSnafu)?;

        Ok(Self::to_handle(group))
    }

    #[instrument(skip(self), err)]
    async fn resolve_hostnames(&self, instance_ids: &[String]) -> Result<Vec<String>, CloudError> {
        let mut hostnames = Vec::with_capacity(instance_ids.len());
        for instance_id in instance_ids {
            let resp = self
                .ec2_client
                .describe_instances()
                .instance_ids(instance_id)
                .send()
                .await
                .map_err(Box::new)
                .map_err(|e| e as Box<dyn std::error::Error + Send + Sync>)
                .context(error::ProviderSnafu {
                    action: "describe-instances",
                })?;

            let hostname = resp
                .reservations()
                .unwrap_or_default()
                .iter()
                .flat_map(|reservation| reservation.instances().unwrap_or_default())
                .find_map(|instance| instance.private_dns_name().map(str::to_string))
                .context(error::CloudNotFoundSnafu)?;

            hostnames.push(hostname);
        }
        Ok(hostnames)
    }

    #[instrument(skip(self), err)]
    async fn resolve_instance_id(&self, hostname: &str) -> Result<Option<String>, CloudError> {
        if let Some(id) = self
            .describe_instance_by_filter("private-dns-name", hostname)
            .await?
        {
            return Ok(Some(id));
        }

        // Alternate path: the hostname may be the `ip-<a>-<b>-<c>-<d>.ec2.internal` shape, in
        // which case we can still resolve it by its embedded private IP.
        if let Some(private_ip) = extract_private_ip(hostname) {
            return self
                .describe_instance_by_filter("private-ip-address", &private_ip)
                .await;
        }

        Ok(None)
    }

    #[instrument(skip(self), err)]
    async fn detach(
        &self,
        group_name: &str,
        node_identifiers: &[String],
        decrement_desired: bool,
    ) -> Result<(), CloudError> {
        let group = self.describe_group(group_name).await?;
        let id_pattern = instance_id_pattern();

        for identifier in node_identifiers {
            let instance_id = if id_pattern.is_match(identifier) {
                identifier.clone()
            } else {
                match self.resolve_instance_id(identifier).await? {
                    Some(id) => id,
                    None => {
                        event!(
                            Level::INFO,
                            identifier,
                            group_name,
                            "could not resolve instance, treating detach as already done"
                        );
                        continue;
                    }
                }
            };

            if !group.instance_ids.contains(&instance_id) {
                event!(
                    Level::INFO,
                    instance_id,
                    group_name,
                    "instance is no longer a member of the group, skipping detach"
                );
                continue;
            }

            event!(Level::INFO, instance_id, group_name, "detaching instance");
            self.asg_client
                .detach_instances()
                .auto_scaling_group_name(group_name)
                .instance_ids(&instance_id)
                .should_decrement_desired_capacity(decrement_desired)
                .send()
                .await
                .map_err(Box::new)
                .map_err(|e| e as Box<dyn std::error::Error + Send + Sync>)
                .context(error::ProviderSnafu {
                    action: format!("detach-instances {}", instance_id),
                })?;
        }

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn terminate(&self, identifiers: &[String]) -> Result<(), CloudError> {
        let id_pattern = instance_id_pattern();
        let dns_pattern = private_dns_pattern();

        for identifier in identifiers {
            let instance_id = if id_pattern.is_match(identifier) {
                Some(identifier.clone())
            } else if dns_pattern.is_match(identifier) {
                self.resolve_instance_id(identifier).await?
            } else {
                event!(
                    Level::WARN,
                    identifier,
                    "not an instance ID or a resolvable hostname, skipping terminate"
                );
                None
            };

            let Some(instance_id) = instance_id else {
                event!(Level::INFO, identifier, "instance already gone, treating terminate as success");
                continue;
            };

            event!(Level::INFO, instance_id, "terminating instance");
            self.ec2_client
                .terminate_instances()
                .instance_ids(&instance_id)
                .send()
                .await
                .map_err(Box::new)
                .map_err(|e| e as Box<dyn std::error::Error + Send + Sync>)
                .context(error::ProviderSnafu {
                    action: format!("terminate-instances {}", instance_id),
                })?;
        }

        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn wait_group_converged(
        &self,
        name: &str,
        desired_capacity: i32,
        deadline: Duration,
    ) -> Result<GroupHandle, CloudError> {
        let start = tokio::time::Instant::now();
        loop {
            let group = self.describe_group(name).await?;
            if group.instance_ids.len() as i32 == desired_capacity {
                return Ok(group);
            }

            if start.elapsed() >= deadline {
                return error::CloudTimeoutSnafu {
                    what: format!("autoscaling group {} to converge", name),
                    deadline,
                }
                .fail();
            }

            event!(Level::INFO, name, "autoscaling group not yet converged, waiting...");
            sleep(crate::constants::group_converge_poll()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_private_ip_from_ec2_internal_hostname() {
        assert_eq!(
            extract_private_ip("ip-10-0-1-5.ec2.internal"),
            Some("10.0.1.5".to_string())
        );
        assert_eq!(extract_private_ip("some-other-hostname"), None);
    }

    #[test]
    fn instance_id_pattern_matches_aws_ids() {
        let re = instance_id_pattern();
        assert!(re.is_match("i-0123456789abcdef0"));
        assert!(!re.is_match("ip-10-0-1-5.ec2.internal"));
    }
}
