//! Waits for a cloud autoscaling group and the Kubernetes nodes backing it to converge after a
//! scaling change: first the group's instance count catches up to its desired capacity, then
//! each new node reports Ready. The two waits are sequential, since node readiness can only be
//! checked once the replacement instances actually exist.

use crate::error::{self, Result};
use models::cloud::CloudGateway;
use models::error::KubeError;
use models::kube_gateway::{node_is_ready, KubeGateway};
use snafu::ResultExt;
use tokio::time::sleep;
use tracing::{event, instrument, Level};

/// Waits for `group_name` to reach `desired_capacity`, then resolves the resulting instances to
/// hostnames and waits for each to report Ready. Returns the full set of hostnames in the
/// converged group.
#[instrument(skip(cloud, kube), err)]
pub async fn wait_group_ready<C: CloudGateway, K: KubeGateway>(
    cloud: &C,
    kube: &K,
    group_name: &str,
    desired_capacity: i32,
) -> Result<Vec<String>> {
    let group = cloud
        .wait_group_converged(
            group_name,
            desired_capacity,
            models::constants::group_converge_deadline(),
        )
        .await
        .context(error::CloudSnafu {
            group_name: group_name.to_string(),
        })?;

    let hostnames = cloud
        .resolve_hostnames(&group.instance_ids)
        .await
        .context(error::CloudSnafu {
            group_name: group_name.to_string(),
        })?;

    wait_nodes_ready(cloud, kube, &hostnames).await?;

    Ok(hostnames)
}

/// Waits for every hostname in `node_names` to report Ready, one at a time, matching the
/// sequential wait used for the rest of the rotation pipeline.
#[instrument(skip(cloud, kube), err)]
pub async fn wait_nodes_ready<C: CloudGateway, K: KubeGateway>(
    cloud: &C,
    kube: &K,
    node_names: &[String],
) -> Result<()> {
    for node_name in node_names {
        event!(Level::INFO, node_name, "waiting for node to become ready");
        wait_one_node_ready(cloud, kube, node_name).await?;
    }
    Ok(())
}

/// Polls a single node until it reports Ready. A replacement instance can register with the API
/// server under its instance ID before the cloud provider's DNS record for its hostname exists,
/// so the first time the hostname is not found, this falls back to the instance ID derived from
/// the hostname's embedded private IP and polls that instead for the rest of the wait.
async fn wait_one_node_ready<C: CloudGateway, K: KubeGateway>(
    cloud: &C,
    kube: &K,
    node_name: &str,
) -> Result<()> {
    let deadline = models::constants::node_ready_deadline();
    let start = tokio::time::Instant::now();
    let mut lookup_name = node_name.to_string();
    let mut fell_back = false;

    loop {
        let ready = match kube.get_node(&lookup_name).await {
            Ok(node) => node_is_ready(&node),
            Err(KubeError::NotFound) if !fell_back => {
                fell_back = true;
                let resolved = cloud
                    .resolve_instance_id(node_name)
                    .await
                    .context(error::CloudSnafu {
                        group_name: node_name.to_string(),
                    })?;
                match resolved {
                    Some(instance_id) => {
                        event!(
                            Level::INFO,
                            node_name,
                            instance_id,
                            "node not found by hostname, retrying by instance id"
                        );
                        lookup_name = instance_id;
                    }
                    None => event!(Level::INFO, node_name, "node not found yet, waiting..."),
                }
                false
            }
            Err(KubeError::NotFound) => {
                event!(Level::INFO, node_name = lookup_name.as_str(), "node not found yet, waiting...");
                false
            }
            Err(e) => {
                return Err(e).context(error::KubeSnafu {
                    node_name: node_name.to_string(),
                })
            }
        };

        if ready {
            return Ok(());
        }

        if start.elapsed() >= deadline {
            return models::error::TimeoutSnafu {
                what: format!("node {} to become ready", node_name),
                deadline,
            }
            .fail::<()>()
            .context(error::KubeSnafu {
                node_name: node_name.to_string(),
            });
        }

        event!(Level::INFO, node_name = lookup_name.as_str(), "node not yet ready, waiting...");
        sleep(models::constants::node_ready_poll()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
    use models::cloud::MockCloudGateway;
    use models::kube_gateway::MockKubeGateway;

    fn ready_node() -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    reason: Some("KubeletReady".to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// S6 from the test scenario catalog: a replacement instance registers under its instance ID
    /// before its `ip-10-0-1-5.ec2.internal`-style hostname resolves, so the wait falls back once.
    #[tokio::test(start_paused = true)]
    async fn falls_back_to_instance_id_when_hostname_is_not_found() {
        let mut cloud = MockCloudGateway::new();
        let mut kube = MockKubeGateway::new();

        kube.expect_get_node()
            .withf(|name| name == "ip-10-0-1-5.ec2.internal")
            .returning(|_| models::error::NotFoundSnafu.fail());
        kube.expect_get_node()
            .withf(|name| name == "i-abc")
            .returning(|_| Ok(ready_node()));

        cloud
            .expect_resolve_instance_id()
            .withf(|hostname| hostname == "ip-10-0-1-5.ec2.internal")
            .returning(|_| Ok(Some("i-abc".to_string())));

        let result = wait_one_node_ready(&cloud, &kube, "ip-10-0-1-5.ec2.internal").await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn returns_ready_immediately_when_hostname_resolves() {
        let cloud = MockCloudGateway::new();
        let mut kube = MockKubeGateway::new();

        kube.expect_get_node()
            .withf(|name| name == "host-a")
            .returning(|_| Ok(ready_node()));

        let result = wait_one_node_ready(&cloud, &kube, "host-a").await;
        assert!(result.is_ok());
    }
}
