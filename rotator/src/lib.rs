pub mod cluster;
pub mod drain;
pub mod error;
pub mod group;
pub mod readiness;

use crate::error::Result;
use models::cloud::CloudGateway;
use models::job::{DrainOptions, SingleNodeDrainJob};
use models::kube_gateway::KubeGateway;
use snafu::ResultExt;
use tracing::{event, instrument, Level};

pub use cluster::rotate_cluster;

/// Executes an ad-hoc single-node drain, outside of any group rotation. Used by `POST
/// /api/drain` for operators who need to evacuate one node without running a full rotation.
#[instrument(skip(cloud, kube, job), fields(node_name = job.node_name.as_str()), err)]
pub async fn drain_single_node<C: CloudGateway, K: KubeGateway>(
    cloud: &C,
    kube: &K,
    job: &SingleNodeDrainJob,
) -> Result<()> {
    let drain_options = DrainOptions::new(job.grace_period, job.wait_between_pod_evictions);

    drain::drain_node(kube, &job.node_name, job.max_drain_retries, &drain_options)
        .await
        .context(error::DrainFailedSnafu {
            node_name: job.node_name.clone(),
            attempts: job.max_drain_retries.max(1),
        })?;

    if job.detach_node && !job.cluster_id.is_empty() {
        if let Some(group_name) = find_owning_group(cloud, &job.cluster_id, &job.node_name).await? {
            cloud
                .detach(&group_name, std::slice::from_ref(&job.node_name), true)
                .await
                .context(error::CloudSnafu {
                    group_name: group_name.clone(),
                })?;
        } else {
            event!(Level::WARN, node_name = job.node_name.as_str(), "detach requested but node is not a member of any group in this cluster");
        }
    }

    if job.terminate_node {
        cloud
            .terminate(std::slice::from_ref(&job.node_name))
            .await
            .context(error::CloudSnafu {
                group_name: job.cluster_id.clone(),
            })?;
        kube.delete_node(&job.node_name)
            .await
            .context(error::KubeSnafu {
                node_name: job.node_name.clone(),
            })?;
    }

    Ok(())
}

async fn find_owning_group<C: CloudGateway>(
    cloud: &C,
    cluster_id: &str,
    node_name: &str,
) -> Result<Option<String>> {
    let instance_id = cloud
        .resolve_instance_id(node_name)
        .await
        .context(error::CloudSnafu {
            group_name: cluster_id.to_string(),
        })?;

    let Some(instance_id) = instance_id else {
        return Ok(None);
    };

    let groups = cloud
        .list_groups(cluster_id)
        .await
        .context(error::CloudSnafu {
            group_name: cluster_id.to_string(),
        })?;

    Ok(groups
        .into_iter()
        .find(|group| group.instance_ids.contains(&instance_id))
        .map(|group| group.name))
}
