//! Enumerates the autoscaling groups of one cluster and dispatches each to [`crate::group`],
//! sequentially. Groups share the same Kubernetes control plane, so no per-group parallelism is
//! introduced here: concurrent drains across groups would contend on the same API server and
//! make failures harder to attribute to a specific group.

use crate::error::{self, Result};
use crate::group;
use models::cloud::CloudGateway;
use models::job::{AutoscalingGroupView, DrainOptions, GroupClass, RotationJob};
use models::kube_gateway::KubeGateway;
use snafu::ResultExt;
use tracing::{event, instrument, Level};

/// Executes a full cluster rotation: lists the cluster's autoscaling groups, classifies each as
/// master or worker, and rotates the ones the job opted into, one at a time and in the order the
/// provider returned them.
#[instrument(skip(cloud, kube, job), fields(cluster_id = job.cluster_id.as_str()), err)]
pub async fn rotate_cluster<C: CloudGateway, K: KubeGateway>(
    cloud: &C,
    kube: &K,
    job: &RotationJob,
) -> Result<()> {
    let groups = cloud
        .list_groups(&job.cluster_id)
        .await
        .context(error::CloudSnafu {
            group_name: job.cluster_id.clone(),
        })?;

    event!(Level::INFO, cluster_id = job.cluster_id.as_str(), group_count = groups.len(), "enumerated autoscaling groups");

    let drain_options = DrainOptions::new(job.evict_grace_period, job.wait_between_pod_evictions);

    for handle in groups {
        let old_hostnames = cloud
            .resolve_hostnames(&handle.instance_ids)
            .await
            .context(error::CloudSnafu {
                group_name: handle.name.clone(),
            })?;
        let mut view =
            AutoscalingGroupView::new(handle.name.clone(), handle.desired_capacity, old_hostnames);

        let should_rotate = match view.class() {
            GroupClass::Master => job.rotate_masters,
            GroupClass::Worker => job.rotate_workers,
        };

        if !should_rotate {
            event!(Level::INFO, group = view.name.as_str(), "skipping group, toggle disabled");
            continue;
        }

        let class = view.class();
        event!(Level::INFO, group = view.name.as_str(), ?class, "rotating group");

        group::rotate_group(
            cloud,
            kube,
            &mut view,
            &drain_options,
            job.max_drain_retries,
            job.max_scaling,
            job.wait_between_rotations,
        )
        .await?;

        event!(Level::INFO, group = view.name.as_str(), "group rotated successfully");
    }

    event!(Level::INFO, cluster_id = job.cluster_id.as_str(), "cluster rotation complete");
    Ok(())
}
