//! Drives one autoscaling group through rotation, dispatching to the master or worker strategy
//! by [`GroupClass`]. Both strategies shrink `AutoscalingGroupView::old_nodes` to empty and end
//! with a final convergence and readiness check over the whole group.

use crate::error::{self, Result};
use crate::{drain, readiness};
use models::cloud::CloudGateway;
use models::job::{AutoscalingGroupView, DrainOptions, GroupClass};
use models::kube_gateway::KubeGateway;
use snafu::ResultExt;
use tokio::time::sleep;
use tracing::{event, instrument, Level};

/// Rotates one autoscaling group to completion, choosing the master or worker strategy by the
/// group's class.
#[instrument(skip(cloud, kube, view, drain_options), fields(group = view.name.as_str()), err)]
pub async fn rotate_group<C: CloudGateway, K: KubeGateway>(
    cloud: &C,
    kube: &K,
    view: &mut AutoscalingGroupView,
    drain_options: &DrainOptions,
    max_drain_retries: u32,
    max_scaling: u32,
    wait_between_rotations: u32,
) -> Result<()> {
    match view.class() {
        GroupClass::Master => {
            rotate_master(cloud, kube, view, drain_options, max_drain_retries).await?
        }
        GroupClass::Worker => {
            rotate_worker(
                cloud,
                kube,
                view,
                drain_options,
                max_drain_retries,
                max_scaling,
                wait_between_rotations,
            )
            .await?
        }
    }

    final_check(cloud, kube, view).await
}

async fn rotate_master<C: CloudGateway, K: KubeGateway>(
    cloud: &C,
    kube: &K,
    view: &mut AutoscalingGroupView,
    drain_options: &DrainOptions,
    max_drain_retries: u32,
) -> Result<()> {
    while !view.old_nodes.is_empty() {
        let victim = view.old_nodes[0].clone();
        event!(Level::INFO, node = victim.as_str(), "rotating master node");

        drain::drain_node(kube, &victim, max_drain_retries, drain_options)
            .await
            .context(error::DrainFailedSnafu {
                node_name: victim.clone(),
                attempts: max_drain_retries.max(1),
            })?;

        cloud
            .detach(&view.name, std::slice::from_ref(&victim), false)
            .await
            .context(error::CloudSnafu {
                group_name: view.name.clone(),
            })?;

        cloud
            .terminate(std::slice::from_ref(&victim))
            .await
            .context(error::CloudSnafu {
                group_name: view.name.clone(),
            })?;

        event!(Level::INFO, "sleeping for the group to start its replacement");
        sleep(models::constants::group_rebalance_pause()).await;

        let g = cloud
            .wait_group_converged(&view.name, view.desired_capacity, models::constants::group_converge_deadline())
            .await
            .context(error::CloudSnafu {
                group_name: view.name.clone(),
            })?;
        let instances = cloud
            .resolve_hostnames(&g.instance_ids)
            .await
            .context(error::CloudSnafu {
                group_name: view.name.clone(),
            })?;
        let replacements = view.new_nodes(&instances);

        readiness::wait_nodes_ready(cloud, kube, &replacements).await?;

        view.pop_nodes(std::slice::from_ref(&victim));
    }

    Ok(())
}

async fn rotate_worker<C: CloudGateway, K: KubeGateway>(
    cloud: &C,
    kube: &K,
    view: &mut AutoscalingGroupView,
    drain_options: &DrainOptions,
    max_drain_retries: u32,
    max_scaling: u32,
    wait_between_rotations: u32,
) -> Result<()> {
    while !view.old_nodes.is_empty() {
        let batch = view.next_batch(max_scaling as usize);
        event!(Level::INFO, batch_size = batch.len(), "rotating worker batch");

        cloud
            .detach(&view.name, &batch, false)
            .await
            .context(error::CloudSnafu {
                group_name: view.name.clone(),
            })?;

        event!(Level::INFO, "sleeping for the group to start its replacement");
        sleep(models::constants::group_rebalance_pause()).await;

        let g = cloud
            .wait_group_converged(&view.name, view.desired_capacity, models::constants::group_converge_deadline())
            .await
            .context(error::CloudSnafu {
                group_name: view.name.clone(),
            })?;
        let instances = cloud
            .resolve_hostnames(&g.instance_ids)
            .await
            .context(error::CloudSnafu {
                group_name: view.name.clone(),
            })?;
        let replacements = view.new_nodes(&instances);

        readiness::wait_nodes_ready(cloud, kube, &replacements).await?;

        for victim in &batch {
            drain::drain_node(kube, victim, max_drain_retries, drain_options)
                .await
                .context(error::DrainFailedSnafu {
                    node_name: victim.clone(),
                    attempts: max_drain_retries.max(1),
                })?;
        }

        cloud
            .terminate(&batch)
            .await
            .context(error::CloudSnafu {
                group_name: view.name.clone(),
            })?;

        for victim in &batch {
            kube.delete_node(victim).await.context(error::KubeSnafu {
                node_name: victim.clone(),
            })?;
        }

        view.pop_nodes(&batch);

        if !view.old_nodes.is_empty() && wait_between_rotations > 0 {
            event!(Level::INFO, wait_between_rotations, "waiting before next rotation batch");
            sleep(std::time::Duration::from_secs(wait_between_rotations as u64)).await;
        }
    }

    Ok(())
}

async fn final_check<C: CloudGateway, K: KubeGateway>(
    cloud: &C,
    kube: &K,
    view: &AutoscalingGroupView,
) -> Result<()> {
    readiness::wait_group_ready(cloud, kube, &view.name, view.desired_capacity).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
    use models::cloud::{GroupHandle, MockCloudGateway};
    use models::kube_gateway::MockKubeGateway;

    fn drain_options() -> DrainOptions {
        DrainOptions::new(0, 0)
    }

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

    fn handle(name: &str, desired: i32, instances: Vec<&str>) -> GroupHandle {
        GroupHandle {
            name: name.to_string(),
            desired_capacity: desired,
            instance_ids: instances.into_iter().map(str::to_string).collect(),
        }
    }

    /// S1 from the test scenario catalog: single worker group, max_scaling=1, two old nodes.
    #[tokio::test(start_paused = true)]
    async fn single_worker_group_rotates_one_node_at_a_time() {
        let mut cloud = MockCloudGateway::new();
        let mut kube = MockKubeGateway::new();

        cloud
            .expect_detach()
            .times(2)
            .returning(|_, _, decrement| {
                assert!(!decrement);
                Ok(())
            });
        cloud
            .expect_wait_group_converged()
            .times(2)
            .returning(|name, desired, _| Ok(handle(name, desired, vec!["i1p", "i2"])));
        cloud
            .expect_resolve_hostnames()
            .times(2)
            .returning(|ids| Ok(ids.iter().map(|i| format!("host-{}", i)).collect()));
        cloud.expect_terminate().times(2).returning(|_| Ok(()));

        kube.expect_cordon().returning(|_| Ok(()));
        kube.expect_list_evictable_pods().returning(|_| Ok(vec![]));
        kube.expect_get_node().returning(|_| Ok(ready_node()));
        kube.expect_delete_node().times(2).returning(|_| Ok(()));

        let mut view = AutoscalingGroupView::new(
            "wrk-A".to_string(),
            2,
            vec!["h1".to_string(), "h2".to_string()],
        );

        let result = rotate_worker(&cloud, &kube, &mut view, &drain_options(), 0, 1, 0).await;
        assert!(result.is_ok());
        assert!(view.old_nodes.is_empty());
    }

    /// S3 from the test scenario catalog: a short final batch is not padded to max_scaling.
    #[tokio::test(start_paused = true)]
    async fn final_worker_batch_is_not_padded() {
        let mut cloud = MockCloudGateway::new();
        let mut kube = MockKubeGateway::new();

        cloud.expect_detach().times(1).returning(|_, batch, _| {
            assert_eq!(batch.len(), 2);
            Ok(())
        });
        cloud
            .expect_wait_group_converged()
            .returning(|name, desired, _| Ok(handle(name, desired, vec!["i4p", "i5p"])));
        cloud
            .expect_resolve_hostnames()
            .returning(|ids| Ok(ids.iter().map(|i| format!("host-{}", i)).collect()));
        cloud.expect_terminate().returning(|_| Ok(()));

        kube.expect_cordon().returning(|_| Ok(()));
        kube.expect_list_evictable_pods().returning(|_| Ok(vec![]));
        kube.expect_get_node().returning(|_| Ok(ready_node()));
        kube.expect_delete_node().returning(|_| Ok(()));

        let mut view = AutoscalingGroupView::new(
            "wrk-A".to_string(),
            2,
            vec!["h4".to_string(), "h5".to_string()],
        );

        let result = rotate_worker(&cloud, &kube, &mut view, &drain_options(), 0, 3, 0).await;
        assert!(result.is_ok());
        assert!(view.old_nodes.is_empty());
    }

    /// S2 from the test scenario catalog: master group drains and terminates one node at a time,
    /// with no inter-rotation pause.
    #[tokio::test(start_paused = true)]
    async fn master_group_rotates_sequentially() {
        let mut cloud = MockCloudGateway::new();
        let mut kube = MockKubeGateway::new();

        cloud.expect_detach().times(3).returning(|_, batch, decrement| {
            assert_eq!(batch.len(), 1);
            assert!(!decrement);
            Ok(())
        });
        cloud
            .expect_wait_group_converged()
            .times(3)
            .returning(|name, desired, _| Ok(handle(name, desired, vec!["ip"])));
        cloud
            .expect_resolve_hostnames()
            .times(3)
            .returning(|ids| Ok(ids.iter().map(|i| format!("host-{}", i)).collect()));
        cloud.expect_terminate().times(3).returning(|_| Ok(()));

        kube.expect_cordon().returning(|_| Ok(()));
        kube.expect_list_evictable_pods().returning(|_| Ok(vec![]));
        kube.expect_get_node().returning(|_| Ok(ready_node()));

        let mut view = AutoscalingGroupView::new(
            "mst-A".to_string(),
            3,
            vec!["h1".to_string(), "h2".to_string(), "h3".to_string()],
        );

        let result = rotate_master(&cloud, &kube, &mut view, &drain_options(), 0).await;
        assert!(result.is_ok());
        assert!(view.old_nodes.is_empty());
    }
}
