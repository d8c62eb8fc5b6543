pub mod cloud;
pub mod constants;
pub mod error;
pub mod job;
pub mod kube_gateway;

use serde::{Deserialize, Serialize};

/// Request body of `POST /api/rotate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateClusterRequest {
    #[serde(rename = "clusterID")]
    pub cluster_id: String,
    #[serde(default)]
    pub max_scaling: Option<u32>,
    #[serde(default)]
    pub rotate_masters: bool,
    #[serde(default)]
    pub rotate_workers: bool,
    #[serde(default)]
    pub max_drain_retries: u32,
    #[serde(default)]
    pub evict_grace_period: u32,
    #[serde(default)]
    pub wait_between_rotations: u32,
    #[serde(default)]
    pub wait_between_pod_evictions: u32,
}

impl From<RotateClusterRequest> for job::RotationJob {
    fn from(request: RotateClusterRequest) -> Self {
        job::RotationJob {
            cluster_id: request.cluster_id,
            max_scaling: request.max_scaling.unwrap_or(1),
            rotate_masters: request.rotate_masters,
            rotate_workers: request.rotate_workers,
            max_drain_retries: request.max_drain_retries,
            evict_grace_period: request.evict_grace_period,
            wait_between_rotations: request.wait_between_rotations,
            wait_between_pod_evictions: request.wait_between_pod_evictions,
        }
    }
}

/// Request body of `POST /api/drain`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainNodeRequest {
    pub node_name: String,
    #[serde(default)]
    pub grace_period: u32,
    #[serde(default)]
    pub max_drain_retries: u32,
    #[serde(default)]
    pub wait_between_pod_evictions: u32,
    #[serde(default)]
    pub detach_node: bool,
    #[serde(default)]
    pub terminate_node: bool,
    #[serde(default, rename = "clusterID")]
    pub cluster_id: String,
}

impl From<DrainNodeRequest> for job::SingleNodeDrainJob {
    fn from(request: DrainNodeRequest) -> Self {
        job::SingleNodeDrainJob {
            node_name: request.node_name,
            grace_period: request.grace_period,
            max_drain_retries: request.max_drain_retries,
            wait_between_pod_evictions: request.wait_between_pod_evictions,
            detach_node: request.detach_node,
            terminate_node: request.terminate_node,
            cluster_id: request.cluster_id,
        }
    }
}
