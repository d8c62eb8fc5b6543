//! Abstracts the Kubernetes node and pod operations behind a trait, the same way
//! [`crate::cloud::CloudGateway`] abstracts the cloud provider. Grounded on
//! `original_source/k8s/helpers.go` and `original_source/rotator/kube_helpers.go`.

use crate::error::{self, KubeError};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{EvictParams, ListParams, Patch, PatchParams};
use kube::{Api, ResourceExt};
use reqwest::StatusCode;
use snafu::ResultExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{event, instrument, Level};

#[cfg(feature = "mocks")]
use mockall::mock;

#[async_trait]
pub trait KubeGateway: Clone + Send + Sync {
    /// Fetches a node by hostname. Returns [`KubeError::NotFound`] if it no longer exists.
    async fn get_node(&self, node_name: &str) -> Result<Node, KubeError>;

    /// Deletes the node object. Missing nodes are treated as already deleted.
    async fn delete_node(&self, node_name: &str) -> Result<(), KubeError>;

    /// Marks a node unschedulable without evicting anything already running on it.
    async fn cordon(&self, node_name: &str) -> Result<(), KubeError>;

    /// Clears a node's unschedulable mark.
    async fn uncordon(&self, node_name: &str) -> Result<(), KubeError>;

    /// Lists the pods targeted for eviction on a node: excludes DaemonSet members, static mirror
    /// pods, and pods that have already completed.
    async fn list_evictable_pods(&self, node_name: &str) -> Result<Vec<Pod>, KubeError>;

    /// Creates an eviction for one pod. A `429` (too many requests) response surfaces as
    /// [`KubeError::Throttled`] rather than an immediate failure, so the drain engine can retry
    /// with its own backoff.
    async fn evict_pod(&self, pod: &Pod, grace_period_seconds: u32) -> Result<(), KubeError>;

    /// Blocks until the named pod is gone, or `deadline` elapses.
    async fn wait_pod_deleted(&self, pod: &Pod, deadline: Duration) -> Result<(), KubeError>;

    /// Polls until the node reports a `Ready` condition of `True`, or `deadline` elapses.
    async fn wait_node_ready(&self, node_name: &str, deadline: Duration) -> Result<(), KubeError>;
}

#[async_trait]
impl<T> KubeGateway for Arc<T>
where
    T: KubeGateway,
{
    async fn get_node(&self, node_name: &str) -> Result<Node, KubeError> {
        (**self).get_node(node_name).await
    }

    async fn delete_node(&self, node_name: &str) -> Result<(), KubeError> {
        (**self).delete_node(node_name).await
    }

    async fn cordon(&self, node_name: &str) -> Result<(), KubeError> {
        (**self).cordon(node_name).await
    }

    async fn uncordon(&self, node_name: &str) -> Result<(), KubeError> {
        (**self).uncordon(node_name).await
    }

    async fn list_evictable_pods(&self, node_name: &str) -> Result<Vec<Pod>, KubeError> {
        (**self).list_evictable_pods(node_name).await
    }

    async fn evict_pod(&self, pod: &Pod, grace_period_seconds: u32) -> Result<(), KubeError> {
        (**self).evict_pod(pod, grace_period_seconds).await
    }

    async fn wait_pod_deleted(&self, pod: &Pod, deadline: Duration) -> Result<(), KubeError> {
        (**self).wait_pod_deleted(pod, deadline).await
    }

    async fn wait_node_ready(&self, node_name: &str, deadline: Duration) -> Result<(), KubeError> {
        (**self).wait_node_ready(node_name, deadline).await
    }
}

#[cfg(feature = "mocks")]
mock! {
    pub KubeGateway {}

    #[async_trait]
    impl KubeGateway for KubeGateway {
        async fn get_node(&self, node_name: &str) -> Result<Node, KubeError>;
        async fn delete_node(&self, node_name: &str) -> Result<(), KubeError>;
        async fn cordon(&self, node_name: &str) -> Result<(), KubeError>;
        async fn uncordon(&self, node_name: &str) -> Result<(), KubeError>;
        async fn list_evictable_pods(&self, node_name: &str) -> Result<Vec<Pod>, KubeError>;
        async fn evict_pod(&self, pod: &Pod, grace_period_seconds: u32) -> Result<(), KubeError>;
        async fn wait_pod_deleted(&self, pod: &Pod, deadline: Duration) -> Result<(), KubeError>;
        async fn wait_node_ready(&self, node_name: &str, deadline: Duration) -> Result<(), KubeError>;
    }

    impl Clone for KubeGateway {
        fn clone(&self) -> Self;
    }
}

/// Filters the pods found on a node down to the ones a drain should evict: DaemonSet members and
/// static mirror pods are left in place, since the DaemonSet controller ignores cordons and
/// mirror pods cannot be controlled through the API at all. Completed pods are also left alone;
/// there is nothing left on them to evict.
fn is_evictable(pod: &Pod) -> bool {
    if let Some(status) = pod.status.as_ref() {
        if let Some(phase) = status.phase.as_ref() {
            if phase == "Failed" || phase == "Succeeded" {
                return false;
            }
        }
    }

    if let Some(owner_references) = pod.metadata.owner_references.as_ref() {
        if owner_references
            .iter()
            .any(|reference| reference.controller == Some(true) && reference.kind == "DaemonSet")
        {
            event!(
                Level::INFO,
                pod = pod.name_any().as_str(),
                "skipping pod: member of a DaemonSet"
            );
            return false;
        }
    }

    if let Some(annotations) = pod.metadata.annotations.as_ref() {
        if annotations.contains_key("kubernetes.io/config.mirror") {
            event!(
                Level::INFO,
                pod = pod.name_any().as_str(),
                "skipping pod: static mirror pod"
            );
            return false;
        }
    }

    true
}

fn namespaced_pod_api(client: &kube::Client, pod: &Pod) -> Api<Pod> {
    Api::namespaced(client.clone(), &pod.namespace().unwrap_or_default())
}

/// Returns whether a node object reports a `KubeletReady` condition of `True`.
pub fn node_is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .and_then(|conditions| conditions.iter().find(|c| c.reason.as_deref() == Some("KubeletReady")))
        .map(|condition| condition.status == "True")
        .unwrap_or(false)
}

/// Concrete [`KubeGateway`] backed by a live `kube::Client`.
#[derive(Clone)]
pub struct KubeClientGateway {
    client: kube::Client,
}

impl KubeClientGateway {
    pub fn new(client: kube::Client) -> Self {
        KubeClientGateway { client }
    }

    /// Resolves `kube::Client::try_default`, which reads `$KUBECONFIG`, falls back to
    /// `$HOME/.kube/config`, and finally falls back to in-cluster config.
    pub async fn from_env() -> Result<Self, KubeError> {
        let client = kube::Client::try_default()
            .await
            .context(error::ApiSnafu { action: "build client" })?;
        Ok(KubeClientGateway::new(client))
    }

    fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    fn pods(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    async fn patch_unschedulable(&self, node_name: &str, unschedulable: bool) -> Result<(), KubeError> {
        let patch = serde_json::json!({ "spec": { "unschedulable": unschedulable } });
        self.nodes()
            .patch(
                node_name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
            .map(|_| ())
            .or_else(|e| if is_not_found(&e) { Ok(()) } else { Err(e) })
            .context(error::ApiSnafu {
                action: if unschedulable { "cordon" } else { "uncordon" },
            })
    }
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(response) if response.code == 404)
}

#[async_trait]
impl KubeGateway for KubeClientGateway {
    #[instrument(skip(self), err)]
    async fn get_node(&self, node_name: &str) -> Result<Node, KubeError> {
        match self.nodes().get(node_name).await {
            Ok(node) => Ok(node),
            Err(e) if is_not_found(&e) => error::NotFoundSnafu.fail(),
            Err(e) => Err(e).context(error::ApiSnafu { action: "get node" }),
        }
    }

    #[instrument(skip(self), err)]
    async fn delete_node(&self, node_name: &str) -> Result<(), KubeError> {
        match self.nodes().delete(node_name, &Default::default()).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e).context(error::ApiSnafu { action: "delete node" }),
        }
    }

    #[instrument(skip(self), err)]
    async fn cordon(&self, node_name: &str) -> Result<(), KubeError> {
        self.patch_unschedulable(node_name, true).await
    }

    #[instrument(skip(self), err)]
    async fn uncordon(&self, node_name: &str) -> Result<(), KubeError> {
        self.patch_unschedulable(node_name, false).await
    }

    #[instrument(skip(self), err)]
    async fn list_evictable_pods(&self, node_name: &str) -> Result<Vec<Pod>, KubeError> {
        let pods = self
            .pods()
            .list(&ListParams {
                field_selector: Some(format!("spec.nodeName={}", node_name)),
                ..Default::default()
            })
            .await
            .context(error::ApiSnafu { action: "list pods" })?;

        Ok(pods.into_iter().filter(is_evictable).collect())
    }

    #[instrument(skip(self, pod), fields(pod = pod.name_any().as_str()), err)]
    async fn evict_pod(&self, pod: &Pod, grace_period_seconds: u32) -> Result<(), KubeError> {
        let pod_api = namespaced_pod_api(&self.client, pod);
        let eviction = pod_api
            .evict(
                &pod.name_any(),
                &EvictParams {
                    delete_options: Some(kube::api::DeleteParams {
                        grace_period_seconds: Some(grace_period_seconds),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await;

        match eviction {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) => match StatusCode::from_u16(e.code as u16) {
                Ok(StatusCode::TOO_MANY_REQUESTS) => error::ThrottledSnafu.fail(),
                Ok(StatusCode::NOT_FOUND) => error::GoneSnafu.fail(),
                _ => Err(kube::Error::Api(e)).context(error::ApiSnafu { action: "evict pod" }),
            },
            Err(e) => Err(e).context(error::ApiSnafu { action: "evict pod" }),
        }
    }

    #[instrument(skip(self, pod), fields(pod = pod.name_any().as_str()), err)]
    async fn wait_pod_deleted(&self, pod: &Pod, deadline: Duration) -> Result<(), KubeError> {
        let pod_api = namespaced_pod_api(&self.client, pod);
        let start = tokio::time::Instant::now();

        loop {
            match pod_api.get(&pod.name_any()).await {
                Err(e) if is_not_found(&e) => return Ok(()),
                Ok(_) => {}
                Err(e) => {
                    event!(Level::WARN, pod = pod.name_any().as_str(), error = %e, "could not check pod deletion, will retry");
                }
            }

            if start.elapsed() >= deadline {
                return error::TimeoutSnafu {
                    what: format!("pod {} to be deleted", pod.name_any()),
                    deadline,
                }
                .fail();
            }

            sleep(crate::constants::eviction_throttle_backoff()).await;
        }
    }

    #[instrument(skip(self), err)]
    async fn wait_node_ready(&self, node_name: &str, deadline: Duration) -> Result<(), KubeError> {
        let start = tokio::time::Instant::now();

        loop {
            let ready = match self.get_node(node_name).await {
                Ok(node) => node_is_ready(&node),
                Err(KubeError::NotFound) => {
                    event!(Level::INFO, node_name, "node not found yet, waiting...");
                    false
                }
                Err(e) => return Err(e),
            };

            if ready {
                return Ok(());
            }

            if start.elapsed() >= deadline {
                return error::TimeoutSnafu {
                    what: format!("node {} to become ready", node_name),
                    deadline,
                }
                .fail();
            }

            event!(Level::INFO, node_name, "node not yet ready, waiting...");
            sleep(crate::constants::node_ready_poll()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;

    fn daemonset_owned_pod() -> Pod {
        let mut pod = Pod::default();
        pod.metadata.owner_references = Some(vec![OwnerReference {
            controller: Some(true),
            kind: "DaemonSet".to_string(),
            ..Default::default()
        }]);
        pod
    }

    #[test]
    fn filters_out_daemonset_pods() {
        assert!(!is_evictable(&daemonset_owned_pod()));
    }

    #[test]
    fn filters_out_mirror_pods() {
        let mut pod = Pod::default();
        pod.metadata.annotations = Some(
            [("kubernetes.io/config.mirror".to_string(), "hash".to_string())]
                .into_iter()
                .collect(),
        );
        assert!(!is_evictable(&pod));
    }

    #[test]
    fn evicts_ordinary_pods() {
        assert!(is_evictable(&Pod::default()));
    }
}
