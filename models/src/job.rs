//! The data model for one rotation or drain job.
//!
//! A [`RotationJob`] is constructed by the apiserver, owned exclusively by the background task
//! that executes it, and discarded at completion -- no rotation state is persisted across
//! restarts. [`AutoscalingGroupView`] is the mutable working copy a `GroupRotator` holds for the
//! duration of one group's rotation: `old_nodes` only ever shrinks.

use serde::{Deserialize, Serialize};

/// Parameters of one cluster rotation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RotationJob {
    pub cluster_id: String,
    #[serde(default = "default_max_scaling")]
    pub max_scaling: u32,
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

fn default_max_scaling() -> u32 {
    1
}

impl RotationJob {
    /// Validates the job the way the apiserver does before handing it to the background task.
    /// A non-empty `cluster_id` is the only hard requirement; everything else has a sane default.
    pub fn validate(&self) -> Result<(), String> {
        if self.cluster_id.trim().is_empty() {
            return Err("clusterID cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Parameters of an ad-hoc single-node drain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SingleNodeDrainJob {
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
    #[serde(default)]
    pub cluster_id: String,
}

impl SingleNodeDrainJob {
    pub fn validate(&self) -> Result<(), String> {
        if self.node_name.trim().is_empty() {
            return Err("nodeName cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Whether an autoscaling group hosts Kubernetes control-plane or data-plane nodes, determined
/// by whether its name contains the substring `master`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupClass {
    Master,
    Worker,
}

impl GroupClass {
    pub fn classify(group_name: &str) -> Self {
        if group_name.contains("master") {
            GroupClass::Master
        } else {
            GroupClass::Worker
        }
    }
}

/// Mutable working copy of one autoscaling group's rotation progress.
///
/// `old_nodes` is the ordered sequence of original node hostnames captured when the group was
/// first observed. Entries are removed as rotation advances and are never appended once rotation
/// has begun.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoscalingGroupView {
    pub name: String,
    pub desired_capacity: i32,
    pub old_nodes: Vec<String>,
}

impl AutoscalingGroupView {
    pub fn new(name: String, desired_capacity: i32, old_nodes: Vec<String>) -> Self {
        AutoscalingGroupView {
            name,
            desired_capacity,
            old_nodes,
        }
    }

    pub fn class(&self) -> GroupClass {
        GroupClass::classify(&self.name)
    }

    /// Removes every hostname in `popped` from `old_nodes`, preserving the remaining order.
    pub fn pop_nodes(&mut self, popped: &[String]) {
        self.old_nodes.retain(|node| !popped.contains(node));
    }

    /// Returns the first `min(batch_size, old_nodes.len())` hostnames, in order.
    pub fn next_batch(&self, batch_size: usize) -> Vec<String> {
        let len = self.old_nodes.len().min(batch_size.max(1));
        self.old_nodes[..len].to_vec()
    }

    /// Computes the corrected replacement set: elements of `new_instances` that are not present
    /// in the group's current `old_nodes`. This is a true set difference, unlike the
    /// nested-comparison computation in the original implementation which produced duplicates
    /// and could include old nodes themselves.
    pub fn new_nodes(&self, new_instances: &[String]) -> Vec<String> {
        new_instances
            .iter()
            .filter(|candidate| !self.old_nodes.contains(candidate))
            .cloned()
            .collect()
    }
}

/// Fixed-per-call options passed down into every drain.
#[derive(Debug, Clone, Copy)]
pub struct DrainOptions {
    pub delete_local_data: bool,
    pub ignore_daemonsets: bool,
    pub timeout_secs: u64,
    pub grace_period_seconds: u32,
    pub wait_between_pod_evictions_secs: u32,
}

impl DrainOptions {
    pub fn new(grace_period_seconds: u32, wait_between_pod_evictions_secs: u32) -> Self {
        DrainOptions {
            delete_local_data: true,
            ignore_daemonsets: true,
            timeout_secs: crate::constants::DRAIN_TIMEOUT_SECS,
            grace_period_seconds,
            wait_between_pod_evictions_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_groups_by_name_substring() {
        assert_eq!(GroupClass::classify("eng-master-asg"), GroupClass::Master);
        assert_eq!(GroupClass::classify("eng-worker-asg"), GroupClass::Worker);
    }

    #[test]
    fn pop_nodes_shrinks_old_nodes_monotonically() {
        let mut view = AutoscalingGroupView::new(
            "wrk-A".to_string(),
            2,
            vec!["h1".to_string(), "h2".to_string()],
        );
        view.pop_nodes(&["h1".to_string()]);
        assert_eq!(view.old_nodes, vec!["h2".to_string()]);
    }

    #[test]
    fn new_nodes_is_a_true_set_difference() {
        let view = AutoscalingGroupView::new(
            "wrk-A".to_string(),
            2,
            vec!["h1".to_string(), "h2".to_string()],
        );
        let replacements = view.new_nodes(&["h1".to_string(), "h2".to_string(), "h3".to_string()]);
        assert_eq!(replacements, vec!["h3".to_string()]);
    }

    #[test]
    fn next_batch_is_not_padded_when_fewer_nodes_remain() {
        let view = AutoscalingGroupView::new(
            "wrk-A".to_string(),
            2,
            vec!["h4".to_string(), "h5".to_string()],
        );
        assert_eq!(view.next_batch(3), vec!["h4".to_string(), "h5".to_string()]);
    }

    #[test]
    fn validate_rejects_empty_cluster_id() {
        let job = RotationJob {
            cluster_id: "  ".to_string(),
            max_scaling: 1,
            rotate_masters: false,
            rotate_workers: true,
            max_drain_retries: 0,
            evict_grace_period: 0,
            wait_between_rotations: 0,
            wait_between_pod_evictions: 0,
        };
        assert!(job.validate().is_err());
    }
}
