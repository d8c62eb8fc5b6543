//! Shared constants for the node rotation service.

use std::time::Duration;

/// Base path under which every HTTP route of the apiserver is registered.
pub const API_BASE_PATH: &str = "/api";

/// Route used for the apiserver's liveness/readiness check.
pub const HEALTH_CHECK_ROUTE: &str = "/ping";

/// Default listen address for the `server` subcommand.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8079";

/// Default base URL the CLI talks to when `--server` is not given.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8079";

/// Deadline for an autoscaling group to converge on its desired capacity.
pub const GROUP_CONVERGE_DEADLINE_SECS: u64 = 300;
/// Poll interval while waiting for group convergence.
pub const GROUP_CONVERGE_POLL_SECS: u64 = 5;

/// Deadline for a single node to report Ready.
pub const NODE_READY_DEADLINE_SECS: u64 = 600;
/// Poll interval while waiting for node readiness.
pub const NODE_READY_POLL_SECS: u64 = 20;

/// Deadline for a single node's drain, including all retry-local waits.
pub const DRAIN_TIMEOUT_SECS: u64 = 600;
/// Backoff applied after a throttled eviction before retrying it.
pub const EVICTION_THROTTLE_BACKOFF_SECS: u64 = 5;

/// Fixed pause after detach/terminate to let the autoscaling group begin replacing instances.
pub const GROUP_REBALANCE_PAUSE_SECS: u64 = 60;

/// Deadline actix-web is given to finish in-flight requests on shutdown.
pub const GRACEFUL_SHUTDOWN_SECS: u64 = 15;

pub fn group_converge_deadline() -> Duration {
    Duration::from_secs(GROUP_CONVERGE_DEADLINE_SECS)
}

pub fn group_converge_poll() -> Duration {
    Duration::from_secs(GROUP_CONVERGE_POLL_SECS)
}

pub fn node_ready_deadline() -> Duration {
    Duration::from_secs(NODE_READY_DEADLINE_SECS)
}

pub fn node_ready_poll() -> Duration {
    Duration::from_secs(NODE_READY_POLL_SECS)
}

pub fn eviction_throttle_backoff() -> Duration {
    Duration::from_secs(EVICTION_THROTTLE_BACKOFF_SECS)
}

pub fn group_rebalance_pause() -> Duration {
    Duration::from_secs(GROUP_REBALANCE_PAUSE_SECS)
}
