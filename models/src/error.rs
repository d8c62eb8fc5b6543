//! Error types returned by the [`crate::cloud::CloudGateway`] and
//! [`crate::kube_gateway::KubeGateway`] traits.
//!
//! These mirror the error kinds enumerated in the rotation controller's design: provider
//! failures are wrapped with call-site context, `NotFound` is a first-class variant so callers
//! can treat "already gone" as success, and `Throttled`/`Timeout` carry enough information for
//! the drain engine and readiness waiter to retry or report meaningfully.

use snafu::Snafu;
use std::time::Duration;

/// Errors returned by [`crate::cloud::CloudGateway`] operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CloudError {
    #[snafu(display("cloud provider call '{}' failed: {}", action, source))]
    Provider {
        action: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[snafu(display("timed out after {:.0}s waiting for {}", deadline.as_secs_f64(), what))]
    #[snafu(context(name(CloudTimeoutSnafu)))]
    Timeout { what: String, deadline: Duration },

    #[snafu(display("instance or autoscaling group not found"))]
    #[snafu(context(name(CloudNotFoundSnafu)))]
    NotFound,
}

impl CloudError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, CloudError::NotFound)
    }
}

/// Errors returned by [`crate::kube_gateway::KubeGateway`] operations.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum KubeError {
    #[snafu(display("kubernetes API call '{}' failed: {}", action, source))]
    Api {
        action: String,
        source: kube::Error,
    },

    #[snafu(display("timed out after {:.0}s waiting for {}", deadline.as_secs_f64(), what))]
    Timeout { what: String, deadline: Duration },

    #[snafu(display("node or pod not found"))]
    NotFound,

    #[snafu(display("eviction throttled by a disruption budget"))]
    Throttled,

    #[snafu(display("pod already gone"))]
    Gone,
}

impl KubeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::NotFound)
    }
}
