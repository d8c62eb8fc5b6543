//! Job-level errors produced while executing a rotation or drain job.
//!
//! These wrap the lower-level [`models::error::CloudError`] and [`models::error::KubeError`]
//! with the context of which node or group was being acted on, plus a `DrainFailed` variant for
//! when a node exhausts its retry budget without draining cleanly.

use models::error::{CloudError, KubeError};
use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility = "pub")]
pub enum Error {
    #[snafu(display("cloud operation on group '{}' failed: {}", group_name, source))]
    Cloud {
        group_name: String,
        source: CloudError,
    },

    #[snafu(display("kubernetes operation on node '{}' failed: {}", node_name, source))]
    Kube {
        node_name: String,
        source: KubeError,
    },

    #[snafu(display(
        "node '{}' failed to drain after {} attempt(s): {}",
        node_name,
        attempts,
        source
    ))]
    DrainFailed {
        node_name: String,
        attempts: u32,
        source: KubeError,
    },

    #[snafu(display("rotation request failed validation: {}", reason))]
    Validation { reason: String },
}
