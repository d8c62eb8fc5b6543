//! Command-line client for the node rotation apiserver.
//!
//! `rotatorctl` never talks to Kubernetes or AWS directly: every subcommand posts a request to a
//! running apiserver and prints whatever it returns. The long-running apiserver process itself is
//! a separate binary (`apiserver`).

mod error;

use clap::{Parser, Subcommand};
use error::{Error, Result};
use models::constants::DEFAULT_SERVER_URL;
use models::{DrainNodeRequest, RotateClusterRequest};
use snafu::ResultExt;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[clap(version, author)]
struct Cli {
    /// Base URL of the apiserver to talk to.
    #[clap(long, global = true, default_value_t = DEFAULT_SERVER_URL.to_string())]
    server: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rotates the nodes of a cluster's autoscaling groups.
    Rotate {
        /// Identifier of the cluster to rotate.
        #[clap(long)]
        cluster: String,
        /// Maximum number of worker nodes to rotate concurrently in one group.
        #[clap(long)]
        max_scaling: Option<u32>,
        /// Rotates control-plane (master) groups.
        #[clap(long)]
        rotate_masters: bool,
        /// Rotates data-plane (worker) groups.
        #[clap(long)]
        rotate_workers: bool,
        /// Number of times to retry a node's drain before failing it.
        #[clap(long, default_value_t = 3)]
        max_drain_retries: u32,
        /// Grace period, in seconds, given to evicted pods.
        #[clap(long, default_value_t = 120)]
        evict_grace_period: u32,
        /// Seconds to wait between rotating successive worker batches.
        #[clap(long, default_value_t = 0)]
        wait_between_rotations: u32,
        /// Seconds to wait between evicting successive pods on one node.
        #[clap(long, default_value_t = 0)]
        wait_between_pod_evictions: u32,
    },
    /// Drains a single node outside of any group rotation.
    Drain {
        /// Hostname of the node to drain.
        #[clap(long)]
        node: String,
        /// Grace period, in seconds, given to evicted pods.
        #[clap(long, default_value_t = 120)]
        grace_period: u32,
        /// Number of times to retry the drain before failing it.
        #[clap(long, default_value_t = 3)]
        max_drain_retries: u32,
        /// Seconds to wait between evicting successive pods.
        #[clap(long, default_value_t = 0)]
        wait_between_pod_evictions: u32,
        /// Detaches the node from its autoscaling group after draining.
        #[clap(long)]
        detach: bool,
        /// Terminates the node's instance after draining.
        #[clap(long)]
        terminate: bool,
        /// Cluster the node belongs to. Required when `--detach` is set.
        #[clap(long, default_value = "")]
        cluster: String,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("rotatorctl: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Rotate {
            cluster,
            max_scaling,
            rotate_masters,
            rotate_workers,
            max_drain_retries,
            evict_grace_period,
            wait_between_rotations,
            wait_between_pod_evictions,
        } => {
            let request = RotateClusterRequest {
                cluster_id: cluster,
                max_scaling,
                rotate_masters,
                rotate_workers,
                max_drain_retries,
                evict_grace_period,
                wait_between_rotations,
                wait_between_pod_evictions,
            };
            post(&cli.server, "/api/rotate", &request)
        }
        Command::Drain {
            node,
            grace_period,
            max_drain_retries,
            wait_between_pod_evictions,
            detach,
            terminate,
            cluster,
        } => {
            let request = DrainNodeRequest {
                node_name: node,
                grace_period,
                max_drain_retries,
                wait_between_pod_evictions,
                detach_node: detach,
                terminate_node: terminate,
                cluster_id: cluster,
            };
            post(&cli.server, "/api/drain", &request)
        }
    }
}

/// Posts `body` to `{server}{path}` and pretty-prints the JSON response. Any non-2xx status is
/// surfaced as an error containing the response body, since the apiserver puts a human-readable
/// message there.
fn post<T: serde::Serialize>(server: &str, path: &str, body: &T) -> Result<()> {
    let url = format!("{}{}", server, path);
    let client = reqwest::blocking::Client::new();

    let response = client
        .post(&url)
        .json(body)
        .send()
        .context(error::RequestSnafu { url: url.clone() })?;

    let status = response.status();
    let text = response.text().context(error::RequestSnafu { url: url.clone() })?;

    if !status.is_success() {
        return Err(Error::ServerError {
            status: status.as_u16(),
            message: text,
        });
    }

    match serde_json::from_str::<serde_json::Value>(&text) {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value).unwrap_or(text)),
        Err(_) => println!("{}", text),
    }

    Ok(())
}
