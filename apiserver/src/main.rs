use apiserver::api::{self, AppState};
use apiserver::error::{self, Result};
use clap::Parser;
use models::cloud::Ec2AutoscalingGateway;
use models::kube_gateway::KubeClientGateway;
use snafu::ResultExt;
use std::sync::Arc;
use tracing::{event, Level};
use tracing_subscriber::EnvFilter;

/// Runs the node rotation HTTP apiserver.
#[derive(Parser, Debug)]
#[clap(version, author)]
struct Args {
    /// Address to listen on, e.g. `0.0.0.0:8079`.
    #[clap(long, default_value_t = models::constants::DEFAULT_LISTEN_ADDR.to_string())]
    listen: String,

    /// Enables debug-level tracing output.
    #[clap(long)]
    debug: bool,
}

#[actix_web::main]
async fn main() {
    let args = Args::parse();
    init_tracing(args.debug);

    if let Err(error) = run_server(&args.listen).await {
        event!(Level::ERROR, %error, "apiserver exited with an error");
        std::process::exit(1);
    }
}

fn init_tracing(debug: bool) {
    let default_directive = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run_server(listen_addr: &str) -> Result<()> {
    let kube = KubeClientGateway::from_env()
        .await
        .context(error::ClientCreateSnafu)?;

    let aws_config = aws_config::load_from_env().await;
    let cloud = Ec2AutoscalingGateway::new(&aws_config);

    let state = AppState {
        cloud: Arc::new(cloud),
        kube: Arc::new(kube),
    };

    event!(Level::INFO, listen_addr, "starting node rotation apiserver");
    api::run_server(listen_addr, state).await
}
