//! The node rotation apiserver. Two endpoints accept rotation and single-node-drain requests,
//! validate them, and spawn a background task to run the job -- the request itself only waits
//! long enough to construct and validate the job, then responds `202 Accepted` with the
//! normalized parameters. There is no job handle or status endpoint: rotations are expected to
//! be operator-supervised via logs.

use crate::error::{self, Result};
use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use models::cloud::CloudGateway;
use models::job::{RotationJob, SingleNodeDrainJob};
use models::kube_gateway::KubeGateway;
use models::{DrainNodeRequest, RotateClusterRequest};
use snafu::ResultExt;
use tracing::{event, Level};

/// Shared state handed to every route via actix's application-data system.
#[derive(Clone)]
pub struct AppState<C: CloudGateway, K: KubeGateway> {
    pub cloud: C,
    pub kube: K,
}

async fn rotate<C: 'static + CloudGateway, K: 'static + KubeGateway>(
    state: web::Data<AppState<C, K>>,
    body: web::Json<RotateClusterRequest>,
) -> Result<impl Responder> {
    let job: RotationJob = body.into_inner().into();
    job.validate()
        .map_err(|reason| error::Error::Validation { reason })?;

    event!(Level::INFO, cluster_id = job.cluster_id.as_str(), "accepted rotation job");

    let cloud = state.cloud.clone();
    let kube = state.kube.clone();
    let spawned_job = job.clone();
    tokio::spawn(async move {
        if let Err(e) = rotator::rotate_cluster(&cloud, &kube, &spawned_job).await {
            event!(Level::ERROR, cluster_id = spawned_job.cluster_id.as_str(), error = %e, "rotation job failed");
        }
    });

    Ok(HttpResponse::Accepted().json(job))
}

async fn drain<C: 'static + CloudGateway, K: 'static + KubeGateway>(
    state: web::Data<AppState<C, K>>,
    body: web::Json<DrainNodeRequest>,
) -> Result<impl Responder> {
    let job: SingleNodeDrainJob = body.into_inner().into();
    job.validate()
        .map_err(|reason| error::Error::Validation { reason })?;

    event!(Level::INFO, node_name = job.node_name.as_str(), "accepted drain job");

    let cloud = state.cloud.clone();
    let kube = state.kube.clone();
    let spawned_job = job.clone();
    tokio::spawn(async move {
        if let Err(e) = rotator::drain_single_node(&cloud, &kube, &spawned_job).await {
            event!(Level::ERROR, node_name = spawned_job.node_name.as_str(), error = %e, "drain job failed");
        }
    });

    Ok(HttpResponse::Accepted().json(job))
}

async fn health_check() -> impl Responder {
    HttpResponse::Ok().body("pong")
}

/// Runs the apiserver on `listen_addr` until a `Ctrl-C` signal is received, then stops accepting
/// new connections and gives in-flight requests up to [`models::constants::GRACEFUL_SHUTDOWN_SECS`]
/// to finish before returning.
pub async fn run_server<C, K>(listen_addr: &str, state: AppState<C, K>) -> Result<()>
where
    C: 'static + CloudGateway,
    K: 'static + KubeGateway,
{
    let data = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .service(
                web::resource(format!("{}/rotate", models::constants::API_BASE_PATH))
                    .route(web::post().to(rotate::<C, K>)),
            )
            .service(
                web::resource(format!("{}/drain", models::constants::API_BASE_PATH))
                    .route(web::post().to(drain::<C, K>)),
            )
            .route(models::constants::HEALTH_CHECK_ROUTE, web::get().to(health_check))
    })
    .shutdown_timeout(models::constants::GRACEFUL_SHUTDOWN_SECS)
    .bind(listen_addr)
    .context(error::HttpServerSnafu)?
    .run();

    let handle = server.handle();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        event!(Level::INFO, "received shutdown signal, stopping server gracefully");
        handle.stop(true).await;
    });

    server.await.context(error::HttpServerSnafu)
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};
    use models::cloud::MockCloudGateway;
    use models::kube_gateway::MockKubeGateway;
    use std::sync::Arc;

    fn test_state() -> AppState<Arc<MockCloudGateway>, Arc<MockKubeGateway>> {
        AppState {
            cloud: Arc::new(MockCloudGateway::new()),
            kube: Arc::new(MockKubeGateway::new()),
        }
    }

    #[actix_web::test]
    async fn ping_returns_200() {
        let app = test::init_service(App::new().route("/ping", web::get().to(health_check))).await;
        let req = test::TestRequest::get().uri("/ping").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn rotate_rejects_empty_cluster_id() {
        let data = web::Data::new(test_state());
        let app = test::init_service(App::new().app_data(data.clone()).route(
            "/api/rotate",
            web::post().to(rotate::<Arc<MockCloudGateway>, Arc<MockKubeGateway>>),
        ))
        .await;

        let req = test::TestRequest::post()
            .uri("/api/rotate")
            .set_json(RotateClusterRequest {
                cluster_id: "".to_string(),
                max_scaling: None,
                rotate_masters: false,
                rotate_workers: true,
                max_drain_retries: 0,
                evict_grace_period: 0,
                wait_between_rotations: 0,
                wait_between_pod_evictions: 0,
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn drain_rejects_empty_node_name() {
        let data = web::Data::new(test_state());
        let app = test::init_service(App::new().app_data(data.clone()).route(
            "/api/drain",
            web::post().to(drain::<Arc<MockCloudGateway>, Arc<MockKubeGateway>>),
        ))
        .await;

        let req = test::TestRequest::post()
            .uri("/api/drain")
            .set_json(DrainNodeRequest {
                node_name: "".to_string(),
                grace_period: 0,
                max_drain_retries: 0,
                wait_between_pod_evictions: 0,
                detach_node: false,
                terminate_node: false,
                cluster_id: "".to_string(),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 400);
    }

    #[actix_web::test]
    async fn rotate_accepts_a_valid_request() {
        let data = web::Data::new(test_state());
        let app = test::init_service(App::new().app_data(data.clone()).route(
            "/api/rotate",
            web::post().to(rotate::<Arc<MockCloudGateway>, Arc<MockKubeGateway>>),
        ))
        .await;

        let req = test::TestRequest::post()
            .uri("/api/rotate")
            .set_json(RotateClusterRequest {
                cluster_id: "my-cluster".to_string(),
                max_scaling: Some(2),
                rotate_masters: false,
                rotate_workers: true,
                max_drain_retries: 0,
                evict_grace_period: 0,
                wait_between_rotations: 0,
                wait_between_pod_evictions: 0,
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), 202);

        let body: RotationJob = test::read_body_json(resp).await;
        assert_eq!(body.cluster_id, "my-cluster");
        assert_eq!(body.max_scaling, 2);
    }
}
