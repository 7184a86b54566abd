use crate::{config::Config, pipeline::FramePipeline, routes::api_routes, telemetry::Metrics};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::sync::Arc;
use tokio::{net::TcpListener, sync::broadcast::Receiver, task::JoinHandle};
use tower_http::cors::CorsLayer;

#[derive(Clone)]
pub struct SharedState {
    pub pipeline: Arc<FramePipeline>,
    pub metrics: Arc<Metrics>,
    pub max_payload_bytes: usize,
}

impl SharedState {
    pub fn new(pipeline: Arc<FramePipeline>, metrics: Arc<Metrics>) -> Self {
        let max_payload_bytes = pipeline.max_frame_bytes();
        Self {
            pipeline,
            metrics,
            max_payload_bytes,
        }
    }
}

/// Router with every route, the body limit and cross-origin access applied.
pub fn build_router(state: SharedState) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_payload_bytes);

    Router::new()
        .merge(api_routes())
        .with_state(state)
        .layer(body_limit)
        .layer(CorsLayer::permissive())
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(pipeline: Arc<FramePipeline>, config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        let metrics = Arc::new(Metrics::new()?);
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let router = build_router(SharedState::new(pipeline, metrics)).layer(metrics_layer);

        let listener = TcpListener::bind(addr).await?;

        Ok(Self { router, listener })
    }

    pub async fn run(
        self,
        mut shutdown_rx: Receiver<()>,
    ) -> anyhow::Result<JoinHandle<anyhow::Result<()>>> {
        tracing::info!("Starting app on {}", self.listener.local_addr()?);

        let listener = self.listener;
        let router = self.router;
        let server_handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_rx.recv().await.ok();
                })
                .await?;
            tracing::info!("Server stopped");
            Ok(())
        });

        Ok(server_handle)
    }
}
