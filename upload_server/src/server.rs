use crate::{config::Config, routes::api_routes, telemetry::Metrics};
use axum::{extract::DefaultBodyLimit, Router};
use axum_otel_metrics::HttpMetricsLayerBuilder;
use std::{path::PathBuf, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{broadcast::Receiver, Mutex},
    task::JoinHandle,
};
use video_pipeline::config::Settings;

#[derive(Clone)]
pub struct SharedState {
    pub settings: Arc<Settings>,
    pub uploads_dir: PathBuf,
    /// Held for the whole of a pipeline run: the device is never shared
    /// between concurrent runs.
    pub run_lock: Arc<Mutex<()>>,
    pub metrics: Arc<Metrics>,
}

impl SharedState {
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        Self {
            settings: Arc::new(config.pipeline.clone()),
            uploads_dir: config.uploads.dir.clone(),
            run_lock: Arc::new(Mutex::new(())),
            metrics,
        }
    }
}

pub struct HttpServer {
    router: Router,
    listener: TcpListener,
}

impl HttpServer {
    pub async fn new(config: &Config) -> anyhow::Result<Self> {
        let addr = config.server.get_address();

        tokio::fs::create_dir_all(&config.uploads.dir).await?;

        let metrics = Arc::new(Metrics::new()?);
        let metrics_layer = HttpMetricsLayerBuilder::new().build();

        let app_state = SharedState::new(config, metrics);

        let router = Router::new()
            .merge(api_routes())
            .with_state(app_state)
            .layer(DefaultBodyLimit::max(config.uploads.max_bytes))
            .layer(metrics_layer);

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
            Ok(())
        });

        Ok(server_handle)
    }
}
