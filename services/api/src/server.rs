use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryTrackingStore, SimulatedEnedisGateway};
use crate::routes::with_tracking_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;
use voltaflow::config::AppConfig;
use voltaflow::error::AppError;
use voltaflow::telemetry;
use voltaflow::tracking::{ConsentSyncManager, TrackingApi, TrackingService};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryTrackingStore::default());
    let service = Arc::new(TrackingService::new(store));
    let gateway = Arc::new(SimulatedEnedisGateway::new());
    let consent = Arc::new(ConsentSyncManager::new(service.clone(), gateway));

    info!(
        base_url = %config.enedis.base_url,
        timeout_secs = config.enedis.timeout_secs,
        "using simulated Enedis gateway"
    );

    let app = with_tracking_routes(TrackingApi { service, consent })
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "order tracking service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
