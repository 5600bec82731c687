use crate::cli::ServeArgs;
use crate::infra::{build_service, load_directory, AppState, EvaluationService};
use crate::routes::with_evaluation_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use peopleops::config::AppConfig;
use peopleops::error::AppError;
use peopleops::telemetry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry, config.environment)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let directory = load_directory(&config.directory)?;
    let handles = build_service(Arc::new(directory), &config.evaluations);
    spawn_sweeper(
        handles.service.clone(),
        config.evaluations.rate_limit_sweep_interval,
    );

    let app = with_evaluation_routes(handles.service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        public_origin = %config.evaluations.public_origin,
        "people operations evaluation service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Reclaims expired rate-limit buckets and stale form tokens so neither store grows with
/// every probed token or abandoned session.
fn spawn_sweeper(service: Arc<EvaluationService>, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match service.sweep_rate_limits().await {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "expired rate limit buckets swept"),
                Err(err) => warn!(error = %err, "rate limit sweep failed"),
            }
            match service.sweep_form_tokens() {
                Ok(0) => {}
                Ok(removed) => debug!(removed, "stale form tokens swept"),
                Err(err) => warn!(error = %err, "form token sweep failed"),
            }
        }
    });
}
