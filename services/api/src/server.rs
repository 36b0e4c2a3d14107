use crate::cli::ServeArgs;
use crate::infra::{operator, wire_services, AppState, DirectoryServices};
use crate::routes::with_ownership_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use gunsmith_directory::config::AppConfig;
use gunsmith_directory::error::AppError;
use gunsmith_directory::telemetry;
use gunsmith_directory::workflows::ownership::drain_outbox;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

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

    let wiring = wire_services(&config.ownership);
    if let Some(path) = args.seed_csv.take() {
        let report = wiring
            .services
            .listings
            .import_path(&operator(), &path, Utc::now())?;
        info!(
            path = %path.display(),
            imported = report.imported.len(),
            rejected = report.rejected.len(),
            "seeded listings"
        );
    }

    tokio::spawn(drain_outbox(wiring.outbox));
    if config.ownership.sweep_interval_secs > 0 {
        tokio::spawn(sweep_featured_slots(
            wiring.services.clone(),
            Duration::from_secs(config.ownership.sweep_interval_secs),
        ));
    } else {
        info!("featured sweep disabled");
    }

    let app = with_ownership_routes(wiring.services)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, "gunsmith directory ready");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodic expiry and waitlist pass. Failures are logged and retried on the next tick.
async fn sweep_featured_slots(services: Arc<DirectoryServices>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        match services.featured.sweep(Utc::now()) {
            Ok(report) => {
                if !report.expired_listings.is_empty() || !report.notified_entries.is_empty() {
                    info!(
                        expired = report.expired_listings.len(),
                        notified = report.notified_entries.len(),
                        lapsed = report.lapsed_entries.len(),
                        "featured sweep"
                    );
                }
            }
            Err(err) => error!(error = %err, "featured sweep failed"),
        }
    }
}
