use actix_web::{middleware::Logger, web, App, HttpServer};
use anyhow::Context;
use livestream_service::config::{Config, SERVICE_NAME};
use livestream_service::db::PgLivestreamStore;
use livestream_service::handlers::{self, AppState};
use livestream_service::services::{
    BridgeSupervisor, DeliveryEndpoints, FfmpegLauncher, LivepeerClient, LivestreamService,
    WebhookVerifier,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = terminate.recv() => {},
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing(log_format: &str) {
    let json = log_format.eq_ignore_ascii_case("json");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info,sqlx=warn".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(tracing_subscriber::fmt::layer))
        .init();
}

/// Livestream Service
///
/// # Routes
///
/// - `/api/livestream/*` - Session lifecycle, bridge control, CDN webhook
/// - `/api/v1/health` - Liveness summary
/// - `/metrics` - Prometheus metrics
#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config.app.log_format);

    info!(
        service = SERVICE_NAME,
        env = %config.app.env,
        "Starting livestream-service"
    );

    let pool = db_pool::create_pool(config.database.clone())
        .await
        .context("Failed to create database pool")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    info!("Database migrations applied");

    let store = Arc::new(PgLivestreamStore::new(pool));
    let provider = Arc::new(LivepeerClient::new(&config.cdn).context("Failed to build CDN client")?);
    let bridge = BridgeSupervisor::new(
        &config.bridge,
        Arc::new(FfmpegLauncher::new(&config.bridge.ffmpeg_path)),
    );
    let service = LivestreamService::new(
        store,
        provider,
        bridge.clone(),
        DeliveryEndpoints::from_config(&config.cdn),
    );
    let reconciler = service.spawn_exit_reconciler();

    let state = web::Data::new(AppState {
        service,
        verifier: WebhookVerifier::new(config.cdn.webhook_secret.clone()),
    });

    let bind_addr = (config.app.host.clone(), config.app.port);
    info!(host = %bind_addr.0, port = bind_addr.1, "HTTP server listening");

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .configure(handlers::configure)
    })
    .bind(bind_addr)
    .context("Failed to bind HTTP server")?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received, stopping HTTP server");
        server_handle.stop(true).await;
    });

    server.await.context("HTTP server error")?;

    let stopped = bridge.shutdown().await;
    info!(stopped, "Transcode workers stopped");
    reconciler.abort();

    info!("livestream-service shut down");
    Ok(())
}
