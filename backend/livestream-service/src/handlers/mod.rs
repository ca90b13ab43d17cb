//! HTTP handlers for livestream-service
//!
//! - Livestreams: session lifecycle, featured products, queries
//! - Webhook: signed CDN lifecycle events
pub mod livestreams;
pub mod webhook;

pub use livestreams::{
    add_viewer, create_and_start, delete_livestream, end_livestream, get_livestream, get_status,
    get_viewer_count, list_active, remove_viewer, seller_history, start_bridge, stop_bridge,
    update_products,
};
pub use webhook::receive_webhook;

use actix_web::{web, HttpResponse};

use crate::error::AppError;
use crate::metrics::serve_metrics;
use crate::services::{LivestreamService, WebhookVerifier};

/// Shared handler state
pub struct AppState {
    pub service: LivestreamService,
    pub verifier: WebhookVerifier,
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": crate::config::SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "activeBridges": state.service.bridge().active_count(),
    }))
}

/// Register every route. The caller provides `web::Data<AppState>`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    let json_config = web::JsonConfig::default()
        .error_handler(|err, _req| AppError::BadRequest(err.to_string()).into());

    cfg.app_data(json_config)
        .route("/api/v1/health", web::get().to(health))
        .route("/metrics", web::get().to(serve_metrics))
        .service(
            web::scope("/api/livestream")
                // Static paths first: "/{id}" would otherwise claim them.
                .route("/create-and-start", web::post().to(create_and_start))
                .route("/start-bridge", web::post().to(start_bridge))
                .route("/webhook", web::post().to(receive_webhook))
                .route("/active/all", web::get().to(list_active))
                .route(
                    "/seller/{seller_id}/history",
                    web::get().to(seller_history),
                )
                .service(
                    web::resource("/{livestream_id}")
                        .route(web::get().to(get_livestream))
                        .route(web::delete().to(delete_livestream)),
                )
                .route("/{livestream_id}/end", web::post().to(end_livestream))
                .route("/{livestream_id}/stop-bridge", web::post().to(stop_bridge))
                .route("/{livestream_id}/products", web::put().to(update_products))
                .route("/{livestream_id}/status", web::get().to(get_status))
                .route(
                    "/{livestream_id}/viewer-count",
                    web::get().to(get_viewer_count),
                )
                .route("/{livestream_id}/viewer/add", web::post().to(add_viewer))
                .route(
                    "/{livestream_id}/viewer/remove",
                    web::post().to(remove_viewer),
                ),
        );
}
