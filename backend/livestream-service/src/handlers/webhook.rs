/// CDN webhook endpoint
///
/// The signature is checked over the raw request bytes before anything else
/// looks at the body. Once a delivery is authentic it is always acknowledged
/// with 200, so a failing database never turns into a CDN retry storm.
use actix_web::{web, HttpRequest, HttpResponse};
use tracing::{error, warn};

use super::AppState;
use crate::error::Result;
use crate::metrics;
use crate::services::webhook::{parse_event, WebhookEvent, SIGNATURE_HEADERS};

fn signature_header(req: &HttpRequest) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| req.headers().get(*name))
        .and_then(|value| value.to_str().ok())
}

/// POST /api/livestream/webhook
pub async fn receive_webhook(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Bytes,
) -> Result<HttpResponse> {
    if let Err(e) = state.verifier.verify(signature_header(&req), &body) {
        warn!("Rejected webhook with invalid signature");
        metrics::record_webhook_event("unknown", "invalid_signature");
        return Err(e);
    }

    let Some(event) = parse_event(&body) else {
        warn!(bytes = body.len(), "Signed webhook body is not an event, ignoring");
        metrics::record_webhook_event("unknown", "unparseable");
        return Ok(received());
    };

    // Ignored event names come from the CDN; keep label cardinality bounded.
    let label = match &event {
        WebhookEvent::Ignored { .. } => "other",
        _ => event.name(),
    };

    let outcome = match state.service.handle_webhook(&event).await {
        Ok(outcome) => outcome.as_str(),
        Err(e) => {
            error!(event = event.name(), error = %e, "Failed to apply webhook event");
            "error"
        }
    };
    metrics::record_webhook_event(label, outcome);

    Ok(received())
}

fn received() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "received": true }))
}
