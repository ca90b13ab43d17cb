use actix_web::{web, HttpResponse};
use tracing::info;

use super::AppState;
use crate::error::Result;
use crate::models::{
    CreateAndStartRequest, DeleteLivestreamQuery, StartBridgeRequest, UpdateProductsRequest,
};

/// POST /api/livestream/create-and-start
pub async fn create_and_start(
    state: web::Data<AppState>,
    req: web::Json<CreateAndStartRequest>,
) -> Result<HttpResponse> {
    let created = state.service.create_and_start(req.into_inner()).await?;
    Ok(HttpResponse::Created().json(created))
}

/// POST /api/livestream/start-bridge
pub async fn start_bridge(
    state: web::Data<AppState>,
    req: web::Json<StartBridgeRequest>,
) -> Result<HttpResponse> {
    let req = req.into_inner();
    let livestream_id = req.livestream_id;
    let ports = state.service.start_bridge(req).await?;

    info!(livestream_id = ?livestream_id, "Bridge started via API");
    Ok(HttpResponse::Ok().json(ports))
}

/// POST /api/livestream/{id}/stop-bridge
pub async fn stop_bridge(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let stopped = state.service.stop_bridge(path.into_inner());
    Ok(HttpResponse::Ok().json(stopped))
}

/// POST /api/livestream/{id}/end
pub async fn end_livestream(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let ended = state.service.end(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ended))
}

/// GET /api/livestream/{id}
pub async fn get_livestream(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let details = state.service.get_details(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(details))
}

/// GET /api/livestream/active/all
pub async fn list_active(state: web::Data<AppState>) -> Result<HttpResponse> {
    let active = state.service.list_active().await?;
    Ok(HttpResponse::Ok().json(active))
}

/// PUT /api/livestream/{id}/products
pub async fn update_products(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    req: web::Json<UpdateProductsRequest>,
) -> Result<HttpResponse> {
    let livestream_id = path.into_inner();
    let products = state
        .service
        .update_featured_products(livestream_id, &req.product_ids)
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "livestreamId": livestream_id,
        "products": products,
    })))
}

/// GET /api/livestream/{id}/status
pub async fn get_status(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let status = state.service.get_status(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(status))
}

/// GET /api/livestream/{id}/viewer-count
pub async fn get_viewer_count(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let count = state.service.viewer_count(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(count))
}

/// POST /api/livestream/{id}/viewer/add
pub async fn add_viewer(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let count = state.service.add_viewer(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(count))
}

/// POST /api/livestream/{id}/viewer/remove
pub async fn remove_viewer(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let count = state.service.remove_viewer(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(count))
}

/// GET /api/livestream/seller/{seller_id}/history
pub async fn seller_history(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse> {
    let history = state.service.seller_history(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(history))
}

/// DELETE /api/livestream/{id}?sellerId=
pub async fn delete_livestream(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    query: web::Query<DeleteLivestreamQuery>,
) -> Result<HttpResponse> {
    state
        .service
        .delete(path.into_inner(), query.seller_id)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}
