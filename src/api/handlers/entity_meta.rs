use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde_json::json;

use crate::api::handlers::AppState;
use crate::api::middleware::{ApiResponse, AppError};

/// Resolved metadata of an entity
pub async fn get_entity_meta(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse>, AppError> {
    let session = state.tenant_session(&headers).await?;
    let meta = state.catalog.acquire_meta(session.as_ref(), &entity).await?;
    Ok(Json(ApiResponse::success(serde_json::to_value(meta.to_jmeta())?)))
}

/// Drop the cached metadata of an entity so the next request reloads it
pub async fn evict_entity_meta(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse>, AppError> {
    let session = state.tenant_session(&headers).await?;
    let evicted = state.catalog.evict(session.as_ref(), &entity);
    Ok(Json(ApiResponse::success(json!({
        "entity": entity,
        "evicted": evicted,
    }))))
}

/// Hit/miss counters of the catalog caches
pub async fn catalog_stats(State(state): State<AppState>) -> Result<Json<ApiResponse>, AppError> {
    Ok(Json(ApiResponse::success(serde_json::to_value(state.catalog.stats())?)))
}
