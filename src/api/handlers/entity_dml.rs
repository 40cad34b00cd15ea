use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};

use crate::api::handlers::AppState;
use crate::api::middleware::{ApiResponse, AppError};
use crate::models::data_table::DataTable;

/// Insert rows into every table of an entity
pub async fn insert_entity(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse>, AppError> {
    let table = DataTable::parse_values(&body)?;
    let session = state.tenant_session(&headers).await?;

    let outcome = state
        .write_service
        .insert(session.as_ref(), &entity, table)
        .await?;
    tracing::info!("Inserted {} rows into entity '{}'", outcome.rows.len(), entity);

    Ok(Json(ApiResponse::success(serde_json::to_value(outcome)?)))
}

/// Update rows of an entity by key
pub async fn update_entity(
    State(state): State<AppState>,
    Path(entity): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse>, AppError> {
    let table = DataTable::parse_values(&body)?;
    let session = state.tenant_session(&headers).await?;

    let outcome = state
        .write_service
        .update(session.as_ref(), &entity, &table)
        .await?;

    Ok(Json(ApiResponse::success(serde_json::to_value(outcome)?)))
}
