use axum::{
    body::Bytes,
    extract::{Query as UrlQuery, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;

use crate::api::handlers::AppState;
use crate::api::middleware::{ApiResponse, AppError};
use crate::models::query::Query;
use crate::validation::query_parser::parse_query;

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    /// Query document as JSON text
    pub q: Option<String>,
}

/// Run a query document sent as the request body
pub async fn query_entity(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse>, AppError> {
    let query = parse_query(&body)?;
    run(&state, &headers, &query).await
}

/// Run a query document passed in the `q` parameter
pub async fn query_entity_get(
    State(state): State<AppState>,
    headers: HeaderMap,
    UrlQuery(params): UrlQuery<QueryParams>,
) -> Result<Json<ApiResponse>, AppError> {
    let text = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| AppError::Validation("Query parameter 'q' is required".to_string()))?;
    let query = parse_query(text.as_bytes())?;
    run(&state, &headers, &query).await
}

async fn run(state: &AppState, headers: &HeaderMap, query: &Query) -> Result<Json<ApiResponse>, AppError> {
    let session = state.tenant_session(headers).await?;
    let outcome = state.query_service.execute(session.as_ref(), query).await?;
    tracing::info!(
        "Query returned {} rows in {}ms",
        outcome.row_count,
        outcome.execution_time_ms
    );
    Ok(Json(ApiResponse::success(serde_json::to_value(outcome)?)))
}
