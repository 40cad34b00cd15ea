use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::handlers::{entity_dml, entity_meta, entity_query, AppState};

/// Create the application router; every route is registered here
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/entity/dq",
            get(entity_query::query_entity_get).post(entity_query::query_entity),
        )
        .route(
            "/entity/dm/{entity}",
            post(entity_dml::insert_entity).put(entity_dml::update_entity),
        )
        .route(
            "/entity/meta/{entity}",
            get(entity_meta::get_entity_meta).delete(entity_meta::evict_entity_meta),
        )
        .route("/entity/stats", get(entity_meta::catalog_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::config::Config;
    use crate::services::database::DbSession;
    use crate::services::tenant_registry::TenantRegistry;
    use crate::test_support::user_store;

    async fn app(label: &str) -> Router {
        let config = Config::from_lookup(|_| None).unwrap();
        let session: Arc<dyn DbSession> = user_store(label).await;
        let tenants = Arc::new(TenantRegistry::new(session, config.tenant.default_uid.clone()));
        create_router(AppState::new(config, tenants))
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let body = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn test_health() {
        let app = app("routes-health").await;
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_insert_then_query() {
        let app = app("routes-insert-query").await;

        let (status, body) = send(
            &app,
            Method::POST,
            "/entity/dm/user",
            Some(json!({"vals": {"name": "alice", "dept_name": "eng"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["code"], 0);
        assert_eq!(body["data"]["rows"], json!([[1]]));

        let query = json!({"select": ["name", "dept_name"], "from": "user"});
        let (status, body) = send(&app, Method::POST, "/entity/dq", Some(query.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["rows"], json!([{"name": "alice", "dept_name": "eng"}]));
        assert_eq!(
            body["data"]["sql"],
            "SELECT name,dept_name FROM user LEFT JOIN user_department ON user.user_idx = user_department.user_idx"
        );

        let encoded: String = url::form_urlencoded::byte_serialize(query.to_string().as_bytes()).collect();
        let (status, body) = send(&app, Method::GET, &format!("/entity/dq?q={}", encoded), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["row_count"], 1);
    }

    #[tokio::test]
    async fn test_keyless_update_is_not_implemented() {
        let app = app("routes-keyless").await;
        let (status, body) = send(
            &app,
            Method::PUT,
            "/entity/dm/user",
            Some(json!({"vals": {"name": "bob"}})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_IMPLEMENTED);
        assert_eq!(body["code"], -2);
        assert_eq!(body["data"]["error"], "NOT_IMPLEMENTED");
    }

    #[tokio::test]
    async fn test_parse_errors_are_bad_requests() {
        let app = app("routes-parse-error").await;
        let (status, body) = send(
            &app,
            Method::POST,
            "/entity/dq",
            Some(json!({"select": ["a"], "from": "user", "where": []})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], -1);

        let (status, _) = send(&app, Method::GET, "/entity/dq", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_meta_and_eviction() {
        let app = app("routes-meta").await;

        let (status, body) = send(&app, Method::GET, "/entity/meta/user", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["primary_keys"], json!(["user_idx"]));

        let (status, body) = send(&app, Method::DELETE, "/entity/meta/user", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["evicted"], true);

        let (_, body) = send(&app, Method::GET, "/entity/stats", None).await;
        assert_eq!(body["data"]["metas"]["size"], 0);

        let (status, body) = send(&app, Method::GET, "/entity/meta/ghost", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["data"]["error"], "ENTITY_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_unknown_tenant_header() {
        let app = app("routes-tenant").await;
        let request = Request::builder()
            .uri("/entity/meta/user")
            .header("X-Tenant-UID", "7b0c3f4e-2f7a-4b8e-9c1d-5e6f7a8b9c0d")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
