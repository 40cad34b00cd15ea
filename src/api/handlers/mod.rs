pub mod entity_dml;
pub mod entity_meta;
pub mod entity_query;

use std::sync::Arc;

use axum::http::HeaderMap;

use crate::api::middleware::AppError;
use crate::config::Config;
use crate::services::catalog::SchemaCatalog;
use crate::services::database::DbSession;
use crate::services::query_service::QueryService;
use crate::services::tenant_registry::TenantRegistry;
use crate::services::write_service::WriteService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub tenants: Arc<TenantRegistry>,
    pub catalog: Arc<SchemaCatalog>,
    pub query_service: Arc<QueryService>,
    pub write_service: Arc<WriteService>,
}

impl AppState {
    pub fn new(config: Config, tenants: Arc<TenantRegistry>) -> Self {
        let catalog = Arc::new(SchemaCatalog::from_config(&config.cache));
        Self {
            query_service: Arc::new(QueryService::new(catalog.clone())),
            write_service: Arc::new(WriteService::new(catalog.clone())),
            catalog,
            tenants,
            config,
        }
    }

    /// Session of the tenant named by the request's tenant header
    pub async fn tenant_session(&self, headers: &HeaderMap) -> Result<Arc<dyn DbSession>, AppError> {
        let uid = match headers.get(self.config.tenant.header.as_str()) {
            Some(value) => Some(value.to_str().map_err(|_| {
                AppError::Validation(format!(
                    "Header '{}' is not valid text",
                    self.config.tenant.header
                ))
            })?),
            None => None,
        };
        self.tenants.resolve(uid).await
    }
}
