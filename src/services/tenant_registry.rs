use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::api::middleware::AppError;
use crate::config::TenantConfig;
use crate::models::entity::Tenant;
use crate::services::cache::TtlCache;
use crate::services::database::{open_session, DbSession, Driver};
use crate::storage::CatalogStore;

const TENANT_CACHE_TTL: Duration = Duration::from_secs(60);
const TENANT_CACHE_SIZE: usize = 256;

/// Maps tenant uids to database sessions, one session per data source.
/// Tenant rows live in the default tenant's database.
pub struct TenantRegistry {
    default_session: Arc<dyn DbSession>,
    default_uid: String,
    sessions: Arc<RwLock<HashMap<String, Arc<dyn DbSession>>>>,
    tenants: TtlCache<String, Tenant>,
}

impl TenantRegistry {
    pub fn new(default_session: Arc<dyn DbSession>, default_uid: impl Into<String>) -> Self {
        let mut sessions = HashMap::new();
        sessions.insert(
            default_session.data_source().to_string(),
            default_session.clone(),
        );
        Self {
            default_session,
            default_uid: default_uid.into(),
            sessions: Arc::new(RwLock::new(sessions)),
            tenants: TtlCache::new(TENANT_CACHE_SIZE, TENANT_CACHE_TTL),
        }
    }

    /// Open the configured default tenant and make sure its catalog tables exist
    pub async fn bootstrap(config: &TenantConfig) -> Result<Self, AppError> {
        let driver = config.default_driver.parse::<Driver>()?;
        let session = open_session(driver, &config.default_data_source)?;
        CatalogStore::new(session.as_ref()).init_catalog_tables().await?;
        tracing::info!(
            "Default tenant on {} data source {}",
            driver.as_str(),
            Self::mask_credentials(&config.default_data_source)
        );
        Ok(Self::new(session, config.default_uid.clone()))
    }

    pub fn default_session(&self) -> Arc<dyn DbSession> {
        self.default_session.clone()
    }

    /// Session for a tenant uid taken from a request; none or the default uid
    /// selects the default tenant
    pub async fn resolve(&self, tenant_uid: Option<&str>) -> Result<Arc<dyn DbSession>, AppError> {
        let uid = match tenant_uid.map(str::trim) {
            None | Some("") => return Ok(self.default_session()),
            Some(uid) if uid == self.default_uid => return Ok(self.default_session()),
            Some(uid) => uid,
        };
        uuid::Uuid::parse_str(uid)
            .map_err(|e| AppError::Validation(format!("Invalid tenant uid '{}': {}", uid, e)))?;

        let tenant = self.find_tenant(uid).await?;
        let driver = tenant.driver.parse::<Driver>()?;
        self.get_or_create_session(driver, &tenant.data_source).await
    }

    async fn find_tenant(&self, uid: &str) -> Result<Tenant, AppError> {
        if let Some(tenant) = self.tenants.get(&uid.to_string()) {
            return Ok(tenant);
        }
        let tenant = CatalogStore::new(self.default_session.as_ref())
            .find_active_tenant(uid)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Tenant '{}' not found", uid)))?;
        self.tenants.insert(uid.to_string(), tenant.clone());
        Ok(tenant)
    }

    /// Get or open the session for a data source.
    /// Safe to call concurrently; only one session is ever opened per data source.
    pub async fn get_or_create_session(
        &self,
        driver: Driver,
        data_source: &str,
    ) -> Result<Arc<dyn DbSession>, AppError> {
        {
            let sessions = self.sessions.read().await;
            if let Some(session) = sessions.get(data_source) {
                tracing::debug!("Using existing session for: {}", Self::mask_credentials(data_source));
                return Ok(session.clone());
            }
        }

        let mut sessions = self.sessions.write().await;

        // another task may have opened it while we waited for the write lock
        if let Some(session) = sessions.get(data_source) {
            tracing::debug!("Session opened by another task for: {}", Self::mask_credentials(data_source));
            return Ok(session.clone());
        }

        tracing::info!(
            "Opening {} session for: {}",
            driver.as_str(),
            Self::mask_credentials(data_source)
        );
        let session = open_session(driver, data_source).map_err(|e| {
            tracing::error!("Failed to open session: {}", e);
            e
        })?;
        CatalogStore::new(session.as_ref()).init_catalog_tables().await?;

        sessions.insert(data_source.to_string(), session.clone());
        Ok(session)
    }

    /// Add an already-open session, replacing any for the same data source
    pub async fn register_session(&self, session: Arc<dyn DbSession>) {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.data_source().to_string(), session);
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Mask credentials in a data source for safe logging
    pub fn mask_credentials(data_source: &str) -> String {
        match url::Url::parse(data_source) {
            Ok(parsed) if parsed.password().is_some() => {
                let mut masked = parsed;
                let _ = masked.set_password(Some("***"));
                masked.to_string()
            }
            Ok(parsed) => parsed.to_string(),
            // plain file paths carry no credentials
            Err(_) => data_source.to_string(),
        }
    }
}
