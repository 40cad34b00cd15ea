// Schema catalog: resolves entity names to EntityMeta, backed by two TTL caches
//
// * table cache: data source -> every physical table definition
// * meta cache:  (data source, entity name) -> resolved EntityMeta

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::api::middleware::AppError;
use crate::config::CacheConfig;
use crate::models::entity_meta::EntityMeta;
use crate::models::schema::TableSchema;
use crate::services::cache::{data_source_key, CacheStats, TtlCache};
use crate::services::database::DbSession;
use crate::storage::CatalogStore;

pub type TableSet = HashMap<String, TableSchema>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetaKey {
    pub data_source: String,
    pub entity: String,
}

impl MetaKey {
    pub fn new(session: &dyn DbSession, entity: &str) -> Self {
        Self {
            data_source: data_source_key(session.data_source()),
            entity: entity.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub tables: CacheStats,
    pub metas: CacheStats,
}

pub struct SchemaCatalog {
    tables: TtlCache<String, Arc<TableSet>>,
    metas: TtlCache<MetaKey, Arc<EntityMeta>>,
}

impl SchemaCatalog {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            tables: TtlCache::new(max_entries, ttl),
            metas: TtlCache::new(max_entries, ttl),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.max_entries, Duration::from_secs(config.ttl_secs))
    }

    /// Resolve an entity, serving a cached meta when one is live.
    /// Failures are never cached.
    pub async fn acquire_meta(
        &self,
        session: &dyn DbSession,
        entity: &str,
    ) -> Result<Arc<EntityMeta>, AppError> {
        let key = MetaKey::new(session, entity);
        if let Some(meta) = self.metas.get(&key) {
            return Ok(meta);
        }

        let meta = Arc::new(self.load_meta(session, entity).await?);
        self.metas.insert(key, meta.clone());
        tracing::info!(
            "Loaded meta for entity '{}' ({} attr tables)",
            entity,
            meta.attr_table_count()
        );
        Ok(meta)
    }

    async fn load_meta(&self, session: &dyn DbSession, entity_name: &str) -> Result<EntityMeta, AppError> {
        let store = CatalogStore::new(session);
        let entity = store
            .find_active_entity(entity_name)
            .await?
            .ok_or_else(|| AppError::EntityNotFound(entity_name.to_string()))?;
        let groups = store.find_attr_groups(entity.entity_idx).await?;
        let mut meta = EntityMeta::new(entity, groups);

        let ds_key = data_source_key(session.data_source());
        let (tables, fresh) = match self.tables.get(&ds_key) {
            Some(tables) => (tables, false),
            None => (self.refresh_table_schemas(session).await?, true),
        };

        match meta.attach_schemas(&tables) {
            Ok(()) => Ok(meta),
            // the cached table set may predate the table
            Err(AppError::TableNotFound { table, .. }) if !fresh => {
                tracing::debug!("Table '{}' not in cached schemas, introspecting again", table);
                let tables = self.refresh_table_schemas(session).await?;
                meta.attach_schemas(&tables)?;
                Ok(meta)
            }
            Err(e) => Err(e),
        }
    }

    /// Introspect the data source and replace its cached table set
    pub async fn refresh_table_schemas(
        &self,
        session: &dyn DbSession,
    ) -> Result<Arc<TableSet>, AppError> {
        let tables: TableSet = session
            .introspect()
            .await?
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        let tables = Arc::new(tables);
        self.tables
            .insert(data_source_key(session.data_source()), tables.clone());
        tracing::debug!("Cached {} table schemas", tables.len());
        Ok(tables)
    }

    /// Drop the cached meta of one entity
    pub fn evict(&self, session: &dyn DbSession, entity: &str) -> bool {
        let removed = self.metas.remove(&MetaKey::new(session, entity));
        if removed {
            tracing::info!("Evicted meta for entity '{}'", entity);
        }
        removed
    }

    /// Drop everything cached for the session's data source
    pub fn evict_data_source(&self, session: &dyn DbSession) -> usize {
        let ds_key = data_source_key(session.data_source());
        let tables = usize::from(self.tables.remove(&ds_key));
        let metas = self.metas.retain(|k| k.data_source != ds_key);
        tracing::info!(
            "Evicted {} table sets and {} metas for data source {}",
            tables,
            metas,
            ds_key
        );
        tables + metas
    }

    /// Cache statistics; expired entries are purged first so sizes count live entries
    pub fn stats(&self) -> CatalogStats {
        self.tables.cleanup_expired();
        self.metas.cleanup_expired();
        CatalogStats {
            tables: self.tables.stats(),
            metas: self.metas.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::user_store;

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(16, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_acquire_meta_and_cache_hit() {
        let session = user_store("catalog-acquire").await;
        let catalog = catalog();

        let meta = catalog.acquire_meta(session.as_ref(), "user").await.unwrap();
        assert_eq!(meta.attr_groups().len(), 3);
        assert_eq!(meta.attr_table_count(), 3);
        assert!(meta.has_auto_increment());
        assert_eq!(meta.column_owner("dept_name").unwrap(), "user_department");

        let again = catalog.acquire_meta(session.as_ref(), "user").await.unwrap();
        assert!(Arc::ptr_eq(&meta, &again));

        let stats = catalog.stats();
        assert_eq!(stats.metas.hits, 1);
        assert_eq!(stats.metas.misses, 1);
        assert_eq!(stats.tables.size, 1);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_not_cached() {
        let session = user_store("catalog-unknown").await;
        let catalog = catalog();

        let err = catalog
            .acquire_meta(session.as_ref(), "ghost")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EntityNotFound(ref name) if name == "ghost"));
        assert_eq!(catalog.stats().metas.size, 0);
    }

    #[tokio::test]
    async fn test_missing_attr_table_is_reported() {
        let session = user_store("catalog-missing-table").await;
        CatalogStore::new(session.as_ref())
            .add_attr_group_by_name("user", "address", "user_address")
            .await
            .unwrap();
        let catalog = catalog();

        let err = catalog
            .acquire_meta(session.as_ref(), "user")
            .await
            .unwrap_err();
        match err {
            AppError::TableNotFound { table, entity } => {
                assert_eq!(table, "user_address");
                assert_eq!(entity, "user");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(catalog.stats().metas.size, 0);
    }

    #[tokio::test]
    async fn test_table_created_after_caching_is_found() {
        let session = user_store("catalog-late-table").await;
        let catalog = catalog();
        catalog.acquire_meta(session.as_ref(), "user").await.unwrap();

        session
            .execute_batch("CREATE TABLE orders (order_idx INTEGER PRIMARY KEY, total REAL)")
            .await
            .unwrap();
        CatalogStore::new(session.as_ref())
            .register_entity("order", None, "orders", "order_idx")
            .await
            .unwrap();

        let meta = catalog.acquire_meta(session.as_ref(), "order").await.unwrap();
        assert_eq!(meta.primary_table(), "orders");
        assert!(meta.column("total").is_some());
    }

    #[tokio::test]
    async fn test_evict_forces_reload() {
        let session = user_store("catalog-evict").await;
        let catalog = catalog();

        let first = catalog.acquire_meta(session.as_ref(), "user").await.unwrap();
        assert!(catalog.evict(session.as_ref(), "user"));
        assert!(!catalog.evict(session.as_ref(), "user"));

        let second = catalog.acquire_meta(session.as_ref(), "user").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        assert_eq!(catalog.evict_data_source(session.as_ref()), 2);
        assert_eq!(catalog.stats().tables.size, 0);
        assert_eq!(catalog.stats().metas.size, 0);
    }

    #[tokio::test]
    async fn test_stats_purge_expired_entries() {
        let session = user_store("catalog-expired").await;
        let catalog = SchemaCatalog::new(16, Duration::from_millis(30));
        catalog.acquire_meta(session.as_ref(), "user").await.unwrap();
        assert_eq!(catalog.stats().metas.size, 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let stats = catalog.stats();
        assert_eq!(stats.metas.size, 0);
        assert_eq!(stats.metas.expirations, 1);
        assert_eq!(stats.tables.size, 0);
        assert_eq!(stats.tables.expirations, 1);
    }

    #[tokio::test]
    async fn test_data_sources_are_isolated() {
        let a = user_store("catalog-ds-a").await;
        let b = user_store("catalog-ds-b").await;
        let catalog = catalog();

        catalog.acquire_meta(a.as_ref(), "user").await.unwrap();
        catalog.acquire_meta(b.as_ref(), "user").await.unwrap();
        assert_eq!(catalog.stats().metas.size, 2);
        assert_eq!(catalog.stats().tables.size, 2);
    }
}
