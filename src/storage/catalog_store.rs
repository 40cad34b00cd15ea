use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::api::middleware::AppError;
use crate::models::entity::{AttrGroup, Entity, Tenant, STATUS_ACTIVE};
use crate::services::database::{DbSession, Driver, Row};

pub const ENTITY_TABLE: &str = "meta_entity";
pub const ATTR_GROUP_TABLE: &str = "meta_entity_attr_group";
pub const TENANT_TABLE: &str = "meta_tenant";

const SQLITE_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS meta_entity (
        entity_idx INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_name TEXT NOT NULL UNIQUE,
        description TEXT,
        pk_attr_table TEXT NOT NULL,
        pk_attr_column TEXT NOT NULL,
        status INTEGER NOT NULL DEFAULT 1
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS meta_entity_attr_group (
        group_idx INTEGER PRIMARY KEY AUTOINCREMENT,
        entity_idx INTEGER NOT NULL,
        attr_table TEXT NOT NULL UNIQUE,
        group_name TEXT,
        description TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_attr_group_entity ON meta_entity_attr_group(entity_idx)",
    r#"
    CREATE TABLE IF NOT EXISTS meta_tenant (
        tenant_idx INTEGER PRIMARY KEY AUTOINCREMENT,
        tenant_uid TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        driver TEXT NOT NULL,
        data_source TEXT NOT NULL,
        environment TEXT,
        status INTEGER NOT NULL DEFAULT 1
    )
    "#,
];

const MYSQL_DDL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS meta_entity (
        entity_idx INT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        entity_name VARCHAR(128) NOT NULL,
        description VARCHAR(512),
        pk_attr_table VARCHAR(128) NOT NULL,
        pk_attr_column VARCHAR(128) NOT NULL,
        status TINYINT NOT NULL DEFAULT 1,
        UNIQUE KEY uq_entity_name (entity_name)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS meta_entity_attr_group (
        group_idx INT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        entity_idx INT UNSIGNED NOT NULL,
        attr_table VARCHAR(128) NOT NULL,
        group_name VARCHAR(128),
        description VARCHAR(512),
        UNIQUE KEY uq_attr_table (attr_table),
        KEY idx_attr_group_entity (entity_idx)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS meta_tenant (
        tenant_idx INT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        tenant_uid VARCHAR(64) NOT NULL,
        name VARCHAR(128) NOT NULL,
        driver VARCHAR(32) NOT NULL,
        data_source VARCHAR(512) NOT NULL,
        environment VARCHAR(64),
        status TINYINT NOT NULL DEFAULT 1,
        UNIQUE KEY uq_tenant_uid (tenant_uid)
    )
    "#,
];

/// Entities describing the catalog tables themselves
const BUILTIN_ENTITIES: &[(&str, &str, &str, &str)] = &[
    ("entity", ENTITY_TABLE, "entity_idx", "entity definitions"),
    ("entity_attr_group", ATTR_GROUP_TABLE, "group_idx", "entity attribute groups"),
    ("tenant", TENANT_TABLE, "tenant_idx", "tenants and their data sources"),
];

/// Catalog rows (entities, attribute groups, tenants) stored in a tenant database
pub struct CatalogStore<'a> {
    session: &'a dyn DbSession,
}

impl<'a> CatalogStore<'a> {
    pub fn new(session: &'a dyn DbSession) -> Self {
        Self { session }
    }

    /// Create the catalog tables when absent and register the built-in entities
    pub async fn init_catalog_tables(&self) -> Result<(), AppError> {
        let ddl = match self.session.driver().parse::<Driver>()? {
            Driver::Sqlite => SQLITE_DDL,
            Driver::MySql => MYSQL_DDL,
        };
        for statement in ddl {
            self.session.execute(statement, &[]).await?;
        }

        for &(name, table, column, description) in BUILTIN_ENTITIES {
            if self.find_entity(name).await?.is_none() {
                self.register_entity(name, Some(description), table, column)
                    .await?;
            }
        }

        tracing::info!(
            "Catalog tables ready on {} data source",
            self.session.driver()
        );
        Ok(())
    }

    /// Entity by name regardless of status
    pub async fn find_entity(&self, name: &str) -> Result<Option<Entity>, AppError> {
        let rows = self
            .session
            .query(
                "SELECT entity_idx, entity_name, description, pk_attr_table, pk_attr_column, status \
                 FROM meta_entity WHERE entity_name = ?",
                &[json!(name)],
            )
            .await?;
        rows.into_iter().next().map(from_row).transpose()
    }

    pub async fn find_active_entity(&self, name: &str) -> Result<Option<Entity>, AppError> {
        Ok(self.find_entity(name).await?.filter(Entity::is_active))
    }

    pub async fn find_attr_groups(&self, entity_idx: i64) -> Result<Vec<AttrGroup>, AppError> {
        let rows = self
            .session
            .query(
                "SELECT group_idx, entity_idx, attr_table, group_name, description \
                 FROM meta_entity_attr_group WHERE entity_idx = ? ORDER BY group_idx",
                &[json!(entity_idx)],
            )
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    pub async fn register_entity(
        &self,
        name: &str,
        description: Option<&str>,
        pk_attr_table: &str,
        pk_attr_column: &str,
    ) -> Result<Entity, AppError> {
        if name.is_empty() || pk_attr_table.is_empty() || pk_attr_column.is_empty() {
            return Err(AppError::Validation(
                "entity name, primary table and key column are required".to_string(),
            ));
        }

        self.session
            .execute(
                "INSERT INTO meta_entity (entity_name, description, pk_attr_table, pk_attr_column, status) \
                 VALUES (?,?,?,?,?)",
                &[
                    json!(name),
                    json!(description),
                    json!(pk_attr_table),
                    json!(pk_attr_column),
                    json!(STATUS_ACTIVE),
                ],
            )
            .await?;

        tracing::info!("Registered entity '{}' on table '{}'", name, pk_attr_table);
        self.find_entity(name)
            .await?
            .ok_or_else(|| AppError::Internal(format!("entity '{}' vanished after insert", name)))
    }

    /// Change the status of an entity; returns whether a row matched
    pub async fn set_entity_status(&self, name: &str, status: i32) -> Result<bool, AppError> {
        let result = self
            .session
            .execute(
                "UPDATE meta_entity SET status = ? WHERE entity_name = ?",
                &[json!(status), json!(name)],
            )
            .await?;
        Ok(result.affected > 0)
    }

    pub async fn add_attr_group_by_name(
        &self,
        entity_name: &str,
        group_name: &str,
        attr_table: &str,
    ) -> Result<AttrGroup, AppError> {
        let entity = self
            .find_active_entity(entity_name)
            .await?
            .ok_or_else(|| AppError::EntityNotFound(entity_name.to_string()))?;
        self.add_attr_group_by_id(entity.entity_idx, group_name, attr_table)
            .await
    }

    pub async fn add_attr_group_by_id(
        &self,
        entity_idx: i64,
        group_name: &str,
        attr_table: &str,
    ) -> Result<AttrGroup, AppError> {
        if attr_table.is_empty() {
            return Err(AppError::Validation("attr table is required".to_string()));
        }

        let result = self
            .session
            .execute(
                "INSERT INTO meta_entity_attr_group (entity_idx, attr_table, group_name) VALUES (?,?,?)",
                &[json!(entity_idx), json!(attr_table), json!(group_name)],
            )
            .await?;

        tracing::info!(
            "Added attr group '{}' (table '{}') to entity #{}",
            group_name,
            attr_table,
            entity_idx
        );
        Ok(AttrGroup {
            group_idx: result.last_insert_id.unwrap_or_default(),
            entity_idx,
            attr_table: attr_table.to_string(),
            group_name: Some(group_name.to_string()),
            description: None,
        })
    }

    pub async fn find_active_tenant(&self, tenant_uid: &str) -> Result<Option<Tenant>, AppError> {
        let rows = self
            .session
            .query(
                "SELECT tenant_idx, tenant_uid, name, driver, data_source, environment, status \
                 FROM meta_tenant WHERE tenant_uid = ? AND status = ?",
                &[json!(tenant_uid), json!(STATUS_ACTIVE)],
            )
            .await?;
        rows.into_iter().next().map(from_row).transpose()
    }

    /// Register a tenant under a fresh uid
    pub async fn register_tenant(
        &self,
        name: &str,
        driver: Driver,
        data_source: &str,
        environment: Option<&str>,
    ) -> Result<Tenant, AppError> {
        let tenant_uid = uuid::Uuid::new_v4().to_string();
        let result = self
            .session
            .execute(
                "INSERT INTO meta_tenant (tenant_uid, name, driver, data_source, environment, status) \
                 VALUES (?,?,?,?,?,?)",
                &[
                    json!(tenant_uid),
                    json!(name),
                    json!(driver.as_str()),
                    json!(data_source),
                    json!(environment),
                    json!(STATUS_ACTIVE),
                ],
            )
            .await?;

        tracing::info!("Registered tenant '{}' ({})", name, tenant_uid);
        Ok(Tenant {
            tenant_idx: result.last_insert_id.unwrap_or_default(),
            tenant_uid,
            name: name.to_string(),
            driver: driver.as_str().to_string(),
            data_source: data_source.to_string(),
            environment: environment.map(str::to_string),
            status: STATUS_ACTIVE,
        })
    }
}

fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, AppError> {
    serde_json::from_value(Value::Object(row))
        .map_err(|e| AppError::Database(format!("Malformed catalog row: {}", e)))
}
