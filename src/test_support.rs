// Fixtures shared by the unit tests: the user / user_department / user_profile entity
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::api::middleware::AppError;
use crate::models::entity::{AttrGroup, Entity, STATUS_ACTIVE};
use crate::models::entity_meta::EntityMeta;
use crate::models::schema::{ColumnSchema, IndexSchema, TableSchema};
use crate::services::database::{DbSession, DbTransaction, ExecResult, Row, SqliteSession};
use crate::storage::CatalogStore;

pub const USER_DDL: &str = r#"
    CREATE TABLE user (
        user_idx INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL,
        email VARCHAR(128)
    );
    CREATE UNIQUE INDEX uq_user_email ON user(email);
    CREATE TABLE user_department (
        user_idx INTEGER PRIMARY KEY,
        dept_name TEXT NOT NULL
    );
    CREATE TABLE user_profile (
        user_idx INTEGER PRIMARY KEY,
        bio TEXT,
        age INTEGER
    );
"#;

pub fn sample_entity() -> Entity {
    Entity {
        entity_idx: 4,
        entity_name: "user".to_string(),
        description: None,
        pk_attr_table: "user".to_string(),
        pk_attr_column: "user_idx".to_string(),
        status: STATUS_ACTIVE,
    }
}

pub fn sample_group(group_idx: i64, attr_table: &str) -> AttrGroup {
    AttrGroup {
        group_idx,
        entity_idx: 4,
        attr_table: attr_table.to_string(),
        group_name: Some(attr_table.to_string()),
        description: None,
    }
}

/// Table whose first column is `pk`
pub fn table(name: &str, cols: &[(&str, &str)], pk: &str) -> TableSchema {
    let mut table = TableSchema::new(name);
    for (col, declared) in cols {
        let mut column = ColumnSchema::from_declared_type(col, declared);
        column.is_primary_key = *col == pk;
        column.nullable = *col != pk;
        table.columns.push(column);
    }
    table
}

/// Schemas matching `USER_DDL`
pub fn sample_tables() -> HashMap<String, TableSchema> {
    let mut user = table(
        "user",
        &[("user_idx", "INTEGER"), ("name", "TEXT"), ("email", "VARCHAR(128)")],
        "user_idx",
    );
    user.columns[0].is_auto_increment = true;
    user.indexes.push(IndexSchema {
        name: "uq_user_email".to_string(),
        unique: true,
        columns: vec!["email".to_string()],
    });

    let department = table(
        "user_department",
        &[("user_idx", "INTEGER"), ("dept_name", "TEXT")],
        "user_idx",
    );
    let profile = table(
        "user_profile",
        &[("user_idx", "INTEGER"), ("bio", "TEXT"), ("age", "INTEGER")],
        "user_idx",
    );

    [user, department, profile]
        .into_iter()
        .map(|t| (t.name.clone(), t))
        .collect()
}

pub fn sample_meta() -> EntityMeta {
    let groups = vec![
        sample_group(1, "user_department"),
        sample_group(2, "user_profile"),
    ];
    let mut meta = EntityMeta::new(sample_entity(), groups);
    meta.attach_schemas(&sample_tables())
        .expect("sample schemas attach");
    meta
}

/// In-memory database with the catalog tables and the `user` entity registered
pub async fn user_store(label: &str) -> Arc<SqliteSession> {
    let session = SqliteSession::open_in_memory(label).expect("open in-memory sqlite");
    let store = CatalogStore::new(&session);
    store.init_catalog_tables().await.expect("init catalog");
    session.execute_batch(USER_DDL).await.expect("create user tables");
    store
        .register_entity("user", Some("people"), "user", "user_idx")
        .await
        .expect("register user");
    store
        .add_attr_group_by_name("user", "department", "user_department")
        .await
        .expect("add department group");
    store
        .add_attr_group_by_name("user", "profile", "user_profile")
        .await
        .expect("add profile group");
    Arc::new(session)
}

/// Session wrapper logging every write statement, optionally failing some of them
pub struct RecordingSession {
    inner: Arc<dyn DbSession>,
    log: Arc<Mutex<Vec<String>>>,
    fail_on: Option<String>,
}

impl RecordingSession {
    pub fn new(inner: Arc<dyn DbSession>) -> Self {
        Self {
            inner,
            log: Arc::new(Mutex::new(Vec::new())),
            fail_on: None,
        }
    }

    /// Fail any statement containing `pattern`
    pub fn failing_on(inner: Arc<dyn DbSession>, pattern: &str) -> Self {
        Self {
            fail_on: Some(pattern.to_string()),
            ..Self::new(inner)
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }
}

fn record(
    log: &Mutex<Vec<String>>,
    fail_on: &Option<String>,
    sql: &str,
) -> Result<(), AppError> {
    log.lock().unwrap().push(sql.to_string());
    match fail_on {
        Some(pattern) if sql.contains(pattern.as_str()) => {
            Err(AppError::Database(format!("injected failure: {}", sql)))
        }
        _ => Ok(()),
    }
}

#[async_trait::async_trait]
impl DbSession for RecordingSession {
    fn driver(&self) -> &str {
        self.inner.driver()
    }

    fn data_source(&self) -> &str {
        self.inner.data_source()
    }

    async fn introspect(&self) -> Result<Vec<TableSchema>, AppError> {
        self.inner.introspect().await
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, AppError> {
        self.inner.query(sql, args).await
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, AppError> {
        record(&self.log, &self.fail_on, sql)?;
        self.inner.execute(sql, args).await
    }

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, AppError> {
        record(&self.log, &None, "BEGIN")?;
        Ok(Box::new(RecordingTransaction {
            inner: self.inner.begin().await?,
            log: self.log.clone(),
            fail_on: self.fail_on.clone(),
        }))
    }
}

struct RecordingTransaction {
    inner: Box<dyn DbTransaction>,
    log: Arc<Mutex<Vec<String>>>,
    fail_on: Option<String>,
}

#[async_trait::async_trait]
impl DbTransaction for RecordingTransaction {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<ExecResult, AppError> {
        record(&self.log, &self.fail_on, sql)?;
        self.inner.execute(sql, args).await
    }

    async fn commit(self: Box<Self>) -> Result<(), AppError> {
        record(&self.log, &None, "COMMIT")?;
        self.inner.commit().await
    }

    async fn rollback(self: Box<Self>) -> Result<(), AppError> {
        record(&self.log, &None, "ROLLBACK")?;
        self.inner.rollback().await
    }
}
