// SQLite session: default tenant store and the engine behind the test suite
use std::sync::Arc;

use rusqlite::types::{Value as SqliteValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Map, Value};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api::middleware::AppError;
use crate::models::schema::{ColumnSchema, IndexSchema, TableSchema};
use crate::services::database::adapter::{DbSession, DbTransaction, ExecResult, Row};

/// Single-connection SQLite session.
/// Uses tokio::Mutex so a transaction can own the connection across awaits.
pub struct SqliteSession {
    conn: Arc<Mutex<Connection>>,
    data_source: String,
}

impl SqliteSession {
    /// Open a database file; accepts `sqlite:` / `sqlite://` prefixed paths
    pub fn open(data_source: &str) -> Result<Self, AppError> {
        let clean_path = data_source
            .trim_start_matches("sqlite:")
            .trim_start_matches("//");

        let conn = Connection::open(clean_path).map_err(|e| {
            AppError::Connection(format!("Failed to open SQLite database '{}': {}", clean_path, e))
        })?;
        Self::from_connection(conn, data_source)
    }

    /// Private in-memory database; `label` keeps cache identities apart
    pub fn open_in_memory(label: &str) -> Result<Self, AppError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AppError::Connection(format!("Failed to open in-memory SQLite: {}", e)))?;
        Self::from_connection(conn, &format!("memory:{}", label))
    }

    fn from_connection(conn: Connection, data_source: &str) -> Result<Self, AppError> {
        // Enable foreign key constraints
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            data_source: data_source.to_string(),
        })
    }

    /// Run several `;`-separated statements without arguments
    pub async fn execute_batch(&self, sql: &str) -> Result<(), AppError> {
        let conn = self.conn.lock().await;
        conn.execute_batch(sql)?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DbSession for SqliteSession {
    fn driver(&self) -> &str {
        "sqlite"
    }

    fn data_source(&self) -> &str {
        &self.data_source
    }

    async fn introspect(&self) -> Result<Vec<TableSchema>, AppError> {
        let conn = self.conn.lock().await;
        let tables = introspect_tables(&conn)?;
        tracing::debug!(
            "Introspected {} tables from {}",
            tables.len(),
            self.data_source
        );
        Ok(tables)
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, AppError> {
        let conn = self.conn.lock().await;
        Ok(query_rows(&conn, sql, args)?)
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, AppError> {
        let conn = self.conn.lock().await;
        Ok(execute_cached(&conn, sql, args)?)
    }

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, AppError> {
        let conn = self.conn.clone().lock_owned().await;
        conn.execute_batch("BEGIN")?;
        Ok(Box::new(SqliteTransaction { conn: Some(conn) }))
    }
}

/// Transaction holding the session's connection until it finishes
pub struct SqliteTransaction {
    conn: Option<OwnedMutexGuard<Connection>>,
}

impl SqliteTransaction {
    fn finish(&mut self, statement: &str) -> Result<(), AppError> {
        let Some(conn) = self.conn.take() else {
            return Err(AppError::Internal("transaction already finished".to_string()));
        };
        if let Err(e) = conn.execute_batch(statement) {
            if conn.is_autocommit() {
                return Err(e.into());
            }
            if let Err(rollback_err) = conn.execute_batch("ROLLBACK") {
                tracing::error!("Rollback after failed {} also failed: {}", statement, rollback_err);
            }
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl DbTransaction for SqliteTransaction {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<ExecResult, AppError> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| AppError::Internal("transaction already finished".to_string()))?;
        Ok(execute_cached(conn, sql, args)?)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), AppError> {
        self.finish("COMMIT")
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), AppError> {
        self.finish("ROLLBACK")
    }
}

impl Drop for SqliteTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::warn!("Rolling back unfinished SQLite transaction");
            if let Err(e) = conn.execute_batch("ROLLBACK") {
                tracing::error!("Rollback of unfinished transaction failed: {}", e);
            }
        }
    }
}

fn execute_cached(conn: &Connection, sql: &str, args: &[Value]) -> rusqlite::Result<ExecResult> {
    let mut stmt = conn.prepare_cached(sql)?;
    let affected = stmt.execute(params_from_iter(args.iter().map(json_to_sqlite)))?;
    Ok(ExecResult {
        affected: affected as u64,
        last_insert_id: Some(conn.last_insert_rowid()),
    })
}

fn query_rows(conn: &Connection, sql: &str, args: &[Value]) -> rusqlite::Result<Vec<Row>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params_from_iter(args.iter().map(json_to_sqlite)))?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut obj = Map::with_capacity(names.len());
        for (idx, name) in names.iter().enumerate() {
            obj.insert(name.clone(), sqlite_to_json(row.get_ref(idx)?));
        }
        out.push(obj);
    }
    Ok(out)
}

fn json_to_sqlite(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(b) => SqliteValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqliteValue::Integer(i),
            None => SqliteValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqliteValue::Text(s.clone()),
        Value::Array(_) | Value::Object(_) => SqliteValue::Text(value.to_string()),
    }
}

fn sqlite_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => json!(i),
        ValueRef::Real(f) => json!(f),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => json!(s),
            Err(_) => Value::Null,
        },
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn introspect_tables(conn: &Connection) -> rusqlite::Result<Vec<TableSchema>> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    names.iter().map(|name| introspect_table(conn, name)).collect()
}

fn introspect_table(conn: &Connection, name: &str) -> rusqlite::Result<TableSchema> {
    let quoted = quote_ident(name);

    // cid, name, type, notnull, dflt_value, pk
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quoted))?;
    let raw_columns = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let pk_count = raw_columns.iter().filter(|c| c.4 > 0).count();
    let mut table = TableSchema::new(name);
    for (col_name, declared, not_null, default_value, pk) in raw_columns {
        let mut column = ColumnSchema::from_declared_type(&col_name, &declared);
        column.is_primary_key = pk > 0;
        // A lone INTEGER primary key aliases the rowid and is generated on insert
        column.is_auto_increment = pk > 0 && pk_count == 1 && column.sql_type == "integer";
        column.nullable = not_null == 0 && pk == 0;
        column.default_value = default_value;
        table.columns.push(column);
    }

    // seq, name, unique, origin, partial
    let mut stmt = conn.prepare(&format!("PRAGMA index_list({})", quoted))?;
    let raw_indexes = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    for (index_name, unique, origin) in raw_indexes {
        if origin == "pk" {
            continue;
        }
        let mut stmt = conn.prepare(&format!("PRAGMA index_info({})", quote_ident(&index_name)))?;
        let columns = stmt
            .query_map([], |row| row.get::<_, Option<String>>(2))?
            .collect::<rusqlite::Result<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        table.indexes.push(IndexSchema {
            name: index_name,
            unique: unique != 0,
            columns,
        });
    }

    Ok(table)
}
