// MySQL session using the mysql_async connection pool
use std::collections::HashMap;

use mysql_async::{prelude::*, Conn, Opts, Params, Pool, Row as MySqlRow, Value as MySqlValue};
use serde_json::{json, Map, Value};
use url::Url;

use crate::api::middleware::AppError;
use crate::models::schema::{ColumnSchema, IndexSchema, TableSchema};
use crate::services::database::adapter::{DbSession, DbTransaction, ExecResult, Row};

pub struct MySqlSession {
    pool: Pool,
    data_source: String,
}

impl MySqlSession {
    pub fn new(data_source: &str) -> Result<Self, AppError> {
        // Validate MySQL URL format
        let url = Url::parse(data_source)
            .map_err(|e| AppError::Validation(format!("Invalid MySQL URL: {}", e)))?;

        if url.scheme() != "mysql" && url.scheme() != "mariadb" {
            return Err(AppError::Validation(
                "URL must use mysql:// or mariadb:// scheme".to_string(),
            ));
        }

        let opts = Opts::from_url(&data_source.replacen("mariadb://", "mysql://", 1))
            .map_err(|e| AppError::Validation(format!("Invalid MySQL URL: {}", e)))?;

        Ok(Self {
            pool: Pool::new(opts),
            data_source: data_source.to_string(),
        })
    }

    /// Get a connection from the pool
    async fn get_conn(&self) -> Result<Conn, AppError> {
        self.pool.get_conn().await.map_err(|e| {
            AppError::Connection(format!("Failed to get MySQL connection from pool: {}", e))
        })
    }
}

#[async_trait::async_trait]
impl DbSession for MySqlSession {
    fn driver(&self) -> &str {
        "mysql"
    }

    fn data_source(&self) -> &str {
        &self.data_source
    }

    async fn introspect(&self) -> Result<Vec<TableSchema>, AppError> {
        let mut conn = self.get_conn().await?;
        introspect_tables(&mut conn).await
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, AppError> {
        let mut conn = self.get_conn().await?;
        let rows: Vec<MySqlRow> = conn.exec(sql, to_params(args)).await?;
        Ok(rows.into_iter().map(row_to_json).collect())
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, AppError> {
        let mut conn = self.get_conn().await?;
        exec_on(&mut conn, sql, args).await
    }

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, AppError> {
        let mut conn = self.get_conn().await?;
        conn.query_drop("START TRANSACTION").await?;
        Ok(Box::new(MySqlTransaction { conn: Some(conn) }))
    }
}

/// Transaction pinned to one pooled connection.
/// The pool resets connections it gets back, discarding an unfinished transaction.
pub struct MySqlTransaction {
    conn: Option<Conn>,
}

impl MySqlTransaction {
    fn conn(&mut self) -> Result<&mut Conn, AppError> {
        self.conn
            .as_mut()
            .ok_or_else(|| AppError::Internal("transaction already finished".to_string()))
    }
}

#[async_trait::async_trait]
impl DbTransaction for MySqlTransaction {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<ExecResult, AppError> {
        let conn = self.conn()?;
        exec_on(conn, sql, args).await
    }

    async fn commit(mut self: Box<Self>) -> Result<(), AppError> {
        let conn = self.conn()?;
        conn.query_drop("COMMIT").await?;
        self.conn = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), AppError> {
        let conn = self.conn()?;
        conn.query_drop("ROLLBACK").await?;
        self.conn = None;
        Ok(())
    }
}

impl Drop for MySqlTransaction {
    fn drop(&mut self) {
        if self.conn.is_some() {
            tracing::warn!("Unfinished MySQL transaction returned to the pool");
        }
    }
}

async fn exec_on(conn: &mut Conn, sql: &str, args: &[Value]) -> Result<ExecResult, AppError> {
    // Statements are prepared once per connection and reused from its statement cache
    conn.exec_drop(sql, to_params(args)).await?;
    Ok(ExecResult {
        affected: conn.affected_rows(),
        last_insert_id: conn.last_insert_id().map(|id| id as i64),
    })
}

fn to_params(args: &[Value]) -> Params {
    if args.is_empty() {
        Params::Empty
    } else {
        Params::Positional(args.iter().map(json_to_mysql).collect())
    }
}

fn json_to_mysql(value: &Value) -> MySqlValue {
    match value {
        Value::Null => MySqlValue::NULL,
        Value::Bool(b) => MySqlValue::Int(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                MySqlValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                MySqlValue::UInt(u)
            } else {
                MySqlValue::Double(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => MySqlValue::Bytes(s.clone().into_bytes()),
        Value::Array(_) | Value::Object(_) => MySqlValue::Bytes(value.to_string().into_bytes()),
    }
}

fn row_to_json(row: MySqlRow) -> Row {
    let mut obj = Map::new();
    for (idx, column) in row.columns_ref().iter().enumerate() {
        let value = match row.as_ref(idx) {
            Some(v) => mysql_value_to_json(v.clone()),
            None => Value::Null,
        };
        obj.insert(column.name_str().to_string(), value);
    }
    obj
}

fn mysql_value_to_json(mysql_val: MySqlValue) -> Value {
    match mysql_val {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(s) => json!(s),
            Err(_) => Value::Null,
        },
        MySqlValue::Int(i) => json!(i),
        MySqlValue::UInt(u) => json!(u),
        MySqlValue::Float(f) => json!(f),
        MySqlValue::Double(d) => json!(d),
        MySqlValue::Date(y, m, d, h, min, s, _) => {
            json!(format!("{:04}-{:02}-{:02} {:02}:{:02}:{:02}", y, m, d, h, min, s))
        }
        MySqlValue::Time(is_neg, d, h, m, s, _) => {
            let sign = if is_neg { "-" } else { "" };
            let total_hours = d * 24 + h as u32;
            json!(format!("{}{}:{:02}:{:02}", sign, total_hours, m, s))
        }
    }
}

type ColumnRow = (
    String,
    String,
    String,
    Option<u64>,
    Option<u64>,
    Option<u64>,
    String,
    Option<String>,
    String,
    String,
    String,
);

async fn introspect_tables(conn: &mut Conn) -> Result<Vec<TableSchema>, AppError> {
    let columns: Vec<ColumnRow> = conn
        .query(
            r#"
            SELECT
                TABLE_NAME,
                COLUMN_NAME,
                DATA_TYPE,
                CHARACTER_MAXIMUM_LENGTH,
                NUMERIC_PRECISION,
                NUMERIC_SCALE,
                IS_NULLABLE,
                COLUMN_DEFAULT,
                COLUMN_KEY,
                EXTRA,
                COLUMN_COMMENT
            FROM information_schema.COLUMNS
            WHERE TABLE_SCHEMA = DATABASE()
            ORDER BY TABLE_NAME, ORDINAL_POSITION
            "#,
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to get columns: {}", e)))?;

    let mut tables: Vec<TableSchema> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();
    for (table, name, data_type, char_len, precision, scale, nullable, default, key, extra, comment) in
        columns
    {
        let pos = *positions.entry(table.clone()).or_insert_with(|| {
            tables.push(TableSchema::new(table.clone()));
            tables.len() - 1
        });
        let (length1, length2) = match char_len {
            Some(len) => (Some(len as i64), None),
            None => (precision.map(|p| p as i64), scale.map(|s| s as i64)),
        };
        tables[pos].columns.push(ColumnSchema {
            name,
            sql_type: data_type.to_lowercase(),
            length1,
            length2,
            nullable: nullable == "YES",
            default_value: default,
            is_primary_key: key == "PRI",
            is_auto_increment: extra.contains("auto_increment"),
            comment: (!comment.is_empty()).then_some(comment),
        });
    }

    let index_rows: Vec<(String, String, i64, String)> = conn
        .query(
            r#"
            SELECT TABLE_NAME, INDEX_NAME, NON_UNIQUE, COLUMN_NAME
            FROM information_schema.STATISTICS
            WHERE TABLE_SCHEMA = DATABASE() AND INDEX_NAME <> 'PRIMARY'
            ORDER BY TABLE_NAME, INDEX_NAME, SEQ_IN_INDEX
            "#,
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to get indexes: {}", e)))?;

    for (table, index_name, non_unique, column) in index_rows {
        let Some(&pos) = positions.get(&table) else {
            continue;
        };
        let indexes = &mut tables[pos].indexes;
        match indexes.iter_mut().find(|idx| idx.name == index_name) {
            Some(idx) => idx.columns.push(column),
            None => indexes.push(IndexSchema {
                name: index_name,
                unique: non_unique == 0,
                columns: vec![column],
            }),
        }
    }

    tracing::debug!("Introspected {} MySQL tables", tables.len());
    Ok(tables)
}
