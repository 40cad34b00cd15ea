// Database session abstraction shared by the SQLite and MySQL drivers
use crate::api::middleware::AppError;
use crate::models::schema::TableSchema;
use serde_json::{Map, Value};

/// One result row, column name to JSON value
pub type Row = Map<String, Value>;

/// Outcome of a data-modifying statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub affected: u64,
    /// Key generated by the statement, when the driver reports one
    pub last_insert_id: Option<i64>,
}

/// A connection to one tenant data source
#[async_trait::async_trait]
pub trait DbSession: Send + Sync {
    /// Driver name (`sqlite`, `mysql`)
    fn driver(&self) -> &str;

    /// Connection string identifying the data source
    fn data_source(&self) -> &str;

    /// Read every table definition of the data source
    async fn introspect(&self) -> Result<Vec<TableSchema>, AppError>;

    /// Run a row-returning statement with positional `?` arguments
    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>, AppError>;

    /// Run a data-modifying statement outside any explicit transaction
    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult, AppError>;

    async fn begin(&self) -> Result<Box<dyn DbTransaction>, AppError>;
}

/// An open transaction. Dropping it without `commit` rolls it back.
#[async_trait::async_trait]
pub trait DbTransaction: Send {
    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<ExecResult, AppError>;

    async fn commit(self: Box<Self>) -> Result<(), AppError>;

    async fn rollback(self: Box<Self>) -> Result<(), AppError>;
}
