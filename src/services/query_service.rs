use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::api::middleware::AppError;
use crate::models::query::Query;
use crate::services::catalog::SchemaCatalog;
use crate::services::database::{DbSession, Row};
use crate::services::sql_compiler::SqlCompiler;
use crate::validation::sql_validator::SqlValidator;

#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub sql: String,
    pub args: Vec<Value>,
    pub rows: Vec<Row>,
    pub row_count: usize,
    pub execution_time_ms: u128,
}

/// Read path: query document -> compiled SELECT -> rows
pub struct QueryService {
    catalog: Arc<SchemaCatalog>,
}

impl QueryService {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn execute(&self, session: &dyn DbSession, query: &Query) -> Result<QueryOutcome, AppError> {
        let start_time = Instant::now();

        let entity = SqlCompiler::entity_name(query)?;
        let meta = self.catalog.acquire_meta(session, entity).await?;
        let compiled = SqlCompiler::compile_select(query, &meta)?;

        // the compiler only emits SELECTs; re-check before the text reaches the driver
        SqlValidator::validate_select_only(&compiled.sql)?;
        tracing::info!("Executing query on entity '{}': {}", entity, compiled.sql);

        let rows = session.query(&compiled.sql, &compiled.args).await?;

        Ok(QueryOutcome {
            sql: compiled.sql,
            args: compiled.args,
            row_count: rows.len(),
            rows,
            execution_time_ms: start_time.elapsed().as_millis(),
        })
    }
}
