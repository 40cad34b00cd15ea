// Transactional multi-table writes for vertically partitioned entities
//
// Insert writes the primary table first so the shared key exists before any
// attribute table row references it. Update touches each partition with one
// statement template bound per row. Both run inside a single transaction and
// roll back on the first failure.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::api::middleware::AppError;
use crate::models::data_table::{ColumnKeyVal, DataTable};
use crate::models::entity_meta::EntityMeta;
use crate::services::catalog::SchemaCatalog;
use crate::services::database::{DbSession, DbTransaction};
use crate::services::sql_compiler::SqlCompiler;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InsertOutcome {
    /// Key column followed by the primary table's unique columns present in the payload
    pub cols: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub affected: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateOutcome {
    pub affected: u64,
}

/// How the primary key of inserted rows is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySource {
    /// Every row carries its key
    Payload,
    /// Every row lacks a key and the database assigns it
    Generated,
}

pub struct WriteService {
    catalog: Arc<SchemaCatalog>,
}

impl WriteService {
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    pub async fn insert(
        &self,
        session: &dyn DbSession,
        entity: &str,
        mut table: DataTable,
    ) -> Result<InsertOutcome, AppError> {
        if table.is_empty() {
            return Err(AppError::Validation("No rows to insert".to_string()));
        }

        let meta = self.catalog.acquire_meta(session, entity).await?;
        let key = meta.primary_column().to_string();
        let key_idx = table.add_column(&key);
        let partitions = table.division_columns_key_val(&meta)?;
        let key_source = Self::key_source(&meta, &table, key_idx)?;

        let primary = partitions
            .iter()
            .find(|p| meta.is_primary_table(&p.table))
            .ok_or_else(|| AppError::Internal("primary partition missing".to_string()))?;
        if key_source == KeySource::Generated && primary.val_cols.is_empty() {
            return Err(AppError::Validation(
                "No values provided for the primary table".to_string(),
            ));
        }

        tracing::info!(
            "Inserting {} rows into entity '{}' across {} tables",
            table.len(),
            entity,
            partitions.len()
        );

        let mut tx = session.begin().await?;
        let result = Self::insert_partitions(
            tx.as_mut(),
            &meta,
            &mut table,
            &partitions,
            key_idx,
            key_source,
        )
        .await;

        let affected = match result {
            Ok(affected) => affected,
            Err(e) => {
                Self::abort(tx, entity, &e).await;
                return Err(e);
            }
        };
        tx.commit().await?;

        let cols: Vec<String> = std::iter::once(key.clone())
            .chain(meta.filter_primary_unique_cols(table.cols()))
            .collect();
        let idx = table.columns_index(&cols)?;
        let rows = (0..table.len()).map(|r| table.fetch_row(r, &idx)).collect();

        Ok(InsertOutcome {
            cols,
            rows,
            affected,
        })
    }

    /// Keys must be all present or, for an auto-increment key, all absent
    fn key_source(meta: &EntityMeta, table: &DataTable, key_idx: usize) -> Result<KeySource, AppError> {
        let missing = (0..table.len())
            .filter(|&r| table.value(r, key_idx).is_none_or(Value::is_null))
            .count();

        if missing == 0 {
            return Ok(KeySource::Payload);
        }
        if !meta.has_auto_increment() {
            return Err(AppError::Validation(format!(
                "Key column '{}' is required for entity '{}' ({} rows without a key)",
                meta.primary_column(),
                meta.name(),
                missing
            )));
        }
        if missing != table.len() {
            return Err(AppError::Validation(format!(
                "Key column '{}' must be given for every row or for none",
                meta.primary_column()
            )));
        }
        Ok(KeySource::Generated)
    }

    async fn insert_partitions(
        tx: &mut dyn DbTransaction,
        meta: &EntityMeta,
        table: &mut DataTable,
        partitions: &[ColumnKeyVal],
        key_idx: usize,
        key_source: KeySource,
    ) -> Result<u64, AppError> {
        let mut affected = 0;

        for partition in partitions {
            let generate = key_source == KeySource::Generated && meta.is_primary_table(&partition.table);
            let cols = if generate {
                partition.val_cols.clone()
            } else {
                partition.all_cols()
            };
            let sql = SqlCompiler::build_insert(&partition.table, &cols);
            let idx = table.columns_index(&cols)?;

            for row in 0..table.len() {
                let args = table.fetch_row(row, &idx);
                let result = tx
                    .execute(&sql, &args)
                    .await
                    .map_err(|e| write_error(&partition.table, e))?;
                affected += result.affected;

                if generate {
                    let id = result.last_insert_id.ok_or_else(|| AppError::Write {
                        table: partition.table.clone(),
                        message: "database returned no generated key".to_string(),
                    })?;
                    table.update_cell(row, key_idx, Value::from(id))?;
                }
            }
            tracing::debug!("Inserted {} rows into '{}'", table.len(), partition.table);
        }
        Ok(affected)
    }

    pub async fn update(
        &self,
        session: &dyn DbSession,
        entity: &str,
        table: &DataTable,
    ) -> Result<UpdateOutcome, AppError> {
        if table.is_empty() {
            return Err(AppError::Validation("No rows to update".to_string()));
        }

        let meta = self.catalog.acquire_meta(session, entity).await?;
        let key = meta.primary_column();
        let Some(key_idx) = table.column_index(key) else {
            return Err(AppError::NotImplemented(format!(
                "update of entity '{}' without key column '{}'",
                entity, key
            )));
        };
        if (0..table.len()).any(|r| table.value(r, key_idx).is_none_or(Value::is_null)) {
            return Err(AppError::Validation(format!(
                "Key column '{}' is null in update payload",
                key
            )));
        }

        let partitions: Vec<ColumnKeyVal> = table
            .division_columns_key_val(&meta)?
            .into_iter()
            .filter(|p| !p.val_cols.is_empty())
            .collect();
        tracing::info!(
            "Updating {} rows of entity '{}' across {} tables",
            table.len(),
            entity,
            partitions.len()
        );

        let mut tx = session.begin().await?;
        match Self::update_partitions(tx.as_mut(), table, &partitions).await {
            Ok(affected) => {
                tx.commit().await?;
                Ok(UpdateOutcome { affected })
            }
            Err(e) => {
                Self::abort(tx, entity, &e).await;
                Err(e)
            }
        }
    }

    async fn update_partitions(
        tx: &mut dyn DbTransaction,
        table: &DataTable,
        partitions: &[ColumnKeyVal],
    ) -> Result<u64, AppError> {
        let mut affected = 0;

        for partition in partitions {
            let sql = SqlCompiler::build_update(&partition.table, &partition.val_cols, &partition.key_cols);
            let bound: Vec<&String> = partition
                .val_cols
                .iter()
                .chain(partition.key_cols.iter())
                .collect();
            let idx = table.columns_index(&bound)?;

            for row in 0..table.len() {
                let args = table.fetch_row(row, &idx);
                let result = tx
                    .execute(&sql, &args)
                    .await
                    .map_err(|e| write_error(&partition.table, e))?;
                affected += result.affected;
            }
        }
        Ok(affected)
    }

    async fn abort(tx: Box<dyn DbTransaction>, entity: &str, cause: &AppError) {
        tracing::warn!("Rolling back write on entity '{}': {}", entity, cause);
        if let Err(e) = tx.rollback().await {
            tracing::error!("Rollback failed for entity '{}': {}", entity, e);
        }
    }
}

/// Constraint violations pass through untouched; anything else names the table
fn write_error(table: &str, err: AppError) -> AppError {
    match err {
        AppError::Constraint(_) | AppError::Write { .. } => err,
        other => AppError::Write {
            table: table.to_string(),
            message: other.to_string(),
        },
    }
}
