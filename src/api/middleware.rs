use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Application error types
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed JSON or query/write DSL shape
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Entity '{0}' not found")]
    EntityNotFound(String),

    #[error("Attr table '{table}' for entity '{entity}' not found")]
    TableNotFound { table: String, entity: String },

    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    /// Structural problem in resolved entity metadata
    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A statement of a multi-table write failed; the transaction was rolled back
    #[error("Write to '{table}' failed: {message}")]
    Write { table: String, message: String },

    /// Unique / foreign-key / not-null violation, message as reported by the driver
    #[error("{0}")]
    Constraint(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable kind, reported in the response detail
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Parse(_) => "PARSE_ERROR",
            AppError::EntityNotFound(_) => "ENTITY_NOT_FOUND",
            AppError::TableNotFound { .. } => "TABLE_NOT_FOUND",
            AppError::ColumnNotFound(_) => "COLUMN_NOT_FOUND",
            AppError::Schema(_) => "SCHEMA_ERROR",
            AppError::NotImplemented(_) => "NOT_IMPLEMENTED",
            AppError::Write { .. } => "WRITE_ERROR",
            AppError::Constraint(_) => "CONSTRAINT_VIOLATION",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Parse(_)
            | AppError::ColumnNotFound(_)
            | AppError::Validation(_)
            | AppError::Connection(_) => StatusCode::BAD_REQUEST,
            AppError::EntityNotFound(_) | AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Constraint(_) => StatusCode::CONFLICT,
            AppError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            AppError::TableNotFound { .. }
            | AppError::Schema(_)
            | AppError::Write { .. }
            | AppError::Database(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Negative response code; keyless bulk update and other unsupported shapes use -2
    pub fn response_code(&self) -> i32 {
        match self {
            AppError::NotImplemented(_) => -2,
            _ => -1,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            AppError::TableNotFound { table, entity } => {
                Some(serde_json::json!({ "table": table, "entity": entity }))
            }
            AppError::Write { table, .. } => Some(serde_json::json!({ "table": table })),
            AppError::ColumnNotFound(col) => Some(serde_json::json!({ "column": col })),
            AppError::EntityNotFound(entity) => Some(serde_json::json!({ "entity": entity })),
            _ => None,
        }
    }
}

/// Response envelope shared by success and failure responses
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ApiResponse {
    pub fn new(code: i32, msg: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            msg: msg.into(),
            data,
        }
    }

    pub fn success(data: Value) -> Self {
        Self::new(0, "ok", Some(data))
    }
}

/// Error detail carried in `data` of a failed response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::info!("Request rejected: {}", self);
        }

        let detail = ErrorDetail {
            error: self.kind().to_string(),
            details: self.details(),
        };
        let body = ApiResponse::new(
            self.response_code(),
            self.to_string(),
            serde_json::to_value(detail).ok(),
        );

        (status, Json(body)).into_response()
    }
}

/// Convert anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Convert rusqlite::Error to AppError, keeping constraint violations distinguishable
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                AppError::Constraint(msg.clone().unwrap_or_else(|| err.to_string()))
            }
            _ => AppError::Database(err.to_string()),
        }
    }
}

/// Convert mysql_async::Error to AppError
impl From<mysql_async::Error> for AppError {
    fn from(err: mysql_async::Error) -> Self {
        match &err {
            // 1048 not null, 1062 duplicate key, 1451/1452 foreign key
            mysql_async::Error::Server(server)
                if matches!(server.code, 1048 | 1062 | 1451 | 1452) =>
            {
                AppError::Constraint(server.message.clone())
            }
            mysql_async::Error::Server(_) => AppError::Database(err.to_string()),
            _ => AppError::Connection(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}
