// Database sessions for tenant data sources
pub mod adapter;
pub mod mysql;
pub mod sqlite;

pub use adapter::{DbSession, DbTransaction, ExecResult, Row};
pub use mysql::MySqlSession;
pub use sqlite::SqliteSession;

use crate::api::middleware::AppError;
use std::str::FromStr;
use std::sync::Arc;

/// Supported drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Sqlite,
    MySql,
}

impl FromStr for Driver {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Driver::Sqlite),
            "mysql" | "mariadb" => Ok(Driver::MySql),
            _ => Err(AppError::Validation(format!("Unsupported database driver: {}", s))),
        }
    }
}

impl Driver {
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Sqlite => "sqlite",
            Driver::MySql => "mysql",
        }
    }
}

/// Factory function to open a session for a data source
pub fn open_session(driver: Driver, data_source: &str) -> Result<Arc<dyn DbSession>, AppError> {
    match driver {
        Driver::Sqlite => Ok(Arc::new(SqliteSession::open(data_source)?)),
        Driver::MySql => Ok(Arc::new(MySqlSession::new(data_source)?)),
    }
}
