pub mod cache; // Bounded TTL + LRU cache shared by the catalog and tenant lookups
pub mod catalog;
pub mod database; // SQLite and MySQL sessions
pub mod query_service;
pub mod sql_compiler;
pub mod tenant_registry;
pub mod write_service;

pub use cache::{CacheStats, TtlCache};
pub use catalog::SchemaCatalog;
pub use query_service::{QueryOutcome, QueryService};
pub use sql_compiler::{CompiledSql, SqlCompiler};
pub use tenant_registry::TenantRegistry;
pub use write_service::{InsertOutcome, UpdateOutcome, WriteService};
