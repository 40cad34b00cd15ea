pub mod data_table;
pub mod entity;
pub mod entity_meta;
pub mod query;
pub mod schema;

pub use data_table::{ColumnKeyVal, DataTable};
pub use entity::{AttrGroup, Entity, Tenant};
pub use entity_meta::{EntityMeta, IndexedColumn, JMeta};
pub use query::Query;
pub use schema::{ColumnSchema, IndexSchema, TableSchema};
