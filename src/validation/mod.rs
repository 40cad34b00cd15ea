pub mod query_parser;
pub mod sql_validator;

pub use query_parser::{parse_query, parse_query_value};
pub use sql_validator::SqlValidator;
