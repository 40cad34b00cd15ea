pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod storage;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use models::*;
pub use services::*;
pub use validation::*;
