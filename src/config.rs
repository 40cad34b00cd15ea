use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub tenant: TenantConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Default tenant and how requests select another one
#[derive(Debug, Clone, Deserialize)]
pub struct TenantConfig {
    pub default_driver: String,
    pub default_data_source: String,
    /// Request header carrying the tenant uid
    pub header: String,
    /// Uid that always maps to the default tenant
    pub default_uid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

/// Environment variable -> config key
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("HOST", "server.host"),
    ("PORT", "server.port"),
    ("RUST_LOG", "logging.level"),
    ("TENANT_DRIVER", "tenant.default_driver"),
    ("TENANT_DATA_SOURCE", "tenant.default_data_source"),
    ("TENANT_HEADER", "tenant.header"),
    ("TENANT_DEFAULT_UID", "tenant.default_uid"),
    ("META_CACHE_MAX_ENTRIES", "cache.max_entries"),
    ("META_CACHE_TTL_SECS", "cache.ttl_secs"),
];

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // .env must be loaded before the variables are read
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from defaults plus whatever `lookup` returns for each override variable
    pub fn from_lookup<F>(lookup: F) -> Result<Self, config::ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("logging.level", "info")?
            .set_default("tenant.default_driver", "sqlite")?
            .set_default("tenant.default_data_source", "./entity_store.db")?
            .set_default("tenant.header", "X-Tenant-UID")?
            .set_default("tenant.default_uid", "00000000-0000-0000-0000-000000000000")?
            .set_default("cache.max_entries", 1024)?
            .set_default("cache.ttl_secs", 300)?;

        for &(var, key) in ENV_OVERRIDES {
            if let Some(value) = lookup(var) {
                builder = builder.set_override(key, value)?;
            }
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
