//! Application configuration

pub mod loader;
pub mod types;

pub use loader::{load_config, load_from_env, parse_interval};
pub use types::{
    AppConfig, AppSettings, DatabaseConfig, FeeRates, IdempotencyConfig, PricingConfig,
    ServerConfig,
};
