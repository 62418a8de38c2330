//! Shared configuration for the tick feature store.
//!
//! Configuration is layered with figment: built-in defaults, then
//! `config/Config.toml`, then `FEATURES_`-prefixed environment variables.

pub mod config;
pub mod config_loader;

pub use config::{
    flush_check_interval, AppConfig, DatabaseConfig, IngestConfig, ProcessorConfig, RedisConfig,
};
pub use config_loader::ConfigLoader;
