//! Data storage for the tick feature store.
//!
//! This crate provides:
//! - Data models for raw ticks and engineered feature rows
//! - Database client and schema bootstrap for `PostgreSQL`
//! - A typed repository for the append-only feature history
//! - A Redis cache for the freshest feature vector per symbol

pub mod cache;
pub mod database;
pub mod models;
pub mod repositories;

pub use cache::RedisFeatureCache;
pub use database::{DatabaseClient, FEATURE_TABLE, FEATURE_UNIQUE_INDEX};

pub use models::{
    parse_timestamp, volume_to_column, FeatureVector, RawTick, TickMessage, TickParseError,
    FEATURE_COLUMNS,
};

pub use repositories::{FeatureRepository, InsertError};
