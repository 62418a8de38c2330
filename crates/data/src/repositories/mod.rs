//! Database repositories for the tick feature store.
//!
//! Each repository provides typed access to a specific table with
//! batch insert capabilities and time-range queries.

pub mod feature_repo;

pub use feature_repo::{FeatureRepository, InsertError};
