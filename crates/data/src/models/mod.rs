//! Data models for the tick feature store.

pub mod feature_vector;
pub mod tick;

pub use feature_vector::{volume_to_column, FeatureVector, FEATURE_COLUMNS};
pub use tick::{parse_timestamp, RawTick, TickMessage, TickParseError, WireVolume};
