//! Engineered feature row.
//!
//! [`FeatureVector`] is the single canonical schema shared by the hot cache,
//! the durable table, and every read path. Derived columns are `Option<f64>`:
//! `None` means "not enough history" or "undefined" (e.g. a zero denominator),
//! which is distinct from a computed zero.
//!
//! Rolling columns carry a one-row lag: the value stored against row `t` is
//! computed from rows strictly before `t`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::tick::RawTick;

/// Column names in table order. Used to build inserts and selects so the
/// write and read paths cannot drift apart.
pub const FEATURE_COLUMNS: [&str; 43] = [
    "symbol",
    "timestamp",
    "open",
    "high",
    "low",
    "close",
    "volume",
    "open_1",
    "high_1",
    "low_1",
    "close_1",
    "volume_1",
    "avg_price_5",
    "avg_price_30",
    "avg_price_365",
    "ratio_avg_price_5_30",
    "ratio_avg_price_5_365",
    "ratio_avg_price_30_365",
    "avg_volume_5",
    "avg_volume_30",
    "avg_volume_365",
    "ratio_avg_volume_5_30",
    "ratio_avg_volume_5_365",
    "ratio_avg_volume_30_365",
    "std_price_5",
    "std_price_30",
    "std_price_365",
    "ratio_std_price_5_30",
    "ratio_std_price_5_365",
    "ratio_std_price_30_365",
    "std_volume_5",
    "std_volume_30",
    "std_volume_365",
    "ratio_std_volume_5_30",
    "ratio_std_volume_5_365",
    "ratio_std_volume_30_365",
    "return_1",
    "return_5",
    "return_30",
    "return_365",
    "moving_avg_5",
    "moving_avg_30",
    "moving_avg_365",
];

/// One row of engineered features for a tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct FeatureVector {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,

    // Raw OHLCV of the tick itself
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,

    // Previous tick's OHLCV
    pub open_1: Option<f64>,
    pub high_1: Option<f64>,
    pub low_1: Option<f64>,
    pub close_1: Option<f64>,
    pub volume_1: Option<i64>,

    // Rolling close means over 5 / 21 / 252 rows
    pub avg_price_5: Option<f64>,
    pub avg_price_30: Option<f64>,
    pub avg_price_365: Option<f64>,
    pub ratio_avg_price_5_30: Option<f64>,
    pub ratio_avg_price_5_365: Option<f64>,
    pub ratio_avg_price_30_365: Option<f64>,

    // Rolling volume means
    pub avg_volume_5: Option<f64>,
    pub avg_volume_30: Option<f64>,
    pub avg_volume_365: Option<f64>,
    pub ratio_avg_volume_5_30: Option<f64>,
    pub ratio_avg_volume_5_365: Option<f64>,
    pub ratio_avg_volume_30_365: Option<f64>,

    // Rolling close standard deviations
    pub std_price_5: Option<f64>,
    pub std_price_30: Option<f64>,
    pub std_price_365: Option<f64>,
    pub ratio_std_price_5_30: Option<f64>,
    pub ratio_std_price_5_365: Option<f64>,
    pub ratio_std_price_30_365: Option<f64>,

    // Rolling volume standard deviations
    pub std_volume_5: Option<f64>,
    pub std_volume_30: Option<f64>,
    pub std_volume_365: Option<f64>,
    pub ratio_std_volume_5_30: Option<f64>,
    pub ratio_std_volume_5_365: Option<f64>,
    pub ratio_std_volume_30_365: Option<f64>,

    // Simple returns over 1 / 5 / 21 / 252 rows
    pub return_1: Option<f64>,
    pub return_5: Option<f64>,
    pub return_30: Option<f64>,
    pub return_365: Option<f64>,

    // Rolling means of return_1 (momentum)
    pub moving_avg_5: Option<f64>,
    pub moving_avg_30: Option<f64>,
    pub moving_avg_365: Option<f64>,
}

impl FeatureVector {
    /// Builds a row carrying only the tick's raw values; lags and derived
    /// columns are empty.
    #[must_use]
    pub fn from_tick(tick: &RawTick) -> Self {
        Self {
            symbol: tick.symbol.clone(),
            timestamp: tick.timestamp,
            open: tick.open,
            high: tick.high,
            low: tick.low,
            close: tick.close,
            volume: volume_to_column(tick.volume),
            open_1: None,
            high_1: None,
            low_1: None,
            close_1: None,
            volume_1: None,
            avg_price_5: None,
            avg_price_30: None,
            avg_price_365: None,
            ratio_avg_price_5_30: None,
            ratio_avg_price_5_365: None,
            ratio_avg_price_30_365: None,
            avg_volume_5: None,
            avg_volume_30: None,
            avg_volume_365: None,
            ratio_avg_volume_5_30: None,
            ratio_avg_volume_5_365: None,
            ratio_avg_volume_30_365: None,
            std_price_5: None,
            std_price_30: None,
            std_price_365: None,
            ratio_std_price_5_30: None,
            ratio_std_price_5_365: None,
            ratio_std_price_30_365: None,
            std_volume_5: None,
            std_volume_30: None,
            std_volume_365: None,
            ratio_std_volume_5_30: None,
            ratio_std_volume_5_365: None,
            ratio_std_volume_30_365: None,
            return_1: None,
            return_5: None,
            return_30: None,
            return_365: None,
            moving_avg_5: None,
            moving_avg_30: None,
            moving_avg_365: None,
        }
    }

    /// Reconstructs the raw tick this row was derived from.
    ///
    /// Non-finite prices and negative volumes fall back to zero.
    #[must_use]
    pub fn to_tick(&self) -> RawTick {
        RawTick {
            symbol: self.symbol.clone(),
            timestamp: self.timestamp,
            open: finite_or_zero(self.open),
            high: finite_or_zero(self.high),
            low: finite_or_zero(self.low),
            close: finite_or_zero(self.close),
            volume: u64::try_from(self.volume).unwrap_or(0),
        }
    }

    /// Replaces NaN and infinite values in every optional column with `None`.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        for value in self.derived_mut() {
            if value.is_some_and(|v| !v.is_finite()) {
                *value = None;
            }
        }
        self
    }

    /// Number of derived (optional float) columns that hold a value.
    #[must_use]
    pub fn populated_feature_count(&self) -> usize {
        self.derived().iter().filter(|v| v.is_some()).count()
    }

    fn derived(&self) -> [Option<f64>; 35] {
        [
            self.open_1,
            self.high_1,
            self.low_1,
            self.close_1,
            self.avg_price_5,
            self.avg_price_30,
            self.avg_price_365,
            self.ratio_avg_price_5_30,
            self.ratio_avg_price_5_365,
            self.ratio_avg_price_30_365,
            self.avg_volume_5,
            self.avg_volume_30,
            self.avg_volume_365,
            self.ratio_avg_volume_5_30,
            self.ratio_avg_volume_5_365,
            self.ratio_avg_volume_30_365,
            self.std_price_5,
            self.std_price_30,
            self.std_price_365,
            self.ratio_std_price_5_30,
            self.ratio_std_price_5_365,
            self.ratio_std_price_30_365,
            self.std_volume_5,
            self.std_volume_30,
            self.std_volume_365,
            self.ratio_std_volume_5_30,
            self.ratio_std_volume_5_365,
            self.ratio_std_volume_30_365,
            self.return_1,
            self.return_5,
            self.return_30,
            self.return_365,
            self.moving_avg_5,
            self.moving_avg_30,
            self.moving_avg_365,
        ]
    }

    fn derived_mut(&mut self) -> [&mut Option<f64>; 35] {
        [
            &mut self.open_1,
            &mut self.high_1,
            &mut self.low_1,
            &mut self.close_1,
            &mut self.avg_price_5,
            &mut self.avg_price_30,
            &mut self.avg_price_365,
            &mut self.ratio_avg_price_5_30,
            &mut self.ratio_avg_price_5_365,
            &mut self.ratio_avg_price_30_365,
            &mut self.avg_volume_5,
            &mut self.avg_volume_30,
            &mut self.avg_volume_365,
            &mut self.ratio_avg_volume_5_30,
            &mut self.ratio_avg_volume_5_365,
            &mut self.ratio_avg_volume_30_365,
            &mut self.std_price_5,
            &mut self.std_price_30,
            &mut self.std_price_365,
            &mut self.ratio_std_price_5_30,
            &mut self.ratio_std_price_5_365,
            &mut self.ratio_std_price_30_365,
            &mut self.std_volume_5,
            &mut self.std_volume_30,
            &mut self.std_volume_365,
            &mut self.ratio_std_volume_5_30,
            &mut self.ratio_std_volume_5_365,
            &mut self.ratio_std_volume_30_365,
            &mut self.return_1,
            &mut self.return_5,
            &mut self.return_30,
            &mut self.return_365,
            &mut self.moving_avg_5,
            &mut self.moving_avg_30,
            &mut self.moving_avg_365,
        ]
    }
}

/// Converts a tick volume to the signed BIGINT column, saturating at `i64::MAX`.
#[must_use]
pub fn volume_to_column(volume: u64) -> i64 {
    i64::try_from(volume).unwrap_or(i64::MAX)
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_tick() -> RawTick {
        RawTick {
            symbol: "ACME".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            open: 10.0,
            high: 11.0,
            low: 9.5,
            close: 10.5,
            volume: 1_000,
        }
    }

    #[test]
    fn columns_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for column in FEATURE_COLUMNS {
            assert!(seen.insert(column), "duplicate column {column}");
        }
    }

    #[test]
    fn serialized_keys_match_columns() {
        let vector = FeatureVector::from_tick(&sample_tick());
        let value = serde_json::to_value(&vector).unwrap();
        let object = value.as_object().unwrap();

        assert_eq!(object.len(), FEATURE_COLUMNS.len());
        for column in FEATURE_COLUMNS {
            assert!(object.contains_key(column), "missing key {column}");
        }
    }

    #[test]
    fn from_tick_has_no_derived_values() {
        let vector = FeatureVector::from_tick(&sample_tick());

        assert_eq!(vector.populated_feature_count(), 0);
        assert!((vector.close - 10.5).abs() < f64::EPSILON);
        assert_eq!(vector.volume, 1_000);
    }

    #[test]
    fn to_tick_round_trips_raw_values() {
        let tick = sample_tick();
        assert_eq!(FeatureVector::from_tick(&tick).to_tick(), tick);
    }

    #[test]
    fn to_tick_defaults_bad_values_to_zero() {
        let mut vector = FeatureVector::from_tick(&sample_tick());
        vector.open = f64::NAN;
        vector.volume = -5;

        let tick = vector.to_tick();
        assert!(tick.open.abs() < f64::EPSILON);
        assert_eq!(tick.volume, 0);
    }

    #[test]
    fn sanitized_clears_non_finite_values() {
        let mut vector = FeatureVector::from_tick(&sample_tick());
        vector.ratio_avg_price_5_30 = Some(f64::INFINITY);
        vector.std_price_5 = Some(f64::NEG_INFINITY);
        vector.return_1 = Some(f64::NAN);
        vector.avg_price_5 = Some(10.2);

        let clean = vector.sanitized();
        assert_eq!(clean.ratio_avg_price_5_30, None);
        assert_eq!(clean.std_price_5, None);
        assert_eq!(clean.return_1, None);
        assert_eq!(clean.avg_price_5, Some(10.2));
        assert_eq!(clean.populated_feature_count(), 1);
    }

    #[test]
    fn volume_column_saturates() {
        assert_eq!(volume_to_column(u64::MAX), i64::MAX);
        assert_eq!(volume_to_column(7), 7);
    }
}
