//! Bounded per-symbol tick window.

use std::collections::VecDeque;

use tick_features_data::RawTick;

use crate::error::EngineError;

/// Fixed-capacity, arrival-ordered store of raw ticks with FIFO eviction.
#[derive(Debug, Clone)]
pub struct WindowBuffer {
    capacity: usize,
    ticks: VecDeque<RawTick>,
}

impl WindowBuffer {
    /// # Errors
    /// Returns [`EngineError::InvalidCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, EngineError> {
        if capacity == 0 {
            return Err(EngineError::InvalidCapacity(capacity));
        }
        Ok(Self {
            capacity,
            ticks: VecDeque::with_capacity(capacity),
        })
    }

    /// Appends a tick, evicting the oldest one when full.
    pub fn add(&mut self, tick: RawTick) {
        if self.ticks.len() == self.capacity {
            self.ticks.pop_front();
        }
        self.ticks.push_back(tick);
    }

    /// Appends ticks in the order given. Callers supply chronological order;
    /// nothing is re-sorted here.
    pub fn load_many(&mut self, ticks: impl IntoIterator<Item = RawTick>) -> usize {
        let mut loaded = 0;
        for tick in ticks {
            self.add(tick);
            loaded += 1;
        }
        tracing::debug!(loaded, size = self.ticks.len(), "Loaded ticks into window");
        loaded
    }

    /// Current contents in arrival order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RawTick> {
        self.ticks.iter().cloned().collect()
    }

    #[must_use]
    pub fn latest(&self) -> Option<&RawTick> {
        self.ticks.back()
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.ticks.len()
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn tick(i: i64) -> RawTick {
        RawTick {
            symbol: "ACME".to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
                + chrono::Duration::seconds(i),
            open: 1.0,
            high: 1.0,
            low: 1.0,
            #[allow(clippy::cast_precision_loss)]
            close: i as f64,
            volume: 1,
        }
    }

    #[test]
    fn zero_capacity_fails_fast() {
        assert!(matches!(
            WindowBuffer::new(0),
            Err(EngineError::InvalidCapacity(0))
        ));
    }

    #[test]
    fn keeps_most_recent_in_arrival_order() {
        for capacity in [1usize, 2, 3, 7, 10, 64] {
            for n in [capacity + 1, capacity * 2, capacity * 3 + 1] {
                let mut buffer = WindowBuffer::new(capacity).unwrap();
                for i in 0..n {
                    buffer.add(tick(i as i64));
                    assert!(buffer.size() <= capacity);
                }

                let closes: Vec<f64> = buffer.snapshot().iter().map(|t| t.close).collect();
                #[allow(clippy::cast_precision_loss)]
                let expected: Vec<f64> = ((n - capacity)..n).map(|i| i as f64).collect();
                assert_eq!(closes, expected, "capacity={capacity} n={n}");
            }
        }
    }

    #[test]
    fn snapshot_preserves_arrival_not_timestamp_order() {
        let mut buffer = WindowBuffer::new(5).unwrap();
        buffer.add(tick(3));
        buffer.add(tick(1));
        buffer.add(tick(2));

        let closes: Vec<f64> = buffer.snapshot().iter().map(|t| t.close).collect();
        assert_eq!(closes, vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn empty_buffer_queries() {
        let mut buffer = WindowBuffer::new(3).unwrap();
        assert!(buffer.is_empty());
        assert!(buffer.snapshot().is_empty());
        assert!(buffer.latest().is_none());

        buffer.add(tick(1));
        assert!(!buffer.is_empty());
        assert_eq!(buffer.size(), 1);

        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 3);
    }

    #[test]
    fn load_many_respects_capacity() {
        let mut buffer = WindowBuffer::new(3).unwrap();
        let loaded = buffer.load_many((0..5).map(tick));

        assert_eq!(loaded, 5);
        let closes: Vec<f64> = buffer.snapshot().iter().map(|t| t.close).collect();
        assert_eq!(closes, vec![2.0, 3.0, 4.0]);
        assert!((buffer.latest().unwrap().close - 4.0).abs() < f64::EPSILON);
    }
}
