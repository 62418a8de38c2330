//! Redis hot cache for the freshest feature vector per symbol.
//!
//! Layout:
//! - `features:latest:<symbol>`: JSON-serialized [`FeatureVector`] with a TTL
//! - `features:timestamps:<symbol>`: sorted set of RFC 3339 timestamps scored
//!   by epoch seconds, trimmed to the newest `cap` members after every write

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use std::time::Duration;

use crate::models::{parse_timestamp, FeatureVector};

/// Key holding the latest serialized feature vector for a symbol.
#[must_use]
pub fn latest_key(symbol: &str) -> String {
    format!("features:latest:{symbol}")
}

/// Key holding the recency index for a symbol.
#[must_use]
pub fn timestamps_key(symbol: &str) -> String {
    format!("features:timestamps:{symbol}")
}

/// Rank bound passed to `ZREMRANGEBYRANK key 0 <stop>` so that only the
/// newest `cap` members survive.
#[must_use]
pub fn trim_stop_rank(cap: usize) -> i64 {
    -(i64::try_from(cap).unwrap_or(i64::MAX - 1)) - 1
}

/// Epoch seconds (with sub-second precision) used as the sorted-set score.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn timestamp_score(timestamp: DateTime<Utc>) -> f64 {
    timestamp.timestamp_millis() as f64 / 1000.0
}

pub struct RedisFeatureCache {
    conn: Mutex<Option<MultiplexedConnection>>,
}

impl RedisFeatureCache {
    /// Connects to Redis and verifies the connection with a `PING`.
    ///
    /// # Errors
    /// Returns an error if the URL is invalid, the connection cannot be
    /// established within `connect_timeout`, or the ping fails.
    pub async fn connect(url: &str, connect_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let mut conn = tokio::time::timeout(
            connect_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .context("Timed out connecting to Redis")?
        .context("Failed to connect to Redis")?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis ping failed")?;

        tracing::info!(url = %redact(url), "Connected to Redis");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn connection(&self) -> Result<MultiplexedConnection> {
        self.conn
            .lock()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Redis connection closed"))
    }

    /// Writes the latest vector with an expiry and records its timestamp in
    /// the recency index, trimming the index to `recency_cap` entries.
    ///
    /// All three commands run as one atomic pipeline.
    ///
    /// # Errors
    /// Returns an error if serialization or any Redis command fails.
    pub async fn store_latest(
        &self,
        vector: &FeatureVector,
        ttl: Duration,
        recency_cap: usize,
    ) -> Result<()> {
        let payload = serde_json::to_string(vector).context("Failed to serialize features")?;
        let index_key = timestamps_key(&vector.symbol);
        let mut conn = self.connection()?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SETEX")
            .arg(latest_key(&vector.symbol))
            .arg(ttl.as_secs().max(1))
            .arg(payload)
            .ignore()
            .cmd("ZADD")
            .arg(&index_key)
            .arg(timestamp_score(vector.timestamp))
            .arg(vector.timestamp.to_rfc3339())
            .ignore()
            .cmd("ZREMRANGEBYRANK")
            .arg(&index_key)
            .arg(0)
            .arg(trim_stop_rank(recency_cap))
            .ignore();

        let _: () = pipe
            .query_async(&mut conn)
            .await
            .context("Failed to write latest features")?;
        Ok(())
    }

    /// Reads the latest vector for a symbol, if present and not expired.
    ///
    /// # Errors
    /// Returns an error if the read fails or the payload cannot be decoded.
    pub async fn latest(&self, symbol: &str) -> Result<Option<FeatureVector>> {
        let mut conn = self.connection()?;
        let payload: Option<String> = conn
            .get(latest_key(symbol))
            .await
            .context("Failed to read latest features")?;

        payload
            .map(|raw| serde_json::from_str(&raw).context("Corrupt cached features"))
            .transpose()
    }

    /// Returns up to `count` most recent timestamps from the recency index,
    /// newest first.
    ///
    /// # Errors
    /// Returns an error if the read fails.
    pub async fn recent_timestamps(
        &self,
        symbol: &str,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.connection()?;
        let stop = isize::try_from(count).unwrap_or(isize::MAX) - 1;
        let members: Vec<String> = conn
            .zrevrange(timestamps_key(symbol), 0, stop)
            .await
            .context("Failed to read recency index")?;

        Ok(members
            .iter()
            .filter_map(|m| parse_timestamp(m).ok())
            .collect())
    }

    /// Liveness probe.
    ///
    /// # Errors
    /// Returns an error if the connection is closed or the ping fails.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection()?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis ping failed")?;
        Ok(())
    }

    /// Drops the connection. Safe to call more than once.
    pub fn close(&self) {
        if self.conn.lock().take().is_some() {
            tracing::info!("Closed Redis connection");
        }
    }
}

fn redact(url: &str) -> String {
    match url.split_once('@') {
        Some((_, host)) => format!("redis://***@{host}"),
        None => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn key_layout() {
        assert_eq!(latest_key("AAPL"), "features:latest:AAPL");
        assert_eq!(timestamps_key("AAPL"), "features:timestamps:AAPL");
    }

    #[test]
    fn trim_keeps_newest_cap_members() {
        // ZREMRANGEBYRANK key 0 -1001 leaves the highest-scored 1000
        assert_eq!(trim_stop_rank(1000), -1001);
        assert_eq!(trim_stop_rank(1), -2);
    }

    #[test]
    fn score_is_epoch_seconds() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!((timestamp_score(ts) - 1_704_067_200.0).abs() < 1e-6);

        let later = ts + chrono::Duration::milliseconds(1500);
        assert!((timestamp_score(later) - 1_704_067_201.5).abs() < 1e-6);
    }

    #[test]
    fn redact_hides_credentials() {
        assert_eq!(redact("redis://user:pw@cache:6379"), "redis://***@cache:6379");
        assert_eq!(redact("redis://cache:6379"), "redis://cache:6379");
    }
}
