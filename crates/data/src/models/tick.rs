//! Raw tick model and ingress message parsing.
//!
//! The transport delivers one JSON object per tick using capitalized keys
//! (`Symbol`, `Timestamp`, `Open`, ...). [`TickMessage`] mirrors that shape
//! loosely so a missing or malformed field can be reported precisely, and
//! [`RawTick`] is the validated, immutable form consumed by the window buffer.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reasons a single ingress message is rejected.
#[derive(Debug, Error, PartialEq)]
pub enum TickParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("missing field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a finite number: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("invalid timestamp `{0}`")]
    InvalidTimestamp(String),

    #[error("invalid volume `{0}`")]
    InvalidVolume(String),

    #[error("empty symbol")]
    EmptySymbol,
}

/// One OHLCV observation for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTick {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

/// Volume as it may arrive on the wire: an integer, or an integral float.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireVolume {
    Integer(u64),
    Float(f64),
}

/// Transport message shape. All fields are optional so validation can name
/// the one that is missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickMessage {
    #[serde(rename = "Symbol")]
    pub symbol: Option<String>,
    #[serde(rename = "Timestamp")]
    pub timestamp: Option<String>,
    #[serde(rename = "Open")]
    pub open: Option<f64>,
    #[serde(rename = "High")]
    pub high: Option<f64>,
    #[serde(rename = "Low")]
    pub low: Option<f64>,
    #[serde(rename = "Close")]
    pub close: Option<f64>,
    #[serde(rename = "Volume")]
    pub volume: Option<WireVolume>,
}

impl RawTick {
    /// Parses and validates one transport message.
    ///
    /// # Errors
    /// Returns a [`TickParseError`] describing the first problem found.
    pub fn from_json(raw: &str) -> Result<Self, TickParseError> {
        let message: TickMessage =
            serde_json::from_str(raw).map_err(|e| TickParseError::InvalidJson(e.to_string()))?;
        Self::try_from(message)
    }

    /// Converts back to the transport message shape.
    #[must_use]
    pub fn to_message(&self) -> TickMessage {
        TickMessage {
            symbol: Some(self.symbol.clone()),
            timestamp: Some(self.timestamp.to_rfc3339()),
            open: Some(self.open),
            high: Some(self.high),
            low: Some(self.low),
            close: Some(self.close),
            volume: Some(WireVolume::Integer(self.volume)),
        }
    }
}

impl TryFrom<TickMessage> for RawTick {
    type Error = TickParseError;

    fn try_from(message: TickMessage) -> Result<Self, Self::Error> {
        let symbol = message
            .symbol
            .ok_or(TickParseError::MissingField("Symbol"))?
            .trim()
            .to_string();
        if symbol.is_empty() {
            return Err(TickParseError::EmptySymbol);
        }

        let timestamp = message
            .timestamp
            .ok_or(TickParseError::MissingField("Timestamp"))
            .and_then(|ts| parse_timestamp(&ts))?;

        let open = finite_field("Open", message.open)?;
        let high = finite_field("High", message.high)?;
        let low = finite_field("Low", message.low)?;
        let close = finite_field("Close", message.close)?;

        let volume = match message.volume.ok_or(TickParseError::MissingField("Volume"))? {
            WireVolume::Integer(v) => v,
            WireVolume::Float(v) => volume_from_float(v)?,
        };

        Ok(Self {
            symbol,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        })
    }
}

fn finite_field(field: &'static str, value: Option<f64>) -> Result<f64, TickParseError> {
    let value = value.ok_or(TickParseError::MissingField(field))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(TickParseError::NonFinite { field, value })
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn volume_from_float(value: f64) -> Result<u64, TickParseError> {
    if value.is_finite() && value >= 0.0 && value.fract() == 0.0 && value <= u64::MAX as f64 {
        Ok(value as u64)
    } else {
        Err(TickParseError::InvalidVolume(value.to_string()))
    }
}

/// Parses an ISO-8601 timestamp.
///
/// Accepts RFC 3339 (with offset), a space-separated date-time with offset,
/// a naive date-time (taken as UTC), or a bare date (midnight UTC).
///
/// # Errors
/// Returns [`TickParseError::InvalidTimestamp`] if no format matches.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TickParseError> {
    let raw = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(naive.and_utc());
        }
    }
    if let Some(naive) = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
    {
        return Ok(naive.and_utc());
    }

    Err(TickParseError::InvalidTimestamp(raw.to_string()))
}
