//! Upstream Ticker Message Types
//!
//! Wire format types for the exchange's individual symbol ticker stream.
//! Only the fields the relay needs are mapped; everything else in the
//! frame is ignored.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {
//!   "e": "24hrTicker",
//!   "E": 1700000000000,
//!   "s": "BTCUSDT",
//!   "P": "1.23",
//!   "c": "65000.12"
//! }
//! ```
//!
//! Prices arrive as decimal strings; numbers are accepted as well.
//!
//! # References
//!
//! - [Individual Symbol Ticker Streams](https://developers.binance.com/docs/binance-spot-api-docs/web-socket-streams)

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::tick::NormalizedTick;

// =============================================================================
// Ticker Frame
// =============================================================================

/// 24h rolling window ticker frame.
///
/// Every field is optional so that a frame missing a field still
/// normalizes (see [`TickerFrame::normalize`]). A field that is present
/// but has the wrong shape fails deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TickerFrame {
    /// Event type (e.g. `24hrTicker`).
    #[serde(rename = "e", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,

    /// Event time in milliseconds since the Unix epoch.
    #[serde(
        rename = "E",
        default,
        deserialize_with = "lenient_i64",
        skip_serializing_if = "Option::is_none"
    )]
    pub event_time: Option<i64>,

    /// Symbol.
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,

    /// Last price.
    #[serde(
        rename = "c",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_price: Option<f64>,

    /// Price change percent over 24h.
    #[serde(
        rename = "P",
        default,
        deserialize_with = "lenient_f64",
        skip_serializing_if = "Option::is_none"
    )]
    pub price_change_percent: Option<f64>,
}

impl TickerFrame {
    /// Convert to a normalized tick.
    ///
    /// Missing price fields become `0.0`; missing symbol and event time
    /// stay absent.
    #[must_use]
    pub fn normalize(self) -> NormalizedTick {
        NormalizedTick {
            symbol: self.symbol,
            last_price: self.last_price.unwrap_or(0.0),
            change_percent: self.price_change_percent.unwrap_or(0.0),
            timestamp_ms: self.event_time,
        }
    }
}

// =============================================================================
// Envelopes
// =============================================================================

/// Combined stream envelope (`/stream?streams=...` endpoints).
///
/// ```json
/// {"stream": "btcusdt@ticker", "data": {"e": "24hrTicker", ...}}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CombinedStreamEnvelope {
    /// Stream name.
    pub stream: String,
    /// Wrapped frame.
    pub data: serde_json::Value,
}

/// Response to a live subscribe/unsubscribe request.
///
/// ```json
/// {"result": null, "id": 1}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RequestAck {
    /// Request result (`null` on success).
    pub result: serde_json::Value,
    /// Request identifier.
    pub id: serde_json::Value,
}

// =============================================================================
// Lenient Number Coercion
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum FloatRepr {
    Number(f64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IntRepr {
    Number(i64),
    Text(String),
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<FloatRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(FloatRepr::Number(n)) => Ok(Some(n)),
        Some(FloatRepr::Text(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid decimal string: {s:?}"))),
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<IntRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(IntRepr::Number(n)) => Ok(Some(n)),
        Some(IntRepr::Text(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid integer string: {s:?}"))),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_frame_deserializes() {
        let json = r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","p":"780.00","P":"1.23","c":"65000.12","o":"64220.12","v":"1234.5"}"#;
        let frame: TickerFrame = serde_json::from_str(json).unwrap();

        assert_eq!(frame.event_type.as_deref(), Some("24hrTicker"));
        assert_eq!(frame.event_time, Some(1_700_000_000_000));
        assert_eq!(frame.symbol.as_deref(), Some("BTCUSDT"));
        assert_eq!(frame.last_price, Some(65000.12));
        assert_eq!(frame.price_change_percent, Some(1.23));
    }

    #[test]
    fn numeric_prices_accepted() {
        let json = r#"{"s":"ETHUSDT","c":3000.5,"P":-2,"E":"1700000000001"}"#;
        let frame: TickerFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.last_price, Some(3000.5));
        assert_eq!(frame.price_change_percent, Some(-2.0));
        assert_eq!(frame.event_time, Some(1_700_000_000_001));
    }

    #[test]
    fn missing_fields_normalize_to_defaults() {
        let frame: TickerFrame = serde_json::from_str("{}").unwrap();
        let tick = frame.normalize();
        assert_eq!(tick.symbol, None);
        assert_eq!(tick.timestamp_ms, None);
        assert!(tick.last_price.abs() < f64::EPSILON);
        assert!(tick.change_percent.abs() < f64::EPSILON);
    }

    #[test]
    fn null_fields_treated_as_missing() {
        let frame: TickerFrame =
            serde_json::from_str(r#"{"s":null,"c":null,"P":null,"E":null}"#).unwrap();
        assert_eq!(frame, TickerFrame::default());
    }

    #[test]
    fn garbage_price_rejected() {
        let result = serde_json::from_str::<TickerFrame>(r#"{"s":"BTCUSDT","c":"abc"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn non_finite_price_rejected() {
        let result = serde_json::from_str::<TickerFrame>(r#"{"c":"NaN"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn wrong_symbol_type_rejected() {
        let result = serde_json::from_str::<TickerFrame>(r#"{"s":42,"c":"1.0"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn combined_envelope_deserializes() {
        let json = r#"{"stream":"btcusdt@ticker","data":{"s":"BTCUSDT","c":"1.5"}}"#;
        let envelope: CombinedStreamEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.stream, "btcusdt@ticker");
        let frame: TickerFrame = serde_json::from_value(envelope.data).unwrap();
        assert_eq!(frame.last_price, Some(1.5));
    }
}
