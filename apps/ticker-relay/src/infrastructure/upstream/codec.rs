//! Ticker Frame Codec
//!
//! Decodes upstream text frames into [`NormalizedTick`]s.
//!
//! Accepted shapes:
//!
//! - A bare ticker object (`/ws/<symbol>@ticker` endpoints)
//! - A combined stream envelope wrapping a ticker object
//! - A request acknowledgement (`{"result":null,"id":1}`), which carries
//!   no price and decodes to `None`
//!
//! Anything that is not a JSON object, or that has a present but
//! non-numeric price field, is a [`FrameParseError`].

use crate::domain::tick::NormalizedTick;
use crate::infrastructure::upstream::messages::{CombinedStreamEnvelope, RequestAck, TickerFrame};

/// Number of characters of an offending frame kept in error messages.
const PREVIEW_LEN: usize = 64;

/// Frame decoding errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameParseError {
    /// Frame is not valid JSON or a field has the wrong shape.
    #[error("JSON decode error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is valid JSON but not an object.
    #[error("expected JSON object, got: {0}")]
    NotAnObject(String),

    /// Frame is empty or whitespace only.
    #[error("empty frame")]
    Empty,
}

/// JSON codec for the ticker stream.
#[derive(Debug, Default, Clone)]
pub struct TickerCodec;

impl TickerCodec {
    /// Create a new codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode one text frame.
    ///
    /// Returns `Ok(None)` for control frames that carry no price.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object or a present
    /// field cannot be coerced to its expected type.
    pub fn decode(&self, text: &str) -> Result<Option<NormalizedTick>, FrameParseError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(FrameParseError::Empty);
        }

        let value: serde_json::Value = serde_json::from_str(trimmed)?;
        Self::decode_value(value)
    }

    fn decode_value(value: serde_json::Value) -> Result<Option<NormalizedTick>, FrameParseError> {
        let Some(object) = value.as_object() else {
            return Err(FrameParseError::NotAnObject(preview(&value.to_string())));
        };

        if object.contains_key("stream") && object.contains_key("data") {
            let envelope: CombinedStreamEnvelope = serde_json::from_value(value)?;
            return Self::decode_value(envelope.data);
        }

        if object.contains_key("result") && object.contains_key("id") {
            let ack: RequestAck = serde_json::from_value(value)?;
            tracing::debug!(id = %ack.id, result = %ack.result, "Upstream request acknowledged");
            return Ok(None);
        }

        let frame: TickerFrame = serde_json::from_value(value)?;
        Ok(Some(frame.normalize()))
    }
}

fn preview(text: &str) -> String {
    text.chars().take(PREVIEW_LEN).collect()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    #[test]
    fn decodes_ticker_frame() {
        let codec = TickerCodec::new();
        let tick = codec
            .decode(r#"{"e":"24hrTicker","E":1700000000000,"s":"BTCUSDT","c":"65000.12","P":"1.23"}"#)
            .unwrap()
            .unwrap();

        assert_eq!(
            tick,
            NormalizedTick::new("BTCUSDT", 65000.12, 1.23, 1_700_000_000_000)
        );
    }

    #[test]
    fn frame_without_prices_defaults_to_zero() {
        let codec = TickerCodec::new();
        let tick = codec
            .decode(r#"{"s":"BTCUSDT","E":5}"#)
            .unwrap()
            .unwrap();
        assert!(tick.last_price.abs() < f64::EPSILON);
        assert!(tick.change_percent.abs() < f64::EPSILON);
        assert_eq!(tick.timestamp_ms, Some(5));
    }

    #[test]
    fn frame_without_symbol_keeps_it_absent() {
        let codec = TickerCodec::new();
        let tick = codec.decode(r#"{"c":"1.5","P":"0"}"#).unwrap().unwrap();
        assert_eq!(tick.symbol, None);
        assert_eq!(tick.timestamp_ms, None);
        assert!((tick.last_price - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn unwraps_combined_stream_envelope() {
        let codec = TickerCodec::new();
        let tick = codec
            .decode(r#"{"stream":"ethusdt@ticker","data":{"s":"ETHUSDT","c":"3000","P":"-0.5","E":7}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(tick.symbol.as_deref(), Some("ETHUSDT"));
        assert!((tick.change_percent + 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn request_ack_decodes_to_none() {
        let codec = TickerCodec::new();
        assert!(codec.decode(r#"{"result":null,"id":1}"#).unwrap().is_none());
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace")]
    #[test_case("not json" ; "garbage")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case("42" ; "number")]
    #[test_case("\"BTCUSDT\"" ; "string")]
    #[test_case(r#"{"s":"BTCUSDT","c":"abc"}"# ; "non numeric price")]
    #[test_case(r#"{"s":"BTCUSDT","P":[1]}"# ; "array percent")]
    #[test_case(r#"{"stream":"x","data":[]}"# ; "envelope without object")]
    fn rejects_malformed_frame(input: &str) {
        let codec = TickerCodec::new();
        assert!(codec.decode(input).is_err());
    }

    #[test]
    fn not_an_object_error_is_truncated() {
        let codec = TickerCodec::new();
        let long = format!("[{}]", "1,".repeat(200) + "1");
        match codec.decode(&long) {
            Err(FrameParseError::NotAnObject(preview)) => {
                assert_eq!(preview.chars().count(), PREVIEW_LEN);
            }
            other => panic!("expected NotAnObject, got {other:?}"),
        }
    }
}
