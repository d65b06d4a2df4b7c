//! # Frame Decoder
//!
//! Two steps turn an inbound text frame into a [`TickerRecord`]:
//!
//! 1. [`payload_from_text`] undoes the transport wrapping. The v1 streamer sends
//!    the bare base64 string; the v2 streamer wraps it in a JSON envelope
//!    (`{"type":"pricing","message":"<base64>"}`). Both are accepted.
//! 2. [`Decoder::decode`] decodes the protobuf bytes as a
//!    `prost_reflect::DynamicMessage` of the loaded [`Schema`]'s root message
//!    and normalizes every present field (see [`crate::record`]).
//!
//! Unlike a generated message type, decoding is strict: a tag the schema does
//! not declare or an enum number missing from its table fails the frame
//! instead of being skipped. Malformed wire data (bad wire type, truncation,
//! invalid UTF-8) fails it as well.

use std::borrow::Cow;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use prost_reflect::{DynamicMessage, FieldDescriptor, Kind, Value};
use serde::Deserialize;

use crate::error::DecodeError;
use crate::record::{FieldValue, TickerRecord};
use crate::schema::Schema;

/// JSON envelope used by the v2 streamer.
#[derive(Deserialize)]
struct PricingEnvelope {
    /// Base64 encoded protobuf
    message: String,
}

/// Extracts the raw protobuf bytes from a text frame.
pub fn payload_from_text(text: &str) -> Result<Vec<u8>, DecodeError> {
    let trimmed = text.trim();
    let encoded: Cow<'_, str> = if trimmed.starts_with('{') {
        Cow::Owned(serde_json::from_str::<PricingEnvelope>(trimmed)?.message)
    } else {
        Cow::Borrowed(trimmed)
    };
    Ok(general_purpose::STANDARD.decode(encoded.as_bytes())?)
}

/// Schema-driven protobuf decoder. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Decoder {
    schema: Arc<Schema>,
}

impl Decoder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Decodes one message. Pure: the same bytes always give the same record.
    pub fn decode(&self, frame: &[u8]) -> Result<TickerRecord, DecodeError> {
        let message = DynamicMessage::decode(self.schema.message().clone(), frame)?;
        if let Some(unknown) = message.unknown_fields().next() {
            return Err(DecodeError::UnknownField { tag: unknown.number() });
        }

        let mut record = TickerRecord::default();
        for (field, value) in message.fields() {
            let name = self.schema.record_name(&field);
            let value = normalize(&field, name, value)?;
            record.insert(name.to_string(), value);
        }
        Ok(record)
    }

    /// Text frame in, record out.
    pub fn decode_text(&self, text: &str) -> Result<TickerRecord, DecodeError> {
        let bytes = payload_from_text(text)?;
        self.decode(&bytes)
    }
}

/// 64-bit integers and floats become decimal text, enums their symbolic name,
/// bytes base64. 32-bit integers and bools keep their type.
fn normalize(field: &FieldDescriptor, name: &str, value: &Value) -> Result<FieldValue, DecodeError> {
    let normalized = match value {
        Value::Bool(flag) => FieldValue::Bool(*flag),
        Value::I32(n) => FieldValue::Integer(i64::from(*n)),
        Value::U32(n) => FieldValue::Integer(i64::from(*n)),
        Value::I64(n) => FieldValue::Text(n.to_string()),
        Value::U64(n) => FieldValue::Text(n.to_string()),
        Value::F32(n) => FieldValue::Text(n.to_string()),
        Value::F64(n) => FieldValue::Text(n.to_string()),
        Value::String(text) => FieldValue::Text(text.clone()),
        Value::Bytes(bytes) => FieldValue::Text(general_purpose::STANDARD.encode(bytes)),
        Value::EnumNumber(number) => {
            let symbol = match field.kind() {
                Kind::Enum(table) => table.get_value(*number).map(|value| value.name().to_string()),
                _ => None,
            };
            FieldValue::Text(symbol.ok_or_else(|| DecodeError::UnknownEnumValue {
                field: name.to_string(),
                value: *number,
            })?)
        }
        Value::Message(_) | Value::List(_) | Value::Map(_) => {
            return Err(DecodeError::Unsupported {
                field: name.to_string(),
            })
        }
    };
    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto_handler::{MarketHoursType, PricingData, QuoteType};
    use crate::config::default_schema_path;
    use prost::Message;

    fn decoder() -> Decoder {
        Decoder::new(Arc::new(Schema::load(&default_schema_path(), "yticker").unwrap()))
    }

    fn aapl() -> PricingData {
        PricingData {
            id: "AAPL".to_string(),
            price: 191.25,
            time: 1_718_000_000_000,
            exchange: "NMS".to_string(),
            quote_type: QuoteType::Equity as i32,
            market_hours: MarketHoursType::RegularMarket as i32,
            day_volume: 1_000_000,
            change_percent: -0.5,
            ..Default::default()
        }
    }

    #[test]
    fn test_decodes_and_normalizes_fields() {
        let record = decoder().decode(&aapl().encode_to_vec()).unwrap();

        assert_eq!(record.text("id"), Some("AAPL"));
        assert_eq!(record.text("price"), Some("191.25"));
        assert_eq!(record.text("time"), Some("1718000000000"));
        assert_eq!(record.text("dayVolume"), Some("1000000"));
        assert_eq!(record.text("changePercent"), Some("-0.5"));
        assert_eq!(record.text("quoteType"), Some("EQUITY"));
        assert_eq!(record.text("marketHours"), Some("REGULAR_MARKET"));
        // proto3 default values are not on the wire
        assert!(record.get("currency").is_none());
        assert!(record.get("optionsType").is_none());
        assert_eq!(record.len(), 8);
    }

    #[test]
    fn test_decode_is_repeatable() {
        let bytes = aapl().encode_to_vec();
        let decoder = decoder();
        assert_eq!(decoder.decode(&bytes).unwrap(), decoder.decode(&bytes).unwrap());
    }

    #[test]
    fn test_long_fields_survive_extremes() {
        let decoder = decoder();
        for volume in [i64::MAX, i64::MIN, (1 << 53) + 1, -1] {
            let msg = PricingData {
                day_volume: volume,
                ..Default::default()
            };
            let record = decoder.decode(&msg.encode_to_vec()).unwrap();
            let text = record.text("dayVolume").unwrap();
            assert_eq!(text.parse::<i64>().unwrap(), volume);
        }
    }

    #[test]
    fn test_enum_values_come_from_table() {
        let decoder = decoder();
        let table = decoder.schema().enum_def("yticker.QuoteType").unwrap();
        let msg = PricingData {
            quote_type: QuoteType::Cryptocurrency as i32,
            ..Default::default()
        };
        let record = decoder.decode(&msg.encode_to_vec()).unwrap();
        let name = record.text("quoteType").unwrap();
        assert!(table.values().any(|value| value.name() == name));
        assert_eq!(name, "CRYPTOCURRENCY");
    }

    #[test]
    fn test_undeclared_enum_value_is_rejected() {
        let msg = PricingData {
            quote_type: 3,
            ..Default::default()
        };
        let err = decoder().decode(&msg.encode_to_vec()).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEnumValue { value: 3, .. }));
    }

    #[test]
    fn test_unknown_tag_is_rejected() {
        // field 40, varint 1
        let bytes = [0xC0, 0x02, 0x01];
        let err = decoder().decode(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownField { tag: 40 }));
    }

    #[test]
    fn test_malformed_wire_data_is_rejected() {
        let decoder = decoder();
        // field 1 (string) sent as varint
        assert!(matches!(decoder.decode(&[0x08, 0x01]).unwrap_err(), DecodeError::Wire(_)));
        // cut inside the id string
        let bytes = aapl().encode_to_vec();
        assert!(matches!(decoder.decode(&bytes[..3]).unwrap_err(), DecodeError::Wire(_)));
        // field 2 (float) with two of four bytes
        assert!(matches!(decoder.decode(&[0x15, 0x00, 0x00]).unwrap_err(), DecodeError::Wire(_)));
        // dangling varint continuation
        assert!(matches!(decoder.decode(&[0x48, 0xFF]).unwrap_err(), DecodeError::Wire(_)));
        // id is not UTF-8
        assert!(matches!(decoder.decode(&[0x0A, 0x02, 0xC3, 0x28]).unwrap_err(), DecodeError::Wire(_)));
    }

    #[test]
    fn test_double_and_32bit_scalars() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scalars.proto");
        let source = r#"
            syntax = "proto3";
            message m {
                double cap = 1;
                int32 hint = 2;
                sint32 delta = 3;
                fixed32 seq = 4;
                bool halted = 5;
                bytes raw = 6;
                uint64 big = 7;
            }
        "#;
        std::fs::write(&path, source).unwrap();
        let decoder = Decoder::new(Arc::new(Schema::load(&path, "m").unwrap()));
        let mut bytes = vec![0x09];
        bytes.extend_from_slice(&2.5e12f64.to_le_bytes());
        bytes.extend_from_slice(&[0x10, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]); // -2
        bytes.extend_from_slice(&[0x18, 0x03]); // zigzag -2
        bytes.push(0x25);
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&[0x28, 0x01]);
        bytes.extend_from_slice(&[0x32, 0x02, 0xDE, 0xAD]);
        bytes.extend_from_slice(&[0x38, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01]);

        let record = decoder.decode(&bytes).unwrap();
        assert_eq!(record.text("cap"), Some("2500000000000"));
        assert_eq!(record.get("hint").and_then(FieldValue::as_i64), Some(-2));
        assert_eq!(record.get("delta").and_then(FieldValue::as_i64), Some(-2));
        assert_eq!(record.get("seq").and_then(FieldValue::as_i64), Some(7));
        assert_eq!(record.get("halted").and_then(FieldValue::as_bool), Some(true));
        assert_eq!(record.text("raw"), Some("3q0="));
        assert_eq!(record.text("big"), Some("18446744073709551615"));
    }

    #[test]
    fn test_payload_from_raw_and_enveloped_text() {
        let msg = aapl();
        let raw = msg.to_frame_text();
        let enveloped = serde_json::json!({ "type": "pricing", "message": raw }).to_string();

        let decoder = decoder();
        let a = decoder.decode_text(&raw).unwrap();
        let b = decoder.decode_text(&enveloped).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_payload_errors() {
        assert!(matches!(payload_from_text("not base64!"), Err(DecodeError::Base64(_))));
        assert!(matches!(payload_from_text("{\"type\":\"pricing\"}"), Err(DecodeError::Envelope(_))));
    }
}
