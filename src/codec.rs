//! Wire codec for stream record payloads: base64 over UTF-8 JSON.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::Value;

use crate::error::Result;

/// Decode a base64 record payload into a JSON document. ASCII whitespace
/// anywhere in the payload is ignored, so line-wrapped encodings decode.
pub fn decode(encoded: &str) -> Result<Value> {
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD.decode(compact)?;
    let text = String::from_utf8(bytes)?;
    Ok(serde_json::from_str(&text)?)
}

/// Encode a JSON document the way upstream publishers put it on the stream.
pub fn encode(value: &Value) -> String {
    STANDARD.encode(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;
    use serde_json::json;

    #[test]
    fn decodes_simple_document() {
        let doc = json!({"message": "hello", "number": 42});
        let decoded = decode(&encode(&doc)).unwrap();
        assert_eq!(decoded, doc);
        assert!(decoded.is_object());
    }

    #[test]
    fn decodes_ride_event() {
        let doc = json!({"ride": {"PU_DO": "43_151", "trip_distance": 18.4}, "ride_id": "test_ride_123"});
        let decoded = decode(&encode(&doc)).unwrap();
        assert_eq!(decoded["ride"]["PU_DO"], "43_151");
        assert_eq!(decoded["ride"]["trip_distance"], 18.4);
        assert_eq!(decoded["ride_id"], "test_ride_123");
    }

    #[test]
    fn decodes_line_wrapped_payload() {
        let doc = json!({"ride": {"PU_DO": "130_205", "trip_distance": 3.66}, "ride_id": 123});
        let encoded = encode(&doc);
        let wrapped = encoded
            .as_bytes()
            .chunks(16)
            .map(|c| std::str::from_utf8(c).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        assert!(wrapped.contains('\n'));
        assert_eq!(decode(&format!("  {wrapped}\r\n")).unwrap(), doc);
    }

    #[test]
    fn rejects_invalid_base64() {
        let err = decode("not*base64!").unwrap_err();
        assert!(matches!(err, ServiceError::Base64(_)), "got {err:?}");
    }

    #[test]
    fn rejects_non_json_text() {
        let encoded = STANDARD.encode("invalid json");
        let err = decode(&encoded).unwrap_err();
        assert!(matches!(err, ServiceError::Json(_)), "got {err:?}");
    }

    #[test]
    fn rejects_non_utf8_bytes() {
        let encoded = STANDARD.encode([0xff, 0xfe, 0xfd]);
        let err = decode(&encoded).unwrap_err();
        assert!(matches!(err, ServiceError::Utf8(_)), "got {err:?}");
    }
}
