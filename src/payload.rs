//! Pluggable payload codec.
//!
//! The engine moves opaque [`Payload`]s; converting between payloads and
//! values is delegated to a [`PayloadConverter`]. The default converter
//! round-trips any [`serde_json::Value`] as `json/plain`. An undecodable
//! payload is a [`PayloadError`], never silently conflated with a
//! legitimate `null`.

use crate::proto::Payload;
use serde_json::Value;

/// Metadata key carrying the encoding tag.
pub const ENCODING_KEY: &str = "encoding";
/// Encoding tag written by [`JsonPayloadConverter`].
pub const JSON_ENCODING: &[u8] = b"json/plain";

/// Failure to convert a value to or from a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PayloadError(pub String);

/// Converts between in-sandbox values and wire payloads.
///
/// Implementations must be deterministic: the same value must produce the
/// same bytes on every replay.
pub trait PayloadConverter: Send + Sync {
    fn to_payload(&self, value: &Value) -> Result<Payload, PayloadError>;
    fn from_payload(&self, payload: &Payload) -> Result<Value, PayloadError>;
}

/// Default converter: canonical JSON bytes tagged `json/plain`.
#[derive(Debug, Default, Clone)]
pub struct JsonPayloadConverter;

impl PayloadConverter for JsonPayloadConverter {
    fn to_payload(&self, value: &Value) -> Result<Payload, PayloadError> {
        let data = serde_json::to_vec(value).map_err(|e| PayloadError(e.to_string()))?;
        let mut metadata = std::collections::HashMap::new();
        metadata.insert(ENCODING_KEY.to_string(), JSON_ENCODING.to_vec());
        Ok(Payload { metadata, data })
    }

    fn from_payload(&self, payload: &Payload) -> Result<Value, PayloadError> {
        match payload.metadata.get(ENCODING_KEY) {
            Some(enc) if enc == JSON_ENCODING => {}
            Some(enc) => {
                return Err(PayloadError(format!(
                    "unsupported payload encoding: {}",
                    String::from_utf8_lossy(enc)
                )));
            }
            None => return Err(PayloadError("payload missing encoding metadata".to_string())),
        }
        serde_json::from_slice(&payload.data).map_err(|e| PayloadError(e.to_string()))
    }
}
