//! Pluggable serialization between values and the strings the store holds.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{RedqError, Result};

/// Converts values to and from their stored string form.
///
/// Implementations must be stable: `deserialize(serialize(v))` yields a value
/// equal to `v`. A queue holds two codec instances, one for the timed payload
/// wrapper and one for state records.
pub trait Codec<T>: Send + Sync {
    /// Serialize a value, failing with [`RedqError::Serialization`].
    fn serialize(&self, value: &T) -> Result<String>;

    /// Deserialize a stored string, failing with
    /// [`RedqError::Deserialization`].
    fn deserialize(&self, raw: &str) -> Result<T>;
}

/// The default JSON codec backed by serde_json.
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned,
{
    fn serialize(&self, value: &T) -> Result<String> {
        serde_json::to_string(value)
            .map_err(|e| RedqError::serialization(format!("could not encode value: {e}")))
    }

    fn deserialize(&self, raw: &str) -> Result<T> {
        serde_json::from_str(raw)
            .map_err(|e| RedqError::deserialization(format!("could not decode value: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{State, StateInfo, TimedPayload};

    #[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Sample {
        id: String,
        count: u32,
    }

    #[test]
    fn payload_round_trip() {
        let codec: JsonCodec<TimedPayload<Sample>> = JsonCodec::new();
        let payload = TimedPayload::new(
            Sample {
                id: "s1".to_string(),
                count: 7,
            },
            99,
        );
        let raw = codec.serialize(&payload).unwrap();
        assert_eq!(codec.deserialize(&raw).unwrap(), payload);
    }

    #[test]
    fn state_info_round_trip() {
        let codec: JsonCodec<StateInfo> = JsonCodec::new();
        let info = StateInfo::new(State::Processing, 5, "");
        let raw = codec.serialize(&info).unwrap();
        assert_eq!(codec.deserialize(&raw).unwrap(), info);
    }

    #[test]
    fn malformed_input_is_a_deserialization_error() {
        let codec: JsonCodec<StateInfo> = JsonCodec::new();
        let err = codec.deserialize("not json").unwrap_err();
        assert!(matches!(err, RedqError::Deserialization { .. }));
    }
}
