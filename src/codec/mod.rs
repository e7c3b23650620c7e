//! Codec module - payload serialization strategy.
//!
//! Exactly one [`Codec`] is in effect per peer. It is selected by
//! configuration and carried by every handler [`Context`](crate::Context):
//!
//! - [`Codec::MsgPack`] - MessagePack via `rmp-serde` (default)
//! - [`Codec::Json`] - JSON via `serde_json`
//!
//! # Example
//!
//! ```
//! use hubwire::Codec;
//!
//! let codec = Codec::default();
//! let encoded = codec.encode(&"hello").unwrap();
//! let decoded: String = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod json;
mod msgpack;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

/// Payload codec selected per peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Codec {
    /// MessagePack, structs encoded as maps.
    #[default]
    MsgPack,
    /// UTF-8 JSON.
    Json,
}

impl Codec {
    /// Encode a value to bytes.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        match self {
            Codec::MsgPack => MsgPackCodec::encode(value),
            Codec::Json => JsonCodec::encode(value),
        }
    }

    /// Decode bytes into a value of type `T`.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        match self {
            Codec::MsgPack => MsgPackCodec::decode(bytes),
            Codec::Json => JsonCodec::decode(bytes),
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Codec::MsgPack => "msgpack",
            Codec::Json => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug, Default)]
    struct RoomState {
        name: String,
        members: Vec<String>,
        scores: BTreeMap<String, Vec<u32>>,
    }

    fn sample() -> RoomState {
        let mut scores = BTreeMap::new();
        scores.insert("ann".to_string(), vec![3, 1, 4]);
        scores.insert("bob".to_string(), vec![]);
        RoomState {
            name: "lobby".to_string(),
            members: vec!["ann".to_string(), "bob".to_string()],
            scores,
        }
    }

    #[test]
    fn test_round_trip_both_codecs() {
        for codec in [Codec::MsgPack, Codec::Json] {
            let encoded = codec.encode(&sample()).unwrap();
            let decoded: RoomState = codec.decode(&encoded).unwrap();
            assert_eq!(decoded, sample(), "codec {}", codec.name());
        }
    }

    #[test]
    fn test_default_is_msgpack() {
        assert_eq!(Codec::default(), Codec::MsgPack);
    }

    #[test]
    fn test_decode_failure_is_serialization_error() {
        let err = Codec::Json.decode::<RoomState>(b"{broken").unwrap_err();
        assert!(err.is_serialization());

        let err = Codec::MsgPack.decode::<RoomState>(b"\xc1").unwrap_err();
        assert!(err.is_serialization());
    }
}
