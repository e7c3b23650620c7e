//! MsgPack codec using `rmp-serde`.
//!
//! Structs are written with `to_vec_named`, so field names travel with the
//! payload and peers built from different struct versions can still decode
//! the fields they share.

use crate::error::Result;

/// MessagePack codec for structured data.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct ChatLine {
        id: u32,
        author: String,
        text: String,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = ChatLine {
            id: 7,
            author: "ann".to_string(),
            text: "hi all".to_string(),
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: ChatLine = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_structs_are_encoded_as_maps() {
        let line = ChatLine {
            id: 1,
            author: "x".to_string(),
            text: String::new(),
        };

        let encoded = MsgPackCodec::encode(&line).unwrap();

        // 0x83 = fixmap with 3 entries; positional encoding would be 0x93
        assert_eq!(encoded[0], 0x83);
    }

    #[test]
    fn test_nested_collections() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct History {
            room: String,
            lines: Vec<ChatLine>,
            tags: Vec<Vec<String>>,
        }

        let original = History {
            room: "general".to_string(),
            lines: vec![ChatLine {
                id: 2,
                author: "bob".to_string(),
                text: "yo".to_string(),
            }],
            tags: vec![vec!["a".to_string()], vec![]],
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: History = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_option_none_is_nil() {
        let val: Option<i32> = None;
        let encoded = MsgPackCodec::encode(&val).unwrap();
        assert_eq!(encoded, vec![0xc0]);

        let decoded: Option<i32> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn test_binary_payload() {
        let data: Vec<u8> = vec![0x01, 0x02, 0x03];
        let encoded = MsgPackCodec::encode(&serde_bytes::Bytes::new(&data)).unwrap();

        // bin8 marker
        assert_eq!(encoded[0], 0xc4);

        let decoded: serde_bytes::ByteBuf = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.as_ref(), &data);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<ChatLine> = MsgPackCodec::decode(b"not valid msgpack");
        assert!(result.is_err());
    }
}
