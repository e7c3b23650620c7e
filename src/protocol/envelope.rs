//! Data message envelope encoding and decoding.
//!
//! ```text
//! ┌───────────┬──────────────┬─────────────┬──────────────────┐
//! │ Route len │ Route        │ Payload len │ Payload          │
//! │ u16 BE    │ UTF-8 bytes  │ i32 BE      │ payload len bytes│
//! └───────────┴──────────────┴─────────────┴──────────────────┘
//! ```
//!
//! A payload length of `0` means "no data". Negative lengths are rejected.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{HubwireError, Result};

/// Size of the route length prefix.
pub const ROUTE_LEN_SIZE: usize = 2;

/// Size of the payload length field.
pub const PAYLOAD_LEN_SIZE: usize = 4;

/// Longest route that fits the length prefix.
pub const MAX_ROUTE_LEN: usize = u16::MAX as usize;

/// Largest payload expressible by the signed length field.
pub const MAX_PAYLOAD_LEN: usize = i32::MAX as usize;

/// A decoded data message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Target route.
    pub route: String,
    /// Encoded payload, `None` when the sender attached no data.
    pub payload: Option<Bytes>,
}

impl Envelope {
    /// Create an envelope. An empty payload is normalized to `None`.
    pub fn new(route: impl Into<String>, payload: Option<Bytes>) -> Self {
        Self {
            route: route.into(),
            payload: payload.filter(|p| !p.is_empty()),
        }
    }

    /// Payload length as written on the wire.
    #[inline]
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Result<Bytes> {
        encode_envelope(&self.route, self.payload.as_deref().unwrap_or_default())
    }

    /// Decode wire bytes.
    ///
    /// The payload is a zero-copy slice of `bytes`.
    pub fn decode(mut bytes: Bytes) -> Result<Self> {
        if bytes.len() < ROUTE_LEN_SIZE {
            return Err(truncated("route length"));
        }
        let route_len = bytes.get_u16() as usize;
        if route_len == 0 {
            return Err(HubwireError::Protocol("Envelope route is empty".to_string()));
        }
        if bytes.len() < route_len {
            return Err(truncated("route"));
        }
        let route_bytes = bytes.split_to(route_len);
        let route = std::str::from_utf8(&route_bytes)
            .map_err(|e| HubwireError::Protocol(format!("Envelope route is not UTF-8: {}", e)))?
            .to_string();

        if bytes.len() < PAYLOAD_LEN_SIZE {
            return Err(truncated("payload length"));
        }
        let payload_len = bytes.get_i32();
        if payload_len < 0 {
            return Err(HubwireError::Protocol(format!(
                "Negative payload length {}",
                payload_len
            )));
        }
        let payload_len = payload_len as usize;
        if bytes.len() < payload_len {
            return Err(truncated("payload"));
        }
        if bytes.len() > payload_len {
            return Err(HubwireError::Protocol(format!(
                "{} trailing bytes after payload",
                bytes.len() - payload_len
            )));
        }

        Ok(Self::new(route, Some(bytes)))
    }
}

/// Encode a route and payload into one envelope.
///
/// An empty `payload` is written as length `0`.
pub fn encode_envelope(route: &str, payload: &[u8]) -> Result<Bytes> {
    if route.is_empty() {
        return Err(HubwireError::Protocol("Envelope route is empty".to_string()));
    }
    if route.len() > MAX_ROUTE_LEN {
        return Err(HubwireError::Protocol(format!(
            "Route length {} exceeds maximum {}",
            route.len(),
            MAX_ROUTE_LEN
        )));
    }
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(HubwireError::Protocol(format!(
            "Payload size {} exceeds maximum {}",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }

    let mut buf =
        BytesMut::with_capacity(ROUTE_LEN_SIZE + route.len() + PAYLOAD_LEN_SIZE + payload.len());
    buf.put_u16(route.len() as u16);
    buf.put_slice(route.as_bytes());
    buf.put_i32(payload.len() as i32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

fn truncated(what: &str) -> HubwireError {
    HubwireError::Protocol(format!("Envelope truncated while reading {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let bytes = encode_envelope("ab", b"xyz").unwrap();
        assert_eq!(&bytes[..], &[0, 2, b'a', b'b', 0, 0, 0, 3, b'x', b'y', b'z']);
    }

    #[test]
    fn test_empty_payload_is_zero_length() {
        let bytes = encode_envelope("ping", b"").unwrap();
        assert_eq!(&bytes[6..], &[0, 0, 0, 0]);

        let envelope = Envelope::decode(bytes).unwrap();
        assert_eq!(envelope.route, "ping");
        assert!(envelope.payload.is_none());
    }

    #[test]
    fn test_decode_payload() {
        let original = Envelope::new("chat/send", Some(Bytes::from_static(b"\x81\xa1a\x01")));
        let decoded = Envelope::decode(original.encode().unwrap()).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.payload_len(), 4);
    }

    #[test]
    fn test_rejects_truncated_payload() {
        let bytes = encode_envelope("r", b"hello").unwrap();
        let cut = bytes.slice(..bytes.len() - 1);
        let err = Envelope::decode(cut).unwrap_err();
        assert!(err.to_string().contains("truncated"));
    }

    #[test]
    fn test_rejects_negative_length() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_u8(b'r');
        buf.put_i32(-1);
        let err = Envelope::decode(buf.freeze()).unwrap_err();
        assert!(err.to_string().contains("Negative"));
    }

    #[test]
    fn test_rejects_trailing_bytes() {
        let mut buf = BytesMut::from(&encode_envelope("r", b"x").unwrap()[..]);
        buf.put_u8(0);
        assert!(Envelope::decode(buf.freeze()).is_err());
    }

    #[test]
    fn test_rejects_invalid_utf8_route() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_u8(0xff);
        buf.put_i32(0);
        assert!(Envelope::decode(buf.freeze()).is_err());
    }

    #[test]
    fn test_rejects_empty_route() {
        assert!(encode_envelope("", b"x").is_err());

        let bytes = Bytes::from_static(&[0, 0, 0, 0, 0, 0]);
        assert!(Envelope::decode(bytes).is_err());
    }
}
