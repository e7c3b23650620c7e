//! Stream framing for byte-stream transports.
//!
//! Each packet on a stream is prefixed with its length:
//!
//! ```text
//! ┌──────────┬─────────────────┐
//! │ Length   │ Packet          │
//! │ u32 BE   │ length bytes    │
//! └──────────┴─────────────────┘
//! ```
//!
//! [`FrameBuffer`] accumulates partial reads with a two-state machine:
//! - `WaitingForHeader`: need at least 4 bytes
//! - `WaitingForPacket`: length parsed, need N more bytes

use bytes::{Bytes, BytesMut};

use crate::error::{HubwireError, Result};

/// Stream frame header size in bytes.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Default maximum packet size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Encode the length prefix for a packet.
#[inline]
pub fn encode_frame_header(len: u32) -> [u8; FRAME_HEADER_SIZE] {
    len.to_be_bytes()
}

#[derive(Debug, Clone, Copy)]
enum State {
    WaitingForHeader,
    WaitingForPacket { remaining: u32 },
}

/// Buffer for accumulating incoming bytes and extracting complete packets.
pub struct FrameBuffer {
    buffer: BytesMut,
    state: State,
    max_frame_size: u32,
}

impl FrameBuffer {
    /// Create a new frame buffer with the default size limit.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Create a new frame buffer with a custom size limit.
    pub fn with_max_frame_size(max_frame_size: u32) -> Self {
        Self {
            buffer: BytesMut::with_capacity(64 * 1024),
            state: State::WaitingForHeader,
            max_frame_size,
        }
    }

    /// Push data into the buffer and extract all complete packets.
    ///
    /// Partial data is kept for the next push.
    ///
    /// # Errors
    ///
    /// Returns error if a packet exceeds the size limit. The stream is
    /// unusable afterwards.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut packets = Vec::new();
        while let Some(packet) = self.try_extract_one()? {
            packets.push(packet);
        }

        Ok(packets)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.state {
                State::WaitingForHeader => {
                    if self.buffer.len() < FRAME_HEADER_SIZE {
                        return Ok(None);
                    }

                    let header = self.buffer.split_to(FRAME_HEADER_SIZE);
                    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);

                    if len > self.max_frame_size {
                        return Err(HubwireError::Protocol(format!(
                            "Frame size {} exceeds maximum {}",
                            len, self.max_frame_size
                        )));
                    }

                    if len == 0 {
                        return Ok(Some(Bytes::new()));
                    }

                    self.state = State::WaitingForPacket { remaining: len };
                }

                State::WaitingForPacket { remaining } => {
                    let remaining = remaining as usize;
                    if self.buffer.len() < remaining {
                        return Ok(None);
                    }

                    let packet = self.buffer.split_to(remaining).freeze();
                    self.state = State::WaitingForHeader;
                    return Ok(Some(packet));
                }
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForHeader => "WaitingForHeader",
            State::WaitingForPacket { .. } => "WaitingForPacket",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(packet: &[u8]) -> Vec<u8> {
        let mut bytes = encode_frame_header(packet.len() as u32).to_vec();
        bytes.extend_from_slice(packet);
        bytes
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();

        let packets = buffer.push(&make_frame(b"hello")).unwrap();

        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][..], b"hello");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();
        let mut combined = make_frame(b"first");
        combined.extend(make_frame(b"second"));
        combined.extend(make_frame(b""));

        let packets = buffer.push(&combined).unwrap();

        assert_eq!(packets.len(), 3);
        assert_eq!(&packets[1][..], b"second");
        assert!(packets[2].is_empty());
    }

    #[test]
    fn test_fragmented_header_and_packet() {
        let mut buffer = FrameBuffer::new();
        let frame = make_frame(b"a packet split across reads");

        assert!(buffer.push(&frame[..2]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForHeader");

        assert!(buffer.push(&frame[2..9]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForPacket");

        let packets = buffer.push(&frame[9..]).unwrap();
        assert_eq!(&packets[0][..], b"a packet split across reads");
        assert_eq!(buffer.state_name(), "WaitingForHeader");
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let mut all = Vec::new();

        for byte in make_frame(b"hi") {
            all.extend(buffer.push(&[byte]).unwrap());
        }

        assert_eq!(all.len(), 1);
        assert_eq!(&all[0][..], b"hi");
    }

    #[test]
    fn test_max_frame_size_validation() {
        let mut buffer = FrameBuffer::with_max_frame_size(100);

        let result = buffer.push(&encode_frame_header(1000));

        assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
    }
}
