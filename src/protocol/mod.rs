//! Protocol module - wire envelope and stream framing.
//!
//! - [`Envelope`] - `route + length-prefixed payload`, one per message
//! - [`FrameBuffer`] - reassembles `u32`-length-prefixed packets from a
//!   byte stream (used by stream transports such as TCP)

mod envelope;
mod frame_buffer;

pub use envelope::{
    encode_envelope, Envelope, MAX_PAYLOAD_LEN, MAX_ROUTE_LEN, PAYLOAD_LEN_SIZE, ROUTE_LEN_SIZE,
};
pub use frame_buffer::{encode_frame_header, FrameBuffer, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_SIZE};
