#![forbid(unsafe_code)]

pub mod framing;
pub mod messages;
pub mod pb;

pub use framing::{
	DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN, FramingError, decode_frame, decode_single_frame, encode_frame,
	try_decode_frame_from_buffer,
};
pub use messages::{ClientRequest, ErrorKind, EventKind, ProtocolError, ServerEvent};

/// Protocol version constants.
pub mod version {
	/// Version written into every envelope.
	pub const PROTOCOL_VERSION: u32 = 1;
}
