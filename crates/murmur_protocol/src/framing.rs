#![forbid(unsafe_code)]

use bytes::BytesMut;
use prost::Message;
use thiserror::Error;

/// Default maximum frame payload size.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024; // 1 MiB

/// Length of the big-endian `u32` payload prefix.
pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, Error)]
pub enum FramingError {
	#[error("frame exceeds maximum size: len={len} max={max}")]
	FrameTooLarge { len: usize, max: usize },

	#[error("insufficient data: need={need} have={have}")]
	InsufficientData { need: usize, have: usize },

	#[error("trailing bytes after frame: extra={extra}")]
	TrailingData { extra: usize },

	#[error("protobuf decode error: {0}")]
	Decode(#[from] prost::DecodeError),

	#[error("protobuf encode error: {0}")]
	Encode(#[from] prost::EncodeError),
}

/// Encode a message into a length-prefixed frame.
pub fn encode_frame<M: Message>(msg: &M, max_frame_size: usize) -> Result<Vec<u8>, FramingError> {
	let payload_len = msg.encoded_len();
	if payload_len > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len: payload_len,
			max: max_frame_size,
		});
	}

	let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload_len);
	out.extend_from_slice(&(payload_len as u32).to_be_bytes());
	msg.encode(&mut out)?;
	Ok(out)
}

fn read_prefix(src: &[u8], max_frame_size: usize) -> Result<Option<usize>, FramingError> {
	let Some(header) = src.first_chunk::<FRAME_HEADER_LEN>() else {
		return Ok(None);
	};

	let len = u32::from_be_bytes(*header) as usize;
	if len > max_frame_size {
		return Err(FramingError::FrameTooLarge {
			len,
			max: max_frame_size,
		});
	}
	Ok(Some(len))
}

/// Decode one frame from the start of `src`, returning the message and bytes consumed.
pub fn decode_frame<M: Message + Default>(src: &[u8], max_frame_size: usize) -> Result<(M, usize), FramingError> {
	let Some(len) = read_prefix(src, max_frame_size)? else {
		return Err(FramingError::InsufficientData {
			need: FRAME_HEADER_LEN,
			have: src.len(),
		});
	};

	let need = FRAME_HEADER_LEN + len;
	if src.len() < need {
		return Err(FramingError::InsufficientData { need, have: src.len() });
	}

	let msg = M::decode(&src[FRAME_HEADER_LEN..need])?;
	Ok((msg, need))
}

/// Decode a buffer that must hold exactly one frame (one transport message).
pub fn decode_single_frame<M: Message + Default>(src: &[u8], max_frame_size: usize) -> Result<M, FramingError> {
	let (msg, used) = decode_frame(src, max_frame_size)?;
	if used != src.len() {
		return Err(FramingError::TrailingData {
			extra: src.len() - used,
		});
	}
	Ok(msg)
}

/// Try to split one frame off a growable stream buffer.
///
/// Returns `Ok(None)` until a full frame is buffered.
pub fn try_decode_frame_from_buffer<M: Message + Default>(
	buf: &mut BytesMut,
	max_frame_size: usize,
) -> Result<Option<M>, FramingError> {
	let Some(len) = read_prefix(buf, max_frame_size)? else {
		return Ok(None);
	};

	if buf.len() < FRAME_HEADER_LEN + len {
		return Ok(None);
	}

	let frame = buf.split_to(FRAME_HEADER_LEN + len);
	let msg = M::decode(&frame[FRAME_HEADER_LEN..])?;
	Ok(Some(msg))
}
