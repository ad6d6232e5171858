//! Length-prefixed bincode frames.
//!
//! Each frame is a 4-byte big-endian payload length followed by the bincode
//! encoding of one item.

use std::io::{ErrorKind, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::WorkError;

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest accepted payload (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Encode `item` into a complete frame.
///
/// # Errors
///
/// `WorkError::Transport` if encoding fails or the payload is too large.
pub fn encode_frame<T: Serialize>(item: &T) -> Result<Vec<u8>, WorkError> {
    let payload = bincode::serde::encode_to_vec(item, bincode::config::standard())
        .map_err(|e| WorkError::Transport(format!("encode failed: {e}")))?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WorkError::Transport(format!(
            "payload of {} bytes exceeds {MAX_PAYLOAD_SIZE}",
            payload.len()
        )));
    }
    let length = u32::try_from(payload.len())
        .map_err(|_| WorkError::Transport("payload length overflow".into()))?;
    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Write one frame and flush.
///
/// # Errors
///
/// `WorkError::Transport` on encode or I/O failure.
pub fn write_frame<T: Serialize, W: Write + ?Sized>(writer: &mut W, item: &T) -> Result<(), WorkError> {
    let frame = encode_frame(item)?;
    writer
        .write_all(&frame)
        .and_then(|()| writer.flush())
        .map_err(|e| WorkError::Transport(format!("write failed: {e}")))
}

/// Read one frame. `Ok(None)` on a clean end of stream between frames.
///
/// # Errors
///
/// `WorkError::Transport` on truncated frames, bad lengths, decode or I/O
/// failure.
pub fn read_frame<T: DeserializeOwned, R: Read + ?Sized>(reader: &mut R) -> Result<Option<T>, WorkError> {
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    match reader.read_exact(&mut prefix) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(WorkError::Transport(format!("read failed: {e}"))),
    }
    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_PAYLOAD_SIZE {
        return Err(WorkError::Transport(format!(
            "frame length {length} exceeds {MAX_PAYLOAD_SIZE}"
        )));
    }
    let mut payload = vec![0u8; length];
    reader
        .read_exact(&mut payload)
        .map_err(|e| WorkError::Transport(format!("truncated frame: {e}")))?;
    let (item, _) = bincode::serde::decode_from_slice(&payload, bincode::config::standard())
        .map_err(|e| WorkError::Transport(format!("decode failed: {e}")))?;
    Ok(Some(item))
}
