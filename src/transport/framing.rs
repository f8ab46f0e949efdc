//! Native-messaging frame codec.
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────┐
//! │ length: u32 LE (4 B) │ UTF-8 JSON (length bytes)    │
//! └──────────────────────┴──────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::io::{Error as IoError, ErrorKind};

use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest frame accepted from the helper (browser limit for host → page).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Size of the length prefix.
const HEADER_LEN: usize = 4;

// ============================================================================
// Encoding
// ============================================================================

/// Serializes `message` into one length-prefixed frame.
///
/// # Errors
///
/// Returns [`Error::Json`] if serialization fails, or [`Error::Protocol`]
/// if the payload does not fit the length prefix.
pub fn encode_frame<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    let len = u32::try_from(payload.len())
        .map_err(|_| Error::protocol(format!("Frame too large: {} bytes", payload.len())))?;

    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Writes one frame and flushes.
///
/// # Errors
///
/// Returns [`Error::Io`] on write failure.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(message)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

/// Reads one frame.
///
/// Returns `Ok(None)` on a clean end of stream between frames.
///
/// # Errors
///
/// - [`Error::Io`] if the stream ends inside a frame or its header
/// - [`Error::Protocol`] if the frame exceeds [`MAX_FRAME_LEN`]
/// - [`Error::Json`] if the payload is not JSON
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Value>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_LEN];
    let mut filled = 0;
    while filled < HEADER_LEN {
        let read = reader.read(&mut header[filled..]).await?;
        if read == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(IoError::new(
                ErrorKind::UnexpectedEof,
                format!("Stream ended after {filled} of {HEADER_LEN} header bytes"),
            )
            .into());
        }
        filled += read;
    }

    let len = u32::from_le_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(Error::protocol(format!(
            "Frame of {len} bytes exceeds limit of {MAX_FRAME_LEN}"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(serde_json::from_slice(&payload)?))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn test_encode_prefix() {
        let frame = encode_frame(&json!({ "a": 1 })).unwrap();
        assert_eq!(&frame[..4], &7u32.to_le_bytes());
        assert_eq!(&frame[4..], br#"{"a":1}"#);
    }

    #[tokio::test]
    async fn test_read_back_to_back_frames() {
        let mut bytes = encode_frame(&json!({ "event": "PortClosed", "id": 1 })).unwrap();
        bytes.extend(encode_frame(&json!({ "debug": "hi" })).unwrap());
        let mut reader = bytes.as_slice();

        let first = read_frame(&mut reader).await.unwrap().unwrap();
        let second = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(first["event"], "PortClosed");
        assert_eq!(second["debug"], "hi");
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_io_error() {
        let bytes = encode_frame(&json!({ "event": "AppExited" })).unwrap();
        let mut reader = &bytes[..bytes.len() - 2];

        assert!(matches!(read_frame(&mut reader).await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_truncated_header_is_io_error() {
        let bytes = encode_frame(&json!({ "event": "AppExited" })).unwrap();
        let mut reader = &bytes[..2];

        match read_frame(&mut reader).await {
            Err(Error::Io(e)) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            other => panic!("expected truncated header error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = ((MAX_FRAME_LEN + 1) as u32).to_le_bytes();
        let mut reader = &header[..];

        assert!(matches!(
            read_frame(&mut reader).await,
            Err(Error::Protocol { .. })
        ));
    }

    #[tokio::test]
    async fn test_write_frame_round_trips_through_duplex() {
        let (mut client, mut server) = tokio::io::duplex(64);
        write_frame(&mut client, &json!({ "command": "listPorts" }))
            .await
            .unwrap();

        let value = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(value, json!({ "command": "listPorts" }));
    }
}
