//! Length-prefixed wire framing.
//!
//! Every message is `[u32 big-endian length][JSON body]`. The prefix is
//! mandatory; newline-delimited framing is not supported (large JSON
//! payloads embed newlines). Oversize frames are a protocol error and
//! close the connection without desynchronizing the peer.

use crate::error::{ProtocolError, Result};
use std::io::{Read, Write};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame body length: 64 MiB.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Encodes a frame: length prefix plus body.
///
/// # Errors
///
/// [`ProtocolError::FrameTooLarge`] when the body exceeds the maximum.
pub fn encode_frame(body: &[u8]) -> Result<Vec<u8>> {
    check_len(body.len())?;
    let mut frame = Vec::with_capacity(4 + body.len());
    #[allow(clippy::cast_possible_truncation)]
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    Ok(frame)
}

/// Writes one frame to a synchronous stream.
///
/// # Errors
///
/// Frame-size or I/O errors.
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    let frame = encode_frame(body)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame from a synchronous stream.
///
/// Returns `None` on clean EOF at a frame boundary.
///
/// # Errors
///
/// [`ProtocolError::FrameTooLarge`] for oversize frames,
/// [`ProtocolError::InvalidFrame`] for EOF inside a frame.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::InvalidFrame(
                "connection closed inside frame header".to_string(),
            )
            .into());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    check_len(len)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(|e| {
        ProtocolError::InvalidFrame(format!("connection closed inside frame body: {e}"))
    })?;
    Ok(Some(body))
}

/// Reads one frame from an async stream.
///
/// Returns `None` on clean EOF.
///
/// # Errors
///
/// Same failure modes as [`read_frame`].
pub async fn read_frame_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    check_len(len)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        crate::Error::Protocol(ProtocolError::InvalidFrame(format!(
            "connection closed inside frame body: {e}"
        )))
    })?;
    Ok(Some(body))
}

/// Writes one frame to an async stream.
///
/// # Errors
///
/// Frame-size or I/O errors.
pub async fn write_frame_async<W: AsyncWrite + Unpin>(writer: &mut W, body: &[u8]) -> Result<()> {
    let frame = encode_frame(body)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

fn check_len(len: usize) -> Result<()> {
    if len > MAX_FRAME_LEN {
        return Err(crate::Error::Protocol(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        }));
    }
    Ok(())
}
