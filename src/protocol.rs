//! Zabbix TCP framing.
//!
//! Every message on the wire is a fixed 13 byte header followed by the
//! payload:
//!
//! ```text
//! +------+-------+-------------+---------------+-----------+
//! | ZBXD | flags | length (LE) | reserved (LE) | payload   |
//! | 4    | 1     | 4           | 4             | length    |
//! +------+-------+-------------+---------------+-----------+
//! ```
//!
//! The reserved word carries the uncompressed size of compressed frames and
//! is ignored for plain ones.
//!
//! Only the plain protocol flag (`0x01`) is understood. Compressed frames
//! are rejected as malformed.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Frame header signature.
pub const HEADER_MAGIC: &[u8; 4] = b"ZBXD";

/// Header flag for an uncompressed Zabbix protocol frame.
pub const FLAG_ZABBIX_PROTOCOL: u8 = 0x01;

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 13;

/// Largest payload accepted from a peer (128 MiB).
pub const MAX_PAYLOAD_SIZE: u64 = 128 * 1024 * 1024;

/// Errors from framed reads and writes.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("missing ZBXD header")]
    MissingHeader,

    #[error("unsupported header flags 0x{0:02x}")]
    UnsupportedFlags(u8),

    #[error("payload size {size} exceeds maximum allowed size")]
    TooLarge { size: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Validate a frame header and return the payload length it announces.
pub fn parse_header(header: &[u8; HEADER_SIZE]) -> Result<u64, FrameError> {
    let (magic, rest) = header.split_at(HEADER_MAGIC.len());
    if magic != HEADER_MAGIC {
        return Err(FrameError::MissingHeader);
    }

    let flags = rest[0];
    if flags != FLAG_ZABBIX_PROTOCOL {
        return Err(FrameError::UnsupportedFlags(flags));
    }

    let mut length = [0u8; 4];
    length.copy_from_slice(&rest[1..5]);
    let size = u64::from(u32::from_le_bytes(length));
    if size > MAX_PAYLOAD_SIZE {
        return Err(FrameError::TooLarge { size });
    }

    Ok(size)
}

/// Encode `payload` into a complete frame.
pub fn encode(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    frame.put_slice(HEADER_MAGIC);
    frame.put_u8(FLAG_ZABBIX_PROTOCOL);
    frame.put_u32_le(payload.len() as u32);
    frame.put_u32_le(0);
    frame.put_slice(payload);
    frame.freeze()
}

/// Read one frame and return its payload.
///
/// The whole read, header and payload, must finish within `timeout`.
pub async fn read_frame<R>(reader: &mut R, timeout: Duration) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin,
{
    tokio::time::timeout(timeout, read_payload(reader))
        .await
        .map_err(|_| FrameError::Timeout(timeout))?
}

async fn read_payload<R>(reader: &mut R) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await?;

    let size = parse_header(&header)?;

    // Grow with the data actually received rather than the announced size
    let mut payload = Vec::new();
    (&mut *reader).take(size).read_to_end(&mut payload).await?;
    if (payload.len() as u64) < size {
        return Err(FrameError::Io(std::io::ErrorKind::UnexpectedEof.into()));
    }
    Ok(Bytes::from(payload))
}

/// Write `payload` as one frame, flushing before returning.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8], timeout: Duration) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if u32::try_from(payload.len()).is_err() {
        return Err(FrameError::TooLarge {
            size: payload.len() as u64,
        });
    }

    let frame = encode(payload);
    tokio::time::timeout(timeout, write_all_flushed(writer, &frame))
        .await
        .map_err(|_| FrameError::Timeout(timeout))?
        .map_err(FrameError::from)
}

async fn write_all_flushed<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
