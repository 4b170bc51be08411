//! Stream codec for connection byte channels.
//!
//! A connection starts with a fixed header written by each side before it
//! reads the peer's header. After that every application message is one
//! bincode object behind a `u32` big-endian length.

use bytes::{BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const STREAM_MAGIC: u32 = 0xB0AB_5E55;
pub const PROTOCOL_VERSION: u16 = 1;
pub const MAX_FRAME_LEN: usize = 1 << 20;

const HEADER_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("bincode: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("bad stream header (magic {magic:#010x}, version {version})")]
    BadHeader { magic: u32, version: u16 },

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),
}

/// Writes and flushes the stream header.
pub async fn write_header<W>(writer: &mut W) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(HEADER_LEN);
    buf.put_u32(STREAM_MAGIC);
    buf.put_u16(PROTOCOL_VERSION);
    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the peer's stream header and checks it matches ours.
pub async fn read_header<R>(reader: &mut R) -> Result<(), CodecError>
where
    R: AsyncRead + Unpin,
{
    let magic = reader.read_u32().await?;
    let version = reader.read_u16().await?;
    if magic != STREAM_MAGIC || version != PROTOCOL_VERSION {
        return Err(CodecError::BadHeader { magic, version });
    }
    Ok(())
}

pub fn encode_frame<T: Serialize>(message: &T) -> Result<BytesMut, CodecError> {
    let payload = bincode::serialize(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Writes one message as a single frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let buf = encode_frame(message)?;
    writer.write_all(&buf).await?;
    Ok(())
}

/// Reads exactly one message.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<T, CodecError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(bincode::deserialize(&payload)?)
}
