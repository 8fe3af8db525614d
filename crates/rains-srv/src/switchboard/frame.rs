//! Stream framing: a 4-byte big-endian length prefix, then the payload.
//!
//! The first frame each side sends on a connection is the handshake
//! `HELLO <name>`, naming the node for the lifetime of the connection.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::SrvError;

/// Handshake frame prefix.
pub const HELLO: &str = "HELLO ";

/// Largest accepted handshake frame.
const MAX_HELLO_LEN: usize = 256;

/// One frame read from a stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Payload(Vec<u8>),
    /// A frame over the size limit; its payload was skipped unread.
    Oversized(usize),
}

/// Read one frame. `Ok(None)` means the stream ended between frames.
///
/// An oversized frame is drained without allocating its declared length,
/// so the stream stays aligned on frame boundaries.
pub async fn read_frame<R>(reader: &mut R, max_len: usize) -> io::Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    match reader.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let declared = u32::from_be_bytes(prefix);
    let len = usize::try_from(declared)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame length overflows usize"))?;

    if len > max_len {
        let skipped =
            tokio::io::copy(&mut (&mut *reader).take(u64::from(declared)), &mut tokio::io::sink())
                .await?;
        if skipped < u64::from(declared) {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        return Ok(Some(Frame::Oversized(len)));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(Frame::Payload(payload)))
}

pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame exceeds u32 length"))?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Announce `name` to the other side.
pub async fn write_hello<W>(writer: &mut W, name: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    write_frame(writer, format!("{HELLO}{name}").as_bytes()).await
}

/// Read the other side's handshake and return the name it announced.
pub async fn read_hello<R>(reader: &mut R) -> crate::Result<String>
where
    R: AsyncRead + Unpin,
{
    match read_frame(reader, MAX_HELLO_LEN).await? {
        Some(Frame::Payload(bytes)) => parse_hello(&bytes),
        Some(Frame::Oversized(size)) => Err(SrvError::Switchboard(format!(
            "handshake of {size} bytes exceeds {MAX_HELLO_LEN}"
        ))),
        None => Err(SrvError::Switchboard(
            "connection closed before handshake".into(),
        )),
    }
}

fn parse_hello(bytes: &[u8]) -> crate::Result<String> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|text| text.strip_prefix(HELLO))
        .filter(|name| !name.is_empty() && !name.contains(char::is_whitespace))
        .map(ToString::to_string)
        .ok_or_else(|| SrvError::Switchboard("invalid handshake".into()))
}
