//! Framed reads and writes over any async byte stream.

use peerlink_types::message::{decode_frame, decode_length, encode_frame};
use peerlink_types::{Frame, WireError, WireResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Write a framed message (4-byte length + JSON).
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> WireResult<()>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read a framed message (4-byte length + JSON).
///
/// A clean EOF before the header maps to `ConnectionClosed`.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: u32) -> WireResult<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = decode_length(&header);
    if len > max_frame_size {
        return Err(WireError::MessageTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;

    decode_frame(&body)
}
