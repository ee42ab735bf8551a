//! Length-prefixed bincode frames.
//!
//! A frame is a big-endian `u32` body length followed by the bincode
//! (standard configuration) encoding of one message.

use bincode::{Decode, Encode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::RemoteError;

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Encode a message into a frame body.
pub fn encode<T: Encode>(message: &T) -> Result<Vec<u8>, RemoteError> {
    bincode::encode_to_vec(message, bincode::config::standard())
        .map_err(|e| RemoteError::Encode(e.to_string()))
}

/// Decode a frame body, rejecting trailing bytes.
pub fn decode<T: Decode<()>>(body: &[u8]) -> Result<T, RemoteError> {
    let (message, read) = bincode::decode_from_slice(body, bincode::config::standard())
        .map_err(|e| RemoteError::Decode(e.to_string()))?;
    if read != body.len() {
        return Err(RemoteError::Decode(format!(
            "{} trailing bytes",
            body.len() - read
        )));
    }
    Ok(message)
}

/// Write one frame.
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> Result<(), RemoteError>
where
    W: AsyncWrite + Unpin,
    T: Encode,
{
    let body = encode(message)?;
    if body.len() > MAX_FRAME_LEN {
        return Err(RemoteError::FrameTooLarge {
            len: body.len(),
            max: MAX_FRAME_LEN,
        });
    }
    writer.write_u32(body.len() as u32).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream before the
/// length prefix.
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, RemoteError>
where
    R: AsyncRead + Unpin,
    T: Decode<()>,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(RemoteError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    decode(&body).map(Some)
}
