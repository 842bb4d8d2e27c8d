// Codec - Length-delimited framing for messages on a byte stream

use super::message::{Message, WireError};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Default upper bound on a single frame
pub const DEFAULT_MAX_FRAME_LEN: usize = 4 * 1024 * 1024;

/// A byte stream split into length-prefixed frames
pub type Framing<T> = Framed<T, LengthDelimitedCodec>;

/// Errors reading or writing frames
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("Stream closed by peer")]
    Closed,
}

/// Wrap a stream in length-delimited framing
pub fn framed<T>(stream: T, max_frame_len: usize) -> Framing<T>
where
    T: AsyncRead + AsyncWrite,
{
    Framed::new(
        stream,
        LengthDelimitedCodec::builder()
            .max_frame_length(max_frame_len)
            .new_codec(),
    )
}

/// Encode a message into a frame payload
pub fn encode(msg: &Message) -> Result<Bytes, WireError> {
    msg.to_bytes().map(Bytes::from)
}

/// Write one frame
pub async fn write_frame<T>(framing: &mut Framing<T>, frame: Bytes) -> Result<(), CodecError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    framing.send(frame).await?;
    Ok(())
}

/// Read one raw frame
pub async fn read_frame<T>(framing: &mut Framing<T>) -> Result<Bytes, CodecError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    match framing.next().await {
        Some(frame) => Ok(frame?.freeze()),
        None => Err(CodecError::Closed),
    }
}

/// Read and decode one message
pub async fn read_message<T>(framing: &mut Framing<T>) -> Result<Message, CodecError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let frame = read_frame(framing).await?;
    Ok(Message::from_bytes(&frame)?)
}
