//! Length-prefixed framing.
//!
//! Every transport that speaks over a raw socket (native, proto, proto over
//! TLS) exchanges whole messages as `u32 length || payload` frames.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use snapline_core::error::{Result, SnapError};

pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Any bidirectional byte stream (plain TCP or TLS).
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

pub type BoxIo = Box<dyn Io>;

pub type FrameStream = Framed<BoxIo, LengthDelimitedCodec>;

pub fn framed<T: Io + 'static>(io: T) -> FrameStream {
    let codec = LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_BYTES)
        .new_codec();
    Framed::new(Box::new(io) as BoxIo, codec)
}

pub async fn send(stream: &mut FrameStream, payload: Vec<u8>) -> Result<()> {
    stream
        .send(Bytes::from(payload))
        .await
        .map_err(|e| SnapError::Transport(format!("frame write failed: {e}")))
}

/// `None` on clean end of stream.
pub async fn recv(stream: &mut FrameStream) -> Result<Option<Vec<u8>>> {
    match stream.next().await {
        Some(Ok(buf)) => Ok(Some(buf.to_vec())),
        Some(Err(e)) => Err(SnapError::Transport(format!("frame read failed: {e}"))),
        None => Ok(None),
    }
}
