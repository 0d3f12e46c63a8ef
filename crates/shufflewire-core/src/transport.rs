//! Async helpers at the I/O boundary.
//!
//! The only suspension points in the stack: flushing frames into an
//! `AsyncWrite` and pulling frames out of an `AsyncRead`. Encoding and
//! decoding themselves never suspend. The outer loop — connection
//! establishment, TLS, reconnects — stays with the caller.

use shufflewire_proto::{BufferAllocator, MessageDecoder, ShuffleMessage, encode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::FramedRead;

use crate::error::Result;

/// Write one message as a frame and flush it.
///
/// The header goes out first, then the payload chunks of a data message —
/// straight from the attached buffer, no copy. Whatever happens, the
/// payload buffer is released exactly once: on success after the flush, on
/// failure or cancellation when the encoded frame drops.
pub async fn send_message<W>(writer: &mut W, message: ShuffleMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(message)?;
    writer.write_all(frame.header()).await?;
    if let Some(buffer) = frame.payload() {
        for chunk in buffer.chunks() {
            writer.write_all(chunk).await?;
        }
    }
    writer.flush().await?;
    Ok(())
}

/// A message stream over `reader`, allocating receive buffers from
/// `allocator`.
///
/// Yields one decoded message per complete frame and buffers partial frames
/// across reads, however the transport chunks them.
pub fn framed_read<R, A>(reader: R, allocator: A) -> FramedRead<R, MessageDecoder<A>>
where
    R: AsyncRead,
    A: BufferAllocator,
{
    FramedRead::new(reader, MessageDecoder::new(allocator))
}
