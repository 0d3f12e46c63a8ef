//! Fuzz target for the streaming frame decoder
//!
//! Feeds arbitrary byte sequences, split at arbitrary points, through the
//! stateful decoder to find:
//! - Parser crashes or panics
//! - Integer overflows in length arithmetic
//! - Buffer over-reads on truncated frames
//!
//! The decoder should NEVER panic. All invalid inputs must come back as
//! errors, and any error must stop the stream.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use shufflewire_proto::{Buffer, BufferAllocator, ChannelId, DataType, MessageDecoder};
use tokio_util::codec::Decoder;

struct AdmitAll;

impl BufferAllocator for AdmitAll {
    fn allocate_pooled(&self, _channel: ChannelId) -> Option<Buffer> {
        Some(Buffer::plain(BytesMut::new(), DataType::DataBuffer, false))
    }

    fn allocate_unpooled(&self, size: usize, data_type: DataType) -> Buffer {
        Buffer::plain(BytesMut::with_capacity(size.min(1 << 20)), data_type, false)
    }
}

fuzz_target!(|input: (Vec<u8>, u8)| {
    let (data, chunk) = input;
    let chunk_size = usize::from(chunk).max(1);

    let mut decoder = MessageDecoder::new(AdmitAll);
    let mut src = BytesMut::new();
    for piece in data.chunks(chunk_size) {
        src.extend_from_slice(piece);
        loop {
            match decoder.decode(&mut src) {
                Ok(Some(_message)) => {},
                Ok(None) => break,
                // Corrupted stream: the connection would be torn down here.
                Err(_) => return,
            }
        }
    }
});
