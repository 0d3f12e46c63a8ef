//! Fuzz target for message-body decoding
//!
//! Wraps arbitrary bytes in a well-formed frame for every known message id,
//! so the fuzzer spends its budget inside the per-message decoders instead
//! of bouncing off the magic-number check:
//! - Malformed identifier and set encodings
//! - Partial-size accounting confusion
//! - Truncated or oversized field claims
//!
//! The decoders should NEVER panic, only return errors.

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

fuzz_target!(|body: &[u8]| {
    for msg_id in 0u8..=11 {
        let frame_length = 9 + body.len() as u32;
        let mut src = BytesMut::with_capacity(frame_length as usize);
        src.extend_from_slice(&frame_length.to_be_bytes());
        src.extend_from_slice(&0xBADC_0FFEu32.to_be_bytes());
        src.extend_from_slice(&[msg_id]);
        src.extend_from_slice(body);

        let mut decoder = MessageDecoder::new(AdmitAll);
        let _ = decoder.decode(&mut src);
    }
});
