//! The data-carrying message.
//!
//! `BufferResponse` is the only message with an attached payload buffer and
//! the only one that consumes credit. Its header is written separately from
//! the payload so the encoder never copies payload bytes; on receive, the
//! payload lands in a freshly allocated buffer (pooled for data, unpooled
//! for events).
//!
//! Wire layout of the body, after the frame prefix:
//!
//! ```text
//! receiver channel id   16
//! subpartition id        4
//! num partial buffers    4
//! sequence number        4
//! backlog                4
//! data type ordinal      1
//! is compressed          1
//! payload readable size  4
//! partial sizes          4 x num partial buffers
//! payload                readable size
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::{
    buffer::{Buffer, BufferAllocator, DataType},
    errors::{ProtocolError, Result, ensure_remaining},
    ids::ChannelId,
};

/// Fixed part of the body, excluding partial sizes and payload.
const FIXED_HEADER_LENGTH: usize = ChannelId::WIRE_LENGTH + 4 + 4 + 4 + 4 + 1 + 1 + 4;

/// Producer → consumer: one payload buffer for a channel.
///
/// # Invariants
///
/// - Credit: every `BufferResponse` consumes exactly one credit, including
///   size-zero responses and responses whose payload was skipped because the
///   channel is gone. The receive side accounts on the message, never on the
///   presence of a buffer.
/// - Partial sizes: `partial_sizes.len()` is the wire `num_partial_buffers`;
///   when non-empty their sum equals the payload size.
/// - Sequencing: per channel, sequence numbers are strictly increasing from
///   zero.
#[derive(Debug, PartialEq, Eq)]
pub struct BufferResponse {
    /// Channel the payload belongs to.
    pub receiver_id: ChannelId,
    /// Subpartition the payload came from.
    pub subpartition_id: u32,
    /// Per-channel sequence number, strictly increasing from zero.
    pub sequence_number: u32,
    /// Producer backlog at send time; zero when none.
    pub backlog: u32,
    /// Semantic role of the payload.
    pub data_type: DataType,
    /// True if the payload bytes are already compressed.
    pub is_compressed: bool,
    /// Sizes of the logical sub-buffers inside a composite payload; empty
    /// for single-unit payloads.
    pub partial_sizes: Vec<u32>,
    /// The payload. `None` for size-zero responses and for payloads skipped
    /// because the target channel was released mid-flight.
    pub buffer: Option<Buffer>,
}

impl BufferResponse {
    /// Wrap an outgoing payload buffer.
    ///
    /// The data type, compression flag, and partial sizes are taken from the
    /// buffer itself, so a composite payload automatically announces its
    /// parts.
    #[must_use]
    pub fn new(
        buffer: Buffer,
        receiver_id: ChannelId,
        subpartition_id: u32,
        sequence_number: u32,
        backlog: u32,
    ) -> Self {
        Self {
            receiver_id,
            subpartition_id,
            sequence_number,
            backlog,
            data_type: buffer.data_type(),
            is_compressed: buffer.is_compressed(),
            partial_sizes: buffer.part_sizes(),
            buffer: Some(buffer),
        }
    }

    /// Readable payload size; zero when no buffer is attached.
    #[must_use]
    pub fn buffer_size(&self) -> u32 {
        self.buffer.as_ref().map_or(0, |buffer| buffer.readable_size() as u32)
    }

    pub(crate) fn header_length(&self) -> usize {
        FIXED_HEADER_LENGTH + 4 * self.partial_sizes.len()
    }

    pub(crate) fn payload_length(&self) -> usize {
        self.buffer.as_ref().map_or(0, Buffer::readable_size)
    }

    /// Validate the partial-size accounting before anything hits the wire.
    fn check_partial_sizes(&self) -> Result<()> {
        if let Some(buffer) = &self.buffer {
            if buffer.num_parts() > 0 && buffer.num_parts() != self.partial_sizes.len() {
                return Err(ProtocolError::contract(format!(
                    "composite payload has {} parts but {} partial sizes",
                    buffer.num_parts(),
                    self.partial_sizes.len()
                )));
            }
        }
        if !self.partial_sizes.is_empty() {
            let sum: u64 = self.partial_sizes.iter().copied().map(u64::from).sum();
            if sum != u64::from(self.buffer_size()) {
                return Err(ProtocolError::contract(format!(
                    "partial sizes sum to {sum}, payload is {} bytes",
                    self.buffer_size()
                )));
            }
        }
        Ok(())
    }

    /// Write the message header and hand back the payload for zero-copy
    /// transmission.
    pub(crate) fn write_header(mut self, dst: &mut BytesMut) -> Result<Option<Buffer>> {
        self.check_partial_sizes()?;

        self.receiver_id.write_to(dst);
        dst.put_u32(self.subpartition_id);
        dst.put_u32(self.partial_sizes.len() as u32);
        dst.put_u32(self.sequence_number);
        dst.put_u32(self.backlog);
        dst.put_u8(self.data_type.ordinal());
        dst.put_u8(u8::from(self.is_compressed));
        dst.put_u32(self.buffer_size());
        for &size in &self.partial_sizes {
            dst.put_u32(size);
        }
        Ok(self.buffer.take())
    }

    /// Decode one body, allocating the receive buffer through `allocator`.
    pub(crate) fn read_from<A: BufferAllocator>(src: &mut Bytes, allocator: &A) -> Result<Self> {
        ensure_remaining(src.remaining(), FIXED_HEADER_LENGTH, "buffer response header")?;

        let receiver_id = ChannelId::read_from(src)?;
        let subpartition_id = src.get_u32();
        let num_partial_buffers = src.get_u32() as usize;
        let sequence_number = src.get_u32();
        let backlog = src.get_u32();
        let ordinal = src.get_u8();
        let data_type = DataType::from_ordinal(ordinal)
            .ok_or_else(|| ProtocolError::corrupt(format!("unknown data type ordinal {ordinal}")))?;
        let is_compressed = src.get_u8() != 0;
        let size = src.get_u32() as usize;

        ensure_remaining(src.remaining(), 4 * num_partial_buffers, "partial sizes")?;
        let partial_sizes: Vec<u32> = (0..num_partial_buffers).map(|_| src.get_u32()).collect();
        if !partial_sizes.is_empty() {
            let sum: u64 = partial_sizes.iter().copied().map(u64::from).sum();
            if sum != size as u64 {
                return Err(ProtocolError::contract(format!(
                    "partial sizes sum to {sum}, payload is {size} bytes"
                )));
            }
        }

        ensure_remaining(src.remaining(), size, "buffer payload")?;
        let buffer = Self::receive_payload(
            src,
            allocator,
            receiver_id,
            data_type,
            is_compressed,
            size,
        );

        Ok(Self {
            receiver_id,
            subpartition_id,
            sequence_number,
            backlog,
            data_type,
            is_compressed,
            partial_sizes,
            buffer,
        })
    }

    /// Allocate and fill the receive buffer, always consuming `size` bytes
    /// of input.
    ///
    /// Size-zero payloads recycle any pooled allocation immediately. A
    /// released channel makes the pooled allocator return `None`; the bytes
    /// are skipped and the caller still accounts the credit.
    fn receive_payload<A: BufferAllocator>(
        src: &mut Bytes,
        allocator: &A,
        receiver_id: ChannelId,
        data_type: DataType,
        is_compressed: bool,
        size: usize,
    ) -> Option<Buffer> {
        if size == 0 {
            if data_type.is_buffer() {
                if let Some(unused) = allocator.allocate_pooled(receiver_id) {
                    unused.recycle();
                }
            }
            return None;
        }

        if data_type.is_buffer() {
            match allocator.allocate_pooled(receiver_id) {
                Some(mut buffer) => {
                    buffer.set_data_type(data_type);
                    buffer.set_compressed(is_compressed);
                    buffer.write(&src[..size]);
                    src.advance(size);
                    Some(buffer)
                },
                None => {
                    src.advance(size);
                    None
                },
            }
        } else {
            let mut buffer = allocator.allocate_unpooled(size, data_type);
            buffer.set_compressed(is_compressed);
            buffer.write(&src[..size]);
            src.advance(size);
            Some(buffer)
        }
    }
}
