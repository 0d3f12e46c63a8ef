//! Payload buffers and their ownership rules.
//!
//! A [`Buffer`] is an owned contiguous payload travelling through the
//! protocol: produced by the pipeline, attached to an outgoing data message,
//! or allocated fresh by the decoder for an incoming one. The recycler hook
//! ties each pooled buffer back to its pool.
//!
//! # Invariants
//!
//! - Release-Once: a buffer's memory returns to its pool exactly once, on
//!   every path. Explicit [`Buffer::recycle`] and the `Drop` impl share one
//!   release routine guarded by taking the recycler, so success, error, and
//!   early-return paths all release and none release twice.
//!
//! - Single-Owner: a buffer has one owner at any moment. Attaching it to an
//!   outgoing message moves ownership into the encoded frame; the frame's
//!   drop (after the write completes or fails) is what recycles it.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::ids::ChannelId;

/// Semantic role of a payload, one byte on the wire (the ordinal).
///
/// `is_buffer` distinguishes user data (pooled network buffers on receive)
/// from events (unpooled, exactly-sized allocations). The two flow-control
/// attributes mark the variants the credit contract reacts to: the unaligned
/// checkpoint barrier pauses the channel until the consumer resumes it, and
/// the terminal datum starts the end-of-stream acknowledgement dance.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    /// Bulk user records.
    DataBuffer = 0,
    /// Serialized task event.
    Event = 1,
    /// Task event overtaking buffered data.
    PriorityEvent = 2,
    /// Checkpoint barrier flowing aligned with data.
    AlignedBarrier = 3,
    /// Unaligned checkpoint barrier; pauses the channel once emitted.
    UnalignedBarrier = 4,
    /// Event-time watermark.
    Watermark = 5,
    /// Boundary between resumable segments.
    EndOfSegment = 6,
    /// Last user record seen; consumer acknowledges once drained.
    EndOfData = 7,
    /// Subpartition exhausted; channel can be closed afterwards.
    EndOfPartition = 8,
}

impl DataType {
    /// The wire byte.
    #[must_use]
    pub const fn ordinal(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte. `None` for unknown ordinals.
    #[must_use]
    pub const fn from_ordinal(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::DataBuffer,
            1 => Self::Event,
            2 => Self::PriorityEvent,
            3 => Self::AlignedBarrier,
            4 => Self::UnalignedBarrier,
            5 => Self::Watermark,
            6 => Self::EndOfSegment,
            7 => Self::EndOfData,
            8 => Self::EndOfPartition,
            _ => return None,
        })
    }

    /// True for user data (receives into pooled network buffers).
    #[must_use]
    pub const fn is_buffer(self) -> bool {
        matches!(self, Self::DataBuffer)
    }

    /// True if emitting this datum pauses the channel until the consumer
    /// sends a resume.
    #[must_use]
    pub const fn pauses_consumption(self) -> bool {
        matches!(self, Self::UnalignedBarrier)
    }

    /// True for the terminal datum the consumer acknowledges after draining.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::EndOfData)
    }
}

/// Returns pooled memory to its pool.
///
/// Implemented by buffer pools; the memory arrives cleared of content but
/// with its capacity intact, ready for reuse.
pub trait BufferRecycler: Send + Sync {
    /// Take back one segment of pooled memory.
    fn recycle(&self, memory: BytesMut);
}

/// Allocates receive-side buffers for the decoder.
///
/// Shared across connections and thread-safe; the codec only calls it from
/// its owning task.
pub trait BufferAllocator {
    /// Pooled network buffer for a data payload on `channel`.
    ///
    /// `None` is meaningful, not an error: the channel has been released (or
    /// has no receive budget), so the decoder skips the payload bytes and
    /// carries on.
    fn allocate_pooled(&self, channel: ChannelId) -> Option<Buffer>;

    /// Unpooled buffer of exactly `size` bytes for an event payload.
    fn allocate_unpooled(&self, size: usize, data_type: DataType) -> Buffer;
}

/// The payload memory held by a [`Buffer`].
///
/// Most buffers are `Plain`. `Composite` is the fully-filled case: several
/// logical sub-buffers packed into one frame, each part's length recoverable
/// from the wire as a partial size. The encoder pattern-matches on this
/// instead of downcasting.
#[derive(Debug)]
pub enum BufferPayload {
    /// One contiguous region.
    Plain(BytesMut),
    /// Ordered logical sub-buffers sharing one frame.
    Composite(Vec<Bytes>),
}

/// An owned payload with exactly-once recycling.
pub struct Buffer {
    payload: BufferPayload,
    data_type: DataType,
    compressed: bool,
    recycler: Option<Arc<dyn BufferRecycler>>,
}

impl Buffer {
    /// A plain buffer over `memory`.
    #[must_use]
    pub fn plain(memory: BytesMut, data_type: DataType, compressed: bool) -> Self {
        Self { payload: BufferPayload::Plain(memory), data_type, compressed, recycler: None }
    }

    /// A fully-filled composite over `parts`.
    ///
    /// Parts keep their individual lengths; those become the partial sizes
    /// on the wire. Composite buffers are never pooled.
    #[must_use]
    pub fn composite(parts: Vec<Bytes>, data_type: DataType, compressed: bool) -> Self {
        Self { payload: BufferPayload::Composite(parts), data_type, compressed, recycler: None }
    }

    /// Attach the pool hook that reclaims this buffer's memory.
    #[must_use]
    pub fn with_recycler(mut self, recycler: Arc<dyn BufferRecycler>) -> Self {
        self.recycler = Some(recycler);
        self
    }

    /// Semantic role of the payload.
    #[must_use]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Retag the payload (set by the decoder after pooled allocation).
    pub fn set_data_type(&mut self, data_type: DataType) {
        self.data_type = data_type;
    }

    /// True if the payload bytes are already compressed.
    #[must_use]
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// Mark the payload as (not) compressed.
    pub fn set_compressed(&mut self, compressed: bool) {
        self.compressed = compressed;
    }

    /// The payload memory, for encoder pattern-matching.
    #[must_use]
    pub fn payload(&self) -> &BufferPayload {
        &self.payload
    }

    /// Total readable payload bytes.
    #[must_use]
    pub fn readable_size(&self) -> usize {
        match &self.payload {
            BufferPayload::Plain(memory) => memory.len(),
            BufferPayload::Composite(parts) => parts.iter().map(Bytes::len).sum(),
        }
    }

    /// Writable capacity of a plain buffer's memory. A pooled buffer's
    /// capacity is the produce size its channel asked for. Composite
    /// payloads are already full and report their readable size.
    #[must_use]
    pub fn capacity(&self) -> usize {
        match &self.payload {
            BufferPayload::Plain(memory) => memory.capacity(),
            BufferPayload::Composite(parts) => parts.iter().map(Bytes::len).sum(),
        }
    }

    /// Number of logical sub-buffers; zero for plain buffers.
    #[must_use]
    pub fn num_parts(&self) -> usize {
        match &self.payload {
            BufferPayload::Plain(_) => 0,
            BufferPayload::Composite(parts) => parts.len(),
        }
    }

    /// Per-part sizes; empty for plain buffers.
    #[must_use]
    pub fn part_sizes(&self) -> Vec<u32> {
        match &self.payload {
            BufferPayload::Plain(_) => Vec::new(),
            BufferPayload::Composite(parts) => {
                parts.iter().map(|part| part.len() as u32).collect()
            },
        }
    }

    /// Iterate the payload as contiguous chunks, in wire order.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        const EMPTY: &[Bytes] = &[];
        let (plain, parts) = match &self.payload {
            BufferPayload::Plain(memory) => (Some(&memory[..]), EMPTY.iter()),
            BufferPayload::Composite(parts) => (None, parts.iter()),
        };
        plain.into_iter().chain(parts.map(|part| &part[..]))
    }

    /// Copy the payload into one contiguous `Bytes`.
    #[must_use]
    pub fn to_bytes(&self) -> Bytes {
        match &self.payload {
            BufferPayload::Plain(memory) => Bytes::copy_from_slice(memory),
            BufferPayload::Composite(parts) => {
                let mut all = BytesMut::with_capacity(self.readable_size());
                for part in parts {
                    all.extend_from_slice(part);
                }
                all.freeze()
            },
        }
    }

    /// Append received bytes into a plain buffer (decoder fill path).
    pub(crate) fn write(&mut self, src: &[u8]) {
        match &mut self.payload {
            BufferPayload::Plain(memory) => memory.extend_from_slice(src),
            // Decoders only fill plain buffers; composites exist outbound only.
            BufferPayload::Composite(_) => debug_assert!(false, "fill of composite buffer"),
        }
    }

    /// Return the buffer to its pool now.
    ///
    /// Dropping has the same effect; this form just names the intent at call
    /// sites that release early.
    pub fn recycle(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(recycler) = self.recycler.take() {
            let payload =
                std::mem::replace(&mut self.payload, BufferPayload::Plain(BytesMut::new()));
            if let BufferPayload::Plain(mut memory) = payload {
                memory.clear();
                recycler.recycle(memory);
            }
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("data_type", &self.data_type)
            .field("compressed", &self.compressed)
            .field("readable_size", &self.readable_size())
            .field("num_parts", &self.num_parts())
            .field("pooled", &self.recycler.is_some())
            .finish()
    }
}

/// Logical payload equality: same role, same flags, same bytes. A composite
/// and a plain buffer with identical concatenated content compare equal; the
/// split lives in the message's partial sizes, not here.
impl PartialEq for Buffer {
    fn eq(&self, other: &Self) -> bool {
        self.data_type == other.data_type
            && self.compressed == other.compressed
            && self.to_bytes() == other.to_bytes()
    }
}

impl Eq for Buffer {}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingRecycler {
        recycled: AtomicUsize,
    }

    impl BufferRecycler for CountingRecycler {
        fn recycle(&self, _memory: BytesMut) {
            self.recycled.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn unknown_ordinal_rejected() {
        assert_eq!(DataType::from_ordinal(8), Some(DataType::EndOfPartition));
        assert_eq!(DataType::from_ordinal(9), None);
        assert_eq!(DataType::from_ordinal(0xFF), None);
    }

    #[test]
    fn ordinals_round_trip() {
        for byte in 0..=8 {
            let data_type = DataType::from_ordinal(byte).unwrap();
            assert_eq!(data_type.ordinal(), byte);
        }
    }

    #[test]
    fn drop_recycles_exactly_once() {
        let recycler = Arc::new(CountingRecycler::default());
        let buffer = Buffer::plain(BytesMut::from(&b"abc"[..]), DataType::DataBuffer, false)
            .with_recycler(Arc::clone(&recycler) as Arc<dyn BufferRecycler>);
        drop(buffer);
        assert_eq!(recycler.recycled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_recycle_does_not_double_release() {
        let recycler = Arc::new(CountingRecycler::default());
        let buffer = Buffer::plain(BytesMut::from(&b"abc"[..]), DataType::DataBuffer, false)
            .with_recycler(Arc::clone(&recycler) as Arc<dyn BufferRecycler>);
        buffer.recycle();
        assert_eq!(recycler.recycled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn composite_exposes_part_sizes() {
        let buffer = Buffer::composite(
            vec![Bytes::from(vec![1u8; 30]), Bytes::from(vec![2u8; 70])],
            DataType::DataBuffer,
            false,
        );
        assert_eq!(buffer.readable_size(), 100);
        assert_eq!(buffer.part_sizes(), vec![30, 70]);
        assert_eq!(buffer.num_parts(), 2);
    }

    #[test]
    fn composite_equals_plain_with_same_content() {
        let composite = Buffer::composite(
            vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")],
            DataType::DataBuffer,
            false,
        );
        let plain = Buffer::plain(BytesMut::from(&b"abcd"[..]), DataType::DataBuffer, false);
        assert_eq!(composite, plain);
    }
}
