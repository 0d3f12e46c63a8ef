//! Control-plane messages: partition requests, credit grants, and the
//! channel lifecycle signals exchanged between consumer and producer.
//!
//! All of these are small fixed-layout bodies; the strictly-positive fields
//! (`credit`, `buffer_size`, `backlog`, `segment_id`) are validated both at
//! construction and at decode, so an in-memory value and a wire value obey
//! the same contract.

use bytes::{Buf, BufMut, Bytes};

use crate::{
    errors::{ProtocolError, Result, ensure_remaining},
    ids::{ChannelId, PartitionId, SubpartitionIndexSet},
};

/// Serializes user-defined task events to and from opaque blobs.
///
/// The codec never looks inside event bytes; deserialization happens at the
/// dispatch layer with the caller's registry context. A failing
/// `from_serialized` is a [`ProtocolError::DecodeFailure`]: scoped to the
/// channel that carried the event, never fatal to the connection.
pub trait EventSerializer {
    /// The in-memory event type.
    type Event;
    /// Caller-supplied deserialization context (class registry etc.).
    type Context;

    /// Serialize an event to its wire blob.
    fn to_serialized(&self, event: &Self::Event) -> Result<Bytes>;

    /// Deserialize an event blob with the caller's context.
    fn from_serialized(&self, bytes: &[u8], context: &Self::Context) -> Result<Self::Event>;
}

/// Consumer → producer: begin streaming a subpartition set to a channel.
///
/// Nothing flows before this message: the producer opens the named
/// subpartitions and seeds the channel's credit with `initial_credit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRequest {
    /// Which result partition to read.
    pub partition_id: PartitionId,
    /// Which subpartitions of it to stream.
    pub subpartitions: SubpartitionIndexSet,
    /// The consumer channel that will receive the stream.
    pub receiver_id: ChannelId,
    /// Buffers the consumer has pre-allocated up front.
    pub initial_credit: u32,
}

impl PartitionRequest {
    pub(crate) fn wire_length(&self) -> usize {
        PartitionId::WIRE_LENGTH + self.subpartitions.wire_length() + ChannelId::WIRE_LENGTH + 4
    }

    pub(crate) fn write_to(&self, dst: &mut impl BufMut) {
        self.partition_id.write_to(dst);
        self.subpartitions.write_to(dst);
        self.receiver_id.write_to(dst);
        dst.put_u32(self.initial_credit);
    }

    pub(crate) fn read_from(src: &mut impl Buf) -> Result<Self> {
        let partition_id = PartitionId::read_from(src)?;
        let subpartitions = SubpartitionIndexSet::read_from(src)?;
        let receiver_id = ChannelId::read_from(src)?;
        ensure_remaining(src.remaining(), 4, "initial credit")?;
        let initial_credit = src.get_u32();
        Ok(Self { partition_id, subpartitions, receiver_id, initial_credit })
    }
}

/// Either direction: an opaque user task event for a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskEventRequest {
    /// Blob produced by an [`EventSerializer`].
    pub event: Bytes,
    /// Partition the event concerns.
    pub partition_id: PartitionId,
    /// Channel the event concerns.
    pub receiver_id: ChannelId,
}

impl TaskEventRequest {
    pub(crate) fn wire_length(&self) -> usize {
        4 + self.event.len() + PartitionId::WIRE_LENGTH + ChannelId::WIRE_LENGTH
    }

    pub(crate) fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.event.len() as u32);
        dst.put_slice(&self.event);
        self.partition_id.write_to(dst);
        self.receiver_id.write_to(dst);
    }

    pub(crate) fn read_from(src: &mut Bytes) -> Result<Self> {
        ensure_remaining(src.remaining(), 4, "event length")?;
        let length = src.get_u32() as usize;
        ensure_remaining(src.remaining(), length, "event bytes")?;
        let event = src.split_to(length);
        let partition_id = PartitionId::read_from(src)?;
        let receiver_id = ChannelId::read_from(src)?;
        Ok(Self { event, partition_id, receiver_id })
    }
}

/// Consumer → producer: stop sending for a channel and drop its state.
///
/// Unilateral. Frames already on the wire are not rescinded; the consumer
/// discards them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelPartitionRequest {
    /// Channel to cancel.
    pub receiver_id: ChannelId,
}

impl CancelPartitionRequest {
    pub(crate) fn wire_length(&self) -> usize {
        ChannelId::WIRE_LENGTH
    }

    pub(crate) fn write_to(&self, dst: &mut impl BufMut) {
        self.receiver_id.write_to(dst);
    }

    pub(crate) fn read_from(src: &mut impl Buf) -> Result<Self> {
        Ok(Self { receiver_id: ChannelId::read_from(src)? })
    }
}

/// Consumer → producer: grant additional receive credit for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddCredit {
    /// How many buffers the consumer pre-allocated; strictly positive.
    pub credit: u32,
    /// Channel granted to.
    pub receiver_id: ChannelId,
}

impl AddCredit {
    /// Build a grant; zero credit is a contract violation.
    pub fn new(credit: u32, receiver_id: ChannelId) -> Result<Self> {
        if credit == 0 {
            return Err(ProtocolError::contract("credit grant must be positive"));
        }
        Ok(Self { credit, receiver_id })
    }

    pub(crate) fn wire_length(&self) -> usize {
        4 + ChannelId::WIRE_LENGTH
    }

    pub(crate) fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.credit);
        self.receiver_id.write_to(dst);
    }

    pub(crate) fn read_from(src: &mut impl Buf) -> Result<Self> {
        ensure_remaining(src.remaining(), 4, "credit")?;
        let credit = src.get_u32();
        let receiver_id = ChannelId::read_from(src)?;
        Self::new(credit, receiver_id)
    }
}

/// Consumer → producer: resume a channel paused at an unaligned barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeConsumption {
    /// Channel to resume.
    pub receiver_id: ChannelId,
}

impl ResumeConsumption {
    pub(crate) fn wire_length(&self) -> usize {
        ChannelId::WIRE_LENGTH
    }

    pub(crate) fn write_to(&self, dst: &mut impl BufMut) {
        self.receiver_id.write_to(dst);
    }

    pub(crate) fn read_from(src: &mut impl Buf) -> Result<Self> {
        Ok(Self { receiver_id: ChannelId::read_from(src)? })
    }
}

/// Consumer → producer: every preceding user record has been processed.
///
/// Lets the producer advance its end-of-stream protocol after emitting the
/// terminal datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckAllRecordsProcessed {
    /// Channel being acknowledged.
    pub receiver_id: ChannelId,
}

impl AckAllRecordsProcessed {
    pub(crate) fn wire_length(&self) -> usize {
        ChannelId::WIRE_LENGTH
    }

    pub(crate) fn write_to(&self, dst: &mut impl BufMut) {
        self.receiver_id.write_to(dst);
    }

    pub(crate) fn read_from(src: &mut impl Buf) -> Result<Self> {
        Ok(Self { receiver_id: ChannelId::read_from(src)? })
    }
}

/// Producer → consumer: current pending backlog for a channel.
///
/// Purely advisory credit-sizing hint; never entitles the producer to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BacklogAnnouncement {
    /// Buffered-but-unsent items; strictly positive.
    pub backlog: u32,
    /// Channel the backlog belongs to.
    pub receiver_id: ChannelId,
}

impl BacklogAnnouncement {
    /// Build an announcement; an empty backlog is never announced.
    pub fn new(backlog: u32, receiver_id: ChannelId) -> Result<Self> {
        if backlog == 0 {
            return Err(ProtocolError::contract("announced backlog must be positive"));
        }
        Ok(Self { backlog, receiver_id })
    }

    pub(crate) fn wire_length(&self) -> usize {
        4 + ChannelId::WIRE_LENGTH
    }

    pub(crate) fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.backlog);
        self.receiver_id.write_to(dst);
    }

    pub(crate) fn read_from(src: &mut impl Buf) -> Result<Self> {
        ensure_remaining(src.remaining(), 4, "backlog")?;
        let backlog = src.get_u32();
        let receiver_id = ChannelId::read_from(src)?;
        Self::new(backlog, receiver_id)
    }
}

/// Consumer → producer: produce subsequent buffers at this size.
///
/// Takes effect from the next pooled buffer the producer allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewBufferSize {
    /// Requested produce size in bytes; strictly positive.
    pub buffer_size: u32,
    /// Channel the size applies to.
    pub receiver_id: ChannelId,
}

impl NewBufferSize {
    /// Build a resize request; zero-byte buffers are a contract violation.
    pub fn new(buffer_size: u32, receiver_id: ChannelId) -> Result<Self> {
        if buffer_size == 0 {
            return Err(ProtocolError::contract("buffer size must be positive"));
        }
        Ok(Self { buffer_size, receiver_id })
    }

    pub(crate) fn wire_length(&self) -> usize {
        4 + ChannelId::WIRE_LENGTH
    }

    pub(crate) fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.buffer_size);
        self.receiver_id.write_to(dst);
    }

    pub(crate) fn read_from(src: &mut impl Buf) -> Result<Self> {
        ensure_remaining(src.remaining(), 4, "buffer size")?;
        let buffer_size = src.get_u32();
        let receiver_id = ChannelId::read_from(src)?;
        Self::new(buffer_size, receiver_id)
    }
}

/// Consumer → producer: resume (or start) a subpartition at a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentId {
    /// Subpartition the segment belongs to.
    pub subpartition_id: u32,
    /// Requested segment; strictly positive.
    pub segment_id: u32,
    /// Channel making the request.
    pub receiver_id: ChannelId,
}

impl SegmentId {
    /// Build a segment request; segment ids start at one.
    pub fn new(subpartition_id: u32, segment_id: u32, receiver_id: ChannelId) -> Result<Self> {
        if segment_id == 0 {
            return Err(ProtocolError::contract("segment id must be positive"));
        }
        Ok(Self { subpartition_id, segment_id, receiver_id })
    }

    pub(crate) fn wire_length(&self) -> usize {
        4 + 4 + ChannelId::WIRE_LENGTH
    }

    pub(crate) fn write_to(&self, dst: &mut impl BufMut) {
        dst.put_u32(self.subpartition_id);
        dst.put_u32(self.segment_id);
        self.receiver_id.write_to(dst);
    }

    pub(crate) fn read_from(src: &mut impl Buf) -> Result<Self> {
        ensure_remaining(src.remaining(), 8, "segment request")?;
        let subpartition_id = src.get_u32();
        let segment_id = src.get_u32();
        let receiver_id = ChannelId::read_from(src)?;
        Self::new(subpartition_id, segment_id, receiver_id)
    }
}
