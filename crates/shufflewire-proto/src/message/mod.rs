//! Typed message catalog.
//!
//! One enum variant per wire message id, and one dispatch table keyed on the
//! id byte. There is no polymorphic hierarchy and no reflective
//! construction: adding a variant breaks `msg_id()`, `header_length()`,
//! `write_header()`, and `decode_body()` at compile time, so no message kind
//! can be half-wired.
//!
//! # Invariants
//!
//! - Id stability: the ids below are the wire contract and never renumber.
//! - Round-trip: encoding a message and decoding the resulting frame yields
//!   an equal value, field by field, partial sizes and payload included.

mod control;
mod data;
mod error;

use bytes::{Buf, Bytes, BytesMut};

pub use self::{
    control::{
        AckAllRecordsProcessed, AddCredit, BacklogAnnouncement, CancelPartitionRequest,
        EventSerializer, NewBufferSize, PartitionRequest, ResumeConsumption, SegmentId,
        TaskEventRequest,
    },
    data::BufferResponse,
    error::{ErrorResponse, RemoteFailure},
};
use crate::{
    buffer::{Buffer, BufferAllocator},
    errors::{ProtocolError, Result},
    ids::ChannelId,
};

/// Stable wire message ids.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgId {
    /// Payload buffer for a channel.
    BufferResponse = 0,
    /// Channel-scoped or connection-fatal failure.
    ErrorResponse = 1,
    /// Start streaming a subpartition set.
    PartitionRequest = 2,
    /// Opaque user task event.
    TaskEventRequest = 3,
    /// Unilateral channel cancellation.
    CancelPartitionRequest = 4,
    /// Drain and close the whole connection.
    CloseRequest = 5,
    /// Credit grant.
    AddCredit = 6,
    /// Resume after an unaligned barrier.
    ResumeConsumption = 7,
    /// All user records drained.
    AckAllRecordsProcessed = 8,
    /// Advisory producer backlog.
    BacklogAnnouncement = 9,
    /// Produce-size change request.
    NewBufferSize = 10,
    /// Segment resume request.
    SegmentId = 11,
}

impl MsgId {
    /// The wire byte.
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte. `None` for ids this version does not know.
    #[must_use]
    pub const fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => Self::BufferResponse,
            1 => Self::ErrorResponse,
            2 => Self::PartitionRequest,
            3 => Self::TaskEventRequest,
            4 => Self::CancelPartitionRequest,
            5 => Self::CloseRequest,
            6 => Self::AddCredit,
            7 => Self::ResumeConsumption,
            8 => Self::AckAllRecordsProcessed,
            9 => Self::BacklogAnnouncement,
            10 => Self::NewBufferSize,
            11 => Self::SegmentId,
            _ => return None,
        })
    }
}

/// Every message the protocol can carry.
#[derive(Debug, PartialEq, Eq)]
pub enum ShuffleMessage {
    /// Payload buffer for a channel (id 0).
    BufferResponse(BufferResponse),
    /// Failure report (id 1).
    ErrorResponse(ErrorResponse),
    /// Start streaming a subpartition set (id 2).
    PartitionRequest(PartitionRequest),
    /// Opaque user task event (id 3).
    TaskEventRequest(TaskEventRequest),
    /// Unilateral channel cancellation (id 4).
    CancelPartitionRequest(CancelPartitionRequest),
    /// Drain and close the connection (id 5); empty body.
    CloseRequest,
    /// Credit grant (id 6).
    AddCredit(AddCredit),
    /// Resume after an unaligned barrier (id 7).
    ResumeConsumption(ResumeConsumption),
    /// All user records drained (id 8).
    AckAllRecordsProcessed(AckAllRecordsProcessed),
    /// Advisory producer backlog (id 9).
    BacklogAnnouncement(BacklogAnnouncement),
    /// Produce-size change request (id 10).
    NewBufferSize(NewBufferSize),
    /// Segment resume request (id 11).
    SegmentId(SegmentId),
}

impl ShuffleMessage {
    /// Wire id of this message.
    #[must_use]
    pub const fn msg_id(&self) -> MsgId {
        match self {
            Self::BufferResponse(_) => MsgId::BufferResponse,
            Self::ErrorResponse(_) => MsgId::ErrorResponse,
            Self::PartitionRequest(_) => MsgId::PartitionRequest,
            Self::TaskEventRequest(_) => MsgId::TaskEventRequest,
            Self::CancelPartitionRequest(_) => MsgId::CancelPartitionRequest,
            Self::CloseRequest => MsgId::CloseRequest,
            Self::AddCredit(_) => MsgId::AddCredit,
            Self::ResumeConsumption(_) => MsgId::ResumeConsumption,
            Self::AckAllRecordsProcessed(_) => MsgId::AckAllRecordsProcessed,
            Self::BacklogAnnouncement(_) => MsgId::BacklogAnnouncement,
            Self::NewBufferSize(_) => MsgId::NewBufferSize,
            Self::SegmentId(_) => MsgId::SegmentId,
        }
    }

    /// Channel this message concerns, when it names one. `CloseRequest` and
    /// fatal `ErrorResponse` are connection-wide.
    #[must_use]
    pub fn receiver_id(&self) -> Option<ChannelId> {
        match self {
            Self::BufferResponse(m) => Some(m.receiver_id),
            Self::ErrorResponse(m) => m.receiver_id,
            Self::PartitionRequest(m) => Some(m.receiver_id),
            Self::TaskEventRequest(m) => Some(m.receiver_id),
            Self::CancelPartitionRequest(m) => Some(m.receiver_id),
            Self::CloseRequest => None,
            Self::AddCredit(m) => Some(m.receiver_id),
            Self::ResumeConsumption(m) => Some(m.receiver_id),
            Self::AckAllRecordsProcessed(m) => Some(m.receiver_id),
            Self::BacklogAnnouncement(m) => Some(m.receiver_id),
            Self::NewBufferSize(m) => Some(m.receiver_id),
            Self::SegmentId(m) => Some(m.receiver_id),
        }
    }

    /// Body length excluding the attached payload.
    pub(crate) fn header_length(&self) -> usize {
        match self {
            Self::BufferResponse(m) => m.header_length(),
            Self::ErrorResponse(m) => m.wire_length(),
            Self::PartitionRequest(m) => m.wire_length(),
            Self::TaskEventRequest(m) => m.wire_length(),
            Self::CancelPartitionRequest(m) => m.wire_length(),
            Self::CloseRequest => 0,
            Self::AddCredit(m) => m.wire_length(),
            Self::ResumeConsumption(m) => m.wire_length(),
            Self::AckAllRecordsProcessed(m) => m.wire_length(),
            Self::BacklogAnnouncement(m) => m.wire_length(),
            Self::NewBufferSize(m) => m.wire_length(),
            Self::SegmentId(m) => m.wire_length(),
        }
    }

    /// Attached payload length; zero for everything but `BufferResponse`.
    pub(crate) fn payload_length(&self) -> usize {
        match self {
            Self::BufferResponse(m) => m.payload_length(),
            _ => 0,
        }
    }

    /// Write the message header into `dst` and hand back the payload buffer,
    /// if any, for zero-copy transmission.
    pub(crate) fn write_header(self, dst: &mut BytesMut) -> Result<Option<Buffer>> {
        match self {
            Self::BufferResponse(m) => m.write_header(dst),
            Self::ErrorResponse(m) => {
                m.write_to(dst);
                Ok(None)
            },
            Self::PartitionRequest(m) => {
                m.write_to(dst);
                Ok(None)
            },
            Self::TaskEventRequest(m) => {
                m.write_to(dst);
                Ok(None)
            },
            Self::CancelPartitionRequest(m) => {
                m.write_to(dst);
                Ok(None)
            },
            Self::CloseRequest => Ok(None),
            Self::AddCredit(m) => {
                m.write_to(dst);
                Ok(None)
            },
            Self::ResumeConsumption(m) => {
                m.write_to(dst);
                Ok(None)
            },
            Self::AckAllRecordsProcessed(m) => {
                m.write_to(dst);
                Ok(None)
            },
            Self::BacklogAnnouncement(m) => {
                m.write_to(dst);
                Ok(None)
            },
            Self::NewBufferSize(m) => {
                m.write_to(dst);
                Ok(None)
            },
            Self::SegmentId(m) => {
                m.write_to(dst);
                Ok(None)
            },
        }
    }

    /// Decode one frame body. The whole body is present; anything left over
    /// after the message's own fields is corruption.
    pub(crate) fn decode_body<A: BufferAllocator>(
        id: MsgId,
        mut body: Bytes,
        allocator: &A,
    ) -> Result<Self> {
        let message = match id {
            MsgId::BufferResponse => {
                Self::BufferResponse(BufferResponse::read_from(&mut body, allocator)?)
            },
            MsgId::ErrorResponse => Self::ErrorResponse(ErrorResponse::read_from(&mut body)?),
            MsgId::PartitionRequest => {
                Self::PartitionRequest(PartitionRequest::read_from(&mut body)?)
            },
            MsgId::TaskEventRequest => {
                Self::TaskEventRequest(TaskEventRequest::read_from(&mut body)?)
            },
            MsgId::CancelPartitionRequest => {
                Self::CancelPartitionRequest(CancelPartitionRequest::read_from(&mut body)?)
            },
            MsgId::CloseRequest => Self::CloseRequest,
            MsgId::AddCredit => Self::AddCredit(AddCredit::read_from(&mut body)?),
            MsgId::ResumeConsumption => {
                Self::ResumeConsumption(ResumeConsumption::read_from(&mut body)?)
            },
            MsgId::AckAllRecordsProcessed => {
                Self::AckAllRecordsProcessed(AckAllRecordsProcessed::read_from(&mut body)?)
            },
            MsgId::BacklogAnnouncement => {
                Self::BacklogAnnouncement(BacklogAnnouncement::read_from(&mut body)?)
            },
            MsgId::NewBufferSize => Self::NewBufferSize(NewBufferSize::read_from(&mut body)?),
            MsgId::SegmentId => Self::SegmentId(SegmentId::read_from(&mut body)?),
        };

        if body.has_remaining() {
            return Err(ProtocolError::corrupt(format!(
                "{} trailing bytes after {:?} body",
                body.remaining(),
                id
            )));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable() {
        assert_eq!(MsgId::BufferResponse.to_u8(), 0);
        assert_eq!(MsgId::ErrorResponse.to_u8(), 1);
        assert_eq!(MsgId::PartitionRequest.to_u8(), 2);
        assert_eq!(MsgId::TaskEventRequest.to_u8(), 3);
        assert_eq!(MsgId::CancelPartitionRequest.to_u8(), 4);
        assert_eq!(MsgId::CloseRequest.to_u8(), 5);
        assert_eq!(MsgId::AddCredit.to_u8(), 6);
        assert_eq!(MsgId::ResumeConsumption.to_u8(), 7);
        assert_eq!(MsgId::AckAllRecordsProcessed.to_u8(), 8);
        assert_eq!(MsgId::BacklogAnnouncement.to_u8(), 9);
        assert_eq!(MsgId::NewBufferSize.to_u8(), 10);
        assert_eq!(MsgId::SegmentId.to_u8(), 11);
    }

    #[test]
    fn id_bytes_round_trip() {
        for byte in 0..=11 {
            assert_eq!(MsgId::from_u8(byte).map(MsgId::to_u8), Some(byte));
        }
        assert_eq!(MsgId::from_u8(12), None);
        assert_eq!(MsgId::from_u8(0xFF), None);
    }
}
