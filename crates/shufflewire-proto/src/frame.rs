//! Length-delimited framing with magic-number validation.
//!
//! Every message travels in exactly one frame:
//!
//! ```text
//! [frame length: u32][magic: u32][msg id: u8][body ...]
//! ```
//!
//! The length counts all fields including itself, big-endian, capped at
//! `2^31 - 1`. The prefix is parsed zero-copy straight off the receive
//! buffer; a wrong magic number or an impossible length is
//! [`ProtocolError::StreamCorruption`] and kills the connection — there is
//! no resynchronization on a corrupted byte stream.
//!
//! Encoding never copies the payload of a data message: the frame prefix and
//! message header land in one small buffer, and the payload [`Buffer`] rides
//! along by ownership transfer until the transport has written (or failed to
//! write) it.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{
    buffer::{Buffer, BufferAllocator},
    errors::{ProtocolError, Result},
    message::{MsgId, ShuffleMessage},
};

/// The 9-byte frame prefix, parsed in place (Big Endian).
///
/// Raw byte arrays avoid alignment issues; all bit patterns are valid, so
/// casting untrusted network bytes cannot misbehave. Validation happens in
/// [`FramePrefix::from_bytes`], not in the cast.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct FramePrefix {
    frame_length: [u8; 4],
    magic: [u8; 4],
    msg_id: u8,
}

impl FramePrefix {
    /// Size of the serialized prefix.
    pub const SIZE: usize = 9;

    /// Magic number every frame starts its second field with.
    pub const MAGIC: u32 = 0xBADC_0FFE;

    /// Largest admissible frame length.
    pub const MAX_FRAME_LENGTH: u32 = i32::MAX as u32;

    /// Parse and validate a prefix from the start of `bytes` (zero-copy).
    ///
    /// # Errors
    ///
    /// - [`ProtocolError::StreamCorruption`] if fewer than 9 bytes are
    ///   given, the magic number is wrong, or the length is smaller than
    ///   the prefix itself
    /// - [`ProtocolError::FrameTooLarge`] if the claimed length exceeds
    ///   the cap
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let prefix = Self::ref_from_prefix(bytes)
            .map_err(|_| {
                ProtocolError::corrupt(format!(
                    "frame prefix needs {} bytes, got {}",
                    Self::SIZE,
                    bytes.len()
                ))
            })?
            .0;

        let magic = u32::from_be_bytes(prefix.magic);
        if magic != Self::MAGIC {
            return Err(ProtocolError::corrupt(format!(
                "invalid magic number {magic:#010x}, expected {:#010x}",
                Self::MAGIC
            )));
        }

        let frame_length = u32::from_be_bytes(prefix.frame_length);
        if frame_length < Self::SIZE as u32 {
            return Err(ProtocolError::corrupt(format!(
                "impossible frame length {frame_length}"
            )));
        }
        if frame_length > Self::MAX_FRAME_LENGTH {
            return Err(ProtocolError::FrameTooLarge {
                length: u64::from(frame_length),
                max: Self::MAX_FRAME_LENGTH,
            });
        }

        Ok(prefix)
    }

    /// Total frame length, including the prefix itself.
    #[must_use]
    pub fn frame_length(&self) -> u32 {
        u32::from_be_bytes(self.frame_length)
    }

    /// The magic number field.
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_be_bytes(self.magic)
    }

    /// The raw message id byte.
    #[must_use]
    pub fn msg_id(&self) -> u8 {
        self.msg_id
    }
}

/// A message ready for transmission: contiguous header, zero-copy payload.
///
/// The header holds the frame prefix plus the message header; the payload,
/// when present, is the attached [`Buffer`] of a data message. Dropping an
/// `EncodedFrame` releases the payload exactly once, which is what makes
/// cancelled or failed writes leak-free.
#[derive(Debug)]
pub struct EncodedFrame {
    header: Bytes,
    payload: Option<Buffer>,
}

impl EncodedFrame {
    /// Frame prefix plus message header, ready for the wire.
    #[must_use]
    pub fn header(&self) -> &[u8] {
        &self.header
    }

    /// The attached payload, if this is a data message.
    #[must_use]
    pub fn payload(&self) -> Option<&Buffer> {
        self.payload.as_ref()
    }

    /// Total on-wire frame length.
    #[must_use]
    pub fn frame_length(&self) -> usize {
        self.header.len() + self.payload.as_ref().map_or(0, Buffer::readable_size)
    }

    /// Flatten into one contiguous buffer, copying the payload.
    ///
    /// For tests and small control frames; the hot path writes header and
    /// payload separately.
    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        let mut wire = BytesMut::with_capacity(self.frame_length());
        wire.extend_from_slice(&self.header);
        if let Some(buffer) = &self.payload {
            for chunk in buffer.chunks() {
                wire.extend_from_slice(chunk);
            }
        }
        // self drops here; the payload buffer recycles.
        wire.freeze()
    }
}

/// Encode one message into a well-formed frame.
///
/// The header buffer is allocated at its exact final size; the payload is
/// attached, not copied. Ownership of any payload buffer moves into the
/// returned frame on success and is released on failure.
///
/// # Errors
///
/// - [`ProtocolError::FrameTooLarge`] if the frame would exceed the length
///   cap
/// - [`ProtocolError::ContractViolation`] if the message's partial-buffer
///   accounting is inconsistent
pub fn encode(message: ShuffleMessage) -> Result<EncodedFrame> {
    let id = message.msg_id();
    let header_length = FramePrefix::SIZE + message.header_length();
    let frame_length = header_length + message.payload_length();

    if frame_length > FramePrefix::MAX_FRAME_LENGTH as usize {
        return Err(ProtocolError::FrameTooLarge {
            length: frame_length as u64,
            max: FramePrefix::MAX_FRAME_LENGTH,
        });
    }

    let mut header = BytesMut::with_capacity(header_length);
    header.put_u32(frame_length as u32);
    header.put_u32(FramePrefix::MAGIC);
    header.put_u8(id.to_u8());
    let payload = message.write_header(&mut header)?;

    debug_assert_eq!(header.len(), header_length);
    Ok(EncodedFrame { header: header.freeze(), payload })
}

/// [`Encoder`] adapter for the control-plane path.
///
/// Copies any payload into the destination buffer; the zero-copy data path
/// writes an [`EncodedFrame`] in two steps instead.
#[derive(Debug, Default)]
pub struct MessageEncoder;

impl Encoder<ShuffleMessage> for MessageEncoder {
    type Error = ProtocolError;

    fn encode(&mut self, message: ShuffleMessage, dst: &mut BytesMut) -> Result<()> {
        let frame = crate::frame::encode(message)?;
        dst.reserve(frame.frame_length());
        dst.extend_from_slice(frame.header());
        if let Some(buffer) = frame.payload() {
            for chunk in buffer.chunks() {
                dst.extend_from_slice(chunk);
            }
        }
        Ok(())
    }
}

/// Upper bound on speculative buffer growth while waiting for a frame body.
const READAHEAD_LIMIT: usize = 64 * 1024;

/// Stateful streaming decoder: bytes in, whole messages out.
///
/// Buffers partial frames internally (`Ok(None)` until a complete frame has
/// arrived), so the input may be chunked arbitrarily. The prefix is
/// validated as soon as its 9 bytes are present — corruption is detected
/// before waiting for a body that may never come. Data payloads are
/// allocated through the [`BufferAllocator`]; on any decode error the
/// frame's backing bytes and any allocated buffer are released before the
/// error propagates.
#[derive(Debug)]
pub struct MessageDecoder<A> {
    allocator: A,
}

impl<A: BufferAllocator> MessageDecoder<A> {
    /// A decoder allocating receive buffers from `allocator`.
    pub fn new(allocator: A) -> Self {
        Self { allocator }
    }

    /// The allocator this decoder fills buffers from.
    pub fn allocator(&self) -> &A {
        &self.allocator
    }
}

impl<A: BufferAllocator> Decoder for MessageDecoder<A> {
    type Item = ShuffleMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ShuffleMessage>> {
        if src.len() < FramePrefix::SIZE {
            return Ok(None);
        }

        let (frame_length, id) = {
            let prefix = FramePrefix::from_bytes(&src[..])?;
            let id = MsgId::from_u8(prefix.msg_id())
                .ok_or(ProtocolError::UnknownMessage { id: prefix.msg_id() })?;
            (prefix.frame_length() as usize, id)
        };

        if src.len() < frame_length {
            // Grow ahead for the rest of the frame, capped: the length claim
            // has not been backed by actual bytes yet.
            src.reserve((frame_length - src.len()).min(READAHEAD_LIMIT));
            return Ok(None);
        }

        let mut frame = src.split_to(frame_length).freeze();
        frame.advance(FramePrefix::SIZE);
        ShuffleMessage::decode_body(id, frame, &self.allocator).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        buffer::DataType,
        ids::ChannelId,
        message::AddCredit,
    };

    /// Event-only allocator for frames that carry no pooled data.
    struct Unpooled;

    impl BufferAllocator for Unpooled {
        fn allocate_pooled(&self, _channel: ChannelId) -> Option<Buffer> {
            None
        }

        fn allocate_unpooled(&self, size: usize, data_type: DataType) -> Buffer {
            Buffer::plain(BytesMut::with_capacity(size), data_type, false)
        }
    }

    #[test]
    fn prefix_layout_is_nine_bytes() {
        assert_eq!(std::mem::size_of::<FramePrefix>(), FramePrefix::SIZE);
    }

    #[test]
    fn close_request_is_the_minimal_frame() {
        let frame = encode(ShuffleMessage::CloseRequest).unwrap();
        assert_eq!(frame.frame_length(), 9);
        assert!(frame.payload().is_none());
        assert_eq!(
            &frame.into_bytes()[..],
            &[0x00, 0x00, 0x00, 0x09, 0xBA, 0xDC, 0x0F, 0xFE, 0x05]
        );
    }

    #[test]
    fn reject_bad_magic() {
        let wire = [0x00, 0x00, 0x00, 0x09, 0xDE, 0xAD, 0xBE, 0xEF, 0x05];
        let err = FramePrefix::from_bytes(&wire).unwrap_err();
        assert!(matches!(err, ProtocolError::StreamCorruption { .. }));
    }

    #[test]
    fn reject_undersized_frame_length() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&3u32.to_be_bytes());
        wire.extend_from_slice(&FramePrefix::MAGIC.to_be_bytes());
        wire.push(0x05);

        let err = FramePrefix::from_bytes(&wire).unwrap_err();
        assert!(matches!(err, ProtocolError::StreamCorruption { .. }));
    }

    #[test]
    fn reject_oversized_frame_length() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&u32::MAX.to_be_bytes());
        wire.extend_from_slice(&FramePrefix::MAGIC.to_be_bytes());
        wire.push(0x05);

        let err = FramePrefix::from_bytes(&wire).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge { length, .. } if length == u64::from(u32::MAX)));
        assert!(err.is_fatal());
    }

    #[test]
    fn unknown_id_rejected_at_the_prefix() {
        let mut wire = BytesMut::new();
        wire.put_u32(9);
        wire.put_u32(FramePrefix::MAGIC);
        wire.put_u8(0x2A);

        let mut decoder = MessageDecoder::new(Unpooled);
        let err = decoder.decode(&mut wire).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessage { id: 0x2A }));
    }

    #[test]
    fn partial_prefix_waits_for_more_input() {
        let mut decoder = MessageDecoder::new(Unpooled);
        let mut src = BytesMut::from(&[0x00, 0x00][..]);
        assert!(decoder.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn partial_body_waits_for_more_input() {
        let grant = AddCredit::new(7, ChannelId::from_bytes([0u8; 16])).unwrap();
        let wire = encode(ShuffleMessage::AddCredit(grant)).unwrap().into_bytes();

        let mut decoder = MessageDecoder::new(Unpooled);
        let mut src = BytesMut::from(&wire[..12]);
        assert!(decoder.decode(&mut src).unwrap().is_none());

        src.extend_from_slice(&wire[12..]);
        let decoded = decoder.decode(&mut src).unwrap().unwrap();
        assert_eq!(decoded, ShuffleMessage::AddCredit(grant));
    }

    #[test]
    fn encoder_and_two_step_path_agree() {
        let grant = AddCredit::new(3, ChannelId::from_bytes([6u8; 16])).unwrap();

        let mut via_encoder = BytesMut::new();
        MessageEncoder.encode(ShuffleMessage::AddCredit(grant), &mut via_encoder).unwrap();

        let via_frame = encode(ShuffleMessage::AddCredit(grant)).unwrap().into_bytes();
        assert_eq!(&via_encoder[..], &via_frame[..]);
    }

    #[test]
    fn credit_grant_wire_layout() {
        let grant = AddCredit::new(7, ChannelId::from_bytes([0u8; 16])).unwrap();
        let wire = encode(ShuffleMessage::AddCredit(grant)).unwrap().into_bytes();

        assert_eq!(wire.len(), 29);
        assert_eq!(&wire[..9], &[0x00, 0x00, 0x00, 0x1D, 0xBA, 0xDC, 0x0F, 0xFE, 0x06]);
        assert_eq!(&wire[9..13], &[0x00, 0x00, 0x00, 0x07]);
        assert_eq!(&wire[13..], &[0u8; 16]);
    }
}
