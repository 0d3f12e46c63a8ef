//! Failure reporting between peers.
//!
//! The original design shipped a language-native serialized throwable; the
//! cross-language body here is three length-prefixed UTF-8 strings (class,
//! message, stack). An error without a receiver id poisons the whole
//! connection; with one, only the named channel.

use bytes::{Buf, BufMut, Bytes};

use crate::{
    errors::{ProtocolError, Result, ensure_remaining},
    ids::ChannelId,
};

/// A failure description transported over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFailure {
    /// Error class or kind name.
    pub class: String,
    /// Human-readable message.
    pub message: String,
    /// Stack trace or provenance, possibly empty.
    pub stack: String,
}

impl RemoteFailure {
    /// Build a failure description.
    pub fn new(
        class: impl Into<String>,
        message: impl Into<String>,
        stack: impl Into<String>,
    ) -> Self {
        Self { class: class.into(), message: message.into(), stack: stack.into() }
    }

    fn wire_length(&self) -> usize {
        4 + self.class.len() + 4 + self.message.len() + 4 + self.stack.len()
    }

    fn write_to(&self, dst: &mut impl BufMut) {
        write_string(dst, &self.class);
        write_string(dst, &self.message);
        write_string(dst, &self.stack);
    }

    fn read_from(src: &mut Bytes) -> Result<Self> {
        Ok(Self {
            class: read_string(src, "error class")?,
            message: read_string(src, "error message")?,
            stack: read_string(src, "error stack")?,
        })
    }
}

/// Producer → consumer: a failure, channel-scoped or connection-fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Affected channel; `None` means the whole connection is poisoned.
    pub receiver_id: Option<ChannelId>,
    /// The transported cause.
    pub failure: RemoteFailure,
}

impl ErrorResponse {
    /// A connection-fatal error: every local channel learns the cause, then
    /// the receiver tears the connection down.
    #[must_use]
    pub fn fatal(failure: RemoteFailure) -> Self {
        Self { receiver_id: None, failure }
    }

    /// An error delivered only to the named channel.
    #[must_use]
    pub fn for_channel(receiver_id: ChannelId, failure: RemoteFailure) -> Self {
        Self { receiver_id: Some(receiver_id), failure }
    }

    /// True if this error poisons the whole connection.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.receiver_id.is_none()
    }

    pub(crate) fn wire_length(&self) -> usize {
        1 + self.receiver_id.map_or(0, |_| ChannelId::WIRE_LENGTH) + self.failure.wire_length()
    }

    pub(crate) fn write_to(&self, dst: &mut impl BufMut) {
        match self.receiver_id {
            Some(receiver_id) => {
                dst.put_u8(1);
                receiver_id.write_to(dst);
            },
            None => dst.put_u8(0),
        }
        self.failure.write_to(dst);
    }

    pub(crate) fn read_from(src: &mut Bytes) -> Result<Self> {
        ensure_remaining(src.remaining(), 1, "error receiver flag")?;
        let receiver_id = match src.get_u8() {
            0 => None,
            1 => Some(ChannelId::read_from(src)?),
            flag => {
                return Err(ProtocolError::corrupt(format!("invalid error receiver flag {flag}")));
            },
        };
        let failure = RemoteFailure::read_from(src)?;
        Ok(Self { receiver_id, failure })
    }
}

fn write_string(dst: &mut impl BufMut, value: &str) {
    dst.put_u32(value.len() as u32);
    dst.put_slice(value.as_bytes());
}

fn read_string(src: &mut Bytes, field: &str) -> Result<String> {
    ensure_remaining(src.remaining(), 4, field)?;
    let length = src.get_u32() as usize;
    ensure_remaining(src.remaining(), length, field)?;
    let raw = src.split_to(length);
    String::from_utf8(raw.to_vec())
        .map_err(|_| ProtocolError::corrupt(format!("{field} is not valid UTF-8")))
}
