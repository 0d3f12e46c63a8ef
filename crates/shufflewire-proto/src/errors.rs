//! Error types for the shuffle wire protocol.
//!
//! The taxonomy separates errors that poison the whole connection (corrupted
//! framing, unrecognized message ids, flow-contract violations) from errors
//! that are scoped to a single logical channel (content-level decode
//! failures). The connection owner checks [`ProtocolError::is_fatal`] to
//! decide between tearing down and reporting to the affected channel.

use std::io;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised by the frame and message codecs.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Framing is unrecoverable: bad magic number, impossible length, or a
    /// frame truncated in a way the transport cannot resynchronize from.
    #[error("stream corrupted: {reason}")]
    StreamCorruption {
        /// What the framer observed
        reason: String,
    },

    /// Structurally valid frame carrying a message id this version does not
    /// recognize.
    #[error("unknown message id {id:#04x}")]
    UnknownMessage {
        /// The unrecognized id byte
        id: u8,
    },

    /// A frame longer than the protocol admits, claimed by the peer or
    /// produced by an encode call.
    #[error("frame of {length} bytes exceeds the {max} byte cap")]
    FrameTooLarge {
        /// Claimed or computed total frame length
        length: u64,
        /// Largest admissible frame length
        max: u32,
    },

    /// Content-level deserialization failure, scoped to one channel. The
    /// connection survives; the affected channel is notified.
    #[error("failed to decode message content: {reason}")]
    DecodeFailure {
        /// What the content decoder rejected
        reason: String,
    },

    /// The peer broke the credit/flow contract: data sent without credit,
    /// zero credit grants, mismatched partial-buffer accounting.
    #[error("flow contract violated: {reason}")]
    ContractViolation {
        /// Which rule was broken
        reason: String,
    },

    /// Transport I/O failure during encode or flush. Recoverable upstream;
    /// any partially prepared buffer has already been released.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ProtocolError {
    /// Shorthand for [`ProtocolError::StreamCorruption`].
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::StreamCorruption { reason: reason.into() }
    }

    /// Shorthand for [`ProtocolError::ContractViolation`].
    pub fn contract(reason: impl Into<String>) -> Self {
        Self::ContractViolation { reason: reason.into() }
    }

    /// Returns true if the connection must be torn down.
    ///
    /// Fatal errors are delivered to every channel on the connection;
    /// non-fatal ones only to the channel they occurred on (or retried
    /// upstream for I/O).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::StreamCorruption { .. }
                | Self::UnknownMessage { .. }
                | Self::FrameTooLarge { .. }
                | Self::ContractViolation { .. }
        )
    }
}

/// Fails with [`ProtocolError::StreamCorruption`] when fewer than `needed`
/// bytes remain for `field`.
pub(crate) fn ensure_remaining(remaining: usize, needed: usize, field: &str) -> Result<()> {
    if remaining < needed {
        return Err(ProtocolError::corrupt(format!(
            "truncated {field}: need {needed} bytes, {remaining} remain"
        )));
    }
    Ok(())
}
