//! Error types for the flow-control and dispatch layer.

use std::io;

use shufflewire_proto::errors::ProtocolError;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Errors raised while driving a connection's credit contract.
#[derive(Error, Debug)]
pub enum FlowError {
    /// Codec-level failure; fatality follows [`ProtocolError::is_fatal`].
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A message arrived on the wrong side of the connection (a producer
    /// received a `BufferResponse`, say). The peer is broken; fatal.
    #[error("unexpected message id {id:#04x} for this endpoint")]
    UnexpectedMessage {
        /// Wire id of the misdirected message
        id: u8,
    },

    /// Transport I/O failure. Recoverable upstream; buffers attached to the
    /// failed write have already been released.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl FlowError {
    /// Shorthand for a wrapped [`ProtocolError::ContractViolation`].
    pub fn contract(reason: impl Into<String>) -> Self {
        Self::Protocol(ProtocolError::contract(reason))
    }

    /// Returns true if the connection must be torn down.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Protocol(e) => e.is_fatal(),
            Self::UnexpectedMessage { .. } => true,
            Self::Io(_) => false,
        }
    }
}
