//! Binary wire protocol for the shuffle data plane.
//!
//! A length-delimited, credit-based, multiplexed protocol that moves
//! pipeline data buffers and their control signals between producing and
//! consuming workers over one long-lived connection. This crate is the pure
//! codec layer: framing, the typed message catalog, identifier codecs, and
//! the buffer-handoff rules. The outer I/O loop, connection establishment,
//! and reconnect policy live with the caller, which is expected to deliver
//! and accept whole byte chunks of a single ordered stream.
//!
//! Encoding and decoding never suspend; they complete synchronously or fail.
//! Fatal failures (corrupted framing, unknown ids, contract violations)
//! poison the connection; content-level failures stay on their channel. See
//! [`errors::ProtocolError::is_fatal`].

pub mod errors;

mod buffer;
mod frame;
mod ids;
pub mod message;

pub use buffer::{Buffer, BufferAllocator, BufferPayload, BufferRecycler, DataType};
pub use frame::{EncodedFrame, FramePrefix, MessageDecoder, MessageEncoder, encode};
pub use ids::{ChannelId, PartitionId, SubpartitionIndexSet};
pub use message::{MsgId, ShuffleMessage};
