//! Credit-based flow control and dispatch for the shuffle wire protocol.
//!
//! Builds on [`shufflewire_proto`] with everything a connection needs around
//! the codec: per-channel credit accounting on both sides of the wire
//! ([`flow`]), routing of decoded messages to channel handlers
//! ([`dispatch`]), the shared receive-buffer pool ([`pool`]), and the async
//! helpers that move frames at the I/O boundary ([`transport`]).
//!
//! Everything except the pool is single-threaded per connection: one task
//! owns the routers and channel state machines, so the hot path takes no
//! locks. The pool is the one shared resource and synchronizes internally.

pub mod dispatch;
pub mod flow;
pub mod pool;
pub mod transport;

mod error;

pub use dispatch::{ChannelHandler, PartitionProvider, RequestRouter, ResponseRouter};
pub use error::{FlowError, Result};
pub use flow::{BufferReceipt, ConsumerChannel, ProducerChannel, ProducerState};
pub use pool::NetworkBufferPool;
