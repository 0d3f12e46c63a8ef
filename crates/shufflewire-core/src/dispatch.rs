//! Per-connection message routing.
//!
//! After decode, messages are routed by id and `receiver_id` to channel
//! level handlers. Each router serves one direction of one connection and is
//! driven from that connection's single task; the maps need no locks.
//!
//! Messages for channels that no longer exist are dropped, not errors: a
//! cancellation and in-flight frames for the cancelled channel can cross on
//! the wire, and the contract says the late frames are discarded. Dropping a
//! `BufferResponse` recycles its payload through the buffer's own release
//! path.

use std::collections::HashMap;

use shufflewire_proto::{
    ChannelId, ShuffleMessage,
    message::{BufferResponse, ErrorResponse, PartitionRequest, RemoteFailure, TaskEventRequest},
};

use crate::{
    error::{FlowError, Result},
    flow::ProducerChannel,
    pool::NetworkBufferPool,
};

/// Consumer-side sink for one channel's responses.
///
/// Handlers own every buffer they are handed and must eventually recycle it
/// (dropping the message is enough — release is tied to the buffer itself).
pub trait ChannelHandler {
    /// A data message for this channel.
    fn on_buffer(&mut self, response: BufferResponse);

    /// An advisory backlog announcement.
    fn on_backlog(&mut self, backlog: u32);

    /// A failure delivered to this channel (channel-scoped or fatal).
    fn on_failure(&mut self, failure: &RemoteFailure);

    /// An opaque task event for this channel. Ignored by default.
    fn on_task_event(&mut self, _request: TaskEventRequest) {}
}

/// Routes producer → consumer traffic to channel handlers.
pub struct ResponseRouter {
    channels: HashMap<ChannelId, Box<dyn ChannelHandler>>,
    torn_down: bool,
}

impl ResponseRouter {
    /// An empty router.
    #[must_use]
    pub fn new() -> Self {
        Self { channels: HashMap::new(), torn_down: false }
    }

    /// Register the handler for a channel.
    pub fn register(&mut self, receiver_id: ChannelId, handler: Box<dyn ChannelHandler>) {
        tracing::debug!(?receiver_id, "channel registered");
        self.channels.insert(receiver_id, handler);
    }

    /// Drop a channel's handler; later messages for the id are discarded.
    pub fn release(&mut self, receiver_id: ChannelId) {
        tracing::debug!(?receiver_id, "channel released");
        self.channels.remove(&receiver_id);
    }

    /// True once a fatal error has been delivered; the connection owner
    /// should tear the transport down.
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    /// Deliver a failure to every registered channel (fatal decode errors,
    /// transport loss) and mark the connection torn down.
    pub fn fail_all(&mut self, failure: &RemoteFailure) {
        tracing::warn!(class = %failure.class, "delivering connection failure to all channels");
        for handler in self.channels.values_mut() {
            handler.on_failure(failure);
        }
        self.torn_down = true;
    }

    /// Route one decoded message.
    ///
    /// # Errors
    ///
    /// [`FlowError::UnexpectedMessage`] when a consumer → producer message
    /// arrives here; the peer is confused and the connection is poisoned.
    pub fn dispatch(&mut self, message: ShuffleMessage) -> Result<()> {
        match message {
            ShuffleMessage::BufferResponse(response) => {
                match self.channels.get_mut(&response.receiver_id) {
                    Some(handler) => handler.on_buffer(response),
                    None => {
                        // Cancelled channel; payload recycles as the message drops.
                        tracing::debug!(receiver_id = ?response.receiver_id, "data for unknown channel discarded");
                    },
                }
                Ok(())
            },
            ShuffleMessage::BacklogAnnouncement(announcement) => {
                if let Some(handler) = self.channels.get_mut(&announcement.receiver_id) {
                    handler.on_backlog(announcement.backlog);
                }
                Ok(())
            },
            ShuffleMessage::ErrorResponse(error) => {
                match error.receiver_id {
                    Some(receiver_id) => {
                        if let Some(handler) = self.channels.get_mut(&receiver_id) {
                            handler.on_failure(&error.failure);
                        }
                    },
                    None => self.fail_all(&error.failure),
                }
                Ok(())
            },
            // Task events flow in both directions.
            ShuffleMessage::TaskEventRequest(request) => {
                if let Some(handler) = self.channels.get_mut(&request.receiver_id) {
                    handler.on_task_event(request);
                }
                Ok(())
            },
            other => Err(FlowError::UnexpectedMessage { id: other.msg_id().to_u8() }),
        }
    }
}

impl Default for ResponseRouter {
    fn default() -> Self {
        Self::new()
    }
}

/// Producer-side hook for opening partitions and delivering task events.
pub trait PartitionProvider {
    /// Open the requested subpartitions for streaming.
    ///
    /// # Errors
    ///
    /// A [`RemoteFailure`] describing why the partition cannot be served;
    /// the router reports it to the requesting channel.
    fn open(&mut self, request: &PartitionRequest) -> std::result::Result<(), RemoteFailure>;

    /// Deliver an opaque task event for a partition.
    ///
    /// # Errors
    ///
    /// A [`RemoteFailure`] when the event cannot be applied (bad blob,
    /// unknown partition); reported to the sending channel only.
    fn on_task_event(&mut self, event: &TaskEventRequest) -> std::result::Result<(), RemoteFailure>;
}

/// Routes consumer → producer traffic to producer channels.
pub struct RequestRouter<P> {
    provider: P,
    channels: HashMap<ChannelId, ProducerChannel>,
    pool: Option<NetworkBufferPool>,
    closed: bool,
}

impl<P: PartitionProvider> RequestRouter<P> {
    /// A router serving partitions from `provider`.
    pub fn new(provider: P) -> Self {
        Self { provider, channels: HashMap::new(), pool: None, closed: false }
    }

    /// Attach the produce-side buffer pool. The router then keeps it in
    /// sync: channels register on open, produce-size changes are forwarded,
    /// and cancel/close withdraw the channel.
    #[must_use]
    pub fn with_pool(mut self, pool: NetworkBufferPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// The producer channel for `receiver_id`, if it is open.
    #[must_use]
    pub fn channel(&self, receiver_id: &ChannelId) -> Option<&ProducerChannel> {
        self.channels.get(receiver_id)
    }

    /// Mutable access for the sending side (emitting data, backlog).
    pub fn channel_mut(&mut self, receiver_id: &ChannelId) -> Option<&mut ProducerChannel> {
        self.channels.get_mut(receiver_id)
    }

    /// Channels currently open.
    pub fn channels(&self) -> impl Iterator<Item = &ProducerChannel> {
        self.channels.values()
    }

    /// True once a `CloseRequest` has been handled.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Route one decoded message, possibly producing a reply to send.
    ///
    /// Unknown channels are ignored (cancellation races); a failing
    /// partition open or task event comes back as a channel-scoped
    /// `ErrorResponse` for the driver to transmit.
    ///
    /// # Errors
    ///
    /// - `ContractViolation` on a duplicate `PartitionRequest`
    /// - [`FlowError::UnexpectedMessage`] when a producer → consumer message
    ///   arrives here
    pub fn dispatch(&mut self, message: ShuffleMessage) -> Result<Option<ShuffleMessage>> {
        match message {
            ShuffleMessage::PartitionRequest(request) => self.on_partition_request(request),
            ShuffleMessage::TaskEventRequest(request) => {
                let reply = self.provider.on_task_event(&request).err().map(|failure| {
                    ShuffleMessage::ErrorResponse(ErrorResponse::for_channel(
                        request.receiver_id,
                        failure,
                    ))
                });
                Ok(reply)
            },
            ShuffleMessage::AddCredit(grant) => {
                if let Some(channel) = self.channels.get_mut(&grant.receiver_id) {
                    channel.on_add_credit(grant.credit);
                } else {
                    tracing::debug!(receiver_id = ?grant.receiver_id, "credit for unknown channel ignored");
                }
                Ok(None)
            },
            ShuffleMessage::ResumeConsumption(resume) => {
                if let Some(channel) = self.channels.get_mut(&resume.receiver_id) {
                    channel.on_resume();
                }
                Ok(None)
            },
            ShuffleMessage::AckAllRecordsProcessed(ack) => {
                if let Some(channel) = self.channels.get_mut(&ack.receiver_id) {
                    channel.on_ack_all_records();
                }
                Ok(None)
            },
            ShuffleMessage::NewBufferSize(resize) => {
                if let Some(channel) = self.channels.get_mut(&resize.receiver_id) {
                    channel.on_new_buffer_size(resize.buffer_size);
                    if let Some(pool) = &self.pool {
                        pool.set_buffer_size(resize.receiver_id, resize.buffer_size as usize);
                    }
                }
                Ok(None)
            },
            ShuffleMessage::SegmentId(segment) => {
                if let Some(channel) = self.channels.get_mut(&segment.receiver_id) {
                    channel.on_segment_request(segment.subpartition_id, segment.segment_id);
                }
                Ok(None)
            },
            ShuffleMessage::CancelPartitionRequest(cancel) => {
                if let Some(mut channel) = self.channels.remove(&cancel.receiver_id) {
                    channel.on_cancel();
                    if let Some(pool) = &self.pool {
                        pool.release_channel(cancel.receiver_id);
                    }
                    tracing::debug!(receiver_id = ?cancel.receiver_id, "channel cancelled");
                }
                Ok(None)
            },
            ShuffleMessage::CloseRequest => {
                tracing::debug!(channels = self.channels.len(), "connection close requested");
                for (receiver_id, mut channel) in self.channels.drain() {
                    channel.on_cancel();
                    if let Some(pool) = &self.pool {
                        pool.release_channel(receiver_id);
                    }
                }
                self.closed = true;
                Ok(None)
            },
            other => Err(FlowError::UnexpectedMessage { id: other.msg_id().to_u8() }),
        }
    }

    fn on_partition_request(
        &mut self,
        request: PartitionRequest,
    ) -> Result<Option<ShuffleMessage>> {
        if self.channels.contains_key(&request.receiver_id) {
            return Err(FlowError::contract("duplicate partition request for channel"));
        }
        match self.provider.open(&request) {
            Ok(()) => {
                tracing::debug!(
                    receiver_id = ?request.receiver_id,
                    initial_credit = request.initial_credit,
                    "partition opened"
                );
                self.channels.insert(request.receiver_id, ProducerChannel::open(&request));
                if let Some(pool) = &self.pool {
                    pool.register_channel(request.receiver_id);
                }
                Ok(None)
            },
            Err(failure) => {
                tracing::warn!(
                    receiver_id = ?request.receiver_id,
                    class = %failure.class,
                    "partition request failed"
                );
                Ok(Some(ShuffleMessage::ErrorResponse(ErrorResponse::for_channel(
                    request.receiver_id,
                    failure,
                ))))
            },
        }
    }
}
