//! Credit-based flow control, per channel.
//!
//! Pure state machines with no I/O: they consume decoded messages and
//! produce messages to send, and the driver moves bytes. This keeps the
//! contract testable without a transport and mirrors how the rest of the
//! stack separates protocol logic from drivers.
//!
//! Credit counts whole buffers the consumer has pre-allocated. Every
//! `BufferResponse` consumes exactly one credit regardless of payload size;
//! a producer with zero credit must hold data back and may only announce its
//! backlog. The unaligned checkpoint barrier pauses a channel until the
//! consumer resumes it; the terminal datum starts the end-of-stream
//! acknowledgement.
//!
//! # Producer channel states
//!
//! ```text
//!              emit(barrier)            emit(terminal)
//! ┌────────┐ ──────────────> ┌────────┐
//! │ Active │                 │ Paused │      ┌──────────┐  ack   ┌──────────┐
//! │        │ <────────────── │        │      │ Draining │ ─────> │ Finished │
//! └────────┘     resume      └────────┘      └──────────┘        └──────────┘
//!      │                          │                │
//!      └──────────────────────────┴────────────────┴──── cancel ──> Released
//! ```

use shufflewire_proto::{
    Buffer, ChannelId, PartitionId, SubpartitionIndexSet,
    message::{
        AckAllRecordsProcessed, AddCredit, BacklogAnnouncement, BufferResponse,
        CancelPartitionRequest, NewBufferSize, PartitionRequest, ResumeConsumption, SegmentId,
    },
};

use crate::error::{FlowError, Result};

/// Lifecycle of a producer-side channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    /// Streaming, subject to credit.
    Active,
    /// Unaligned barrier emitted; waiting for the consumer to resume.
    PausedForBarrier,
    /// Terminal datum emitted; waiting for the records-processed ack.
    Draining,
    /// Ack received; the channel can be closed.
    Finished,
    /// Cancelled by the consumer; all further input for it is ignored.
    Released,
}

/// Producer-side accounting for one channel.
///
/// Created from the consumer's `PartitionRequest` — data cannot flow
/// earlier because the channel does not exist earlier. Owned by the
/// connection's single-threaded driver; no interior locking.
#[derive(Debug)]
pub struct ProducerChannel {
    receiver_id: ChannelId,
    partition_id: PartitionId,
    subpartitions: SubpartitionIndexSet,
    state: ProducerState,
    credit: u32,
    next_sequence: u32,
    preferred_buffer_size: Option<u32>,
    requested_segment: Option<(u32, u32)>,
}

impl ProducerChannel {
    /// Open a channel from the consumer's request, seeding its credit.
    #[must_use]
    pub fn open(request: &PartitionRequest) -> Self {
        Self {
            receiver_id: request.receiver_id,
            partition_id: request.partition_id,
            subpartitions: request.subpartitions.clone(),
            state: ProducerState::Active,
            credit: request.initial_credit,
            next_sequence: 0,
            preferred_buffer_size: None,
            requested_segment: None,
        }
    }

    /// The channel this producer streams to.
    #[must_use]
    pub fn receiver_id(&self) -> ChannelId {
        self.receiver_id
    }

    /// The partition being streamed.
    #[must_use]
    pub fn partition_id(&self) -> PartitionId {
        self.partition_id
    }

    /// Subpartitions the consumer asked for.
    #[must_use]
    pub fn subpartitions(&self) -> &SubpartitionIndexSet {
        &self.subpartitions
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ProducerState {
        self.state
    }

    /// Remaining credit.
    #[must_use]
    pub fn credit(&self) -> u32 {
        self.credit
    }

    /// True when a data message may be emitted right now.
    #[must_use]
    pub fn is_writable(&self) -> bool {
        self.state == ProducerState::Active && self.credit > 0
    }

    /// Produce-size the consumer last requested, if any. The request router
    /// forwards the same value into the produce pool, where it takes effect
    /// on the next allocation.
    #[must_use]
    pub fn preferred_buffer_size(&self) -> Option<u32> {
        self.preferred_buffer_size
    }

    /// Segment the consumer last requested, as `(subpartition, segment)`.
    #[must_use]
    pub fn requested_segment(&self) -> Option<(u32, u32)> {
        self.requested_segment
    }

    /// Wrap a payload into the next `BufferResponse` for this channel.
    ///
    /// Consumes one credit — any payload, size zero included — and assigns
    /// the next sequence number. Emitting an unaligned barrier pauses the
    /// channel; emitting the terminal datum moves it to draining.
    ///
    /// # Errors
    ///
    /// `ContractViolation` when the channel is not writable: zero credit,
    /// paused, draining, finished, or released. The buffer is released
    /// before the error returns.
    pub fn emit(
        &mut self,
        buffer: Buffer,
        subpartition_id: u32,
        backlog: u32,
    ) -> Result<BufferResponse> {
        match self.state {
            ProducerState::Active => {},
            ProducerState::PausedForBarrier => {
                return Err(FlowError::contract("channel is paused at an unaligned barrier"));
            },
            ProducerState::Draining | ProducerState::Finished => {
                return Err(FlowError::contract("channel already emitted its terminal datum"));
            },
            ProducerState::Released => {
                return Err(FlowError::contract("channel has been cancelled"));
            },
        }
        if self.credit == 0 {
            return Err(FlowError::contract("no credit left for this channel"));
        }

        self.credit -= 1;
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let data_type = buffer.data_type();
        if data_type.pauses_consumption() {
            self.state = ProducerState::PausedForBarrier;
        } else if data_type.is_terminal() {
            self.state = ProducerState::Draining;
        }

        Ok(BufferResponse::new(buffer, self.receiver_id, subpartition_id, sequence, backlog))
    }

    /// Announce the current backlog so the consumer can size its credit.
    ///
    /// Advisory only — announcing never entitles this channel to send.
    pub fn announce_backlog(&self, backlog: u32) -> Result<BacklogAnnouncement> {
        Ok(BacklogAnnouncement::new(backlog, self.receiver_id)?)
    }

    /// Apply a credit grant. Ignored once released.
    pub fn on_add_credit(&mut self, credit: u32) {
        if self.state == ProducerState::Released {
            return;
        }
        self.credit = self.credit.saturating_add(credit);
    }

    /// Consumer resumed after an unaligned barrier.
    pub fn on_resume(&mut self) {
        if self.state == ProducerState::PausedForBarrier {
            self.state = ProducerState::Active;
        }
    }

    /// Consumer processed all user records; the channel may close.
    pub fn on_ack_all_records(&mut self) {
        if self.state == ProducerState::Draining {
            self.state = ProducerState::Finished;
        }
    }

    /// Consumer asked for a new produce size. Ignored once released.
    pub fn on_new_buffer_size(&mut self, buffer_size: u32) {
        if self.state == ProducerState::Released {
            return;
        }
        self.preferred_buffer_size = Some(buffer_size);
    }

    /// Consumer asked to resume a subpartition at a segment.
    pub fn on_segment_request(&mut self, subpartition_id: u32, segment_id: u32) {
        if self.state == ProducerState::Released {
            return;
        }
        self.requested_segment = Some((subpartition_id, segment_id));
    }

    /// Unilateral cancellation. Producer-side state is released; all later
    /// input for this channel is ignored.
    pub fn on_cancel(&mut self) {
        self.state = ProducerState::Released;
        self.credit = 0;
    }
}

/// What a received `BufferResponse` means for the consumer's next move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferReceipt {
    /// An unaligned barrier arrived; send `ResumeConsumption` when the
    /// channel is ready to continue.
    pub observed_barrier: bool,
    /// The terminal datum arrived; send `AckAllRecordsProcessed` once every
    /// preceding record has been processed.
    pub observed_end_of_data: bool,
}

/// Consumer-side accounting for one channel.
///
/// Verifies the producer honors the contract (sequence order, credit bounds)
/// and builds every consumer→producer message for the channel, so the
/// application cannot mis-sequence the dance.
#[derive(Debug)]
pub struct ConsumerChannel {
    receiver_id: ChannelId,
    outstanding_credit: u32,
    expected_sequence: u32,
    announced_backlog: u32,
    paused: bool,
    end_of_data_seen: bool,
}

impl ConsumerChannel {
    /// Create the channel together with the `PartitionRequest` that opens
    /// it, so a request cannot be forgotten or sent twice.
    #[must_use]
    pub fn request(
        partition_id: PartitionId,
        subpartitions: SubpartitionIndexSet,
        receiver_id: ChannelId,
        initial_credit: u32,
    ) -> (Self, PartitionRequest) {
        let channel = Self {
            receiver_id,
            outstanding_credit: initial_credit,
            expected_sequence: 0,
            announced_backlog: 0,
            paused: false,
            end_of_data_seen: false,
        };
        let request =
            PartitionRequest { partition_id, subpartitions, receiver_id, initial_credit };
        (channel, request)
    }

    /// The channel's id.
    #[must_use]
    pub fn receiver_id(&self) -> ChannelId {
        self.receiver_id
    }

    /// Credit granted but not yet consumed by arriving buffers.
    #[must_use]
    pub fn outstanding_credit(&self) -> u32 {
        self.outstanding_credit
    }

    /// Producer backlog from the last announcement.
    #[must_use]
    pub fn announced_backlog(&self) -> u32 {
        self.announced_backlog
    }

    /// True between an unaligned barrier arriving and [`Self::resume`].
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Grant more credit, having pre-allocated `additional` buffers.
    pub fn grant(&mut self, additional: u32) -> Result<AddCredit> {
        let grant = AddCredit::new(additional, self.receiver_id)?;
        self.outstanding_credit = self.outstanding_credit.saturating_add(additional);
        Ok(grant)
    }

    /// Account one arriving `BufferResponse`.
    ///
    /// Consumes one credit whether or not a payload is attached — size-zero
    /// responses and skipped bodies count the same. Verifies the sequence
    /// number is exactly the next expected one.
    ///
    /// # Errors
    ///
    /// `ContractViolation` if the producer overran its credit or broke the
    /// per-channel ordering.
    pub fn on_buffer_response(&mut self, response: &BufferResponse) -> Result<BufferReceipt> {
        if self.outstanding_credit == 0 {
            return Err(FlowError::contract("producer sent data with no credit outstanding"));
        }
        if response.sequence_number != self.expected_sequence {
            return Err(FlowError::contract(format!(
                "sequence number {} arrived, expected {}",
                response.sequence_number, self.expected_sequence
            )));
        }

        self.outstanding_credit -= 1;
        self.expected_sequence += 1;
        self.announced_backlog = response.backlog;

        let receipt = BufferReceipt {
            observed_barrier: response.data_type.pauses_consumption(),
            observed_end_of_data: response.data_type.is_terminal(),
        };
        if receipt.observed_barrier {
            self.paused = true;
        }
        if receipt.observed_end_of_data {
            self.end_of_data_seen = true;
        }
        Ok(receipt)
    }

    /// Record an advisory backlog announcement.
    pub fn on_backlog(&mut self, backlog: u32) {
        self.announced_backlog = backlog;
    }

    /// Tell the producer to continue after an unaligned barrier.
    pub fn resume(&mut self) -> Result<ResumeConsumption> {
        if !self.paused {
            return Err(FlowError::contract("channel is not paused"));
        }
        self.paused = false;
        Ok(ResumeConsumption { receiver_id: self.receiver_id })
    }

    /// Acknowledge that every user record has been processed.
    pub fn acknowledge_drained(&mut self) -> Result<AckAllRecordsProcessed> {
        if !self.end_of_data_seen {
            return Err(FlowError::contract("terminal datum has not arrived yet"));
        }
        Ok(AckAllRecordsProcessed { receiver_id: self.receiver_id })
    }

    /// Ask the producer to emit subsequent buffers at `size` bytes.
    pub fn request_buffer_size(&self, size: u32) -> Result<NewBufferSize> {
        Ok(NewBufferSize::new(size, self.receiver_id)?)
    }

    /// Ask the producer to resume a subpartition at a segment.
    pub fn request_segment(&self, subpartition_id: u32, segment_id: u32) -> Result<SegmentId> {
        Ok(SegmentId::new(subpartition_id, segment_id, self.receiver_id)?)
    }

    /// Give the channel up. In-flight frames are not rescinded; the caller
    /// discards whatever still arrives for this id.
    #[must_use]
    pub fn cancel(self) -> CancelPartitionRequest {
        CancelPartitionRequest { receiver_id: self.receiver_id }
    }
}
