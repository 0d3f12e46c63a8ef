//! In-memory network buffer pool.
//!
//! Implements the allocator interface the decoder consumes: pooled segments
//! for data payloads, plain allocations for events. The pool is shared
//! across connections and thread-safe; each codec only calls it from its
//! owning task.
//!
//! A channel must be registered before pooled allocation succeeds for it.
//! `None` from [`BufferAllocator::allocate_pooled`] therefore means exactly
//! what the decoder expects: the channel is gone, or the pool has no free
//! segment — skip the bytes, keep the connection.
//!
//! Each channel carries a produce size (`set_buffer_size`, driven by the
//! `NewBufferSize` message); the next pooled allocation for the channel
//! hands out a segment of exactly that capacity.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use bytes::BytesMut;
use shufflewire_proto::{Buffer, BufferAllocator, BufferRecycler, ChannelId, DataType};

struct PoolState {
    free: Vec<BytesMut>,
    /// Registered channels and their current produce size.
    channels: HashMap<ChannelId, usize>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    segment_size: usize,
    capacity: usize,
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // A poisoned pool lock only means another thread panicked while
        // holding it; the free list is still structurally sound.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BufferRecycler for PoolShared {
    fn recycle(&self, memory: BytesMut) {
        let mut state = self.lock();
        if state.free.len() < self.capacity {
            state.free.push(memory);
        }
    }
}

/// Fixed-capacity pool of receive segments.
///
/// Cheap to clone; clones share the same segments.
#[derive(Clone)]
pub struct NetworkBufferPool {
    shared: Arc<PoolShared>,
}

impl NetworkBufferPool {
    /// A pool of `segments` segments of `segment_size` bytes each.
    #[must_use]
    pub fn new(segments: usize, segment_size: usize) -> Self {
        let free = (0..segments).map(|_| BytesMut::with_capacity(segment_size)).collect();
        Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState { free, channels: HashMap::new() }),
                segment_size,
                capacity: segments,
            }),
        }
    }

    /// Make pooled allocation available for `channel`, at the default
    /// produce size.
    pub fn register_channel(&self, channel: ChannelId) {
        let segment_size = self.shared.segment_size;
        self.shared.lock().channels.insert(channel, segment_size);
    }

    /// Withdraw `channel`; subsequent pooled allocations for it return
    /// `None`.
    pub fn release_channel(&self, channel: ChannelId) {
        self.shared.lock().channels.remove(&channel);
    }

    /// Change the produce size for `channel`, clamped to the segment size.
    /// Effective from the next allocation; ignored for unknown channels.
    pub fn set_buffer_size(&self, channel: ChannelId, size: usize) {
        let clamped = size.min(self.shared.segment_size);
        if let Some(current) = self.shared.lock().channels.get_mut(&channel) {
            *current = clamped;
        }
    }

    /// Current produce size for `channel`; `None` when it is not registered.
    #[must_use]
    pub fn buffer_size(&self, channel: ChannelId) -> Option<usize> {
        self.shared.lock().channels.get(&channel).copied()
    }

    /// Free segments right now.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.lock().free.len()
    }
}

impl BufferAllocator for NetworkBufferPool {
    fn allocate_pooled(&self, channel: ChannelId) -> Option<Buffer> {
        let (memory, size) = {
            let mut state = self.shared.lock();
            let Some(&size) = state.channels.get(&channel) else {
                tracing::debug!(?channel, "pooled allocation for unregistered channel");
                return None;
            };
            (state.free.pop()?, size)
        };
        // Re-cut the segment when the channel's produce size changed since
        // it was last handed out.
        let memory = if memory.capacity() == size { memory } else { BytesMut::with_capacity(size) };
        let recycler = Arc::clone(&self.shared) as Arc<dyn BufferRecycler>;
        Some(Buffer::plain(memory, DataType::DataBuffer, false).with_recycler(recycler))
    }

    fn allocate_unpooled(&self, size: usize, data_type: DataType) -> Buffer {
        Buffer::plain(BytesMut::with_capacity(size), data_type, false)
    }
}
