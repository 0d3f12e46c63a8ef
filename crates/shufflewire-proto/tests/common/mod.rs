//! Shared fixtures for protocol integration tests.
#![allow(dead_code)]

use std::{
    collections::HashSet,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::BytesMut;
use shufflewire_proto::{Buffer, BufferAllocator, BufferRecycler, ChannelId, DataType};

struct CountingState {
    /// `None` admits every channel; `Some` admits only registered ones.
    registered: Option<HashSet<ChannelId>>,
}

struct CountingShared {
    state: Mutex<CountingState>,
    allocated: AtomicUsize,
    recycled: AtomicUsize,
}

impl CountingShared {
    fn lock(&self) -> MutexGuard<'_, CountingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BufferRecycler for CountingShared {
    fn recycle(&self, _memory: BytesMut) {
        self.recycled.fetch_add(1, Ordering::SeqCst);
    }
}

/// Allocator that counts every allocation and release, for the buffer
/// accounting property: nothing leaks, nothing frees twice.
#[derive(Clone)]
pub struct CountingPool {
    shared: Arc<CountingShared>,
}

impl CountingPool {
    /// A pool that admits only explicitly registered channels.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(CountingShared {
                state: Mutex::new(CountingState { registered: Some(HashSet::new()) }),
                allocated: AtomicUsize::new(0),
                recycled: AtomicUsize::new(0),
            }),
        }
    }

    /// A pool that admits every channel.
    pub fn admit_all() -> Self {
        Self {
            shared: Arc::new(CountingShared {
                state: Mutex::new(CountingState { registered: None }),
                allocated: AtomicUsize::new(0),
                recycled: AtomicUsize::new(0),
            }),
        }
    }

    pub fn register(&self, channel: ChannelId) {
        if let Some(registered) = &mut self.shared.lock().registered {
            registered.insert(channel);
        }
    }

    pub fn allocated(&self) -> usize {
        self.shared.allocated.load(Ordering::SeqCst)
    }

    pub fn recycled(&self) -> usize {
        self.shared.recycled.load(Ordering::SeqCst)
    }

    /// Buffers handed out and not yet released.
    pub fn outstanding(&self) -> usize {
        self.allocated() - self.recycled()
    }
}

impl BufferAllocator for CountingPool {
    fn allocate_pooled(&self, channel: ChannelId) -> Option<Buffer> {
        {
            let state = self.shared.lock();
            if let Some(registered) = &state.registered {
                if !registered.contains(&channel) {
                    return None;
                }
            }
        }
        self.shared.allocated.fetch_add(1, Ordering::SeqCst);
        let recycler = Arc::clone(&self.shared) as Arc<dyn BufferRecycler>;
        Some(Buffer::plain(BytesMut::new(), DataType::DataBuffer, false).with_recycler(recycler))
    }

    fn allocate_unpooled(&self, size: usize, data_type: DataType) -> Buffer {
        self.shared.allocated.fetch_add(1, Ordering::SeqCst);
        let recycler = Arc::clone(&self.shared) as Arc<dyn BufferRecycler>;
        Buffer::plain(BytesMut::with_capacity(size), data_type, false).with_recycler(recycler)
    }
}

impl Default for CountingPool {
    fn default() -> Self {
        Self::new()
    }
}
