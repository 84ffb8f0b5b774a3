//! Bounded chunk queue between the audio callback and the pipeline consumer
//!
//! The producer side never blocks: when the queue is full the OLDEST chunk is
//! dropped to make room, so the consumer always sees the most recent audio.
//! Drops are counted and reported by the consumer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::Notify;

use super::audio::AudioChunk;

struct Shared {
    queue: Mutex<VecDeque<AudioChunk>>,
    capacity: usize,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, VecDeque<AudioChunk>> {
        // A panicking holder cannot leave the deque half-updated
        self.queue
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Create a queue holding at most `capacity` chunks
#[must_use]
pub fn chunk_queue(capacity: usize) -> (ChunkSender, ChunkReceiver) {
    let capacity = capacity.max(1);
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        capacity,
        notify: Notify::new(),
        dropped: AtomicU64::new(0),
        closed: AtomicBool::new(false),
    });

    (
        ChunkSender {
            shared: Arc::clone(&shared),
        },
        ChunkReceiver { shared },
    )
}

/// Producer half, safe to call from a real-time audio thread
#[derive(Clone)]
pub struct ChunkSender {
    shared: Arc<Shared>,
}

impl ChunkSender {
    /// Enqueue a chunk without blocking
    ///
    /// Returns `false` if the queue was full and the oldest chunk was dropped.
    /// Chunks pushed after [`close`](Self::close) are discarded silently.
    pub fn push(&self, chunk: AudioChunk) -> bool {
        if self.is_closed() {
            return true;
        }

        let mut evicted = false;
        {
            let mut queue = self.shared.lock();
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                evicted = true;
            }
            queue.push_back(chunk);
        }

        if evicted {
            self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.shared.notify.notify_one();
        !evicted
    }

    /// Close the queue; the receiver drains what is left, then sees `None`
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }

    /// Whether the queue has been closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

/// Consumer half
pub struct ChunkReceiver {
    shared: Arc<Shared>,
}

impl ChunkReceiver {
    /// Wait for the next chunk in arrival order
    ///
    /// Returns `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<AudioChunk> {
        loop {
            if let Some(chunk) = self.try_recv() {
                return Some(chunk);
            }
            if self.shared.closed.load(Ordering::Acquire) {
                return self.try_recv();
            }
            // Single consumer: notify_one stores a permit if we are not waiting yet
            self.shared.notify.notified().await;
        }
    }

    /// Pop the next chunk if one is queued
    pub fn try_recv(&mut self) -> Option<AudioChunk> {
        self.shared.lock().pop_front()
    }

    /// Discard everything currently queued, returning how many chunks were removed
    pub fn clear(&mut self) -> usize {
        let mut queue = self.shared.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    /// Chunks currently queued
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.lock().len()
    }

    /// Whether nothing is queued
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total chunks dropped on overflow since creation
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}
