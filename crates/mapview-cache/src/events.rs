//! "Chunk loaded" notifications.
//!
//! Load jobs publish into a bounded channel without blocking. When the
//! channel is full, events spill into an overflow set that collapses
//! repeats of the same chunk, so every completed load is still announced at
//! least once and memory stays bounded by the number of distinct chunks.
//!
//! Whoever owns the [`ChunkEvents`] receiver decides the delivery thread:
//! poll it from a UI loop with [`ChunkEvents::dispatch_pending`], or hand it
//! a listener and let [`ChunkEvents::spawn_listener`] run a dedicated
//! consumer thread.

use ahash::AHashSet;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::debug;

/// Default notification queue capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

/// A chunk finished loading and can be fetched again.
///
/// Carries no payload; receivers re-issue `fetch` for the coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkLoaded {
    /// Chunk X coordinate
    pub x: i32,
    /// Chunk Z coordinate
    pub z: i32,
}

/// Receives chunk-loaded notifications.
pub trait ChunkListener: Send + Sync {
    /// Called for every completed load. Two loads of the same chunk that
    /// complete while the queue is full may be reported once.
    fn on_chunk_loaded(&self, x: i32, z: i32);
}

impl<F> ChunkListener for F
where
    F: Fn(i32, i32) + Send + Sync,
{
    fn on_chunk_loaded(&self, x: i32, z: i32) {
        self(x, z);
    }
}

/// Events that did not fit in the channel, deduplicated by chunk.
type Overflow = Arc<Mutex<AHashSet<ChunkLoaded>>>;

/// Producer side, owned by the controller and shared with load jobs.
#[derive(Debug)]
pub(crate) struct EventSink {
    sender: Sender<ChunkLoaded>,
    overflow: Overflow,
    dropped: AtomicU64,
}

impl EventSink {
    /// Publishes without blocking.
    ///
    /// A full channel moves the event to the overflow set; only a repeat of
    /// an event already waiting there, or a vanished receiver, drops it.
    pub(crate) fn publish(&self, event: ChunkLoaded) {
        // Held across try_send so a consumer never sees an empty channel
        // and an empty overflow while an event is being moved across.
        let mut overflow = self.overflow.lock();
        match self.sender.try_send(event) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                if !overflow.insert(event) {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                debug!(
                    x = event.x,
                    z = event.z,
                    overflow = overflow.len(),
                    "Event queue full, notification moved to overflow"
                );
            },
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(x = event.x, z = event.z, "No event receiver, dropping notification");
            },
        }
    }

    /// Events collapsed into an already pending one, or sent to nobody.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Consumer side of the notification queue.
#[derive(Debug, Clone)]
pub struct ChunkEvents {
    receiver: Receiver<ChunkLoaded>,
    overflow: Overflow,
}

/// Creates a connected sink/receiver pair.
pub(crate) fn channel(capacity: usize) -> (EventSink, ChunkEvents) {
    let (sender, receiver) = bounded(capacity.max(1));
    let overflow = Overflow::default();
    (
        EventSink {
            sender,
            overflow: Arc::clone(&overflow),
            dropped: AtomicU64::new(0),
        },
        ChunkEvents { receiver, overflow },
    )
}

impl ChunkEvents {
    /// Takes the next event from the channel, then from the overflow set.
    fn try_next(&self) -> Option<ChunkLoaded> {
        let mut overflow = self.overflow.lock();
        if let Ok(event) = self.receiver.try_recv() {
            return Some(event);
        }
        let event = overflow.iter().next().copied()?;
        overflow.remove(&event);
        Some(event)
    }

    /// Drains all pending events.
    pub fn drain(&self) -> Vec<ChunkLoaded> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Delivers all pending events to `listener` on the calling thread.
    ///
    /// Returns the number of events delivered.
    pub fn dispatch_pending(&self, listener: &dyn ChunkListener) -> usize {
        let mut delivered = 0;
        while let Some(event) = self.try_next() {
            listener.on_chunk_loaded(event.x, event.z);
            delivered += 1;
        }
        delivered
    }

    /// Blocks until the next event arrives or every producer is gone.
    pub fn recv(&self) -> Option<ChunkLoaded> {
        self.try_next().or_else(|| self.receiver.recv().ok())
    }

    /// Like [`recv`](Self::recv) with an upper bound on the wait.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<ChunkLoaded> {
        let deadline = Instant::now() + timeout;
        self.try_next()
            .or_else(|| self.receiver.recv_deadline(deadline).ok())
    }

    /// Returns the number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        let overflow = self.overflow.lock();
        self.receiver.len() + overflow.len()
    }

    /// Runs `listener` on a dedicated `chunk-events` thread.
    ///
    /// The thread exits once the controller (the only producer) is dropped.
    pub fn spawn_listener(
        self,
        listener: Arc<dyn ChunkListener>,
    ) -> std::io::Result<JoinHandle<()>> {
        std::thread::Builder::new()
            .name("chunk-events".into())
            .spawn(move || {
                while let Some(event) = self.recv() {
                    listener.on_chunk_loaded(event.x, event.z);
                }
                debug!("Event listener exiting");
            })
    }
}
