//! Tick-call queue.
//!
//! Tick calls are callbacks queued for the owning thread of a surface and run
//! FIFO on the next main-loop iteration. Posting is the one operation that is
//! safe from any thread.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender, TryRecvError};

use crate::logging::targets;

/// A unique identifier for a queued tick call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickCallId(u64);

impl TickCallId {
    /// Get the raw u64 value of this id.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

static NEXT_TICK_ID: AtomicU64 = AtomicU64::new(1);

fn next_tick_id() -> TickCallId {
    TickCallId(NEXT_TICK_ID.fetch_add(1, Ordering::Relaxed))
}

/// A boxed tick callback.
pub type TickCall = Box<dyn FnOnce() + Send + 'static>;

struct TickData {
    id: TickCallId,
    call: TickCall,
}

/// Multi-producer queue of tick calls drained by one consumer thread.
pub struct TickQueue {
    sender: Sender<TickData>,
    receiver: Receiver<TickData>,
    batch_size: AtomicUsize,
    closed: AtomicBool,
}

impl TickQueue {
    /// Create a queue that runs up to `batch_size` calls per batch.
    pub fn with_batch_size(batch_size: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self {
            sender,
            receiver,
            batch_size: AtomicUsize::new(batch_size.max(1)),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a call. Returns `None` once the queue is closed.
    pub fn post<F>(&self, call: F) -> Option<TickCallId>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            tracing::warn!(target: targets::TICK, "tick call posted to a closed queue, dropping");
            return None;
        }
        let id = next_tick_id();
        match self.sender.send(TickData {
            id,
            call: Box::new(call),
        }) {
            Ok(()) => {
                tracing::trace!(target: targets::TICK, id = id.0, "tick call queued");
                Some(id)
            }
            // The receiver lives in `self`, so this cannot disconnect.
            Err(_) => None,
        }
    }

    /// Check if there are any pending calls.
    pub fn has_pending(&self) -> bool {
        !self.receiver.is_empty()
    }

    /// Get the number of pending calls.
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Run up to one batch of calls. Calls posted while the batch runs wait
    /// for the next batch once the batch size is reached.
    ///
    /// Returns the number of calls run.
    pub fn process_batch(&self) -> usize {
        let limit = self.batch_size.load(Ordering::Relaxed);
        let mut count = 0;
        while count < limit {
            match self.receiver.try_recv() {
                Ok(tick) => {
                    Self::run(tick);
                    count += 1;
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        count
    }

    /// Run calls until the queue is empty, including calls posted meanwhile.
    ///
    /// Returns the number of calls run.
    pub fn process_all(&self) -> usize {
        let mut count = 0;
        while let Ok(tick) = self.receiver.try_recv() {
            Self::run(tick);
            count += 1;
        }
        count
    }

    /// Reject further posts. Pending calls stay queued.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Drop pending calls without running them.
    pub fn discard_pending(&self) -> usize {
        let dropped = self.receiver.try_iter().count();
        if dropped > 0 {
            tracing::warn!(target: targets::TICK, dropped, "discarded pending tick calls");
        }
        dropped
    }

    /// Set the batch size.
    pub fn set_batch_size(&self, size: usize) {
        self.batch_size.store(size.max(1), Ordering::Relaxed);
    }

    fn run(tick: TickData) {
        tracing::trace!(target: targets::TICK, id = tick.id.0, "running tick call");
        (tick.call)();
    }
}

impl Default for TickQueue {
    fn default() -> Self {
        Self::with_batch_size(64)
    }
}
