//! Render surfaces.
//!
//! A [`Surface`] is the host an object tree is attached to. In this crate it
//! owns the tick-call queue its objects post to; the embedding main loop
//! calls [`Surface::process_tick_calls`] once per iteration.

use std::fmt;
use std::sync::{Arc, Weak};

use crate::logging::targets;
use crate::thread_check::ThreadAffinity;
use crate::tick::{TickCallId, TickQueue};

struct SurfaceInner {
    name: String,
    ticks: TickQueue,
    affinity: ThreadAffinity,
    thread_checks: bool,
}

/// Host of an attached object tree.
#[derive(Clone)]
pub struct Surface(Arc<SurfaceInner>);

/// Non-owning reference to a [`Surface`].
#[derive(Clone, Default)]
pub struct WeakSurface(Weak<SurfaceInner>);

impl Surface {
    /// Create a surface owned by the calling thread.
    pub fn new(name: impl Into<String>, tick_batch_size: usize) -> Self {
        Self::with_thread_checks(name, tick_batch_size, crate::thread_check::are_thread_checks_enabled())
    }

    pub(crate) fn with_thread_checks(name: impl Into<String>, tick_batch_size: usize, thread_checks: bool) -> Self {
        let name = name.into();
        tracing::debug!(target: targets::TICK, surface = %name, "surface created");
        Self(Arc::new(SurfaceInner {
            name,
            ticks: TickQueue::with_batch_size(tick_batch_size),
            affinity: ThreadAffinity::current(),
            thread_checks,
        }))
    }

    /// Surface name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Owning thread.
    pub fn affinity(&self) -> ThreadAffinity {
        self.0.affinity
    }

    /// Whether thread-bound operations on this surface assert the owning thread.
    pub fn thread_checks(&self) -> bool {
        self.0.thread_checks
    }

    pub(crate) fn debug_assert_owning_thread(&self, operation: &str) {
        if self.0.thread_checks {
            self.0.affinity.debug_assert_same_thread_with_msg(operation);
        }
    }

    /// Queue a raw call. Safe from any thread.
    pub fn post_tick_call<F>(&self, call: F) -> Option<TickCallId>
    where
        F: FnOnce() + Send + 'static,
    {
        self.0.ticks.post(call)
    }

    /// Run one batch of pending tick calls. Call once per main-loop
    /// iteration on the owning thread.
    pub fn process_tick_calls(&self) -> usize {
        self.debug_assert_owning_thread("tick calls must be processed on the surface's thread");
        let count = self.0.ticks.process_batch();
        if count > 0 {
            tracing::trace!(target: targets::TICK, surface = %self.0.name, count, "processed tick calls");
        }
        count
    }

    /// Run tick calls until none are pending.
    pub fn drain_tick_calls(&self) -> usize {
        self.debug_assert_owning_thread("tick calls must be processed on the surface's thread");
        self.0.ticks.process_all()
    }

    /// Number of queued tick calls.
    pub fn pending_tick_calls(&self) -> usize {
        self.0.ticks.pending_count()
    }

    /// Reject further tick calls.
    pub fn close(&self) {
        self.0.ticks.close();
    }

    /// Whether the surface stopped accepting tick calls.
    pub fn is_closed(&self) -> bool {
        self.0.ticks.is_closed()
    }

    pub(crate) fn discard_pending(&self) -> usize {
        self.0.ticks.discard_pending()
    }

    /// Non-owning reference.
    pub fn downgrade(&self) -> WeakSurface {
        WeakSurface(Arc::downgrade(&self.0))
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Surface) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl WeakSurface {
    /// Upgrade if the surface is still alive.
    pub fn upgrade(&self) -> Option<Surface> {
        self.0.upgrade().map(Surface)
    }
}

impl fmt::Debug for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Surface")
            .field("name", &self.0.name)
            .field("pending_tick_calls", &self.pending_tick_calls())
            .finish()
    }
}

impl fmt::Debug for WeakSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakSurface")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_process_runs_one_batch() {
        let surface = Surface::new("test", 2);
        let ran = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            surface.post_tick_call(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(surface.process_tick_calls(), 2);
        assert_eq!(surface.pending_tick_calls(), 1);
        assert_eq!(surface.drain_tick_calls(), 1);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_weak_surface_does_not_keep_alive() {
        let surface = Surface::new("weak", 4);
        let weak = surface.downgrade();
        assert!(weak.upgrade().is_some_and(|s| s.ptr_eq(&surface)));
        drop(surface);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_closed_surface_drops_posts() {
        let surface = Surface::new("closed", 4);
        surface.close();
        assert!(surface.is_closed());
        assert!(surface.post_tick_call(|| {}).is_none());
    }
}
