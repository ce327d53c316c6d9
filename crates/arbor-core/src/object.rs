//! Object lifecycle and event dispatch.
//!
//! [`EventObject`] is the lifecycle unit every node embeds: an explicit
//! reference count, status flags, the typed event table, the toggle notifier
//! hook and the surface slot tick calls are posted through.
//!
//! The reference count is separate from Rust ownership. Handles
//! ([`DependencyObject`]) keep the memory alive; the count decides when the
//! object is torn down. Objects start with a count of one. When the count
//! reaches zero the object is disposed, fires `Destroyed` once, then releases
//! its handlers and toggle notifier. Any later use reports
//! [`ObjectError::Disposed`].
//!
//! ```text
//! Live ──(refcount 0)──▶ Disposing ──▶ Disposed
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use parking_lot::{Mutex, MutexGuard};

use crate::dependency_object::DependencyObject;
use crate::deployment::{Deployment, ObjectKey, WeakDeployment};
use crate::error::Error;
use crate::event::{
    ClosureKey, EventArgs, EventHandler, EventId, EventTable, HandlerDestructor, HandlerToken,
};
use crate::logging::targets;
use crate::surface::{Surface, WeakSurface};
use crate::tick::TickCallId;
use crate::toggle::ToggleNotifier;

/// Process-unique object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u64);

impl ObjectId {
    /// Raw value.
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

fn next_object_id() -> ObjectId {
    ObjectId(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Errors that can occur during object operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ObjectError {
    /// The object was used after it was disposed, or released past zero.
    #[error("object {id} used after dispose")]
    Disposed {
        /// The object.
        id: ObjectId,
    },
    /// The object is frozen and rejects mutation.
    #[error("object {id} is frozen")]
    Frozen {
        /// The object.
        id: ObjectId,
    },
    /// Attempted to make an object its own ancestor.
    #[error("cannot set an object as its own parent or ancestor")]
    CircularParentage,
    /// The object already has a different logical parent.
    #[error("object {id} already has a parent")]
    AlreadyParented {
        /// The child.
        id: ObjectId,
    },
    /// Neither the object nor its deployment has a surface to post to.
    #[error("object {id} has no surface for tick calls")]
    NoSurface {
        /// The object.
        id: ObjectId,
    },
    /// The surface stopped accepting tick calls.
    #[error("deployment is shut down")]
    DeploymentShutDown,
}

/// Result type for object operations.
pub type ObjectResult<T> = std::result::Result<T, ObjectError>;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectState {
    /// Usable.
    Live,
    /// Teardown in progress.
    Disposing,
    /// Terminal.
    Disposed,
}

pub(crate) mod flags {
    pub const ATTACHED: u32 = 1 << 0;
    pub const DISPOSING: u32 = 1 << 1;
    pub const DISPOSED: u32 = 1 << 2;
    pub const DESTROYED: u32 = 1 << 3;
    pub const MULTI_THREADED_SAFE: u32 = 1 << 4;
}

/// Lifecycle state embedded in every node.
pub struct EventObject {
    id: ObjectId,
    refcount: AtomicU32,
    flags: AtomicU32,
    pub(crate) events: EventTable,
    toggle: Mutex<Option<Arc<dyn ToggleNotifier>>>,
    deployment: WeakDeployment,
    tracking_key: Option<ObjectKey>,
    surface: Mutex<Option<WeakSurface>>,
}

impl EventObject {
    pub(crate) fn new(deployment: Option<&Deployment>, tracking_key: Option<ObjectKey>) -> Self {
        Self {
            id: next_object_id(),
            refcount: AtomicU32::new(1),
            flags: AtomicU32::new(0),
            events: EventTable::default(),
            toggle: Mutex::new(None),
            deployment: deployment.map(Deployment::downgrade).unwrap_or_default(),
            tracking_key,
            surface: Mutex::new(None),
        }
    }

    /// Unique id.
    #[inline]
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Current logical reference count.
    #[inline]
    pub fn refcount(&self) -> u32 {
        self.refcount.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn has_flag(&self, flag: u32) -> bool {
        self.flags.load(Ordering::Acquire) & flag != 0
    }

    pub(crate) fn set_flag(&self, flag: u32, on: bool) -> u32 {
        if on {
            self.flags.fetch_or(flag, Ordering::AcqRel)
        } else {
            self.flags.fetch_and(!flag, Ordering::AcqRel)
        }
    }

    /// Lifecycle state.
    pub fn state(&self) -> ObjectState {
        let flags = self.flags.load(Ordering::Acquire);
        if flags & flags::DISPOSED != 0 {
            ObjectState::Disposed
        } else if flags & flags::DISPOSING != 0 {
            ObjectState::Disposing
        } else {
            ObjectState::Live
        }
    }

    /// Whether disposal completed.
    #[inline]
    pub fn is_disposed(&self) -> bool {
        self.has_flag(flags::DISPOSED)
    }

    /// Whether `Destroyed` has fired.
    #[inline]
    pub fn is_destroyed(&self) -> bool {
        self.has_flag(flags::DESTROYED)
    }

    /// Whether the object is in a tree attached to a surface.
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.has_flag(flags::ATTACHED)
    }

    /// Whether the type opted out of owning-thread checks for tick calls.
    #[inline]
    pub fn is_multi_threaded_safe(&self) -> bool {
        self.has_flag(flags::MULTI_THREADED_SAFE)
    }

    /// Opt out of owning-thread checks for [`DependencyObject::add_tick_call`].
    pub fn set_multi_threaded_safe(&self, safe: bool) {
        self.set_flag(flags::MULTI_THREADED_SAFE, safe);
    }

    /// Deployment the object was created in.
    pub fn deployment(&self) -> Option<Deployment> {
        self.deployment.upgrade()
    }

    /// Surface the object is attached to, if any.
    pub fn surface(&self) -> Option<Surface> {
        self.surface.lock().as_ref().and_then(WeakSurface::upgrade)
    }

    /// Lock the surface slot. Types touched from other threads hold this
    /// across the surface transition and their tick-call enqueue.
    pub fn surface_lock(&self) -> SurfaceLock<'_> {
        SurfaceLock {
            slot: self.surface.lock(),
        }
    }

    /// Number of handlers registered for `event`.
    pub fn handler_count(&self, event: EventId) -> usize {
        self.events.handler_count(event)
    }

    pub(crate) fn debug_assert_owning_thread(&self, operation: &str) {
        if let Some(deployment) = self.deployment.upgrade()
            && deployment.config().thread_checks
        {
            deployment.affinity().debug_assert_same_thread_with_msg(operation);
        }
    }

    pub(crate) fn check_alive(&self) -> ObjectResult<()> {
        if self.is_disposed() {
            Err(ObjectError::Disposed { id: self.id })
        } else {
            Ok(())
        }
    }

    fn untrack(&self) {
        if let (Some(deployment), Some(key)) = (self.deployment.upgrade(), self.tracking_key) {
            deployment.untrack(key);
        }
    }
}

impl fmt::Debug for EventObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventObject")
            .field("id", &self.id)
            .field("refcount", &self.refcount())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Held lock on an object's surface slot.
pub struct SurfaceLock<'a> {
    slot: MutexGuard<'a, Option<WeakSurface>>,
}

impl SurfaceLock<'_> {
    /// Surface currently stored.
    pub fn surface(&self) -> Option<Surface> {
        self.slot.as_ref().and_then(WeakSurface::upgrade)
    }

    fn store(&mut self, surface: Option<&Surface>) {
        *self.slot = surface.map(Surface::downgrade);
    }

    pub(crate) fn clear(&mut self) {
        self.slot.take();
    }
}

impl DependencyObject {
    /// Take a logical reference. Safe from any thread.
    ///
    /// Returns the new count. Fails once the object is disposed.
    pub fn ref_(&self) -> ObjectResult<u32> {
        self.check_alive()?;
        let previous = self
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                if count == 0 { None } else { count.checked_add(1) }
            })
            .map_err(|_| ObjectError::Disposed { id: self.id() })?;
        let count = previous + 1;
        tracing::trace!(target: targets::OBJECT, id = %self.id(), count, "ref");
        if count == 2 {
            self.notify_toggle(false);
        }
        Ok(count)
    }

    /// Release a logical reference. Safe from any thread. Releasing the last
    /// reference destroys the object on the calling thread.
    ///
    /// Returns the new count. Releasing past zero reports
    /// [`ObjectError::Disposed`].
    pub fn unref(&self) -> ObjectResult<u32> {
        let previous = self
            .refcount
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1))
            .map_err(|_| ObjectError::Disposed { id: self.id() })?;
        let count = previous - 1;
        tracing::trace!(target: targets::OBJECT, id = %self.id(), count, "unref");
        match count {
            1 => self.notify_toggle(true),
            0 => self.destroy(),
            _ => {}
        }
        Ok(count)
    }

    /// Release a reference on the next tick of the object's surface instead
    /// of now. Falls back to an immediate release when there is no surface
    /// accepting tick calls.
    pub fn unref_delayed(&self) -> ObjectResult<()> {
        if self.refcount() == 0 {
            return Err(ObjectError::Disposed { id: self.id() });
        }
        if let Ok(surface) = self.tick_surface(self.surface()) {
            let obj = self.clone();
            let posted = surface.post_tick_call(move || {
                if let Err(e) = obj.unref() {
                    tracing::warn!(target: targets::TICK, id = %obj.id(), error = %e, "delayed unref failed");
                }
            });
            if posted.is_some() {
                return Ok(());
            }
        }
        self.unref().map(|_| ())
    }

    /// Install the toggle notifier, replacing any previous one.
    pub fn set_toggle_notifier(&self, notifier: Arc<dyn ToggleNotifier>) -> ObjectResult<()> {
        self.check_alive()?;
        *self.base().toggle.lock() = Some(notifier);
        Ok(())
    }

    /// Remove the toggle notifier.
    pub fn clear_toggle_notifier(&self) {
        self.base().toggle.lock().take();
    }

    fn notify_toggle(&self, is_last_ref: bool) {
        let notifier = self.base().toggle.lock().clone();
        if let Some(notifier) = notifier {
            notifier.toggle(self, is_last_ref);
        }
    }

    fn destroy(&self) {
        tracing::debug!(target: targets::OBJECT, id = %self.id(), type_name = self.type_name(), "refcount reached zero");
        self.dispose();
        if self.set_flag(flags::DESTROYED, true) & flags::DESTROYED == 0 {
            self.emit_unchecked(EventId::DESTROYED, &EventArgs::Empty, false);
        }
        let released = self.base().events.clear();
        self.base().toggle.lock().take();
        self.base().untrack();
        tracing::debug!(target: targets::OBJECT, id = %self.id(), released, "destroyed");
    }

    /// Register a handler for `event`.
    ///
    /// `closure` identifies the registering party for
    /// [`remove_all_handlers`](Self::remove_all_handlers); `destructor` runs
    /// once when the registration goes away.
    pub fn add_handler(
        &self,
        event: EventId,
        handler: EventHandler,
        closure: Option<ClosureKey>,
        destructor: Option<HandlerDestructor>,
    ) -> ObjectResult<HandlerToken> {
        self.check_alive()?;
        let token = self.base().events.add(event, handler, closure, false, destructor);
        tracing::trace!(target: targets::EVENT, id = %self.id(), event = %event, token = token.as_u32(), "handler added");
        Ok(token)
    }

    /// Register a handler that is removed before its first invocation.
    pub fn add_handler_once(
        &self,
        event: EventId,
        handler: EventHandler,
        closure: Option<ClosureKey>,
    ) -> ObjectResult<HandlerToken> {
        self.check_alive()?;
        Ok(self.base().events.add(event, handler, closure, true, None))
    }

    /// Register a handler for the event called `name` on this object's type.
    pub fn add_handler_by_name(
        &self,
        name: &str,
        handler: EventHandler,
        closure: Option<ClosureKey>,
    ) -> Result<HandlerToken, Error> {
        let event = EventId::find(self.type_kind(), name)?;
        Ok(self.add_handler(event, handler, closure, None)?)
    }

    /// Remove the registration matching `handler` (by identity) and `closure`.
    pub fn remove_handler(&self, event: EventId, handler: &EventHandler, closure: Option<ClosureKey>) -> bool {
        self.base().events.remove_handler(event, handler, closure)
    }

    /// Remove a registration by token.
    pub fn remove_handler_by_token(&self, event: EventId, token: HandlerToken) -> bool {
        self.base().events.remove_by_token(event, token)
    }

    /// Remove every registration made with `closure`, on all events.
    pub fn remove_all_handlers(&self, closure: ClosureKey) -> usize {
        self.base().events.remove_all(closure)
    }

    /// Remove the registrations of `event` the predicate selects.
    pub fn remove_matching_handlers<F>(&self, event: EventId, predicate: F) -> usize
    where
        F: FnMut(&EventHandler, Option<ClosureKey>) -> bool,
    {
        self.base().events.remove_matching(event, predicate)
    }

    /// Fire `event` synchronously.
    ///
    /// Handlers run against a snapshot taken now, so registrations added
    /// during dispatch wait for the next firing. With `only_unemitted`, a
    /// firing nested inside another firing of the same event instead runs
    /// only the handlers that have not run yet in the outer firing,
    /// including ones added since.
    #[tracing::instrument(skip_all, target = "arbor_core::event", level = "trace", fields(id = self.id().as_u64(), event = %event))]
    pub fn emit(&self, event: EventId, args: EventArgs, only_unemitted: bool) -> ObjectResult<()> {
        self.check_alive()?;
        self.emit_unchecked(event, &args, only_unemitted);
        Ok(())
    }

    pub(crate) fn emit_unchecked(&self, event: EventId, args: &EventArgs, only_unemitted: bool) {
        let Some(ctx) = self.base().events.start_emit(event) else {
            return;
        };
        tracing::trace!(target: targets::EVENT, handler_count = ctx.len(), only_unemitted, "emitting");
        self.base().events.do_emit(self, &ctx, args, only_unemitted);
        self.base().events.finish_emit(ctx);
    }

    /// Resolve the tick target from the already-read attached surface.
    /// Never touches the surface slot, so callers may hold the lock.
    fn tick_surface(&self, attached: Option<Surface>) -> ObjectResult<Surface> {
        match attached.or_else(|| self.deployment().map(|d| d.surface().clone())) {
            Some(surface) if !surface.is_closed() => Ok(surface),
            Some(_) => Err(ObjectError::DeploymentShutDown),
            None => Err(ObjectError::NoSurface { id: self.id() }),
        }
    }

    fn post_tick<F>(&self, surface: Surface, call: F) -> ObjectResult<TickCallId>
    where
        F: FnOnce(&DependencyObject) + Send + 'static,
    {
        self.ref_()?;
        let obj = self.clone();
        let posted = surface.post_tick_call(move || {
            call(&obj);
            if let Err(e) = obj.unref() {
                tracing::warn!(target: targets::TICK, id = %obj.id(), error = %e, "release after tick call failed");
            }
        });
        match posted {
            Some(id) => Ok(id),
            None => {
                self.unref()?;
                Err(ObjectError::DeploymentShutDown)
            }
        }
    }

    /// Queue `call` to run on the next tick of the object's surface (or its
    /// deployment's default surface). Owning thread only; the object is kept
    /// alive until the call has run.
    pub fn add_tick_call<F>(&self, call: F) -> ObjectResult<TickCallId>
    where
        F: FnOnce(&DependencyObject) + Send + 'static,
    {
        self.check_alive()?;
        let surface = self.tick_surface(self.surface())?;
        if !self.is_multi_threaded_safe() {
            surface.debug_assert_owning_thread("add_tick_call from another thread, use add_tick_call_safe");
        }
        self.post_tick(surface, call)
    }

    /// Like [`add_tick_call`](Self::add_tick_call), callable from any
    /// thread. Holds the surface lock while reading the surface and
    /// enqueueing.
    pub fn add_tick_call_safe<F>(&self, call: F) -> ObjectResult<TickCallId>
    where
        F: FnOnce(&DependencyObject) + Send + 'static,
    {
        self.check_alive()?;
        let lock = self.surface_lock();
        let result = self.tick_surface(lock.surface()).and_then(|surface| self.post_tick(surface, call));
        drop(lock);
        result
    }

    /// Attach the object and its logical subtree to `surface`, or detach
    /// with `None`.
    pub fn set_surface(&self, surface: Option<&Surface>) {
        let mut lock = self.surface_lock();
        self.set_surface_locked(&mut lock, surface);
    }

    /// Surface transition for callers already holding this object's
    /// [`SurfaceLock`]. Never takes the lock again.
    pub fn set_surface_locked(&self, lock: &mut SurfaceLock<'_>, surface: Option<&Surface>) {
        lock.store(surface);
        self.set_flag(flags::ATTACHED, surface.is_some());
        for child in self.logical_children() {
            child.set_surface(surface);
        }
    }
}
