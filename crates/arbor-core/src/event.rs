//! Event identifiers, arguments and the per-object dispatch table.
//!
//! Events are registered per owner type by name and identified on the hot
//! path by a small integer [`EventId`]. Each object keeps an event table of
//! ordered handler registrations. Emission dispatches synchronously to a
//! snapshot of the list taken when the firing starts ([`EmitContext`]), so
//! handlers may add or remove registrations (including themselves) while it
//! runs.
//!
//! Nested firings of the same event on the same object share an *emission
//! wave*. With `only_unemitted` set, a nested firing skips every handler that
//! already ran in the current wave, and runs handlers added since.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::{Mutex, RwLock};

use crate::dependency_object::DependencyObject;
use crate::logging::targets;
use crate::property::PropertyId;
use crate::types::TypeKind;
use crate::value::Value;

/// Identifier of a registered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u32);

/// Errors from event registration and lookup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    /// The (owner, name) pair is already registered.
    #[error("event '{name}' is already registered on {owner}")]
    DuplicateEvent {
        /// Owner type name.
        owner: String,
        /// Event name.
        name: String,
    },
    /// No event with this name exists on the type or its ancestors.
    #[error("event '{name}' not found on {type_name}")]
    NotFound {
        /// Event name.
        name: String,
        /// Type searched.
        type_name: String,
    },
}

struct EventInfo {
    owner: TypeKind,
    name: &'static str,
}

struct EventRegistry {
    events: Vec<EventInfo>,
    by_key: HashMap<(TypeKind, String), EventId>,
}

impl EventRegistry {
    fn with_builtins() -> Self {
        let mut registry = Self {
            events: Vec::new(),
            by_key: HashMap::new(),
        };
        registry.push(TypeKind::DEPENDENCY_OBJECT, "Destroyed");
        registry.push(TypeKind::COLLECTION, "CollectionChanged");
        registry.push(TypeKind::COLLECTION, "CollectionItemChanged");
        registry
    }

    fn push(&mut self, owner: TypeKind, name: &'static str) -> EventId {
        let id = EventId(self.events.len() as u32);
        self.events.push(EventInfo { owner, name });
        self.by_key.insert((owner, name.to_string()), id);
        id
    }
}

fn registry() -> &'static RwLock<EventRegistry> {
    static REGISTRY: OnceLock<RwLock<EventRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(EventRegistry::with_builtins()))
}

impl EventId {
    /// Fired once, synchronously, when an object's refcount reaches zero.
    pub const DESTROYED: EventId = EventId(0);
    /// Structural change of a collection.
    pub const COLLECTION_CHANGED: EventId = EventId(1);
    /// Property change of an item inside a collection.
    pub const COLLECTION_ITEM_CHANGED: EventId = EventId(2);

    /// Register an event on `owner`.
    pub fn register(owner: TypeKind, name: &'static str) -> Result<EventId, EventError> {
        let mut registry = registry().write();
        if registry.by_key.contains_key(&(owner, name.to_string())) {
            return Err(EventError::DuplicateEvent {
                owner: owner.name().to_string(),
                name: name.to_string(),
            });
        }
        let id = registry.push(owner, name);
        tracing::trace!(target: targets::EVENT, id = id.0, owner = owner.name(), name, "registered event");
        Ok(id)
    }

    /// Find an event by name on `kind` or its ancestors.
    pub fn find(kind: TypeKind, name: &str) -> Result<EventId, EventError> {
        let registry = registry().read();
        kind.ancestry()
            .into_iter()
            .find_map(|k| registry.by_key.get(&(k, name.to_string())).copied())
            .ok_or_else(|| EventError::NotFound {
                name: name.to_string(),
                type_name: kind.name().to_string(),
            })
    }

    /// Raw id.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Registered name, or `"<unknown>"`.
    pub fn name(self) -> &'static str {
        registry().read().events.get(self.0 as usize).map_or("<unknown>", |e| e.name)
    }

    /// Declaring type.
    pub fn owner(self) -> Option<TypeKind> {
        registry().read().events.get(self.0 as usize).map(|e| e.owner)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Arguments of a property change.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChangedEventArgs {
    /// The property that changed.
    pub property: PropertyId,
    /// Effective value before the change.
    pub old_value: Value,
    /// Effective value after the change.
    pub new_value: Value,
}

/// Kind of structural collection change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionChangedAction {
    /// An item was inserted at `index`.
    Add,
    /// An item was removed from `index`.
    Remove,
    /// The item at `index` was replaced.
    Replace,
    /// All items were removed.
    Clear,
}

/// Arguments of a structural collection change.
#[derive(Debug, Clone)]
pub struct CollectionChangedEventArgs {
    /// What happened.
    pub action: CollectionChangedAction,
    /// Affected index. `None` for [`CollectionChangedAction::Clear`].
    pub index: Option<usize>,
    /// Item that left the collection.
    pub old_item: Option<DependencyObject>,
    /// Item that entered the collection.
    pub new_item: Option<DependencyObject>,
}

/// Payload handed to event handlers.
#[derive(Clone)]
pub enum EventArgs {
    /// No payload.
    Empty,
    /// A property changed.
    PropertyChanged(PropertyChangedEventArgs),
    /// A collection changed structurally.
    CollectionChanged(CollectionChangedEventArgs),
    /// A property of a collection item changed.
    CollectionItemChanged {
        /// The item whose property changed.
        item: DependencyObject,
        /// The change.
        args: PropertyChangedEventArgs,
    },
    /// Payload of a user-registered event.
    Custom(Arc<dyn Any + Send + Sync>),
}

impl EventArgs {
    /// Downcast a [`EventArgs::Custom`] payload.
    pub fn custom<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Custom(payload) => payload.downcast_ref(),
            _ => None,
        }
    }
}

impl fmt::Debug for EventArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Empty"),
            Self::PropertyChanged(args) => f.debug_tuple("PropertyChanged").field(args).finish(),
            Self::CollectionChanged(args) => f.debug_tuple("CollectionChanged").field(args).finish(),
            Self::CollectionItemChanged { item, args } => f
                .debug_struct("CollectionItemChanged")
                .field("item", item)
                .field("args", args)
                .finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A handler invoked with the emitting object and the event payload.
pub type EventHandler = Arc<dyn Fn(&DependencyObject, &EventArgs) + Send + Sync>;

/// Runs once when a registration is removed, however that happens.
pub type HandlerDestructor = Box<dyn FnOnce() + Send>;

/// Token identifying one registration within one event list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerToken(u32);

impl HandlerToken {
    pub(crate) const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw token.
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

/// Identity of the party that registered a handler, used for bulk removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClosureKey(u64);

impl ClosureKey {
    /// Key from an arbitrary integer.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Key identifying `obj` as the registering party.
    pub fn of(obj: &DependencyObject) -> Self {
        Self(obj.id().as_u64())
    }
}

struct Registration {
    token: HandlerToken,
    handler: EventHandler,
    closure: Option<ClosureKey>,
    once: bool,
    removed: AtomicBool,
    last_wave: AtomicU64,
    destructor: Mutex<Option<HandlerDestructor>>,
}

impl Registration {
    fn retire(&self) {
        self.removed.store(true, Ordering::Release);
    }

    fn run_destructor(&self) {
        let destructor = self.destructor.lock().take();
        if let Some(destructor) = destructor {
            destructor();
        }
    }
}

#[derive(Default)]
struct EventList {
    registrations: Vec<Arc<Registration>>,
    next_token: u32,
    wave: u64,
    emit_depth: u32,
}

/// Handler snapshot for a single firing of one event.
pub struct EmitContext {
    event: EventId,
    wave: u64,
    snapshot: Vec<Arc<Registration>>,
}

impl EmitContext {
    /// Event being fired.
    pub fn event(&self) -> EventId {
        self.event
    }

    /// Number of registrations captured.
    pub fn len(&self) -> usize {
        self.snapshot.len()
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.snapshot.is_empty()
    }
}

/// Per-object table of event registrations.
#[derive(Default)]
pub(crate) struct EventTable {
    lists: Mutex<HashMap<EventId, EventList>>,
}

impl EventTable {
    pub(crate) fn add(
        &self,
        event: EventId,
        handler: EventHandler,
        closure: Option<ClosureKey>,
        once: bool,
        destructor: Option<HandlerDestructor>,
    ) -> HandlerToken {
        let mut lists = self.lists.lock();
        let list = lists.entry(event).or_default();
        let token = HandlerToken(list.next_token);
        list.next_token = list.next_token.wrapping_add(1);
        list.registrations.push(Arc::new(Registration {
            token,
            handler,
            closure,
            once,
            removed: AtomicBool::new(false),
            last_wave: AtomicU64::new(0),
            destructor: Mutex::new(destructor),
        }));
        token
    }

    fn remove_where(
        &self,
        event: Option<EventId>,
        mut predicate: impl FnMut(&Registration) -> bool,
    ) -> usize {
        let mut removed = Vec::new();
        {
            let mut lists = self.lists.lock();
            for (id, list) in lists.iter_mut() {
                if event.is_some_and(|e| e != *id) {
                    continue;
                }
                list.registrations.retain(|reg| {
                    if predicate(reg) {
                        reg.retire();
                        removed.push(reg.clone());
                        false
                    } else {
                        true
                    }
                });
            }
        }
        for reg in &removed {
            reg.run_destructor();
        }
        removed.len()
    }

    pub(crate) fn remove_by_token(&self, event: EventId, token: HandlerToken) -> bool {
        self.remove_where(Some(event), |reg| reg.token == token) > 0
    }

    pub(crate) fn remove_handler(
        &self,
        event: EventId,
        handler: &EventHandler,
        closure: Option<ClosureKey>,
    ) -> bool {
        let mut done = false;
        self.remove_where(Some(event), |reg| {
            let hit = !done && Arc::ptr_eq(&reg.handler, handler) && reg.closure == closure;
            done |= hit;
            hit
        }) > 0
    }

    pub(crate) fn remove_all(&self, closure: ClosureKey) -> usize {
        self.remove_where(None, |reg| reg.closure == Some(closure))
    }

    pub(crate) fn remove_matching(
        &self,
        event: EventId,
        mut predicate: impl FnMut(&EventHandler, Option<ClosureKey>) -> bool,
    ) -> usize {
        self.remove_where(Some(event), |reg| predicate(&reg.handler, reg.closure))
    }

    pub(crate) fn handler_count(&self, event: EventId) -> usize {
        self.lists
            .lock()
            .get(&event)
            .map_or(0, |list| list.registrations.len())
    }

    /// Drop every registration, running destructors outside the lock.
    pub(crate) fn clear(&self) -> usize {
        let lists = std::mem::take(&mut *self.lists.lock());
        let mut count = 0;
        for list in lists.into_values() {
            for reg in list.registrations {
                reg.retire();
                reg.run_destructor();
                count += 1;
            }
        }
        count
    }

    /// Capture the current registrations. Opens a new wave when this is the
    /// outermost firing of `event`.
    pub(crate) fn start_emit(&self, event: EventId) -> Option<EmitContext> {
        let mut lists = self.lists.lock();
        let list = lists.get_mut(&event)?;
        if list.registrations.is_empty() {
            return None;
        }
        if list.emit_depth == 0 {
            list.wave += 1;
        }
        list.emit_depth += 1;
        Some(EmitContext {
            event,
            wave: list.wave,
            snapshot: list.registrations.clone(),
        })
    }

    pub(crate) fn do_emit(
        &self,
        sender: &DependencyObject,
        ctx: &EmitContext,
        args: &EventArgs,
        only_unemitted: bool,
    ) {
        for reg in &ctx.snapshot {
            if reg.removed.load(Ordering::Acquire) {
                continue;
            }
            if only_unemitted && reg.last_wave.load(Ordering::Acquire) == ctx.wave {
                continue;
            }
            reg.last_wave.store(ctx.wave, Ordering::Release);

            if reg.once {
                let token = reg.token;
                let mut lists = self.lists.lock();
                if let Some(list) = lists.get_mut(&ctx.event) {
                    list.registrations.retain(|r| r.token != token);
                }
                reg.retire();
            }

            (reg.handler)(sender, args);

            if reg.once {
                reg.run_destructor();
            }
        }
    }

    pub(crate) fn finish_emit(&self, ctx: EmitContext) {
        if let Some(list) = self.lists.lock().get_mut(&ctx.event) {
            list.emit_depth = list.emit_depth.saturating_sub(1);
        }
    }
}
