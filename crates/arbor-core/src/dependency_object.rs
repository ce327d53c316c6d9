//! Dependency objects: nodes of the property graph.
//!
//! A [`DependencyObject`] holds no typed fields. Property state lives in a
//! sparse local-value table plus a fixed array of providers indexed by
//! [`PropertyPrecedence`]; reads return the first provider's answer, highest
//! precedence first.
//!
//! Storing an object as a property value wires it into the graph: the owner
//! takes a reference, becomes its logical parent (unless it already has
//! one), listens for its property changes and registers its names in the
//! enclosing [`NameScope`]. Replacing or clearing the value undoes all of
//! that, in reverse.
//!
//! # Example
//!
//! ```
//! use arbor_core::{DependencyObject, PropertyDescriptor, TypeKind, Value, ValueKind};
//!
//! let shape = TypeKind::register("DocRectangle", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
//! let width = PropertyDescriptor::register(shape, "Width", ValueKind::Double, 0.0).unwrap();
//!
//! let rect = DependencyObject::new(shape);
//! assert_eq!(rect.get_value(width).unwrap(), Value::Double(0.0));
//!
//! rect.set_value(width, 12.5).unwrap();
//! assert_eq!(rect.get_value(width).unwrap(), Value::Double(12.5));
//!
//! rect.clear_value(width, true).unwrap();
//! assert_eq!(rect.read_local_value(width).unwrap(), None);
//! rect.unref().unwrap();
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::class::{DefaultClass, ObjectClass};
use crate::collection::{Collection, CollectionStore};
use crate::deployment::Deployment;
use crate::error::Result;
use crate::event::{ClosureKey, EventArgs, EventHandler, EventId, HandlerToken, PropertyChangedEventArgs};
use crate::logging::targets;
use crate::namescope::{NameScope, NameScopeError};
use crate::object::{EventObject, ObjectError, ObjectResult, flags};
use crate::property::{PropertyDescriptor, PropertyError, PropertyId, name_property};
use crate::provider::{
    DefaultValueProvider, InheritedValueProvider, LocalValueProvider, OverrideValueProvider, PropertyPrecedence,
    PropertyValueProvider, Style,
};
use crate::types::TypeKind;
use crate::value::Value;

/// Callback for changes of one property on one object.
pub type PropertyChangedHandler = Arc<dyn Fn(&DependencyObject, &PropertyChangedEventArgs) + Send + Sync>;

type ProviderSlots = [Option<Arc<dyn PropertyValueProvider>>; PropertyPrecedence::COUNT];

struct Listener {
    target: WeakDependencyObject,
    child_property: Option<PropertyId>,
}

#[derive(Default)]
struct PropertyHandlers {
    next_token: u32,
    entries: Vec<(HandlerToken, PropertyId, PropertyChangedHandler)>,
}

pub(crate) struct Inner {
    base: EventObject,
    type_kind: TypeKind,
    class: Arc<dyn ObjectClass>,
    local_values: RwLock<HashMap<PropertyId, Value>>,
    providers: RwLock<ProviderSlots>,
    animation: Arc<OverrideValueProvider>,
    style: Arc<OverrideValueProvider>,
    listeners: Mutex<Vec<Listener>>,
    property_handlers: Mutex<PropertyHandlers>,
    parent: RwLock<Option<WeakDependencyObject>>,
    name_scope: RwLock<Option<NameScope>>,
    collection_hooks: Mutex<HashMap<PropertyId, (HandlerToken, HandlerToken)>>,
    pub(crate) collection: Option<CollectionStore>,
    pub(crate) owner_collection: RwLock<Option<WeakDependencyObject>>,
    hydrated: AtomicBool,
    frozen: AtomicBool,
}

/// Shared handle to a node of the property graph.
///
/// Cloning the handle does not take a logical reference; use
/// [`ref_`](Self::ref_) and [`unref`](Self::unref) for that.
#[derive(Clone)]
pub struct DependencyObject(Arc<Inner>);

/// Non-owning handle to a [`DependencyObject`].
#[derive(Clone, Default)]
pub struct WeakDependencyObject(Weak<Inner>);

static_assertions::assert_impl_all!(DependencyObject: Send, Sync);
static_assertions::assert_impl_all!(WeakDependencyObject: Send, Sync);

impl Deref for DependencyObject {
    type Target = EventObject;

    fn deref(&self) -> &EventObject {
        &self.0.base
    }
}

impl DependencyObject {
    /// Create an object of `type_kind` with no class behavior.
    pub fn new(type_kind: TypeKind) -> Self {
        Self::with_class(type_kind, Arc::new(DefaultClass))
    }

    /// Create an object of `type_kind` driven by `class`.
    pub fn with_class(type_kind: TypeKind, class: Arc<dyn ObjectClass>) -> Self {
        Self::construct(type_kind, class, None)
    }

    pub(crate) fn construct(
        type_kind: TypeKind,
        class: Arc<dyn ObjectClass>,
        collection: Option<CollectionStore>,
    ) -> Self {
        name_property();
        let deployment = Deployment::current();
        let animation = Arc::new(OverrideValueProvider::new());
        let style = Arc::new(OverrideValueProvider::new());
        let providers: ProviderSlots = [
            Some(animation.clone()),
            Some(Arc::new(LocalValueProvider)),
            Some(style.clone()),
            Some(Arc::new(InheritedValueProvider)),
            Some(Arc::new(DefaultValueProvider)),
        ];
        let inner = Arc::new_cyclic(|weak| {
            let tracking_key = deployment
                .as_ref()
                .and_then(|d| d.track(WeakDependencyObject(weak.clone())));
            Inner {
                base: EventObject::new(deployment.as_ref(), tracking_key),
                type_kind,
                class,
                local_values: RwLock::new(HashMap::new()),
                providers: RwLock::new(providers),
                animation,
                style,
                listeners: Mutex::new(Vec::new()),
                property_handlers: Mutex::new(PropertyHandlers::default()),
                parent: RwLock::new(None),
                name_scope: RwLock::new(None),
                collection_hooks: Mutex::new(HashMap::new()),
                collection,
                owner_collection: RwLock::new(None),
                hydrated: AtomicBool::new(false),
                frozen: AtomicBool::new(false),
            }
        });
        let obj = Self(inner);
        tracing::trace!(target: targets::OBJECT, id = %obj.id(), type_name = type_kind.name(), "created object");
        obj
    }

    #[inline]
    pub(crate) fn base(&self) -> &EventObject {
        &self.0.base
    }

    /// Registered type.
    #[inline]
    pub fn type_kind(&self) -> TypeKind {
        self.0.type_kind
    }

    /// Name of the registered type.
    pub fn type_name(&self) -> &'static str {
        self.0.type_kind.name()
    }

    /// Class hooks driving this object.
    pub fn class(&self) -> &Arc<dyn ObjectClass> {
        &self.0.class
    }

    /// Identity comparison.
    #[inline]
    pub fn ptr_eq(&self, other: &DependencyObject) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Non-owning handle.
    pub fn downgrade(&self) -> WeakDependencyObject {
        WeakDependencyObject(Arc::downgrade(&self.0))
    }

    /// Typed view if this object is a collection.
    pub fn as_collection(&self) -> Option<Collection> {
        self.0.collection.as_ref().map(|_| Collection::from_object(self.clone()))
    }

    /// Whether this object is a collection.
    pub fn is_collection(&self) -> bool {
        self.0.collection.is_some()
    }

    pub(crate) fn collection_store(&self) -> Option<&CollectionStore> {
        self.0.collection.as_ref()
    }

    /// Collection this object is an item of.
    pub fn owner_collection(&self) -> Option<Collection> {
        self.0
            .owner_collection
            .read()
            .as_ref()
            .and_then(WeakDependencyObject::upgrade)
            .and_then(|obj| obj.as_collection())
    }

    pub(crate) fn set_owner_collection(&self, collection: Option<&DependencyObject>) {
        *self.0.owner_collection.write() = collection.map(DependencyObject::downgrade);
    }

    // ---- mutability ------------------------------------------------------

    /// Make the object immutable. One-way; reads stay legal.
    pub fn freeze(&self) -> ObjectResult<()> {
        self.check_alive()?;
        if !self.0.frozen.swap(true, Ordering::AcqRel) {
            tracing::debug!(target: targets::OBJECT, id = %self.id(), "frozen");
        }
        Ok(())
    }

    /// Whether [`freeze`](Self::freeze) was called.
    pub fn is_frozen(&self) -> bool {
        self.0.frozen.load(Ordering::Acquire)
    }

    /// Whether the object was created from markup.
    pub fn is_hydrated(&self) -> bool {
        self.0.hydrated.load(Ordering::Acquire)
    }

    /// Mark the object as created from markup.
    pub fn set_is_hydrated(&self, hydrated: bool) {
        self.0.hydrated.store(hydrated, Ordering::Release);
    }

    pub(crate) fn check_mutable(&self) -> ObjectResult<()> {
        self.check_alive()?;
        if self.is_frozen() {
            return Err(ObjectError::Frozen { id: self.id() });
        }
        Ok(())
    }

    // ---- reading ---------------------------------------------------------

    fn provider_slots(&self) -> ProviderSlots {
        self.0.providers.read().clone()
    }

    fn resolve(&self, desc: &PropertyDescriptor, skip: Option<PropertyPrecedence>) -> Option<Value> {
        let slots = self.provider_slots();
        PropertyPrecedence::ALL
            .iter()
            .zip(slots.iter())
            .filter(|(precedence, _)| Some(**precedence) != skip)
            .find_map(|(_, provider)| provider.as_ref()?.get_property_value(self, desc))
    }

    fn value_from_slot(&self, precedence: PropertyPrecedence, desc: &PropertyDescriptor) -> Option<Value> {
        let provider = self.0.providers.read()[precedence.index()].clone();
        provider?.get_property_value(self, desc)
    }

    /// Effective value: the highest-precedence provider's answer, else the
    /// registered default.
    pub fn get_value(&self, property: PropertyId) -> Result<Value> {
        self.check_alive()?;
        let desc = property.descriptor()?;
        Ok(self
            .resolve(&desc, None)
            .unwrap_or_else(|| desc.default_value().clone()))
    }

    /// Effective value ignoring one precedence slot.
    pub fn get_value_skipping(&self, property: PropertyId, precedence: PropertyPrecedence) -> Result<Value> {
        self.check_alive()?;
        let desc = property.descriptor()?;
        Ok(self
            .resolve(&desc, Some(precedence))
            .unwrap_or_else(|| desc.default_value().clone()))
    }

    /// Answer of a single precedence slot.
    pub fn get_value_from(&self, property: PropertyId, precedence: PropertyPrecedence) -> Result<Option<Value>> {
        self.check_alive()?;
        let desc = property.descriptor()?;
        Ok(self.value_from_slot(precedence, &desc))
    }

    /// Effective value without falling back to the default slot.
    pub fn get_value_no_default(&self, property: PropertyId) -> Result<Option<Value>> {
        self.check_alive()?;
        let desc = property.descriptor()?;
        Ok(self.resolve(&desc, Some(PropertyPrecedence::DefaultValue)))
    }

    /// Locally set value, if any.
    pub fn read_local_value(&self, property: PropertyId) -> ObjectResult<Option<Value>> {
        self.check_alive()?;
        Ok(self.0.local_values.read().get(&property).cloned())
    }

    /// Value of the type's content property.
    pub fn content(&self) -> Result<Option<Value>> {
        match self.type_kind().content_property() {
            Some(property) => self.get_value(property).map(Some),
            None => Ok(None),
        }
    }

    /// Whether a property called `name` applies to this object's type.
    /// With `inherits == false` only properties declared on the exact type
    /// count.
    pub fn has_property(&self, name: &str, inherits: bool) -> bool {
        if inherits {
            PropertyDescriptor::find(self.type_kind(), name).is_some()
        } else {
            PropertyDescriptor::find_exact(self.type_kind(), name).is_some()
        }
    }

    /// Properties of this object: every applicable one, or only those with a
    /// local value.
    pub fn properties(&self, only_changed: bool) -> Vec<PropertyId> {
        let mut ids: Vec<PropertyId> = if only_changed {
            self.0.local_values.read().keys().copied().collect()
        } else {
            PropertyDescriptor::all_for(self.type_kind())
        };
        ids.sort();
        ids
    }

    // ---- writing ---------------------------------------------------------

    /// Store a local value and notify listeners.
    pub fn set_value(&self, property: PropertyId, value: impl Into<Value>) -> Result<()> {
        self.set_value_with_notify(property, value, true)
    }

    /// Store a local value. With `notify == false` the change still runs
    /// class hooks and property handlers but listeners are not told.
    #[tracing::instrument(skip_all, target = "arbor_core::property", level = "trace", fields(id = self.id().as_u64(), property = property.as_u32()))]
    pub fn set_value_with_notify(&self, property: PropertyId, value: impl Into<Value>, notify: bool) -> Result<()> {
        let desc = property.descriptor()?;
        if desc.is_read_only() {
            return Err(PropertyError::ReadOnly {
                name: desc.name().to_string(),
            }
            .into());
        }
        self.set_value_impl(&desc, value.into(), notify)
    }

    pub(crate) fn set_value_impl(&self, desc: &PropertyDescriptor, value: Value, notify: bool) -> Result<()> {
        self.check_mutable()?;
        self.debug_assert_owning_thread("set_value must run on the deployment's thread");
        self.check_applicable(desc)?;
        desc.validate(&value)?;

        let property = desc.id();
        let previous = self.0.local_values.read().get(&property).cloned();
        if previous.as_ref() == Some(&value) {
            return Ok(());
        }
        if let Value::Object(child) = &value {
            self.check_can_adopt(child)?;
            self.check_names_for(child)?;
        }
        if property == name_property() {
            self.check_rename(&value)?;
        }

        let old = self.0.local_values.write().insert(property, value.clone());
        tracing::trace!(target: targets::PROPERTY, id = %self.id(), property = desc.name(), "local value set");
        if let Some(Value::Object(old_child)) = &old {
            self.detach_child(property, old_child);
        }
        if let Value::Object(child) = &value {
            self.attach_child(property, child);
        }
        self.provider_value_changed(PropertyPrecedence::LocalValue, desc, old, Some(value), notify);
        Ok(())
    }

    /// Remove the local value, falling back to the next precedence.
    pub fn clear_value(&self, property: PropertyId, notify: bool) -> Result<()> {
        let desc = property.descriptor()?;
        if desc.is_read_only() {
            return Err(PropertyError::ReadOnly {
                name: desc.name().to_string(),
            }
            .into());
        }
        self.check_mutable()?;
        let Some(old) = self.0.local_values.write().remove(&property) else {
            return Ok(());
        };
        tracing::trace!(target: targets::PROPERTY, id = %self.id(), property = desc.name(), "local value cleared");
        if let Value::Object(child) = &old {
            self.detach_child(property, child);
        }
        self.provider_value_changed(PropertyPrecedence::LocalValue, &desc, Some(old), None, notify);
        Ok(())
    }

    /// Drive the animation slot.
    pub fn set_animated_value(&self, property: PropertyId, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let desc = property.descriptor()?;
        self.check_mutable()?;
        self.check_applicable(&desc)?;
        desc.validate(&value)?;
        let old = self.0.animation.set(property, value.clone());
        self.provider_value_changed(PropertyPrecedence::Animation, &desc, old, Some(value), true);
        Ok(())
    }

    /// Stop animating `property`.
    pub fn clear_animated_value(&self, property: PropertyId) -> Result<()> {
        let desc = property.descriptor()?;
        self.check_mutable()?;
        if let Some(old) = self.0.animation.remove(property) {
            self.provider_value_changed(PropertyPrecedence::Animation, &desc, Some(old), None, true);
        }
        Ok(())
    }

    /// Replace the style slot's values with `style`'s setters.
    pub fn apply_style(&self, style: &Style) -> Result<()> {
        self.check_mutable()?;
        if !self.type_kind().is_subclass_of(style.target_type()) {
            return Err(PropertyError::NotApplicable {
                property: format!("Style<{}>", style.target_type().name()),
                type_name: self.type_name().to_string(),
            }
            .into());
        }
        let mut resolved = Vec::with_capacity(style.setters().len());
        for (property, value) in style.setters() {
            let desc = property.descriptor()?;
            self.check_applicable(&desc)?;
            desc.validate(value)?;
            resolved.push((desc, value.clone()));
        }

        let mut old = self.0.style.take_all();
        for (desc, value) in &resolved {
            self.0.style.set(desc.id(), value.clone());
        }
        tracing::trace!(target: targets::PROPERTY, id = %self.id(), setters = resolved.len(), "style applied");
        for (desc, value) in resolved {
            let previous = old.remove(&desc.id());
            self.provider_value_changed(PropertyPrecedence::Style, &desc, previous, Some(value), true);
        }
        self.style_values_removed(old)
    }

    /// Remove all style values.
    pub fn clear_style(&self) -> Result<()> {
        self.check_mutable()?;
        let old = self.0.style.take_all();
        self.style_values_removed(old)
    }

    fn style_values_removed(&self, removed: HashMap<PropertyId, Value>) -> Result<()> {
        for (property, value) in removed {
            let desc = property.descriptor()?;
            self.provider_value_changed(PropertyPrecedence::Style, &desc, Some(value), None, true);
        }
        Ok(())
    }

    /// Install a custom provider in a precedence slot, or empty it. Values
    /// are not re-evaluated; callers notify through the property system if
    /// effective values change.
    pub fn set_provider(
        &self,
        precedence: PropertyPrecedence,
        provider: Option<Arc<dyn PropertyValueProvider>>,
    ) -> ObjectResult<()> {
        self.check_mutable()?;
        self.0.providers.write()[precedence.index()] = provider;
        Ok(())
    }

    fn check_applicable(&self, desc: &PropertyDescriptor) -> std::result::Result<(), PropertyError> {
        if desc.is_applicable_to(self.type_kind()) {
            Ok(())
        } else {
            Err(PropertyError::NotApplicable {
                property: desc.name().to_string(),
                type_name: self.type_name().to_string(),
            })
        }
    }

    /// Recompute the effective value after the answer of `precedence`
    /// changed from `old` to `new`, and fan out the change if it is visible.
    pub(crate) fn provider_value_changed(
        &self,
        precedence: PropertyPrecedence,
        desc: &PropertyDescriptor,
        old: Option<Value>,
        new: Option<Value>,
        notify: bool,
    ) {
        let masked = PropertyPrecedence::ALL
            .iter()
            .take(precedence.index())
            .any(|higher| self.value_from_slot(*higher, desc).is_some());
        if masked {
            return;
        }
        let fallback = || {
            self.resolve(desc, Some(precedence))
                .unwrap_or_else(|| desc.default_value().clone())
        };
        let old_value = old.unwrap_or_else(fallback);
        let new_value = new.unwrap_or_else(fallback);
        if old_value == new_value {
            return;
        }
        let args = PropertyChangedEventArgs {
            property: desc.id(),
            old_value,
            new_value,
        };
        self.property_changed(desc, &args, notify);
    }

    fn property_changed(&self, desc: &PropertyDescriptor, args: &PropertyChangedEventArgs, notify: bool) {
        tracing::trace!(
            target: targets::PROPERTY,
            id = %self.id(),
            property = desc.name(),
            old = %args.old_value,
            new = %args.new_value,
            "property changed"
        );
        if desc.id() == name_property() {
            self.renamed(args);
        }
        self.0.class.on_property_changed(self, args);

        let handlers: Vec<PropertyChangedHandler> = self
            .0
            .property_handlers
            .lock()
            .entries
            .iter()
            .filter(|(_, property, _)| *property == desc.id())
            .map(|(_, _, handler)| handler.clone())
            .collect();
        for handler in handlers {
            handler(self, args);
        }

        if desc.inherits() {
            for child in self.logical_children() {
                let applies = desc.is_applicable_to(child.type_kind());
                child.provider_value_changed(
                    PropertyPrecedence::Inherited,
                    desc,
                    Some(args.old_value.clone()),
                    Some(args.new_value.clone()),
                    applies,
                );
            }
        }

        if notify {
            self.notify_listeners_of_property_change(args);
        }
    }

    /// Call `handler` whenever the effective value of `property` changes.
    pub fn add_property_change_handler<F>(&self, property: PropertyId, handler: F) -> ObjectResult<HandlerToken>
    where
        F: Fn(&DependencyObject, &PropertyChangedEventArgs) + Send + Sync + 'static,
    {
        self.check_alive()?;
        let mut handlers = self.0.property_handlers.lock();
        let token = HandlerToken::from_raw(handlers.next_token);
        handlers.next_token = handlers.next_token.wrapping_add(1);
        handlers.entries.push((token, property, Arc::new(handler)));
        Ok(token)
    }

    /// Remove a handler added with
    /// [`add_property_change_handler`](Self::add_property_change_handler).
    pub fn remove_property_change_handler(&self, token: HandlerToken) -> bool {
        let mut handlers = self.0.property_handlers.lock();
        let before = handlers.entries.len();
        handlers.entries.retain(|(t, _, _)| *t != token);
        handlers.entries.len() != before
    }

    // ---- listeners -------------------------------------------------------

    /// Tell `listener` about every property change on this object through
    /// its sub-property-changed hook. `child_property` is handed back to
    /// identify which of the listener's properties holds this object.
    pub fn add_property_change_listener(
        &self,
        listener: &DependencyObject,
        child_property: Option<PropertyId>,
    ) -> ObjectResult<()> {
        self.check_alive()?;
        self.0.listeners.lock().push(Listener {
            target: listener.downgrade(),
            child_property,
        });
        Ok(())
    }

    /// Remove one registration of `listener` with `child_property`.
    pub fn remove_property_change_listener(
        &self,
        listener: &DependencyObject,
        child_property: Option<PropertyId>,
    ) -> bool {
        let mut listeners = self.0.listeners.lock();
        let position = listeners
            .iter()
            .position(|l| l.child_property == child_property && l.target.is(listener));
        match position {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Number of live listener registrations.
    pub fn listener_count(&self) -> usize {
        self.0
            .listeners
            .lock()
            .iter()
            .filter(|l| l.target.upgrade().is_some())
            .count()
    }

    fn notify_listeners_of_property_change(&self, args: &PropertyChangedEventArgs) {
        let listeners: Vec<(DependencyObject, Option<PropertyId>)> = {
            let mut listeners = self.0.listeners.lock();
            listeners.retain(|l| l.target.0.strong_count() > 0);
            listeners
                .iter()
                .filter_map(|l| l.target.upgrade().map(|t| (t, l.child_property)))
                .collect()
        };
        for (target, child_property) in listeners {
            if target.is_disposed() {
                continue;
            }
            target.sub_property_changed(child_property, self, args);
        }
    }

    fn sub_property_changed(
        &self,
        property: Option<PropertyId>,
        child: &DependencyObject,
        args: &PropertyChangedEventArgs,
    ) {
        if self.is_collection() {
            self.emit_unchecked(
                EventId::COLLECTION_ITEM_CHANGED,
                &EventArgs::CollectionItemChanged {
                    item: child.clone(),
                    args: args.clone(),
                },
                false,
            );
        }
        self.0.class.on_sub_property_changed(self, property, child, args);
    }

    // ---- parent linkage --------------------------------------------------

    /// Logical parent.
    pub fn parent(&self) -> Option<DependencyObject> {
        self.0.parent.read().as_ref().and_then(WeakDependencyObject::upgrade)
    }

    pub(crate) fn parent_is(&self, candidate: &DependencyObject) -> bool {
        self.0.parent.read().as_ref().is_some_and(|p| p.is(candidate))
    }

    pub(crate) fn set_parent_link(&self, parent: Option<&DependencyObject>) {
        *self.0.parent.write() = parent.map(DependencyObject::downgrade);
    }

    fn has_ancestor(&self, candidate: &DependencyObject) -> bool {
        let mut current = self.parent();
        while let Some(obj) = current {
            if obj.ptr_eq(candidate) {
                return true;
            }
            current = obj.parent();
        }
        false
    }

    /// Set or clear the logical parent.
    ///
    /// Fails with [`ObjectError::CircularParentage`] if `parent` is this
    /// object or a descendant, and with [`ObjectError::AlreadyParented`] if
    /// another parent is set and the class does not permit several.
    pub fn set_parent(&self, parent: Option<&DependencyObject>) -> ObjectResult<()> {
        self.check_alive()?;
        if let Some(parent) = parent {
            parent.check_alive()?;
            if parent.ptr_eq(self) || parent.has_ancestor(self) {
                return Err(ObjectError::CircularParentage);
            }
            if let Some(existing) = self.parent()
                && !existing.ptr_eq(parent)
                && !self.0.class.permits_multiple_parents()
            {
                return Err(ObjectError::AlreadyParented { id: self.id() });
            }
        }
        let inherited = self.inherited_snapshot();
        self.set_parent_link(parent);
        self.inherited_values_changed(inherited);
        Ok(())
    }

    pub(crate) fn check_can_adopt(&self, child: &DependencyObject) -> ObjectResult<()> {
        child.check_alive()?;
        if child.ptr_eq(self) || self.has_ancestor(child) {
            return Err(ObjectError::CircularParentage);
        }
        if let Some(parent) = child.parent()
            && !parent.ptr_eq(self)
            && !child.0.class.permits_multiple_parents()
        {
            return Err(ObjectError::AlreadyParented { id: child.id() });
        }
        Ok(())
    }

    /// Objects whose logical parent is this object: object-valued local
    /// values and, for collections, items.
    pub fn logical_children(&self) -> Vec<DependencyObject> {
        let mut seen = HashSet::new();
        let mut children = Vec::new();
        let mut push = |obj: &DependencyObject| {
            if obj.parent_is(self) && seen.insert(obj.id()) {
                children.push(obj.clone());
            }
        };
        for value in self.0.local_values.read().values() {
            if let Value::Object(obj) = value {
                push(obj);
            }
        }
        if let Some(store) = &self.0.collection {
            for item in store.items.read().iter() {
                push(item);
            }
        }
        children
    }

    fn attach_child(&self, property: PropertyId, child: &DependencyObject) {
        if let Err(e) = child.ref_() {
            tracing::warn!(target: targets::OBJECT, id = %child.id(), error = %e, "attaching disposed child");
        }
        let adopted = child.parent().is_none();
        let inherited = if adopted { child.inherited_snapshot() } else { Vec::new() };
        if adopted {
            child.set_parent_link(Some(self));
        }
        if let Err(e) = child.add_property_change_listener(self, Some(property)) {
            tracing::warn!(target: targets::OBJECT, id = %child.id(), error = %e, "could not listen on child");
        }
        child.0.class.add_target(child, self);
        if let Some(collection) = child.as_collection() {
            self.hook_collection(property, &collection);
        }
        if child.parent_is(self) {
            self.adopt_subtree(child);
        }
        child.inherited_values_changed(inherited);
    }

    fn detach_child(&self, property: PropertyId, child: &DependencyObject) {
        self.unhook_collection(property, child);
        let orphaned = child.parent_is(self) && !self.holds_child(child);
        let inherited = if orphaned { child.inherited_snapshot() } else { Vec::new() };
        if orphaned {
            self.release_subtree(child);
            child.set_parent_link(None);
        }
        child.remove_property_change_listener(self, Some(property));
        child.0.class.remove_target(child, self);
        child.inherited_values_changed(inherited);
        if let Err(e) = child.unref() {
            tracing::warn!(target: targets::OBJECT, id = %child.id(), error = %e, "releasing detached child");
        }
    }

    /// Whether a local value or collection item still references `child`.
    pub(crate) fn holds_child(&self, child: &DependencyObject) -> bool {
        let in_values = self
            .0
            .local_values
            .read()
            .values()
            .any(|v| matches!(v, Value::Object(obj) if obj.ptr_eq(child)));
        in_values
            || self
                .0
                .collection
                .as_ref()
                .is_some_and(|store| store.items.read().iter().any(|i| i.ptr_eq(child)))
    }

    /// Effective values of every inheritable property, taken before the
    /// parent link changes.
    pub(crate) fn inherited_snapshot(&self) -> Vec<(Arc<PropertyDescriptor>, Value)> {
        PropertyDescriptor::inheritable()
            .into_iter()
            .map(|desc| {
                let value = self.resolve(&desc, None).unwrap_or_else(|| desc.default_value().clone());
                (desc, value)
            })
            .collect()
    }

    /// Notify inherited values that differ from `before` after a reparent.
    pub(crate) fn inherited_values_changed(&self, before: Vec<(Arc<PropertyDescriptor>, Value)>) {
        for (desc, old) in before {
            let new = self.resolve(&desc, None).unwrap_or_else(|| desc.default_value().clone());
            if new != old {
                let applies = desc.is_applicable_to(self.type_kind());
                self.provider_value_changed(PropertyPrecedence::Inherited, &desc, Some(old), Some(new), applies);
            }
        }
    }

    /// Register names and propagate the surface into a newly parented child.
    pub(crate) fn adopt_subtree(&self, child: &DependencyObject) {
        if let Some(scope) = self.find_name_scope()
            && let Err(e) = child.register_all_names_rooted_at(&scope)
        {
            tracing::warn!(target: targets::NAMESCOPE, id = %child.id(), error = %e, "name registration failed");
        }
        if let Some(surface) = self.surface() {
            child.set_surface(Some(&surface));
        }
    }

    /// Undo [`adopt_subtree`](Self::adopt_subtree).
    pub(crate) fn release_subtree(&self, child: &DependencyObject) {
        if let Some(scope) = self.find_name_scope() {
            child.unregister_all_names_rooted_at(&scope);
        }
        if child.is_attached() {
            child.set_surface(None);
        }
    }

    fn hook_collection(&self, property: PropertyId, collection: &Collection) {
        let closure = ClosureKey::of(self);
        let owner = self.downgrade();
        let changed: EventHandler = Arc::new(move |sender, args| {
            if let (Some(owner), Some(collection), EventArgs::CollectionChanged(args)) =
                (owner.upgrade(), sender.as_collection(), args)
            {
                owner.0.class.on_collection_changed(&owner, &collection, args);
            }
        });
        let owner = self.downgrade();
        let item_changed: EventHandler = Arc::new(move |sender, args| {
            if let (Some(owner), Some(collection), EventArgs::CollectionItemChanged { item, args }) =
                (owner.upgrade(), sender.as_collection(), args)
            {
                owner.0.class.on_collection_item_changed(&owner, &collection, item, args);
            }
        });

        let obj = collection.as_object();
        let hooks = obj
            .add_handler(EventId::COLLECTION_CHANGED, changed, Some(closure), None)
            .and_then(|a| {
                obj.add_handler(EventId::COLLECTION_ITEM_CHANGED, item_changed, Some(closure), None)
                    .map(|b| (a, b))
            });
        match hooks {
            Ok(tokens) => {
                self.0.collection_hooks.lock().insert(property, tokens);
            }
            Err(e) => {
                tracing::warn!(target: targets::COLLECTION, id = %obj.id(), error = %e, "could not hook collection");
            }
        }
    }

    fn unhook_collection(&self, property: PropertyId, child: &DependencyObject) {
        let hooks = self.0.collection_hooks.lock().remove(&property);
        if let Some((changed, item_changed)) = hooks {
            child.remove_handler_by_token(EventId::COLLECTION_CHANGED, changed);
            child.remove_handler_by_token(EventId::COLLECTION_ITEM_CHANGED, item_changed);
        }
    }

    // ---- names -----------------------------------------------------------

    /// Value of the `Name` property.
    pub fn name(&self) -> Option<String> {
        let local = self.0.local_values.read().get(&name_property()).cloned();
        match local {
            Some(Value::String(name)) => Some(name.to_string()),
            _ => None,
        }
    }

    /// Set the `Name` property, registering it in the enclosing scope.
    pub fn set_name(&self, name: &str) -> Result<()> {
        self.set_value(name_property(), name)
    }

    /// Set the `Name` property and register it in `scope` specifically.
    pub fn set_name_in_scope(&self, name: &str, scope: &NameScope) -> Result<()> {
        if !scope.can_register(name, self) {
            return Err(NameScopeError::DuplicateName { name: name.to_string() }.into());
        }
        self.set_name(name)?;
        scope.register_name(name, self)?;
        Ok(())
    }

    /// Scope rooted at this object.
    pub fn name_scope(&self) -> Option<NameScope> {
        self.0.name_scope.read().clone()
    }

    /// Make this object the root of `scope`, or stop being a root.
    pub fn set_name_scope(&self, scope: Option<NameScope>) -> ObjectResult<()> {
        self.check_alive()?;
        *self.0.name_scope.write() = scope;
        Ok(())
    }

    /// Nearest scope at or above this object.
    pub fn find_name_scope(&self) -> Option<NameScope> {
        let mut current = Some(self.clone());
        while let Some(obj) = current {
            if let Some(scope) = obj.name_scope() {
                return Some(scope);
            }
            current = obj.parent();
        }
        None
    }

    /// Resolve `name` in the nearest scope, then in enclosing scopes.
    pub fn find_name(&self, name: &str) -> Option<DependencyObject> {
        let mut current = Some(self.clone());
        while let Some(obj) = current {
            if let Some(found) = obj.name_scope().and_then(|scope| scope.find_name(name)) {
                return Some(found);
            }
            current = obj.parent();
        }
        None
    }

    fn check_rename(&self, value: &Value) -> Result<()> {
        if let (Value::String(name), Some(scope)) = (value, self.find_name_scope())
            && !scope.can_register(name, self)
        {
            return Err(NameScopeError::DuplicateName { name: name.to_string() }.into());
        }
        Ok(())
    }

    fn renamed(&self, args: &PropertyChangedEventArgs) {
        let Some(scope) = self.find_name_scope() else {
            return;
        };
        if let Ok(old) = args.old_value.as_str() {
            scope.unregister_name_of(old, self);
        }
        if let Ok(new) = args.new_value.as_str()
            && let Err(e) = scope.register_name(new, self)
        {
            tracing::warn!(target: targets::NAMESCOPE, id = %self.id(), error = %e, "rename not registered");
        }
    }

    /// Names that would enter an enclosing scope if this subtree attached.
    pub(crate) fn collect_rooted_names(&self, out: &mut Vec<(String, DependencyObject)>) {
        if let Some(name) = self.name() {
            out.push((name, self.clone()));
        }
        match self.name_scope() {
            Some(scope) if scope.is_temporary() => out.extend(scope.entries()),
            Some(_) => {}
            None => {
                for child in self.logical_children() {
                    child.collect_rooted_names(out);
                }
            }
        }
    }

    pub(crate) fn check_names_for(&self, child: &DependencyObject) -> std::result::Result<(), NameScopeError> {
        let Some(scope) = self.find_name_scope() else {
            return Ok(());
        };
        let mut names = Vec::new();
        child.collect_rooted_names(&mut names);
        match names.into_iter().find(|(name, obj)| !scope.can_register(name, obj)) {
            Some((name, _)) => Err(NameScopeError::DuplicateName { name }),
            None => Ok(()),
        }
    }

    /// Register this object's name and its subtree's names in `scope`.
    /// Descent stops at nested permanent scopes; a temporary scope is merged
    /// into `scope` and dropped.
    pub fn register_all_names_rooted_at(&self, scope: &NameScope) -> std::result::Result<(), NameScopeError> {
        if let Some(name) = self.name() {
            scope.register_name(&name, self)?;
        }
        match self.name_scope() {
            Some(own) if own.is_temporary() => {
                scope.merge(&own)?;
                *self.0.name_scope.write() = None;
                tracing::trace!(target: targets::NAMESCOPE, id = %self.id(), "temporary scope merged");
            }
            Some(_) => {}
            None => {
                for child in self.logical_children() {
                    child.register_all_names_rooted_at(scope)?;
                }
            }
        }
        Ok(())
    }

    /// Remove this object's name and its subtree's names from `scope`.
    pub fn unregister_all_names_rooted_at(&self, scope: &NameScope) {
        if let Some(name) = self.name() {
            scope.unregister_name_of(&name, self);
        }
        if self.name_scope().is_none() {
            for child in self.logical_children() {
                child.unregister_all_names_rooted_at(scope);
            }
        }
    }

    // ---- disposal --------------------------------------------------------

    /// Sever every link this object holds: local values, collection items,
    /// listeners, handlers of property changes, parent and name scope.
    /// Idempotent. Runs automatically when the refcount reaches zero.
    pub fn dispose(&self) {
        let previous = self.set_flag(flags::DISPOSING, true);
        if previous & (flags::DISPOSING | flags::DISPOSED) != 0 {
            return;
        }
        tracing::debug!(target: targets::OBJECT, id = %self.id(), type_name = self.type_name(), "disposing");
        self.0.class.on_dispose(self);

        if let Some(parent) = self.parent()
            && let Some(scope) = parent.find_name_scope()
        {
            self.unregister_all_names_rooted_at(&scope);
        }

        let values = std::mem::take(&mut *self.0.local_values.write());
        for (property, value) in values {
            if let Value::Object(child) = value {
                self.detach_child(property, &child);
            }
        }
        if let Some(collection) = self.as_collection() {
            collection.release_all_items();
        }
        self.0.animation.take_all();
        self.0.style.take_all();
        *self.0.providers.write() = Default::default();
        self.0.listeners.lock().clear();
        self.0.property_handlers.lock().entries.clear();
        self.0.collection_hooks.lock().clear();
        self.set_parent_link(None);
        self.set_owner_collection(None);
        *self.0.name_scope.write() = None;
        self.surface_lock().clear();
        self.set_flag(flags::ATTACHED, false);

        self.set_flag(flags::DISPOSED, true);
        self.set_flag(flags::DISPOSING, false);
        tracing::debug!(target: targets::OBJECT, id = %self.id(), "disposed");
    }
}

impl PartialEq for DependencyObject {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for DependencyObject {}

impl Hash for DependencyObject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Debug for DependencyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DependencyObject({}{}, refcount={})",
            self.type_name(),
            self.id(),
            self.refcount()
        )
    }
}

impl WeakDependencyObject {
    /// Upgrade if the memory is still alive.
    pub fn upgrade(&self) -> Option<DependencyObject> {
        self.0.upgrade().map(DependencyObject)
    }

    /// Whether this points at `obj`.
    pub fn is(&self, obj: &DependencyObject) -> bool {
        std::ptr::eq(self.0.as_ptr(), Arc::as_ptr(&obj.0))
    }
}

impl fmt::Debug for WeakDependencyObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(obj) => write!(f, "Weak({obj:?})"),
            None => f.write_str("Weak(<dropped>)"),
        }
    }
}
