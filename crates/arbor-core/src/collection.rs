//! Ordered collections of dependency objects.
//!
//! A [`Collection`] is itself a [`DependencyObject`] whose items are
//! adopted the same way object-valued properties are: each item is
//! referenced, parented to the collection and listened to. Every mutation
//! fires `CollectionChanged`; a property change on an item fires
//! `CollectionItemChanged`. The read-only `Count` property tracks the length
//! and changes after the structural event has been delivered.

use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::class::{DefaultClass, ObjectClass};
use crate::dependency_object::DependencyObject;
use crate::error::Result;
use crate::event::{CollectionChangedAction, CollectionChangedEventArgs, EventArgs, EventId};
use crate::logging::targets;
use crate::object::ObjectId;
use crate::property::{PropertyDescriptor, PropertyId};
use crate::types::TypeKind;
use crate::value::{Value, ValueKind};

/// Errors from collection mutation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollectionError {
    /// Index past the end.
    #[error("index {index} out of range for collection of {count}")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Current item count.
        count: usize,
    },
    /// The item already belongs to another collection.
    #[error("object {id} is an item of another collection")]
    ItemOwnedElsewhere {
        /// The item.
        id: ObjectId,
    },
    /// The item is already in this collection.
    #[error("object {id} is already in this collection")]
    DuplicateItem {
        /// The item.
        id: ObjectId,
    },
    /// The item's type is not the element type.
    #[error("collection of {expected} cannot hold {got}")]
    ElementType {
        /// Element type name.
        expected: String,
        /// Offered type name.
        got: String,
    },
}

pub(crate) struct CollectionStore {
    element_type: TypeKind,
    pub(crate) items: RwLock<Vec<DependencyObject>>,
}

/// `Collection.Count`: read-only item count.
pub fn count_property() -> PropertyId {
    static COUNT: OnceLock<PropertyId> = OnceLock::new();
    *COUNT.get_or_init(|| {
        PropertyDescriptor::builder(TypeKind::COLLECTION, "Count", ValueKind::Int32)
            .default(0)
            .read_only()
            .register()
            .unwrap_or_else(|e| panic!("failed to register built-in Count property: {e}"))
    })
}

/// Typed handle to a collection object.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Collection(DependencyObject);

impl Collection {
    /// A `DependencyObjectCollection` holding `element_type` items.
    pub fn new(element_type: TypeKind) -> Self {
        Self::with_type(TypeKind::DEPENDENCY_OBJECT_COLLECTION, element_type, Arc::new(DefaultClass))
    }

    /// A collection of a registered collection subtype. `type_kind` must
    /// derive from `Collection`.
    pub fn with_type(type_kind: TypeKind, element_type: TypeKind, class: Arc<dyn ObjectClass>) -> Self {
        debug_assert!(
            type_kind.is_subclass_of(TypeKind::COLLECTION),
            "{} is not a collection type",
            type_kind.name()
        );
        count_property();
        let store = CollectionStore {
            element_type,
            items: RwLock::new(Vec::new()),
        };
        Self(DependencyObject::construct(type_kind, class, Some(store)))
    }

    pub(crate) fn from_object(obj: DependencyObject) -> Self {
        Self(obj)
    }

    /// The underlying object.
    pub fn as_object(&self) -> &DependencyObject {
        &self.0
    }

    /// Unwrap into the underlying object.
    pub fn into_object(self) -> DependencyObject {
        self.0
    }

    fn store(&self) -> &CollectionStore {
        match self.0.collection_store() {
            Some(store) => store,
            None => unreachable!("collection handle over an object without an item store"),
        }
    }

    /// Type every item must derive from.
    pub fn element_type(&self) -> TypeKind {
        self.store().element_type
    }

    /// Number of items.
    pub fn count(&self) -> usize {
        self.store().items.read().len()
    }

    /// Whether the collection has no items.
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Snapshot of the items.
    pub fn items(&self) -> Vec<DependencyObject> {
        self.store().items.read().clone()
    }

    /// Item at `index`.
    pub fn get_item_at(&self, index: usize) -> std::result::Result<DependencyObject, CollectionError> {
        let items = self.store().items.read();
        items.get(index).cloned().ok_or(CollectionError::IndexOutOfRange {
            index,
            count: items.len(),
        })
    }

    /// Position of `item`.
    pub fn index_of(&self, item: &DependencyObject) -> Option<usize> {
        self.store().items.read().iter().position(|i| i.ptr_eq(item))
    }

    /// Whether `item` is in the collection.
    pub fn contains(&self, item: &DependencyObject) -> bool {
        self.index_of(item).is_some()
    }

    /// Append `item`. Returns its index.
    pub fn add(&self, item: &DependencyObject) -> Result<usize> {
        let index = self.count();
        self.insert(index, item)?;
        Ok(index)
    }

    /// Insert `item` at `index`.
    pub fn insert(&self, index: usize, item: &DependencyObject) -> Result<()> {
        self.check_mutation()?;
        let count = self.count();
        if index > count {
            return Err(CollectionError::IndexOutOfRange { index, count }.into());
        }
        self.check_insertable(item)?;

        self.store().items.write().insert(index, item.clone());
        self.attach_item(item);
        tracing::trace!(target: targets::COLLECTION, id = %self.0.id(), item = %item.id(), index, "item added");
        self.changed(CollectionChangedEventArgs {
            action: CollectionChangedAction::Add,
            index: Some(index),
            old_item: None,
            new_item: Some(item.clone()),
        });
        self.update_count()
    }

    /// Remove `item`. Returns whether it was present.
    pub fn remove(&self, item: &DependencyObject) -> Result<bool> {
        match self.index_of(item) {
            Some(index) => self.remove_at(index).map(|_| true),
            None => Ok(false),
        }
    }

    /// Remove and return the item at `index`.
    pub fn remove_at(&self, index: usize) -> Result<DependencyObject> {
        self.check_mutation()?;
        let item = {
            let mut items = self.store().items.write();
            if index >= items.len() {
                return Err(CollectionError::IndexOutOfRange {
                    index,
                    count: items.len(),
                }
                .into());
            }
            items.remove(index)
        };
        self.detach_item(&item);
        tracing::trace!(target: targets::COLLECTION, id = %self.0.id(), item = %item.id(), index, "item removed");
        self.changed(CollectionChangedEventArgs {
            action: CollectionChangedAction::Remove,
            index: Some(index),
            old_item: Some(item.clone()),
            new_item: None,
        });
        let counted = self.update_count();
        self.release(&item);
        counted.map(|_| item)
    }

    /// Replace the item at `index` with `item`. Returns the previous item.
    pub fn set_item_at(&self, index: usize, item: &DependencyObject) -> Result<DependencyObject> {
        self.check_mutation()?;
        let current = self.get_item_at(index)?;
        if current.ptr_eq(item) {
            return Ok(current);
        }
        self.check_insertable(item)?;

        let old = std::mem::replace(&mut self.store().items.write()[index], item.clone());
        self.detach_item(&old);
        self.attach_item(item);
        self.changed(CollectionChangedEventArgs {
            action: CollectionChangedAction::Replace,
            index: Some(index),
            old_item: Some(old.clone()),
            new_item: Some(item.clone()),
        });
        self.release(&old);
        Ok(old)
    }

    /// Remove every item with a single `Clear` notification. Returns how
    /// many were removed.
    pub fn clear(&self) -> Result<usize> {
        self.check_mutation()?;
        let removed = std::mem::take(&mut *self.store().items.write());
        for item in &removed {
            self.detach_item(item);
        }
        tracing::trace!(target: targets::COLLECTION, id = %self.0.id(), removed = removed.len(), "cleared");
        self.changed(CollectionChangedEventArgs {
            action: CollectionChangedAction::Clear,
            index: None,
            old_item: None,
            new_item: None,
        });
        let counted = self.update_count();
        for item in &removed {
            self.release(item);
        }
        counted.map(|_| removed.len())
    }

    /// Drop every item without notification. Used by dispose.
    pub(crate) fn release_all_items(&self) {
        let removed = std::mem::take(&mut *self.store().items.write());
        for item in &removed {
            self.detach_item(item);
            self.release(item);
        }
    }

    fn check_mutation(&self) -> Result<()> {
        self.0.check_mutable()?;
        self.0
            .debug_assert_owning_thread("collections must be mutated on the deployment's thread");
        Ok(())
    }

    fn check_insertable(&self, item: &DependencyObject) -> Result<()> {
        let element_type = self.element_type();
        if !item.type_kind().is_subclass_of(element_type) {
            return Err(CollectionError::ElementType {
                expected: element_type.name().to_string(),
                got: item.type_name().to_string(),
            }
            .into());
        }
        if self.contains(item) {
            return Err(CollectionError::DuplicateItem { id: item.id() }.into());
        }
        if let Some(owner) = item.owner_collection()
            && owner != *self
        {
            return Err(CollectionError::ItemOwnedElsewhere { id: item.id() }.into());
        }
        self.0.check_can_adopt(item)?;
        self.0.check_names_for(item)?;
        Ok(())
    }

    fn attach_item(&self, item: &DependencyObject) {
        let obj = &self.0;
        item.set_owner_collection(Some(obj));
        if let Err(e) = item.ref_() {
            tracing::warn!(target: targets::COLLECTION, item = %item.id(), error = %e, "adding disposed item");
        }
        let adopted = item.parent().is_none();
        let inherited = if adopted { item.inherited_snapshot() } else { Vec::new() };
        if adopted {
            item.set_parent_link(Some(obj));
        }
        if let Err(e) = item.add_property_change_listener(obj, None) {
            tracing::warn!(target: targets::COLLECTION, item = %item.id(), error = %e, "could not listen on item");
        }
        item.class().add_target(item, obj);
        if item.parent_is(obj) {
            obj.adopt_subtree(item);
        }
        item.inherited_values_changed(inherited);
    }

    fn detach_item(&self, item: &DependencyObject) {
        let obj = &self.0;
        let orphaned = item.parent_is(obj) && !obj.holds_child(item);
        let inherited = if orphaned { item.inherited_snapshot() } else { Vec::new() };
        if orphaned {
            obj.release_subtree(item);
            item.set_parent_link(None);
        }
        item.remove_property_change_listener(obj, None);
        item.class().remove_target(item, obj);
        item.set_owner_collection(None);
        item.inherited_values_changed(inherited);
    }

    fn release(&self, item: &DependencyObject) {
        if let Err(e) = item.unref() {
            tracing::warn!(target: targets::COLLECTION, item = %item.id(), error = %e, "releasing removed item");
        }
    }

    fn update_count(&self) -> Result<()> {
        let count = i32::try_from(self.count()).unwrap_or(i32::MAX);
        let desc = count_property().descriptor()?;
        self.0.set_value_impl(&desc, Value::Int32(count), true)
    }

    fn changed(&self, args: CollectionChangedEventArgs) {
        self.0
            .emit_unchecked(EventId::COLLECTION_CHANGED, &EventArgs::CollectionChanged(args), false);
    }
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("id", &self.0.id())
            .field("element_type", &self.element_type().name())
            .field("count", &self.count())
            .finish()
    }
}
