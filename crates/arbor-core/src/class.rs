//! Per-type behavior hooks.
//!
//! Concrete node types do not subclass [`DependencyObject`]; they attach an
//! [`ObjectClass`] at construction and react to the property system through
//! its hooks. Every hook has a no-op default.

use crate::collection::Collection;
use crate::dependency_object::DependencyObject;
use crate::event::{CollectionChangedEventArgs, PropertyChangedEventArgs};
use crate::property::PropertyId;

/// Behavior shared by every instance of a node type.
#[allow(unused_variables)]
pub trait ObjectClass: Send + Sync {
    /// The effective value of a property on `obj` changed.
    fn on_property_changed(&self, obj: &DependencyObject, args: &PropertyChangedEventArgs) {}

    /// A property of `child` changed, where `obj` listens on `child`.
    /// `property` is the property of `obj` that holds `child`, if any.
    fn on_sub_property_changed(
        &self,
        obj: &DependencyObject,
        property: Option<PropertyId>,
        child: &DependencyObject,
        args: &PropertyChangedEventArgs,
    ) {
    }

    /// A collection held in one of `obj`'s properties changed structurally.
    fn on_collection_changed(
        &self,
        obj: &DependencyObject,
        collection: &Collection,
        args: &CollectionChangedEventArgs,
    ) {
    }

    /// A property of an item in a collection held by `obj` changed.
    fn on_collection_item_changed(
        &self,
        obj: &DependencyObject,
        collection: &Collection,
        item: &DependencyObject,
        args: &PropertyChangedEventArgs,
    ) {
    }

    /// `obj` was stored as a property value on `target`.
    fn add_target(&self, obj: &DependencyObject, target: &DependencyObject) {}

    /// `obj` stopped being a property value on `target`.
    fn remove_target(&self, obj: &DependencyObject, target: &DependencyObject) {}

    /// Whether instances may be shared between several logical parents.
    fn permits_multiple_parents(&self) -> bool {
        false
    }

    /// Called first during disposal, while the object is still wired up.
    fn on_dispose(&self, obj: &DependencyObject) {}
}

/// Class with no behavior of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultClass;

impl ObjectClass for DefaultClass {}
