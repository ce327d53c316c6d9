//! Value providers and precedence.
//!
//! Every dependency object resolves a property by asking a fixed array of
//! providers, one slot per [`PropertyPrecedence`], from highest to lowest.
//! The first provider that answers wins. Built-in providers cover animation
//! values, local values, style setters, inheritance from the logical parent
//! and the registered default; any slot can be replaced with a custom
//! [`PropertyValueProvider`].

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::dependency_object::DependencyObject;
use crate::property::{PropertyDescriptor, PropertyId};
use crate::types::TypeKind;
use crate::value::Value;

/// Precedence of a value source, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyPrecedence {
    /// Running animations.
    Animation = 0,
    /// Values set with `set_value`.
    LocalValue = 1,
    /// Setters of the applied style.
    Style = 2,
    /// Values inherited from the logical parent.
    Inherited = 3,
    /// Registered default.
    DefaultValue = 4,
}

impl PropertyPrecedence {
    /// Number of precedence slots.
    pub const COUNT: usize = 5;

    /// All precedences, highest first.
    pub const ALL: [PropertyPrecedence; Self::COUNT] = [
        Self::Animation,
        Self::LocalValue,
        Self::Style,
        Self::Inherited,
        Self::DefaultValue,
    ];

    /// Whether a value from `self` masks one from `other`.
    #[inline]
    pub fn is_higher_than(self, other: PropertyPrecedence) -> bool {
        (self as u8) < (other as u8)
    }

    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// A source of property values occupying one precedence slot.
pub trait PropertyValueProvider: Send + Sync {
    /// The value this source supplies for `property` on `obj`, if any.
    fn get_property_value(&self, obj: &DependencyObject, property: &PropertyDescriptor) -> Option<Value>;
}

/// Reads the object's local value table.
#[derive(Debug, Default)]
pub struct LocalValueProvider;

impl PropertyValueProvider for LocalValueProvider {
    fn get_property_value(&self, obj: &DependencyObject, property: &PropertyDescriptor) -> Option<Value> {
        obj.read_local_value(property.id()).ok().flatten()
    }
}

/// A per-object table of values that sit outside local storage. Backs both
/// the animation and the style slots.
#[derive(Debug, Default)]
pub struct OverrideValueProvider {
    values: RwLock<HashMap<PropertyId, Value>>,
}

impl OverrideValueProvider {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, returning the previous one.
    pub fn set(&self, property: PropertyId, value: Value) -> Option<Value> {
        self.values.write().insert(property, value)
    }

    /// Remove a value, returning it.
    pub fn remove(&self, property: PropertyId) -> Option<Value> {
        self.values.write().remove(&property)
    }

    /// Current value, if any.
    pub fn get(&self, property: PropertyId) -> Option<Value> {
        self.values.read().get(&property).cloned()
    }

    /// Remove and return all values.
    pub fn take_all(&self) -> HashMap<PropertyId, Value> {
        std::mem::take(&mut *self.values.write())
    }

    /// Whether no values are stored.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl PropertyValueProvider for OverrideValueProvider {
    fn get_property_value(&self, _obj: &DependencyObject, property: &PropertyDescriptor) -> Option<Value> {
        self.get(property.id())
    }
}

/// Answers for inheritable properties with the logical parent's effective
/// value.
#[derive(Debug, Default)]
pub struct InheritedValueProvider;

impl PropertyValueProvider for InheritedValueProvider {
    fn get_property_value(&self, obj: &DependencyObject, property: &PropertyDescriptor) -> Option<Value> {
        if !property.inherits() {
            return None;
        }
        // Containers resolve through their own parent, so this recurses to
        // the nearest ancestor with a value.
        obj.parent()?.get_value(property.id()).ok()
    }
}

/// Answers with the registered default.
#[derive(Debug, Default)]
pub struct DefaultValueProvider;

impl PropertyValueProvider for DefaultValueProvider {
    fn get_property_value(&self, _obj: &DependencyObject, property: &PropertyDescriptor) -> Option<Value> {
        Some(property.default_value().clone())
    }
}

/// A named set of property values applied through the style slot.
#[derive(Debug, Clone)]
pub struct Style {
    target_type: TypeKind,
    setters: Vec<(PropertyId, Value)>,
}

impl Style {
    /// Create an empty style for objects of `target_type` and its subtypes.
    pub fn new(target_type: TypeKind) -> Self {
        Self {
            target_type,
            setters: Vec::new(),
        }
    }

    /// Add a setter. A later setter for the same property wins.
    pub fn setter(mut self, property: PropertyId, value: impl Into<Value>) -> Self {
        let value = value.into();
        match self.setters.iter_mut().find(|(p, _)| *p == property) {
            Some(existing) => existing.1 = value,
            None => self.setters.push((property, value)),
        }
        self
    }

    /// Type the style targets.
    pub fn target_type(&self) -> TypeKind {
        self.target_type
    }

    /// Setters in insertion order.
    pub fn setters(&self) -> &[(PropertyId, Value)] {
        &self.setters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert!(PropertyPrecedence::Animation.is_higher_than(PropertyPrecedence::LocalValue));
        assert!(PropertyPrecedence::LocalValue.is_higher_than(PropertyPrecedence::Style));
        assert!(PropertyPrecedence::Style.is_higher_than(PropertyPrecedence::Inherited));
        assert!(PropertyPrecedence::Inherited.is_higher_than(PropertyPrecedence::DefaultValue));
        assert!(!PropertyPrecedence::Style.is_higher_than(PropertyPrecedence::Style));
        assert_eq!(PropertyPrecedence::ALL[PropertyPrecedence::Inherited.index()], PropertyPrecedence::Inherited);
    }

    #[test]
    fn test_override_table() {
        let table = OverrideValueProvider::new();
        let owner = TypeKind::register("ProviderTestOwner", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
        let p = PropertyDescriptor::register(owner, "X", crate::ValueKind::Int32, 0).unwrap();

        assert!(table.is_empty());
        assert_eq!(table.set(p, Value::Int32(1)), None);
        assert_eq!(table.set(p, Value::Int32(2)), Some(Value::Int32(1)));
        assert_eq!(table.get(p), Some(Value::Int32(2)));
        assert_eq!(table.take_all().len(), 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_style_setter_replaces() {
        let owner = TypeKind::register("ProviderTestStyled", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
        let p = PropertyDescriptor::register(owner, "Y", crate::ValueKind::Int32, 0).unwrap();
        let style = Style::new(owner).setter(p, 1).setter(p, 2);
        assert_eq!(style.setters(), &[(p, Value::Int32(2))]);
        assert_eq!(style.target_type(), owner);
    }
}
