//! Name scopes.
//!
//! A [`NameScope`] maps names to objects within one namespace root. Entries
//! are weak; a name whose object was dropped or disposed reads as absent
//! and is pruned on lookup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::dependency_object::{DependencyObject, WeakDependencyObject};
use crate::logging::targets;

/// Errors from name registration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NameScopeError {
    /// Another live object already holds the name.
    #[error("name '{name}' is already registered in this scope")]
    DuplicateName {
        /// The contested name.
        name: String,
    },
}

struct NameScopeInner {
    names: RwLock<HashMap<String, WeakDependencyObject>>,
    temporary: AtomicBool,
}

/// Namespace mapping names to objects.
#[derive(Clone)]
pub struct NameScope(Arc<NameScopeInner>);

fn live(weak: &WeakDependencyObject) -> Option<DependencyObject> {
    weak.upgrade().filter(|obj| !obj.is_disposed())
}

impl NameScope {
    /// A permanent scope. Registration stops descending at objects rooting
    /// one of these.
    pub fn new() -> Self {
        Self::with_temporary(false)
    }

    /// A temporary scope, merged into the enclosing scope when its root is
    /// attached.
    pub fn new_temporary() -> Self {
        Self::with_temporary(true)
    }

    fn with_temporary(temporary: bool) -> Self {
        Self(Arc::new(NameScopeInner {
            names: RwLock::new(HashMap::new()),
            temporary: AtomicBool::new(temporary),
        }))
    }

    /// Whether this scope is merged on attach.
    pub fn is_temporary(&self) -> bool {
        self.0.temporary.load(Ordering::Acquire)
    }

    /// Change the temporary flag.
    pub fn set_temporary(&self, temporary: bool) {
        self.0.temporary.store(temporary, Ordering::Release);
    }

    /// Whether `name` is free or already maps to `obj`.
    pub fn can_register(&self, name: &str, obj: &DependencyObject) -> bool {
        match self.0.names.read().get(name).and_then(live) {
            Some(existing) => existing.ptr_eq(obj),
            None => true,
        }
    }

    /// Map `name` to `obj`. Re-registering the same object is a no-op.
    pub fn register_name(&self, name: &str, obj: &DependencyObject) -> Result<(), NameScopeError> {
        let mut names = self.0.names.write();
        if let Some(existing) = names.get(name).and_then(live) {
            if existing.ptr_eq(obj) {
                return Ok(());
            }
            return Err(NameScopeError::DuplicateName { name: name.to_string() });
        }
        names.insert(name.to_string(), obj.downgrade());
        tracing::trace!(target: targets::NAMESCOPE, name, id = %obj.id(), "name registered");
        Ok(())
    }

    /// Remove `name` regardless of which object holds it.
    pub fn unregister_name(&self, name: &str) -> bool {
        self.0.names.write().remove(name).is_some()
    }

    /// Remove `name` only if it maps to `obj`.
    pub fn unregister_name_of(&self, name: &str, obj: &DependencyObject) -> bool {
        let mut names = self.0.names.write();
        match names.get(name) {
            Some(weak) if weak.is(obj) => {
                names.remove(name);
                tracing::trace!(target: targets::NAMESCOPE, name, id = %obj.id(), "name unregistered");
                true
            }
            _ => false,
        }
    }

    /// Object registered as `name`.
    pub fn find_name(&self, name: &str) -> Option<DependencyObject> {
        let mut names = self.0.names.write();
        match names.get(name).map(live) {
            Some(Some(obj)) => Some(obj),
            Some(None) => {
                names.remove(name);
                None
            }
            None => None,
        }
    }

    /// Copy every live entry of `other` into this scope, then empty `other`.
    /// Fails without copying anything if a name collides.
    pub fn merge(&self, other: &NameScope) -> Result<(), NameScopeError> {
        if self.ptr_eq(other) {
            return Ok(());
        }
        let entries = other.entries();
        if let Some((name, _)) = entries.iter().find(|(name, obj)| !self.can_register(name, obj)) {
            return Err(NameScopeError::DuplicateName { name: name.clone() });
        }
        for (name, obj) in &entries {
            self.register_name(name, obj)?;
        }
        other.0.names.write().clear();
        tracing::trace!(target: targets::NAMESCOPE, merged = entries.len(), "scopes merged");
        Ok(())
    }

    /// Registered names with live objects, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries().into_iter().map(|(name, _)| name).collect();
        names.sort();
        names
    }

    /// Live entries.
    pub fn entries(&self) -> Vec<(String, DependencyObject)> {
        self.0
            .names
            .read()
            .iter()
            .filter_map(|(name, weak)| live(weak).map(|obj| (name.clone(), obj)))
            .collect()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &NameScope) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Default for NameScope {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for NameScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NameScope")
            .field("temporary", &self.is_temporary())
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeKind;

    fn object() -> DependencyObject {
        DependencyObject::new(TypeKind::DEPENDENCY_OBJECT)
    }

    #[test]
    fn test_register_and_find() {
        let scope = NameScope::new();
        let a = object();
        scope.register_name("a", &a).unwrap();
        assert_eq!(scope.find_name("a"), Some(a.clone()));
        assert_eq!(scope.find_name("b"), None);
        scope.register_name("a", &a).unwrap();
        assert_eq!(scope.names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let scope = NameScope::new();
        let (a, b) = (object(), object());
        scope.register_name("x", &a).unwrap();
        assert_eq!(
            scope.register_name("x", &b),
            Err(NameScopeError::DuplicateName { name: "x".into() })
        );
        assert!(!scope.can_register("x", &b));
        assert!(scope.can_register("x", &a));
    }

    #[test]
    fn test_disposed_object_frees_name() {
        let scope = NameScope::new();
        let (a, b) = (object(), object());
        scope.register_name("x", &a).unwrap();
        a.unref().unwrap();

        assert_eq!(scope.find_name("x"), None);
        scope.register_name("x", &b).unwrap();
        assert_eq!(scope.find_name("x"), Some(b));
    }

    #[test]
    fn test_unregister_only_matching_object() {
        let scope = NameScope::new();
        let (a, b) = (object(), object());
        scope.register_name("x", &a).unwrap();
        assert!(!scope.unregister_name_of("x", &b));
        assert!(scope.unregister_name_of("x", &a));
        assert!(!scope.unregister_name("x"));
    }

    #[test]
    fn test_merge_moves_entries() {
        let outer = NameScope::new();
        let inner = NameScope::new_temporary();
        let (a, b) = (object(), object());
        outer.register_name("a", &a).unwrap();
        inner.register_name("b", &b).unwrap();

        outer.merge(&inner).unwrap();
        assert_eq!(outer.names(), vec!["a".to_string(), "b".to_string()]);
        assert!(inner.names().is_empty());
    }

    #[test]
    fn test_merge_collision_copies_nothing() {
        let outer = NameScope::new();
        let inner = NameScope::new_temporary();
        let (a, b, c) = (object(), object(), object());
        outer.register_name("a", &a).unwrap();
        inner.register_name("a", &b).unwrap();
        inner.register_name("c", &c).unwrap();

        assert!(outer.merge(&inner).is_err());
        assert_eq!(outer.names(), vec!["a".to_string()]);
        assert_eq!(inner.names().len(), 2);
    }
}
