//! Bridge to an external memory manager.
//!
//! A host that mirrors objects (a script engine wrapper, for instance) needs
//! to know when it holds the only remaining reference, so it can switch its
//! own handle between strong and weak. The object calls its
//! [`ToggleNotifier`] when the refcount moves between one and two.

use crate::dependency_object::DependencyObject;

/// Receives refcount transitions across the 1 ↔ 2 boundary.
pub trait ToggleNotifier: Send + Sync {
    /// Called after 1→2 with `is_last_ref == false` and after 2→1 with
    /// `is_last_ref == true`.
    fn toggle(&self, obj: &DependencyObject, is_last_ref: bool);
}

impl<F> ToggleNotifier for F
where
    F: Fn(&DependencyObject, bool) + Send + Sync,
{
    fn toggle(&self, obj: &DependencyObject, is_last_ref: bool) {
        self(obj, is_last_ref)
    }
}
