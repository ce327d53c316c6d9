//! Error types for Arbor.
//!
//! Each subsystem owns a small error enum; [`Error`] aggregates them so that
//! entry points touching several subsystems (a `set_value` may fail on the
//! object, the property, or a name scope) can return one discriminated type.

use crate::collection::CollectionError;
use crate::event::EventError;
use crate::namescope::NameScopeError;
use crate::object::ObjectError;
use crate::property::PropertyError;
use crate::types::TypeError;
use crate::value::ValueError;

/// The main error type for Arbor operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Object lifecycle or graph-structure error.
    #[error("Object error: {0}")]
    Object(#[from] ObjectError),
    /// Property lookup, registration or validation error.
    #[error("Property error: {0}")]
    Property(#[from] PropertyError),
    /// A value was accessed as the wrong kind.
    #[error("Value error: {0}")]
    Value(#[from] ValueError),
    /// Structural collection error.
    #[error("Collection error: {0}")]
    Collection(#[from] CollectionError),
    /// Name registration error.
    #[error("Name scope error: {0}")]
    NameScope(#[from] NameScopeError),
    /// Event lookup or registration error.
    #[error("Event error: {0}")]
    Event(#[from] EventError),
    /// Type table error.
    #[error("Type error: {0}")]
    Type(#[from] TypeError),
}

impl Error {
    /// Returns `true` if this error reports use of a disposed object.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Self::Object(ObjectError::Disposed { .. }))
    }

    /// Returns `true` if this error reports mutation of a frozen object.
    pub fn is_frozen(&self) -> bool {
        matches!(self, Self::Object(ObjectError::Frozen { .. }))
    }
}

/// A specialized Result type for Arbor operations.
pub type Result<T> = std::result::Result<T, Error>;
