//! Dependency property descriptors.
//!
//! A [`PropertyDescriptor`] is registered once per (owner type, name) at
//! startup and is immutable afterwards. Objects never carry typed fields;
//! they store [`Value`]s keyed by the small integer [`PropertyId`] issued at
//! registration.
//!
//! # Example
//!
//! ```
//! use arbor_core::{PropertyDescriptor, TypeKind, Value, ValueKind};
//!
//! let shape = TypeKind::register("DocShape", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
//! let opacity = PropertyDescriptor::builder(shape, "Opacity", ValueKind::Double)
//!     .default(1.0)
//!     .validator(|v| match v.as_f64() {
//!         Ok(o) if (0.0..=1.0).contains(&o) => Ok(()),
//!         _ => Err("opacity must be within 0..=1".into()),
//!     })
//!     .register()
//!     .unwrap();
//!
//! let descriptor = opacity.descriptor().unwrap();
//! assert_eq!(descriptor.default_value(), &Value::Double(1.0));
//! assert!(descriptor.validate(&Value::Double(2.0)).is_err());
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use crate::logging::targets;
use crate::types::TypeKind;
use crate::value::{Value, ValueKind};

/// Identifier of a registered property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyId(u32);

/// Extra validation run after the kind check. The error string becomes the
/// message of [`PropertyError::ValidationFailed`].
pub type Validator = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Errors that can occur during property operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    /// No property with this name is registered on the type or its ancestors.
    #[error("property '{name}' not found")]
    NotFound {
        /// The name that was looked up.
        name: String,
    },
    /// The id was not issued by the registry.
    #[error("unknown property id {0}")]
    UnknownId(u32),
    /// The value kind does not match the declared kind.
    #[error("property '{property}' expects {expected}, got {got}")]
    TypeMismatch {
        /// Property name.
        property: String,
        /// Declared kind.
        expected: String,
        /// Kind of the rejected value.
        got: String,
    },
    /// The validator rejected the value.
    #[error("invalid value for property '{property}': {message}")]
    ValidationFailed {
        /// Property name.
        property: String,
        /// Validator message.
        message: String,
    },
    /// The (owner, name) pair is already registered.
    #[error("property '{name}' is already registered on {owner}")]
    DuplicateRegistration {
        /// Owner type name.
        owner: String,
        /// Property name.
        name: String,
    },
    /// The default value does not satisfy the declared kind or validator.
    #[error("invalid default for property '{name}': {reason}")]
    InvalidDefault {
        /// Property name.
        name: String,
        /// Why the default was rejected.
        reason: String,
    },
    /// The property is neither owned by an ancestor of the type nor attached.
    #[error("property '{property}' does not apply to type {type_name}")]
    NotApplicable {
        /// Property name.
        property: String,
        /// Name of the object's type.
        type_name: String,
    },
    /// The property may only be written by its owning type.
    #[error("property '{name}' is read-only")]
    ReadOnly {
        /// Property name.
        name: String,
    },
}

/// Immutable metadata of a registered property.
pub struct PropertyDescriptor {
    id: PropertyId,
    owner: TypeKind,
    name: String,
    kind: ValueKind,
    default: Value,
    validator: Option<Validator>,
    attached: bool,
    inherits: bool,
    read_only: bool,
}

impl PropertyDescriptor {
    /// Start building a property owned by `owner`.
    pub fn builder(owner: TypeKind, name: impl Into<String>, kind: ValueKind) -> PropertyBuilder {
        PropertyBuilder {
            owner,
            name: name.into(),
            kind,
            default: None,
            validator: None,
            attached: false,
            inherits: false,
            read_only: false,
        }
    }

    /// Register a plain property with the given kind and default.
    pub fn register(
        owner: TypeKind,
        name: impl Into<String>,
        kind: ValueKind,
        default: impl Into<Value>,
    ) -> Result<PropertyId, PropertyError> {
        Self::builder(owner, name, kind).default(default).register()
    }

    /// Find a property by name on `owner` or the nearest ancestor declaring it.
    pub fn find(owner: TypeKind, name: &str) -> Option<PropertyId> {
        let registry = registry().read();
        owner
            .ancestry()
            .into_iter()
            .find_map(|kind| registry.by_key.get(&(kind, name.to_string())).copied())
    }

    /// Find a property declared directly on `owner`.
    pub fn find_exact(owner: TypeKind, name: &str) -> Option<PropertyId> {
        registry().read().by_key.get(&(owner, name.to_string())).copied()
    }

    /// Every property declared on `owner` or any ancestor.
    pub fn all_for(owner: TypeKind) -> Vec<PropertyId> {
        let registry = registry().read();
        registry
            .descriptors
            .iter()
            .filter(|d| !d.attached && owner.is_subclass_of(d.owner))
            .map(|d| d.id)
            .collect()
    }

    /// Every property that flows from parent to child.
    pub(crate) fn inheritable() -> Vec<Arc<PropertyDescriptor>> {
        registry().read().descriptors.iter().filter(|d| d.inherits).cloned().collect()
    }

    /// Id issued at registration.
    #[inline]
    pub fn id(&self) -> PropertyId {
        self.id
    }

    /// Declaring type.
    #[inline]
    pub fn owner(&self) -> TypeKind {
        self.owner
    }

    /// Property name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared kind.
    #[inline]
    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Registered default.
    #[inline]
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// Whether the property may be set on objects of any type.
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.attached
    }

    /// Whether the value flows from parent to logical children.
    #[inline]
    pub fn inherits(&self) -> bool {
        self.inherits
    }

    /// Whether public `set_value` is rejected.
    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether objects of `kind` may hold this property.
    pub fn is_applicable_to(&self, kind: TypeKind) -> bool {
        self.attached || kind.is_subclass_of(self.owner)
    }

    /// Check `value` against the declared kind and the validator.
    pub fn validate(&self, value: &Value) -> Result<(), PropertyError> {
        if !self.kind.accepts(value) {
            return Err(PropertyError::TypeMismatch {
                property: self.name.clone(),
                expected: self.kind.to_string(),
                got: value.kind_name().to_string(),
            });
        }
        if let Some(validator) = &self.validator {
            validator(value).map_err(|message| PropertyError::ValidationFailed {
                property: self.name.clone(),
                message,
            })?;
        }
        Ok(())
    }
}

impl fmt::Debug for PropertyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDescriptor")
            .field("id", &self.id)
            .field("owner", &self.owner.name())
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("default", &self.default)
            .field("attached", &self.attached)
            .field("inherits", &self.inherits)
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

/// Builder returned by [`PropertyDescriptor::builder`].
pub struct PropertyBuilder {
    owner: TypeKind,
    name: String,
    kind: ValueKind,
    default: Option<Value>,
    validator: Option<Validator>,
    attached: bool,
    inherits: bool,
    read_only: bool,
}

impl PropertyBuilder {
    /// Default value. Falls back to [`ValueKind::zero_value`] when not given.
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Validation run on every write, and on the default at registration.
    pub fn validator<F>(mut self, validator: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.validator = Some(Arc::new(validator));
        self
    }

    /// Allow the property on objects of any type.
    pub fn attached(mut self) -> Self {
        self.attached = true;
        self
    }

    /// Resolve unset values from the logical parent.
    pub fn inherits(mut self) -> Self {
        self.inherits = true;
        self
    }

    /// Reject public writes.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Add the descriptor to the process-wide registry.
    pub fn register(self) -> Result<PropertyId, PropertyError> {
        let default = self.default.unwrap_or_else(|| self.kind.zero_value());
        let mut descriptor = PropertyDescriptor {
            id: PropertyId(0),
            owner: self.owner,
            name: self.name,
            kind: self.kind,
            default,
            validator: self.validator,
            attached: self.attached,
            inherits: self.inherits,
            read_only: self.read_only,
        };
        descriptor
            .validate(&descriptor.default)
            .map_err(|e| PropertyError::InvalidDefault {
                name: descriptor.name.clone(),
                reason: e.to_string(),
            })?;

        let mut registry = registry().write();
        let key = (descriptor.owner, descriptor.name.clone());
        if registry.by_key.contains_key(&key) {
            return Err(PropertyError::DuplicateRegistration {
                owner: descriptor.owner.name().to_string(),
                name: descriptor.name,
            });
        }
        let id = PropertyId(registry.descriptors.len() as u32);
        descriptor.id = id;
        tracing::trace!(
            target: targets::PROPERTY,
            id = id.0,
            owner = descriptor.owner.name(),
            name = %descriptor.name,
            kind = %descriptor.kind,
            "registered property"
        );
        registry.descriptors.push(Arc::new(descriptor));
        registry.by_key.insert(key, id);
        Ok(id)
    }
}

struct PropertyRegistry {
    descriptors: Vec<Arc<PropertyDescriptor>>,
    by_key: HashMap<(TypeKind, String), PropertyId>,
}

fn registry() -> &'static RwLock<PropertyRegistry> {
    static REGISTRY: OnceLock<RwLock<PropertyRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        RwLock::new(PropertyRegistry {
            descriptors: Vec::new(),
            by_key: HashMap::new(),
        })
    })
}

impl PropertyId {
    /// Raw id.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Descriptor this id was issued for.
    pub fn descriptor(self) -> Result<Arc<PropertyDescriptor>, PropertyError> {
        registry()
            .read()
            .descriptors
            .get(self.0 as usize)
            .cloned()
            .ok_or(PropertyError::UnknownId(self.0))
    }

    /// Property name, or `"<unknown>"`.
    pub fn name(self) -> String {
        self.descriptor()
            .map_or_else(|_| "<unknown>".to_string(), |d| d.name.clone())
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.descriptor() {
            Ok(d) => write!(f, "{}.{}", d.owner.name(), d.name),
            Err(_) => write!(f, "<property {}>", self.0),
        }
    }
}

/// `DependencyObject.Name`: the identifier an object is registered under in
/// its name scope.
pub fn name_property() -> PropertyId {
    static NAME: OnceLock<PropertyId> = OnceLock::new();
    *NAME.get_or_init(|| {
        PropertyDescriptor::builder(TypeKind::DEPENDENCY_OBJECT, "Name", ValueKind::String)
            .validator(validate_name)
            .register()
            .unwrap_or_else(|e| panic!("failed to register built-in Name property: {e}"))
    })
}

fn validate_name(value: &Value) -> Result<(), String> {
    let Value::String(name) = value else {
        return Ok(());
    };
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        Some(c) => return Err(format!("name may not start with '{c}'")),
        None => return Err("name may not be empty".into()),
    }
    if let Some(c) = chars.find(|c| !(c.is_alphanumeric() || *c == '_')) {
        return Err(format!("name may not contain '{c}'"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_type(name: &'static str) -> TypeKind {
        TypeKind::register(name, Some(TypeKind::DEPENDENCY_OBJECT)).unwrap()
    }

    #[test]
    fn test_register_and_describe() {
        let owner = test_type("PropTestRect");
        let id = PropertyDescriptor::register(owner, "Width", ValueKind::Double, 10.0).unwrap();
        let d = id.descriptor().unwrap();

        assert_eq!(d.id(), id);
        assert_eq!(d.name(), "Width");
        assert_eq!(d.owner(), owner);
        assert_eq!(d.kind(), ValueKind::Double);
        assert_eq!(d.default_value(), &Value::Double(10.0));
        assert_eq!(id.to_string(), "PropTestRect.Width");
    }

    #[test]
    fn test_duplicate_registration_is_error() {
        let owner = test_type("PropTestDup");
        PropertyDescriptor::builder(owner, "Fill", ValueKind::Int32).register().unwrap();
        let err = PropertyDescriptor::builder(owner, "Fill", ValueKind::Int32)
            .register()
            .unwrap_err();
        assert!(matches!(err, PropertyError::DuplicateRegistration { .. }));
    }

    #[test]
    fn test_default_must_match_kind() {
        let owner = test_type("PropTestBadDefault");
        let err = PropertyDescriptor::register(owner, "Count", ValueKind::Int32, "three").unwrap_err();
        assert!(matches!(err, PropertyError::InvalidDefault { .. }));
        assert!(PropertyDescriptor::find(owner, "Count").is_none());
    }

    #[test]
    fn test_zero_default_when_unspecified() {
        let owner = test_type("PropTestZero");
        let id = PropertyDescriptor::builder(owner, "Visible", ValueKind::Bool)
            .register()
            .unwrap();
        assert_eq!(id.descriptor().unwrap().default_value(), &Value::Bool(false));
    }

    #[test]
    fn test_validator_runs_after_kind_check() {
        let owner = test_type("PropTestValidated");
        let id = PropertyDescriptor::builder(owner, "Thickness", ValueKind::Double)
            .default(1.0)
            .validator(|v| {
                if v.as_f64().is_ok_and(|t| t >= 0.0) {
                    Ok(())
                } else {
                    Err("negative".into())
                }
            })
            .register()
            .unwrap();
        let d = id.descriptor().unwrap();

        assert!(d.validate(&Value::Double(2.0)).is_ok());
        assert!(matches!(
            d.validate(&Value::Double(-1.0)),
            Err(PropertyError::ValidationFailed { .. })
        ));
        assert!(matches!(
            d.validate(&Value::Int32(2)),
            Err(PropertyError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_find_walks_ancestry() {
        let base = test_type("PropTestBase");
        let derived = TypeKind::register("PropTestDerived", Some(base)).unwrap();
        let id = PropertyDescriptor::register(base, "Tag", ValueKind::Int32, 0).unwrap();

        assert_eq!(PropertyDescriptor::find(derived, "Tag"), Some(id));
        assert_eq!(PropertyDescriptor::find_exact(derived, "Tag"), None);
        assert_eq!(PropertyDescriptor::find(base, "Missing"), None);
        assert!(PropertyDescriptor::all_for(derived).contains(&id));
    }

    #[test]
    fn test_applicability() {
        let base = test_type("PropTestAppBase");
        let other = test_type("PropTestAppOther");
        let own = PropertyDescriptor::register(base, "Own", ValueKind::Int32, 0).unwrap();
        let attached = PropertyDescriptor::builder(base, "Row", ValueKind::Int32)
            .attached()
            .register()
            .unwrap();

        assert!(own.descriptor().unwrap().is_applicable_to(base));
        assert!(!own.descriptor().unwrap().is_applicable_to(other));
        assert!(attached.descriptor().unwrap().is_applicable_to(other));
    }

    #[test]
    fn test_content_property_is_inherited_by_subtypes() {
        let panel = test_type("PropTestPanel");
        let stack = TypeKind::register("PropTestStack", Some(panel)).unwrap();
        let children = PropertyDescriptor::register(
            panel,
            "Children",
            ValueKind::Object(TypeKind::COLLECTION),
            Value::Null,
        )
        .unwrap();
        panel.set_content_property(Some(children));
        assert_eq!(stack.content_property(), Some(children));
    }

    #[test]
    fn test_name_validator() {
        let d = name_property().descriptor().unwrap();
        assert!(d.validate(&Value::from("okButton_1")).is_ok());
        assert!(d.validate(&Value::Null).is_ok());
        assert!(d.validate(&Value::from("")).is_err());
        assert!(d.validate(&Value::from("1st")).is_err());
        assert!(d.validate(&Value::from("has space")).is_err());
    }
}
