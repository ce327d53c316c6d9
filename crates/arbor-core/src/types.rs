//! Runtime type table.
//!
//! Node types are identified by a small integer [`TypeKind`] issued at
//! registration. Each type records its parent, which is what property
//! applicability, event lookup and object-valued property kinds check
//! against. The table is process-wide and append-only.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::RwLock;

use crate::logging::targets;
use crate::property::PropertyId;

/// Identifier of a registered node type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeKind(u32);

/// Errors from the type table.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypeError {
    /// A type with this name already exists.
    #[error("type '{0}' is already registered")]
    DuplicateType(String),
    /// The parent type id was not issued by this table.
    #[error("unknown parent type id {0}")]
    UnknownParent(u32),
}

struct TypeInfo {
    name: &'static str,
    parent: Option<TypeKind>,
    content_property: Option<PropertyId>,
}

struct TypeRegistry {
    types: Vec<TypeInfo>,
    by_name: HashMap<&'static str, TypeKind>,
}

impl TypeRegistry {
    fn with_builtins() -> Self {
        let mut registry = Self {
            types: Vec::new(),
            by_name: HashMap::new(),
        };
        registry.push("DependencyObject", None);
        registry.push("Collection", Some(TypeKind::DEPENDENCY_OBJECT));
        registry.push("DependencyObjectCollection", Some(TypeKind::COLLECTION));
        registry
    }

    fn push(&mut self, name: &'static str, parent: Option<TypeKind>) -> TypeKind {
        let kind = TypeKind(self.types.len() as u32);
        self.types.push(TypeInfo {
            name,
            parent,
            content_property: None,
        });
        self.by_name.insert(name, kind);
        kind
    }

    fn info(&self, kind: TypeKind) -> Option<&TypeInfo> {
        self.types.get(kind.0 as usize)
    }
}

fn registry() -> &'static RwLock<TypeRegistry> {
    static REGISTRY: OnceLock<RwLock<TypeRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(TypeRegistry::with_builtins()))
}

impl TypeKind {
    /// Root of the hierarchy.
    pub const DEPENDENCY_OBJECT: TypeKind = TypeKind(0);
    /// Abstract ordered container.
    pub const COLLECTION: TypeKind = TypeKind(1);
    /// Container of dependency objects that become logical children.
    pub const DEPENDENCY_OBJECT_COLLECTION: TypeKind = TypeKind(2);

    /// Register a new type deriving from `parent`.
    ///
    /// Every concrete node type should have a parent; `None` creates a new
    /// root, which no built-in property applies to.
    pub fn register(name: &'static str, parent: Option<TypeKind>) -> Result<TypeKind, TypeError> {
        let mut registry = registry().write();
        if registry.by_name.contains_key(name) {
            return Err(TypeError::DuplicateType(name.to_string()));
        }
        if let Some(parent) = parent
            && registry.info(parent).is_none()
        {
            return Err(TypeError::UnknownParent(parent.0));
        }
        let kind = registry.push(name, parent);
        tracing::trace!(target: targets::OBJECT, type_id = kind.0, name, "registered type");
        Ok(kind)
    }

    /// Look a type up by name.
    pub fn find(name: &str) -> Option<TypeKind> {
        registry().read().by_name.get(name).copied()
    }

    /// Raw id.
    #[inline]
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Registered name, or `"<unknown>"`.
    pub fn name(self) -> &'static str {
        registry().read().info(self).map_or("<unknown>", |info| info.name)
    }

    /// Parent type, `None` for roots.
    pub fn parent(self) -> Option<TypeKind> {
        registry().read().info(self).and_then(|info| info.parent)
    }

    /// Whether `self` is `ancestor` or derives from it.
    pub fn is_subclass_of(self, ancestor: TypeKind) -> bool {
        let registry = registry().read();
        let mut current = Some(self);
        while let Some(kind) = current {
            if kind == ancestor {
                return true;
            }
            current = registry.info(kind).and_then(|info| info.parent);
        }
        false
    }

    /// This type followed by its ancestors, nearest first.
    pub fn ancestry(self) -> Vec<TypeKind> {
        let registry = registry().read();
        let mut chain = Vec::new();
        let mut current = Some(self);
        while let Some(kind) = current {
            chain.push(kind);
            current = registry.info(kind).and_then(|info| info.parent);
        }
        chain
    }

    /// The property markup content maps to, inherited from the nearest
    /// ancestor that declares one.
    pub fn content_property(self) -> Option<PropertyId> {
        let registry = registry().read();
        let mut current = Some(self);
        while let Some(kind) = current {
            let info = registry.info(kind)?;
            if info.content_property.is_some() {
                return info.content_property;
            }
            current = info.parent;
        }
        None
    }

    /// Declare the content property of this type.
    pub fn set_content_property(self, property: Option<PropertyId>) {
        if let Some(info) = registry().write().types.get_mut(self.0 as usize) {
            info.content_property = property;
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
