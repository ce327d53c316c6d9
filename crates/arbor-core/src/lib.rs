//! Core object model for Arbor.
//!
//! Every element of a retained-mode scene is a node in a property graph.
//! Node types carry no typed fields; they read and write values through
//! dependency properties registered once per type, and the core handles
//! storage, precedence and change notification:
//!
//! - **Values**: [`Value`], a closed tagged variant for property payloads
//! - **Types and properties**: [`TypeKind`] and [`PropertyDescriptor`]
//!   registries keyed by small integer ids
//! - **Lifecycle**: explicit reference counting, typed events, tick calls and
//!   the toggle-notifier hook on every object ([`EventObject`])
//! - **Property system**: local values, precedence providers, listeners,
//!   parent linkage and freezing ([`DependencyObject`])
//! - **Collections**: ordered children with structural events ([`Collection`])
//! - **Names**: per-subtree namespaces ([`NameScope`])
//! - **Deployments**: the isolation domain owning a thread, a default
//!   [`Surface`] and the live-object table ([`Deployment`])
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use arbor_core::{
//!     Collection, Deployment, DeploymentConfig, DependencyObject, EventArgs, EventId,
//!     PropertyDescriptor, TypeKind, Value, ValueKind,
//! };
//!
//! let deployment = Deployment::new(DeploymentConfig::with_name("example"));
//! let _guard = deployment.enter();
//!
//! let panel = TypeKind::register("ExamplePanel", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
//! let children = PropertyDescriptor::register(
//!     panel,
//!     "Children",
//!     ValueKind::Object(TypeKind::COLLECTION),
//!     Value::Null,
//! )
//! .unwrap();
//!
//! let root = DependencyObject::new(panel);
//! let items = Collection::new(TypeKind::DEPENDENCY_OBJECT);
//! root.set_value(children, &items).unwrap();
//!
//! items
//!     .as_object()
//!     .add_handler(
//!         EventId::COLLECTION_CHANGED,
//!         Arc::new(|_, args| {
//!             if let EventArgs::CollectionChanged(change) = args {
//!                 println!("{:?} at {:?}", change.action, change.index);
//!             }
//!         }),
//!         None,
//!         None,
//!     )
//!     .unwrap();
//!
//! let child = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
//! items.add(&child).unwrap();
//! assert_eq!(child.parent().as_ref(), Some(items.as_object()));
//!
//! deployment.shutdown();
//! ```

mod class;
mod collection;
mod dependency_object;
mod deployment;
mod error;
mod event;
pub mod logging;
mod namescope;
mod object;
mod property;
mod provider;
mod surface;
pub mod thread_check;
mod tick;
mod toggle;
mod types;
mod value;

pub use class::{DefaultClass, ObjectClass};
pub use collection::{Collection, CollectionError, count_property};
pub use dependency_object::{DependencyObject, PropertyChangedHandler, WeakDependencyObject};
pub use deployment::{
    DEFAULT_TICK_BATCH_SIZE, Deployment, DeploymentBuilder, DeploymentConfig, DeploymentGuard, ObjectKey,
    WeakDeployment,
};
pub use error::{Error, Result};
pub use event::{
    ClosureKey, CollectionChangedAction, CollectionChangedEventArgs, EmitContext, EventArgs, EventError,
    EventHandler, EventId, HandlerDestructor, HandlerToken, PropertyChangedEventArgs,
};
pub use logging::{ObjectTreeDebug, TreeFormatOptions, TreeStyle};
pub use namescope::{NameScope, NameScopeError};
pub use object::{EventObject, ObjectError, ObjectId, ObjectResult, ObjectState, SurfaceLock};
pub use property::{PropertyBuilder, PropertyDescriptor, PropertyError, PropertyId, Validator, name_property};
pub use provider::{
    DefaultValueProvider, InheritedValueProvider, LocalValueProvider, OverrideValueProvider, PropertyPrecedence,
    PropertyValueProvider, Style,
};
pub use surface::{Surface, WeakSurface};
pub use tick::{TickCall, TickCallId, TickQueue};
pub use toggle::ToggleNotifier;
pub use types::{TypeError, TypeKind};
pub use value::{Color, Point, Rect, Size, Value, ValueError, ValueKind};
