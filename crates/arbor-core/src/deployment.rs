//! Deployments: isolation domains for object graphs.
//!
//! A [`Deployment`] owns one thread, one default [`Surface`] and the table of
//! objects created while it was current. Objects pick up the deployment that
//! is current on the creating thread. Shutting a deployment down drains its
//! pending tick calls and disposes every object still alive, logging each as
//! a leak.
//!
//! # Example
//!
//! ```
//! use arbor_core::{DependencyObject, Deployment, TypeKind};
//!
//! let deployment = Deployment::builder().name("doc").tick_batch_size(16).build();
//! let _guard = deployment.enter();
//!
//! let obj = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
//! assert_eq!(deployment.objects_alive(), 1);
//!
//! obj.unref().unwrap();
//! assert_eq!(deployment.objects_alive(), 0);
//! assert_eq!(deployment.shutdown(), 0);
//! ```

use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use slotmap::{SlotMap, new_key_type};

use crate::dependency_object::{DependencyObject, WeakDependencyObject};
use crate::logging::targets;
use crate::surface::Surface;
use crate::thread_check::{ThreadAffinity, are_thread_checks_enabled};

new_key_type! {
    /// Slot of an object in its deployment's tracking table.
    pub struct ObjectKey;
}

/// Default number of tick calls run per main-loop iteration.
pub const DEFAULT_TICK_BATCH_SIZE: usize = 64;

/// Configuration for a deployment.
#[derive(Debug, Clone)]
pub struct DeploymentConfig {
    /// Name used in logs and as the default surface name.
    pub name: String,
    /// Tick calls run per `process_tick_calls`.
    pub tick_batch_size: usize,
    /// Whether created objects are tracked for leak reporting at shutdown.
    pub track_objects: bool,
    /// Whether thread-bound operations assert the owning thread.
    pub thread_checks: bool,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            name: "arbor-deployment".to_string(),
            tick_batch_size: DEFAULT_TICK_BATCH_SIZE,
            track_objects: true,
            thread_checks: are_thread_checks_enabled(),
        }
    }
}

impl DeploymentConfig {
    /// Create a new configuration with the given name.
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Builder for creating deployments with custom configuration.
#[derive(Debug, Default)]
pub struct DeploymentBuilder {
    config: DeploymentConfig,
}

impl DeploymentBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the deployment name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Set the number of tick calls run per iteration.
    pub fn tick_batch_size(mut self, size: usize) -> Self {
        self.config.tick_batch_size = size;
        self
    }

    /// Enable or disable object tracking.
    pub fn track_objects(mut self, track: bool) -> Self {
        self.config.track_objects = track;
        self
    }

    /// Enable or disable owning-thread assertions.
    pub fn thread_checks(mut self, enabled: bool) -> Self {
        self.config.thread_checks = enabled;
        self
    }

    /// Build the deployment, owned by the calling thread.
    pub fn build(self) -> Deployment {
        Deployment::new(self.config)
    }
}

struct DeploymentInner {
    config: DeploymentConfig,
    affinity: ThreadAffinity,
    surface: Surface,
    objects: Mutex<SlotMap<ObjectKey, WeakDependencyObject>>,
    objects_created: AtomicU64,
    shut_down: AtomicBool,
}

/// An isolation domain for an object graph.
#[derive(Clone)]
pub struct Deployment(Arc<DeploymentInner>);

/// Non-owning reference to a [`Deployment`].
#[derive(Clone, Default)]
pub struct WeakDeployment(Weak<DeploymentInner>);

thread_local! {
    static CURRENT: RefCell<WeakDeployment> = RefCell::new(WeakDeployment::default());
}

impl Deployment {
    /// Create a deployment owned by the calling thread.
    pub fn new(config: DeploymentConfig) -> Self {
        let surface = Surface::with_thread_checks(
            config.name.clone(),
            config.tick_batch_size,
            config.thread_checks,
        );
        tracing::debug!(target: targets::DEPLOYMENT, name = %config.name, "deployment created");
        Self(Arc::new(DeploymentInner {
            config,
            affinity: ThreadAffinity::current(),
            surface,
            objects: Mutex::new(SlotMap::with_key()),
            objects_created: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
        }))
    }

    /// Start building a deployment.
    pub fn builder() -> DeploymentBuilder {
        DeploymentBuilder::new()
    }

    /// The deployment current on this thread.
    pub fn current() -> Option<Deployment> {
        CURRENT.with(|current| current.borrow().upgrade())
    }

    /// Make `deployment` current on this thread, returning the previous one.
    pub fn set_current(deployment: Option<&Deployment>) -> Option<Deployment> {
        let next = deployment.map(Deployment::downgrade).unwrap_or_default();
        CURRENT.with(|current| std::mem::replace(&mut *current.borrow_mut(), next).upgrade())
    }

    /// Make this deployment current until the guard drops.
    pub fn enter(&self) -> DeploymentGuard {
        DeploymentGuard {
            previous: Self::set_current(Some(self)),
        }
    }

    /// Deployment name.
    pub fn name(&self) -> &str {
        &self.0.config.name
    }

    /// Configuration the deployment was built with.
    pub fn config(&self) -> &DeploymentConfig {
        &self.0.config
    }

    /// Owning thread.
    pub fn affinity(&self) -> ThreadAffinity {
        self.0.affinity
    }

    /// Default surface of objects not attached elsewhere.
    pub fn surface(&self) -> &Surface {
        &self.0.surface
    }

    /// Whether [`shutdown`](Self::shutdown) ran.
    pub fn is_shut_down(&self) -> bool {
        self.0.shut_down.load(Ordering::Acquire)
    }

    /// Number of objects created in this deployment.
    pub fn objects_created(&self) -> u64 {
        self.0.objects_created.load(Ordering::Relaxed)
    }

    /// Tracked objects that have not been destroyed.
    pub fn live_objects(&self) -> Vec<DependencyObject> {
        self.0
            .objects
            .lock()
            .values()
            .filter_map(WeakDependencyObject::upgrade)
            .filter(|obj| obj.refcount() > 0)
            .collect()
    }

    /// Number of tracked objects that have not been destroyed.
    pub fn objects_alive(&self) -> usize {
        self.live_objects().len()
    }

    /// Non-owning reference.
    pub fn downgrade(&self) -> WeakDeployment {
        WeakDeployment(Arc::downgrade(&self.0))
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Deployment) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn track(&self, obj: WeakDependencyObject) -> Option<ObjectKey> {
        self.0.objects_created.fetch_add(1, Ordering::Relaxed);
        if !self.0.config.track_objects {
            return None;
        }
        if self.is_shut_down() {
            tracing::warn!(target: targets::DEPLOYMENT, name = %self.name(), "object created after shutdown, not tracked");
            return None;
        }
        Some(self.0.objects.lock().insert(obj))
    }

    pub(crate) fn untrack(&self, key: ObjectKey) {
        self.0.objects.lock().remove(key);
    }

    /// Tear the deployment down: run pending tick calls, stop accepting new
    /// ones and dispose every tracked object still alive.
    ///
    /// Returns the number of leaked objects. Idempotent.
    #[tracing::instrument(skip_all, target = "arbor_core::deployment", level = "trace", fields(name = %self.0.config.name))]
    pub fn shutdown(&self) -> usize {
        if self.0.shut_down.swap(true, Ordering::AcqRel) {
            return 0;
        }
        let drained = self.0.surface.drain_tick_calls();
        self.0.surface.close();

        let leaked = self.live_objects();
        for obj in &leaked {
            tracing::warn!(
                target: targets::DEPLOYMENT,
                id = %obj.id(),
                type_name = obj.type_name(),
                refcount = obj.refcount(),
                "leaked object disposed at shutdown"
            );
        }
        for obj in &leaked {
            obj.dispose();
        }
        self.0.surface.discard_pending();
        self.0.objects.lock().clear();

        tracing::debug!(
            target: targets::DEPLOYMENT,
            drained,
            leaked = leaked.len(),
            "deployment shut down"
        );
        leaked.len()
    }
}

impl WeakDeployment {
    /// Upgrade if the deployment is still alive.
    pub fn upgrade(&self) -> Option<Deployment> {
        self.0.upgrade().map(Deployment)
    }
}

impl fmt::Debug for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deployment")
            .field("name", &self.0.config.name)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for WeakDeployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WeakDeployment")
    }
}

/// Restores the previously current deployment when dropped.
#[must_use = "the deployment stops being current when the guard drops"]
pub struct DeploymentGuard {
    previous: Option<Deployment>,
}

impl Drop for DeploymentGuard {
    fn drop(&mut self) {
        Deployment::set_current(self.previous.as_ref());
    }
}
