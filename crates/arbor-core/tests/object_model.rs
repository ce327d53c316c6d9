//! End-to-end tests of the object model: property storage and precedence,
//! lifecycle, change fan-out, collections, name scopes and tick calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use arbor_core::{
    ClosureKey, Collection, CollectionChangedAction, CollectionChangedEventArgs, DependencyObject, Deployment,
    DeploymentConfig, Error, EventArgs, EventHandler, EventId, NameScope, NameScopeError, ObjectClass, ObjectError,
    PropertyChangedEventArgs, PropertyDescriptor, PropertyError, PropertyId, PropertyPrecedence, Style, TypeKind,
    Value, ValueKind,
};

fn object_kind() -> ValueKind {
    ValueKind::Object(TypeKind::DEPENDENCY_OBJECT)
}

fn collection_kind() -> ValueKind {
    ValueKind::Object(TypeKind::COLLECTION)
}

// ---- properties --------------------------------------------------------

#[test]
fn test_default_and_set_round_trip() {
    let kind = TypeKind::register("ItShape", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let opacity = PropertyDescriptor::register(kind, "Opacity", ValueKind::Double, 1.0).unwrap();
    let label = PropertyDescriptor::register(kind, "Label", ValueKind::String, Value::Null).unwrap();

    let shape = DependencyObject::new(kind);
    assert_eq!(shape.get_value(opacity).unwrap(), Value::Double(1.0));
    assert!(shape.get_value(label).unwrap().is_null());

    shape.set_value(opacity, 0.25).unwrap();
    shape.set_value(label, "hello").unwrap();
    assert_eq!(shape.get_value(opacity).unwrap().as_f64().unwrap(), 0.25);
    assert_eq!(shape.get_value(label).unwrap().as_str().unwrap(), "hello");
    assert!(shape.get_value(label).unwrap().as_f64().is_err());
}

#[test]
fn test_duplicate_registration_rejected() {
    let kind = TypeKind::register("ItDuplicate", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    PropertyDescriptor::register(kind, "Width", ValueKind::Double, 0.0).unwrap();
    assert!(matches!(
        PropertyDescriptor::register(kind, "Width", ValueKind::Double, 0.0),
        Err(PropertyError::DuplicateRegistration { .. })
    ));
}

#[test]
fn test_validator_failure_leaves_prior_value() {
    let kind = TypeKind::register("ItValidated", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let radius = PropertyDescriptor::builder(kind, "Radius", ValueKind::Double)
        .default(1.0)
        .validator(|v| match v.as_f64() {
            Ok(r) if r >= 0.0 => Ok(()),
            _ => Err("radius must be non-negative".into()),
        })
        .register()
        .unwrap();

    let circle = DependencyObject::new(kind);
    circle.set_value(radius, 3.0).unwrap();
    let err = circle.set_value(radius, -1.0).unwrap_err();
    assert!(matches!(err, Error::Property(PropertyError::ValidationFailed { .. })));
    assert_eq!(circle.get_value(radius).unwrap(), Value::Double(3.0));
}

#[test]
fn test_clear_restores_next_precedence() {
    let kind = TypeKind::register("ItPrecedence", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let fill = PropertyDescriptor::register(kind, "Fill", ValueKind::Int32, 0).unwrap();
    let obj = DependencyObject::new(kind);

    obj.apply_style(&Style::new(kind).setter(fill, 7)).unwrap();
    obj.set_value(fill, 9).unwrap();
    assert_eq!(obj.get_value(fill).unwrap(), Value::Int32(9));

    obj.clear_value(fill, true).unwrap();
    assert_eq!(obj.get_value(fill).unwrap(), Value::Int32(7));
    assert_eq!(obj.get_value_from(fill, PropertyPrecedence::LocalValue).unwrap(), None);
}

#[test]
fn test_attached_property_applies_to_any_type() {
    let canvas = TypeKind::register("ItCanvas", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let left = PropertyDescriptor::builder(canvas, "Left", ValueKind::Double)
        .attached()
        .register()
        .unwrap();
    let top = PropertyDescriptor::register(canvas, "Top", ValueKind::Double, 0.0).unwrap();

    let plain = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
    plain.set_value(left, 10.0).unwrap();
    assert_eq!(plain.get_value(left).unwrap(), Value::Double(10.0));
    assert!(matches!(
        plain.set_value(top, 1.0),
        Err(Error::Property(PropertyError::NotApplicable { .. }))
    ));
}

#[test]
fn test_inherited_value_reaches_descendants() {
    let kind = TypeKind::register("ItInherit", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let font = PropertyDescriptor::builder(kind, "FontSize", ValueKind::Double)
        .default(12.0)
        .inherits()
        .register()
        .unwrap();
    let child_prop = PropertyDescriptor::register(kind, "Child", object_kind(), Value::Null).unwrap();

    let root = DependencyObject::new(kind);
    let mid = DependencyObject::new(kind);
    let leaf = DependencyObject::new(kind);
    root.set_value(child_prop, &mid).unwrap();
    mid.set_value(child_prop, &leaf).unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    leaf.add_property_change_handler(font, move |_, args| s.lock().push(args.new_value.clone()))
        .unwrap();

    root.set_value(font, 20.0).unwrap();
    assert_eq!(leaf.get_value(font).unwrap(), Value::Double(20.0));
    assert_eq!(*seen.lock(), vec![Value::Double(20.0)]);

    mid.set_value(font, 16.0).unwrap();
    root.set_value(font, 30.0).unwrap();
    assert_eq!(leaf.get_value(font).unwrap(), Value::Double(16.0));
    assert_eq!(seen.lock().len(), 2);
}

// ---- lifecycle ---------------------------------------------------------

#[test]
fn test_ref_unref_balance_and_single_destroyed() {
    let obj = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
    let destroyed = Arc::new(AtomicUsize::new(0));
    let d = destroyed.clone();
    obj.add_handler(
        EventId::DESTROYED,
        Arc::new(move |_, _| {
            d.fetch_add(1, Ordering::SeqCst);
        }),
        None,
        None,
    )
    .unwrap();

    for _ in 0..5 {
        obj.ref_().unwrap();
    }
    for _ in 0..5 {
        obj.unref().unwrap();
    }
    assert_eq!(destroyed.load(Ordering::SeqCst), 0);
    obj.unref().unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert!(obj.unref().unwrap_err() == ObjectError::Disposed { id: obj.id() });
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_ref_unref() {
    let obj = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
    let threads: Vec<_> = (0..4)
        .map(|_| {
            let obj = obj.clone();
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    obj.ref_().unwrap();
                    obj.unref().unwrap();
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }
    assert_eq!(obj.refcount(), 1);
    assert!(!obj.is_disposed());
}

#[test]
fn test_toggle_notifier_pairs() {
    let obj = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    obj.set_toggle_notifier(Arc::new(move |_: &DependencyObject, last: bool| s.lock().push(last)))
        .unwrap();

    obj.ref_().unwrap();
    obj.unref().unwrap();
    obj.ref_().unwrap();
    obj.unref().unwrap();
    assert_eq!(*seen.lock(), vec![false, true, false, true]);
}

#[test]
fn test_frozen_object_rejects_mutation() {
    let kind = TypeKind::register("ItFrozen", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let size = PropertyDescriptor::register(kind, "Size", ValueKind::Int32, 1).unwrap();
    let brush = DependencyObject::new(kind);
    brush.set_value(size, 4).unwrap();
    brush.freeze().unwrap();

    assert!(brush.set_value(size, 5).unwrap_err().is_frozen());
    assert!(brush.set_animated_value(size, 5).unwrap_err().is_frozen());
    assert_eq!(brush.get_value(size).unwrap(), Value::Int32(4));
    assert!(brush.is_frozen());
}

// ---- listeners and class hooks -----------------------------------------

#[derive(Default)]
struct RecordingClass {
    sub_changes: Mutex<Vec<(Option<PropertyId>, PropertyId)>>,
    collection_changes: Mutex<Vec<CollectionChangedAction>>,
    item_changes: Mutex<Vec<PropertyId>>,
    targets: AtomicUsize,
}

impl ObjectClass for RecordingClass {
    fn on_sub_property_changed(
        &self,
        _obj: &DependencyObject,
        property: Option<PropertyId>,
        _child: &DependencyObject,
        args: &PropertyChangedEventArgs,
    ) {
        self.sub_changes.lock().push((property, args.property));
    }

    fn on_collection_changed(&self, _obj: &DependencyObject, _c: &Collection, args: &CollectionChangedEventArgs) {
        self.collection_changes.lock().push(args.action);
    }

    fn on_collection_item_changed(
        &self,
        _obj: &DependencyObject,
        _c: &Collection,
        _item: &DependencyObject,
        args: &PropertyChangedEventArgs,
    ) {
        self.item_changes.lock().push(args.property);
    }

    fn add_target(&self, _obj: &DependencyObject, _target: &DependencyObject) {
        self.targets.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_target(&self, _obj: &DependencyObject, _target: &DependencyObject) {
        self.targets.fetch_sub(1, Ordering::SeqCst);
    }
}

#[test]
fn test_listener_receives_child_property_tag() {
    let kind = TypeKind::register("ItListener", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let brush_prop = PropertyDescriptor::register(kind, "Brush", object_kind(), Value::Null).unwrap();
    let color = PropertyDescriptor::register(kind, "Tint", ValueKind::Int32, 0).unwrap();

    let class = Arc::new(RecordingClass::default());
    let owner = DependencyObject::with_class(kind, class.clone());
    let brush_class = Arc::new(RecordingClass::default());
    let brush = DependencyObject::with_class(kind, brush_class.clone());

    owner.set_value(brush_prop, &brush).unwrap();
    assert_eq!(brush_class.targets.load(Ordering::SeqCst), 1);

    brush.set_value(color, 3).unwrap();
    assert_eq!(*class.sub_changes.lock(), vec![(Some(brush_prop), color)]);

    brush.set_value_with_notify(color, 4, false).unwrap();
    assert_eq!(class.sub_changes.lock().len(), 1);

    owner.clear_value(brush_prop, true).unwrap();
    brush.set_value(color, 5).unwrap();
    assert_eq!(class.sub_changes.lock().len(), 1);
    assert_eq!(brush_class.targets.load(Ordering::SeqCst), 0);
}

#[test]
fn test_replacing_reference_value_rewires() {
    let kind = TypeKind::register("ItRewire", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let child_prop = PropertyDescriptor::register(kind, "Child", object_kind(), Value::Null).unwrap();
    let owner = DependencyObject::new(kind);
    let first = DependencyObject::new(kind);
    let second = DependencyObject::new(kind);

    owner.set_value(child_prop, &first).unwrap();
    owner.set_value(child_prop, &second).unwrap();
    assert_eq!(first.refcount(), 1);
    assert!(first.parent().is_none());
    assert_eq!(second.refcount(), 2);
    assert_eq!(second.parent(), Some(owner.clone()));

    owner.set_value(child_prop, Value::Null).unwrap();
    assert_eq!(second.refcount(), 1);
}

#[test]
fn test_listeners_fan_out_once_per_tag() {
    let kind = TypeKind::register("ItFanOut", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let color = PropertyDescriptor::register(kind, "Tint", ValueKind::Int32, 0).unwrap();
    let tags: Vec<PropertyId> = ["Fill", "Stroke", "Shadow"]
        .into_iter()
        .map(|name| PropertyDescriptor::register(kind, name, object_kind(), Value::Null).unwrap())
        .collect();

    let class = Arc::new(RecordingClass::default());
    let watcher = DependencyObject::with_class(kind, class.clone());
    let brush = DependencyObject::new(kind);
    for tag in &tags {
        brush.add_property_change_listener(&watcher, Some(*tag)).unwrap();
    }
    assert_eq!(brush.listener_count(), 3);

    brush.set_value(color, 1).unwrap();
    let mut seen = class.sub_changes.lock().clone();
    seen.sort();
    let mut expected: Vec<_> = tags.iter().map(|tag| (Some(*tag), color)).collect();
    expected.sort();
    assert_eq!(seen, expected);

    // Unchanged values do not fan out.
    brush.set_value(color, 1).unwrap();
    assert_eq!(class.sub_changes.lock().len(), 3);

    assert!(brush.remove_property_change_listener(&watcher, Some(tags[0])));
    assert!(!brush.remove_property_change_listener(&watcher, Some(tags[0])));
    class.sub_changes.lock().clear();
    brush.set_value(color, 2).unwrap();
    assert_eq!(class.sub_changes.lock().len(), 2);
    assert!(!class.sub_changes.lock().contains(&(Some(tags[0]), color)));

    for tag in &tags[1..] {
        assert!(brush.remove_property_change_listener(&watcher, Some(*tag)));
    }
    class.sub_changes.lock().clear();
    brush.set_value(color, 3).unwrap();
    assert!(class.sub_changes.lock().is_empty());
    assert_eq!(brush.listener_count(), 0);
}

#[test]
fn test_inherited_value_announced_when_item_joins() {
    let kind = TypeKind::register("ItInheritJoin", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let font = PropertyDescriptor::builder(kind, "FontSize", ValueKind::Double)
        .default(12.0)
        .inherits()
        .register()
        .unwrap();
    let children = PropertyDescriptor::register(kind, "Children", collection_kind(), Value::Null).unwrap();

    let root = DependencyObject::new(kind);
    let items = Collection::new(kind);
    root.set_value(font, 20.0).unwrap();
    root.set_value(children, &items).unwrap();

    let leaf = DependencyObject::new(kind);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = seen.clone();
    leaf.add_property_change_handler(font, move |_, args| {
        s.lock().push((args.old_value.clone(), args.new_value.clone()));
    })
    .unwrap();

    items.add(&leaf).unwrap();
    assert_eq!(leaf.get_value(font).unwrap(), Value::Double(20.0));
    assert_eq!(*seen.lock(), vec![(Value::Double(12.0), Value::Double(20.0))]);

    items.remove(&leaf).unwrap();
    assert_eq!(leaf.get_value(font).unwrap(), Value::Double(12.0));
    assert_eq!(seen.lock().len(), 2);
}

// ---- collections -------------------------------------------------------

#[test]
fn test_collection_events_forwarded_to_owner() {
    let kind = TypeKind::register("ItPanel", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let children = PropertyDescriptor::register(kind, "Children", collection_kind(), Value::Null).unwrap();
    let tag = PropertyDescriptor::register(kind, "Tag", ValueKind::Int32, 0).unwrap();

    let class = Arc::new(RecordingClass::default());
    let panel = DependencyObject::with_class(kind, class.clone());
    let items = Collection::new(kind);
    panel.set_value(children, &items).unwrap();

    let a = DependencyObject::new(kind);
    let b = DependencyObject::new(kind);
    items.add(&a).unwrap();
    items.add(&b).unwrap();
    a.set_value(tag, 1).unwrap();
    items.remove(&a).unwrap();
    items.clear().unwrap();

    assert_eq!(
        *class.collection_changes.lock(),
        vec![
            CollectionChangedAction::Add,
            CollectionChangedAction::Add,
            CollectionChangedAction::Remove,
            CollectionChangedAction::Clear,
        ]
    );
    assert_eq!(*class.item_changes.lock(), vec![tag]);

    // Detaching the collection stops forwarding.
    panel.clear_value(children, true).unwrap();
    items.add(&a).unwrap();
    assert_eq!(class.collection_changes.lock().len(), 4);
}

#[test]
fn test_back_link_cleared_before_remove_event() {
    let items = Collection::new(TypeKind::DEPENDENCY_OBJECT);
    let item = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
    items.add(&item).unwrap();

    let observed = Arc::new(Mutex::new(None));
    let o = observed.clone();
    items
        .as_object()
        .add_handler(
            EventId::COLLECTION_CHANGED,
            Arc::new(move |_, args| {
                if let EventArgs::CollectionChanged(change) = args
                    && change.action == CollectionChangedAction::Remove
                    && let Some(old) = &change.old_item
                {
                    *o.lock() = Some((old.owner_collection().is_none(), old.refcount()));
                }
            }),
            None,
            None,
        )
        .unwrap();

    items.remove_at(0).unwrap();
    // Unlinked but not yet released while the event runs.
    assert_eq!(*observed.lock(), Some((true, 2)));
    assert_eq!(item.refcount(), 1);
}

#[test]
fn test_item_in_one_collection_at_a_time() {
    let first = Collection::new(TypeKind::DEPENDENCY_OBJECT);
    let second = Collection::new(TypeKind::DEPENDENCY_OBJECT);
    let item = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);

    first.add(&item).unwrap();
    assert!(second.add(&item).is_err());
    first.remove(&item).unwrap();
    second.add(&item).unwrap();
    assert_eq!(item.owner_collection(), Some(second));
}

// ---- dispatch ----------------------------------------------------------

#[test]
fn test_reentrant_only_unemitted_runs_each_handler_once() {
    let sender = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
    let event = EventId::register(TypeKind::DEPENDENCY_OBJECT, "ItReentrant").unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let l = log.clone();
    let reentered = Arc::new(AtomicUsize::new(0));
    let r = reentered.clone();
    sender
        .add_handler(
            event,
            Arc::new(move |obj, _| {
                l.lock().push("a");
                if r.fetch_add(1, Ordering::SeqCst) == 0 {
                    obj.emit(event, EventArgs::Empty, true).unwrap();
                }
            }),
            None,
            None,
        )
        .unwrap();
    let l = log.clone();
    sender
        .add_handler(event, Arc::new(move |_, _| l.lock().push("b")), None, None)
        .unwrap();

    sender.emit(event, EventArgs::Empty, true).unwrap();
    assert_eq!(*log.lock(), vec!["a", "b"]);

    log.lock().clear();
    reentered.store(0, Ordering::SeqCst);
    sender.emit(event, EventArgs::Empty, true).unwrap();
    assert_eq!(*log.lock(), vec!["a", "b"]);
}

#[test]
fn test_handler_added_during_dispatch_waits() {
    let sender = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
    let event = EventId::register(TypeKind::DEPENDENCY_OBJECT, "ItLateJoin").unwrap();
    let late_calls = Arc::new(AtomicUsize::new(0));

    let late = late_calls.clone();
    sender
        .add_handler_once(
            event,
            Arc::new(move |obj, _| {
                let late = late.clone();
                obj.add_handler(
                    event,
                    Arc::new(move |_, _| {
                        late.fetch_add(1, Ordering::SeqCst);
                    }),
                    None,
                    None,
                )
                .unwrap();
            }),
            None,
        )
        .unwrap();

    sender.emit(event, EventArgs::Empty, false).unwrap();
    assert_eq!(late_calls.load(Ordering::SeqCst), 0);
    sender.emit(event, EventArgs::Empty, false).unwrap();
    assert_eq!(late_calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_handler_removes_other_during_dispatch() {
    let sender = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
    let event = EventId::register(TypeKind::DEPENDENCY_OBJECT, "ItRemoveOther").unwrap();
    let closure = ClosureKey::new(99);
    let second_calls = Arc::new(AtomicUsize::new(0));

    sender
        .add_handler(
            event,
            Arc::new(move |obj, _| {
                obj.remove_all_handlers(closure);
            }),
            None,
            None,
        )
        .unwrap();
    let s = second_calls.clone();
    let second: EventHandler = Arc::new(move |_, _| {
        s.fetch_add(1, Ordering::SeqCst);
    });
    sender.add_handler(event, second, Some(closure), None).unwrap();

    sender.emit(event, EventArgs::Empty, false).unwrap();
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    assert_eq!(sender.handler_count(event), 1);
}

#[test]
fn test_handler_by_name() {
    let items = Collection::new(TypeKind::DEPENDENCY_OBJECT);
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    items
        .as_object()
        .add_handler_by_name(
            "CollectionChanged",
            Arc::new(move |_, _| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
            None,
        )
        .unwrap();
    items.add(&DependencyObject::new(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let plain = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
    assert!(plain.add_handler_by_name("CollectionChanged", Arc::new(|_, _| {}), None).is_err());
}

// ---- names -------------------------------------------------------------

#[test]
fn test_names_register_when_subtree_attaches() {
    let kind = TypeKind::register("ItNamed", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let child_prop = PropertyDescriptor::register(kind, "Child", object_kind(), Value::Null).unwrap();

    let root = DependencyObject::new(kind);
    let scope = NameScope::new();
    root.set_name_scope(Some(scope.clone())).unwrap();

    let child = DependencyObject::new(kind);
    let grandchild = DependencyObject::new(kind);
    grandchild.set_name("leaf").unwrap();
    child.set_value(child_prop, &grandchild).unwrap();
    root.set_value(child_prop, &child).unwrap();

    assert_eq!(root.find_name("leaf"), Some(grandchild.clone()));
    assert_eq!(grandchild.find_name("leaf"), Some(grandchild.clone()));

    child.set_name("middle").unwrap();
    assert_eq!(scope.find_name("middle"), Some(child.clone()));

    root.clear_value(child_prop, true).unwrap();
    assert_eq!(root.find_name("leaf"), None);
    assert_eq!(root.find_name("middle"), None);
}

#[test]
fn test_duplicate_name_rejected_on_attach() {
    let kind = TypeKind::register("ItDupName", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let left = PropertyDescriptor::register(kind, "Left", object_kind(), Value::Null).unwrap();
    let right = PropertyDescriptor::register(kind, "Right", object_kind(), Value::Null).unwrap();

    let root = DependencyObject::new(kind);
    root.set_name_scope(Some(NameScope::new())).unwrap();
    let a = DependencyObject::new(kind);
    let b = DependencyObject::new(kind);
    a.set_name("twin").unwrap();
    b.set_name("twin").unwrap();

    root.set_value(left, &a).unwrap();
    let err = root.set_value(right, &b).unwrap_err();
    assert_eq!(
        err,
        Error::NameScope(NameScopeError::DuplicateName { name: "twin".into() })
    );
    assert_eq!(root.read_local_value(right).unwrap(), None);
    assert_eq!(b.refcount(), 1);

    assert!(a.set_name("other").is_ok());
    assert!(b.set_name("bad name").is_err());
}

#[test]
fn test_nested_scopes() {
    let kind = TypeKind::register("ItNested", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let child_prop = PropertyDescriptor::register(kind, "Child", object_kind(), Value::Null).unwrap();

    let root = DependencyObject::new(kind);
    root.set_name_scope(Some(NameScope::new())).unwrap();
    root.set_name("top").unwrap();

    let template = DependencyObject::new(kind);
    let inner = NameScope::new();
    template.set_name_scope(Some(inner.clone())).unwrap();
    let part = DependencyObject::new(kind);
    part.set_name("part").unwrap();
    inner.register_name("part", &part).unwrap();

    root.set_value(child_prop, &template).unwrap();
    // The permanent inner scope hides its names from the outer scope but
    // lookups from inside still reach the outer one.
    assert_eq!(root.find_name("part"), None);
    assert_eq!(template.find_name("part"), Some(part));
    assert_eq!(template.find_name("top"), Some(root.clone()));
    assert!(template.find_name_scope().is_some_and(|s| s.ptr_eq(&inner)));
}

#[test]
fn test_temporary_scope_merges_on_attach() {
    let kind = TypeKind::register("ItTemporary", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let child_prop = PropertyDescriptor::register(kind, "Child", object_kind(), Value::Null).unwrap();

    let root = DependencyObject::new(kind);
    let outer = NameScope::new();
    root.set_name_scope(Some(outer.clone())).unwrap();

    let parsed = DependencyObject::new(kind);
    let temp = NameScope::new_temporary();
    parsed.set_name_scope(Some(temp.clone())).unwrap();
    let button = DependencyObject::new(kind);
    temp.register_name("button", &button).unwrap();

    root.set_value(child_prop, &parsed).unwrap();
    assert_eq!(outer.find_name("button"), Some(button));
    assert!(parsed.name_scope().is_none());
    assert!(temp.names().is_empty());
}

// ---- deployment and tick calls ----------------------------------------

#[test]
fn test_tick_call_safe_from_other_thread() {
    let deployment = Deployment::new(DeploymentConfig::with_name("it-ticks"));
    let _guard = deployment.enter();
    let obj = DependencyObject::new(TypeKind::DEPENDENCY_OBJECT);
    let ran_on = Arc::new(Mutex::new(None));

    let remote = obj.clone();
    let r = ran_on.clone();
    std::thread::spawn(move || {
        remote
            .add_tick_call_safe(move |_| *r.lock() = Some(std::thread::current().id()))
            .unwrap();
    })
    .join()
    .unwrap();

    assert!(ran_on.lock().is_none());
    assert_eq!(deployment.surface().process_tick_calls(), 1);
    assert_eq!(*ran_on.lock(), Some(std::thread::current().id()));
    obj.unref().unwrap();
    assert_eq!(deployment.shutdown(), 0);
}

#[test]
fn test_surface_attachment_propagates() {
    let kind = TypeKind::register("ItSurface", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let child_prop = PropertyDescriptor::register(kind, "Child", object_kind(), Value::Null).unwrap();
    let deployment = Deployment::new(DeploymentConfig::with_name("it-surface"));
    let _guard = deployment.enter();

    let root = DependencyObject::new(kind);
    root.set_surface(Some(deployment.surface()));
    let child = DependencyObject::new(kind);
    root.set_value(child_prop, &child).unwrap();
    assert!(child.is_attached());
    assert!(child.surface().is_some_and(|s| s.ptr_eq(deployment.surface())));

    root.clear_value(child_prop, true).unwrap();
    assert!(!child.is_attached());

    assert_eq!(deployment.shutdown(), 2);
    assert!(root.is_disposed() && child.is_disposed());
}

#[test]
fn test_use_after_dispose_reports_error() {
    let kind = TypeKind::register("ItDisposed", Some(TypeKind::DEPENDENCY_OBJECT)).unwrap();
    let width = PropertyDescriptor::register(kind, "Width", ValueKind::Double, 0.0).unwrap();
    let obj = DependencyObject::new(kind);
    obj.unref().unwrap();

    assert!(obj.get_value(width).unwrap_err().is_disposed());
    assert!(obj.set_value(width, 1.0).unwrap_err().is_disposed());
    assert!(obj.add_property_change_listener(&obj, None).is_err());
    assert!(obj.ref_().is_err());
}
