//! Observation graph: reference-counted listener attachment.
//!
//! Attaching a listener to an object increments its count on that object
//! and on every shared value reachable through nested or list fields.
//! Detaching is the exact mirror, and removes entries whose count hits zero.

use indexmap::IndexMap;

use crate::{DefineResult, Listener, ListenerId, SharedObject};

/// Attach `listeners` to `object` and everything reachable from it.
///
/// Assigns `object` (and each reachable value) an identity if it has none.
pub fn attach(object: &SharedObject, listeners: &[Listener]) {
    attach_inner(object, listeners, false);
}

/// Detach `listeners` from `object` and everything reachable from it.
///
/// # Errors
///
/// Returns [`DefineError::UnknownListener`](crate::DefineError::UnknownListener)
/// if a listener has no outstanding attach on a visited object. No count is
/// changed in that case.
pub fn detach(object: &SharedObject, listeners: &[Listener]) -> DefineResult<()> {
    detach_inner(object, listeners, false)
}

/// Attach during a field re-wire, recording newly observed objects as created.
pub(crate) fn attach_tracked(object: &SharedObject, listeners: &[Listener]) {
    attach_inner(object, listeners, true);
}

/// Detach during a field re-wire, recording no-longer-observed objects as deleted.
pub(crate) fn detach_tracked(object: &SharedObject, listeners: &[Listener]) -> DefineResult<()> {
    detach_inner(object, listeners, true)
}

fn attach_inner(object: &SharedObject, listeners: &[Listener], lifecycle: bool) {
    let id = object.ensure_identity();
    for listener in listeners {
        let first = object.increment(listener);
        tracing::trace!(object = %id, listener = %listener.id(), first, "attach");
        if first && lifecycle {
            listener.record_created(object);
        }
    }
    for child in object.children() {
        attach_inner(&child, listeners, lifecycle);
    }
}

fn detach_inner(object: &SharedObject, listeners: &[Listener], lifecycle: bool) -> DefineResult<()> {
    check_detach(object, listeners)?;
    release(object, listeners, lifecycle)
}

/// Fail before any count changes unless every visited object holds enough
/// references for every listener. A listener may appear more than once.
fn check_detach(object: &SharedObject, listeners: &[Listener]) -> DefineResult<()> {
    let mut needed: IndexMap<(*const (), ListenerId), (SharedObject, &Listener, usize)> =
        IndexMap::new();
    let mut stack = vec![object.clone()];
    while let Some(current) = stack.pop() {
        for listener in listeners {
            needed
                .entry((current.addr(), listener.id()))
                .or_insert_with(|| (current.clone(), listener, 0))
                .2 += 1;
        }
        stack.extend(current.children());
    }
    for (target, listener, count) in needed.values() {
        if target.listener_count(listener) < *count {
            return Err(target.unknown_listener(listener));
        }
    }
    Ok(())
}

fn release(object: &SharedObject, listeners: &[Listener], lifecycle: bool) -> DefineResult<()> {
    for listener in listeners {
        let removed = object.decrement(listener)?;
        tracing::trace!(object = ?object.identity(), listener = %listener.id(), removed, "detach");
        if removed && lifecycle {
            listener.record_deleted(object);
        }
    }
    for child in object.children() {
        release(&child, listeners, lifecycle)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{DefineError, IdentityAllocator, ManualScheduler, PlainFactory};
    use serde_json::json;

    fn setup() -> (SharedObject, Listener) {
        let allocator = Arc::new(IdentityAllocator::new());
        let f = PlainFactory::build(
            "app.Doc",
            &json!({"title": "", "meta": {"rev": 0}, "items": [{"n": 0}]}),
            &allocator,
        )
        .expect("build");
        let doc = f
            .construct_json(&json!({
                "title": "t",
                "meta": {"rev": 1},
                "items": [{"n": 1}, {"n": 2}]
            }))
            .expect("doc");
        let listener = Listener::new(Arc::new(ManualScheduler::new()), |_, _| {});
        (doc, listener)
    }

    fn nested(doc: &SharedObject, field: &str) -> SharedObject {
        doc.get(field)
            .expect("field")
            .as_object()
            .cloned()
            .expect("shared value")
    }

    #[test]
    fn test_attach_propagates_and_assigns_identities() {
        let (doc, listener) = setup();
        attach(&doc, &[listener.clone()]);

        let meta = nested(&doc, "meta");
        let items = nested(&doc, "items");
        let first = items.get_index(0).and_then(|v| v.as_object().cloned()).expect("item");

        for object in [&doc, &meta, &items, &first] {
            assert_eq!(object.listener_count(&listener), 1);
            assert!(object.identity().is_some());
        }
    }

    #[test]
    fn test_attach_twice_detach_once_keeps_entry() {
        let (doc, listener) = setup();
        attach(&doc, &[listener.clone()]);
        attach(&doc, &[listener.clone()]);
        assert_eq!(nested(&doc, "meta").listener_count(&listener), 2);

        detach(&doc, &[listener.clone()]).expect("detach");
        assert_eq!(doc.listener_count(&listener), 1);
        assert_eq!(doc.listeners().len(), 1);

        detach(&doc, &[listener.clone()]).expect("detach");
        assert_eq!(doc.listener_count(&listener), 0);
        assert!(doc.listeners().is_empty());
        assert!(nested(&doc, "meta").listeners().is_empty());
    }

    #[test]
    fn test_detach_without_attach_fails() {
        let (doc, listener) = setup();
        let err = detach(&doc, &[listener]).expect_err("not attached");
        assert!(matches!(err, DefineError::UnknownListener { .. }));
    }

    #[test]
    fn test_multiple_listeners_counted_independently() {
        let (doc, a) = setup();
        let b = Listener::new(Arc::new(ManualScheduler::new()), |_, _| {});
        attach(&doc, &[a.clone(), b.clone()]);
        detach(&doc, &[a.clone()]).expect("detach a");
        assert_eq!(doc.listener_count(&a), 0);
        assert_eq!(doc.listener_count(&b), 1);
    }

    #[test]
    fn test_replaced_value_inherits_parent_count() {
        let (doc, listener) = setup();
        attach(&doc, &[listener.clone()]);
        attach(&doc, &[listener.clone()]);
        let old = nested(&doc, "meta");

        doc.set("meta", json!({"rev": 2})).expect("replace");
        assert_eq!(old.listener_count(&listener), 0);
        assert_eq!(nested(&doc, "meta").listener_count(&listener), 2);

        detach(&doc, &[listener.clone()]).expect("first detach");
        detach(&doc, &[listener.clone()]).expect("second detach");
        assert!(nested(&doc, "meta").listeners().is_empty());
    }

    #[test]
    fn test_failed_detach_leaves_counts_untouched() {
        let (doc, a) = setup();
        let b = Listener::new(Arc::new(ManualScheduler::new()), |_, _| {});
        attach(&doc, &[a.clone()]);

        let err = detach(&doc, &[a.clone(), b]).expect_err("b never attached");
        assert!(matches!(err, DefineError::UnknownListener { .. }));
        assert_eq!(doc.listener_count(&a), 1);
        assert_eq!(nested(&doc, "meta").listener_count(&a), 1);
        assert_eq!(nested(&doc, "items").listener_count(&a), 1);
    }

    #[test]
    fn test_failed_detach_on_child_leaves_root_untouched() {
        let (doc, listener) = setup();
        attach(&doc, &[listener.clone()]);
        let meta = nested(&doc, "meta");
        detach(&meta, &[listener.clone()]).expect("detach child directly");

        assert!(detach(&doc, &[listener.clone()]).is_err());
        assert_eq!(doc.listener_count(&listener), 1);
        assert_eq!(meta.listener_count(&listener), 0);
    }
}
