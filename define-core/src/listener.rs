//! Listeners and their per-tick change batches.
//!
//! The first change recorded for a listener in a tick arms exactly one
//! flush on its scheduler. Later changes in the same tick only update the
//! batch: writing a field again overwrites its pending value in place, so
//! fields keep the order in which they were first touched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use indexmap::IndexMap;

use crate::commit::{self, CompactCommit, PrettyCommit};
use crate::{lock, DefineResult, Identity, Scheduler, SharedObject, Value};

static NEXT_LISTENER: AtomicU64 = AtomicU64::new(1);

/// Process-unique listener id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    fn next() -> Self {
        Self(NEXT_LISTENER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pending field writes for one object.
pub(crate) struct ChangedObject {
    pub(crate) object: SharedObject,
    pub(crate) fields: IndexMap<usize, Value>,
}

/// Accumulated changes for one listener within a tick.
#[derive(Default)]
pub struct UpdateBatch {
    /// Newly observed objects; the flag marks re-creates of objects the
    /// consumer already holds.
    pub(crate) created: IndexMap<Identity, (SharedObject, bool)>,
    pub(crate) deleted: IndexMap<Identity, SharedObject>,
    pub(crate) changed: IndexMap<Identity, ChangedObject>,
    scheduled: bool,
}

impl UpdateBatch {
    /// Whether nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.deleted.is_empty() && self.changed.is_empty()
    }

    /// Whether a flush is armed.
    #[must_use]
    pub const fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    /// Number of objects with pending field writes.
    #[must_use]
    pub fn changed_objects(&self) -> usize {
        self.changed.len()
    }

    /// Pending value of a field, if it was written this tick.
    #[must_use]
    pub fn pending_value(&self, object: Identity, index: usize) -> Option<&Value> {
        self.changed.get(&object).and_then(|c| c.fields.get(&index))
    }

    /// Arm the flush; returns `true` if it was not armed yet.
    fn arm(&mut self) -> bool {
        !std::mem::replace(&mut self.scheduled, true)
    }
}

type CommitCallback = dyn Fn(&CompactCommit, &PrettyCommit) + Send + Sync;

/// Consumer of batched commits. Clones share the same batch.
#[derive(Clone)]
pub struct Listener(Arc<ListenerInner>);

struct ListenerInner {
    id: ListenerId,
    scheduler: Arc<dyn Scheduler>,
    batch: Mutex<UpdateBatch>,
    callback: Box<CommitCallback>,
}

impl Listener {
    /// Create a listener flushing on `scheduler` into `callback`.
    pub fn new(
        scheduler: Arc<dyn Scheduler>,
        callback: impl Fn(&CompactCommit, &PrettyCommit) + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(ListenerInner {
            id: ListenerId::next(),
            scheduler,
            batch: Mutex::new(UpdateBatch::default()),
            callback: Box::new(callback),
        }))
    }

    /// This listener's id.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.0.id
    }

    /// Whether a flush is armed for the current tick.
    #[must_use]
    pub fn is_scheduled(&self) -> bool {
        lock(&self.0.batch).is_scheduled()
    }

    /// Inspect the pending batch.
    pub fn with_batch<R>(&self, f: impl FnOnce(&UpdateBatch) -> R) -> R {
        f(&lock(&self.0.batch))
    }

    /// Record a field write on an observed object.
    pub(crate) fn record_change(&self, object: &SharedObject, index: usize, value: Value) {
        let Some(id) = object.identity() else {
            return;
        };
        tracing::trace!(listener = %self.0.id, object = %id, index, "record change");
        let arm = {
            let mut batch = lock(&self.0.batch);
            batch
                .changed
                .entry(id)
                .or_insert_with(|| ChangedObject {
                    object: object.clone(),
                    fields: IndexMap::new(),
                })
                .fields
                .insert(index, value);
            batch.arm()
        };
        if arm {
            self.schedule_flush();
        }
    }

    /// Record that `object` became observed by this listener.
    ///
    /// Re-observing an object deleted earlier in the tick cancels the delete
    /// and sends its full current state as a create.
    pub(crate) fn record_created(&self, object: &SharedObject) {
        let Some(id) = object.identity() else {
            return;
        };
        let arm = {
            let mut batch = lock(&self.0.batch);
            let known = batch.deleted.shift_remove(&id).is_some();
            batch.created.insert(id, (object.clone(), known));
            batch.arm()
        };
        if arm {
            self.schedule_flush();
        }
    }

    /// Record that `object` is no longer observed by this listener.
    ///
    /// Pending writes to it are dropped. Deleting an object first created in
    /// the same tick cancels out.
    pub(crate) fn record_deleted(&self, object: &SharedObject) {
        let Some(id) = object.identity() else {
            return;
        };
        let arm = {
            let mut batch = lock(&self.0.batch);
            batch.changed.shift_remove(&id);
            if !matches!(batch.created.shift_remove(&id), Some((_, false))) {
                batch.deleted.insert(id, object.clone());
            }
            batch.arm()
        };
        if arm {
            self.schedule_flush();
        }
    }

    fn schedule_flush(&self) {
        let listener = self.clone();
        self.0
            .scheduler
            .schedule(Box::new(move || listener.flush().map(|_| ())));
    }

    /// Encode the pending batch and hand it to the callback.
    ///
    /// The batch is taken (and the armed flag cleared) before encoding, so
    /// writes made by the callback land in the next tick. Returns `false`
    /// when there was nothing to deliver.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::UnknownReference`](crate::DefineError::UnknownReference)
    /// when a written value references an object without an identity. The
    /// batch is discarded in that case.
    pub fn flush(&self) -> DefineResult<bool> {
        let batch = std::mem::take(&mut *lock(&self.0.batch));
        if batch.is_empty() {
            tracing::trace!(listener = %self.0.id, "nothing to flush");
            return Ok(false);
        }
        let (compact, pretty) = commit::encode(&batch)?;
        tracing::debug!(
            listener = %self.0.id,
            created = compact.create.len(),
            destroyed = compact.destroy.len(),
            changed = compact.set.len(),
            "flushing commit"
        );
        (self.0.callback)(&compact, &pretty);
        Ok(true)
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.0.id)
            .field("scheduled", &self.is_scheduled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{observe, IdentityAllocator, ManualScheduler, PlainFactory};
    use serde_json::json;

    fn point() -> (Arc<ManualScheduler>, Listener, SharedObject) {
        let allocator = Arc::new(IdentityAllocator::new());
        let f = PlainFactory::build("app.Point", &json!({"x": 0, "y": 0}), &allocator)
            .expect("build");
        let p = f.construct([("x", 0), ("y", 0)]).expect("point");
        let scheduler = Arc::new(ManualScheduler::new());
        let listener = Listener::new(scheduler.clone(), |_, _| {});
        observe::attach(&p, &[listener.clone()]);
        (scheduler, listener, p)
    }

    #[test]
    fn test_single_flush_armed_per_tick() {
        let (scheduler, listener, p) = point();
        p.set("x", 1).expect("set");
        p.set("y", 2).expect("set");
        p.set("x", 3).expect("set");
        assert!(listener.is_scheduled());
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_last_write_wins_within_tick() {
        let (_scheduler, listener, p) = point();
        let id = p.identity().expect("observed");
        for v in [1, 2, 3] {
            p.set("x", v).expect("set");
        }
        listener.with_batch(|batch| {
            assert_eq!(batch.changed_objects(), 1);
            assert_eq!(batch.pending_value(id, 0).and_then(Value::as_i64), Some(3));
        });
    }

    #[test]
    fn test_flush_clears_batch() {
        let (scheduler, listener, p) = point();
        p.set("x", 1).expect("set");
        assert_eq!(scheduler.run_tick().expect("tick"), 1);
        assert!(!listener.is_scheduled());
        listener.with_batch(|batch| assert!(batch.is_empty()));
        assert!(!listener.flush().expect("empty flush"));
    }

    #[test]
    fn test_unobserved_object_records_nothing() {
        let allocator = Arc::new(IdentityAllocator::new());
        let f = PlainFactory::build("app.Point", &json!({"x": 0}), &allocator).expect("build");
        let p = f.construct([("x", 0)]).expect("point");
        let scheduler = Arc::new(ManualScheduler::new());
        let listener = Listener::new(scheduler.clone(), |_, _| {});
        p.set("x", 5).expect("set");
        assert_eq!(scheduler.pending(), 0);
        assert!(!listener.is_scheduled());
    }
}
