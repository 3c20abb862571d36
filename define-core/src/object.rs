//! Shared objects: schema-bound records and lists whose writes are tracked.
//!
//! Every write goes through one path: coerce the incoming value, re-wire
//! listeners from the previous value to the new one, store it, then notify
//! every listener attached to the object.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, OnceLock};

use indexmap::IndexMap;

use crate::factory::{coerce, element_kind};
use crate::listener::{Listener, ListenerId};
use crate::schema::{FieldType, Schema};
use crate::{lock, observe, DefineError, DefineResult, Identity, IdentityAllocator, Value};

/// Shape of a shared object.
#[derive(Debug, Clone)]
pub enum Shape {
    /// Record with one slot per schema field.
    Record(Arc<Schema>),
    /// Growable list.
    List {
        /// Schema elements are bound to, or `None` for primitives.
        element: Option<Arc<Schema>>,
        /// Source of the list's own identity.
        allocator: Arc<IdentityAllocator>,
    },
}

/// Handle to a shared object. Clones share state.
#[derive(Clone)]
pub struct SharedObject(Arc<ObjectInner>);

struct ObjectInner {
    shape: Shape,
    identity: OnceLock<Identity>,
    slots: Mutex<Vec<Value>>,
    listeners: Mutex<IndexMap<ListenerId, (Listener, usize)>>,
}

impl SharedObject {
    pub(crate) fn new_record(schema: Arc<Schema>) -> Self {
        let slots = vec![Value::Null; schema.len()];
        Self::with_shape(Shape::Record(schema), slots)
    }

    /// Create an empty list.
    #[must_use]
    pub fn new_list(element: Option<Arc<Schema>>, allocator: Arc<IdentityAllocator>) -> Self {
        Self::with_shape(Shape::List { element, allocator }, Vec::new())
    }

    fn with_shape(shape: Shape, slots: Vec<Value>) -> Self {
        Self(Arc::new(ObjectInner {
            shape,
            identity: OnceLock::new(),
            slots: Mutex::new(slots),
            listeners: Mutex::new(IndexMap::new()),
        }))
    }

    /// Identity, assigned on first observation.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.0.identity.get().copied()
    }

    pub(crate) fn ensure_identity(&self) -> Identity {
        *self.0.identity.get_or_init(|| self.allocator().allocate())
    }

    fn allocator(&self) -> &Arc<IdentityAllocator> {
        match &self.0.shape {
            Shape::Record(schema) => schema.allocator(),
            Shape::List { allocator, .. } => allocator,
        }
    }

    /// The object's shape.
    #[must_use]
    pub fn shape(&self) -> &Shape {
        &self.0.shape
    }

    /// Record schema; `None` for lists.
    #[must_use]
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        match &self.0.shape {
            Shape::Record(schema) => Some(schema),
            Shape::List { .. } => None,
        }
    }

    /// Whether this is a list.
    #[must_use]
    pub fn is_list(&self) -> bool {
        matches!(self.0.shape, Shape::List { .. })
    }

    /// Identity of the definition this object is an instance of.
    #[must_use]
    pub fn definition_uid(&self) -> Option<Identity> {
        self.schema().and_then(|schema| schema.uid())
    }

    /// Human-readable shape name for diagnostics.
    #[must_use]
    pub fn shape_name(&self) -> String {
        match &self.0.shape {
            Shape::Record(schema) => schema.name().to_string(),
            Shape::List {
                element: Some(schema),
                ..
            } => format!("list of {}", schema.name()),
            Shape::List { element: None, .. } => "list".to_string(),
        }
    }

    /// Whether both handles refer to the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Whether this is a record bound to exactly `schema`.
    #[must_use]
    pub fn is_instance_of(&self, schema: &Arc<Schema>) -> bool {
        self.schema().is_some_and(|own| Arc::ptr_eq(own, schema))
    }

    pub(crate) fn is_list_of(&self, element: Option<&Arc<Schema>>) -> bool {
        match (&self.0.shape, element) {
            (Shape::List { element: None, .. }, None) => true,
            (Shape::List { element: Some(own), .. }, Some(wanted)) => Arc::ptr_eq(own, wanted),
            _ => false,
        }
    }

    /// Read a record field.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::UnknownField`] for undeclared or excluded
    /// fields, and [`DefineError::InvalidValue`] on lists.
    pub fn get(&self, field: &str) -> DefineResult<Value> {
        let schema = self.record_schema(field)?;
        let index = schema.accessor(field)?.index();
        Ok(lock(&self.0.slots)[index].clone())
    }

    /// Write a record field.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::UnknownField`] for undeclared or excluded
    /// fields, [`DefineError::InvalidValue`] if the value does not fit the
    /// field or would create a cycle, and [`DefineError::UnknownListener`]
    /// if listener bookkeeping on the previous value is inconsistent.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> DefineResult<()> {
        let schema = self.record_schema(field)?;
        let accessor = schema.accessor(field)?;
        let value = coerce(accessor.kind(), field, value.into(), schema.allocator())?;
        self.write(accessor.index(), field, accessor.kind().is_structural(), value)
    }

    /// Slot value at a position (record field index or list index).
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<Value> {
        lock(&self.0.slots).get(index).cloned()
    }

    /// Number of slots: declared fields for records, elements for lists.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.0.slots).len()
    }

    /// Whether there are no slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every slot.
    #[must_use]
    pub fn items(&self) -> Vec<Value> {
        lock(&self.0.slots).clone()
    }

    /// Append to a list.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::InvalidValue`] on records or for values that do
    /// not fit the element shape.
    pub fn push(&self, value: impl Into<Value>) -> DefineResult<()> {
        let index = self.len();
        let label = index.to_string();
        let value = self.coerce_element(&label, value.into())?;
        self.rewire(&Value::Null, &value, &label)?;
        lock(&self.0.slots).push(value.clone());
        self.notify(index, value);
        Ok(())
    }

    /// Replace a list element.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::InvalidValue`] on records, for out-of-range
    /// indices, or for values that do not fit the element shape.
    pub fn set_index(&self, index: usize, value: impl Into<Value>) -> DefineResult<()> {
        let label = index.to_string();
        let value = self.coerce_element(&label, value.into())?;
        if index >= self.len() {
            return Err(DefineError::InvalidValue {
                field: label,
                reason: format!("index out of range for list of length {}", self.len()),
            });
        }
        self.write(index, &label, true, value)
    }

    /// Name of a slot: the field name for records, the index for lists.
    #[must_use]
    pub fn field_name(&self, index: usize) -> String {
        match &self.0.shape {
            Shape::Record(schema) => schema
                .field(index)
                .map_or_else(|| index.to_string(), |field| field.name().to_string()),
            Shape::List { .. } => index.to_string(),
        }
    }

    /// Outstanding attach count for `listener`.
    #[must_use]
    pub fn listener_count(&self, listener: &Listener) -> usize {
        lock(&self.0.listeners)
            .get(&listener.id())
            .map_or(0, |(_, count)| *count)
    }

    /// Listeners currently attached, in attach order.
    #[must_use]
    pub fn listeners(&self) -> Vec<Listener> {
        lock(&self.0.listeners)
            .values()
            .map(|(listener, _)| listener.clone())
            .collect()
    }

    /// Increment a listener's count. Returns `true` if it was not attached before.
    pub(crate) fn increment(&self, listener: &Listener) -> bool {
        let mut listeners = lock(&self.0.listeners);
        let entry = listeners
            .entry(listener.id())
            .or_insert_with(|| (listener.clone(), 0));
        entry.1 += 1;
        entry.1 == 1
    }

    /// Decrement a listener's count. Returns `true` if the entry was removed.
    pub(crate) fn decrement(&self, listener: &Listener) -> DefineResult<bool> {
        let mut listeners = lock(&self.0.listeners);
        let Some(entry) = listeners.get_mut(&listener.id()) else {
            return Err(self.unknown_listener(listener));
        };
        entry.1 -= 1;
        if entry.1 == 0 {
            listeners.shift_remove(&listener.id());
            return Ok(true);
        }
        Ok(false)
    }

    pub(crate) fn unknown_listener(&self, listener: &Listener) -> DefineError {
        DefineError::UnknownListener {
            object: self
                .identity()
                .map_or_else(|| "unassigned".to_string(), |id| id.to_string()),
            listener: listener.id().get(),
        }
    }

    /// Address of the shared state, for identity-keyed bookkeeping.
    pub(crate) fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0).cast()
    }

    /// Shared values observation propagates into.
    ///
    /// Records yield the current values of nested and list fields; lists
    /// yield every element that is an object.
    pub(crate) fn children(&self) -> Vec<SharedObject> {
        let slots = lock(&self.0.slots);
        match &self.0.shape {
            Shape::Record(schema) => schema
                .fields()
                .iter()
                .filter(|field| field.kind().is_structural())
                .filter_map(|field| slots[field.index()].as_object().cloned())
                .collect(),
            Shape::List { .. } => slots.iter().filter_map(|v| v.as_object().cloned()).collect(),
        }
    }

    /// Whether `target` is this object or reachable through its children.
    #[must_use]
    pub fn reaches(&self, target: &SharedObject) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(current) = stack.pop() {
            if current.ptr_eq(target) {
                return true;
            }
            if seen.insert(current.addr()) {
                stack.extend(current.children());
            }
        }
        false
    }

    /// Encoded `(index, value)` pairs for every accessible slot.
    pub(crate) fn encoded_state(&self) -> DefineResult<Vec<(usize, serde_json::Value)>> {
        let slots = self.items();
        let mut state = Vec::with_capacity(slots.len());
        for (index, value) in slots.iter().enumerate() {
            if let Some(schema) = self.schema() {
                if matches!(schema.field(index).map(|f| f.kind()), Some(FieldType::Excluded)) {
                    continue;
                }
            }
            state.push((index, value.encode()?));
        }
        Ok(state)
    }

    fn record_schema(&self, field: &str) -> DefineResult<&Arc<Schema>> {
        self.schema().ok_or_else(|| DefineError::InvalidValue {
            field: field.to_string(),
            reason: "lists are addressed by index".to_string(),
        })
    }

    fn coerce_element(&self, label: &str, value: Value) -> DefineResult<Value> {
        let Shape::List { element, allocator } = &self.0.shape else {
            return Err(DefineError::InvalidValue {
                field: label.to_string(),
                reason: format!("{} is not a list", self.shape_name()),
            });
        };
        coerce(&element_kind(element.as_ref()), label, value, allocator)
    }

    fn write(&self, index: usize, label: &str, structural: bool, value: Value) -> DefineResult<()> {
        let previous = lock(&self.0.slots)[index].clone();
        if structural {
            self.rewire(&previous, &value, label)?;
        }
        lock(&self.0.slots)[index] = value.clone();
        self.notify(index, value);
        Ok(())
    }

    /// Move this object's listeners from `previous` to `next`.
    ///
    /// Runs before the slot is overwritten so no live value is left
    /// unobserved.
    fn rewire(&self, previous: &Value, next: &Value, label: &str) -> DefineResult<()> {
        if let Value::Object(child) = next {
            if child.reaches(self) {
                return Err(DefineError::InvalidValue {
                    field: label.to_string(),
                    reason: "assignment would create a cycle".to_string(),
                });
            }
        }
        if let (Value::Object(old), Value::Object(new)) = (previous, next) {
            if old.ptr_eq(new) {
                return Ok(());
            }
        }
        // A child carries one reference per outstanding attach of its parent.
        let references: Vec<Listener> = lock(&self.0.listeners)
            .values()
            .flat_map(|(listener, count)| std::iter::repeat(listener.clone()).take(*count))
            .collect();
        if references.is_empty() {
            return Ok(());
        }
        if let Value::Object(old) = previous {
            observe::detach_tracked(old, &references)?;
        }
        if let Value::Object(new) = next {
            observe::attach_tracked(new, &references);
        }
        Ok(())
    }

    fn notify(&self, index: usize, value: Value) {
        for listener in self.listeners() {
            listener.record_change(self, index, value.clone());
        }
    }
}

impl std::fmt::Debug for SharedObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedObject")
            .field("shape", &self.shape_name())
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}
