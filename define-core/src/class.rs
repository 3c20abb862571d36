//! Typed schema classes.
//!
//! A [`SchemaClass`] is a Rust type whose fields live in a [`SharedObject`];
//! its getters and setters delegate to the compiled accessors, so every
//! write is tracked like any other shared-object write.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::schema::{Schema, SchemaDescription};
use crate::{DefineResult, PlainFactory, SharedObject, Value};

/// A typed view over a schema-bound shared object.
pub trait SchemaClass: Sized {
    /// The schema attached to this class.
    fn describe() -> SchemaDescription;

    /// Wrap a freshly constructed instance.
    fn wrap(object: SharedObject) -> Self;

    /// The underlying shared object.
    fn object(&self) -> &SharedObject;
}

/// Constructor for a registered schema class.
pub struct ClassHandle<T> {
    factory: PlainFactory,
    _class: PhantomData<fn() -> T>,
}

impl<T: SchemaClass> ClassHandle<T> {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        Self {
            factory: PlainFactory::for_schema(schema),
            _class: PhantomData,
        }
    }

    /// The compiled schema, for use as a nested field type.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        self.factory.schema()
    }

    /// Construct an instance from properties.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::InvalidValue`](crate::DefineError::InvalidValue)
    /// if a property does not fit its field.
    pub fn create<I, K, V>(&self, props: I) -> DefineResult<T>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.factory.construct(props).map(T::wrap)
    }

    /// Construct an instance from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::InvalidValue`](crate::DefineError::InvalidValue)
    /// if `props` is not an object or a property does not fit its field.
    pub fn create_json(&self, props: &serde_json::Value) -> DefineResult<T> {
        self.factory.construct_json(props).map(T::wrap)
    }
}

impl<T> Clone for ClassHandle<T> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            _class: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for ClassHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassHandle")
            .field("schema", &self.factory.schema().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DefineError, Registry};
    use serde_json::json;

    struct Counter(SharedObject);

    impl SchemaClass for Counter {
        fn describe() -> SchemaDescription {
            SchemaDescription::new().primitive("count").excluded("cache")
        }

        fn wrap(object: SharedObject) -> Self {
            Self(object)
        }

        fn object(&self) -> &SharedObject {
            &self.0
        }
    }

    impl Counter {
        fn count(&self) -> Option<i64> {
            self.0.get("count").ok().and_then(|v| v.as_i64())
        }

        fn bump(&self) -> DefineResult<()> {
            self.0.set("count", self.count().unwrap_or_default() + 1)
        }
    }

    #[test]
    fn test_create_wraps_instance() {
        let mut registry = Registry::new();
        let counters = registry
            .register_schema_class::<Counter>("app.Counter")
            .expect("register");
        let counter = counters.create([("count", 1)]).expect("create");
        counter.bump().expect("bump");
        assert_eq!(counter.count(), Some(2));
        assert!(counter.object().is_instance_of(counters.schema()));
    }

    #[test]
    fn test_excluded_field_has_no_accessor() {
        let mut registry = Registry::new();
        let counters = registry
            .register_schema_class::<Counter>("app.Counter")
            .expect("register");
        let counter = counters
            .create_json(&json!({"count": 0, "cache": [1, 2]}))
            .expect("create");
        assert_eq!(counters.schema().field_index("cache"), Some(1));
        assert!(matches!(
            counter.object().get("cache"),
            Err(DefineError::UnknownField { .. })
        ));
    }

    #[test]
    fn test_handle_debug_names_schema() {
        let mut registry = Registry::new();
        let counters = registry
            .register_schema_class::<Counter>("app.Counter")
            .expect("register");
        assert!(format!("{:?}", counters.clone()).contains("app.Counter"));
    }
}
