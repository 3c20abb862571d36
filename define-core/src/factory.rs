//! Constructors for schemas that are not attached to a declared class.
//!
//! A [`PlainFactory`] shallow-assigns the given properties onto a fresh
//! instance through its compiled accessors, so nested plain values come out
//! schema-bound.

use std::sync::Arc;

use crate::schema::{compile, FieldType, Schema, SchemaDescription};
use crate::{DefineError, DefineResult, IdentityAllocator, SharedObject, Value};

/// Constructor for one compiled schema.
#[derive(Debug, Clone)]
pub struct PlainFactory {
    schema: Arc<Schema>,
}

impl PlainFactory {
    /// Compile a JSON schema description into a factory.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::InvalidSchema`] if `description` is an array
    /// or not an object.
    pub fn build(
        name: &str,
        description: &serde_json::Value,
        allocator: &Arc<IdentityAllocator>,
    ) -> DefineResult<Self> {
        let description = SchemaDescription::from_json(description)?;
        Ok(Self::for_schema(compile(name, &description, allocator)?))
    }

    /// Wrap an already compiled schema.
    #[must_use]
    pub fn for_schema(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// The schema instances are bound to.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Create an instance and assign `props` through the field setters.
    ///
    /// Keys the schema does not declare, or excludes, are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::InvalidValue`] if a value cannot be coerced
    /// into its field's shape.
    pub fn construct<I, K, V>(&self, props: I) -> DefineResult<SharedObject>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let object = SharedObject::new_record(Arc::clone(&self.schema));
        for (key, value) in props {
            let key = key.as_ref();
            if self.schema.accessor(key).is_err() {
                tracing::trace!(schema = %self.schema.name(), field = key, "skipping undeclared property");
                continue;
            }
            object.set(key, value)?;
        }
        Ok(object)
    }

    /// Create an instance from a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::InvalidValue`] if `props` is not an object or a
    /// property cannot be coerced.
    pub fn construct_json(&self, props: &serde_json::Value) -> DefineResult<SharedObject> {
        let serde_json::Value::Object(map) = props else {
            return Err(DefineError::InvalidValue {
                field: self.schema.name().to_string(),
                reason: format!("expected an object, got {props}"),
            });
        };
        self.construct(map.iter().map(|(k, v)| (k.as_str(), v.clone())))
    }
}

/// Coerce a value written to a field of shape `kind`.
///
/// Plain JSON objects become instances of the nested schema and plain
/// arrays become lists; instances of the right schema pass through.
pub(crate) fn coerce(
    kind: &FieldType,
    label: &str,
    value: Value,
    allocator: &Arc<IdentityAllocator>,
) -> DefineResult<Value> {
    match kind {
        FieldType::Excluded | FieldType::Primitive => Ok(value),
        FieldType::Nested(schema) => coerce_nested(schema, label, value),
        FieldType::List(element) => coerce_list(element.as_ref(), label, value, allocator),
    }
}

fn coerce_nested(schema: &Arc<Schema>, label: &str, value: Value) -> DefineResult<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Object(object) if object.is_instance_of(schema) => Ok(Value::Object(object)),
        Value::Plain(raw @ serde_json::Value::Object(_)) => PlainFactory::for_schema(Arc::clone(schema))
            .construct_json(&raw)
            .map(Value::Object),
        other => Err(mismatch(label, schema.name(), &other)),
    }
}

fn coerce_list(
    element: Option<&Arc<Schema>>,
    label: &str,
    value: Value,
    allocator: &Arc<IdentityAllocator>,
) -> DefineResult<Value> {
    match value {
        Value::Null => Ok(Value::Null),
        Value::Object(object) if object.is_list_of(element) => Ok(Value::Object(object)),
        Value::Plain(serde_json::Value::Array(items)) => {
            let list = SharedObject::new_list(element.cloned(), Arc::clone(allocator));
            for item in items {
                list.push(item)?;
            }
            Ok(Value::Object(list))
        }
        other => Err(mismatch(label, "list", &other)),
    }
}

/// Element shape of a list, as a field type.
pub(crate) fn element_kind(element: Option<&Arc<Schema>>) -> FieldType {
    element.map_or(FieldType::Primitive, |schema| FieldType::Nested(Arc::clone(schema)))
}

fn mismatch(label: &str, expected: &str, got: &Value) -> DefineError {
    let got = match got {
        Value::Object(object) => object.shape_name(),
        Value::Function(function) => format!("function {}", function.name()),
        other => format!("{other:?}"),
    };
    DefineError::InvalidValue {
        field: label.to_string(),
        reason: format!("expected {expected}, got {got}"),
    }
}
