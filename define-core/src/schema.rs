//! Schema descriptions and the compiler that turns them into field accessors.
//!
//! A [`SchemaDescription`] lists fields in declaration order. That order is
//! part of the wire contract: the compact commit form addresses fields by
//! their zero-based position, so reordering keys changes the encoding.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::{DefineError, DefineResult, Identity, IdentityAllocator};

/// Reference to a nested schema inside a description.
#[derive(Debug, Clone)]
pub enum SchemaRef {
    /// An already compiled schema (a registered class or schema).
    Compiled(Arc<Schema>),
    /// An anonymous schema compiled as `<owner>.<field>`.
    Inline(SchemaDescription),
}

/// Declared shape of one field in a description.
#[derive(Debug, Clone)]
pub enum FieldSpec {
    /// Declared but excluded: no accessor is generated.
    Excluded,
    /// String, number, boolean, or an opaque reference.
    Primitive,
    /// A nested shared object.
    Nested(SchemaRef),
    /// A list whose elements are schema-bound (`Some`) or primitive (`None`).
    List(Option<SchemaRef>),
}

/// Ordered field declarations for a schema.
#[derive(Debug, Clone, Default)]
pub struct SchemaDescription {
    fields: Vec<(String, FieldSpec)>,
}

impl SchemaDescription {
    /// Start an empty description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field with an explicit spec.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.push((name.into(), spec));
        self
    }

    /// Append a primitive field.
    #[must_use]
    pub fn primitive(self, name: impl Into<String>) -> Self {
        self.field(name, FieldSpec::Primitive)
    }

    /// Append an excluded field (keeps its index, gets no accessor).
    #[must_use]
    pub fn excluded(self, name: impl Into<String>) -> Self {
        self.field(name, FieldSpec::Excluded)
    }

    /// Append a field holding an instance of `schema`.
    #[must_use]
    pub fn nested(self, name: impl Into<String>, schema: &Arc<Schema>) -> Self {
        self.field(name, FieldSpec::Nested(SchemaRef::Compiled(Arc::clone(schema))))
    }

    /// Append a field holding an instance of an anonymous schema.
    #[must_use]
    pub fn nested_inline(self, name: impl Into<String>, description: Self) -> Self {
        self.field(name, FieldSpec::Nested(SchemaRef::Inline(description)))
    }

    /// Append a list field, optionally schema-bound.
    #[must_use]
    pub fn list(self, name: impl Into<String>, element: Option<&Arc<Schema>>) -> Self {
        let element = element.map(|s| SchemaRef::Compiled(Arc::clone(s)));
        self.field(name, FieldSpec::List(element))
    }

    /// Parse a description from a JSON object.
    ///
    /// `null` excludes a field, scalars declare primitives, objects declare
    /// nested schemas, and arrays declare lists whose element shape comes
    /// from the first entry.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::InvalidSchema`] if `value` is an array or not an object.
    pub fn from_json(value: &serde_json::Value) -> DefineResult<Self> {
        let map = match value {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Array(_) => {
                return Err(DefineError::InvalidSchema(
                    "an array cannot be a top-level schema".to_string(),
                ))
            }
            other => {
                return Err(DefineError::InvalidSchema(format!(
                    "expected an object, got {other}"
                )))
            }
        };

        let mut description = Self::new();
        for (key, shape) in map {
            let spec = match shape {
                serde_json::Value::Null => FieldSpec::Excluded,
                serde_json::Value::Object(_) => {
                    FieldSpec::Nested(SchemaRef::Inline(Self::from_json(shape)?))
                }
                serde_json::Value::Array(items) => match items.first() {
                    Some(first @ serde_json::Value::Object(_)) => {
                        FieldSpec::List(Some(SchemaRef::Inline(Self::from_json(first)?)))
                    }
                    _ => FieldSpec::List(None),
                },
                _ => FieldSpec::Primitive,
            };
            description = description.field(key.clone(), spec);
        }
        Ok(description)
    }

    /// Number of declared fields, excluded ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Compiled behavior of a field.
#[derive(Debug, Clone)]
pub enum FieldType {
    /// No accessor.
    Excluded,
    /// Plain get/set.
    Primitive,
    /// Coercing get/set that re-wires observation.
    Nested(Arc<Schema>),
    /// List get/set that re-wires observation of its elements.
    List(Option<Arc<Schema>>),
}

impl FieldType {
    /// Whether writes to this field re-wire listeners.
    #[must_use]
    pub const fn is_structural(&self) -> bool {
        matches!(self, Self::Nested(_) | Self::List(_))
    }
}

/// One compiled field.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    index: usize,
    kind: FieldType,
}

impl Field {
    /// Declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position in declaration order.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Compiled accessor behavior.
    #[must_use]
    pub const fn kind(&self) -> &FieldType {
        &self.kind
    }
}

/// A compiled schema: the accessor table shared by all its instances.
#[derive(Debug)]
pub struct Schema {
    name: String,
    display_name: String,
    uid: OnceLock<Identity>,
    fields: Vec<Field>,
    by_name: HashMap<String, usize>,
    allocator: Arc<IdentityAllocator>,
}

impl Schema {
    /// Dotted, module-qualified name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last dotted segment of the name.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Definition identity, once an identity table has been loaded.
    #[must_use]
    pub fn uid(&self) -> Option<Identity> {
        self.uid.get().copied()
    }

    /// All fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Field at a position.
    #[must_use]
    pub fn field(&self, index: usize) -> Option<&Field> {
        self.fields.get(index)
    }

    /// Position of a field by name, excluded fields included.
    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Number of declared fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema declares no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up the accessor for `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::UnknownField`] for undeclared or excluded fields.
    pub fn accessor(&self, name: &str) -> DefineResult<&Field> {
        self.field_index(name)
            .and_then(|index| self.fields.get(index))
            .filter(|field| !matches!(field.kind, FieldType::Excluded))
            .ok_or_else(|| DefineError::UnknownField {
                schema: self.name.clone(),
                field: name.to_string(),
            })
    }

    pub(crate) fn allocator(&self) -> &Arc<IdentityAllocator> {
        &self.allocator
    }

    pub(crate) fn bind_uid(&self, id: Identity) {
        if self.uid.set(id).is_err() {
            tracing::trace!(schema = %self.name, "uid already bound");
        }
    }
}

/// Last segment of a dotted name.
pub(crate) fn display_name(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Compile a description into a schema named `name`.
///
/// Inline nested descriptions are compiled recursively as `<name>.<field>`.
///
/// # Errors
///
/// Returns [`DefineError::InvalidSchema`] for empty or duplicate field names.
pub fn compile(
    name: &str,
    description: &SchemaDescription,
    allocator: &Arc<IdentityAllocator>,
) -> DefineResult<Arc<Schema>> {
    let mut fields = Vec::with_capacity(description.fields.len());
    let mut by_name = HashMap::with_capacity(description.fields.len());

    for (index, (field, spec)) in description.fields.iter().enumerate() {
        if field.is_empty() {
            return Err(DefineError::InvalidSchema(format!(
                "{name}: field {index} has an empty name"
            )));
        }
        if by_name.insert(field.clone(), index).is_some() {
            return Err(DefineError::InvalidSchema(format!(
                "{name}: field {field} declared twice"
            )));
        }
        let kind = match spec {
            FieldSpec::Excluded => FieldType::Excluded,
            FieldSpec::Primitive => FieldType::Primitive,
            FieldSpec::Nested(nested) => FieldType::Nested(resolve(name, field, nested, allocator)?),
            FieldSpec::List(element) => FieldType::List(
                element
                    .as_ref()
                    .map(|nested| resolve(name, field, nested, allocator))
                    .transpose()?,
            ),
        };
        fields.push(Field {
            name: field.clone(),
            index,
            kind,
        });
    }

    tracing::trace!(schema = name, fields = fields.len(), "compiled schema");
    Ok(Arc::new(Schema {
        name: name.to_string(),
        display_name: display_name(name).to_string(),
        uid: OnceLock::new(),
        fields,
        by_name,
        allocator: Arc::clone(allocator),
    }))
}

fn resolve(
    owner: &str,
    field: &str,
    nested: &SchemaRef,
    allocator: &Arc<IdentityAllocator>,
) -> DefineResult<Arc<Schema>> {
    match nested {
        SchemaRef::Compiled(schema) => Ok(Arc::clone(schema)),
        SchemaRef::Inline(description) => compile(&format!("{owner}.{field}"), description, allocator),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn allocator() -> Arc<IdentityAllocator> {
        Arc::new(IdentityAllocator::new())
    }

    #[test]
    fn test_field_indices_follow_declaration_order() {
        let desc = SchemaDescription::new().primitive("y").primitive("x");
        let schema = compile("app.Point", &desc, &allocator()).expect("compile");
        assert_eq!(schema.field_index("y"), Some(0));
        assert_eq!(schema.field_index("x"), Some(1));
        assert_eq!(schema.display_name(), "Point");
    }

    #[test]
    fn test_excluded_field_keeps_index_without_accessor() {
        let desc = SchemaDescription::from_json(&json!({"a": 1, "skip": null, "b": "s"}))
            .expect("parse");
        let schema = compile("app.Thing", &desc, &allocator()).expect("compile");
        assert_eq!(schema.field_index("b"), Some(2));
        assert!(matches!(
            schema.accessor("skip"),
            Err(DefineError::UnknownField { .. })
        ));
        assert_eq!(schema.accessor("b").expect("accessor").index(), 2);
    }

    #[test]
    fn test_inline_nested_schemas_are_named_after_owner() {
        let desc = SchemaDescription::from_json(&json!({
            "origin": {"x": 0, "y": 0},
            "points": [{"x": 0}],
            "tags": []
        }))
        .expect("parse");
        let schema = compile("app.Shape", &desc, &allocator()).expect("compile");

        match schema.accessor("origin").expect("origin").kind() {
            FieldType::Nested(nested) => assert_eq!(nested.name(), "app.Shape.origin"),
            other => panic!("expected nested, got {other:?}"),
        }
        match schema.accessor("points").expect("points").kind() {
            FieldType::List(Some(element)) => assert_eq!(element.name(), "app.Shape.points"),
            other => panic!("expected schema-bound list, got {other:?}"),
        }
        assert!(matches!(
            schema.accessor("tags").expect("tags").kind(),
            FieldType::List(None)
        ));
    }

    #[test]
    fn test_array_is_not_a_schema() {
        let err = SchemaDescription::from_json(&json!([1, 2])).expect_err("array rejected");
        assert!(matches!(err, DefineError::InvalidSchema(_)));
        let err = SchemaDescription::from_json(&json!(3)).expect_err("scalar rejected");
        assert!(matches!(err, DefineError::InvalidSchema(_)));
    }

    #[test]
    fn test_duplicate_field_rejected() {
        let desc = SchemaDescription::new().primitive("x").primitive("x");
        let err = compile("app.Bad", &desc, &allocator()).expect_err("duplicate");
        assert!(matches!(err, DefineError::InvalidSchema(_)));
    }
}
