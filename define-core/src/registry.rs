//! Definition registry.
//!
//! Lifecycle:
//!
//! ```text
//! Registry::new()          load phase: register definitions, load identity tables
//!   register / schema / register_schema_class / load_identity_table
//! Registry::freeze()       consistency pass, then object-like definitions are frozen
//! ```
//!
//! Outside hot-reload mode a name can be registered once, and schemas and
//! classes can only be registered during the load phase.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::class::{ClassHandle, SchemaClass};
use crate::schema::{compile, display_name, Schema, SchemaDescription};
use crate::{
    DefineError, DefineResult, FunctionRef, Identity, IdentityAllocator, IdentityTable,
    PlainFactory, RegistryConfig,
};

/// What kind of value a definition holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionKind {
    /// A plain JSON object.
    Object,
    /// A plain JSON array.
    Array,
    /// A function.
    Function,
    /// A typed schema class.
    Class,
    /// A bare schema.
    Schema,
}

impl DefinitionKind {
    /// Whether definitions of this kind are frozen at the end of the load phase.
    #[must_use]
    pub const fn is_freezable(self) -> bool {
        matches!(self, Self::Object | Self::Array | Self::Function)
    }
}

/// A registered value.
#[derive(Debug, Clone)]
pub enum DefinedValue {
    /// A plain JSON object.
    Object(serde_json::Value),
    /// A plain JSON array.
    Array(serde_json::Value),
    /// A function.
    Function(FunctionRef),
    /// A compiled schema class.
    Class(Arc<Schema>),
    /// A compiled bare schema.
    Schema(Arc<Schema>),
}

impl DefinedValue {
    /// Classify a JSON value as an object or array definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::InvalidValue`] for scalars.
    pub fn from_json(value: serde_json::Value) -> DefineResult<Self> {
        match value {
            serde_json::Value::Object(_) => Ok(Self::Object(value)),
            serde_json::Value::Array(_) => Ok(Self::Array(value)),
            other => Err(DefineError::InvalidValue {
                field: "definition".to_string(),
                reason: format!("expected an object or array, got {other}"),
            }),
        }
    }

    /// The value's kind.
    #[must_use]
    pub const fn kind(&self) -> DefinitionKind {
        match self {
            Self::Object(_) => DefinitionKind::Object,
            Self::Array(_) => DefinitionKind::Array,
            Self::Function(_) => DefinitionKind::Function,
            Self::Class(_) => DefinitionKind::Class,
            Self::Schema(_) => DefinitionKind::Schema,
        }
    }

    /// The compiled schema of a class or schema definition.
    #[must_use]
    pub fn as_schema(&self) -> Option<&Arc<Schema>> {
        match self {
            Self::Class(schema) | Self::Schema(schema) => Some(schema),
            _ => None,
        }
    }

    /// The JSON of an object or array definition.
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Object(value) | Self::Array(value) => Some(value),
            _ => None,
        }
    }

    /// The function of a function definition.
    #[must_use]
    pub const fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }

    fn bind_uid(&self, id: Identity) {
        match self {
            Self::Function(function) => function.bind_identity(id),
            Self::Class(schema) | Self::Schema(schema) => schema.bind_uid(id),
            Self::Object(_) | Self::Array(_) => {}
        }
    }
}

impl From<FunctionRef> for DefinedValue {
    fn from(function: FunctionRef) -> Self {
        Self::Function(function)
    }
}

/// A named, registered value.
#[derive(Debug, Clone)]
pub struct Definition {
    name: String,
    display_name: String,
    value: DefinedValue,
    uid: Option<Identity>,
    frozen: bool,
}

impl Definition {
    /// Dotted name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Last dotted segment.
    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Registered value.
    #[must_use]
    pub const fn value(&self) -> &DefinedValue {
        &self.value
    }

    /// The value's kind.
    #[must_use]
    pub const fn kind(&self) -> DefinitionKind {
        self.value.kind()
    }

    /// Identity from the loaded table.
    #[must_use]
    pub const fn uid(&self) -> Option<Identity> {
        self.uid
    }

    /// Whether the value can no longer be replaced.
    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen
    }

    fn bind_uid(&mut self, id: Identity) {
        self.uid = Some(id);
        self.value.bind_uid(id);
    }
}

/// Registry lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Definitions and identity tables are still being loaded.
    Loading,
    /// The consistency pass succeeded.
    Frozen,
}

/// Table of named definitions and the identity space they share with
/// shared-object instances.
#[derive(Debug)]
pub struct Registry {
    config: RegistryConfig,
    phase: Phase,
    definitions: IndexMap<String, Definition>,
    loaded: IndexMap<String, Identity>,
    loaded_ids: HashMap<Identity, String>,
    load_problems: Vec<String>,
    allocator: Arc<IdentityAllocator>,
}

impl Registry {
    /// Create an empty registry in the load phase.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create a registry configured from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::with_config(RegistryConfig::from_env())
    }

    /// Create a registry with explicit configuration.
    #[must_use]
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            config,
            phase: Phase::Loading,
            definitions: IndexMap::new(),
            loaded: IndexMap::new(),
            loaded_ids: HashMap::new(),
            load_problems: Vec::new(),
            allocator: Arc::new(IdentityAllocator::new()),
        }
    }

    /// Shared identity allocator.
    #[must_use]
    pub fn allocator(&self) -> &Arc<IdentityAllocator> {
        &self.allocator
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether re-registration replaces instead of failing.
    #[must_use]
    pub const fn is_hot_reload(&self) -> bool {
        self.config.hot_reload
    }

    /// Toggle hot-reload mode.
    pub fn set_hot_reload(&mut self, hot_reload: bool) {
        self.config.hot_reload = hot_reload;
    }

    /// Register a value under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::DuplicateDefinition`] if `name` is taken and
    /// hot-reload is off.
    pub fn register(
        &mut self,
        name: &str,
        value: impl Into<DefinedValue>,
    ) -> DefineResult<&Definition> {
        self.check_duplicate(name)?;
        Ok(self.insert(name, value.into()))
    }

    /// Register a nested field definition; `path` must begin with `"<owner>."`.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::InvalidFieldPath`] for a bad prefix and
    /// [`DefineError::DuplicateDefinition`] as [`register`](Self::register) does.
    pub fn register_field(
        &mut self,
        owner: &str,
        path: &str,
        value: impl Into<DefinedValue>,
    ) -> DefineResult<&Definition> {
        let valid = path
            .strip_prefix(owner)
            .and_then(|rest| rest.strip_prefix('.'))
            .is_some_and(|field| !field.is_empty());
        if !valid {
            return Err(DefineError::InvalidFieldPath {
                owner: owner.to_string(),
                path: path.to_string(),
            });
        }
        self.register(path, value)
    }

    /// Compile and register a bare schema.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::RuntimeRedefinition`] after the load phase
    /// outside hot-reload, [`DefineError::DuplicateDefinition`] for taken
    /// names, and [`DefineError::InvalidSchema`] for malformed descriptions.
    pub fn schema(&mut self, name: &str, description: &SchemaDescription) -> DefineResult<Arc<Schema>> {
        self.check_redefinition(name)?;
        self.check_duplicate(name)?;
        let schema = compile(name, description, &self.allocator)?;
        self.insert(name, DefinedValue::Schema(Arc::clone(&schema)));
        Ok(schema)
    }

    /// Register a bare schema given as JSON and return its constructor.
    ///
    /// # Errors
    ///
    /// As [`schema`](Self::schema); arrays and scalars are rejected with
    /// [`DefineError::InvalidSchema`].
    pub fn plain(&mut self, name: &str, description: &serde_json::Value) -> DefineResult<PlainFactory> {
        self.check_redefinition(name)?;
        self.check_duplicate(name)?;
        let factory = PlainFactory::build(name, description, &self.allocator)?;
        self.insert(name, DefinedValue::Schema(Arc::clone(factory.schema())));
        Ok(factory)
    }

    /// Compile `T`'s schema and register it as a class.
    ///
    /// # Errors
    ///
    /// As [`schema`](Self::schema).
    pub fn register_schema_class<T: SchemaClass>(&mut self, name: &str) -> DefineResult<ClassHandle<T>> {
        self.check_redefinition(name)?;
        self.check_duplicate(name)?;
        let schema = compile(name, &T::describe(), &self.allocator)?;
        self.insert(name, DefinedValue::Class(Arc::clone(&schema)));
        Ok(ClassHandle::new(schema))
    }

    /// Merge a serialized identity table.
    ///
    /// Binds uids to matching definitions and advances the allocator past
    /// the highest loaded id. Conflicts are kept for the consistency pass.
    pub fn load_identity_table(&mut self, table: &IdentityTable) {
        for (name, raw) in table.iter() {
            let id = Identity::from_raw(raw);
            if let Some(&existing) = self.loaded.get(name) {
                if existing != id {
                    self.load_problems.push(format!(
                        "{name:?}: imported with conflicting ids {existing} and {id}"
                    ));
                }
                continue;
            }
            if self.allocator.issued().is_some_and(|issued| id <= issued) {
                self.load_problems.push(format!(
                    "{name:?}: id {id} was already handed out before the table loaded"
                ));
            }
            if let Some(other) = self.loaded_ids.get(&id) {
                self.load_problems
                    .push(format!("{name:?}: id {id} already imported for {other:?}"));
                continue;
            }
            self.loaded.insert(name.to_string(), id);
            self.loaded_ids.insert(id, name.to_string());
            if let Some(definition) = self.definitions.get_mut(name) {
                definition.bind_uid(id);
            }
        }
        if let Some(max) = table.max_id() {
            self.allocator.advance_past(max);
        }
        tracing::debug!(
            entries = table.len(),
            next_id = %self.allocator.peek(),
            "loaded identity table"
        );
    }

    /// End the load phase.
    ///
    /// Reports every mismatch between registrations and loaded tables at
    /// once; on success freezes object, array, and function definitions.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::Consistency`] listing all problems.
    pub fn freeze(&mut self) -> DefineResult<()> {
        let mut problems = self.load_problems.clone();
        for name in self.definitions.keys() {
            if !self.loaded.contains_key(name) {
                problems.push(format!("{name:?}: defined but not imported"));
            }
        }
        for name in self.loaded.keys() {
            if !self.definitions.contains_key(name) {
                problems.push(format!("{name:?}: imported but not defined"));
            }
        }
        if !problems.is_empty() {
            tracing::debug!(problems = problems.len(), "consistency pass failed");
            return Err(DefineError::Consistency(problems));
        }

        for definition in self.definitions.values_mut() {
            if definition.kind().is_freezable() {
                definition.frozen = true;
            }
        }
        self.phase = Phase::Frozen;
        tracing::debug!(definitions = self.definitions.len(), "registry frozen");
        Ok(())
    }

    /// Replace the value of an unfrozen definition.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::UnknownDefinition`] or
    /// [`DefineError::FrozenDefinition`].
    pub fn update_value(&mut self, name: &str, value: impl Into<DefinedValue>) -> DefineResult<()> {
        let definition = self
            .definitions
            .get_mut(name)
            .ok_or_else(|| DefineError::UnknownDefinition(name.to_string()))?;
        if definition.frozen {
            return Err(DefineError::FrozenDefinition(name.to_string()));
        }
        definition.value = value.into();
        if let Some(uid) = definition.uid {
            definition.value.bind_uid(uid);
        }
        Ok(())
    }

    /// Look up a definition.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    /// Look up the compiled schema of a class or schema definition.
    #[must_use]
    pub fn schema_named(&self, name: &str) -> Option<&Arc<Schema>> {
        self.get(name).and_then(|d| d.value().as_schema())
    }

    /// Uid of a definition.
    #[must_use]
    pub fn uid(&self, name: &str) -> Option<Identity> {
        self.get(name).and_then(Definition::uid)
    }

    /// Definitions in registration order.
    pub fn definitions(&self) -> impl Iterator<Item = &Definition> {
        self.definitions.values()
    }

    /// Number of definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    fn check_duplicate(&self, name: &str) -> DefineResult<()> {
        if self.definitions.contains_key(name) && !self.config.hot_reload {
            return Err(DefineError::DuplicateDefinition(name.to_string()));
        }
        Ok(())
    }

    fn check_redefinition(&self, name: &str) -> DefineResult<()> {
        if self.phase == Phase::Frozen && !self.config.hot_reload {
            return Err(DefineError::RuntimeRedefinition(name.to_string()));
        }
        Ok(())
    }

    fn insert(&mut self, name: &str, value: DefinedValue) -> &Definition {
        if self.definitions.contains_key(name) {
            tracing::warn!(definition = name, "hot reload: replacing definition");
        }
        let kind = value.kind();
        let mut definition = Definition {
            name: name.to_string(),
            display_name: display_name(name).to_string(),
            value,
            uid: None,
            frozen: self.phase == Phase::Frozen && kind.is_freezable(),
        };
        if let Some(&uid) = self.loaded.get(name) {
            definition.bind_uid(uid);
        }
        tracing::debug!(definition = name, ?kind, uid = ?definition.uid, "registered definition");
        let (index, _) = self.definitions.insert_full(name.to_string(), definition);
        &self.definitions[index]
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(registry: &mut Registry, name: &str) -> DefineResult<Arc<Schema>> {
        registry.schema(name, &SchemaDescription::new().primitive("x").primitive("y"))
    }

    #[test]
    fn test_duplicate_rejected_outside_hot_reload() {
        let mut registry = Registry::new();
        registry
            .register("a.b", DefinedValue::from_json(json!({"v": 1})).expect("object"))
            .expect("first");
        let err = registry
            .register("a.b", DefinedValue::from_json(json!({"v": 2})).expect("object"))
            .expect_err("second");
        assert!(matches!(err, DefineError::DuplicateDefinition(name) if name == "a.b"));
    }

    #[test]
    fn test_hot_reload_replaces_value() {
        let mut registry = Registry::with_config(RegistryConfig::default().with_hot_reload(true));
        registry
            .register("a.b", DefinedValue::from_json(json!({"v": 1})).expect("object"))
            .expect("first");
        registry
            .register("a.b", DefinedValue::from_json(json!({"v": 2})).expect("object"))
            .expect("second");
        assert_eq!(registry.len(), 1);
        let value = registry.get("a.b").and_then(|d| d.value().as_json()).expect("json");
        assert_eq!(value, &json!({"v": 2}));
    }

    #[test]
    fn test_display_name_and_kind() {
        let mut registry = Registry::new();
        point(&mut registry, "app.geo.Point").expect("schema");
        let def = registry.get("app.geo.Point").expect("registered");
        assert_eq!(def.display_name(), "Point");
        assert_eq!(def.kind(), DefinitionKind::Schema);
        assert!(def.uid().is_none());
    }

    #[test]
    fn test_scalar_definition_rejected() {
        assert!(DefinedValue::from_json(json!(3)).is_err());
    }

    #[test]
    fn test_load_binds_uids_and_advances_allocator() {
        let mut registry = Registry::new();
        let schema = point(&mut registry, "app.Point").expect("schema");
        let table: IdentityTable = [("app.Point", 40)].into_iter().collect();
        registry.load_identity_table(&table);
        assert_eq!(schema.uid(), Some(Identity::from_raw(40)));
        assert_eq!(registry.uid("app.Point"), Some(Identity::from_raw(40)));
        assert_eq!(registry.allocator().allocate().get(), 41);
    }

    #[test]
    fn test_table_loaded_before_registration_binds_on_register() {
        let mut registry = Registry::new();
        let table: IdentityTable = [("app.Point", 7)].into_iter().collect();
        registry.load_identity_table(&table);
        let schema = point(&mut registry, "app.Point").expect("schema");
        assert_eq!(schema.uid(), Some(Identity::from_raw(7)));
    }

    #[test]
    fn test_consistency_pass_reports_both_directions() {
        let mut registry = Registry::new();
        for name in ["x", "y"] {
            registry
                .register(name, DefinedValue::from_json(json!({})).expect("object"))
                .expect("register");
        }
        let table: IdentityTable = [("y", 1), ("z", 2)].into_iter().collect();
        registry.load_identity_table(&table);

        let err = registry.freeze().expect_err("mismatch");
        let message = err.to_string();
        assert!(message.contains("\"x\": defined but not imported"));
        assert!(message.contains("\"z\": imported but not defined"));
        assert!(!message.contains("\"y\""));
        assert_eq!(message.lines().count(), 2);
        assert_eq!(registry.phase(), Phase::Loading);
    }

    #[test]
    fn test_table_reusing_issued_id_fails_consistency() {
        let mut registry = Registry::new();
        let schema = point(&mut registry, "app.P").expect("schema");
        let early = crate::PlainFactory::for_schema(schema)
            .construct([("x", 0)])
            .expect("instance");
        assert_eq!(early.ensure_identity().get(), 1);

        registry.load_identity_table(&[("app.P", 1)].into_iter().collect::<IdentityTable>());
        let DefineError::Consistency(problems) = registry.freeze().expect_err("reused id") else {
            panic!("expected consistency error");
        };
        assert_eq!(
            problems,
            vec!["\"app.P\": id 1 was already handed out before the table loaded".to_string()]
        );
    }

    #[test]
    fn test_conflicting_table_entries_reported() {
        let mut registry = Registry::new();
        registry.load_identity_table(&[("a", 1)].into_iter().collect::<IdentityTable>());
        registry.load_identity_table(&[("a", 2), ("b", 1)].into_iter().collect::<IdentityTable>());
        registry
            .register("a", DefinedValue::from_json(json!({})).expect("object"))
            .expect("a");
        registry
            .register("b", DefinedValue::from_json(json!({})).expect("object"))
            .expect("b");
        let DefineError::Consistency(problems) = registry.freeze().expect_err("conflicts") else {
            panic!("expected consistency error");
        };
        assert!(problems.iter().any(|p| p.contains("conflicting ids 1 and 2")));
        assert!(problems.iter().any(|p| p.contains("already imported for \"a\"")));
    }

    #[test]
    fn test_freeze_then_redefinition_rules() {
        let mut registry = Registry::new();
        point(&mut registry, "app.Point").expect("schema");
        registry
            .register("app.config", DefinedValue::from_json(json!({"debug": false})).expect("object"))
            .expect("config");
        let table: IdentityTable = [("app.Point", 1), ("app.config", 2)].into_iter().collect();
        registry.load_identity_table(&table);
        registry.freeze().expect("consistent");
        assert_eq!(registry.phase(), Phase::Frozen);

        let err = point(&mut registry, "app.Other").expect_err("after load");
        assert!(matches!(err, DefineError::RuntimeRedefinition(_)));

        assert!(registry.get("app.config").expect("config").is_frozen());
        let err = registry
            .update_value("app.config", DefinedValue::from_json(json!({})).expect("object"))
            .expect_err("frozen");
        assert!(matches!(err, DefineError::FrozenDefinition(_)));

        registry.set_hot_reload(true);
        point(&mut registry, "app.Point").expect("hot reload replaces");
        assert_eq!(
            registry.schema_named("app.Point").and_then(|s| s.uid()),
            Some(Identity::from_raw(1))
        );
    }

    #[test]
    fn test_update_value_before_freeze() {
        let mut registry = Registry::new();
        registry
            .register("app.list", DefinedValue::from_json(json!([1])).expect("array"))
            .expect("list");
        registry
            .update_value("app.list", DefinedValue::from_json(json!([1, 2])).expect("array"))
            .expect("update");
        assert!(matches!(
            registry.update_value("app.nope", FunctionRef::new("app.nope", |_| crate::Value::Null)),
            Err(DefineError::UnknownDefinition(_))
        ));
    }

    #[test]
    fn test_register_field_requires_owner_prefix() {
        let mut registry = Registry::new();
        let f = FunctionRef::new("app.Point.norm", |_| crate::Value::Null);
        registry
            .register_field("app.Point", "app.Point.norm", f.clone())
            .expect("valid path");
        for bad in ["app.Pointnorm", "other.norm", "app.Point.", "app.Point"] {
            let err = registry
                .register_field("app.Point", bad, f.clone())
                .expect_err("bad path");
            assert!(matches!(err, DefineError::InvalidFieldPath { .. }));
        }
    }

    #[test]
    fn test_function_definition_gets_identity() {
        let mut registry = Registry::new();
        let f = FunctionRef::new("app.fn", |_| crate::Value::Null);
        registry.register("app.fn", f.clone()).expect("register");
        registry.load_identity_table(&[("app.fn", 3)].into_iter().collect::<IdentityTable>());
        assert_eq!(f.identity(), Some(Identity::from_raw(3)));
    }
}
