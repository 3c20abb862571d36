//! Runtime values stored in shared-object fields.

use std::sync::{Arc, OnceLock};

use serde_json::Number;

use crate::{DefineError, DefineResult, Identity, SharedObject};

/// A value held by a shared-object field or list element.
///
/// `Plain` carries a raw JSON object or array that has not been bound to a
/// schema yet; structured fields coerce it into a [`SharedObject`] on write.
#[derive(Debug, Clone, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean primitive.
    Bool(bool),
    /// Numeric primitive.
    Number(Number),
    /// String primitive.
    String(String),
    /// A schema-bound shared object or list.
    Object(SharedObject),
    /// A registered function.
    Function(FunctionRef),
    /// A raw JSON object or array.
    Plain(serde_json::Value),
}

impl Value {
    /// Whether this is [`Value::Null`].
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The shared object, if this value holds one.
    #[must_use]
    pub const fn as_object(&self) -> Option<&SharedObject> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    /// The numeric value as `f64`, if numeric.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// The numeric value as `i64`, if it is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    /// The string slice, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The boolean, if this is a boolean.
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Encode for a commit: primitives as themselves, references as identities.
    ///
    /// # Errors
    ///
    /// Returns [`DefineError::UnknownReference`] when an object or function
    /// has not been assigned an identity.
    pub fn encode(&self) -> DefineResult<serde_json::Value> {
        Ok(match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::String(s) => serde_json::Value::String(s.clone()),
            Self::Plain(raw) => raw.clone(),
            Self::Object(object) => {
                let id = object.identity().ok_or_else(|| {
                    DefineError::UnknownReference(format!("object of {}", object.shape_name()))
                })?;
                serde_json::Value::from(id.get())
            }
            Self::Function(function) => {
                let id = function.identity().ok_or_else(|| {
                    DefineError::UnknownReference(format!("function {}", function.name()))
                })?;
                serde_json::Value::from(id.get())
            }
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::Plain(a), Self::Plain(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<f64> for Value {
    /// Non-finite floats have no JSON representation and become `Null`.
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(Self::Null, Self::Number)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<SharedObject> for Value {
    fn from(object: SharedObject) -> Self {
        Self::Object(object)
    }
}

impl From<FunctionRef> for Value {
    fn from(function: FunctionRef) -> Self {
        Self::Function(function)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

impl From<serde_json::Value> for Value {
    fn from(raw: serde_json::Value) -> Self {
        match raw {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            raw @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => Self::Plain(raw),
        }
    }
}

type FunctionBody = dyn Fn(&[Value]) -> Value + Send + Sync;

/// A named function that can be registered and referenced from fields.
#[derive(Clone)]
pub struct FunctionRef(Arc<FunctionInner>);

struct FunctionInner {
    name: String,
    identity: OnceLock<Identity>,
    body: Box<FunctionBody>,
}

impl FunctionRef {
    /// Wrap a closure under a dotted name.
    pub fn new(
        name: impl Into<String>,
        body: impl Fn(&[Value]) -> Value + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(FunctionInner {
            name: name.into(),
            identity: OnceLock::new(),
            body: Box::new(body),
        }))
    }

    /// The dotted name given at construction.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Identity bound from the identity table, if loaded.
    #[must_use]
    pub fn identity(&self) -> Option<Identity> {
        self.0.identity.get().copied()
    }

    /// Invoke the function.
    #[must_use]
    pub fn call(&self, args: &[Value]) -> Value {
        (self.0.body)(args)
    }

    /// Whether both handles point at the same function.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn bind_identity(&self, id: Identity) {
        if self.0.identity.set(id).is_err() {
            tracing::trace!(function = %self.0.name, "identity already bound");
        }
    }
}

impl std::fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionRef")
            .field("name", &self.0.name)
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}
