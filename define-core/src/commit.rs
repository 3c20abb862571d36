//! Commit encoding.
//!
//! A flushed batch is rendered twice from the same data. The compact form
//! addresses objects by identity and fields by declaration index; the pretty
//! form addresses them by definition uid and field name. Values are encoded
//! identically in both.

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeTuple, Serializer};

use crate::listener::UpdateBatch;
use crate::{DefineResult, Identity, SharedObject};

/// A created object in compact form: `[objectId, definitionUid, flatPairs]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactCreate {
    /// Object identity.
    pub object: Identity,
    /// Definition uid, if the object is a registered schema instance.
    pub definition: Option<Identity>,
    /// Interleaved `fieldIndex, value` pairs of the object's state.
    pub pairs: Vec<serde_json::Value>,
}

/// Changed fields of one object in compact form: `[objectId, flatPairs]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompactSet {
    /// Object identity.
    pub object: Identity,
    /// Interleaved `fieldIndex, value` pairs, in first-touched order.
    pub pairs: Vec<serde_json::Value>,
}

/// Identity- and index-addressed commit, intended for transmission.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct CompactCommit {
    /// Objects that became observed.
    #[serde(rename = "CREATE")]
    pub create: Vec<CompactCreate>,
    /// Objects that stopped being observed.
    #[serde(rename = "DESTROY")]
    pub destroy: Vec<Identity>,
    /// Field writes.
    #[serde(rename = "SET")]
    pub set: Vec<CompactSet>,
}

/// One object in pretty form: `[definitionUid, objectId, {field: value}]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PrettyEntry {
    /// Definition uid, if any.
    pub definition: Option<Identity>,
    /// Object identity.
    pub object: Identity,
    /// Field name to encoded value.
    pub fields: IndexMap<String, serde_json::Value>,
}

/// A destroyed object in pretty form: `[definitionUid, objectId]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PrettyDestroy {
    /// Definition uid, if any.
    pub definition: Option<Identity>,
    /// Object identity.
    pub object: Identity,
}

/// Name-addressed commit, intended for humans and debugging.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct PrettyCommit {
    /// Objects that became observed, with their state.
    #[serde(rename = "CREATE")]
    pub create: Vec<PrettyEntry>,
    /// Objects that stopped being observed.
    #[serde(rename = "DESTROY")]
    pub destroy: Vec<PrettyDestroy>,
    /// Field writes.
    #[serde(rename = "SET")]
    pub set: Vec<PrettyEntry>,
}

impl CompactCommit {
    /// Render as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Whether the commit carries no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.destroy.is_empty() && self.set.is_empty()
    }
}

impl PrettyCommit {
    /// Render as indented JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for CompactCreate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.object)?;
        tuple.serialize_element(&self.definition)?;
        tuple.serialize_element(&self.pairs)?;
        tuple.end()
    }
}

impl Serialize for CompactSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.object, &self.pairs).serialize(serializer)
    }
}

impl Serialize for PrettyEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.definition, self.object, &self.fields).serialize(serializer)
    }
}

impl Serialize for PrettyDestroy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (self.definition, self.object).serialize(serializer)
    }
}

/// Encode a batch into both forms.
pub(crate) fn encode(batch: &UpdateBatch) -> DefineResult<(CompactCommit, PrettyCommit)> {
    let mut compact = CompactCommit::default();
    let mut pretty = PrettyCommit::default();

    for (&object, (shared, _)) in &batch.created {
        let definition = shared.definition_uid();
        let state = shared.encoded_state()?;
        let (pairs, fields) = both_forms(shared, state);
        compact.create.push(CompactCreate {
            object,
            definition,
            pairs,
        });
        pretty.create.push(PrettyEntry {
            definition,
            object,
            fields,
        });
    }

    for (&object, shared) in &batch.deleted {
        compact.destroy.push(object);
        pretty.destroy.push(PrettyDestroy {
            definition: shared.definition_uid(),
            object,
        });
    }

    for (&object, changed) in &batch.changed {
        let mut state = Vec::with_capacity(changed.fields.len());
        for (&index, value) in &changed.fields {
            state.push((index, value.encode()?));
        }
        let (pairs, fields) = both_forms(&changed.object, state);
        compact.set.push(CompactSet { object, pairs });
        pretty.set.push(PrettyEntry {
            definition: changed.object.definition_uid(),
            object,
            fields,
        });
    }

    Ok((compact, pretty))
}

fn both_forms(
    object: &SharedObject,
    state: Vec<(usize, serde_json::Value)>,
) -> (Vec<serde_json::Value>, IndexMap<String, serde_json::Value>) {
    let mut pairs = Vec::with_capacity(state.len() * 2);
    let mut fields = IndexMap::with_capacity(state.len());
    for (index, value) in state {
        pairs.push(serde_json::Value::from(index));
        pairs.push(value.clone());
        fields.insert(object.field_name(index), value);
    }
    (pairs, fields)
}
