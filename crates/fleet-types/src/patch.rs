//! Status merge engine
//!
//! Merges an incoming, possibly partial, condition set into an existing one.
//! Both sides are serialized to JSON, diffed entry by entry on the merge key
//! (`type`), the diff is applied onto the existing JSON and the result is
//! deserialized back. Entries the incoming side does not mention are left
//! byte-for-byte untouched.
//!
//! Nothing is assigned to the existing value until the whole cycle succeeded.

use crate::cluster::ClusterStatus;
use crate::condition::{Condition, ConditionType};
use crate::namespace::NamespaceStatus;
use serde_json::{Map, Value};
use thiserror::Error;

/// Field aligning entries of two condition collections.
pub const MERGE_KEY: &str = "type";

/// Errors raised while merging statuses.
#[derive(Debug, Error)]
pub enum PatchError {
    /// Condition payload could not be serialized or deserialized
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entry without a merge key
    #[error("Condition entry has no \"{MERGE_KEY}\" field: {0}")]
    MissingMergeKey(String),

    /// Condition payload is not a JSON array of objects
    #[error("Malformed condition payload: {0}")]
    Malformed(String),
}

/// Change for one incoming entry.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryDiff {
    /// Entry type not present yet
    Add(Value),
    /// Fields to set on the existing entry with the same key; `null` removes the field
    Patch { key: Value, fields: Map<String, Value> },
}

fn entries(value: Value) -> Result<Vec<Map<String, Value>>, PatchError> {
    let Value::Array(items) = value else {
        return Err(PatchError::Malformed(value.to_string()));
    };
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(obj) if obj.contains_key(MERGE_KEY) => Ok(obj),
            Value::Object(obj) => Err(PatchError::MissingMergeKey(Value::Object(obj).to_string())),
            other => Err(PatchError::Malformed(other.to_string())),
        })
        .collect()
}

/// Collapses entries sharing a merge key: first position, last value.
fn collapse(items: Vec<Map<String, Value>>) -> Vec<Map<String, Value>> {
    let mut out: Vec<Map<String, Value>> = Vec::with_capacity(items.len());
    for item in items {
        match out.iter_mut().find(|o| o.get(MERGE_KEY) == item.get(MERGE_KEY)) {
            Some(slot) => *slot = item,
            None => out.push(item),
        }
    }
    out
}

fn diff_entry(old: &Map<String, Value>, new: &Map<String, Value>) -> Map<String, Value> {
    let mut fields = Map::new();
    for (field, new_val) in new {
        if old.get(field) != Some(new_val) {
            fields.insert(field.clone(), new_val.clone());
        }
    }
    for field in old.keys() {
        if !new.contains_key(field) {
            fields.insert(field.clone(), Value::Null);
        }
    }
    fields
}

/// Two-way diff of condition collections keyed on [`MERGE_KEY`].
///
/// Types absent from `incoming` produce no change.
pub fn diff_by_key(existing: &[Map<String, Value>], incoming: &[Map<String, Value>]) -> Vec<EntryDiff> {
    incoming
        .iter()
        .filter_map(|new| {
            let key = new.get(MERGE_KEY)?;
            match existing.iter().find(|old| old.get(MERGE_KEY) == Some(key)) {
                None => Some(EntryDiff::Add(Value::Object(new.clone()))),
                Some(old) => {
                    let fields = diff_entry(old, new);
                    (!fields.is_empty()).then(|| EntryDiff::Patch {
                        key: key.clone(),
                        fields,
                    })
                }
            }
        })
        .collect()
}

/// Applies a diff produced by [`diff_by_key`]. Existing order is kept, added entries go last.
pub fn apply_by_key(existing: &mut Vec<Map<String, Value>>, diff: Vec<EntryDiff>) {
    for change in diff {
        match change {
            EntryDiff::Add(Value::Object(obj)) => existing.push(obj),
            EntryDiff::Add(_) => {}
            EntryDiff::Patch { key, fields } => {
                let Some(target) = existing.iter_mut().find(|e| e.get(MERGE_KEY) == Some(&key)) else {
                    continue;
                };
                for (field, value) in fields {
                    if value.is_null() {
                        target.remove(&field);
                    } else {
                        target.insert(field, value);
                    }
                }
            }
        }
    }
}

/// Merges `incoming` conditions into `existing`, keyed by condition type.
///
/// Idempotent: merging the same `incoming` twice leaves `existing` as after the first merge.
pub fn merge_conditions<T: ConditionType>(
    existing: &mut Vec<Condition<T>>,
    incoming: &[Condition<T>],
) -> Result<(), PatchError> {
    if incoming.is_empty() {
        return Ok(());
    }
    let mut base = collapse(entries(serde_json::to_value(&*existing)?)?);
    let patch = collapse(entries(serde_json::to_value(incoming)?)?);

    let diff = diff_by_key(&base, &patch);
    if diff.is_empty() && base.len() == existing.len() {
        return Ok(());
    }
    apply_by_key(&mut base, diff);

    let merged: Vec<Condition<T>> =
        serde_json::from_value(Value::Array(base.into_iter().map(Value::Object).collect()))?;
    *existing = merged;
    Ok(())
}

fn copy_if_set(target: &mut Option<String>, incoming: Option<&String>) {
    if let Some(value) = incoming.filter(|v| !v.is_empty()) {
        *target = Some(value.clone());
    }
}

/// Statuses that merge through the engine.
pub trait StatusMerge {
    /// Merges `incoming` into `self`; on error `self` is unchanged.
    fn merge_from(&mut self, incoming: &Self) -> Result<(), PatchError>;
}

impl StatusMerge for ClusterStatus {
    fn merge_from(&mut self, incoming: &Self) -> Result<(), PatchError> {
        merge_conditions(&mut self.conditions, &incoming.conditions)?;
        copy_if_set(&mut self.published_blueprint, incoming.published_blueprint.as_ref());
        copy_if_set(&mut self.token, incoming.token.as_ref());
        Ok(())
    }
}

impl StatusMerge for NamespaceStatus {
    fn merge_from(&mut self, incoming: &Self) -> Result<(), PatchError> {
        merge_conditions(&mut self.conditions, &incoming.conditions)
    }
}

#[cfg(test)]
#[path = "patch_test.rs"]
mod patch_test;
