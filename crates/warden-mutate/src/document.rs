//! The live configuration document and structural edits on it.

use std::path::Path;

use serde_json::{Map, Value};

use crate::error::{MutateError, MutateResult};
use crate::selector::Selector;

/// Array holding the tunnel entities.
pub const OUTBOUNDS: &str = "outbounds";

/// One field-level change.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPatch {
    pub selector: Selector,
    pub value: Value,
}

impl FieldPatch {
    pub fn new(selector: Selector, value: Value) -> Self {
        Self { selector, value }
    }
}

/// Interpret operator input: valid JSON stays JSON, anything else is a string.
///
/// `51820` becomes a number, `"51820"` a string, `10.0.0.2/32` a string.
pub fn parse_value(input: &str) -> Value {
    serde_json::from_str(input).unwrap_or_else(|_| Value::String(input.to_string()))
}

/// A parsed configuration document. Member order is preserved.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigDocument {
    value: Value,
}

impl ConfigDocument {
    pub fn parse(text: &str) -> MutateResult<Self> {
        let value: Value = serde_json::from_str(text).map_err(|e| MutateError::Parse(e.to_string()))?;
        if !value.is_object() {
            return Err(MutateError::Parse("top level is not an object".to_string()));
        }
        Ok(Self { value })
    }

    pub fn load(path: &Path) -> MutateResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| MutateError::Read(format!("{}: {e}", path.display())))?;
        Self::parse(&text)
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Pretty JSON with a trailing newline.
    pub fn render(&self) -> MutateResult<String> {
        let mut text =
            serde_json::to_string_pretty(&self.value).map_err(|e| MutateError::Write(e.to_string()))?;
        text.push('\n');
        Ok(text)
    }

    pub fn get(&self, selector: &Selector) -> Option<&Value> {
        selector.get(&self.value)
    }

    /// Apply patches in order; the first failure leaves `self` unchanged.
    pub fn apply(&mut self, patches: &[FieldPatch]) -> MutateResult<Vec<Option<Value>>> {
        let mut working = self.value.clone();
        let mut previous = Vec::with_capacity(patches.len());
        for patch in patches {
            previous.push(patch.selector.set(&mut working, patch.value.clone())?);
        }
        self.value = working;
        Ok(previous)
    }

    fn outbounds(&self) -> &[Value] {
        self.value
            .get(OUTBOUNDS)
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Tags of every outbound, in document order.
    pub fn tags(&self) -> Vec<String> {
        self.outbounds()
            .iter()
            .filter_map(|o| o.get("tag").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    pub fn outbound(&self, tag: &str) -> Option<&Value> {
        self.outbounds()
            .iter()
            .find(|o| o.get("tag").and_then(Value::as_str) == Some(tag))
    }

    /// Insert `entity` directly before the aggregation outbound `group_tag`
    /// and add its tag to the group's member list.
    pub fn insert_tunnel(&mut self, entity: Value, group_tag: &str) -> MutateResult<String> {
        if !entity.is_object() {
            return Err(MutateError::InvalidEntity("entity must be an object".to_string()));
        }
        let tag = entity
            .get("tag")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .ok_or_else(|| MutateError::InvalidEntity("entity needs a non-empty string \"tag\"".to_string()))?;
        if self.outbound(&tag).is_some() {
            return Err(MutateError::DuplicateTag(tag));
        }

        let outbounds = self
            .value
            .get_mut(OUTBOUNDS)
            .and_then(Value::as_array_mut)
            .ok_or_else(|| MutateError::NotFound(OUTBOUNDS.to_string()))?;
        let group_index = outbounds
            .iter()
            .position(|o| o.get("tag").and_then(Value::as_str) == Some(group_tag))
            .ok_or_else(|| MutateError::AggregationMissing(group_tag.to_string()))?;

        let group = outbounds[group_index]
            .as_object_mut()
            .ok_or_else(|| MutateError::AggregationMissing(group_tag.to_string()))?;
        let members = group
            .entry(OUTBOUNDS)
            .or_insert_with(|| Value::Array(Vec::new()))
            .as_array_mut()
            .ok_or_else(|| {
                MutateError::InvalidEntity(format!("{group_tag}.{OUTBOUNDS} is not an array"))
            })?;
        if !members.iter().any(|m| m.as_str() == Some(tag.as_str())) {
            members.push(Value::String(tag.clone()));
        }

        outbounds.insert(group_index, entity);
        Ok(tag)
    }
}

/// Leaf values under `entity` as `(dotted path, value)`, skipping the
/// identity fields `tag` and `type`.
pub fn editable_fields(entity: &Value) -> Vec<(String, Value)> {
    fn walk(prefix: &str, value: &Value, out: &mut Vec<(String, Value)>) {
        match value {
            Value::Object(map) => walk_map(prefix, map, out),
            Value::Array(items) if items.iter().any(|i| i.is_object() || i.is_array()) => {
                for (i, item) in items.iter().enumerate() {
                    walk(&join(prefix, &i.to_string()), item, out);
                }
            }
            leaf => out.push((prefix.to_string(), leaf.clone())),
        }
    }

    fn walk_map(prefix: &str, map: &Map<String, Value>, out: &mut Vec<(String, Value)>) {
        for (key, value) in map {
            if prefix.is_empty() && (key == "tag" || key == "type") {
                continue;
            }
            walk(&join(prefix, key), value, out);
        }
    }

    fn join(prefix: &str, key: &str) -> String {
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}.{key}")
        }
    }

    let mut out = Vec::new();
    walk("", entity, &mut out);
    out
}
