//! Attribute values
//!
//! Typed replacement for the dynamic key/value attribute bags adapters work
//! with. A [`Value`] is a string, integer, boolean, list or nested map;
//! an [`AttributeMap`] maps field names to values in key order so iteration
//! (and therefore any diff derived from it) is deterministic.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// How structured values of a field are compared.
///
/// Some remote APIs return list members in arbitrary order; comparing those
/// positionally would report drift on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareMode {
    /// Lists are equal only when their elements match position by position.
    #[default]
    Ordered,
    /// Lists are compared as multisets, at every nesting level.
    Unordered,
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean value.
    Bool(bool),
    /// Signed integer value.
    Int(i64),
    /// String value.
    String(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Nested map of values.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Get as a string if this is a string value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as an integer if this is an integer value.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as a boolean if this is a boolean value.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as a list if this is a list value.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get as a map if this is a map value.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Short name of the variant, for logs and error messages.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Compare two values under the given mode.
    #[must_use]
    pub fn equivalent(&self, other: &Value, mode: CompareMode) -> bool {
        match mode {
            CompareMode::Ordered => self == other,
            CompareMode::Unordered => self.canonical() == other.canonical(),
        }
    }

    /// Copy of the value with every list sorted, recursively.
    #[must_use]
    pub fn canonical(&self) -> Value {
        match self {
            Value::List(items) => {
                let mut sorted: Vec<Value> = items.iter().map(Value::canonical).collect();
                sorted.sort();
                Value::List(sorted)
            }
            Value::Map(map) => Value::Map(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.canonical()))
                    .collect(),
            ),
            scalar => scalar.clone(),
        }
    }

    /// Convert from a JSON value.
    ///
    /// Returns `None` for `null`, for any float (including `2.0`), for
    /// integers outside the `i64` range, and for containers holding such
    /// values. The attribute model has no null and no floats.
    #[must_use]
    pub fn from_json(json: &serde_json::Value) -> Option<Value> {
        match json {
            serde_json::Value::Null => None,
            serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
            serde_json::Value::Number(n) => n.as_i64().map(Value::Int),
            serde_json::Value::String(s) => Some(Value::String(s.clone())),
            serde_json::Value::Array(items) => items
                .iter()
                .map(Value::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Value::List),
            serde_json::Value::Object(map) => map
                .iter()
                .map(|(k, v)| Value::from_json(v).map(|v| (k.clone(), v)))
                .collect::<Option<BTreeMap<_, _>>>()
                .map(Value::Map),
        }
    }

    /// Convert into a JSON value.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::String(s) => write!(f, "{s:?}"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(vec: Vec<T>) -> Self {
        Value::List(vec.into_iter().map(Into::into).collect())
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(map: BTreeMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

/// Field name to value mapping for desired and observed attribute sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap {
    fields: BTreeMap<String, Value>,
}

impl AttributeMap {
    /// Create a new empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Set a field using builder pattern.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    /// Get a field value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Get a string field.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Check if a field exists.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Remove a field.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Field names in key order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Get the number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Check if the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over fields in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Convert a JSON object into an attribute map.
    ///
    /// Members that [`Value::from_json`] cannot represent are dropped
    /// silently: nulls, floats, integers above `i64::MAX`, and containers
    /// holding any of those. Use [`AttributeMap::from_json_object_checked`]
    /// to learn which keys were lost.
    #[must_use]
    pub fn from_json_object(object: &serde_json::Map<String, serde_json::Value>) -> Self {
        Self::from_json_object_checked(object).0
    }

    /// Convert a JSON object into an attribute map, also returning the keys
    /// of non-null members that had no attribute representation.
    ///
    /// Null members are treated as absent and are not reported.
    #[must_use]
    pub fn from_json_object_checked(
        object: &serde_json::Map<String, serde_json::Value>,
    ) -> (Self, Vec<String>) {
        let mut map = Self::new();
        let mut dropped = Vec::new();
        for (key, json) in object {
            match Value::from_json(json) {
                Some(value) => {
                    map.fields.insert(key.clone(), value);
                }
                None if json.is_null() => {}
                None => dropped.push(key.clone()),
            }
        }
        (map, dropped)
    }

    /// Render the map as a JSON object.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect(),
        )
    }
}

impl FromIterator<(String, Value)> for AttributeMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for AttributeMap {
    type Item = (String, Value);
    type IntoIter = std::collections::btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}
