//! In-memory form of the server's tag-typed value tree.
//!
//! Every request body and every reply is a [`Params`] bag: a mapping from
//! case-sensitive key to [`Value`]. Values are either JSON primitives or
//! one of the envelope kinds the server uses to self-describe payloads that
//! plain JSON cannot carry faithfully (octets, instants, 64-bit integers,
//! nested bags and arrays). The wire form lives in [`crate::codec`]; this
//! module only models the tree and offers typed accessors for facades.
//!
//! Bags are kept in a `BTreeMap` so that two bags holding the same fields
//! compare equal and serialize identically regardless of insertion order.

use std::collections::BTreeMap;
use std::collections::btree_map;

use chrono::{DateTime, Utc};

use crate::error::{CodecError, KscError, Result};

// ── Value ──────────────────────────────────────────────────────────────

/// A single node of the tag-typed value tree.
///
/// `Int` covers the full signed 64-bit range. The codec decides on the way
/// out whether an integer fits a plain JSON number or needs a `long`
/// envelope, so callers never pick the wire form themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Field absent. Stripped from bags on encode.
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    String(String),
    /// Raw octets, carried as a `binary` envelope.
    Binary(Vec<u8>),
    /// UTC instant, carried as a `datetime` envelope.
    DateTime(DateTime<Utc>),
    /// Nested parameter bag, carried as a `params` envelope.
    Params(Params),
    /// Ordered heterogeneous sequence, carried as an `array` envelope.
    Array(Vec<Value>),
}

impl Value {
    /// Builds a `Binary` value from anything that owns or borrows octets.
    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Value::Binary(bytes.into())
    }

    /// Builds an `Array` of strings, the shape most field-list parameters take.
    pub fn strings<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Value::Array(items.into_iter().map(|s| Value::String(s.into())).collect())
    }

    /// Short lowercase name of the variant, used in decode error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Double(_) => "double",
            Value::String(_) => "string",
            Value::Binary(_) => "binary",
            Value::DateTime(_) => "datetime",
            Value::Params(_) => "params",
            Value::Array(_) => "array",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a double. Integers widen; nothing else converts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Double(d) => Some(*d),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Value::DateTime(t) => Some(*t),
            _ => None,
        }
    }

    pub fn as_params(&self) -> Option<&Params> {
        match self {
            Value::Params(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_params(self) -> Option<Params> {
        match self {
            Value::Params(p) => Some(p),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn into_string(self) -> Option<String> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::DateTime(v)
    }
}

impl From<Params> for Value {
    fn from(v: Params) -> Self {
        Value::Params(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

// ── Params ─────────────────────────────────────────────────────────────

/// A parameter bag: unique string keys mapped to values.
///
/// Used both as the top-level request body and as the payload of nested
/// `params` envelopes. `Null` entries are allowed in memory (they are how
/// optional builder arguments say "absent") and never reach the wire.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(BTreeMap<String, Value>);

impl Params {
    pub fn new() -> Self {
        Params(BTreeMap::new())
    }

    /// Fluent insert, for building request bodies inline:
    ///
    /// ```ignore
    /// let body = Params::new()
    ///     .with("nPolicy", 42)
    ///     .with("wstrName", "Baseline");
    /// ```
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Inserts a field, returning the previous value under that key.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Looks up a field. `Null` entries read as absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key).filter(|v| !v.is_null())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, String, Value> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns the field or a `MissingField` error naming it.
    pub fn require(&self, key: &str) -> Result<&Value> {
        self.get(key).ok_or_else(|| KscError::MissingField {
            field: key.to_owned(),
        })
    }

    pub fn require_str(&self, key: &str) -> Result<&str> {
        let value = self.require(key)?;
        value.as_str().ok_or_else(|| type_mismatch(key, "string", value))
    }

    pub fn require_i64(&self, key: &str) -> Result<i64> {
        let value = self.require(key)?;
        value.as_i64().ok_or_else(|| type_mismatch(key, "int", value))
    }

    pub fn require_bool(&self, key: &str) -> Result<bool> {
        let value = self.require(key)?;
        value.as_bool().ok_or_else(|| type_mismatch(key, "bool", value))
    }

    pub fn require_params(&self, key: &str) -> Result<&Params> {
        let value = self.require(key)?;
        value
            .as_params()
            .ok_or_else(|| type_mismatch(key, "params", value))
    }

    pub fn require_array(&self, key: &str) -> Result<&[Value]> {
        let value = self.require(key)?;
        value
            .as_array()
            .ok_or_else(|| type_mismatch(key, "array", value))
    }
}

fn type_mismatch(key: &str, expected: &str, found: &Value) -> KscError {
    KscError::Decode(
        CodecError::new(format!("expected {expected}, found {}", found.kind_name()))
            .within_key(key),
    )
}

impl FromIterator<(String, Value)> for Params {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Params(iter.into_iter().collect())
    }
}

impl IntoIterator for Params {
    type Item = (String, Value);
    type IntoIter = btree_map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Params {
    type Item = (&'a String, &'a Value);
    type IntoIter = btree_map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
