//! Zarr/NCZarr JSON value (spec §4.B).
//!
//! Metadata documents are `serde_json::Value` under the hood — same
//! choice the teacher makes for attributes and fill values — but the
//! attribute engine needs the coarser sum-type view spec'd in §4.B
//! (in particular a way to tell "complex JSON" apart from an atomic
//! scalar or a flat array of scalars). [`JsonValue`] wraps
//! `serde_json::Value` and adds exactly that.

use serde_json::Value;

/// Thin view over a `serde_json::Value` exposing the coercions and
/// classification the attribute engine needs.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonValue(pub Value);

impl From<Value> for JsonValue {
    fn from(v: Value) -> Self {
        Self(v)
    }
}

impl JsonValue {
    pub fn as_string(&self) -> Option<String> {
        self.0.as_str().map(|s| s.to_owned())
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.0.as_u64()
    }

    pub fn as_f64(&self) -> Option<f64> {
        self.0.as_f64()
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.0.as_bool()
    }

    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        self.0.as_array()
    }

    /// Is this a single atomic scalar (not array, not object, not null)?
    pub fn is_atomic_scalar(&self) -> bool {
        self.0.is_number() || self.0.is_boolean() || self.0.is_string()
    }

    /// Spec §4.J rule 2: a dict, or an array containing any non-atomic
    /// element, is "complex JSON" destined for the JSON convention.
    pub fn is_complex(&self) -> bool {
        match &self.0 {
            Value::Object(_) => true,
            Value::Array(items) => items.iter().any(|v| {
                let jv = JsonValue(v.clone());
                !jv.is_atomic_scalar() && !jv.is_null()
            }),
            _ => false,
        }
    }

    /// True for `null` and an empty array — spec §4.J rule 1 (illegal as
    /// an attribute value).
    pub fn is_empty_or_null(&self) -> bool {
        self.0.is_null() || matches!(&self.0, Value::Array(a) if a.is_empty())
    }

    pub fn clone_inner(&self) -> Value {
        self.0.clone()
    }
}
