//! Attribute engine (spec §4.J): type inference, JSON-convention
//! handling, charify, typed conversion, and reserved-attribute
//! interception.
//!
//! Grounded on `original_source/libnczarr/zattr.c`'s
//! `NCZ_charify`/`NCZ_json_convention_read` and the type-promotion
//! rules it implements around attribute value storage.

use serde_json::Value;

use crate::chunkkey::materialize_fill_chunk;
use crate::dtype::NcType;
use crate::error::{NczError, NczResult};
use crate::json::JsonValue;
use crate::tree::{is_readonly_attribute, Attribute, Variable, ATTR_FILL_VALUE};

/// Spec §4.J: infer the nctype for an attribute value arriving as JSON
/// with no declared type.
pub fn infer_type(value: &Value) -> NczResult<NcType> {
    let jv = JsonValue(value.clone());

    // Rule 1: empty array or null is illegal.
    if jv.is_empty_or_null() {
        return Err(NczError::Range("attribute value is empty or null".into()));
    }

    // Rule 2: complex JSON (dict, or array with a non-atomic element).
    if jv.is_complex() {
        return Ok(NcType::Json);
    }

    // Rule 3: single atomic value, or array of atomic values.
    match value {
        Value::Bool(_) => Ok(NcType::UByte),
        Value::Number(n) => Ok(infer_numeric_type(n)),
        Value::String(_) => Ok(NcType::Char),
        Value::Array(items) => infer_array_type(items),
        _ => Err(NczError::Range("unsupported attribute value shape".into())),
    }
}

fn infer_numeric_type(n: &serde_json::Number) -> NcType {
    if n.is_f64() && n.as_i64().is_none() && n.as_u64().is_none() {
        return NcType::Double;
    }
    if let Some(i) = n.as_i64() {
        return smallest_signed_fit(i);
    }
    if let Some(u) = n.as_u64() {
        return smallest_unsigned_fit(u);
    }
    NcType::Double
}

fn smallest_signed_fit(i: i64) -> NcType {
    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
        NcType::Int
    } else {
        NcType::Int64
    }
}

fn smallest_unsigned_fit(u: u64) -> NcType {
    if u <= i32::MAX as u64 {
        NcType::Int
    } else if u <= u32::MAX as u64 {
        NcType::UInt
    } else if u <= i64::MAX as u64 {
        NcType::Int64
    } else {
        NcType::UInt64
    }
}

fn infer_array_type(items: &[Value]) -> NczResult<NcType> {
    // All-single-character-strings array -> NC_CHAR; any other array of
    // strings -> NC_STRING (spec §4.J rule 3).
    if items.iter().all(|v| v.as_str().is_some()) {
        if items
            .iter()
            .all(|v| v.as_str().map(|s| s.chars().count() == 1).unwrap_or(false))
        {
            return Ok(NcType::Char);
        }
        return Ok(NcType::String);
    }
    if items.iter().all(|v| v.is_boolean()) {
        return Ok(NcType::UByte);
    }
    if items.iter().all(|v| v.is_number()) {
        // Widest fitting signed/unsigned type across all elements
        // (spec §8 boundary behavior). infer_numeric_type() only ever
        // yields Int/UInt/Int64/UInt64/Double, so seed with the first
        // element rather than an arbitrary NcType that widen() can't rank.
        let mut numbers = items.iter().map(|v| match v {
            Value::Number(n) => Ok(n),
            _ => Err(NczError::Range("expected number".into())),
        });
        let first = infer_numeric_type(numbers.next().expect("non-empty array")?);
        let mut widest = first;
        for n in numbers {
            widest = widen(widest, infer_numeric_type(n?));
        }
        return Ok(widest);
    }
    Err(NczError::Range("mixed-type array is not a legal atomic attribute".into()))
}

fn rank(ty: NcType) -> u8 {
    match ty {
        NcType::Int => 0,
        NcType::UInt => 1,
        NcType::Int64 => 2,
        NcType::UInt64 => 3,
        NcType::Double => 4,
        other => {
            debug_assert!(false, "widen() called with non-numeric type {other:?}");
            0
        }
    }
}

fn widen(a: NcType, b: NcType) -> NcType {
    if rank(a) >= rank(b) {
        a
    } else {
        b
    }
}

/// Spec §4.J: concatenate a JSON string or array-of-strings into the
/// byte sequence backing an `NC_CHAR` attribute.
pub fn charify(value: &Value) -> NczResult<Vec<u8>> {
    match value {
        Value::String(s) => Ok(s.as_bytes().to_vec()),
        Value::Array(items) => {
            let mut out = Vec::new();
            for item in items {
                let s = item
                    .as_str()
                    .ok_or_else(|| NczError::BadType("NC_CHAR attribute array must contain only strings".into()))?;
                out.extend_from_slice(s.as_bytes());
            }
            Ok(out)
        }
        _ => Err(NczError::BadType("NC_CHAR attribute value must be a string or array of strings".into())),
    }
}

/// Spec §8 scenario 2: an `NC_CHAR` attribute's reported length is its
/// character count (`charify`'s byte length), not 1 — unlike every
/// other scalar attribute type, whose length is always 1 regardless of
/// its value's size.
pub fn attribute_length(nctype: NcType, value: &Value) -> usize {
    if nctype == NcType::Char {
        return charify(value).map(|b| b.len()).unwrap_or(0);
    }
    match value {
        Value::Array(items) => items.len(),
        Value::Null => 0,
        _ => 1,
    }
}

/// Widest string length (in bytes) backing an `NC_STRING` attribute
/// value, i.e. the Zarr fixed-width `|S<n>` this attribute needs on V2
/// (spec §4.J / §8 scenario 2: `b=["hello"]` persists as `"|S5"`, not
/// `"|S1"` — the dtype width tracks character count, unlike
/// [`Attribute::length`] which tracks element count for `inq`).
pub fn attribute_max_strlen(value: &Value) -> usize {
    match value {
        Value::String(s) => s.len(),
        Value::Array(items) => items.iter().map(|v| v.as_str().map(str::len).unwrap_or(0)).max().unwrap_or(0),
        _ => 0,
    }
}

/// Spec GLOSSARY "JSON convention": stringify a complex JSON value and
/// mark the resulting `NC_CHAR` attribute as carrying the convention.
pub fn json_convention_write(value: &Value) -> NczResult<String> {
    serde_json::to_string(value).map_err(NczError::from)
}

/// Reverse of [`json_convention_write`]: parse the stored string back
/// into the original JSON shape (used when reading with JSON coercion;
/// the default interface instead returns the raw stringified text).
pub fn json_convention_read(text: &str) -> NczResult<Value> {
    serde_json::from_str(text).map_err(NczError::from)
}

/// Result of storing an attribute: either an ordinary `(name, value)`
/// pair, or an interception that also mutated variable state.
pub enum StoreOutcome {
    Stored(Attribute),
    /// `_FillValue` both sets the attribute and updates the variable's
    /// fill policy, invalidating its cached fill chunk.
    FillValueSet(Attribute),
}

/// Store an attribute value, applying type inference if `nctype` is
/// `None`, and intercepting reserved names per spec §4.J.
pub fn store_attribute(name: &str, value: Value, nctype: Option<NcType>, var: Option<&mut Variable>) -> NczResult<StoreOutcome> {
    if is_readonly_attribute(name) {
        return Err(NczError::Permission(format!("{name} is read-only")));
    }

    let ty = match nctype {
        Some(t) => t,
        None => infer_type(&value)?,
    };

    let length = attribute_length(ty, &value);

    let attr = Attribute {
        name: name.to_string(),
        nctype: ty,
        length,
        value: value.clone(),
    };

    if name == ATTR_FILL_VALUE {
        if let Some(var) = var {
            let fill_bytes = fill_value_bytes(&value, var.nctype)?;
            var.fill_policy = crate::tree::FillPolicy::Value(fill_bytes);
            var.cache.invalidate_fill_chunk();
        }
        return Ok(StoreOutcome::FillValueSet(attr));
    }

    Ok(StoreOutcome::Stored(attr))
}

/// Convert a JSON fill value into its raw byte representation for
/// `var`'s element type, used both to populate `FillPolicy::Value` and
/// to materialize the canonical fill chunk (spec §4.F).
pub fn fill_value_bytes(value: &Value, nctype: NcType) -> NczResult<Vec<u8>> {
    match nctype {
        NcType::Byte => Ok(vec![value.as_i64().unwrap_or(0) as i8 as u8]),
        NcType::UByte => Ok(vec![value.as_u64().unwrap_or(0) as u8]),
        NcType::Short => Ok((value.as_i64().unwrap_or(0) as i16).to_ne_bytes().to_vec()),
        NcType::UShort => Ok((value.as_u64().unwrap_or(0) as u16).to_ne_bytes().to_vec()),
        NcType::Int => Ok((value.as_i64().unwrap_or(0) as i32).to_ne_bytes().to_vec()),
        NcType::UInt => Ok((value.as_u64().unwrap_or(0) as u32).to_ne_bytes().to_vec()),
        NcType::Int64 => Ok(value.as_i64().unwrap_or(0).to_ne_bytes().to_vec()),
        NcType::UInt64 => Ok(value.as_u64().unwrap_or(0).to_ne_bytes().to_vec()),
        NcType::Float => Ok((value.as_f64().unwrap_or(0.0) as f32).to_ne_bytes().to_vec()),
        NcType::Double => Ok(value.as_f64().unwrap_or(0.0).to_ne_bytes().to_vec()),
        NcType::Char | NcType::String | NcType::Json => {
            Err(NczError::BadType("fill value requested for a non-atomic type".into()))
        }
    }
}

/// Build the canonical fill chunk for a variable (spec §4.F): every
/// element equal to the fill value, sized `product(chunk_shape) *
/// element_size`.
pub fn build_fill_chunk(var: &Variable) -> Option<Vec<u8>> {
    let elem_size = var.nctype.atomic_size()?;
    let fill_bytes = match &var.fill_policy {
        crate::tree::FillPolicy::Value(bytes) => bytes.clone(),
        crate::tree::FillPolicy::NoFill => vec![0u8; elem_size],
    };
    let count = var.element_count_per_chunk() as usize;
    Some(materialize_fill_chunk(&fill_bytes, count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn infers_int_for_small_integer() {
        assert_eq!(infer_type(&json!(42)).unwrap(), NcType::Int);
    }

    #[test]
    fn infers_int64_for_large_integer() {
        assert_eq!(infer_type(&json!(5_000_000_000i64)).unwrap(), NcType::Int64);
    }

    #[test]
    fn infers_double_for_float() {
        assert_eq!(infer_type(&json!(3.14)).unwrap(), NcType::Double);
    }

    #[test]
    fn infers_ubyte_for_bool() {
        assert_eq!(infer_type(&json!(true)).unwrap(), NcType::UByte);
    }

    #[test]
    fn infers_char_for_single_string() {
        assert_eq!(infer_type(&json!("hello")).unwrap(), NcType::Char);
    }

    #[test]
    fn infers_char_for_array_of_one_char_strings() {
        assert_eq!(infer_type(&json!(["h", "i"])).unwrap(), NcType::Char);
    }

    #[test]
    fn infers_string_for_array_of_multichar_strings() {
        assert_eq!(infer_type(&json!(["hello", "world"])).unwrap(), NcType::String);
    }

    #[test]
    fn infers_json_for_dict() {
        assert_eq!(infer_type(&json!({"k": 1, "v": [1, 2, 3]})).unwrap(), NcType::Json);
    }

    #[test]
    fn infers_json_for_array_with_nested_array() {
        assert_eq!(infer_type(&json!([1, [2, 3]])).unwrap(), NcType::Json);
    }

    #[test]
    fn rejects_empty_array_and_null() {
        assert!(infer_type(&json!([])).is_err());
        assert!(infer_type(&Value::Null).is_err());
    }

    #[test]
    fn mixed_width_numeric_array_promotes_to_widest() {
        assert_eq!(infer_type(&json!([1, 70000])).unwrap(), NcType::Int);
        assert_eq!(infer_type(&json!([1, 5_000_000_000i64])).unwrap(), NcType::Int64);
    }

    #[test]
    fn charify_concatenates_string_array() {
        let bytes = charify(&json!(["ab", "cd"])).unwrap();
        assert_eq!(bytes, b"abcd");
    }

    #[test]
    fn json_convention_roundtrip() {
        let original = json!({"k": 1, "v": [1, 2, 3]});
        let text = json_convention_write(&original).unwrap();
        let back = json_convention_read(&text).unwrap();
        assert_eq!(original, back);
    }
}
