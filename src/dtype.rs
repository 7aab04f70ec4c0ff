//! Type projector (spec §4.C): nctype ↔ Zarr dtype string, per format version.
//!
//! Grounded on the teacher's `DataType`/`IntSize`/`FloatSize` enums
//! (`clbarnes-zarr3-rs/src/data_type/mod.rs`), generalized from a
//! Zarr-V3-only numeric type space to the full netCDF atomic set plus
//! the three alias cases (`char`, `string`, `json`) that Zarr's type
//! space does not natively distinguish.

use crate::error::{NczError, NczResult};
use serde::{Deserialize, Serialize};

/// An atomic netCDF type, or one of the three non-atomic forms this
/// engine must still round-trip through Zarr's narrower type space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NcType {
    Byte,
    UByte,
    Short,
    UShort,
    Int,
    UInt,
    Int64,
    UInt64,
    Float,
    Double,
    /// Variable-length UTF-8 string (`NC_STRING`).
    String,
    /// Fixed-width character array (`NC_CHAR`).
    Char,
    /// JSON-convention attribute: a complex JSON value stringified and
    /// tagged, per spec §4.J / GLOSSARY.
    Json,
}

/// Tag recorded in `_nczarr_array.type_alias` (V3) to disambiguate the
/// cases where a Zarr dtype is coarser than the netCDF type it encodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeAlias {
    Char,
    String,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
    Native,
}

impl Endian {
    /// Spec §9 open question: `NC_ENDIAN_NATIVE` is always rewritten to a
    /// concrete little/big value for the V3 `bytes` codec, but left as-is
    /// (as `NATIVE`) for V2, whose dtype prefix already derives from the
    /// host's native order at write time by convention.
    pub fn resolved(self) -> ConcreteEndian {
        match self {
            Endian::Little => ConcreteEndian::Little,
            Endian::Big => ConcreteEndian::Big,
            Endian::Native => {
                #[cfg(target_endian = "big")]
                {
                    ConcreteEndian::Big
                }
                #[cfg(target_endian = "little")]
                {
                    ConcreteEndian::Little
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConcreteEndian {
    Little,
    Big,
}

impl NcType {
    /// Size in bytes of one element, for the atomic numeric types.
    /// `String`/`Char`/`Json` have no fixed element size at this layer.
    pub fn atomic_size(self) -> Option<usize> {
        match self {
            NcType::Byte | NcType::UByte => Some(1),
            NcType::Short | NcType::UShort => Some(2),
            NcType::Int | NcType::UInt | NcType::Float => Some(4),
            NcType::Int64 | NcType::UInt64 | NcType::Double => Some(8),
            NcType::String | NcType::Char | NcType::Json => None,
        }
    }

    pub fn is_atomic(self) -> bool {
        self.atomic_size().is_some()
    }

    fn numeric_kind(self) -> Option<(char, usize)> {
        match self {
            NcType::Byte => Some(('i', 1)),
            NcType::UByte => Some(('u', 1)),
            NcType::Short => Some(('i', 2)),
            NcType::UShort => Some(('u', 2)),
            NcType::Int => Some(('i', 4)),
            NcType::UInt => Some(('u', 4)),
            NcType::Int64 => Some(('i', 8)),
            NcType::UInt64 => Some(('u', 8)),
            NcType::Float => Some(('f', 4)),
            NcType::Double => Some(('f', 8)),
            _ => None,
        }
    }

    /// Zarr V2 dtype string, e.g. `"<i4"`, `">S1"` (char), `"|S5"`
    /// (fixed string of length 5), `"|J0"` (JSON convention).
    pub fn to_v2_dtype(self, endian: ConcreteEndian, max_strlen: usize) -> String {
        match self {
            NcType::Char => ">S1".to_string(),
            NcType::String => format!("|S{}", max_strlen.max(1)),
            NcType::Json => "|J0".to_string(),
            _ => {
                let (kind, size) = self.numeric_kind().expect("atomic numeric type");
                let prefix = match endian {
                    ConcreteEndian::Little => '<',
                    ConcreteEndian::Big => '>',
                };
                format!("{prefix}{kind}{size}")
            }
        }
    }

    /// Reverse of [`Self::to_v2_dtype`]. Returns `(type, max_strlen)`;
    /// `max_strlen` is meaningful only for `String`.
    ///
    /// Per spec §4.C: "if a Zarr dtype is ambiguous and no alias is
    /// present, choose the atomic nctype" — V2 has no separate alias
    /// channel, so the three special prefixes (`>S1`, `|S<n>`, `|J0`)
    /// are the only ambiguity-resolution mechanism available.
    pub fn from_v2_dtype(s: &str) -> NczResult<(NcType, usize)> {
        if s == ">S1" {
            return Ok((NcType::Char, 1));
        }
        if s == "|J0" {
            return Ok((NcType::Json, 0));
        }
        if let Some(rest) = s.strip_prefix("|S") {
            let n: usize = rest
                .parse()
                .map_err(|_| NczError::BadType(format!("bad fixed-string dtype {s}")))?;
            return Ok((NcType::String, n));
        }
        let mut chars = s.chars();
        let endian_ch = chars.next().ok_or_else(|| NczError::BadType(s.to_string()))?;
        if !matches!(endian_ch, '<' | '>' | '|') {
            return Err(NczError::BadType(format!("bad dtype prefix in {s}")));
        }
        let kind = chars.next().ok_or_else(|| NczError::BadType(s.to_string()))?;
        let size: usize = chars
            .as_str()
            .parse()
            .map_err(|_| NczError::BadType(format!("bad dtype size in {s}")))?;
        let ty = match (kind, size) {
            ('i', 1) => NcType::Byte,
            ('u', 1) => NcType::UByte,
            ('i', 2) => NcType::Short,
            ('u', 2) => NcType::UShort,
            ('i', 4) => NcType::Int,
            ('u', 4) => NcType::UInt,
            ('i', 8) => NcType::Int64,
            ('u', 8) => NcType::UInt64,
            ('f', 4) => NcType::Float,
            ('f', 8) => NcType::Double,
            _ => return Err(NczError::BadType(format!("unrecognised dtype {s}"))),
        };
        Ok((ty, 0))
    }

    /// The endianness encoded in a V2 dtype string's `<`/`>` prefix, for
    /// the atomic numeric dtypes. `None` for the char/string/json special
    /// forms, which carry no endianness of their own.
    pub fn v2_dtype_endian(s: &str) -> Option<ConcreteEndian> {
        match s.chars().next()? {
            '<' => Some(ConcreteEndian::Little),
            '>' if s != ">S1" => Some(ConcreteEndian::Big),
            _ => None,
        }
    }

    /// Canonical Zarr V3 `data_type` name plus the alias tag (if any)
    /// that must be persisted in `_nczarr_array.type_alias` to recover
    /// the exact netCDF type on read.
    pub fn to_v3_dtype(self, max_strlen: usize) -> (String, Option<TypeAlias>) {
        match self {
            NcType::Byte => ("int8".to_string(), None),
            NcType::UByte => ("uint8".to_string(), None),
            NcType::Short => ("int16".to_string(), None),
            NcType::UShort => ("uint16".to_string(), None),
            NcType::Int => ("int32".to_string(), None),
            NcType::UInt => ("uint32".to_string(), None),
            NcType::Int64 => ("int64".to_string(), None),
            NcType::UInt64 => ("uint64".to_string(), None),
            NcType::Float => ("float32".to_string(), None),
            NcType::Double => ("float64".to_string(), None),
            NcType::Char => ("uint8".to_string(), Some(TypeAlias::Char)),
            NcType::Json => ("uint8".to_string(), Some(TypeAlias::Json)),
            NcType::String => (format!("r{}", max_strlen.max(1) * 8), Some(TypeAlias::String)),
        }
    }

    /// Reverse of [`Self::to_v3_dtype`]. `max_strlen` is populated only
    /// for the `r<bits>`/string case.
    pub fn from_v3_dtype(s: &str, alias: Option<TypeAlias>) -> NczResult<(NcType, usize)> {
        match alias {
            Some(TypeAlias::Char) if s == "uint8" => return Ok((NcType::Char, 1)),
            Some(TypeAlias::Json) if s == "uint8" => return Ok((NcType::Json, 0)),
            Some(TypeAlias::String) => {
                let bits: usize = s
                    .strip_prefix('r')
                    .ok_or_else(|| NczError::BadType(format!("expected r<bits>, got {s}")))?
                    .parse()
                    .map_err(|_| NczError::BadType(format!("bad raw-bits dtype {s}")))?;
                return Ok((NcType::String, (bits + 7) / 8));
            }
            _ => {}
        }
        // No alias (or alias didn't match the dtype): pick the atomic
        // nctype per spec §4.C's ambiguity-resolution rule.
        let ty = match s {
            "int8" => NcType::Byte,
            "uint8" => NcType::UByte,
            "int16" => NcType::Short,
            "uint16" => NcType::UShort,
            "int32" => NcType::Int,
            "uint32" => NcType::UInt,
            "int64" => NcType::Int64,
            "uint64" => NcType::UInt64,
            "float32" => NcType::Float,
            "float64" => NcType::Double,
            other if other.starts_with('r') => {
                let bits: usize = other[1..]
                    .parse()
                    .map_err(|_| NczError::BadType(format!("bad raw-bits dtype {s}")))?;
                return Ok((NcType::String, (bits + 7) / 8));
            }
            other => return Err(NczError::BadType(format!("unrecognised v3 data_type {other}"))),
        };
        Ok((ty, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_numeric_roundtrip() {
        for ty in [
            NcType::Byte,
            NcType::UByte,
            NcType::Short,
            NcType::UShort,
            NcType::Int,
            NcType::UInt,
            NcType::Int64,
            NcType::UInt64,
            NcType::Float,
            NcType::Double,
        ] {
            let s = ty.to_v2_dtype(ConcreteEndian::Little, 0);
            let (back, _) = NcType::from_v2_dtype(&s).unwrap();
            assert_eq!(ty, back, "roundtrip failed for {s}");
        }
    }

    #[test]
    fn v2_char_string_json_aliasing() {
        assert_eq!(NcType::Char.to_v2_dtype(ConcreteEndian::Little, 0), ">S1");
        assert_eq!(NcType::from_v2_dtype(">S1").unwrap().0, NcType::Char);

        assert_eq!(NcType::String.to_v2_dtype(ConcreteEndian::Little, 5), "|S5");
        let (ty, len) = NcType::from_v2_dtype("|S5").unwrap();
        assert_eq!(ty, NcType::String);
        assert_eq!(len, 5);

        assert_eq!(NcType::Json.to_v2_dtype(ConcreteEndian::Little, 0), "|J0");
        assert_eq!(NcType::from_v2_dtype("|J0").unwrap().0, NcType::Json);
    }

    #[test]
    fn v3_alias_roundtrip() {
        let (s, alias) = NcType::Char.to_v3_dtype(0);
        assert_eq!(s, "uint8");
        assert_eq!(alias, Some(TypeAlias::Char));
        assert_eq!(NcType::from_v3_dtype(&s, alias).unwrap().0, NcType::Char);

        let (s, alias) = NcType::String.to_v3_dtype(10);
        let (ty, len) = NcType::from_v3_dtype(&s, alias).unwrap();
        assert_eq!(ty, NcType::String);
        assert_eq!(len, 10);
    }

    #[test]
    fn v3_ambiguous_without_alias_picks_atomic() {
        // uint8 with no alias present is plain NC_UBYTE, not NC_CHAR.
        let (ty, _) = NcType::from_v3_dtype("uint8", None).unwrap();
        assert_eq!(ty, NcType::UByte);
    }

    #[test]
    fn native_endian_resolves_to_concrete() {
        let resolved = Endian::Native.resolved();
        assert!(matches!(resolved, ConcreteEndian::Little | ConcreteEndian::Big));
    }
}
