//! I/O glue (spec §4.M): chunk key construction, fill-chunk
//! materialization. Endianness swap lives in [`crate::codec::bytes_codec`].

use crate::dispatch::FormatVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Separator {
    Dot,
    Slash,
}

impl Separator {
    pub fn as_char(self) -> char {
        match self {
            Separator::Dot => '.',
            Separator::Slash => '/',
        }
    }

    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '.' => Some(Separator::Dot),
            '/' => Some(Separator::Slash),
            _ => None,
        }
    }

    /// As [`Self::from_char`], but accepting the single-character string
    /// form metadata documents actually carry (`"dimension_separator":
    /// "."` / `"separator": "/"`).
    pub fn from_char_str(s: &str) -> Option<Self> {
        let mut chars = s.chars();
        let c = chars.next()?;
        if chars.next().is_some() {
            return None;
        }
        Self::from_char(c)
    }

    /// Spec §3: default separator is `.` for V2, `/` for V3.
    pub fn default_for(version: FormatVersion) -> Self {
        match version {
            FormatVersion::V2 => Separator::Dot,
            FormatVersion::V3 => Separator::Slash,
        }
    }
}

/// The physical chunk-key addressing scheme, independent of the
/// separator character (spec §4.H): a V3 array's own
/// `chunk_key_encoding.name` selects between these two, and V2's native
/// scheme is always [`Self::V2`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkKeyScheme {
    /// V3 "default": `"c"` prefix before separator-joined indices.
    Default,
    /// V3 "v2", and V2's own native scheme: no prefix.
    V2,
}

impl ChunkKeyScheme {
    pub fn default_for(version: FormatVersion) -> Self {
        match version {
            FormatVersion::V2 => ChunkKeyScheme::V2,
            FormatVersion::V3 => ChunkKeyScheme::Default,
        }
    }
}

/// Build the on-disk chunk key for chunk index `indices`, per spec §3:
/// - `V2` scheme: `join(sep, [str(K[0]), ..., str(K[r-1])])`, or `"0"`
///   for scalar.
/// - `Default` scheme: `"c" + sep + join(sep, indices)`, or `"c"` for
///   scalar.
pub fn build_chunk_key(scheme: ChunkKeyScheme, indices: &[u64], sep: Separator) -> String {
    if indices.is_empty() {
        return match scheme {
            ChunkKeyScheme::V2 => "0".to_string(),
            ChunkKeyScheme::Default => "c".to_string(),
        };
    }
    let sep_char = sep.as_char();
    let joined = indices
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(&sep_char.to_string());
    match scheme {
        ChunkKeyScheme::V2 => joined,
        ChunkKeyScheme::Default => format!("c{sep_char}{joined}"),
    }
}

/// Materialize a chunk-sized buffer where every element equals
/// `fill_value_bytes` (spec §4.F "fill chunk").
pub fn materialize_fill_chunk(fill_value_bytes: &[u8], element_count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(fill_value_bytes.len() * element_count);
    for _ in 0..element_count {
        out.extend_from_slice(fill_value_bytes);
    }
    out
}

/// Overwrite `dst` with `src`, where elements are `NC_STRING` pointers
/// represented as owned `String`s. Spec §4.M: "copy_data respecting
/// that NC_STRING overwrite must free previous strings" — in Rust this
/// is simply drop-and-replace; there is no separate free step, but we
/// keep this as an explicit named operation so call sites documenting
/// the netCDF contract have a single place pointing at it.
pub fn copy_string_data(dst: &mut Vec<String>, src: Vec<String>) {
    *dst = src;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_chunk_key_joins_with_separator() {
        let key = build_chunk_key(ChunkKeyScheme::V2, &[1, 2, 3], Separator::Dot);
        assert_eq!(key, "1.2.3");
    }

    #[test]
    fn v3_chunk_key_has_c_prefix() {
        let key = build_chunk_key(ChunkKeyScheme::Default, &[1, 2, 3], Separator::Slash);
        assert_eq!(key, "c/1/2/3");
    }

    #[test]
    fn v3_variable_declaring_v2_scheme_omits_c_prefix() {
        let key = build_chunk_key(ChunkKeyScheme::V2, &[1, 2, 3], Separator::Dot);
        assert_eq!(key, "1.2.3");
    }

    #[test]
    fn scalar_chunk_keys() {
        assert_eq!(build_chunk_key(ChunkKeyScheme::V2, &[], Separator::Dot), "0");
        assert_eq!(build_chunk_key(ChunkKeyScheme::Default, &[], Separator::Slash), "c");
    }

    #[test]
    fn chunk_key_is_injective_in_coords_and_separator() {
        let a = build_chunk_key(ChunkKeyScheme::V2, &[1, 23], Separator::Dot);
        let b = build_chunk_key(ChunkKeyScheme::V2, &[12, 3], Separator::Dot);
        assert_ne!(a, b);
    }

    #[test]
    fn fill_chunk_replicates_fill_value() {
        let fill = materialize_fill_chunk(&[0xAB, 0xCD], 3);
        assert_eq!(fill, vec![0xAB, 0xCD, 0xAB, 0xCD, 0xAB, 0xCD]);
    }
}
