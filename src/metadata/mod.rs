//! Metadata codecs (spec §4.G V2, §4.H V3): the two [`FormatCodec`]
//! implementations that serialize/deserialize the object tree as Zarr
//! metadata documents plus the `_nczarr_*` extension keys.

pub mod v2;
pub mod v3;

use crate::dispatch::{DynFormatCodec, FormatVersion};
use std::sync::Arc;

pub fn codec_for(version: FormatVersion) -> DynFormatCodec {
    match version {
        FormatVersion::V2 => Arc::new(v2::V2Codec),
        FormatVersion::V3 => Arc::new(v3::V3Codec),
    }
}

/// Read `dimension_separator`/`chunk_key_encoding.configuration.separator`
/// from a parsed metadata value, falling back to the format default and
/// logging a warning on an unrecognised value (spec §9 open question:
/// "fall back to the global default separator and log a warning").
pub fn parse_separator_or_warn(
    raw: Option<&str>,
    version: FormatVersion,
) -> crate::chunkkey::Separator {
    use crate::chunkkey::Separator;
    match raw.and_then(Separator::from_char_str) {
        Some(sep) => sep,
        None => {
            if let Some(bad) = raw {
                log::warn!(
                    "unrecognised dimension_separator {bad:?}, falling back to format default"
                );
            }
            Separator::default_for(version)
        }
    }
}
