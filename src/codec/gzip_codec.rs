//! The one concrete compressor the crate ships (spec §1 treats real
//! compressor bodies as an external collaborator, but the filter
//! pipeline needs at least one working plugin to exercise end to end).
//! Grounded on `clbarnes-zarr3-rs/src/codecs/bb/gzip_codec.rs`.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use super::registry::CodecPlugin;
use crate::error::{NczError, NczResult};

/// HDF5 filter id registered for gzip/deflate in the HDF5 filter registry.
pub const HDF5_GZIP_ID: u32 = 1;

pub struct GzipCodec {
    default_level: u32,
}

impl Default for GzipCodec {
    fn default() -> Self {
        Self { default_level: 6 }
    }
}

impl CodecPlugin for GzipCodec {
    fn hdf5_id(&self) -> u32 {
        HDF5_GZIP_ID
    }

    fn codec_id(&self) -> &str {
        "gzip"
    }

    fn hdf5_to_codec(&self, visible_params: &[u32]) -> NczResult<Value> {
        let level = visible_params.first().copied().unwrap_or(self.default_level);
        Ok(json!({"name": "gzip", "configuration": {"level": level}}))
    }

    fn codec_to_hdf5(&self, codec_json: &Value) -> NczResult<(u32, Vec<u32>)> {
        Ok((HDF5_GZIP_ID, vec![self.level(codec_json)]))
    }

    fn apply(&self, input: &[u8], encode: bool, codec_json: &Value) -> NczResult<Vec<u8>> {
        if encode {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::new(self.level(codec_json)));
            encoder
                .write_all(input)
                .map_err(|e| NczError::Filter(format!("gzip encode failed: {e}")))?;
            encoder
                .finish()
                .map_err(|e| NczError::Filter(format!("gzip encode failed: {e}")))
        } else {
            let mut decoder = GzDecoder::new(input);
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| NczError::Filter(format!("gzip decode failed: {e}")))?;
            Ok(out)
        }
    }
}

impl GzipCodec {
    /// The compression level a specific filter instance was configured
    /// with, falling back to this plugin's default when `codec_json`
    /// carries none (e.g. a bare `{"name": "gzip"}`).
    fn level(&self, codec_json: &Value) -> u32 {
        codec_json
            .get("configuration")
            .and_then(|c| c.get("level"))
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(self.default_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let codec = GzipCodec::default();
        let json = json!({"name": "gzip", "configuration": {"level": 6}});
        let data = b"the quick brown fox jumps over the lazy dog".repeat(4);
        let compressed = codec.apply(&data, true, &json).unwrap();
        let decompressed = codec.apply(&compressed, false, &json).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn hdf5_codec_translation_roundtrip() {
        let codec = GzipCodec::default();
        let json = codec.hdf5_to_codec(&[9]).unwrap();
        let (id, params) = codec.codec_to_hdf5(&json).unwrap();
        assert_eq!(id, HDF5_GZIP_ID);
        assert_eq!(params, vec![9]);
    }

    #[test]
    fn apply_honors_configured_level_over_plugin_default() {
        let codec = GzipCodec::default();
        let data = b"the quick brown fox jumps over the lazy dog".repeat(16);
        let low = json!({"name": "gzip", "configuration": {"level": 1}});
        let high = json!({"name": "gzip", "configuration": {"level": 9}});
        let at_low = codec.apply(&data, true, &low).unwrap();
        let at_high = codec.apply(&data, true, &high).unwrap();
        assert_ne!(at_low.len(), at_high.len());
        assert_eq!(codec.apply(&at_high, false, &high).unwrap(), data);
    }
}
