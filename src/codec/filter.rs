//! Filter pipeline (spec §4.E): an ordered per-variable filter chain
//! translating between the HDF5-style filter form and the Zarr codec
//! JSON list, grounded on the teacher's `CodecChain`
//! (`clbarnes-zarr3-rs/src/codecs/mod.rs`) but flattened: NCZarr does
//! not expose the array-to-array / array-to-bytes / bytes-to-bytes
//! split to its callers, so this engine models one flat ordered chain
//! with the V3 pseudo-`bytes` member pinned at index 0.

use serde_json::Value;

use super::registry::{lookup_by_codec_id, lookup_by_hdf5_id, not_found_error};
use crate::dtype::ConcreteEndian;
use crate::error::{NczError, NczResult};

#[derive(Debug, Clone, Default)]
pub struct FilterFlags {
    pub has_visible_params: bool,
    pub has_working_params: bool,
    /// True when no matching native plugin could be found; the filter's
    /// codec JSON is preserved verbatim but it cannot transform bytes.
    pub incomplete: bool,
}

/// One entry in a variable's filter chain.
#[derive(Debug, Clone)]
pub struct Filter {
    pub hdf5_id: u32,
    pub visible_params: Vec<u32>,
    pub working_params: Vec<u32>,
    pub codec_id: String,
    pub codec_json: Value,
    pub flags: FilterFlags,
    pub chain_index: usize,
}

impl Filter {
    /// Build the pseudo-`bytes` filter carrying V3 endianness. Never
    /// looked up in the registry; position is always 0 in a V3 chain.
    pub fn bytes_pseudo(endian: ConcreteEndian, chain_index: usize) -> Self {
        let endian_str = match endian {
            ConcreteEndian::Little => "little",
            ConcreteEndian::Big => "big",
        };
        Filter {
            hdf5_id: 0,
            visible_params: Vec::new(),
            working_params: Vec::new(),
            codec_id: "bytes".to_string(),
            codec_json: serde_json::json!({"name": "bytes", "configuration": {"endian": endian_str}}),
            flags: FilterFlags::default(),
            chain_index,
        }
    }

    pub fn is_bytes_pseudo(&self) -> bool {
        self.codec_id == "bytes"
    }

    /// Build a filter entry from its Zarr codec JSON (used by both V2's
    /// `compressor`/`filters` and V3's `codecs` list once the leading
    /// `bytes` entry has been stripped off by the caller).
    pub fn from_codec_json(codec_json: Value, chain_index: usize) -> NczResult<Self> {
        let name = codec_json
            .get("name")
            .or_else(|| codec_json.get("id"))
            .and_then(|v| v.as_str())
            .ok_or_else(|| NczError::Filter("codec entry missing name/id".to_string()))?
            .to_string();

        match lookup_by_codec_id(&name) {
            Some(plugin) => {
                let (hdf5_id, visible_params) = plugin.codec_to_hdf5(&codec_json)?;
                Ok(Filter {
                    hdf5_id,
                    visible_params,
                    working_params: Vec::new(),
                    codec_id: name,
                    codec_json,
                    flags: FilterFlags {
                        has_visible_params: true,
                        has_working_params: false,
                        incomplete: false,
                    },
                    chain_index,
                })
            }
            None => Ok(Filter {
                hdf5_id: 0,
                visible_params: Vec::new(),
                working_params: Vec::new(),
                codec_id: name,
                codec_json,
                flags: FilterFlags {
                    has_visible_params: false,
                    has_working_params: false,
                    incomplete: true,
                },
                chain_index,
            }),
        }
    }

    /// Build a filter entry from an HDF5-style filter spec
    /// `(id, visible_params)`, translating to codec JSON via the
    /// registry. Used when a variable is *created* with native filters
    /// rather than parsed off disk.
    pub fn from_hdf5(hdf5_id: u32, visible_params: Vec<u32>, chain_index: usize) -> NczResult<Self> {
        let plugin = lookup_by_hdf5_id(hdf5_id).ok_or_else(|| not_found_error(&hdf5_id.to_string()))?;
        let codec_json = plugin.hdf5_to_codec(&visible_params)?;
        let codec_id = plugin.codec_id().to_string();
        Ok(Filter {
            hdf5_id,
            visible_params,
            working_params: Vec::new(),
            codec_id,
            codec_json,
            flags: FilterFlags {
                has_visible_params: true,
                has_working_params: false,
                incomplete: false,
            },
            chain_index,
        })
    }

    fn apply(&self, input: &[u8], encode: bool) -> NczResult<Vec<u8>> {
        if self.is_bytes_pseudo() {
            return Ok(input.to_vec());
        }
        if self.flags.incomplete {
            return Err(NczError::Filter(format!(
                "codec {} has no matching native plugin",
                self.codec_id
            )));
        }
        let plugin = lookup_by_codec_id(&self.codec_id).ok_or_else(|| not_found_error(&self.codec_id))?;
        plugin.apply(input, encode, &self.codec_json)
    }
}

/// Ordered chain of filters for one variable.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    pub filters: Vec<Filter>,
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>) -> Self {
        Self { filters }
    }

    /// Spec §4.E: a variable is suppressed when it is not fixed-size
    /// and has any non-bytes filter, or when any non-pseudo filter is
    /// incomplete.
    pub fn suppresses_variable(&self, fixed_size: bool) -> bool {
        let has_non_bytes = self.filters.iter().any(|f| !f.is_bytes_pseudo());
        if !fixed_size && has_non_bytes {
            return true;
        }
        self.filters
            .iter()
            .any(|f| !f.is_bytes_pseudo() && f.flags.incomplete)
    }

    /// Encode: traverse the chain in order.
    pub fn encode(&self, mut bytes: Vec<u8>) -> NczResult<Vec<u8>> {
        for filter in &self.filters {
            bytes = filter.apply(&bytes, true)?;
        }
        Ok(bytes)
    }

    /// Decode: traverse the chain in reverse.
    pub fn decode(&self, mut bytes: Vec<u8>) -> NczResult<Vec<u8>> {
        for filter in self.filters.iter().rev() {
            bytes = filter.apply(&bytes, false)?;
        }
        Ok(bytes)
    }

    /// Emit the chain as a Zarr codec JSON array, in chain order,
    /// excluding the V3 pseudo-`bytes` entry (never exposed via
    /// `_Codecs`/`_Filters`).
    pub fn to_codec_json_excluding_pseudo(&self) -> Vec<Value> {
        self.filters
            .iter()
            .filter(|f| !f.is_bytes_pseudo())
            .map(|f| f.codec_json.clone())
            .collect()
    }

    /// Spec V3 invariant: first chain element is the pseudo `bytes`
    /// codec with `endian ∈ {little, big}`.
    pub fn validate_v3_bytes_first(&self) -> NczResult<()> {
        let first = self
            .filters
            .first()
            .ok_or_else(|| NczError::Filter("v3 filter chain must start with bytes codec".into()))?;
        if !first.is_bytes_pseudo() {
            return Err(NczError::Filter("v3 filter chain must start with bytes codec".into()));
        }
        let endian = first
            .codec_json
            .get("configuration")
            .and_then(|c| c.get("endian"))
            .and_then(|v| v.as_str());
        match endian {
            Some("little") | Some("big") => Ok(()),
            _ => Err(NczError::Filter("bytes codec missing valid endian".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::registry;

    fn setup() {
        registry::finalize();
        registry::initialize();
    }

    #[test]
    fn missing_plugin_marks_incomplete_and_preserves_json() {
        setup();
        let json = serde_json::json!({"name": "zstd", "configuration": {"level": 3}});
        let filter = Filter::from_codec_json(json.clone(), 0).unwrap();
        assert!(filter.flags.incomplete);
        assert_eq!(filter.codec_json, json);
    }

    #[test]
    fn gzip_roundtrip_through_chain() {
        setup();
        let json = serde_json::json!({"name": "gzip", "configuration": {"level": 3}});
        let filter = Filter::from_codec_json(json, 0).unwrap();
        let chain = FilterChain::new(vec![filter]);
        let data = b"hello world hello world hello world".to_vec();
        let encoded = chain.encode(data.clone()).unwrap();
        let decoded = chain.decode(encoded).unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn v3_chain_requires_bytes_first() {
        let chain = FilterChain::new(vec![Filter::bytes_pseudo(ConcreteEndian::Little, 0)]);
        assert!(chain.validate_v3_bytes_first().is_ok());

        let bad = FilterChain::new(vec![]);
        assert!(bad.validate_v3_bytes_first().is_err());
    }

    #[test]
    fn incomplete_non_bytes_filter_suppresses_variable() {
        setup();
        let json = serde_json::json!({"name": "zstd"});
        let filter = Filter::from_codec_json(json, 1).unwrap();
        let chain = FilterChain::new(vec![Filter::bytes_pseudo(ConcreteEndian::Little, 0), filter]);
        assert!(chain.suppresses_variable(true));
    }
}
