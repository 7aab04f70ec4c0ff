//! Process-wide codec plugin registry (spec §4.D), modeled as the
//! "lazily-initialized singleton with explicit initialize/finalize"
//! that spec §9 calls for in place of the original's global mutable
//! state — grounded on the teacher's closed `CodecChain`
//! (`clbarnes-zarr3-rs/src/codecs/mod.rs`) generalized to a runtime,
//! open-ended registry, since the spec requires that an unrecognised
//! codec id be preserved rather than rejected.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use serde_json::Value;

use crate::error::{NczError, NczResult};

/// Translates between the HDF5-style filter form (numeric id + binary
/// "visible parameters") and the Zarr codec JSON form.
pub trait CodecPlugin: Send + Sync {
    /// The HDF5 filter id this plugin handles.
    fn hdf5_id(&self) -> u32;

    /// The Zarr codec id/name this plugin handles.
    fn codec_id(&self) -> &str;

    /// `visible_params` → codec JSON (`_Codecs`/`codecs[]` entry).
    fn hdf5_to_codec(&self, visible_params: &[u32]) -> NczResult<Value>;

    /// codec JSON → `(hdf5_id, visible_params)`.
    fn codec_to_hdf5(&self, codec_json: &Value) -> NczResult<(u32, Vec<u32>)>;

    /// Apply the filter to a chunk's bytes (encode on write, decode on
    /// read). `codec_json` is the calling filter's own configuration
    /// (e.g. a per-filter `level`), not just this plugin's defaults —
    /// the registry holds one shared plugin instance per codec id, but
    /// each variable's filter can configure it differently.
    fn apply(&self, input: &[u8], encode: bool, codec_json: &Value) -> NczResult<Vec<u8>>;
}

struct Registry {
    by_codec_id: HashMap<String, Arc<dyn CodecPlugin>>,
    by_hdf5_id: HashMap<u32, Arc<dyn CodecPlugin>>,
}

static REGISTRY: OnceLock<RwLock<Registry>> = OnceLock::new();

fn registry() -> &'static RwLock<Registry> {
    REGISTRY.get_or_init(|| {
        RwLock::new(Registry {
            by_codec_id: HashMap::new(),
            by_hdf5_id: HashMap::new(),
        })
    })
}

/// Register built-in plugins (`gzip` when the `gzip` feature is on).
/// Idempotent; safe to call repeatedly (e.g. once per test).
pub fn initialize() {
    let mut reg = registry().write().unwrap();
    #[cfg(feature = "gzip")]
    {
        let plugin: Arc<dyn CodecPlugin> = Arc::new(super::gzip_codec::GzipCodec::default());
        reg.by_codec_id.insert(plugin.codec_id().to_string(), plugin.clone());
        reg.by_hdf5_id.insert(plugin.hdf5_id(), plugin);
    }
}

/// Drop every registered plugin. Exposed so tests can reset global state.
pub fn finalize() {
    let mut reg = registry().write().unwrap();
    reg.by_codec_id.clear();
    reg.by_hdf5_id.clear();
}

pub fn register(plugin: Arc<dyn CodecPlugin>) {
    let mut reg = registry().write().unwrap();
    reg.by_hdf5_id.insert(plugin.hdf5_id(), plugin.clone());
    reg.by_codec_id.insert(plugin.codec_id().to_string(), plugin);
}

pub fn lookup_by_codec_id(id: &str) -> Option<Arc<dyn CodecPlugin>> {
    registry().read().unwrap().by_codec_id.get(id).cloned()
}

pub fn lookup_by_hdf5_id(id: u32) -> Option<Arc<dyn CodecPlugin>> {
    registry().read().unwrap().by_hdf5_id.get(&id).cloned()
}

/// Error helper for the common "plugin not found" case; callers decide
/// whether that's fatal (strict mode) or whether to mark the filter
/// incomplete (spec §4.D/§4.E default).
pub fn not_found_error(id: &str) -> NczError {
    NczError::Filter(format!("no codec plugin registered for id {id}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_then_lookup_gzip() {
        finalize();
        initialize();
        #[cfg(feature = "gzip")]
        {
            assert!(lookup_by_codec_id("gzip").is_some());
            assert!(lookup_by_hdf5_id(1).is_some());
        }
        finalize();
        assert!(lookup_by_codec_id("gzip").is_none());
        initialize();
    }
}
