//! An NCZarr storage engine: the netCDF-4 data model (groups,
//! dimensions, variables, attributes, atomic types, chunked arrays,
//! compression filters) projected onto Zarr V2 and V3 object layouts
//! through a pluggable key-value [`map`] abstraction.
//!
//! A [`Dataset`](tree::Dataset) opens against any [`map::Map`]
//! implementation (in-memory, local filesystem, or read-only HTTP) and
//! is format-agnostic at the API level: [`dispatch::detect`] decides
//! once, at open time, whether the bytes underneath are Zarr V2 or V3,
//! and every subsequent metadata operation is indirected through the
//! matching [`dispatch::FormatCodec`].

pub mod attr;
pub mod cache;
pub mod chunkio;
pub mod chunkkey;
pub mod codec;
pub mod dispatch;
pub mod dtype;
pub mod error;
pub mod json;
pub mod map;
pub mod metadata;
pub mod plugin;
pub mod tree;
pub mod url;

use std::sync::Arc;

pub use error::{NczError, NczResult};

use dispatch::{detect, FormatVersion};
use map::Map;
use tree::Dataset;
use url::{parse_fragment, DatasetFlags, UrlMode};

/// Open an existing dataset against `map`, auto-detecting its format
/// (spec §4.I), with optional URL-fragment overrides (spec §6, e.g.
/// `"mode=nczarr,xarray,v2"`).
pub fn open(map: Arc<dyn Map>, fragment: &str, read_only: bool) -> NczResult<Dataset> {
    codec::registry::initialize();
    let mode = parse_fragment(fragment);
    let version = detect(map.as_ref(), mode.forced_format)?;
    let fmt = metadata::codec_for(version);
    let mut dataset = fmt.read_meta(map, mode.flags)?;
    dataset.read_only = read_only;
    Ok(dataset)
}

/// Create a brand-new dataset at `map`'s root, in the format selected
/// by `fragment` (defaulting to V3 when no `v2`/`v3` token is given).
pub fn create(map: Arc<dyn Map>, fragment: &str) -> NczResult<Dataset> {
    codec::registry::initialize();
    let UrlMode { flags, forced_format } = parse_fragment(fragment);
    let version = forced_format.unwrap_or(FormatVersion::V3);
    let dataset = Dataset::new(map, version, flags, false);
    write_meta(&dataset)?;
    Ok(dataset)
}

/// Flush the full metadata tree for `dataset` through its format
/// codec. Chunk data is flushed independently as each [`cache::ChunkCache`]
/// evicts or is explicitly synced; this only covers `.z*`/`zarr.json`
/// documents.
pub fn write_meta(dataset: &Dataset) -> NczResult<()> {
    metadata::codec_for(dataset.format).write_meta(dataset)
}

/// Close a dataset, releasing its map handle. `delete` requests the
/// backing storage itself be removed (spec §4.A, meaningful only for
/// owned-lifetime backends). Flushes every variable's dirty chunks
/// first (spec §3: "close must flush all dirty groups/vars").
pub fn close(dataset: Dataset, delete: bool) -> NczResult<()> {
    chunkio::flush_dataset(&dataset)?;
    dataset.map.close(delete)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

pub const VERSION: Version = Version { major: 0, minor: 1, patch: 0 };
