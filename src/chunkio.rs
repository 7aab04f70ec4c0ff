//! Chunk I/O glue: wires the chunk cache (§4.F), the map (§4.A), and
//! the filter pipeline (§4.E) together for one variable, implementing
//! spec §2's "read chunk"/"write chunk" data flow on top of the key
//! building and fill-chunk materialization already in [`crate::chunkkey`].

use std::sync::Arc;

use crate::cache::{ChunkCache, FlushFn};
use crate::chunkkey::{build_chunk_key, ChunkKeyScheme, Separator};
use crate::codec::bytes_codec::{from_disk_endian, to_disk_endian};
use crate::codec::{Filter, FilterChain};
use crate::dispatch::{FormatCodec, FormatVersion};
use crate::dtype::{ConcreteEndian, Endian, NcType};
use crate::error::{NczError, NczResult};
use crate::map::{join, Map};
use crate::tree::{Dataset, FillPolicy, QuantizeMode, StorageKind, VarState, Variable};

/// Build the flush closure installed on a variable's chunk cache at
/// open/create time: on eviction of a dirty chunk, swap the cached
/// native-order bytes to on-disk endianness, encode them through the
/// filter chain, and write them to `map` at the chunk's on-disk key.
///
/// Captures a clone of the chain/sep/scheme/endian as they stood when
/// the variable was constructed — consistent with this crate's model of
/// a variable's filter chain and endianness as fixed at creation (spec
/// §3 lists no operation that alters an existing variable's filter
/// chain).
pub fn make_flush_fn(
    map: Arc<dyn Map>,
    var_prefix: String,
    scheme: ChunkKeyScheme,
    sep: Separator,
    chain: FilterChain,
    nctype: NcType,
    endian: ConcreteEndian,
) -> Box<FlushFn> {
    Box::new(move |indices: &[u64], raw: &[u8]| -> NczResult<()> {
        let mut buf = raw.to_vec();
        if let Some(elem_size) = nctype.atomic_size() {
            to_disk_endian(&mut buf, elem_size, endian);
        }
        let encoded = chain.encode(buf)?;
        let key = join(&var_prefix, &build_chunk_key(scheme, indices, sep));
        map.write(&key, &encoded)
    })
}

/// Read one chunk of `var`, decoding through its filter chain and
/// swapping disk endianness back to native order. An absent chunk key
/// is not an error (spec §3 "Cache entry" / §4.F "Fill chunk"): it
/// falls back to the variable's canonical fill chunk, materializing one
/// on first use if the cache doesn't have it yet.
pub fn read_chunk(
    map: &dyn Map,
    var_prefix: &str,
    var: &Variable,
    codec: &dyn FormatCodec,
    indices: &[u64],
) -> NczResult<Vec<u8>> {
    if var.is_suppressed() {
        return Err(NczError::Filter(format!("variable {} is suppressed", var.name)));
    }
    let key = join(var_prefix, &codec.build_chunkkey(var, indices));
    let endian = var.endian.resolved();
    var.cache.get_or_build(&indices.to_vec(), || match map.read(&key, 0, None) {
        Ok(encoded) => {
            let mut decoded = var.filters.decode(encoded)?;
            if let Some(elem_size) = var.nctype.atomic_size() {
                from_disk_endian(&mut decoded, elem_size, endian);
            }
            Ok(decoded)
        }
        Err(NczError::EmptyObject(_)) => fill_chunk_for(var),
        Err(e) => Err(e),
    })
}

fn fill_chunk_for(var: &Variable) -> NczResult<Vec<u8>> {
    if let Some(buf) = var.cache.fill_chunk() {
        return Ok(buf);
    }
    let buf = crate::attr::build_fill_chunk(var)
        .ok_or_else(|| NczError::BadType("no fill chunk available for non-atomic type".into()))?;
    var.cache.set_fill_chunk(buf.clone());
    Ok(buf)
}

/// Stage one chunk's raw native-order bytes into `var`'s cache, marking
/// it dirty. Encoding and the map write happen later, on eviction or
/// explicit flush, via the closure installed by [`make_flush_fn`].
pub fn write_chunk(var: &Variable, indices: &[u64], raw: Vec<u8>) -> NczResult<()> {
    if var.is_suppressed() {
        return Err(NczError::Filter(format!("variable {} is suppressed", var.name)));
    }
    var.cache.mark_dirty(&indices.to_vec(), raw)
}

/// Flush every variable's chunk cache transitively under `group`, per
/// spec §3's "close must flush all dirty groups/vars".
pub fn flush_group(group: &crate::tree::Group) -> NczResult<()> {
    for var in &group.vars {
        var.cache.flush_all()?;
    }
    for child in &group.groups {
        flush_group(child)?;
    }
    Ok(())
}

/// Flush every chunk cache in `dataset`, used by [`crate::close`] before
/// the underlying map is released.
pub fn flush_dataset(dataset: &Dataset) -> NczResult<()> {
    flush_group(&dataset.root)
}

/// Declarative description of a new variable, consumed by
/// [`define_variable`]. Mirrors the fields an `nc_def_var` call would
/// take; `filters` excludes the V3 pseudo-`bytes` entry, which is
/// synthesized automatically for a V3 dataset.
pub struct VariableSpec {
    pub name: String,
    pub nctype: NcType,
    pub shape: Vec<u64>,
    pub chunk_shape: Vec<u64>,
    pub dim_ids: Vec<usize>,
    pub dim_fqns: Vec<String>,
    pub endian: Endian,
    pub fill_policy: FillPolicy,
    pub filters: Vec<Filter>,
    pub max_strlen: usize,
    pub cache_byte_budget: u64,
}

impl VariableSpec {
    /// A variable with no filters, no declared fill value, native
    /// endianness, and a 16 MiB chunk cache budget — the common case for
    /// tests and simple callers.
    pub fn new(name: impl Into<String>, nctype: NcType, shape: Vec<u64>, chunk_shape: Vec<u64>, dim_ids: Vec<usize>, dim_fqns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            nctype,
            shape,
            chunk_shape,
            dim_ids,
            dim_fqns,
            endian: Endian::Native,
            fill_policy: FillPolicy::NoFill,
            filters: Vec::new(),
            max_strlen: 0,
            cache_byte_budget: 16 * 1024 * 1024,
        }
    }
}

/// Build a fully wired [`Variable`] — object-tree fields plus a chunk
/// cache whose flush closure is bound to `dataset`'s map — ready to be
/// added to a group with [`crate::tree::Group::add_variable`].
///
/// `var_prefix` is the variable's key prefix relative to the map root
/// (e.g. `"grp/v"`), matching what the dataset's [`FormatCodec`] will
/// use when building chunk keys.
pub fn define_variable(dataset: &Dataset, var_prefix: &str, spec: VariableSpec) -> NczResult<Variable> {
    let sep = Separator::default_for(dataset.format);
    let endian_concrete = spec.endian.resolved();

    let mut filters = spec.filters;
    if dataset.format == FormatVersion::V3 && filters.first().map(|f| !f.is_bytes_pseudo()).unwrap_or(true) {
        filters.insert(0, Filter::bytes_pseudo(endian_concrete, 0));
        for (i, f) in filters.iter_mut().enumerate() {
            f.chain_index = i;
        }
    }
    let chain = FilterChain::new(filters);
    if dataset.format == FormatVersion::V3 {
        chain.validate_v3_bytes_first()?;
    }

    let scheme = ChunkKeyScheme::default_for(dataset.format);
    let flush = make_flush_fn(
        dataset.map.clone(),
        var_prefix.to_string(),
        scheme,
        sep,
        chain.clone(),
        spec.nctype,
        endian_concrete,
    );
    let cache = Arc::new(ChunkCache::new(spec.cache_byte_budget, flush));

    let var = Variable {
        id: 0,
        name: spec.name,
        nctype: spec.nctype,
        shape: spec.shape,
        chunk_shape: spec.chunk_shape,
        dim_ids: spec.dim_ids,
        dim_fqns: spec.dim_fqns,
        sep,
        chunk_key_scheme: scheme,
        storage: StorageKind::Chunked,
        fill_policy: spec.fill_policy,
        endian: spec.endian,
        filters: chain,
        max_strlen: spec.max_strlen,
        quantize: QuantizeMode::None,
        nsd: 0,
        attributes: Vec::new(),
        state: VarState::Defined,
        cache,
    };
    var.validate_dim_lengths(&dataset.root)?;
    Ok(var)
}
