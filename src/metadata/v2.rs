//! Zarr V2 metadata codec (spec §4.G).
//!
//! Grounded on the teacher's array/group metadata readers
//! (`clbarnes-zarr3-rs/src/metadata/mod.rs`, `node/group.rs`),
//! generalized to the NCZarr V2 layout: `.zgroup`/`.zarray`/`.zattrs`
//! plus the `_nczarr_group`/`_nczarr_array`/`_nczarr_attrs`/
//! `_nczarr_superblock` extension keys that carry everything the plain
//! Zarr documents don't (dimension references, reserved typing info,
//! the format's own superblock).

use std::sync::Arc;

use serde_json::{json, Map as JsonMap, Value};

use crate::attr::{attribute_length, attribute_max_strlen, fill_value_bytes, infer_type};
use crate::chunkkey::{build_chunk_key, ChunkKeyScheme, Separator};
use crate::codec::{Filter, FilterChain};
use crate::dispatch::{FormatCodec, FormatVersion};
use crate::dtype::{ConcreteEndian, NcType};
use crate::error::{NczError, NczResult};
use crate::map::{join, Map};
use crate::tree::{
    is_hidden_attribute, Attribute, Dataset, FillPolicy, Group, QuantizeMode, StorageKind, VarState,
    Variable, ATTR_FILL_VALUE,
};
use crate::url::DatasetFlags;

pub struct V2Codec;

fn group_prefix(group: &Group) -> String {
    group.path.trim_start_matches('/').to_string()
}

fn nczarr_group_doc(group: &Group) -> Value {
    let mut dims = JsonMap::new();
    for d in &group.dims {
        let v = if d.unlimited {
            json!({"size": d.length, "unlimited": true})
        } else {
            json!(d.length)
        };
        dims.insert(d.name.clone(), v);
    }
    json!({
        "dims": Value::Object(dims),
        "vars": group.vars.iter().map(|v| v.name.clone()).collect::<Vec<_>>(),
        "groups": group.groups.iter().map(|g| g.name.clone()).collect::<Vec<_>>(),
    })
}

fn parse_dims_doc(value: &Value) -> Vec<(String, u64, bool)> {
    let mut out = Vec::new();
    if let Some(obj) = value.as_object() {
        for (name, v) in obj {
            match v {
                Value::Object(o) => {
                    let size = o.get("size").and_then(|s| s.as_u64()).unwrap_or(0);
                    let unlimited = o.get("unlimited").and_then(|u| u.as_bool()).unwrap_or(false);
                    out.push((name.clone(), size, unlimited));
                }
                Value::Number(n) => out.push((name.clone(), n.as_u64().unwrap_or(0), false)),
                _ => {}
            }
        }
    }
    out
}

/// Split a filter chain's codec JSON into V2's `(compressor, filters)`
/// pair: the last entry is the compressor, everything before it is
/// `filters` (spec §4.G "merged, compressor last").
fn split_compressor(chain: &FilterChain) -> (Value, Value) {
    let entries = chain.to_codec_json_excluding_pseudo();
    if entries.is_empty() {
        return (Value::Null, Value::Null);
    }
    let mut entries = entries;
    let compressor = entries.pop().unwrap();
    (compressor, Value::Array(entries))
}

fn merge_compressor(compressor: &Value, filters: &Value) -> NczResult<FilterChain> {
    let mut list = Vec::new();
    if let Value::Array(items) = filters {
        list.extend(items.iter().cloned());
    }
    if !compressor.is_null() {
        list.push(compressor.clone());
    }
    let mut built = Vec::with_capacity(list.len());
    for (i, entry) in list.into_iter().enumerate() {
        built.push(Filter::from_codec_json(entry, i)?);
    }
    Ok(FilterChain::new(built))
}

fn write_attrs_doc(map: &dyn Map, prefix: &str, attrs: &[Attribute]) -> NczResult<()> {
    let mut doc = JsonMap::new();
    let mut types = JsonMap::new();
    for attr in attrs {
        if is_hidden_attribute(&attr.name) || attr.name == ATTR_FILL_VALUE {
            continue;
        }
        doc.insert(attr.name.clone(), attr.value.clone());
        let max_strlen = match attr.nctype {
            NcType::String => attribute_max_strlen(&attr.value).max(1),
            _ => attr.length.max(1),
        };
        let dtype = attr.nctype.to_v2_dtype(crate::dtype::ConcreteEndian::Little, max_strlen);
        types.insert(attr.name.clone(), json!(dtype));
    }
    if !types.is_empty() {
        doc.insert("_nczarr_attrs".to_string(), json!({"types": Value::Object(types)}));
    }
    let bytes = serde_json::to_vec_pretty(&Value::Object(doc))?;
    map.write(&join(prefix, ".zattrs"), &bytes)
}

fn read_attrs_doc(map: &dyn Map, prefix: &str) -> NczResult<Vec<Attribute>> {
    let key = join(prefix, ".zattrs");
    if !map.exists(&key)? {
        return Ok(Vec::new());
    }
    let bytes = map.read(&key, 0, None)?;
    let doc: Value = serde_json::from_slice(&bytes)?;
    let obj = doc.as_object().ok_or_else(|| NczError::NotZarr(format!("{key} is not a JSON object")))?;
    let types = obj
        .get("_nczarr_attrs")
        .and_then(|v| v.get("types"))
        .and_then(|v| v.as_object());

    let mut out = Vec::new();
    for (name, value) in obj {
        if name == "_nczarr_attrs" {
            continue;
        }
        let declared = types
            .and_then(|t| t.get(name))
            .and_then(|v| v.as_str())
            .and_then(|s| NcType::from_v2_dtype(s).ok());
        let nctype = match declared {
            Some((t, _)) => t,
            None => infer_type(value)?,
        };
        let length = attribute_length(nctype, value);
        out.push(Attribute {
            name: name.clone(),
            nctype,
            length,
            value: value.clone(),
        });
    }
    Ok(out)
}

impl V2Codec {
    fn write_group_impl(&self, map: &dyn Map, group: &Group, superblock: Option<Value>) -> NczResult<()> {
        let prefix = group_prefix(group);
        let mut doc = JsonMap::new();
        doc.insert("zarr_format".to_string(), json!(2));
        doc.insert("_nczarr_group".to_string(), nczarr_group_doc(group));
        if let Some(sb) = superblock {
            doc.insert("_nczarr_superblock".to_string(), sb);
        }
        map.write(&join(&prefix, ".zgroup"), &serde_json::to_vec_pretty(&Value::Object(doc))?)?;
        write_attrs_doc(map, &prefix, &group.attributes)?;
        Ok(())
    }

    fn write_recursive(&self, map: &dyn Map, group: &Group, is_root: bool, dataset: &Dataset) -> NczResult<()> {
        let superblock = if is_root {
            Some(json!({"version": "2.0.0", "format": dataset.nczarr_format}))
        } else {
            None
        };
        self.write_group_impl(map, group, superblock)?;
        for var in &group.vars {
            self.write_array(map, &group_prefix(group), var)?;
        }
        for child in &group.groups {
            self.write_recursive(map, child, false, dataset)?;
        }
        Ok(())
    }

    fn read_recursive(&self, map: &Arc<dyn Map>, prefix: &str, id: usize, flags: DatasetFlags) -> NczResult<(Group, usize)> {
        let mut next_id = id + 1;
        let zgroup_key = join(prefix, ".zgroup");
        let mut group = Group::new_root(id);
        group.path = if prefix.is_empty() { "/".to_string() } else { format!("/{prefix}") };
        group.name = prefix.rsplit('/').next().unwrap_or("/").to_string();

        let (child_names, var_names, has_authoritative_doc) = if map.exists(&zgroup_key)? {
            let bytes = map.read(&zgroup_key, 0, None)?;
            let doc: Value = serde_json::from_slice(&bytes)?;
            match doc.get("_nczarr_group") {
                Some(ncg) => {
                    for (name, size, unlimited) in parse_dims_doc(ncg.get("dims").unwrap_or(&Value::Null)) {
                        group.add_dimension(&name, size, unlimited)?;
                    }
                    let vars: Vec<String> = ncg
                        .get("vars")
                        .and_then(|v| v.as_array())
                        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                        .unwrap_or_default();
                    let groups: Vec<String> = ncg
                        .get("groups")
                        .and_then(|v| v.as_array())
                        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
                        .unwrap_or_default();
                    (groups, vars, true)
                }
                None => (list_subgroups(map, prefix)?, list_arrays(map, prefix)?, false),
            }
        } else if flags.purezarr {
            (list_subgroups(map, prefix)?, list_arrays(map, prefix)?, false)
        } else {
            return Err(NczError::NotZarr(format!("{zgroup_key} not found and purezarr fallback not enabled")));
        };
        let _ = has_authoritative_doc;

        group.attributes = read_attrs_doc(map, prefix)?;

        for var_name in var_names {
            let var_prefix = join(prefix, &var_name);
            let var = self.read_array(map, &var_prefix, &var_name, flags)?;
            group.add_variable(var)?;
        }

        for child_name in child_names {
            let child_prefix = join(prefix, &child_name);
            let (child, returned_id) = self.read_recursive(map, &child_prefix, next_id, flags)?;
            next_id = returned_id;
            group.groups.push(child);
        }

        Ok((group, next_id))
    }

    fn read_array(&self, map: &Arc<dyn Map>, prefix: &str, name: &str, flags: DatasetFlags) -> NczResult<Variable> {
        let zarray_key = join(prefix, ".zarray");
        let bytes = map.read(&zarray_key, 0, None)?;
        let doc: Value = serde_json::from_slice(&bytes)?;

        let order = doc.get("order").and_then(|v| v.as_str()).unwrap_or("C");
        if order != "C" {
            return Err(NczError::BadType(format!("unsupported array order {order}")));
        }

        let dtype_str = doc
            .get("dtype")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NczError::NotZarr(format!("{zarray_key} missing dtype")))?;
        let (nctype, max_strlen) = NcType::from_v2_dtype(dtype_str)?;
        let endian_concrete = NcType::v2_dtype_endian(dtype_str).unwrap_or_else(|| crate::dtype::Endian::Native.resolved());
        let endian = match endian_concrete {
            ConcreteEndian::Little => crate::dtype::Endian::Little,
            ConcreteEndian::Big => crate::dtype::Endian::Big,
        };

        let mut shape: Vec<u64> = doc
            .get("shape")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_u64()).collect())
            .unwrap_or_default();
        let mut chunk_shape: Vec<u64> = doc
            .get("chunks")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_u64()).collect())
            .unwrap_or_default();

        // spec §3: a scalar variable's persisted shape/chunks are `[1]`
        // but its internal rank is 0 (`shape = []` in this crate's
        // representation) — restore that on read using the nczarr
        // extension's own round-trip marker, rather than guessing from
        // shape alone (a real rank-1, length-1 variable also persists
        // as `[1]`).
        let is_scalar_marker = doc
            .get("_nczarr_array")
            .and_then(|a| a.get("scalar"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if is_scalar_marker {
            shape.clear();
            chunk_shape.clear();
        }
        // spec §3/§8: a persisted empty shape that *isn't* the nczarr
        // scalar marker means a bare Zarr array of rank 0 — suppress
        // rather than error, since it's still listable metadata.
        let suppressed_empty_shape = shape.is_empty() && !is_scalar_marker;

        let sep = super::parse_separator_or_warn(
            doc.get("dimension_separator").and_then(|v| v.as_str()),
            FormatVersion::V2,
        );

        let compressor = doc.get("compressor").cloned().unwrap_or(Value::Null);
        let filters_field = doc.get("filters").cloned().unwrap_or(Value::Null);
        let chain = merge_compressor(&compressor, &filters_field)?;

        let fill_policy = match doc.get("fill_value") {
            Some(Value::Null) | None => FillPolicy::NoFill,
            Some(v) => FillPolicy::Value(fill_value_bytes(v, nctype)?),
        };

        let dim_fqns: Vec<String> = doc
            .get("_nczarr_array")
            .and_then(|a| a.get("dimrefs"))
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_else(|| synthesize_dim_fqns(&shape, flags));

        let flush = crate::chunkio::make_flush_fn(
            map.clone(),
            prefix.to_string(),
            ChunkKeyScheme::V2,
            sep,
            chain.clone(),
            nctype,
            endian_concrete,
        );
        let cache = Arc::new(crate::cache::ChunkCache::new(16 * 1024 * 1024, flush));

        let mut attributes = read_attrs_doc(map, prefix)?;
        if let FillPolicy::Value(_) = &fill_policy {
            if let Some(v) = doc.get("fill_value") {
                attributes.push(Attribute {
                    name: ATTR_FILL_VALUE.to_string(),
                    nctype,
                    length: 1,
                    value: v.clone(),
                });
            }
        }

        let mut var = Variable {
            id: 0,
            name: name.to_string(),
            nctype,
            shape,
            chunk_shape,
            dim_ids: Vec::new(),
            dim_fqns,
            sep,
            chunk_key_scheme: ChunkKeyScheme::V2,
            storage: StorageKind::Chunked,
            fill_policy,
            endian,
            filters: chain,
            max_strlen,
            quantize: QuantizeMode::None,
            nsd: 0,
            attributes,
            state: VarState::Created,
            cache,
        };
        if suppressed_empty_shape {
            var.suppress();
        }
        Ok(var)
    }
}

fn synthesize_dim_fqns(shape: &[u64], _flags: DatasetFlags) -> Vec<String> {
    shape.iter().map(|len| format!("/_zdim_{len}")).collect()
}

fn list_subgroups(map: &dyn Map, prefix: &str) -> NczResult<Vec<String>> {
    if !map.listable() {
        return Ok(Vec::new());
    }
    let children = map.list(prefix)?;
    let mut out = Vec::new();
    for child in children {
        if map.exists(&join(&join(prefix, &child), ".zgroup"))? {
            out.push(child);
        }
    }
    Ok(out)
}

fn list_arrays(map: &dyn Map, prefix: &str) -> NczResult<Vec<String>> {
    if !map.listable() {
        return Ok(Vec::new());
    }
    let children = map.list(prefix)?;
    let mut out = Vec::new();
    for child in children {
        if map.exists(&join(&join(prefix, &child), ".zarray"))? {
            out.push(child);
        }
    }
    Ok(out)
}

impl FormatCodec for V2Codec {
    fn version(&self) -> FormatVersion {
        FormatVersion::V2
    }

    fn write_meta(&self, dataset: &Dataset) -> NczResult<()> {
        self.write_recursive(dataset.map.as_ref(), &dataset.root, true, dataset)
    }

    fn read_meta(&self, map: Arc<dyn Map>, flags: DatasetFlags) -> NczResult<Dataset> {
        let (root, next_id) = self.read_recursive(&map, "", 0, flags)?;
        let mut dataset = Dataset::new(map, FormatVersion::V2, flags, false);
        dataset.root = root;
        dataset.set_next_group_id(next_id);
        Ok(dataset)
    }

    fn write_group(&self, map: &dyn Map, group: &Group) -> NczResult<()> {
        self.write_group_impl(map, group, None)
    }

    fn write_array(&self, map: &dyn Map, group_path: &str, var: &Variable) -> NczResult<()> {
        let prefix = join(group_path, &var.name);
        let (compressor, filters) = split_compressor(&var.filters);
        let shape = if var.is_scalar() { vec![1] } else { var.shape.clone() };
        let chunks = if var.chunk_shape.is_empty() { vec![1] } else { var.chunk_shape.clone() };
        let dtype = var.nctype.to_v2_dtype(var.endian.resolved(), var.max_strlen);
        let fill_value = match var.get_attribute(ATTR_FILL_VALUE) {
            Some(a) => a.value.clone(),
            None => Value::Null,
        };

        let doc = json!({
            "zarr_format": 2,
            "shape": shape,
            "chunks": chunks,
            "dtype": dtype,
            "fill_value": fill_value,
            "order": "C",
            "compressor": compressor,
            "filters": filters,
            "dimension_separator": var.sep.as_char().to_string(),
            "_nczarr_array": {
                "dimrefs": var.dim_fqns,
                "storage": "chunked",
                "scalar": var.is_scalar(),
            }
        });
        map.write(&join(&prefix, ".zarray"), &serde_json::to_vec_pretty(&doc)?)?;
        write_attrs_doc(map, &prefix, &var.attributes)
    }

    fn build_chunkkey(&self, var: &Variable, indices: &[u64]) -> String {
        build_chunk_key(ChunkKeyScheme::V2, indices, var.sep)
    }
}
