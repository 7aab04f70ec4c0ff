//! Zarr V3 metadata codec (spec §4.H).
//!
//! Grounded on the teacher's array/group metadata readers
//! (`clbarnes-zarr3-rs/src/metadata/mod.rs`), generalized to the NCZarr
//! V3 layout: one `zarr.json` per node (tagged by `node_type`), with
//! the `_nczarr_group`/`_nczarr_array`/`_nczarr_attrs`/
//! `_nczarr_superblock` extension keys carrying dimension references,
//! reserved typing info, and the combined-tree summary at the root.

use std::sync::Arc;

use serde_json::{json, Map as JsonMap, Value};

use crate::attr::{attribute_length, attribute_max_strlen, fill_value_bytes};
use crate::chunkkey::{build_chunk_key, ChunkKeyScheme, Separator};
use crate::codec::{Filter, FilterChain};
use crate::dispatch::{FormatCodec, FormatVersion};
use crate::dtype::{ConcreteEndian, NcType, TypeAlias};
use crate::error::{NczError, NczResult};
use crate::map::{join, Map};
use crate::tree::{
    Attribute, Dataset, FillPolicy, Group, QuantizeMode, StorageKind, VarState, Variable,
    ATTR_FILL_VALUE,
};
use crate::url::DatasetFlags;

pub struct V3Codec;

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

/// Build a summary of the whole hierarchy for `_nczarr_superblock.root`
/// (spec §4.H: "serves as combined metadata in the absence of a
/// Zarr-level equivalent" — descriptive only, not authoritative; the
/// per-node `zarr.json` documents remain the source of truth on read).
fn superblock_tree(group: &Group) -> Value {
    json!({
        "dimensions": group.dims.iter().map(|d| json!({"name": d.name, "size": d.length, "unlimited": d.unlimited})).collect::<Vec<_>>(),
        "arrays": group.vars.iter().map(|v| v.name.clone()).collect::<Vec<_>>(),
        "children": group.groups.iter().map(superblock_tree).collect::<Vec<_>>(),
    })
}

fn attributes_doc(attrs: &[Attribute]) -> (Value, Value) {
    let mut obj = JsonMap::new();
    let mut types = Vec::new();
    for attr in attrs {
        if attr.name == ATTR_FILL_VALUE {
            continue;
        }
        obj.insert(attr.name.clone(), attr.value.clone());
        let max_strlen = match attr.nctype {
            NcType::String => attribute_max_strlen(&attr.value).max(1),
            _ => attr.length.max(1),
        };
        let (dtype, alias) = attr.nctype.to_v3_dtype(max_strlen);
        let mut cfg = json!({"type": dtype});
        if let Some(a) = alias {
            cfg["alias"] = json!(alias_str(a));
        }
        types.push(json!({"name": attr.name, "configuration": cfg}));
    }
    (Value::Object(obj), json!(types))
}

fn alias_str(alias: TypeAlias) -> &'static str {
    match alias {
        TypeAlias::Char => "char",
        TypeAlias::String => "string",
        TypeAlias::Json => "json",
    }
}

fn alias_from_str(s: &str) -> Option<TypeAlias> {
    match s {
        "char" => Some(TypeAlias::Char),
        "string" => Some(TypeAlias::String),
        "json" => Some(TypeAlias::Json),
        _ => None,
    }
}

fn parse_attributes_doc(attributes: &Value, attribute_types: Option<&Value>) -> NczResult<Vec<Attribute>> {
    let obj = match attributes.as_object() {
        Some(o) => o,
        None => return Ok(Vec::new()),
    };
    let mut type_map = std::collections::HashMap::new();
    if let Some(Value::Array(entries)) = attribute_types {
        for entry in entries {
            let name = entry.get("name").and_then(|v| v.as_str());
            let ty = entry.get("configuration").and_then(|c| c.get("type")).and_then(|v| v.as_str());
            let alias = entry
                .get("configuration")
                .and_then(|c| c.get("alias"))
                .and_then(|v| v.as_str())
                .and_then(alias_from_str);
            if let (Some(name), Some(ty)) = (name, ty) {
                type_map.insert(name.to_string(), (ty.to_string(), alias));
            }
        }
    }
    let mut out = Vec::new();
    for (name, value) in obj {
        let declared = type_map.get(name).and_then(|(ty, alias)| NcType::from_v3_dtype(ty, *alias).ok());
        let nctype = match declared {
            Some((t, _)) => t,
            None => crate::attr::infer_type(value)?,
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

fn chunk_key_encoding(scheme: ChunkKeyScheme, sep: Separator) -> Value {
    let sep_str = sep.as_char().to_string();
    match scheme {
        ChunkKeyScheme::Default => json!({"name": "default", "configuration": {"separator": sep_str}}),
        ChunkKeyScheme::V2 => json!({"name": "v2", "configuration": {"separator": sep_str}}),
    }
}

/// Spec §4.H: `chunk_key_encoding.name` must be `"default"` or `"v2"`;
/// validation rejects any other name. Absent entirely, falls back to
/// V3's default scheme.
fn parse_chunk_key_encoding(value: Option<&Value>) -> NczResult<(ChunkKeyScheme, Option<&str>)> {
    let Some(v) = value else { return Ok((ChunkKeyScheme::Default, None)) };
    match v.get("name").and_then(|n| n.as_str()) {
        Some("default") | None => {
            Ok((ChunkKeyScheme::Default, v.get("configuration").and_then(|c| c.get("separator")).and_then(|s| s.as_str())))
        }
        Some("v2") => {
            Ok((ChunkKeyScheme::V2, v.get("configuration").and_then(|c| c.get("separator")).and_then(|s| s.as_str())))
        }
        Some(other) => Err(NczError::NotZarr(format!("unsupported chunk_key_encoding name {other}"))),
    }
}

impl V3Codec {
    fn write_group_impl(&self, map: &dyn Map, group: &Group, superblock: Option<Value>) -> NczResult<()> {
        let prefix = group_prefix(group);
        let (attributes, attribute_types) = attributes_doc(&group.attributes);
        let mut doc = JsonMap::new();
        doc.insert("zarr_format".to_string(), json!(3));
        doc.insert("node_type".to_string(), json!("group"));
        doc.insert("attributes".to_string(), attributes);
        doc.insert("_nczarr_group".to_string(), nczarr_group_doc(group));
        if let Value::Array(entries) = &attribute_types {
            if !entries.is_empty() {
                doc.insert("_nczarr_attrs".to_string(), json!({"attribute_types": attribute_types}));
            }
        }
        if let Some(sb) = superblock {
            doc.insert("_nczarr_superblock".to_string(), sb);
        }
        map.write(&join(&prefix, "zarr.json"), &serde_json::to_vec_pretty(&Value::Object(doc))?)
    }

    fn write_recursive(&self, map: &dyn Map, group: &Group, is_root: bool, dataset: &Dataset) -> NczResult<()> {
        let superblock = if is_root {
            Some(json!({
                "version": "3.0.0",
                "format": dataset.nczarr_format,
                "root": superblock_tree(group),
            }))
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
        let doc_key = join(prefix, "zarr.json");
        let mut group = Group::new_root(id);
        group.path = if prefix.is_empty() { "/".to_string() } else { format!("/{prefix}") };
        group.name = prefix.rsplit('/').next().unwrap_or("/").to_string();

        if !map.exists(&doc_key)? {
            if !flags.purezarr {
                return Err(NczError::NotZarr(format!("{doc_key} not found and purezarr fallback not enabled")));
            }
            return Ok((group, next_id));
        }
        let bytes = map.read(&doc_key, 0, None)?;
        let doc: Value = serde_json::from_slice(&bytes)?;

        let (var_names, child_names) = match doc.get("_nczarr_group") {
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
                (vars, groups)
            }
            None => (list_arrays(map, prefix)?, list_subgroups(map, prefix)?),
        };

        let attribute_types = doc.get("_nczarr_attrs").and_then(|a| a.get("attribute_types"));
        group.attributes = parse_attributes_doc(doc.get("attributes").unwrap_or(&Value::Null), attribute_types)?;

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
        let doc_key = join(prefix, "zarr.json");
        let bytes = map.read(&doc_key, 0, None)?;
        let doc: Value = serde_json::from_slice(&bytes)?;

        if doc.get("node_type").and_then(|v| v.as_str()) != Some("array") {
            return Err(NczError::NotZarr(format!("{doc_key} is not an array node")));
        }

        let mut shape: Vec<u64> = doc
            .get("shape")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_u64()).collect())
            .unwrap_or_default();

        let mut chunk_shape: Vec<u64> = doc
            .get("chunk_grid")
            .and_then(|g| g.get("configuration"))
            .and_then(|c| c.get("chunk_shape"))
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_u64()).collect())
            .unwrap_or_default();

        // spec §3: scalars persist as shape/chunk_shape `[1]`; restore
        // rank 0 using the nczarr round-trip marker rather than
        // inferring it from shape (a genuine rank-1 length-1 array
        // also persists as `[1]`).
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

        let (chunk_key_scheme, sep_str) = parse_chunk_key_encoding(doc.get("chunk_key_encoding"))?;
        let sep = super::parse_separator_or_warn(sep_str, FormatVersion::V3);

        let type_alias = doc
            .get("_nczarr_array")
            .and_then(|a| a.get("type_alias"))
            .and_then(|v| v.as_str())
            .and_then(alias_from_str);
        let data_type = doc
            .get("data_type")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NczError::NotZarr(format!("{doc_key} missing data_type")))?;
        let (nctype, max_strlen) = NcType::from_v3_dtype(data_type, type_alias)?;

        let codecs = doc.get("codecs").and_then(|v| v.as_array()).cloned().unwrap_or_default();
        let mut filters = Vec::with_capacity(codecs.len());
        let mut endian_concrete = ConcreteEndian::Little;
        for (i, entry) in codecs.into_iter().enumerate() {
            if i == 0 {
                let endian = entry.get("configuration").and_then(|c| c.get("endian")).and_then(|v| v.as_str());
                endian_concrete = match endian {
                    Some("big") => ConcreteEndian::Big,
                    _ => ConcreteEndian::Little,
                };
                filters.push(Filter::bytes_pseudo(endian_concrete, 0));
                continue;
            }
            filters.push(Filter::from_codec_json(entry, i)?);
        }
        let chain = FilterChain::new(filters);
        chain.validate_v3_bytes_first()?;
        let endian = match endian_concrete {
            ConcreteEndian::Little => crate::dtype::Endian::Little,
            ConcreteEndian::Big => crate::dtype::Endian::Big,
        };

        let fill_policy = match doc.get("fill_value") {
            Some(Value::Null) | None => FillPolicy::NoFill,
            Some(v) => FillPolicy::Value(fill_value_bytes(v, nctype)?),
        };

        let dim_fqns: Vec<String> = match doc.get("_nczarr_array").and_then(|a| a.get("dimensions")).and_then(|v| v.as_array()) {
            Some(a) => a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect(),
            None => doc
                .get("dimension_names")
                .and_then(|v| v.as_array())
                .map(|a| {
                    a.iter()
                        .map(|v| match v.as_str() {
                            Some(n) => format!("/{n}"),
                            None => format!("/_zdim_{}", shape.first().copied().unwrap_or(0)),
                        })
                        .collect()
                })
                .unwrap_or_else(|| shape.iter().map(|len| format!("/_zdim_{len}")).collect()),
        };
        let _ = flags;

        let attribute_types = doc.get("_nczarr_attrs").and_then(|a| a.get("attribute_types"));
        let mut attributes = parse_attributes_doc(doc.get("attributes").unwrap_or(&Value::Null), attribute_types)?;
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

        let flush = crate::chunkio::make_flush_fn(
            map.clone(),
            prefix.to_string(),
            chunk_key_scheme,
            sep,
            chain.clone(),
            nctype,
            endian_concrete,
        );
        let cache = Arc::new(crate::cache::ChunkCache::new(16 * 1024 * 1024, flush));

        let mut var = Variable {
            id: 0,
            name: name.to_string(),
            nctype,
            shape,
            chunk_shape,
            dim_ids: Vec::new(),
            dim_fqns,
            sep,
            chunk_key_scheme,
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

fn list_subgroups(map: &dyn Map, prefix: &str) -> NczResult<Vec<String>> {
    if !map.listable() {
        return Ok(Vec::new());
    }
    let children = map.list(prefix)?;
    let mut out = Vec::new();
    for child in children {
        let key = join(&join(prefix, &child), "zarr.json");
        if map.exists(&key)? {
            let bytes = map.read(&key, 0, None)?;
            if let Ok(doc) = serde_json::from_slice::<Value>(&bytes) {
                if doc.get("node_type").and_then(|v| v.as_str()) == Some("group") {
                    out.push(child);
                }
            }
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
        let key = join(&join(prefix, &child), "zarr.json");
        if map.exists(&key)? {
            let bytes = map.read(&key, 0, None)?;
            if let Ok(doc) = serde_json::from_slice::<Value>(&bytes) {
                if doc.get("node_type").and_then(|v| v.as_str()) == Some("array") {
                    out.push(child);
                }
            }
        }
    }
    Ok(out)
}

impl FormatCodec for V3Codec {
    fn version(&self) -> FormatVersion {
        FormatVersion::V3
    }

    fn write_meta(&self, dataset: &Dataset) -> NczResult<()> {
        self.write_recursive(dataset.map.as_ref(), &dataset.root, true, dataset)
    }

    fn read_meta(&self, map: Arc<dyn Map>, flags: DatasetFlags) -> NczResult<Dataset> {
        let (root, next_id) = self.read_recursive(&map, "", 0, flags)?;
        let mut dataset = Dataset::new(map, FormatVersion::V3, flags, false);
        dataset.root = root;
        dataset.set_next_group_id(next_id);
        Ok(dataset)
    }

    fn write_group(&self, map: &dyn Map, group: &Group) -> NczResult<()> {
        self.write_group_impl(map, group, None)
    }

    fn write_array(&self, map: &dyn Map, group_path: &str, var: &Variable) -> NczResult<()> {
        let prefix = join(group_path, &var.name);
        let shape = if var.is_scalar() { vec![1] } else { var.shape.clone() };
        let chunk_shape = if var.chunk_shape.is_empty() { vec![1] } else { var.chunk_shape.clone() };
        let (data_type, alias) = var.nctype.to_v3_dtype(var.max_strlen);

        let mut codecs = Vec::with_capacity(var.filters.filters.len());
        let endian = var.endian.resolved();
        let endian_str = match endian {
            ConcreteEndian::Little => "little",
            ConcreteEndian::Big => "big",
        };
        codecs.push(json!({"name": "bytes", "configuration": {"endian": endian_str}}));
        for filter in &var.filters.filters {
            if !filter.is_bytes_pseudo() {
                codecs.push(filter.codec_json.clone());
            }
        }

        let fill_value = match var.get_attribute(ATTR_FILL_VALUE) {
            Some(a) => a.value.clone(),
            None => Value::Null,
        };

        let dimension_names: Vec<Value> = var
            .dim_fqns
            .iter()
            .map(|fqn| crate::tree::split_fqn(fqn).last().cloned().map(Value::from).unwrap_or(Value::Null))
            .collect();

        let (attributes, attribute_types) = attributes_doc(&var.attributes);

        let mut nczarr_array = json!({"dimensions": var.dim_fqns, "scalar": var.is_scalar()});
        if let Some(a) = alias {
            nczarr_array["type_alias"] = json!(alias_str(a));
        }

        let mut doc = JsonMap::new();
        doc.insert("zarr_format".to_string(), json!(3));
        doc.insert("node_type".to_string(), json!("array"));
        doc.insert("shape".to_string(), json!(shape));
        doc.insert("data_type".to_string(), json!(data_type));
        doc.insert(
            "chunk_grid".to_string(),
            json!({"name": "regular", "configuration": {"chunk_shape": chunk_shape}}),
        );
        doc.insert("chunk_key_encoding".to_string(), chunk_key_encoding(var.chunk_key_scheme, var.sep));
        doc.insert("fill_value".to_string(), fill_value);
        doc.insert("codecs".to_string(), json!(codecs));
        doc.insert("dimension_names".to_string(), json!(dimension_names));
        doc.insert("attributes".to_string(), attributes);
        doc.insert("_nczarr_array".to_string(), nczarr_array);
        if let Value::Array(entries) = &attribute_types {
            if !entries.is_empty() {
                doc.insert("_nczarr_attrs".to_string(), json!({"attribute_types": attribute_types}));
            }
        }

        map.write(&join(&prefix, "zarr.json"), &serde_json::to_vec_pretty(&Value::Object(doc))?)
    }

    fn build_chunkkey(&self, var: &Variable, indices: &[u64]) -> String {
        build_chunk_key(var.chunk_key_scheme, indices, var.sep)
    }
}
