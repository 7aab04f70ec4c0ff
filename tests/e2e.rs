//! End-to-end scenarios exercising create/write/close/reopen against a
//! real map backend, not just a single codec's unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};

use nczarr::chunkio::{define_variable, read_chunk, write_chunk, VariableSpec};
use nczarr::codec::Filter;
use nczarr::dtype::{Endian, NcType};
use nczarr::error::NczError;
use nczarr::map::filesystem::FileSystemMap;
use nczarr::map::memory::MemoryMap;
use nczarr::map::Map;
use nczarr::metadata::v2::V2Codec;
use nczarr::metadata::v3::V3Codec;
use nczarr::{attr, close, create, open, write_meta};

fn le_bytes(values: &[i32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}

fn ne_i32s(bytes: &[u8]) -> Vec<i32> {
    bytes.chunks_exact(4).map(|c| i32::from_ne_bytes(c.try_into().unwrap())).collect()
}

#[test]
fn v2_create_write_read_round_trip() -> anyhow::Result<()> {
    let map: Arc<dyn Map> = Arc::new(MemoryMap::new());
    let mut dataset = create(map.clone(), "mode=nczarr,v2")?;
    dataset.root.add_dimension("x", 4, false)?;
    let spec = VariableSpec::new("v", NcType::Int, vec![4], vec![2], vec![0], vec!["/x".to_string()]);
    let var = define_variable(&dataset, "v", spec)?;
    dataset.root.add_variable(var)?;
    write_meta(&dataset)?;

    {
        let var = dataset.root.find_variable_mut("v").unwrap();
        write_chunk(var, &[0], le_bytes(&[10, 20]))?;
        write_chunk(var, &[1], le_bytes(&[30, 40]))?;
    }
    close(dataset, false)?;

    let doc: Value = serde_json::from_slice(&map.read("v/.zarray", 0, None)?)?;
    assert_eq!(doc["shape"], json!([4]));
    assert_eq!(doc["chunks"], json!([2]));
    assert_eq!(doc["dtype"], json!("<i4"));
    assert_eq!(doc["_nczarr_array"]["dimrefs"], json!(["/x"]));

    let reopened = open(map, "", false)?;
    let var = reopened.root.find_variable("v").unwrap();
    let codec = V2Codec;
    let a = read_chunk(reopened.map.as_ref(), "v", var, &codec, &[0])?;
    let b = read_chunk(reopened.map.as_ref(), "v", var, &codec, &[1])?;
    let mut values = ne_i32s(&a);
    values.extend(ne_i32s(&b));
    assert_eq!(values, vec![10, 20, 30, 40]);
    Ok(())
}

#[test]
fn attribute_char_vs_string_round_trip() -> anyhow::Result<()> {
    let map: Arc<dyn Map> = Arc::new(MemoryMap::new());
    let mut dataset = create(map.clone(), "mode=nczarr,v2")?;

    let attr::StoreOutcome::Stored(a) = attr::store_attribute("a", json!("hello"), None, None)? else {
        panic!("expected Stored")
    };
    assert_eq!(a.nctype, NcType::Char);
    dataset.root.set_attribute(a);

    let attr::StoreOutcome::Stored(b) = attr::store_attribute("b", json!(["hello"]), None, None)? else {
        panic!("expected Stored")
    };
    assert_eq!(b.nctype, NcType::String);
    dataset.root.set_attribute(b);

    write_meta(&dataset)?;

    let doc: Value = serde_json::from_slice(&map.read(".zattrs", 0, None)?)?;
    assert_eq!(doc["a"], json!("hello"));
    assert_eq!(doc["_nczarr_attrs"]["types"]["a"], json!(">S1"));
    assert_eq!(doc["_nczarr_attrs"]["types"]["b"], json!("|S5"));

    let reopened = open(map, "", false)?;
    let ra = reopened.root.get_attribute("a").unwrap();
    assert_eq!(ra.nctype, NcType::Char);
    assert_eq!(ra.length, 5);
    let rb = reopened.root.get_attribute("b").unwrap();
    assert_eq!(rb.nctype, NcType::String);
    assert_eq!(rb.length, 1);
    Ok(())
}

#[test]
fn json_convention_attribute_defaults_to_text_but_coerces_on_request() -> anyhow::Result<()> {
    let map: Arc<dyn Map> = Arc::new(MemoryMap::new());
    let mut dataset = create(map.clone(), "mode=nczarr,v3")?;

    let original = json!({"k": 1, "v": [1, 2, 3]});
    let text = attr::json_convention_write(&original)?;
    let attr::StoreOutcome::Stored(j) = attr::store_attribute("j", json!(text.clone()), Some(NcType::Json), None)? else {
        panic!("expected Stored")
    };
    dataset.root.set_attribute(j);
    write_meta(&dataset)?;

    let doc: Value = serde_json::from_slice(&map.read("zarr.json", 0, None)?)?;
    let types = doc["_nczarr_attrs"]["attribute_types"].as_array().unwrap();
    let j_type = types.iter().find(|t| t["name"] == json!("j")).unwrap();
    assert_eq!(j_type["configuration"]["type"], json!("uint8"));
    assert_eq!(j_type["configuration"]["alias"], json!("json"));

    let reopened = open(map, "", false)?;
    let attr = reopened.root.get_attribute("j").unwrap();
    assert_eq!(attr.nctype, NcType::Json);
    // default interface: the stringified JSON text, untouched.
    assert_eq!(attr.value, json!(text));
    // JSON coercion: parse it back into the original shape.
    let coerced = attr::json_convention_read(attr.value.as_str().unwrap())?;
    assert_eq!(coerced, original);
    Ok(())
}

#[test]
fn missing_codec_blocks_chunk_io_but_not_open_or_other_vars() -> anyhow::Result<()> {
    let map: Arc<dyn Map> = Arc::new(MemoryMap::new());
    let mut dataset = create(map.clone(), "mode=nczarr,v3")?;
    dataset.root.add_dimension("x", 4, false)?;

    let zstd_filter = Filter::from_codec_json(json!({"name": "zstd", "configuration": {"level": 3}}), 0)?;
    assert!(zstd_filter.flags.incomplete);

    let mut broken_spec = VariableSpec::new("broken", NcType::Int, vec![4], vec![2], vec![0], vec!["/x".to_string()]);
    broken_spec.filters = vec![zstd_filter];
    let broken_var = define_variable(&dataset, "broken", broken_spec)?;
    dataset.root.add_variable(broken_var)?;

    let ok_spec = VariableSpec::new("ok", NcType::Int, vec![4], vec![2], vec![0], vec!["/x".to_string()]);
    let ok_var = define_variable(&dataset, "ok", ok_spec)?;
    dataset.root.add_variable(ok_var)?;

    write_meta(&dataset)?;
    {
        let var = dataset.root.find_variable_mut("ok").unwrap();
        write_chunk(var, &[0], le_bytes(&[1, 2]))?;
    }
    close(dataset, false)?;

    // the missing plugin never blocks open, and its codec JSON survives verbatim.
    let reopened = open(map.clone(), "", false)?;
    let doc: Value = serde_json::from_slice(&map.read("broken/zarr.json", 0, None)?)?;
    assert_eq!(doc["codecs"][1]["name"], json!("zstd"));

    // a present chunk on a suppressed-by-incomplete-filter variable fails to decode.
    map.write("broken/c/0", &[0u8; 8])?;
    let broken = reopened.root.find_variable("broken").unwrap();
    let codec = V3Codec;
    let err = read_chunk(reopened.map.as_ref(), "broken", broken, &codec, &[0]);
    assert!(matches!(err, Err(NczError::Filter(_))));

    // the unrelated variable is untouched.
    let ok = reopened.root.find_variable("ok").unwrap();
    let bytes = read_chunk(reopened.map.as_ref(), "ok", ok, &codec, &[0])?;
    assert_eq!(ne_i32s(&bytes), vec![1, 2]);
    Ok(())
}

#[test]
fn v3_big_endian_variable_round_trips_through_host_order() -> anyhow::Result<()> {
    let map: Arc<dyn Map> = Arc::new(MemoryMap::new());
    let mut dataset = create(map.clone(), "mode=nczarr,v3")?;
    dataset.root.add_dimension("x", 2, false)?;
    let mut spec = VariableSpec::new("v", NcType::Int, vec![2], vec![2], vec![0], vec!["/x".to_string()]);
    spec.endian = Endian::Big;
    let var = define_variable(&dataset, "v", spec)?;
    dataset.root.add_variable(var)?;
    write_meta(&dataset)?;

    {
        let var = dataset.root.find_variable_mut("v").unwrap();
        write_chunk(var, &[0], le_bytes(&[1, 2]))?;
    }
    close(dataset, false)?;

    let doc: Value = serde_json::from_slice(&map.read("v/zarr.json", 0, None)?)?;
    assert_eq!(doc["codecs"][0], json!({"name": "bytes", "configuration": {"endian": "big"}}));

    let on_disk = map.read("v/c/0", 0, None)?;
    assert_eq!(on_disk, vec![0, 0, 0, 1, 0, 0, 0, 2]);

    let reopened = open(map, "", false)?;
    let v = reopened.root.find_variable("v").unwrap();
    let codec = V3Codec;
    let bytes = read_chunk(reopened.map.as_ref(), "v", v, &codec, &[0])?;
    assert_eq!(ne_i32s(&bytes), vec![1, 2]);
    Ok(())
}

/// Wraps [`MemoryMap`] to count physical reads per key, so eviction can
/// be told apart from a cache hit.
struct CountingMap {
    inner: MemoryMap,
    reads: Mutex<HashMap<String, usize>>,
}

impl CountingMap {
    fn new() -> Self {
        Self { inner: MemoryMap::new(), reads: Mutex::new(HashMap::new()) }
    }

    fn read_count(&self, key: &str) -> usize {
        *self.reads.lock().unwrap().get(key).unwrap_or(&0)
    }
}

impl Map for CountingMap {
    fn exists(&self, key: &str) -> nczarr::NczResult<bool> {
        self.inner.exists(key)
    }

    fn len(&self, key: &str) -> nczarr::NczResult<u64> {
        self.inner.len(key)
    }

    fn read(&self, key: &str, offset: u64, count: Option<u64>) -> nczarr::NczResult<Vec<u8>> {
        *self.reads.lock().unwrap().entry(key.to_string()).or_insert(0) += 1;
        self.inner.read(key, offset, count)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> nczarr::NczResult<()> {
        self.inner.write(key, bytes)
    }

    fn list(&self, prefix: &str) -> nczarr::NczResult<Vec<String>> {
        self.inner.list(prefix)
    }

    fn delete(&self, key: &str) -> nczarr::NczResult<()> {
        self.inner.delete(key)
    }

    fn truncate(&self) -> nczarr::NczResult<()> {
        self.inner.truncate()
    }

    fn close(&self, delete: bool) -> nczarr::NczResult<()> {
        self.inner.close(delete)
    }
}

#[test]
fn cache_eviction_ordering_a_b_a_c_budget_of_two_chunks() -> anyhow::Result<()> {
    let map: Arc<CountingMap> = Arc::new(CountingMap::new());
    let dyn_map: Arc<dyn Map> = map.clone();
    let mut dataset = create(dyn_map.clone(), "mode=nczarr,v2")?;
    dataset.root.add_dimension("x", 3, false)?;
    let mut spec = VariableSpec::new("v", NcType::Int, vec![3], vec![1], vec![0], vec!["/x".to_string()]);
    spec.cache_byte_budget = 8; // exactly 2 one-element int32 chunks
    let var = define_variable(&dataset, "v", spec)?;
    dataset.root.add_variable(var)?;
    write_meta(&dataset)?;

    // seed the three chunks directly, bypassing the cache
    map.write("v/0", &4i32.to_ne_bytes())?; // A
    map.write("v/1", &5i32.to_ne_bytes())?; // B
    map.write("v/2", &6i32.to_ne_bytes())?; // C

    let var = dataset.root.find_variable("v").unwrap();
    let codec = V2Codec;
    read_chunk(dyn_map.as_ref(), "v", var, &codec, &[0])?; // A
    read_chunk(dyn_map.as_ref(), "v", var, &codec, &[1])?; // B
    read_chunk(dyn_map.as_ref(), "v", var, &codec, &[0])?; // touch A -> MRU
    read_chunk(dyn_map.as_ref(), "v", var, &codec, &[2])?; // C, evicts B (LRU)

    assert_eq!(map.read_count("v/0"), 1);
    assert_eq!(map.read_count("v/1"), 1);
    assert_eq!(map.read_count("v/2"), 1);

    // B was evicted: reading it again must go back to the map.
    read_chunk(dyn_map.as_ref(), "v", var, &codec, &[1])?;
    assert_eq!(map.read_count("v/1"), 2);

    // A and C are still cached from before.
    read_chunk(dyn_map.as_ref(), "v", var, &codec, &[0])?;
    read_chunk(dyn_map.as_ref(), "v", var, &codec, &[2])?;
    assert_eq!(map.read_count("v/0"), 1);
    assert_eq!(map.read_count("v/2"), 1);
    Ok(())
}

#[test]
fn filesystem_map_round_trip() -> anyhow::Result<()> {
    let tmp = tempdir::TempDir::new("nczarr-e2e")?;
    let map: Arc<dyn Map> = Arc::new(FileSystemMap::open_or_create(tmp.path())?);
    let mut dataset = create(map.clone(), "mode=nczarr,v2")?;
    dataset.root.add_dimension("x", 2, false)?;
    let spec = VariableSpec::new("v", NcType::Int, vec![2], vec![2], vec![0], vec!["/x".to_string()]);
    let var = define_variable(&dataset, "v", spec)?;
    dataset.root.add_variable(var)?;
    write_meta(&dataset)?;
    {
        let var = dataset.root.find_variable_mut("v").unwrap();
        write_chunk(var, &[0], le_bytes(&[7, 8]))?;
    }
    close(dataset, false)?;

    let reopened = open(map, "", false)?;
    let v = reopened.root.find_variable("v").unwrap();
    let codec = V2Codec;
    let bytes = read_chunk(reopened.map.as_ref(), "v", v, &codec, &[0])?;
    assert_eq!(ne_i32s(&bytes), vec![7, 8]);
    Ok(())
}
