//! In-process map backend, grounded on the teacher's
//! `store::hashmap::HashMapStore`. Used by the crate's own test suite
//! and as a trivial embeddable backend for callers who don't need
//! persistence.

use std::collections::BTreeMap;
use std::sync::RwLock;

use super::{not_found, Map};
use crate::error::NczResult;

#[derive(Default)]
pub struct MemoryMap {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryMap {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Map for MemoryMap {
    fn exists(&self, key: &str) -> NczResult<bool> {
        Ok(self.data.read().unwrap().contains_key(key))
    }

    fn len(&self, key: &str) -> NczResult<u64> {
        self.data
            .read()
            .unwrap()
            .get(key)
            .map(|v| v.len() as u64)
            .ok_or_else(|| not_found(key))
    }

    fn read(&self, key: &str, offset: u64, count: Option<u64>) -> NczResult<Vec<u8>> {
        let guard = self.data.read().unwrap();
        let bytes = guard.get(key).ok_or_else(|| not_found(key))?;
        let start = (offset as usize).min(bytes.len());
        let end = match count {
            Some(c) => (start + c as usize).min(bytes.len()),
            None => bytes.len(),
        };
        Ok(bytes[start..end].to_vec())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> NczResult<()> {
        self.data
            .write()
            .unwrap()
            .insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn list(&self, prefix: &str) -> NczResult<Vec<String>> {
        let guard = self.data.read().unwrap();
        let prefix_slash = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix.trim_end_matches('/'))
        };
        let mut children = std::collections::BTreeSet::new();
        for key in guard.keys() {
            let Some(rest) = key.strip_prefix(&prefix_slash) else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            let name = rest.split('/').next().unwrap();
            children.insert(name.to_string());
        }
        Ok(children.into_iter().collect())
    }

    fn delete(&self, key: &str) -> NczResult<()> {
        self.data.write().unwrap().remove(key);
        Ok(())
    }

    fn truncate(&self) -> NczResult<()> {
        self.data.write().unwrap().clear();
        Ok(())
    }

    fn close(&self, delete: bool) -> NczResult<()> {
        if delete {
            self.truncate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_roundtrip() {
        let m = MemoryMap::new();
        m.write("a/.zgroup", b"{}").unwrap();
        assert!(m.exists("a/.zgroup").unwrap());
        assert_eq!(m.len("a/.zgroup").unwrap(), 2);
        assert_eq!(m.read("a/.zgroup", 0, None).unwrap(), b"{}");
    }

    #[test]
    fn missing_key_is_empty_object() {
        let m = MemoryMap::new();
        let err = m.read("nope", 0, None).unwrap_err();
        assert!(matches!(err, crate::error::NczError::EmptyObject(_)));
    }

    #[test]
    fn list_returns_immediate_children_only() {
        let m = MemoryMap::new();
        m.write("a/.zgroup", b"{}").unwrap();
        m.write("a/b/.zarray", b"{}").unwrap();
        let children = m.list("a").unwrap();
        assert_eq!(children, vec![".zgroup".to_string(), "b".to_string()]);
    }

    #[test]
    fn partial_read_respects_offset_and_count() {
        let m = MemoryMap::new();
        m.write("k", b"0123456789").unwrap();
        assert_eq!(m.read("k", 2, Some(3)).unwrap(), b"234");
        assert_eq!(m.read("k", 8, Some(10)).unwrap(), b"89");
    }
}
