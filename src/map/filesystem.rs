//! Local-filesystem map backend, grounded on
//! `clbarnes-zarr3-rs/src/store/filesystem.rs`'s `FileSystemStore`.

use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use fs4::FileExt;

use super::{not_found, Map};
use crate::error::{NczError, NczResult};

pub struct FileSystemMap {
    base_path: PathBuf,
}

impl FileSystemMap {
    /// Open an existing directory as the map root.
    pub fn open(path: impl AsRef<Path>) -> NczResult<Self> {
        let base_path = path.as_ref().canonicalize()?;
        if !base_path.is_dir() {
            return Err(NczError::Internal(format!(
                "{} exists but is not a directory",
                base_path.display()
            )));
        }
        Ok(Self { base_path })
    }

    /// Open the directory, creating it (and parents) if absent.
    pub fn open_or_create(path: impl AsRef<Path>) -> NczResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            fs::create_dir_all(path)?;
        }
        Self::open(path)
    }

    fn resolve(&self, key: &str) -> PathBuf {
        let mut p = self.base_path.clone();
        for component in key.split('/').filter(|s| !s.is_empty()) {
            p.push(component);
        }
        p
    }
}

impl Map for FileSystemMap {
    fn exists(&self, key: &str) -> NczResult<bool> {
        Ok(self.resolve(key).is_file())
    }

    fn len(&self, key: &str) -> NczResult<u64> {
        let path = self.resolve(key);
        fs::metadata(&path)
            .map(|m| m.len())
            .map_err(|_| not_found(key))
    }

    fn read(&self, key: &str, offset: u64, count: Option<u64>) -> NczResult<Vec<u8>> {
        let path = self.resolve(key);
        let mut file = File::open(&path).map_err(|_| not_found(key))?;
        file.lock_shared()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        match count {
            Some(c) => {
                buf.resize(c as usize, 0);
                let n = file.read(&mut buf)?;
                buf.truncate(n);
            }
            None => {
                file.read_to_end(&mut buf)?;
            }
        }
        FileExt::unlock(&file)?;
        Ok(buf)
    }

    fn write(&self, key: &str, bytes: &[u8]) -> NczResult<()> {
        let path = self.resolve(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&path)?;
        file.lock_exclusive()?;
        file.write_all(bytes)?;
        FileExt::unlock(&file)?;
        Ok(())
    }

    fn list(&self, prefix: &str) -> NczResult<Vec<String>> {
        let dir = self.resolve(prefix);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut names: Vec<String> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        Ok(names)
    }

    fn delete(&self, key: &str) -> NczResult<()> {
        let path = self.resolve(key);
        if path.is_dir() {
            fs::remove_dir_all(path)?;
        } else if path.is_file() {
            fs::remove_file(path)?;
        }
        Ok(())
    }

    fn truncate(&self) -> NczResult<()> {
        if self.base_path.is_dir() {
            fs::remove_dir_all(&self.base_path)?;
        }
        fs::create_dir_all(&self.base_path)?;
        Ok(())
    }

    fn close(&self, delete: bool) -> NczResult<()> {
        if delete {
            fs::remove_dir_all(&self.base_path)?;
        }
        Ok(())
    }

    fn listable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_write_read() {
        let tmp = tempdir::TempDir::new("nczarr-fs-test").unwrap();
        let map = FileSystemMap::open_or_create(tmp.path()).unwrap();
        map.write("grp/.zgroup", b"{\"zarr_format\":2}").unwrap();
        assert!(map.exists("grp/.zgroup").unwrap());
        let bytes = map.read("grp/.zgroup", 0, None).unwrap();
        assert_eq!(bytes, b"{\"zarr_format\":2}");
    }

    #[test]
    fn list_matches_directory_entries() {
        let tmp = tempdir::TempDir::new("nczarr-fs-test").unwrap();
        let map = FileSystemMap::open_or_create(tmp.path()).unwrap();
        map.write("a/.zgroup", b"{}").unwrap();
        map.write("a/b/.zarray", b"{}").unwrap();
        let children = map.list("a").unwrap();
        assert_eq!(children, vec![".zgroup".to_string(), "b".to_string()]);
    }
}
