//! The key-value map abstraction (spec §4.A) — every persisted byte in
//! an NCZarr dataset travels through an implementation of [`Map`].
//!
//! Grounded on the teacher's split `Store`/`ReadableStore`/
//! `WriteableStore`/`ListableStore` traits
//! (`clbarnes-zarr3-rs/src/store/mod.rs`), collapsed into one trait
//! because the spec's map contract (`exists/len/read/write/list/
//! delete`) does not need the type-level read/write capability split:
//! NCZarr opens exactly one concrete map per dataset and decides at
//! runtime (via [`Map::listable`]) whether probing is needed, rather
//! than at compile time via distinct trait bounds.

#[cfg(feature = "filesystem")]
pub mod filesystem;
#[cfg(feature = "http")]
pub mod http;
pub mod memory;

use crate::error::{NczError, NczResult};

/// Uniform key-value store. Keys are POSIX-like `/`-separated paths,
/// always relative to the map's own root.
pub trait Map: Send + Sync {
    /// Does this key exist?
    fn exists(&self, key: &str) -> NczResult<bool>;

    /// Length in bytes of the value at `key`, or `EmptyObject` if absent.
    fn len(&self, key: &str) -> NczResult<u64>;

    /// Read `count` bytes starting at `offset`. `count = None` reads to
    /// the end of the value. Returns `EmptyObject` if the key is absent.
    fn read(&self, key: &str, offset: u64, count: Option<u64>) -> NczResult<Vec<u8>>;

    /// Overwrite (or create) the value at `key`.
    fn write(&self, key: &str, bytes: &[u8]) -> NczResult<()>;

    /// List the immediate children of `prefix` (spec: map may be
    /// unlistable, in which case this returns `CANTLIST`-shaped errors
    /// and callers must probe well-known keys instead).
    fn list(&self, prefix: &str) -> NczResult<Vec<String>>;

    /// Remove the value at `key`. Not an error if already absent.
    fn delete(&self, key: &str) -> NczResult<()>;

    /// Discard and recreate the entire map at its root URL.
    fn truncate(&self) -> NczResult<()>;

    /// Release resources; `delete` requests the backing storage itself
    /// be removed (only meaningful for owned-lifetime backends such as
    /// temp directories).
    fn close(&self, delete: bool) -> NczResult<()>;

    /// Whether [`Map::list`] is meaningfully supported. An HTTP(S) map
    /// is the canonical "false" case (spec §6); metadata codecs must
    /// fall back to probing well-known child keys when this is false.
    fn listable(&self) -> bool {
        true
    }
}

/// Read helper shared by every backend: turn an I/O "not found" into
/// the spec's `EmptyObject` rather than propagating a raw `io::Error`.
pub(crate) fn not_found(key: &str) -> NczError {
    NczError::EmptyObject(key.to_string())
}

pub fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix.trim_end_matches('/'), name)
    }
}
