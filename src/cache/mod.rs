//! Cache index (spec §4.L) and the chunk cache built on top of it
//! (spec §4.F).

pub mod chunk_cache;
pub mod index;

pub use chunk_cache::{ChunkCache, ChunkKey, FlushFn};
pub use index::CacheIndex;
