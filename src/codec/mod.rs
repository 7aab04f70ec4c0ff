//! Codec registry (spec §4.D) and filter pipeline (spec §4.E).

pub mod bytes_codec;
pub mod filter;
#[cfg(feature = "gzip")]
pub mod gzip_codec;
pub mod registry;

pub use filter::{Filter, FilterChain, FilterFlags};
pub use registry::CodecPlugin;
