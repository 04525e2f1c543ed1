//! I/O adapters.

mod cached;

pub use cached::CachedStream;
