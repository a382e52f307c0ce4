//! Content-addressed memoization.
//!
//! A processor with a cache attached routes every invocation through this
//! module: the [`fingerprint()`] of its class, parameters and input is looked
//! up in the [`CacheBackend`]; a hit is returned as is, a miss is computed and
//! stored. Matching is exact; nothing is ever evicted automatically.

pub mod cache;
pub mod fingerprint;

pub use cache::{CacheBackend, FileCache, MemoryCache};
pub use fingerprint::{CacheKey, fingerprint, fingerprint_value};
