//! Structural-equality cache
//!
//! Turns "simple" values (primitives and objects of simple values) into
//! canonical hashes, and stores assets under `(hash, pass)` locks. The document
//! stream caches sit on top of it.

mod simple_cache;
mod simple_hash;

pub use simple_cache::*;
pub use simple_hash::*;

#[cfg(test)]
mod simple_hash_test;
