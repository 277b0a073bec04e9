//! Shared-string caching engine.
//!
//! A workbook's text is de-duplicated into one shared table referenced by
//! index from every worksheet. This module keeps random access to that
//! table within a fixed memory budget: two resident page windows, a bounded
//! hot LRU set and a disk-backed index cooperate behind
//! [`SharedStringCache::get`].

pub mod disk_index;
pub mod lru;
pub mod shared_strings;
pub mod sst;

pub use disk_index::DiskBackedIndex;
pub use lru::LruCache;
pub use shared_strings::{CacheConfig, SharedStringCache};
pub use sst::SstScanner;
