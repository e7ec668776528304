//! Eviction policy.
//!
//! - [`LruReplacer`] - least recently used, by monotonic access stamp

mod lru;

pub use lru::LruReplacer;
