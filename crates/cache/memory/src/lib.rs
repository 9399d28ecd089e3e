//! In-process cache backend with per-region eviction policies.
//!
//! A region is either time-bounded (entries expire after a TTL, evicted
//! lazily on read) or size-bounded (least-recently-used entries are dropped
//! once the region reaches capacity). The policy is fixed when the region is
//! first created.

mod store;

pub use store::{MemoryCache, RegionPolicy};
