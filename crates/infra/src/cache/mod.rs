//! Read-side listing cache boundary.
//!
//! The cache is populated only by the read path (populate-on-miss) and is
//! never invalidated by writes; staleness is bounded by the TTL. Cache
//! failures are swallowed and logged — a broken cache degrades to slower
//! reads, never to failed ones.

use std::time::Duration;

use stacks_catalog::Listing;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_cache;

pub use in_memory::InMemoryListingCache;
#[cfg(feature = "redis")]
pub use redis_cache::RedisListingCache;

/// How long a cached listing stays valid.
pub const LISTING_TTL: Duration = Duration::from_secs(3600);

/// TTL key/value store for listing results.
pub trait ListingCache: Send + Sync {
    fn get(&self, key: &str) -> Option<Listing>;

    fn put(&self, key: &str, listing: &Listing, ttl: Duration);

    /// Drop every cached listing (operator escape hatch).
    fn clear(&self);

    /// Round-trip health probe.
    fn ping(&self) -> bool;
}
