//! Redis-backed listing cache (optional).
//!
//! Every operation degrades gracefully: a Redis error is logged and reported
//! as a miss / no-op, matching the contract that the cache can never fail a
//! read path.

use std::time::Duration;

use redis::Commands;
use tracing::warn;

use stacks_catalog::Listing;

use super::ListingCache;

/// Redis TTL cache for listing results.
#[derive(Debug, Clone)]
pub struct RedisListingCache {
    client: redis::Client,
}

impl RedisListingCache {
    pub fn new(redis_url: impl AsRef<str>) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url.as_ref())?;
        Ok(Self { client })
    }

    fn connection(&self) -> Option<redis::Connection> {
        match self.client.get_connection() {
            Ok(conn) => Some(conn),
            Err(e) => {
                warn!(error = %e, "redis connection failed");
                None
            }
        }
    }
}

impl ListingCache for RedisListingCache {
    fn get(&self, key: &str) -> Option<Listing> {
        let mut conn = self.connection()?;
        let raw: Option<String> = match conn.get(key) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "redis get failed");
                return None;
            }
        };
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(listing) => Some(listing),
            Err(e) => {
                warn!(key, error = %e, "cached listing failed to deserialize");
                None
            }
        }
    }

    fn put(&self, key: &str, listing: &Listing, ttl: Duration) {
        let Some(mut conn) = self.connection() else {
            return;
        };
        let raw = match serde_json::to_string(listing) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "listing failed to serialize");
                return;
            }
        };
        if let Err(e) = conn.set_ex::<_, _, ()>(key, raw, ttl.as_secs()) {
            warn!(key, error = %e, "redis set failed");
        }
    }

    fn clear(&self) {
        let Some(mut conn) = self.connection() else {
            return;
        };
        let keys: Vec<String> = match conn.keys("books:search:*") {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "redis keys scan failed");
                return;
            }
        };
        if keys.is_empty() {
            return;
        }
        if let Err(e) = conn.del::<_, ()>(keys) {
            warn!(error = %e, "redis del failed");
        }
    }

    fn ping(&self) -> bool {
        let Some(mut conn) = self.connection() else {
            return false;
        };
        matches!(
            redis::cmd("PING").query::<String>(&mut conn).as_deref(),
            Ok("PONG")
        )
    }
}
