use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use stacks_catalog::Listing;

use super::ListingCache;

/// In-memory TTL cache for tests/dev and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryListingCache {
    slots: Mutex<HashMap<String, (Instant, Listing)>>,
}

impl InMemoryListingCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ListingCache for InMemoryListingCache {
    fn get(&self, key: &str) -> Option<Listing> {
        let mut slots = self.slots.lock().unwrap();
        match slots.get(key) {
            Some((expires_at, listing)) if *expires_at > Instant::now() => Some(listing.clone()),
            Some(_) => {
                slots.remove(key);
                None
            }
            None => None,
        }
    }

    fn put(&self, key: &str, listing: &Listing, ttl: Duration) {
        let mut slots = self.slots.lock().unwrap();
        slots.insert(key.to_string(), (Instant::now() + ttl, listing.clone()));
    }

    fn clear(&self) {
        self.slots.lock().unwrap().clear();
    }

    fn ping(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(total: u64) -> Listing {
        Listing {
            items: Vec::new(),
            total,
        }
    }

    #[test]
    fn hit_within_ttl_miss_after_expiry() {
        let cache = InMemoryListingCache::new();
        cache.put("k", &listing(3), Duration::from_secs(60));
        assert_eq!(cache.get("k").unwrap().total, 3);

        cache.put("gone", &listing(1), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("gone").is_none());
    }

    #[test]
    fn clear_empties_everything() {
        let cache = InMemoryListingCache::new();
        cache.put("a", &listing(1), Duration::from_secs(60));
        cache.put("b", &listing(2), Duration::from_secs(60));
        cache.clear();
        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_none());
    }
}
