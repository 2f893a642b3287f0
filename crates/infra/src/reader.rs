//! Cached read side for catalog listings, item detail, and holdings summary.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use stacks_catalog::{AuditEntry, HoldingKind, Item, Listing, SearchQuery};
use stacks_core::ItemId;

use crate::cache::{ListingCache, LISTING_TTL};
use crate::store::{AuditFilter, LibraryStore, StoreError};

/// How many recent audit rows an item detail view carries.
pub const RECENT_ACTIVITY_LIMIT: usize = 10;

/// One row of the per-user holdings summary.
#[derive(Debug, Clone, Serialize)]
pub struct UserHoldingRow {
    #[serde(rename = "type")]
    pub kind: HoldingKind,
    pub quantity: i64,
    #[serde(rename = "bookId")]
    pub book_id: ItemId,
    pub title: String,
    pub authors: Vec<String>,
    pub genres: Vec<String>,
}

/// Read-side queries, listing search behind the TTL cache.
#[derive(Clone)]
pub struct CatalogReader {
    store: Arc<dyn LibraryStore>,
    cache: Arc<dyn ListingCache>,
}

impl CatalogReader {
    pub fn new(store: Arc<dyn LibraryStore>, cache: Arc<dyn ListingCache>) -> Self {
        Self { store, cache }
    }

    /// Cache-aside listing search with the fixed 1-hour TTL.
    pub async fn search(&self, query: &SearchQuery) -> Result<Listing, StoreError> {
        let key = query.cache_key();
        if let Some(hit) = self.cache.get(&key) {
            debug!(key, "listing cache hit");
            return Ok(hit);
        }

        let listing = self.store.search_items(query).await?;
        self.cache.put(&key, &listing, LISTING_TTL);
        Ok(listing)
    }

    /// Item plus its most recent audit activity.
    pub async fn item_detail(
        &self,
        item_id: ItemId,
    ) -> Result<Option<(Item, Vec<AuditEntry>)>, StoreError> {
        let Some(item) = self.store.item(item_id).await? else {
            return Ok(None);
        };
        let activity = self
            .store
            .audit_entries(&AuditFilter {
                item_id: Some(item_id),
                action: None,
                limit: Some(RECENT_ACTIVITY_LIMIT),
            })
            .await?;
        Ok(Some((item, activity)))
    }

    /// Every user's holdings, grouped by user identity.
    pub async fn holdings_summary(
        &self,
    ) -> Result<BTreeMap<String, Vec<UserHoldingRow>>, StoreError> {
        let holdings = self.store.all_holdings().await?;
        let catalog = self
            .store
            .search_items(&SearchQuery {
                get_all: true,
                ..Default::default()
            })
            .await?;
        let by_id: HashMap<ItemId, &Item> = catalog.items.iter().map(|i| (i.id, i)).collect();

        let mut summary: BTreeMap<String, Vec<UserHoldingRow>> = BTreeMap::new();
        for holding in holdings {
            let Some(item) = by_id.get(&holding.item_id) else {
                continue;
            };
            summary
                .entry(holding.user.to_string())
                .or_default()
                .push(UserHoldingRow {
                    kind: holding.kind,
                    quantity: holding.quantity,
                    book_id: item.id,
                    title: item.title.clone(),
                    authors: item.authors.clone(),
                    genres: item.genres.clone(),
                });
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryListingCache;
    use crate::store::{InMemoryLibraryStore, StoreTransaction, TxMutation};
    use stacks_catalog::{Holding, ItemDraft};
    use stacks_core::UserId;

    fn draft(title: &str) -> ItemDraft {
        ItemDraft {
            isbn: format!("isbn-{title}"),
            title: title.to_string(),
            authors: vec!["Author".to_string()],
            genres: vec!["fiction".to_string()],
            publisher: "Publisher".to_string(),
            page_count: 150,
            published_year: 2010,
            sell_price: 900,
            stock_price: 400,
            borrow_price: 90,
            copies: 2,
        }
    }

    async fn setup() -> (CatalogReader, Arc<InMemoryLibraryStore>) {
        let store = Arc::new(InMemoryLibraryStore::new());
        let cache = Arc::new(InMemoryListingCache::new());
        (CatalogReader::new(store.clone(), cache), store)
    }

    #[tokio::test]
    async fn search_serves_bounded_stale_results_from_cache() {
        let (reader, store) = setup().await;
        store
            .insert_item(draft("First").build().unwrap())
            .await
            .unwrap();

        let query = SearchQuery::default();
        assert_eq!(reader.search(&query).await.unwrap().total, 1);

        // A write after population is invisible until the TTL expires.
        store
            .insert_item(draft("Second").build().unwrap())
            .await
            .unwrap();
        assert_eq!(reader.search(&query).await.unwrap().total, 1);

        // A different query misses the cache and sees fresh state.
        assert_eq!(reader.search(&SearchQuery::new("second")).await.unwrap().total, 1);
    }

    #[tokio::test]
    async fn item_detail_carries_recent_activity() {
        let (reader, store) = setup().await;
        let item = draft("Detail").build().unwrap();
        store.insert_item(item.clone()).await.unwrap();

        let user = UserId::new("reader@example.com").unwrap();
        for _ in 0..12 {
            let tx = StoreTransaction::new().mutate(TxMutation::InsertAudit(
                stacks_catalog::AuditEntry::record(
                    item.id,
                    user.clone(),
                    stacks_catalog::AuditAction::Borrow,
                ),
            ));
            store.commit(tx).await.unwrap();
        }

        let (found, activity) = reader.item_detail(item.id).await.unwrap().unwrap();
        assert_eq!(found.id, item.id);
        assert_eq!(activity.len(), RECENT_ACTIVITY_LIMIT);

        assert!(reader.item_detail(ItemId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn holdings_summary_groups_by_user() {
        let (reader, store) = setup().await;
        let item = draft("Shared").build().unwrap();
        store.insert_item(item.clone()).await.unwrap();

        let alice = UserId::new("alice@example.com").unwrap();
        let bob = UserId::new("bob@example.com").unwrap();
        for holding in [
            Holding::borrow(alice.clone(), item.id),
            Holding::purchase(bob.clone(), item.id),
        ] {
            let tx = StoreTransaction::new().mutate(TxMutation::InsertHolding(holding));
            store.commit(tx).await.unwrap();
        }

        let summary = reader.holdings_summary().await.unwrap();
        assert_eq!(summary.len(), 2);
        assert_eq!(summary["alice@example.com"][0].kind, HoldingKind::Borrow);
        assert_eq!(summary["bob@example.com"][0].kind, HoldingKind::Buy);
        assert_eq!(summary["bob@example.com"][0].title, "Shared");
    }
}
