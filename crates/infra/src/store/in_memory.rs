use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use stacks_catalog::{AuditEntry, Holding, HoldingKind, Item, Listing, SearchQuery};
use stacks_core::{ItemId, UserId};
use stacks_ledger::{LedgerEntry, Wallet};

use super::r#trait::{
    AuditFilter, LedgerFilter, LibraryStore, StoreError, StoreTransaction, TxGuard, TxMutation,
};

#[derive(Debug, Clone)]
struct State {
    items: HashMap<ItemId, Item>,
    holdings: Vec<Holding>,
    audit: Vec<AuditEntry>,
    wallet: Wallet,
    entries: Vec<LedgerEntry>,
}

impl State {
    fn holding_position(&self, user: &UserId, item_id: ItemId, kind: HoldingKind) -> Option<usize> {
        self.holdings
            .iter()
            .position(|h| &h.user == user && h.item_id == item_id && h.kind == kind)
    }

    fn check_guard(&self, guard: &TxGuard) -> Result<(), StoreError> {
        match guard {
            TxGuard::StockAtLeast { item_id, min } => {
                let item = self
                    .items
                    .get(item_id)
                    .ok_or_else(|| StoreError::NotFound(format!("item {item_id}")))?;
                if item.current_copies < *min {
                    return Err(StoreError::Conflict(format!(
                        "item {item_id} has {} copies, need {min}",
                        item.current_copies
                    )));
                }
                Ok(())
            }
            TxGuard::HoldingAbsent {
                user,
                item_id,
                kind,
            } => {
                if self.holding_position(user, *item_id, *kind).is_some() {
                    return Err(StoreError::Conflict(format!(
                        "{kind} holding already exists for {user} on {item_id}"
                    )));
                }
                Ok(())
            }
            TxGuard::HoldingCountAtMost { user, kind, max } => {
                let count = self
                    .holdings
                    .iter()
                    .filter(|h| &h.user == user && h.kind == *kind)
                    .count() as i64;
                if count > *max {
                    return Err(StoreError::Conflict(format!(
                        "{user} has {count} {kind} holdings, cap {max}"
                    )));
                }
                Ok(())
            }
            TxGuard::HoldingQuantityAtMost {
                user,
                item_id,
                kind,
                max,
            } => {
                let total: i64 = self
                    .holdings
                    .iter()
                    .filter(|h| {
                        &h.user == user
                            && h.kind == *kind
                            && item_id.map_or(true, |id| h.item_id == id)
                    })
                    .map(|h| h.quantity)
                    .sum();
                if total > *max {
                    return Err(StoreError::Conflict(format!(
                        "{user} holds quantity {total} of kind {kind}, cap {max}"
                    )));
                }
                Ok(())
            }
            TxGuard::MilestoneUnsent => {
                if self.wallet.milestone_sent {
                    return Err(StoreError::Conflict("milestone already sent".to_string()));
                }
                Ok(())
            }
        }
    }

    fn apply_mutation(&mut self, mutation: &TxMutation) -> Result<(), StoreError> {
        match mutation {
            TxMutation::AdjustStock { item_id, delta } => {
                let item = self
                    .items
                    .get_mut(item_id)
                    .ok_or_else(|| StoreError::NotFound(format!("item {item_id}")))?;
                let next = item.current_copies + delta;
                if next < 0 {
                    return Err(StoreError::Conflict(format!(
                        "stock of {item_id} would drop to {next}"
                    )));
                }
                item.current_copies = next;
                Ok(())
            }
            TxMutation::InsertAudit(entry) => {
                self.audit.push(entry.clone());
                Ok(())
            }
            TxMutation::InsertHolding(holding) => {
                if self
                    .holding_position(&holding.user, holding.item_id, holding.kind)
                    .is_some()
                {
                    return Err(StoreError::Conflict(format!(
                        "{} holding already exists for {} on {}",
                        holding.kind, holding.user, holding.item_id
                    )));
                }
                self.holdings.push(holding.clone());
                Ok(())
            }
            TxMutation::DeleteHolding {
                user,
                item_id,
                kind,
            } => match self.holding_position(user, *item_id, *kind) {
                Some(pos) => {
                    self.holdings.remove(pos);
                    Ok(())
                }
                // The holding was observed before the commit; losing it is a race.
                None => Err(StoreError::Conflict(format!(
                    "{kind} holding for {user} on {item_id} is gone"
                ))),
            },
            TxMutation::AdjustHoldingQuantity {
                user,
                item_id,
                kind,
                delta,
            } => match self.holding_position(user, *item_id, *kind) {
                Some(pos) => {
                    let next = self.holdings[pos].quantity + delta;
                    if next < 1 {
                        return Err(StoreError::Conflict(format!(
                            "holding quantity would drop to {next}"
                        )));
                    }
                    self.holdings[pos].quantity = next;
                    Ok(())
                }
                None => Err(StoreError::Conflict(format!(
                    "{kind} holding for {user} on {item_id} is gone"
                ))),
            },
            TxMutation::ApplyLedgerEntry(entry) => {
                self.wallet.apply(entry);
                self.entries.push(entry.clone());
                Ok(())
            }
            TxMutation::MarkMilestoneSent => {
                if self.wallet.milestone_sent {
                    return Err(StoreError::Conflict("milestone already sent".to_string()));
                }
                self.wallet.milestone_sent = true;
                Ok(())
            }
        }
    }
}

/// In-memory transactional store.
///
/// Intended for tests/dev. A single mutex serializes every commit, which
/// trivially gives the isolation the contract asks for; commits validate and
/// apply against a scratch copy so a failing batch leaves no trace.
#[derive(Debug)]
pub struct InMemoryLibraryStore {
    state: Mutex<State>,
}

impl InMemoryLibraryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: HashMap::new(),
                holdings: Vec::new(),
                audit: Vec::new(),
                wallet: Wallet::opening(),
                entries: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, State>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Storage("state lock poisoned".to_string()))
    }
}

impl Default for InMemoryLibraryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LibraryStore for InMemoryLibraryStore {
    async fn insert_item(&self, item: Item) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.items.values().any(|i| i.isbn == item.isbn) {
            return Err(StoreError::Conflict(format!(
                "isbn {} already cataloged",
                item.isbn
            )));
        }
        state.items.insert(item.id, item);
        Ok(())
    }

    async fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        Ok(self.lock()?.items.get(&id).cloned())
    }

    async fn search_items(&self, query: &SearchQuery) -> Result<Listing, StoreError> {
        let state = self.lock()?;
        Ok(query.run(state.items.values()))
    }

    async fn holding(
        &self,
        user: &UserId,
        item_id: ItemId,
        kind: HoldingKind,
    ) -> Result<Option<Holding>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .holding_position(user, item_id, kind)
            .map(|pos| state.holdings[pos].clone()))
    }

    async fn holdings_of_kind(
        &self,
        user: &UserId,
        kind: HoldingKind,
    ) -> Result<Vec<Holding>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .holdings
            .iter()
            .filter(|h| &h.user == user && h.kind == kind)
            .cloned()
            .collect())
    }

    async fn all_holdings(&self) -> Result<Vec<Holding>, StoreError> {
        Ok(self.lock()?.holdings.clone())
    }

    async fn audit_entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError> {
        let state = self.lock()?;
        let mut rows: Vec<AuditEntry> = state
            .audit
            .iter()
            .filter(|e| {
                filter.item_id.map_or(true, |id| e.item_id == id)
                    && filter.action.map_or(true, |a| e.action == a)
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn wallet(&self) -> Result<Wallet, StoreError> {
        Ok(self.lock()?.wallet)
    }

    async fn ledger_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.lock()?;
        let needle = filter.reason_contains.as_ref().map(|s| s.to_lowercase());
        let mut rows: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| {
                filter.kind.map_or(true, |k| e.kind == k)
                    && needle
                        .as_ref()
                        .map_or(true, |n| e.reason.to_lowercase().contains(n))
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
        Ok(rows)
    }

    async fn commit(&self, tx: StoreTransaction) -> Result<(), StoreError> {
        if tx.mutations.is_empty() {
            return Err(StoreError::Invalid("empty mutation batch".to_string()));
        }

        let mut state = self.lock()?;

        for guard in &tx.guards {
            state.check_guard(guard)?;
        }

        // Validate-and-apply against a scratch copy; swap in only on success.
        let mut scratch = state.clone();
        for mutation in &tx.mutations {
            scratch.apply_mutation(mutation)?;
        }

        *state = scratch;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stacks_catalog::{AuditAction, ItemDraft};
    use stacks_ledger::OPENING_BALANCE;

    fn reader() -> UserId {
        UserId::new("reader@example.com").unwrap()
    }

    async fn seeded_store(copies: i64) -> (InMemoryLibraryStore, Item) {
        let store = InMemoryLibraryStore::new();
        let item = ItemDraft {
            isbn: "978-0-452-28423-4".to_string(),
            title: "Nineteen Eighty-Four".to_string(),
            authors: vec!["George Orwell".to_string()],
            genres: vec!["dystopia".to_string()],
            publisher: "Plume".to_string(),
            page_count: 328,
            published_year: 1949,
            sell_price: 1_299,
            stock_price: 550,
            borrow_price: 120,
            copies,
        }
        .build()
        .unwrap();
        store.insert_item(item.clone()).await.unwrap();
        (store, item)
    }

    #[tokio::test]
    async fn duplicate_isbn_is_rejected() {
        let (store, item) = seeded_store(2).await;
        let mut dup = item.clone();
        dup.id = ItemId::new();
        assert!(matches!(
            store.insert_item(dup).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_trace() {
        let (store, item) = seeded_store(1).await;

        let tx = StoreTransaction::new()
            .mutate(TxMutation::AdjustStock {
                item_id: item.id,
                delta: -1,
            })
            .mutate(TxMutation::InsertAudit(AuditEntry::record(
                item.id,
                reader(),
                AuditAction::Borrow,
            )))
            // Second decrement overdraws the single copy and must void the
            // first one too.
            .mutate(TxMutation::AdjustStock {
                item_id: item.id,
                delta: -1,
            });

        assert!(matches!(
            store.commit(tx).await,
            Err(StoreError::Conflict(_))
        ));

        let after = store.item(item.id).await.unwrap().unwrap();
        assert_eq!(after.current_copies, 1);
        assert!(store
            .audit_entries(&AuditFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn ledger_mutation_pairs_entry_and_balance() {
        let (store, item) = seeded_store(3).await;
        let entry = LedgerEntry::credit(120, "loan fee").unwrap();

        let tx = StoreTransaction::new()
            .mutate(TxMutation::AdjustStock {
                item_id: item.id,
                delta: -1,
            })
            .mutate(TxMutation::ApplyLedgerEntry(entry));
        store.commit(tx).await.unwrap();

        let wallet = store.wallet().await.unwrap();
        assert_eq!(wallet.balance, OPENING_BALANCE + 120);
        let entries = store
            .ledger_entries(&LedgerFilter::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].amount, 120);
    }

    #[tokio::test]
    async fn stock_guard_blocks_the_batch() {
        let (store, item) = seeded_store(0).await;
        let tx = StoreTransaction::new()
            .guard(TxGuard::StockAtLeast {
                item_id: item.id,
                min: 1,
            })
            .mutate(TxMutation::InsertAudit(AuditEntry::record(
                item.id,
                reader(),
                AuditAction::Borrow,
            )));
        assert!(matches!(
            store.commit(tx).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn holding_uniqueness_is_enforced() {
        let (store, item) = seeded_store(5).await;
        let first = StoreTransaction::new()
            .mutate(TxMutation::InsertHolding(Holding::borrow(reader(), item.id)));
        store.commit(first).await.unwrap();

        let second = StoreTransaction::new()
            .mutate(TxMutation::InsertHolding(Holding::borrow(reader(), item.id)));
        assert!(matches!(
            store.commit(second).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn milestone_flag_sets_exactly_once() {
        let (store, _item) = seeded_store(1).await;
        let set = || {
            StoreTransaction::new()
                .guard(TxGuard::MilestoneUnsent)
                .mutate(TxMutation::MarkMilestoneSent)
        };
        store.commit(set()).await.unwrap();
        assert!(store.wallet().await.unwrap().milestone_sent);
        assert!(matches!(
            store.commit(set()).await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn empty_batch_is_a_contract_violation() {
        let (store, _item) = seeded_store(1).await;
        assert!(matches!(
            store.commit(StoreTransaction::new()).await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn audit_filter_limits_newest_first() {
        let (store, item) = seeded_store(5).await;
        for action in [AuditAction::Borrow, AuditAction::Return, AuditAction::Buy] {
            let tx = StoreTransaction::new().mutate(TxMutation::InsertAudit(AuditEntry::record(
                item.id,
                reader(),
                action,
            )));
            store.commit(tx).await.unwrap();
        }

        let filter = AuditFilter {
            item_id: Some(item.id),
            action: None,
            limit: Some(2),
        };
        let rows = store.audit_entries(&filter).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].recorded_at >= rows[1].recorded_at);

        let buys = store
            .audit_entries(&AuditFilter {
                action: Some(AuditAction::Buy),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(buys.len(), 1);
    }
}
