//! Stock replenishment monitor.
//!
//! A pure trigger invoked post-commit after any stock decrement. It persists
//! nothing itself: when an item is down to exactly one copy it sends an
//! immediate best-effort ops notice and schedules the deferred low-stock
//! notice and auto-restock jobs.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use stacks_core::ItemId;

use crate::jobs::{Job, JobKind, JobStore, JobStoreError};
use crate::notifier::{Contacts, Notifier};
use crate::store::{LibraryStore, StoreError};

/// The copy count that arms the monitor. Deliberately fixed at 1: the trigger
/// fires on the transition to "last copy on the shelf", not below some
/// configurable minimum.
pub const LOW_STOCK_TRIGGER: i64 = 1;

/// Delay before the deferred low-stock notice and restock jobs run.
pub const REPLENISH_JOB_DELAY: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Jobs(#[from] JobStoreError),
}

/// Inspects post-commit stock levels and enqueues deferred work.
#[derive(Clone)]
pub struct StockMonitor {
    store: Arc<dyn LibraryStore>,
    jobs: Arc<dyn JobStore>,
    notifier: Arc<dyn Notifier>,
    contacts: Contacts,
}

impl StockMonitor {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        jobs: Arc<dyn JobStore>,
        notifier: Arc<dyn Notifier>,
        contacts: Contacts,
    ) -> Self {
        Self {
            store,
            jobs,
            notifier,
            contacts,
        }
    }

    /// Look at an item's current stock and, at exactly [`LOW_STOCK_TRIGGER`]
    /// copies, fire the immediate notice and schedule the deferred jobs.
    pub async fn evaluate(&self, item_id: ItemId) -> Result<(), MonitorError> {
        let Some(item) = self.store.item(item_id).await? else {
            return Ok(());
        };

        if item.current_copies != LOW_STOCK_TRIGGER {
            debug!(item_id = %item_id, copies = item.current_copies, "stock level uninteresting");
            return Ok(());
        }

        // Immediate heads-up is best-effort; the deferred notice retries.
        if let Err(e) = self.notifier.send(
            &self.contacts.ops,
            &format!("Replenish Inventory - \"{}\"", item.title),
            &format!(
                "Please initiate restocking for \"{}\". Only one copy is available.",
                item.title
            ),
        ) {
            warn!(item_id = %item_id, error = %e, "immediate low-stock notice failed");
        }

        self.jobs
            .enqueue(
                Job::new(JobKind::LowStockNotice { item_id }).delayed(REPLENISH_JOB_DELAY),
            )
            .await?;

        // Deficit is computed now for observability; the handler re-derives
        // it at execution time.
        let deficit = item.deficit();
        if deficit > 0 {
            self.jobs
                .enqueue(
                    Job::new(JobKind::AutoRestock { item_id, deficit })
                        .delayed(REPLENISH_JOB_DELAY),
                )
                .await?;
        }

        info!(
            item_id = %item_id,
            deficit,
            "low stock detected; replenishment scheduled"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::InMemoryJobStore;
    use crate::notifier::RecordingNotifier;
    use crate::store::InMemoryLibraryStore;
    use stacks_catalog::{Item, ItemDraft};

    async fn setup(
        copies: i64,
        initial: i64,
    ) -> (
        StockMonitor,
        Arc<InMemoryJobStore>,
        Arc<RecordingNotifier>,
        Item,
    ) {
        let store = Arc::new(InMemoryLibraryStore::new());
        let mut item = ItemDraft {
            isbn: "978-0-7432-7356-5".to_string(),
            title: "The Great Gatsby".to_string(),
            authors: vec!["F. Scott Fitzgerald".to_string()],
            genres: vec!["classic".to_string()],
            publisher: "Scribner".to_string(),
            page_count: 180,
            published_year: 1925,
            sell_price: 1_099,
            stock_price: 450,
            borrow_price: 99,
            copies: initial,
        }
        .build()
        .unwrap();
        item.current_copies = copies;
        store.insert_item(item.clone()).await.unwrap();

        let jobs = InMemoryJobStore::arc();
        let notifier = RecordingNotifier::arc();
        let monitor = StockMonitor::new(store, jobs.clone(), notifier.clone(), Contacts::default());
        (monitor, jobs, notifier, item)
    }

    #[tokio::test]
    async fn quiet_above_the_trigger() {
        let (monitor, jobs, notifier, item) = setup(2, 4).await;
        monitor.evaluate(item.id).await.unwrap();
        assert!(jobs.list_by_status(None, 10).await.unwrap().is_empty());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn quiet_at_zero_copies() {
        let (monitor, jobs, _notifier, item) = setup(0, 4).await;
        monitor.evaluate(item.id).await.unwrap();
        assert!(jobs.list_by_status(None, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_copy_schedules_notice_and_restock() {
        let (monitor, jobs, notifier, item) = setup(1, 4).await;
        monitor.evaluate(item.id).await.unwrap();

        let queued = jobs.list_by_status(None, 10).await.unwrap();
        assert_eq!(queued.len(), 2);

        let restocks: Vec<_> = queued
            .iter()
            .filter_map(|j| match &j.kind {
                JobKind::AutoRestock { deficit, .. } => Some(*deficit),
                _ => None,
            })
            .collect();
        assert_eq!(restocks, [3]);
        assert!(queued
            .iter()
            .any(|j| matches!(j.kind, JobKind::LowStockNotice { .. })));

        // Both jobs are delayed, not immediately eligible.
        assert!(queued.iter().all(|j| !j.is_ready()));

        // And the immediate ops heads-up went out.
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("The Great Gatsby"));
    }

    #[tokio::test]
    async fn zero_deficit_skips_the_restock_job() {
        let (monitor, jobs, _notifier, item) = setup(1, 1).await;
        monitor.evaluate(item.id).await.unwrap();

        let queued = jobs.list_by_status(None, 10).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert!(matches!(queued[0].kind, JobKind::LowStockNotice { .. }));
    }

    #[tokio::test]
    async fn notifier_failure_does_not_block_scheduling() {
        let (monitor, jobs, notifier, item) = setup(1, 4).await;
        notifier.set_failing(true);
        monitor.evaluate(item.id).await.unwrap();
        assert_eq!(jobs.list_by_status(None, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unknown_item_is_a_no_op() {
        let (monitor, jobs, _notifier, _item) = setup(1, 4).await;
        monitor.evaluate(stacks_core::ItemId::new()).await.unwrap();
        // Only the seeded item could schedule anything, and it wasn't touched.
        assert!(jobs.list_by_status(None, 10).await.unwrap().is_empty());
    }
}
