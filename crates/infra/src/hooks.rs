//! Post-commit hook execution.
//!
//! The circulation core returns its non-transactional follow-up work as an
//! explicit hook list; this runner executes it best-effort after the commit.
//! A hook failure is logged and never surfaces to the caller — the foreground
//! operation already succeeded.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::circulation::PostCommitHook;
use crate::jobs::{Job, JobKind, JobStore};
use crate::monitor::StockMonitor;
use crate::watcher::MilestoneWatcher;

/// Delay before a borrow-reminder job becomes eligible.
pub const BORROW_REMINDER_DELAY: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// Executes the hook list a committed operation returned.
#[derive(Clone)]
pub struct HookRunner {
    monitor: StockMonitor,
    watcher: MilestoneWatcher,
    jobs: Arc<dyn JobStore>,
}

impl HookRunner {
    pub fn new(monitor: StockMonitor, watcher: MilestoneWatcher, jobs: Arc<dyn JobStore>) -> Self {
        Self {
            monitor,
            watcher,
            jobs,
        }
    }

    pub async fn run(&self, hooks: Vec<PostCommitHook>) {
        for hook in hooks {
            match hook {
                PostCommitHook::EvaluateStock { item_id } => {
                    if let Err(e) = self.monitor.evaluate(item_id).await {
                        warn!(item_id = %item_id, error = %e, "stock evaluation hook failed");
                    }
                }
                PostCommitHook::ScheduleBorrowReminder { user, item_id } => {
                    let job = Job::new(JobKind::BorrowReminder {
                        user: user.clone(),
                        item_id,
                    })
                    .delayed(BORROW_REMINDER_DELAY);
                    if let Err(e) = self.jobs.enqueue(job).await {
                        warn!(user = %user, item_id = %item_id, error = %e, "reminder scheduling failed");
                    }
                }
                PostCommitHook::CheckMilestone => {
                    if let Err(e) = self.watcher.run().await {
                        warn!(error = %e, "milestone check hook failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circulation::CirculationService;
    use crate::jobs::InMemoryJobStore;
    use crate::notifier::{Contacts, RecordingNotifier};
    use crate::store::{InMemoryLibraryStore, LibraryStore};
    use stacks_catalog::ItemDraft;
    use stacks_core::UserId;

    struct Fixture {
        service: CirculationService,
        runner: HookRunner,
        jobs: Arc<InMemoryJobStore>,
        notifier: Arc<RecordingNotifier>,
        store: Arc<InMemoryLibraryStore>,
    }

    async fn fixture(copies: i64) -> (Fixture, stacks_catalog::Item) {
        let store = Arc::new(InMemoryLibraryStore::new());
        let item = ItemDraft {
            isbn: "978-0-06-112008-4".to_string(),
            title: "To Kill a Mockingbird".to_string(),
            authors: vec!["Harper Lee".to_string()],
            genres: vec!["classic".to_string()],
            publisher: "Harper".to_string(),
            page_count: 281,
            published_year: 1960,
            sell_price: 1_199,
            stock_price: 500,
            borrow_price: 110,
            copies,
        }
        .build()
        .unwrap();
        store.insert_item(item.clone()).await.unwrap();

        let jobs = InMemoryJobStore::arc();
        let notifier = RecordingNotifier::arc();
        let store_dyn: Arc<dyn LibraryStore> = store.clone();
        let monitor = StockMonitor::new(
            store_dyn.clone(),
            jobs.clone(),
            notifier.clone(),
            Contacts::default(),
        );
        let watcher = MilestoneWatcher::new(store_dyn.clone(), notifier.clone(), Contacts::default());
        let runner = HookRunner::new(monitor, watcher, jobs.clone());
        let service = CirculationService::new(store_dyn);

        (
            Fixture {
                service,
                runner,
                jobs,
                notifier,
                store,
            },
            item,
        )
    }

    #[tokio::test]
    async fn borrow_to_last_copy_schedules_reminder_notice_and_restock() {
        let (fx, item) = fixture(2).await;
        let user = UserId::new("reader@example.com").unwrap();

        let done = fx.service.borrow(&user, item.id).await.unwrap();
        fx.runner.run(done.hooks).await;

        let queued = fx.jobs.list_by_status(None, 10).await.unwrap();
        let mut kinds: Vec<&str> = queued.iter().map(|j| j.kind.type_name()).collect();
        kinds.sort();
        assert_eq!(
            kinds,
            ["notify.borrow_reminder", "notify.low_stock", "restock.auto"]
        );

        // Restock deficit was computed at schedule time: 2 - 1 = 1.
        let deficit = queued
            .iter()
            .find_map(|j| match j.kind {
                JobKind::AutoRestock { deficit, .. } => Some(deficit),
                _ => None,
            })
            .unwrap();
        assert_eq!(deficit, 1);

        // Immediate ops notice went out; milestone stayed quiet.
        assert_eq!(fx.notifier.sent().len(), 1);
        assert!(!fx.store.wallet().await.unwrap().milestone_sent);
    }

    #[tokio::test]
    async fn borrow_with_plenty_of_stock_only_schedules_the_reminder() {
        let (fx, item) = fixture(5).await;
        let user = UserId::new("reader@example.com").unwrap();

        let done = fx.service.borrow(&user, item.id).await.unwrap();
        fx.runner.run(done.hooks).await;

        let queued = fx.jobs.list_by_status(None, 10).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert!(matches!(queued[0].kind, JobKind::BorrowReminder { .. }));
        assert!(!queued[0].is_ready(), "reminder must be delayed");
    }
}
