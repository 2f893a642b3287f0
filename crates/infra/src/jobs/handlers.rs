//! The three deferred job bodies.
//!
//! Execution is at-least-once, so every body re-reads current state instead of
//! trusting its payload: the restock re-derives the deficit, and a reminder
//! for an already-returned item is a successful no-op.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use stacks_catalog::{AuditAction, AuditEntry, HoldingKind, Item};
use stacks_core::{ItemId, UserId};
use stacks_ledger::LedgerEntry;

use crate::notifier::{Contacts, Notifier};
use crate::store::{LibraryStore, StoreTransaction, TxMutation};

use super::executor::JobHandler;
use super::types::{Job, JobKind, JobResult};

/// Handler for every circulation job kind.
pub struct CirculationJobHandler {
    store: Arc<dyn LibraryStore>,
    notifier: Arc<dyn Notifier>,
    contacts: Contacts,
}

impl CirculationJobHandler {
    pub fn new(
        store: Arc<dyn LibraryStore>,
        notifier: Arc<dyn Notifier>,
        contacts: Contacts,
    ) -> Self {
        Self {
            store,
            notifier,
            contacts,
        }
    }

    async fn item(&self, item_id: ItemId) -> Result<Option<Item>, String> {
        self.store.item(item_id).await.map_err(|e| e.to_string())
    }

    async fn run_restock(&self, item_id: ItemId) -> JobResult {
        let item = match self.item(item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => return JobResult::Failure(format!("item {item_id} no longer cataloged")),
            Err(e) => return JobResult::Failure(e),
        };

        // Re-derive from current state; the scheduled deficit may be stale,
        // and a duplicate delivery must not double-apply.
        let deficit = item.deficit();
        if deficit <= 0 {
            debug!(item_id = %item_id, deficit, "restock no longer needed");
            return JobResult::Success;
        }

        let cost = deficit * item.stock_price;
        let entry = match LedgerEntry::debit(
            cost,
            format!("Auto-restocked \"{}\" ({} units)", item.title, deficit),
        ) {
            Ok(entry) => entry,
            Err(e) => return JobResult::Failure(e.to_string()),
        };

        let tx = StoreTransaction::new()
            .mutate(TxMutation::AdjustStock {
                item_id,
                delta: deficit,
            })
            .mutate(TxMutation::InsertAudit(AuditEntry::record(
                item_id,
                UserId::system(),
                AuditAction::Stock,
            )))
            .mutate(TxMutation::ApplyLedgerEntry(entry));

        match self.store.commit(tx).await {
            Ok(()) => {
                info!(item_id = %item_id, added = deficit, "restock complete");
                JobResult::Success
            }
            Err(e) => JobResult::Failure(e.to_string()),
        }
    }

    async fn run_low_stock_notice(&self, item_id: ItemId) -> JobResult {
        let item = match self.item(item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                debug!(item_id = %item_id, "item gone; nothing to report");
                return JobResult::Success;
            }
            Err(e) => return JobResult::Failure(e),
        };

        let result = self.notifier.send(
            &self.contacts.ops,
            &format!("Replenish Inventory - \"{}\"", item.title),
            &format!(
                "Please initiate restocking for \"{}\". Only one copy is available.",
                item.title
            ),
        );
        match result {
            Ok(()) => JobResult::Success,
            Err(e) => JobResult::Failure(e.to_string()),
        }
    }

    async fn run_borrow_reminder(&self, user: &UserId, item_id: ItemId) -> JobResult {
        // The loan may have been returned since scheduling; a stale reminder
        // must be a no-op.
        let holding = match self
            .store
            .holding(user, item_id, HoldingKind::Borrow)
            .await
        {
            Ok(h) => h,
            Err(e) => return JobResult::Failure(e.to_string()),
        };
        if holding.is_none() {
            debug!(user = %user, item_id = %item_id, "loan already returned; reminder skipped");
            return JobResult::Success;
        }

        let item = match self.item(item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => return JobResult::Success,
            Err(e) => return JobResult::Failure(e),
        };

        let result = self.notifier.send(
            user.as_str(),
            &format!("Reminder: Return \"{}\"", item.title),
            &format!(
                "Hello,\n\nOur records show that you are still in possession of \"{}\". \
                 Please ensure its return within the borrowing period to avoid any \
                 restrictions.\n\nThank you.",
                item.title
            ),
        );
        match result {
            Ok(()) => JobResult::Success,
            Err(e) => JobResult::Failure(e.to_string()),
        }
    }
}

#[async_trait]
impl JobHandler for CirculationJobHandler {
    async fn run(&self, job: &Job) -> JobResult {
        match &job.kind {
            JobKind::AutoRestock { item_id, .. } => self.run_restock(*item_id).await,
            JobKind::LowStockNotice { item_id } => self.run_low_stock_notice(*item_id).await,
            JobKind::BorrowReminder { user, item_id } => {
                self.run_borrow_reminder(user, *item_id).await
            }
        }
    }
}
