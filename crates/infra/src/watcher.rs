//! Wallet milestone watcher.
//!
//! Stateless check, safe to invoke from anywhere: alerts management exactly
//! once when the shared balance first reaches the fixed threshold. The flag
//! commit is guarded, so concurrent invocations cannot double-alert, and a
//! failed dispatch leaves the flag unset for the next invocation.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use stacks_ledger::MILESTONE_THRESHOLD;

use crate::notifier::{Contacts, Notifier, NotifyError};
use crate::store::{LibraryStore, StoreError, StoreTransaction, TxGuard, TxMutation};

/// What a watcher invocation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneOutcome {
    /// Balance still below the threshold.
    NotReached,
    /// The one-time alert already went out (now or earlier).
    AlreadySent,
    /// This invocation sent the alert and set the flag.
    AlertSent,
}

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// One-time balance milestone alerting.
#[derive(Clone)]
pub struct MilestoneWatcher {
    store: Arc<dyn LibraryStore>,
    notifier: Arc<dyn Notifier>,
    contacts: Contacts,
}

impl MilestoneWatcher {
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

    pub async fn run(&self) -> Result<MilestoneOutcome, WatcherError> {
        let wallet = self.store.wallet().await?;
        if wallet.milestone_sent {
            return Ok(MilestoneOutcome::AlreadySent);
        }
        if wallet.balance < MILESTONE_THRESHOLD {
            return Ok(MilestoneOutcome::NotReached);
        }

        // Alert first: if dispatch fails the flag stays unset and the watcher
        // can simply run again.
        self.notifier.send(
            &self.contacts.management,
            "Vault Milestone Crossed",
            "The system wallet has exceeded the $2000 threshold.",
        )?;

        let tx = StoreTransaction::new()
            .guard(TxGuard::MilestoneUnsent)
            .mutate(TxMutation::MarkMilestoneSent);

        match self.store.commit(tx).await {
            Ok(()) => {
                info!(balance = wallet.balance, "wallet milestone alert sent");
                Ok(MilestoneOutcome::AlertSent)
            }
            // A concurrent invocation won the flag; its alert counts.
            Err(StoreError::Conflict(_)) => Ok(MilestoneOutcome::AlreadySent),
            Err(e) => Err(e.into()),
        }
    }
}
