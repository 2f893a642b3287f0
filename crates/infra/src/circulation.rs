//! Circulation service: borrow / return / buy as atomic, guard-validated
//! commits against the record store.
//!
//! The service reads current state, applies the quota policy, then commits a
//! guarded batch. Guards re-validate every precondition inside the commit, so
//! two racing callers can never both consume the same last copy; the loser
//! surfaces as a store `Conflict`, which the service treats as retryable —
//! re-reading state usually turns the retry into a clean policy denial.
//!
//! Side effects that do not belong in the atomic unit (stock evaluation,
//! reminder scheduling, milestone check) are *returned* as post-commit hooks
//! for the orchestrator to execute.

use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use stacks_catalog::{quota, AuditAction, AuditEntry, Holding, HoldingKind};
use stacks_core::{ItemId, UserId};
use stacks_ledger::LedgerEntry;

use crate::store::{LibraryStore, StoreError, StoreTransaction, TxGuard, TxMutation};

/// How many times a lost commit race is retried before giving up.
const COMMIT_RETRIES: u32 = 3;

/// Work the orchestrator runs after a successful commit, outside the atomic
/// unit and best-effort.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostCommitHook {
    /// Let the replenishment monitor look at the item's new stock level.
    EvaluateStock { item_id: ItemId },
    /// Schedule the 3-day borrow reminder.
    ScheduleBorrowReminder { user: UserId, item_id: ItemId },
    /// Re-check the wallet milestone after a credit.
    CheckMilestone,
}

/// Successful operation outcome.
#[derive(Debug, Clone)]
pub struct Completed {
    pub message: &'static str,
    pub hooks: Vec<PostCommitHook>,
}

/// Tagged failure kinds of the three circulation operations.
#[derive(Debug, Error)]
pub enum CirculationError {
    #[error("Book not found")]
    ItemNotFound,
    #[error("No available copies")]
    OutOfStock,
    #[error("Already borrowed")]
    AlreadyBorrowed,
    #[error("Limit 3 books")]
    BorrowLimit,
    #[error("Book not borrowed")]
    NotBorrowed,
    #[error("Max 2 copies per book")]
    PerItemLimit,
    #[error("Max 10 total books")]
    TotalLimit,
    /// Every retry kept losing its commit race.
    #[error("operation kept losing commit races: {0}")]
    Contention(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CirculationError {
    /// Validation failures: the referenced thing does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            CirculationError::ItemNotFound | CirculationError::NotBorrowed
        )
    }

    /// Policy denials: stock or quota said no. No state was mutated.
    pub fn is_denial(&self) -> bool {
        matches!(
            self,
            CirculationError::OutOfStock
                | CirculationError::AlreadyBorrowed
                | CirculationError::BorrowLimit
                | CirculationError::PerItemLimit
                | CirculationError::TotalLimit
        )
    }
}

/// The transactional core for borrow / return / buy.
#[derive(Clone)]
pub struct CirculationService {
    store: Arc<dyn LibraryStore>,
}

impl CirculationService {
    pub fn new(store: Arc<dyn LibraryStore>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(user = %user, item_id = %item_id), err)]
    pub async fn borrow(
        &self,
        user: &UserId,
        item_id: ItemId,
    ) -> Result<Completed, CirculationError> {
        let mut last_race = String::new();
        for _ in 0..COMMIT_RETRIES {
            match self.try_borrow(user, item_id).await {
                Err(CirculationError::Store(StoreError::Conflict(msg))) => last_race = msg,
                other => return other,
            }
        }
        Err(CirculationError::Contention(last_race))
    }

    #[instrument(skip(self), fields(user = %user, item_id = %item_id), err)]
    pub async fn return_item(
        &self,
        user: &UserId,
        item_id: ItemId,
    ) -> Result<Completed, CirculationError> {
        let mut last_race = String::new();
        for _ in 0..COMMIT_RETRIES {
            match self.try_return(user, item_id).await {
                Err(CirculationError::Store(StoreError::Conflict(msg))) => last_race = msg,
                other => return other,
            }
        }
        Err(CirculationError::Contention(last_race))
    }

    #[instrument(skip(self), fields(user = %user, item_id = %item_id), err)]
    pub async fn buy(
        &self,
        user: &UserId,
        item_id: ItemId,
    ) -> Result<Completed, CirculationError> {
        let mut last_race = String::new();
        for _ in 0..COMMIT_RETRIES {
            match self.try_buy(user, item_id).await {
                Err(CirculationError::Store(StoreError::Conflict(msg))) => last_race = msg,
                other => return other,
            }
        }
        Err(CirculationError::Contention(last_race))
    }

    async fn try_borrow(
        &self,
        user: &UserId,
        item_id: ItemId,
    ) -> Result<Completed, CirculationError> {
        let item = self
            .store
            .item(item_id)
            .await?
            .ok_or(CirculationError::ItemNotFound)?;
        if item.out_of_stock() {
            return Err(CirculationError::OutOfStock);
        }
        if self
            .store
            .holding(user, item_id, HoldingKind::Borrow)
            .await?
            .is_some()
        {
            return Err(CirculationError::AlreadyBorrowed);
        }
        let active = self
            .store
            .holdings_of_kind(user, HoldingKind::Borrow)
            .await?
            .len() as i64;
        if !quota::can_borrow(active) {
            return Err(CirculationError::BorrowLimit);
        }

        let fee = LedgerEntry::credit(
            item.borrow_price,
            format!("User borrowed {}", item.title),
        )
        .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let tx = StoreTransaction::new()
            .guard(TxGuard::HoldingAbsent {
                user: user.clone(),
                item_id,
                kind: HoldingKind::Borrow,
            })
            // Count ceiling leaves room for the holding inserted below.
            .guard(TxGuard::HoldingCountAtMost {
                user: user.clone(),
                kind: HoldingKind::Borrow,
                max: quota::MAX_ACTIVE_BORROWS - 1,
            })
            .mutate(TxMutation::AdjustStock { item_id, delta: -1 })
            .mutate(TxMutation::InsertAudit(AuditEntry::record(
                item_id,
                user.clone(),
                AuditAction::Borrow,
            )))
            .mutate(TxMutation::InsertHolding(Holding::borrow(
                user.clone(),
                item_id,
            )))
            .mutate(TxMutation::ApplyLedgerEntry(fee));

        self.store.commit(tx).await?;

        Ok(Completed {
            message: "Book borrowed successfully",
            hooks: vec![
                PostCommitHook::EvaluateStock { item_id },
                PostCommitHook::ScheduleBorrowReminder {
                    user: user.clone(),
                    item_id,
                },
                PostCommitHook::CheckMilestone,
            ],
        })
    }

    async fn try_return(
        &self,
        user: &UserId,
        item_id: ItemId,
    ) -> Result<Completed, CirculationError> {
        if self
            .store
            .holding(user, item_id, HoldingKind::Borrow)
            .await?
            .is_none()
        {
            return Err(CirculationError::NotBorrowed);
        }

        let tx = StoreTransaction::new()
            .mutate(TxMutation::AdjustStock { item_id, delta: 1 })
            .mutate(TxMutation::DeleteHolding {
                user: user.clone(),
                item_id,
                kind: HoldingKind::Borrow,
            })
            .mutate(TxMutation::InsertAudit(AuditEntry::record(
                item_id,
                user.clone(),
                AuditAction::Return,
            )));

        self.store.commit(tx).await?;

        Ok(Completed {
            message: "Book returned successfully",
            hooks: Vec::new(),
        })
    }

    async fn try_buy(
        &self,
        user: &UserId,
        item_id: ItemId,
    ) -> Result<Completed, CirculationError> {
        let item = self
            .store
            .item(item_id)
            .await?
            .ok_or(CirculationError::ItemNotFound)?;
        if item.out_of_stock() {
            return Err(CirculationError::OutOfStock);
        }

        let purchases = self
            .store
            .holdings_of_kind(user, HoldingKind::Buy)
            .await?;
        let same_item = purchases.iter().find(|h| h.item_id == item_id);
        let same_qty = same_item.map_or(0, |h| h.quantity);
        let total_qty: i64 = purchases.iter().map(|h| h.quantity).sum();

        if !quota::within_per_item_cap(same_qty) {
            return Err(CirculationError::PerItemLimit);
        }
        if !quota::within_total_cap(total_qty) {
            return Err(CirculationError::TotalLimit);
        }

        let sale = LedgerEntry::credit(
            item.sell_price,
            format!("User bought \"{}\"", item.title),
        )
        .map_err(|e| StoreError::Invalid(e.to_string()))?;

        let mut tx = StoreTransaction::new()
            // Quantity ceilings leave room for the +1 applied below.
            .guard(TxGuard::HoldingQuantityAtMost {
                user: user.clone(),
                item_id: Some(item_id),
                kind: HoldingKind::Buy,
                max: quota::MAX_COPIES_PER_ITEM - 1,
            })
            .guard(TxGuard::HoldingQuantityAtMost {
                user: user.clone(),
                item_id: None,
                kind: HoldingKind::Buy,
                max: quota::MAX_TOTAL_PURCHASES - 1,
            })
            .mutate(TxMutation::AdjustStock { item_id, delta: -1 })
            .mutate(TxMutation::InsertAudit(AuditEntry::record(
                item_id,
                user.clone(),
                AuditAction::Buy,
            )))
            .mutate(TxMutation::ApplyLedgerEntry(sale));

        tx = if same_item.is_some() {
            tx.mutate(TxMutation::AdjustHoldingQuantity {
                user: user.clone(),
                item_id,
                kind: HoldingKind::Buy,
                delta: 1,
            })
        } else {
            tx.mutate(TxMutation::InsertHolding(Holding::purchase(
                user.clone(),
                item_id,
            )))
        };

        self.store.commit(tx).await?;

        Ok(Completed {
            message: "Book purchased successfully",
            hooks: vec![
                PostCommitHook::EvaluateStock { item_id },
                PostCommitHook::CheckMilestone,
            ],
        })
    }
}
