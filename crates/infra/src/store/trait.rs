use async_trait::async_trait;
use thiserror::Error;

use stacks_catalog::{AuditAction, AuditEntry, Holding, HoldingKind, Item, Listing, SearchQuery};
use stacks_core::{ItemId, UserId};
use stacks_ledger::{EntryKind, LedgerEntry, Wallet};

/// Record store operation error.
///
/// These are **infrastructure errors** (missing rows, lost races, backend
/// failures) as opposed to domain errors (validation, quota policy).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A guard failed or a guarded mutation lost a race. Retryable: re-read
    /// state and re-derive the transaction.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The transaction itself is malformed (caller bug, not runtime state).
    #[error("invalid transaction: {0}")]
    Invalid(String),

    /// The backend failed (connection, IO, serialization).
    #[error("storage error: {0}")]
    Storage(String),
}

/// A precondition re-validated inside the atomic commit, under the same
/// isolation as the mutations. Guards close the gap between the caller's
/// read-then-decide phase and the commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxGuard {
    /// The item must currently hold at least `min` copies.
    StockAtLeast { item_id: ItemId, min: i64 },
    /// No holding of `kind` may exist for (user, item).
    HoldingAbsent {
        user: UserId,
        item_id: ItemId,
        kind: HoldingKind,
    },
    /// The user's number of `kind` holdings must be at most `max`.
    HoldingCountAtMost {
        user: UserId,
        kind: HoldingKind,
        max: i64,
    },
    /// The user's summed quantity of `kind` holdings must be at most `max`.
    /// With `item_id` set, only that item's holding counts.
    HoldingQuantityAtMost {
        user: UserId,
        item_id: Option<ItemId>,
        kind: HoldingKind,
        max: i64,
    },
    /// The wallet milestone flag must still be unset.
    MilestoneUnsent,
}

/// One write inside an atomic commit.
///
/// Mutations carry their own floor/uniqueness conditions, so a batch that
/// would break an invariant fails as a whole with [`StoreError::Conflict`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxMutation {
    /// Move an item's copy count by `delta`. Fails if the result would drop
    /// below zero.
    AdjustStock { item_id: ItemId, delta: i64 },
    /// Append an audit log row.
    InsertAudit(AuditEntry),
    /// Create a holding. Fails if (user, item, kind) already exists.
    InsertHolding(Holding),
    /// Delete a holding. Fails if it does not exist.
    DeleteHolding {
        user: UserId,
        item_id: ItemId,
        kind: HoldingKind,
    },
    /// Move a holding's quantity by `delta`. Fails if the holding is missing
    /// or the result would drop below one.
    AdjustHoldingQuantity {
        user: UserId,
        item_id: ItemId,
        kind: HoldingKind,
        delta: i64,
    },
    /// Append a ledger entry AND move the wallet balance by its signed
    /// amount. Being a single mutation is what makes the
    /// balance/entry-pairing invariant unbreakable.
    ApplyLedgerEntry(LedgerEntry),
    /// Set the one-time milestone flag. Fails if already set.
    MarkMilestoneSent,
}

/// A guarded batch of mutations applied as one atomic unit.
#[derive(Debug, Clone, Default)]
pub struct StoreTransaction {
    pub guards: Vec<TxGuard>,
    pub mutations: Vec<TxMutation>,
}

impl StoreTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(mut self, guard: TxGuard) -> Self {
        self.guards.push(guard);
        self
    }

    pub fn mutate(mut self, mutation: TxMutation) -> Self {
        self.mutations.push(mutation);
        self
    }
}

/// Ledger entry listing filter. Both conditions are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct LedgerFilter {
    pub kind: Option<EntryKind>,
    /// Case-insensitive substring match on the reason text.
    pub reason_contains: Option<String>,
}

/// Audit log listing filter.
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub item_id: Option<ItemId>,
    pub action: Option<AuditAction>,
    /// Cap on returned rows (newest first). `None` returns everything.
    pub limit: Option<usize>,
}

/// The transactional source of truth.
///
/// ## Design principles
///
/// - **No storage assumptions**: works with the in-memory implementation
///   (tests/dev) and the Postgres backend (production).
/// - **One write path**: every state change goes through `commit`; reads can
///   never observe a half-applied batch.
/// - **Guards over trust**: quota/stock preconditions are re-validated inside
///   the commit, so two racing callers cannot both succeed on the same last
///   copy.
///
/// Listing order contracts: `audit_entries` and `ledger_entries` return
/// newest-first; `search_items` returns title-ascending.
#[async_trait]
pub trait LibraryStore: Send + Sync {
    /// Add a new catalog item. Fails with `Conflict` on a duplicate isbn.
    async fn insert_item(&self, item: Item) -> Result<(), StoreError>;

    async fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError>;

    async fn search_items(&self, query: &SearchQuery) -> Result<Listing, StoreError>;

    async fn holding(
        &self,
        user: &UserId,
        item_id: ItemId,
        kind: HoldingKind,
    ) -> Result<Option<Holding>, StoreError>;

    /// All of one user's holdings of a given kind.
    async fn holdings_of_kind(
        &self,
        user: &UserId,
        kind: HoldingKind,
    ) -> Result<Vec<Holding>, StoreError>;

    /// Every holding in the system (admin summary).
    async fn all_holdings(&self) -> Result<Vec<Holding>, StoreError>;

    async fn audit_entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError>;

    async fn wallet(&self) -> Result<Wallet, StoreError>;

    async fn ledger_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError>;

    /// Apply a guarded batch atomically: either every guard holds and every
    /// mutation applies, or nothing does.
    async fn commit(&self, tx: StoreTransaction) -> Result<(), StoreError>;
}
