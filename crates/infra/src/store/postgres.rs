//! Postgres-backed library store.
//!
//! The commit path runs every guarded batch inside one SQL transaction at
//! SERIALIZABLE isolation, with row locks (`SELECT … FOR UPDATE`) on the hot
//! rows and conditional `UPDATE … WHERE` forms whose row counts re-validate
//! the floors/ceilings. Either protection alone would satisfy the isolation
//! contract; together they keep the guard failures cheap and deterministic.
//!
//! ## Error Mapping
//!
//! | SQLx error                         | PostgreSQL code | StoreError | Scenario |
//! |------------------------------------|-----------------|------------|----------|
//! | Database (serialization failure)   | `40001`         | `Conflict` | Two commits raced; caller re-reads and retries |
//! | Database (unique violation)        | `23505`         | `Conflict` | Duplicate isbn / duplicate holding |
//! | Database (check violation)         | `23514`         | `Conflict` | Floor constraint backstop fired |
//! | Database (other) / pool / network  | any other       | `Storage`  | Backend unavailable or misbehaving |

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use stacks_catalog::{AuditEntry, Holding, HoldingKind, Item, Listing, SearchQuery};
use stacks_core::{AuditEntryId, HoldingId, ItemId, LedgerEntryId, UserId};
use stacks_ledger::{LedgerEntry, Wallet, OPENING_BALANCE};

use super::r#trait::{
    AuditFilter, LedgerFilter, LibraryStore, StoreError, StoreTransaction, TxGuard, TxMutation,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS items (
        id UUID PRIMARY KEY,
        isbn TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        authors TEXT[] NOT NULL,
        genres TEXT[] NOT NULL,
        publisher TEXT NOT NULL,
        page_count INT NOT NULL,
        published_year INT NOT NULL,
        sell_price BIGINT NOT NULL,
        stock_price BIGINT NOT NULL,
        borrow_price BIGINT NOT NULL,
        current_copies BIGINT NOT NULL CHECK (current_copies >= 0),
        initial_stock BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS holdings (
        id UUID PRIMARY KEY,
        user_id TEXT NOT NULL,
        item_id UUID NOT NULL REFERENCES items(id),
        kind TEXT NOT NULL,
        quantity BIGINT NOT NULL CHECK (quantity >= 1),
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (user_id, item_id, kind)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS audit_log (
        id UUID PRIMARY KEY,
        item_id UUID NOT NULL REFERENCES items(id),
        user_id TEXT NOT NULL,
        action TEXT NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallet (
        id INT PRIMARY KEY,
        balance BIGINT NOT NULL,
        milestone_sent BOOLEAN NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS ledger_entries (
        id UUID PRIMARY KEY,
        kind TEXT NOT NULL,
        amount BIGINT NOT NULL CHECK (amount >= 0),
        reason TEXT NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

/// Postgres-backed transactional store.
///
/// Thread safe: all operations run through the SQLx connection pool.
#[derive(Debug, Clone)]
pub struct PostgresLibraryStore {
    pool: Arc<PgPool>,
}

impl PostgresLibraryStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and run the idempotent schema setup.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables if missing and seed the singleton wallet row.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt)
                .execute(&*self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        sqlx::query(
            "INSERT INTO wallet (id, balance, milestone_sent) VALUES (1, $1, FALSE)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(OPENING_BALANCE)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("seed_wallet", e))?;
        Ok(())
    }
}

#[async_trait]
impl LibraryStore for PostgresLibraryStore {
    #[instrument(skip(self, item), fields(item_id = %item.id), err)]
    async fn insert_item(&self, item: Item) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO items (
                id, isbn, title, authors, genres, publisher,
                page_count, published_year,
                sell_price, stock_price, borrow_price,
                current_copies, initial_stock, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(&item.isbn)
        .bind(&item.title)
        .bind(&item.authors)
        .bind(&item.genres)
        .bind(&item.publisher)
        .bind(item.page_count as i32)
        .bind(item.published_year)
        .bind(item.sell_price)
        .bind(item.stock_price)
        .bind(item.borrow_price)
        .bind(item.current_copies)
        .bind(item.initial_stock)
        .bind(item.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("insert_item", e))?;
        Ok(())
    }

    async fn item(&self, id: ItemId) -> Result<Option<Item>, StoreError> {
        let row = sqlx::query("SELECT * FROM items WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("item", e))?;
        row.map(|r| row_to_item(&r)).transpose()
    }

    /// Full scan plus the shared pure matcher, so listing semantics cannot
    /// drift between backends. The catalog is small by construction.
    async fn search_items(&self, query: &SearchQuery) -> Result<Listing, StoreError> {
        let rows = sqlx::query("SELECT * FROM items")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("search_items", e))?;
        let items = rows
            .iter()
            .map(row_to_item)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(query.run(items.iter()))
    }

    async fn holding(
        &self,
        user: &UserId,
        item_id: ItemId,
        kind: HoldingKind,
    ) -> Result<Option<Holding>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM holdings WHERE user_id = $1 AND item_id = $2 AND kind = $3",
        )
        .bind(user.as_str())
        .bind(item_id.as_uuid())
        .bind(kind.to_string())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("holding", e))?;
        row.map(|r| row_to_holding(&r)).transpose()
    }

    async fn holdings_of_kind(
        &self,
        user: &UserId,
        kind: HoldingKind,
    ) -> Result<Vec<Holding>, StoreError> {
        let rows = sqlx::query("SELECT * FROM holdings WHERE user_id = $1 AND kind = $2")
            .bind(user.as_str())
            .bind(kind.to_string())
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("holdings_of_kind", e))?;
        rows.iter().map(row_to_holding).collect()
    }

    async fn all_holdings(&self) -> Result<Vec<Holding>, StoreError> {
        let rows = sqlx::query("SELECT * FROM holdings ORDER BY user_id, created_at")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("all_holdings", e))?;
        rows.iter().map(row_to_holding).collect()
    }

    async fn audit_entries(&self, filter: &AuditFilter) -> Result<Vec<AuditEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, item_id, user_id, action, recorded_at
            FROM audit_log
            WHERE ($1::uuid IS NULL OR item_id = $1)
              AND ($2::text IS NULL OR action = $2)
            ORDER BY recorded_at DESC
            LIMIT $3
            "#,
        )
        .bind(filter.item_id.map(|id| *id.as_uuid()))
        .bind(filter.action.map(|a| a.to_string()))
        .bind(filter.limit.map(|l| l as i64))
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("audit_entries", e))?;
        rows.iter().map(row_to_audit).collect()
    }

    async fn wallet(&self) -> Result<Wallet, StoreError> {
        let row = sqlx::query("SELECT balance, milestone_sent FROM wallet WHERE id = 1")
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("wallet", e))?
            .ok_or_else(|| StoreError::Storage("wallet row missing; run migrate()".to_string()))?;
        Ok(Wallet {
            balance: row.try_get("balance").map_err(decode_err)?,
            milestone_sent: row.try_get("milestone_sent").map_err(decode_err)?,
        })
    }

    async fn ledger_entries(&self, filter: &LedgerFilter) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, amount, reason, recorded_at
            FROM ledger_entries
            WHERE ($1::text IS NULL OR kind = $1)
              AND ($2::text IS NULL OR reason ILIKE '%' || $2 || '%')
            ORDER BY recorded_at DESC
            "#,
        )
        .bind(filter.kind.map(|k| k.to_string()))
        .bind(filter.reason_contains.clone())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("ledger_entries", e))?;
        rows.iter().map(row_to_ledger_entry).collect()
    }

    #[instrument(
        skip(self, tx),
        fields(guards = tx.guards.len(), mutations = tx.mutations.len()),
        err
    )]
    async fn commit(&self, tx: StoreTransaction) -> Result<(), StoreError> {
        if tx.mutations.is_empty() {
            return Err(StoreError::Invalid("empty mutation batch".to_string()));
        }

        let mut db_tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *db_tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        match apply_batch(&mut db_tx, &tx).await {
            Ok(()) => db_tx
                .commit()
                .await
                .map_err(|e| map_sqlx_error("commit_transaction", e)),
            Err(e) => {
                let _ = db_tx.rollback().await;
                Err(e)
            }
        }
    }
}

async fn apply_batch(
    db_tx: &mut Transaction<'_, Postgres>,
    tx: &StoreTransaction,
) -> Result<(), StoreError> {
    for guard in &tx.guards {
        check_guard(db_tx, guard).await?;
    }
    for mutation in &tx.mutations {
        apply_mutation(db_tx, mutation).await?;
    }
    Ok(())
}

async fn check_guard(
    db_tx: &mut Transaction<'_, Postgres>,
    guard: &TxGuard,
) -> Result<(), StoreError> {
    match guard {
        TxGuard::StockAtLeast { item_id, min } => {
            let row = sqlx::query("SELECT current_copies FROM items WHERE id = $1 FOR UPDATE")
                .bind(item_id.as_uuid())
                .fetch_optional(&mut **db_tx)
                .await
                .map_err(|e| map_sqlx_error("guard_stock", e))?
                .ok_or_else(|| StoreError::NotFound(format!("item {item_id}")))?;
            let copies: i64 = row.try_get("current_copies").map_err(decode_err)?;
            if copies < *min {
                return Err(StoreError::Conflict(format!(
                    "item {item_id} has {copies} copies, need {min}"
                )));
            }
            Ok(())
        }
        TxGuard::HoldingAbsent {
            user,
            item_id,
            kind,
        } => {
            let row = sqlx::query(
                "SELECT 1 FROM holdings WHERE user_id = $1 AND item_id = $2 AND kind = $3",
            )
            .bind(user.as_str())
            .bind(item_id.as_uuid())
            .bind(kind.to_string())
            .fetch_optional(&mut **db_tx)
            .await
            .map_err(|e| map_sqlx_error("guard_holding_absent", e))?;
            if row.is_some() {
                return Err(StoreError::Conflict(format!(
                    "{kind} holding already exists for {user} on {item_id}"
                )));
            }
            Ok(())
        }
        TxGuard::HoldingCountAtMost { user, kind, max } => {
            let row = sqlx::query(
                "SELECT COUNT(*) AS n FROM holdings WHERE user_id = $1 AND kind = $2",
            )
            .bind(user.as_str())
            .bind(kind.to_string())
            .fetch_one(&mut **db_tx)
            .await
            .map_err(|e| map_sqlx_error("guard_holding_count", e))?;
            let count: i64 = row.try_get("n").map_err(decode_err)?;
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
            let row = sqlx::query(
                r#"
                SELECT COALESCE(SUM(quantity), 0) AS total
                FROM holdings
                WHERE user_id = $1 AND kind = $2
                  AND ($3::uuid IS NULL OR item_id = $3)
                "#,
            )
            .bind(user.as_str())
            .bind(kind.to_string())
            .bind(item_id.map(|id| *id.as_uuid()))
            .fetch_one(&mut **db_tx)
            .await
            .map_err(|e| map_sqlx_error("guard_holding_quantity", e))?;
            let total: i64 = row.try_get("total").map_err(decode_err)?;
            if total > *max {
                return Err(StoreError::Conflict(format!(
                    "{user} holds quantity {total} of kind {kind}, cap {max}"
                )));
            }
            Ok(())
        }
        TxGuard::MilestoneUnsent => {
            let row = sqlx::query("SELECT milestone_sent FROM wallet WHERE id = 1 FOR UPDATE")
                .fetch_optional(&mut **db_tx)
                .await
                .map_err(|e| map_sqlx_error("guard_milestone", e))?
                .ok_or_else(|| StoreError::Storage("wallet row missing".to_string()))?;
            let sent: bool = row.try_get("milestone_sent").map_err(decode_err)?;
            if sent {
                return Err(StoreError::Conflict("milestone already sent".to_string()));
            }
            Ok(())
        }
    }
}

async fn apply_mutation(
    db_tx: &mut Transaction<'_, Postgres>,
    mutation: &TxMutation,
) -> Result<(), StoreError> {
    match mutation {
        TxMutation::AdjustStock { item_id, delta } => {
            let result = sqlx::query(
                "UPDATE items SET current_copies = current_copies + $2
                 WHERE id = $1 AND current_copies + $2 >= 0",
            )
            .bind(item_id.as_uuid())
            .bind(delta)
            .execute(&mut **db_tx)
            .await
            .map_err(|e| map_sqlx_error("adjust_stock", e))?;

            if result.rows_affected() == 0 {
                let exists = sqlx::query("SELECT 1 FROM items WHERE id = $1")
                    .bind(item_id.as_uuid())
                    .fetch_optional(&mut **db_tx)
                    .await
                    .map_err(|e| map_sqlx_error("adjust_stock_exists", e))?;
                return Err(match exists {
                    Some(_) => {
                        StoreError::Conflict(format!("stock of {item_id} would drop below zero"))
                    }
                    None => StoreError::NotFound(format!("item {item_id}")),
                });
            }
            Ok(())
        }
        TxMutation::InsertAudit(entry) => {
            sqlx::query(
                "INSERT INTO audit_log (id, item_id, user_id, action, recorded_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(entry.id.as_uuid())
            .bind(entry.item_id.as_uuid())
            .bind(entry.user.as_str())
            .bind(entry.action.to_string())
            .bind(entry.recorded_at)
            .execute(&mut **db_tx)
            .await
            .map_err(|e| map_sqlx_error("insert_audit", e))?;
            Ok(())
        }
        TxMutation::InsertHolding(holding) => {
            sqlx::query(
                "INSERT INTO holdings (id, user_id, item_id, kind, quantity, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(holding.id.as_uuid())
            .bind(holding.user.as_str())
            .bind(holding.item_id.as_uuid())
            .bind(holding.kind.to_string())
            .bind(holding.quantity)
            .bind(holding.created_at)
            .execute(&mut **db_tx)
            .await
            .map_err(|e| map_sqlx_error("insert_holding", e))?;
            Ok(())
        }
        TxMutation::DeleteHolding {
            user,
            item_id,
            kind,
        } => {
            let result = sqlx::query(
                "DELETE FROM holdings WHERE user_id = $1 AND item_id = $2 AND kind = $3",
            )
            .bind(user.as_str())
            .bind(item_id.as_uuid())
            .bind(kind.to_string())
            .execute(&mut **db_tx)
            .await
            .map_err(|e| map_sqlx_error("delete_holding", e))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "{kind} holding for {user} on {item_id} is gone"
                )));
            }
            Ok(())
        }
        TxMutation::AdjustHoldingQuantity {
            user,
            item_id,
            kind,
            delta,
        } => {
            let result = sqlx::query(
                "UPDATE holdings SET quantity = quantity + $4
                 WHERE user_id = $1 AND item_id = $2 AND kind = $3 AND quantity + $4 >= 1",
            )
            .bind(user.as_str())
            .bind(item_id.as_uuid())
            .bind(kind.to_string())
            .bind(delta)
            .execute(&mut **db_tx)
            .await
            .map_err(|e| map_sqlx_error("adjust_holding_quantity", e))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict(format!(
                    "{kind} holding for {user} on {item_id} is gone or floored"
                )));
            }
            Ok(())
        }
        TxMutation::ApplyLedgerEntry(entry) => {
            sqlx::query(
                "INSERT INTO ledger_entries (id, kind, amount, reason, recorded_at)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(entry.id.as_uuid())
            .bind(entry.kind.to_string())
            .bind(entry.amount)
            .bind(&entry.reason)
            .bind(entry.recorded_at)
            .execute(&mut **db_tx)
            .await
            .map_err(|e| map_sqlx_error("insert_ledger_entry", e))?;

            let result = sqlx::query("UPDATE wallet SET balance = balance + $1 WHERE id = 1")
                .bind(entry.signed_amount())
                .execute(&mut **db_tx)
                .await
                .map_err(|e| map_sqlx_error("apply_balance", e))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Storage("wallet row missing".to_string()));
            }
            Ok(())
        }
        TxMutation::MarkMilestoneSent => {
            let result = sqlx::query(
                "UPDATE wallet SET milestone_sent = TRUE WHERE id = 1 AND milestone_sent = FALSE",
            )
            .execute(&mut **db_tx)
            .await
            .map_err(|e| map_sqlx_error("mark_milestone", e))?;
            if result.rows_affected() == 0 {
                return Err(StoreError::Conflict("milestone already sent".to_string()));
            }
            Ok(())
        }
    }
}

fn row_to_item(row: &PgRow) -> Result<Item, StoreError> {
    Ok(Item {
        id: ItemId::from_uuid(row.try_get("id").map_err(decode_err)?),
        isbn: row.try_get("isbn").map_err(decode_err)?,
        title: row.try_get("title").map_err(decode_err)?,
        authors: row.try_get("authors").map_err(decode_err)?,
        genres: row.try_get("genres").map_err(decode_err)?,
        publisher: row.try_get("publisher").map_err(decode_err)?,
        page_count: row.try_get::<i32, _>("page_count").map_err(decode_err)? as u32,
        published_year: row.try_get("published_year").map_err(decode_err)?,
        sell_price: row.try_get("sell_price").map_err(decode_err)?,
        stock_price: row.try_get("stock_price").map_err(decode_err)?,
        borrow_price: row.try_get("borrow_price").map_err(decode_err)?,
        current_copies: row.try_get("current_copies").map_err(decode_err)?,
        initial_stock: row.try_get("initial_stock").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

fn row_to_holding(row: &PgRow) -> Result<Holding, StoreError> {
    let kind: String = row.try_get("kind").map_err(decode_err)?;
    let kind = match kind.as_str() {
        "BORROW" => HoldingKind::Borrow,
        "BUY" => HoldingKind::Buy,
        other => {
            return Err(StoreError::Storage(format!(
                "unknown holding kind '{other}' in row"
            )))
        }
    };
    let user: String = row.try_get("user_id").map_err(decode_err)?;
    Ok(Holding {
        id: HoldingId::from_uuid(row.try_get("id").map_err(decode_err)?),
        user: UserId::new(user).map_err(|e| StoreError::Storage(e.to_string()))?,
        item_id: ItemId::from_uuid(row.try_get("item_id").map_err(decode_err)?),
        kind,
        quantity: row.try_get("quantity").map_err(decode_err)?,
        created_at: row.try_get("created_at").map_err(decode_err)?,
    })
}

fn row_to_audit(row: &PgRow) -> Result<AuditEntry, StoreError> {
    let action: String = row.try_get("action").map_err(decode_err)?;
    let user: String = row.try_get("user_id").map_err(decode_err)?;
    Ok(AuditEntry {
        id: AuditEntryId::from_uuid(row.try_get("id").map_err(decode_err)?),
        item_id: ItemId::from_uuid(row.try_get("item_id").map_err(decode_err)?),
        user: UserId::new(user).map_err(|e| StoreError::Storage(e.to_string()))?,
        action: action
            .parse()
            .map_err(|e| StoreError::Storage(format!("bad action in row: {e}")))?,
        recorded_at: row.try_get("recorded_at").map_err(decode_err)?,
    })
}

fn row_to_ledger_entry(row: &PgRow) -> Result<LedgerEntry, StoreError> {
    let kind: String = row.try_get("kind").map_err(decode_err)?;
    Ok(LedgerEntry {
        id: LedgerEntryId::from_uuid(row.try_get("id").map_err(decode_err)?),
        kind: kind
            .parse()
            .map_err(|e| StoreError::Storage(format!("bad entry kind in row: {e}")))?,
        amount: row.try_get("amount").map_err(decode_err)?,
        reason: row.try_get("reason").map_err(decode_err)?,
        recorded_at: row.try_get("recorded_at").map_err(decode_err)?,
    })
}

fn decode_err(e: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("failed to decode row: {e}"))
}

fn map_sqlx_error(operation: &str, e: sqlx::Error) -> StoreError {
    if let Some(code) = db_error_code(&e) {
        // Serialization failures and constraint races are retryable conflicts.
        if code == "40001" || code == "23505" || code == "23514" {
            return StoreError::Conflict(format!("{operation}: {e}"));
        }
    }
    StoreError::Storage(format!("{operation}: {e}"))
}

fn db_error_code(e: &sqlx::Error) -> Option<String> {
    match e {
        sqlx::Error::Database(db) => db.code().map(|c| c.into_owned()),
        _ => None,
    }
}
