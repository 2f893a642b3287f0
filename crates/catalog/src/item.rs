use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stacks_core::{DomainError, DomainResult, ItemId};

/// A loanable/purchasable catalog unit with finite stock.
///
/// Descriptive attributes and the three price points are immutable after
/// creation; only `current_copies` changes, and only through an atomic store
/// commit that pairs the change with an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    /// External catalog code, unique across the catalog.
    pub isbn: String,
    pub title: String,
    pub authors: Vec<String>,
    pub genres: Vec<String>,
    pub publisher: String,
    pub page_count: u32,
    pub published_year: i32,
    /// Sale price in smallest currency unit (cents).
    pub sell_price: i64,
    /// Replenishment cost per copy, in cents.
    pub stock_price: i64,
    /// Loan fee in cents.
    pub borrow_price: i64,
    /// Copies currently on the shelf. Never negative.
    pub current_copies: i64,
    /// Baseline stock used to size replenishment orders. Immutable.
    pub initial_stock: i64,
    pub created_at: DateTime<Utc>,
}

impl Item {
    /// Gap between the baseline stock and what is on the shelf right now.
    ///
    /// Can be negative when a restock raced a return; callers treat
    /// non-positive deficits as "nothing to do".
    pub fn deficit(&self) -> i64 {
        self.initial_stock - self.current_copies
    }

    pub fn out_of_stock(&self) -> bool {
        self.current_copies < 1
    }
}

/// Validated input for creating an [`Item`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDraft {
    pub isbn: String,
    pub title: String,
    pub authors: Vec<String>,
    pub genres: Vec<String>,
    pub publisher: String,
    pub page_count: u32,
    pub published_year: i32,
    pub sell_price: i64,
    pub stock_price: i64,
    pub borrow_price: i64,
    pub copies: i64,
}

impl ItemDraft {
    /// Validate the draft and mint an item.
    ///
    /// `copies` becomes both `current_copies` and the immutable
    /// `initial_stock` baseline.
    pub fn build(self) -> DomainResult<Item> {
        if self.title.trim().is_empty() {
            return Err(DomainError::validation("title cannot be empty"));
        }
        if self.isbn.trim().is_empty() {
            return Err(DomainError::validation("isbn cannot be empty"));
        }
        if self.sell_price < 0 || self.stock_price < 0 || self.borrow_price < 0 {
            return Err(DomainError::validation("prices cannot be negative"));
        }
        if self.copies < 0 {
            return Err(DomainError::validation("copies cannot be negative"));
        }

        Ok(Item {
            id: ItemId::new(),
            isbn: self.isbn,
            title: self.title,
            authors: self.authors,
            genres: self.genres,
            publisher: self.publisher,
            page_count: self.page_count,
            published_year: self.published_year,
            sell_price: self.sell_price,
            stock_price: self.stock_price,
            borrow_price: self.borrow_price,
            current_copies: self.copies,
            initial_stock: self.copies,
            created_at: Utc::now(),
        })
    }
}
