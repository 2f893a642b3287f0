use serde::Deserialize;
use serde_json::json;

use stacks_catalog::{AuditEntry, Item, SearchQuery, DEFAULT_PAGE_SIZE};
use stacks_ledger::{format_cents, LedgerEntry};

// -------------------------
// Query-param DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub search: Option<String>,
    pub limit: Option<usize>,
    pub page: Option<usize>,
    /// Flag arrives as the literal string "true", matching the original
    /// query contract.
    #[serde(rename = "getAll")]
    pub get_all: Option<String>,
    /// Comma-separated genre filter.
    pub genres: Option<String>,
}

impl SearchParams {
    pub fn into_query(self) -> SearchQuery {
        SearchQuery {
            text: self
                .search
                .map(|s| s.trim().to_lowercase())
                .unwrap_or_default(),
            limit: self.limit.unwrap_or(DEFAULT_PAGE_SIZE).max(1),
            page: self.page.unwrap_or(1).max(1),
            get_all: self.get_all.as_deref() == Some("true"),
            genres: self
                .genres
                .map(|g| {
                    g.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    #[serde(rename = "bookId")]
    pub book_id: Option<String>,
    #[serde(rename = "type")]
    pub action: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LedgerParams {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub reason: Option<String>,
}

// -------------------------
// Response JSON mapping
// -------------------------

pub fn book_to_json(item: &Item) -> serde_json::Value {
    json!({
        "id": item.id.to_string(),
        "isbn": item.isbn,
        "title": item.title,
        "authors": item.authors,
        "genres": item.genres,
        "publisher": item.publisher,
        "pageCount": item.page_count,
        "publishedYear": item.published_year,
        "sellPrice": item.sell_price,
        "stockPrice": item.stock_price,
        "borrowPrice": item.borrow_price,
        "currentCopies": item.current_copies,
        "initialStock": item.initial_stock,
        "createdAt": item.created_at,
    })
}

pub fn audit_to_json(entry: &AuditEntry, title: Option<&str>) -> serde_json::Value {
    json!({
        "id": entry.id.to_string(),
        "bookId": entry.item_id.to_string(),
        "userEmail": entry.user.to_string(),
        "actionType": entry.action.to_string(),
        "recordedAt": entry.recorded_at,
        "book": { "title": title },
    })
}

pub fn ledger_entry_to_json(entry: &LedgerEntry) -> serde_json::Value {
    json!({
        "id": entry.id.to_string(),
        "type": entry.kind.to_string(),
        "amount": entry.amount,
        "amountFormatted": format_cents(entry.amount),
        "reason": entry.reason,
        "recordedAt": entry.recorded_at,
    })
}

pub fn pagination_to_json(total: u64, page: usize, limit: usize) -> serde_json::Value {
    let total_pages = (total as usize).div_ceil(limit.max(1));
    json!({
        "total": total,
        "page": page,
        "limit": limit,
        "totalPages": total_pages,
    })
}
