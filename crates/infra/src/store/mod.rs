//! Transactional record store boundary.
//!
//! This module defines an infrastructure-facing abstraction for the system's
//! single source of truth (items, holdings, audit log, wallet) without making
//! any storage assumptions. The only write entry point is
//! [`LibraryStore::commit`], which applies a guarded batch of mutations as one
//! atomic unit.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLibraryStore;
pub use postgres::PostgresLibraryStore;
pub use r#trait::{
    AuditFilter, LedgerFilter, LibraryStore, StoreError, StoreTransaction, TxGuard, TxMutation,
};
