//! Ledger module (shared wallet balance + append-only entry history).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns.

pub mod wallet;

pub use wallet::{
    balance_of, format_cents, EntryKind, LedgerEntry, Wallet, MILESTONE_THRESHOLD, OPENING_BALANCE,
};
