use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stacks_core::{DomainError, DomainResult, LedgerEntryId};

/// Fixed one-time alert threshold, in cents ($2,000.00).
pub const MILESTONE_THRESHOLD: i64 = 200_000;

/// Balance the shared wallet is seeded with, in cents ($100.00).
pub const OPENING_BALANCE: i64 = 10_000;

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Credit,
    Debit,
}

impl core::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EntryKind::Credit => f.write_str("CREDIT"),
            EntryKind::Debit => f.write_str("DEBIT"),
        }
    }
}

impl core::str::FromStr for EntryKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREDIT" => Ok(EntryKind::Credit),
            "DEBIT" => Ok(EntryKind::Debit),
            other => Err(DomainError::validation(format!(
                "invalid entry kind '{other}', expected CREDIT or DEBIT"
            ))),
        }
    }
}

/// One immutable movement of the shared balance.
///
/// `amount` is a positive magnitude in cents; the direction lives in `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: LedgerEntryId,
    pub kind: EntryKind,
    pub amount: i64,
    /// Free text identifying the cause ("User borrowed ...", "Auto-restocked ...").
    pub reason: String,
    pub recorded_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn credit(amount: i64, reason: impl Into<String>) -> DomainResult<Self> {
        Self::new(EntryKind::Credit, amount, reason)
    }

    pub fn debit(amount: i64, reason: impl Into<String>) -> DomainResult<Self> {
        Self::new(EntryKind::Debit, amount, reason)
    }

    fn new(kind: EntryKind, amount: i64, reason: impl Into<String>) -> DomainResult<Self> {
        // Zero is legal: a free loan still writes its paired entry.
        if amount < 0 {
            return Err(DomainError::validation("amount cannot be negative"));
        }
        Ok(Self {
            id: LedgerEntryId::new(),
            kind,
            amount,
            reason: reason.into(),
            recorded_at: Utc::now(),
        })
    }

    /// The entry's effect on the balance: credits positive, debits negative.
    pub fn signed_amount(&self) -> i64 {
        match self.kind {
            EntryKind::Credit => self.amount,
            EntryKind::Debit => -self.amount,
        }
    }
}

/// The single shared balance record.
///
/// Invariant: `balance == balance_of(all entries) + OPENING_BALANCE` at all
/// times; the store enforces this by only mutating the balance through an
/// operation that appends the paired entry in the same atomic commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Current balance in cents. May go negative if restock costs outrun
    /// income.
    pub balance: i64,
    /// One-time milestone flag; set once the balance first crosses
    /// [`MILESTONE_THRESHOLD`] and an alert went out.
    pub milestone_sent: bool,
}

impl Wallet {
    pub fn opening() -> Self {
        Self {
            balance: OPENING_BALANCE,
            milestone_sent: false,
        }
    }

    pub fn apply(&mut self, entry: &LedgerEntry) {
        self.balance += entry.signed_amount();
    }

    /// True when the one-time alert is still owed.
    pub fn milestone_pending(&self) -> bool {
        self.balance >= MILESTONE_THRESHOLD && !self.milestone_sent
    }

    /// Two-decimal display form of the balance ("1234.50").
    pub fn formatted_balance(&self) -> String {
        format_cents(self.balance)
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Self::opening()
    }
}

/// Signed sum of a sequence of entries.
pub fn balance_of<'a, I>(entries: I) -> i64
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    entries.into_iter().map(LedgerEntry::signed_amount).sum()
}

/// Render cents with two decimals, keeping the sign out of the fraction.
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn entries_reject_negative_amounts_only() {
        assert!(LedgerEntry::debit(-5, "negative").is_err());
        assert!(LedgerEntry::credit(0, "free loan").is_ok());
        assert!(LedgerEntry::credit(150, "loan fee").is_ok());
    }

    #[test]
    fn signed_amounts_follow_kind() {
        let credit = LedgerEntry::credit(300, "sale").unwrap();
        let debit = LedgerEntry::debit(120, "restock").unwrap();
        assert_eq!(credit.signed_amount(), 300);
        assert_eq!(debit.signed_amount(), -120);
    }

    #[test]
    fn milestone_pending_requires_threshold_and_unset_flag() {
        let mut wallet = Wallet {
            balance: MILESTONE_THRESHOLD,
            milestone_sent: false,
        };
        assert!(wallet.milestone_pending());
        wallet.milestone_sent = true;
        assert!(!wallet.milestone_pending());
        wallet.balance = MILESTONE_THRESHOLD - 1;
        wallet.milestone_sent = false;
        assert!(!wallet.milestone_pending());
    }

    #[test]
    fn formatting_pads_and_keeps_sign_up_front() {
        assert_eq!(format_cents(10_000), "100.00");
        assert_eq!(format_cents(5), "0.05");
        assert_eq!(format_cents(-230), "-2.30");
    }

    fn arb_entry() -> impl Strategy<Value = LedgerEntry> {
        (1i64..100_000, prop::bool::ANY).prop_map(|(amount, credit)| {
            if credit {
                LedgerEntry::credit(amount, "credit").unwrap()
            } else {
                LedgerEntry::debit(amount, "debit").unwrap()
            }
        })
    }

    proptest! {
        #[test]
        fn balance_always_equals_signed_entry_sum(entries in prop::collection::vec(arb_entry(), 0..40)) {
            let mut wallet = Wallet::opening();
            for e in &entries {
                wallet.apply(e);
            }
            prop_assert_eq!(wallet.balance, OPENING_BALANCE + balance_of(entries.iter()));
        }
    }
}
