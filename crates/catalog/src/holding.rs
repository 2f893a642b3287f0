use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stacks_core::{HoldingId, ItemId, UserId};

/// What kind of relationship a holding records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HoldingKind {
    /// A live loan. Quantity is always 1; the record is deleted on return.
    Borrow,
    /// Accumulated purchases. Quantity grows in place, capped by quota.
    Buy,
}

impl core::fmt::Display for HoldingKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HoldingKind::Borrow => f.write_str("BORROW"),
            HoldingKind::Buy => f.write_str("BUY"),
        }
    }
}

/// A live borrow or accumulated purchase relationship between one user and
/// one item. At most one holding exists per (user, item, kind).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub id: HoldingId,
    pub user: UserId,
    pub item_id: ItemId,
    pub kind: HoldingKind,
    /// Always ≥ 1. Fixed at 1 for borrows.
    pub quantity: i64,
    pub created_at: DateTime<Utc>,
}

impl Holding {
    /// A fresh single-copy loan record.
    pub fn borrow(user: UserId, item_id: ItemId) -> Self {
        Self::new(user, item_id, HoldingKind::Borrow)
    }

    /// A fresh purchase record with quantity 1; later buys of the same item
    /// increment it in place.
    pub fn purchase(user: UserId, item_id: ItemId) -> Self {
        Self::new(user, item_id, HoldingKind::Buy)
    }

    fn new(user: UserId, item_id: ItemId, kind: HoldingKind) -> Self {
        Self {
            id: HoldingId::new(),
            user,
            item_id,
            kind,
            quantity: 1,
            created_at: Utc::now(),
        }
    }
}
