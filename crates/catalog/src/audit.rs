use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stacks_core::{AuditEntryId, DomainError, ItemId, UserId};

/// The four state-changing actions the audit log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditAction {
    Borrow,
    Return,
    Buy,
    /// Automated replenishment, recorded under the system identity.
    Stock,
}

impl AuditAction {
    pub const ALL: [AuditAction; 4] = [
        AuditAction::Borrow,
        AuditAction::Return,
        AuditAction::Buy,
        AuditAction::Stock,
    ];
}

impl core::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            AuditAction::Borrow => "BORROW",
            AuditAction::Return => "RETURN",
            AuditAction::Buy => "BUY",
            AuditAction::Stock => "STOCK",
        };
        f.write_str(s)
    }
}

impl core::str::FromStr for AuditAction {
    type Err = DomainError;

    /// Case-insensitive parse; the error names the accepted values so it can
    /// be surfaced verbatim to API callers filtering the log.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BORROW" => Ok(AuditAction::Borrow),
            "RETURN" => Ok(AuditAction::Return),
            "BUY" => Ok(AuditAction::Buy),
            "STOCK" => Ok(AuditAction::Stock),
            other => Err(DomainError::validation(format!(
                "invalid action type '{other}', expected one of [BORROW, RETURN, BUY, STOCK]"
            ))),
        }
    }
}

/// Append-only record of one state-changing action.
///
/// Never updated or deleted; the canonical activity log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: AuditEntryId,
    pub item_id: ItemId,
    pub user: UserId,
    pub action: AuditAction,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn record(item_id: ItemId, user: UserId, action: AuditAction) -> Self {
        Self {
            id: AuditEntryId::new(),
            item_id,
            user,
            action,
            recorded_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_parses_case_insensitively() {
        assert_eq!("borrow".parse::<AuditAction>().unwrap(), AuditAction::Borrow);
        assert_eq!("STOCK".parse::<AuditAction>().unwrap(), AuditAction::Stock);
    }

    #[test]
    fn unknown_action_error_lists_valid_values() {
        let err = "lend".parse::<AuditAction>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("BORROW") && msg.contains("STOCK"), "{msg}");
    }
}
