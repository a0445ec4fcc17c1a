//! Core type definitions for journal transactions.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// TransactionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a transaction as tracked by the journal.
///
/// A freshly built transaction is `Unknown`. Admission moves it to
/// `Pending`, and committing its block moves it to `Committed`. If that
/// block is later decommitted (fork loss) it drops back to `Pending`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Not yet seen by a journal.
    #[default]
    Unknown,
    /// Accepted, waiting for inclusion in a committed block.
    Pending,
    /// Included in a block on the committed chain.
    Committed,
    /// Rejected by its family.
    Failed,
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Pending => write!(f, "pending"),
            Self::Committed => write!(f, "committed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_status_is_unknown() {
        assert_eq!(TransactionStatus::default(), TransactionStatus::Unknown);
    }

    #[test]
    fn status_display_is_lowercase() {
        assert_eq!(TransactionStatus::Pending.to_string(), "pending");
        assert_eq!(TransactionStatus::Committed.to_string(), "committed");
    }
}
