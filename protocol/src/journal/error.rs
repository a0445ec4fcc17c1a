//! Error types for the journal.

use thiserror::Error;

use crate::config::ConfigError;
use crate::storage::db::DbError;
use crate::storage::kv::StoreError;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("database error: {0}")]
    Db(#[from] DbError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("state store error: {0}")]
    Store(#[from] StoreError),

    /// A block the chain invariants say must be stored is not.
    #[error("unknown block: {0}")]
    UnknownBlock(String),

    #[error("unknown transaction: {0}")]
    UnknownTransaction(String),

    /// Fork choice was asked to compare a block that is not valid.
    #[error("cannot compare block {block_id} with status {status}")]
    InvalidComparison { block_id: String, status: String },

    /// The journal service task has stopped.
    #[error("journal service is closed")]
    ServiceClosed,
}

pub type JournalResult<T> = Result<T, JournalError>;
