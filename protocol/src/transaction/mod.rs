//! # Transaction Module
//!
//! Construction, signing, verification and family dispatch for journal
//! transactions.
//!
//! ## Architecture
//!
//! ```text
//! types.rs        : TransactionStatus
//! builder.rs      : Transaction record and the fluent TransactionBuilder
//! signing.rs      : Ed25519 signing
//! verification.rs : identifier and signature checks
//! family.rs       : TransactionFamily trait and FamilyRegistry
//! integer_key.rs  : the /IntegerKey reference family
//! ```
//!
//! ## Transaction Lifecycle
//!
//! 1. **Build**: [`TransactionBuilder`] assembles the client fields and
//!    derives the identifier.
//! 2. **Sign**: [`sign_transaction`] attaches originator and signature.
//! 3. **Verify**: the receiving node runs [`verify_transaction`] before
//!    handing the transaction to the journal.
//! 4. **Pending**: the journal admits it and selects it into a candidate
//!    block once its dependencies are satisfied.
//! 5. **Committed**: its block joins the chain. A fork may send it back to
//!    pending.

pub mod builder;
pub mod family;
pub mod integer_key;
pub mod signing;
pub mod types;
pub mod verification;

pub use builder::{Transaction, TransactionBuilder};
pub use family::{FamilyRegistry, TransactionFamily};
pub use integer_key::{integer_key_transaction, IntegerKeyFamily, IntegerKeyPayload, Update, INTEGER_KEY_FAMILY};
pub use signing::sign_transaction;
pub use types::TransactionStatus;
pub use verification::{verify_transaction, TransactionError};
