//! # Journal Configuration & Constants
//!
//! Every tunable of the journal lives here. The constants are the defaults;
//! [`JournalConfig`] is what a running journal actually reads, so a node
//! can override any of them from its config file without recompiling.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Protocol Version
// ---------------------------------------------------------------------------

/// Crate version, reported by the node's `version` subcommand.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Chain Retention
// ---------------------------------------------------------------------------

/// Number of block snapshots kept fully layered in memory. Every time the
/// head reaches a multiple of this, the snapshot this many blocks back is
/// flattened and everything older is evicted. Memory therefore stays below
/// roughly twice this many snapshots.
pub const DEFAULT_MAXIMUM_BLOCKS_TO_KEEP: u64 = 50;

// ---------------------------------------------------------------------------
// Block Construction
// ---------------------------------------------------------------------------

/// A candidate block is only built once this many transactions are ready.
/// The genesis block is exempt.
pub const DEFAULT_MINIMUM_TRANSACTIONS_PER_BLOCK: usize = 1;

/// Upper bound on the transactions selected into one candidate block.
pub const DEFAULT_MAXIMUM_TRANSACTIONS_PER_BLOCK: usize = 1000;

/// Minimum time a candidate waits before it may be claimed.
pub const DEFAULT_BLOCK_WAIT_TIME: Duration = Duration::ZERO;

/// With no candidate in flight, the service retries a build for waiting
/// transactions only after they have waited this long. Each retry ages
/// the transactions that are still blocked.
pub const DEFAULT_MAXIMUM_TRANSACTIONS_WAIT_TIME: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Missing Data & Retry
// ---------------------------------------------------------------------------

/// A request for the same missing block or transaction is sent at most
/// once per interval. Peers are slow; spamming them does not help.
pub const DEFAULT_MISSING_REQUEST_INTERVAL: Duration = Duration::from_secs(30);

/// How often blocks parked in `retry` are re-validated.
pub const DEFAULT_BLOCK_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// A pending transaction whose dependencies stay unresolved for more than
/// this many candidate builds is dropped.
pub const DEFAULT_MAX_TXN_AGE: u32 = 3;

// ---------------------------------------------------------------------------
// Chain Store Keys
// ---------------------------------------------------------------------------

/// Chain-store key holding the id of the most recently committed block.
pub const HEAD_KEY: &[u8] = b"most_recent_block_id";

// ---------------------------------------------------------------------------
// JournalConfig
// ---------------------------------------------------------------------------

/// Runtime configuration of a journal.
///
/// Durations are (de)serialized as whole milliseconds so config files stay
/// readable:
///
/// ```json
/// { "missing_request_interval_ms": 30000, "max_txn_age": 3 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub maximum_blocks_to_keep: u64,
    pub minimum_transactions_per_block: usize,
    pub maximum_transactions_per_block: usize,
    #[serde(rename = "missing_request_interval_ms", with = "duration_ms")]
    pub missing_request_interval: Duration,
    #[serde(rename = "block_retry_interval_ms", with = "duration_ms")]
    pub block_retry_interval: Duration,
    pub max_txn_age: u32,
    #[serde(rename = "block_wait_time_ms", with = "duration_ms")]
    pub block_wait_time: Duration,
    #[serde(rename = "maximum_transactions_wait_time_ms", with = "duration_ms")]
    pub maximum_transactions_wait_time: Duration,
    /// This node creates the genesis block if it has no chain.
    pub genesis_ledger: bool,
    /// Reload head and records from the persisted stores instead of
    /// starting empty.
    pub restore: bool,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            maximum_blocks_to_keep: DEFAULT_MAXIMUM_BLOCKS_TO_KEEP,
            minimum_transactions_per_block: DEFAULT_MINIMUM_TRANSACTIONS_PER_BLOCK,
            maximum_transactions_per_block: DEFAULT_MAXIMUM_TRANSACTIONS_PER_BLOCK,
            missing_request_interval: DEFAULT_MISSING_REQUEST_INTERVAL,
            block_retry_interval: DEFAULT_BLOCK_RETRY_INTERVAL,
            max_txn_age: DEFAULT_MAX_TXN_AGE,
            block_wait_time: DEFAULT_BLOCK_WAIT_TIME,
            maximum_transactions_wait_time: DEFAULT_MAXIMUM_TRANSACTIONS_WAIT_TIME,
            genesis_ledger: false,
            restore: false,
        }
    }
}

/// Reasons a [`JournalConfig`] is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("maximum_blocks_to_keep must be at least 1")]
    ZeroRetention,

    #[error("minimum_transactions_per_block ({min}) exceeds maximum_transactions_per_block ({max})")]
    BlockSizeRange { min: usize, max: usize },

    #[error("block_retry_interval must be non-zero")]
    ZeroRetryInterval,
}

impl JournalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.maximum_blocks_to_keep == 0 {
            return Err(ConfigError::ZeroRetention);
        }
        if self.maximum_transactions_per_block != 0
            && self.minimum_transactions_per_block > self.maximum_transactions_per_block
        {
            return Err(ConfigError::BlockSizeRange {
                min: self.minimum_transactions_per_block,
                max: self.maximum_transactions_per_block,
            });
        }
        if self.block_retry_interval.is_zero() {
            return Err(ConfigError::ZeroRetryInterval);
        }
        Ok(())
    }
}

/// Wall-clock milliseconds since the Unix epoch. Wait certificates carry
/// these so that every node can check them.
pub fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = JournalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.maximum_blocks_to_keep, 50);
        assert_eq!(config.missing_request_interval, Duration::from_secs(30));
        assert_eq!(config.max_txn_age, 3);
        assert_eq!(config.maximum_transactions_wait_time, Duration::from_secs(60));
        assert!(!config.genesis_ledger);
    }

    #[test]
    fn zero_retention_is_rejected() {
        let config = JournalConfig {
            maximum_blocks_to_keep: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroRetention));
    }

    #[test]
    fn inverted_block_size_is_rejected() {
        let config = JournalConfig {
            minimum_transactions_per_block: 10,
            maximum_transactions_per_block: 5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::BlockSizeRange { .. })));
    }

    #[test]
    fn json_uses_millisecond_durations() {
        let json = r#"{"missing_request_interval_ms": 500, "genesis_ledger": true}"#;
        let config: JournalConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.missing_request_interval, Duration::from_millis(500));
        assert!(config.genesis_ledger);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.block_retry_interval, DEFAULT_BLOCK_RETRY_INTERVAL);

        let back = serde_json::to_value(&config).unwrap();
        assert_eq!(back["missing_request_interval_ms"], 500);
    }

    #[test]
    fn unix_millis_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(unix_millis() > 1_577_836_800_000);
    }
}
