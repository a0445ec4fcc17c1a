//! # Wait-Timer Consensus
//!
//! Every node draws a random wait from an exponential distribution whose
//! mean is scaled to the estimated network population. Whoever's timer
//! expires first claims the next block and publishes a [`WaitCertificate`]
//! proving how long it waited.
//!
//! ## Local Mean
//!
//! ```text
//!   certs < sample_length:  r = certs / sample_length
//!                           mean = target * (1 - r²) + initial * r²
//!   otherwise:              mean = target * avg(local_mean) / avg(duration - minimum)
//! ```
//!
//! The certificate list is built from the predecessors of a block, oldest
//! first, excluding the root block. There is no trusted enclave here: a
//! certificate is checked only for internal consistency and for a local
//! mean that matches the chain it extends.
//!
//! ## Fork Choice
//!
//! Siblings prefer the shorter wait. Otherwise the chain with the larger
//! aggregate local mean (roughly, the larger population) wins. Remaining
//! ties fall back to [`default_compare`].

use std::cmp::Ordering;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{build_candidate, default_compare, Consensus, Verification};
use crate::config::unix_millis;
use crate::identifier::Identifier;
use crate::journal::error::JournalResult;
use crate::journal::state::JournalState;
use crate::storage::block::{ConsensusPayload, TransactionBlock};

/// Relative tolerance when re-deriving a certificate's local mean.
const LOCAL_MEAN_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub minimum_wait_ms: u64,
    pub target_wait_ms: u64,
    /// Mean used while the chain is still bootstrapping.
    pub initial_wait_ms: u64,
    /// Number of predecessor certificates in a population estimate.
    pub certificate_sample_length: usize,
    /// How far a certificate's `ready_at` may lie ahead of the local clock.
    /// Beyond that the block cannot have been claimed honestly yet.
    pub maximum_clock_skew_ms: u64,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            minimum_wait_ms: 1_000,
            target_wait_ms: 20_000,
            initial_wait_ms: 3_000_000,
            certificate_sample_length: 50,
            maximum_clock_skew_ms: 120_000,
        }
    }
}

// ---------------------------------------------------------------------------
// WaitCertificate
// ---------------------------------------------------------------------------

/// Evidence attached to a claimed block. Times are Unix milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitCertificate {
    pub duration_ms: u64,
    pub local_mean_ms: f64,
    pub issued_at: u64,
    pub ready_at: u64,
}

impl WaitCertificate {
    /// Fixed-width little-endian encoding, hashed into the block id.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        buf.extend_from_slice(&self.duration_ms.to_le_bytes());
        buf.extend_from_slice(&self.local_mean_ms.to_bits().to_le_bytes());
        buf.extend_from_slice(&self.issued_at.to_le_bytes());
        buf.extend_from_slice(&self.ready_at.to_le_bytes());
        buf
    }

    fn is_consistent(&self, config: &WaitConfig) -> bool {
        self.duration_ms >= config.minimum_wait_ms
            && self.issued_at.checked_add(self.duration_ms) == Some(self.ready_at)
            && self.local_mean_ms.is_finite()
            && self.local_mean_ms > 0.0
    }
}

// ---------------------------------------------------------------------------
// Wait timer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
struct WaitTimer {
    duration_ms: u64,
    local_mean_ms: f64,
    issued_at: u64,
}

impl WaitTimer {
    fn ready_at(&self) -> u64 {
        self.issued_at.saturating_add(self.duration_ms)
    }
}

/// Mean wait for a node extending a chain with the given certificate
/// history (oldest first).
pub fn compute_local_mean(config: &WaitConfig, certificates: &[WaitCertificate]) -> f64 {
    let sample = config.certificate_sample_length.max(1);
    let target = config.target_wait_ms as f64;
    let count = certificates.len();

    if count < sample {
        let ratio = count as f64 / sample as f64;
        return target * (1.0 - ratio * ratio) + config.initial_wait_ms as f64 * ratio * ratio;
    }

    let recent = &certificates[count - sample..];
    let minimum = config.minimum_wait_ms as f64;
    let sum_waits: f64 = recent.iter().map(|c| c.duration_ms as f64 - minimum).sum();
    let sum_means: f64 = recent.iter().map(|c| c.local_mean_ms).sum();
    if sum_waits <= 0.0 {
        return target;
    }
    target * (sum_means / sum_waits)
}

// ---------------------------------------------------------------------------
// WaitConsensus
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct WaitConsensus {
    config: WaitConfig,
    /// Timer for the candidate currently in flight, keyed by its id.
    timer: Option<(Identifier, WaitTimer)>,
}

impl WaitConsensus {
    pub fn new(config: WaitConfig) -> Self {
        Self { config, timer: None }
    }

    pub fn config(&self) -> &WaitConfig {
        &self.config
    }

    /// Certificates of the predecessors of a block whose predecessor is
    /// `previous`, oldest first. The root block is not included.
    fn certificate_list(&self, state: &JournalState, previous: Identifier) -> Vec<WaitCertificate> {
        let mut certificates = Vec::new();
        let mut cursor = previous;
        while certificates.len() < self.config.certificate_sample_length {
            let Some(block) = state.block(&cursor) else {
                break;
            };
            if block.previous_block_id.is_null() {
                break;
            }
            if let Some(certificate) = block.consensus.wait_certificate() {
                certificates.push(certificate.clone());
            }
            cursor = block.previous_block_id;
        }
        certificates.reverse();
        certificates
    }

    fn issue_timer(&self, state: &JournalState, previous: Identifier, now_ms: u64) -> WaitTimer {
        let local_mean_ms = compute_local_mean(&self.config, &self.certificate_list(state, previous));
        // Exponential draw; the open interval keeps ln() finite.
        let uniform: f64 = rand::thread_rng().gen_range(f64::EPSILON..1.0);
        let extra = -local_mean_ms * uniform.ln();
        let duration_ms = self.config.minimum_wait_ms.saturating_add(extra as u64);
        WaitTimer {
            duration_ms,
            local_mean_ms,
            issued_at: now_ms,
        }
    }
}

impl Consensus for WaitConsensus {
    fn name(&self) -> &str {
        "wait"
    }

    fn build_block(&mut self, state: &mut JournalState, genesis: bool) -> JournalResult<Option<TransactionBlock>> {
        let Some(block) = build_candidate(state, genesis)? else {
            self.timer = None;
            return Ok(None);
        };
        if genesis {
            // Claimed right away; `claim_block` backdates its certificate.
            self.timer = None;
            return Ok(Some(block));
        }
        let timer = self.issue_timer(state, block.previous_block_id, unix_millis());
        debug!(
            block_id = %block.id.short(),
            duration_ms = timer.duration_ms,
            local_mean_ms = timer.local_mean_ms,
            "issued wait timer"
        );
        self.timer = Some((block.id, timer));
        Ok(Some(block))
    }

    fn claim_block(&mut self, state: &JournalState, block: &mut TransactionBlock) {
        let timer = match self.timer.take() {
            Some((id, timer)) if id == block.id => timer,
            _ => {
                // Claimed without a running timer (genesis, or a forced
                // claim): issue one that has already expired.
                let now = unix_millis();
                let mut timer = self.issue_timer(state, block.previous_block_id, now);
                timer.issued_at = now.saturating_sub(timer.duration_ms);
                timer
            }
        };
        block.consensus = ConsensusPayload::Wait(WaitCertificate {
            duration_ms: timer.duration_ms,
            local_mean_ms: timer.local_mean_ms,
            issued_at: timer.issued_at,
            ready_at: timer.ready_at(),
        });
        block.sign_block(state.keypair());
    }

    fn verify_block(&self, state: &JournalState, block: &TransactionBlock) -> Verification {
        let Some(certificate) = block.consensus.wait_certificate() else {
            warn!(block_id = %block.id.short(), "block has no wait certificate");
            return Verification::Invalid;
        };
        if !certificate.is_consistent(&self.config) {
            warn!(block_id = %block.id.short(), "inconsistent wait certificate");
            return Verification::Invalid;
        }

        let expected = compute_local_mean(&self.config, &self.certificate_list(state, block.previous_block_id));
        let tolerance = LOCAL_MEAN_TOLERANCE * expected.abs().max(1.0);
        if (certificate.local_mean_ms - expected).abs() > tolerance {
            warn!(
                block_id = %block.id.short(),
                claimed = certificate.local_mean_ms,
                expected,
                "wait certificate local mean does not match chain"
            );
            return Verification::Invalid;
        }

        let now = unix_millis();
        if certificate.ready_at > now.saturating_add(self.config.maximum_clock_skew_ms) {
            warn!(
                block_id = %block.id.short(),
                ahead_ms = certificate.ready_at - now,
                "wait certificate is too far in the future"
            );
            return Verification::Invalid;
        }
        if now < certificate.ready_at {
            debug!(block_id = %block.id.short(), "wait timer not yet expired here");
            return Verification::Pending;
        }
        Verification::Valid
    }

    fn check_claim_block(&self, _state: &JournalState, block: &TransactionBlock, now_ms: u64) -> bool {
        match &self.timer {
            Some((id, timer)) if *id == block.id => now_ms >= timer.ready_at(),
            _ => false,
        }
    }

    fn compare_blocks(&self, a: &TransactionBlock, b: &TransactionBlock) -> Ordering {
        if let (Some(ca), Some(cb)) = (a.consensus.wait_certificate(), b.consensus.wait_certificate()) {
            let ordering = if a.previous_block_id == b.previous_block_id {
                cb.duration_ms.cmp(&ca.duration_ms)
            } else {
                a.aggregate_weight
                    .partial_cmp(&b.aggregate_weight)
                    .unwrap_or(Ordering::Equal)
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        default_compare(a, b)
    }

    fn update_block_weight(&self, state: &JournalState, block: &mut TransactionBlock) {
        let local_mean = block
            .consensus
            .wait_certificate()
            .map(|c| c.local_mean_ms)
            .unwrap_or(0.0);
        let inherited = if block.previous_block_id.is_null() {
            0.0
        } else {
            state
                .block(&block.previous_block_id)
                .map(|prev| prev.aggregate_weight)
                .unwrap_or(0.0)
        };
        block.aggregate_weight = local_mean + inherited;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
