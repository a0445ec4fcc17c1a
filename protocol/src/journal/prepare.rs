//! Candidate transaction selection.
//!
//! Walks the pending queue in order and picks transactions that are valid,
//! applied one after another, on top of the head's state. Dependencies are
//! pulled in ahead of their dependents. Transactions that can never be
//! included are dropped; those waiting on something age out.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use super::error::{JournalError, JournalResult};
use super::state::JournalState;
use crate::identifier::Identifier;
use crate::storage::global_store::GlobalStore;

/// Bookkeeping for one selection pass.
#[derive(Default)]
struct Selection {
    /// `0` means no limit.
    max: usize,
    added: Vec<Identifier>,
    added_set: HashSet<Identifier>,
    dropped: Vec<Identifier>,
    dropped_set: HashSet<Identifier>,
    /// Found not ready in this pass. Aged once already.
    deferred: HashSet<Identifier>,
    /// On the current dependency path. Guards against cycles.
    visiting: HashSet<Identifier>,
}

impl Selection {
    fn is_full(&self) -> bool {
        self.max > 0 && self.added.len() >= self.max
    }

    fn add(&mut self, id: Identifier) {
        if self.added_set.insert(id) {
            self.added.push(id);
        }
    }

    fn drop_txn(&mut self, id: Identifier) {
        if self.dropped_set.insert(id) {
            self.dropped.push(id);
        }
    }
}

impl JournalState {
    /// Pick up to `max` pending transactions (`0` = no limit) that apply
    /// cleanly, in order, on top of the head's state. Dependencies count
    /// toward `max`; a dependent that no longer fits waits for the next
    /// block without aging.
    ///
    /// Side effects: unready transactions age, missing dependencies are
    /// requested, and dropped transactions leave the pending queue (and
    /// the store, unless a block references them).
    pub fn prepare_transaction_list(&mut self, max: usize) -> JournalResult<Vec<Identifier>> {
        let head = self.head;
        let mut store = self
            .global_stores
            .get_block_store(&head)?
            .ok_or_else(|| JournalError::UnknownBlock(head.short()))?
            .clone_block();

        let mut selection = Selection {
            max,
            ..Default::default()
        };
        for txn_id in self.pending_transactions.ids() {
            if selection.is_full() {
                break;
            }
            if self.transactions.contains(&txn_id) {
                self.prepare_transaction(&mut selection, &mut store, txn_id)?;
            }
        }

        for txn_id in &selection.dropped {
            self.stats.invalid_txn_count += 1;
            let unreferenced = self
                .transactions
                .get(txn_id)
                .is_some_and(|txn| txn.in_block.is_none());
            if unreferenced {
                self.transactions.remove(txn_id)?;
            }
            self.pending_transactions.remove(txn_id);
        }
        if !selection.dropped.is_empty() {
            info!(dropped = selection.dropped.len(), "dropped unusable pending transactions");
            self.prune_requests();
        }

        debug!(selected = selection.added.len(), "prepared transaction list");
        Ok(selection.added)
    }

    /// Returns `true` when the transaction (and its dependencies) were
    /// selected.
    fn prepare_transaction(
        &mut self,
        selection: &mut Selection,
        store: &mut GlobalStore,
        txn_id: Identifier,
    ) -> JournalResult<bool> {
        if selection.added_set.contains(&txn_id) {
            return Ok(true);
        }
        if selection.is_full()
            || selection.dropped_set.contains(&txn_id)
            || selection.deferred.contains(&txn_id)
        {
            return Ok(false);
        }
        if !selection.visiting.insert(txn_id) {
            debug!(txn_id = %txn_id.short(), "dependency cycle");
            return Ok(false);
        }

        let Some(txn) = self.transactions.get(&txn_id).cloned() else {
            selection.visiting.remove(&txn_id);
            return Ok(false);
        };

        let mut ready = true;
        for dep in &txn.dependencies {
            if self.transactions.get(dep).is_some_and(|d| d.is_committed()) {
                continue;
            }
            if selection.added_set.contains(dep) {
                continue;
            }
            if selection.dropped_set.contains(dep) {
                info!(txn_id = %txn_id.short(), dep = %dep.short(), "dependency was dropped");
                selection.drop_txn(txn_id);
                ready = false;
                continue;
            }
            if self.transactions.contains(dep) {
                if !self.prepare_transaction(selection, store, *dep)? {
                    if selection.dropped_set.contains(dep) {
                        selection.drop_txn(txn_id);
                    }
                    ready = false;
                }
                continue;
            }
            self.request_missing_transaction(*dep);
            self.stats.missing_txn_dep_count += 1;
            ready = false;
        }
        selection.visiting.remove(&txn_id);

        // Filled up by its own dependencies.
        if selection.is_full() && !selection.dropped_set.contains(&txn_id) {
            return Ok(false);
        }
        if !ready {
            if selection.dropped_set.contains(&txn_id) {
                return Ok(false);
            }
            let mut age = 0;
            self.transactions.update(&txn_id, |t| age = t.increment_age())?;
            if age > self.config.max_txn_age {
                warn!(txn_id = %txn_id.short(), age, "transaction too old, dropping");
                selection.drop_txn(txn_id);
            } else {
                selection.deferred.insert(txn_id);
            }
            return Ok(false);
        }

        let Some(family) = self.families.get(&txn.family).cloned() else {
            warn!(txn_id = %txn_id.short(), family = %txn.family, "unknown transaction family");
            selection.drop_txn(txn_id);
            return Ok(false);
        };
        let Some(family_store) = store.transaction_store_mut(&txn.family) else {
            warn!(txn_id = %txn_id.short(), family = %txn.family, "family has no state store");
            selection.drop_txn(txn_id);
            return Ok(false);
        };

        if let Err(reason) = family.is_valid(&txn, family_store) {
            info!(txn_id = %txn_id.short(), %reason, "transaction invalid against head state");
            selection.drop_txn(txn_id);
            return Ok(false);
        }
        if let Err(e) = family.apply(&txn, family_store) {
            warn!(txn_id = %txn_id.short(), error = %e, "transaction failed to apply");
            selection.drop_txn(txn_id);
            return Ok(false);
        }

        selection.add(txn_id);
        Ok(true)
    }
}
