//! # Journal State
//!
//! Everything the journal knows, minus the consensus strategy. Keeping the
//! strategy out lets the journal hand `&mut JournalState` to it while still
//! owning both.
//!
//! ```text
//!   Journal
//!   ├── consensus: Box<dyn Consensus>      builds, claims, verifies, compares
//!   ├── observers: Vec<Box<dyn JournalObserver>>
//!   └── state: JournalState
//!       ├── transactions / blocks          RecordTable (write-through)
//!       ├── global_stores                  per-block family snapshots
//!       ├── pending_transactions           insertion-ordered queue
//!       ├── pending / invalid block ids
//!       ├── requested blocks / txns        next-allowed request time
//!       ├── head                           most recently committed block
//!       └── pending_block                  candidate in flight
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use super::error::JournalResult;
use super::stats::JournalStats;
use crate::config::JournalConfig;
use crate::crypto::keys::StrataKeypair;
use crate::identifier::Identifier;
use crate::network::Network;
use crate::storage::block::TransactionBlock;
use crate::storage::db::JournalDb;
use crate::storage::global_store::GlobalStoreManager;
use crate::storage::table::RecordTable;
use crate::transaction::{FamilyRegistry, Transaction};

// ---------------------------------------------------------------------------
// PendingQueue
// ---------------------------------------------------------------------------

/// Insertion-ordered set of transaction ids that supports pushing at
/// either end and O(log n) removal.
#[derive(Debug, Default, Clone)]
pub struct PendingQueue {
    order: BTreeMap<i64, Identifier>,
    index: HashMap<Identifier, i64>,
    /// Sequence number of the current front element.
    front: i64,
    /// Sequence number one past the current back element.
    back: i64,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `id` unless present. Returns `true` if it was inserted.
    pub fn push_back(&mut self, id: Identifier) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }
        if self.order.is_empty() {
            self.front = self.back;
        }
        let seq = self.back;
        self.back += 1;
        self.order.insert(seq, id);
        self.index.insert(id, seq);
        true
    }

    /// Put `id` first, moving it if it is already queued.
    pub fn push_front(&mut self, id: Identifier) {
        self.remove(&id);
        if self.order.is_empty() {
            self.push_back(id);
            return;
        }
        self.front -= 1;
        self.order.insert(self.front, id);
        self.index.insert(id, self.front);
    }

    /// Put `ids` first, keeping their relative order.
    pub fn prepend_all(&mut self, ids: &[Identifier]) {
        for id in ids.iter().rev() {
            self.push_front(*id);
        }
    }

    pub fn remove(&mut self, id: &Identifier) -> bool {
        match self.index.remove(id) {
            Some(seq) => {
                self.order.remove(&seq);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Identifier> {
        self.order.values()
    }

    pub fn ids(&self) -> Vec<Identifier> {
        self.order.values().copied().collect()
    }
}

// ---------------------------------------------------------------------------
// JournalState
// ---------------------------------------------------------------------------

pub struct JournalState {
    pub(crate) config: JournalConfig,
    pub(crate) db: JournalDb,
    pub(crate) keypair: StrataKeypair,
    pub(crate) network: Arc<dyn Network>,
    pub(crate) families: FamilyRegistry,

    pub(crate) transactions: RecordTable<Transaction>,
    pub(crate) blocks: RecordTable<TransactionBlock>,
    pub(crate) global_stores: GlobalStoreManager,

    pub(crate) pending_transactions: PendingQueue,
    /// Start of the current wait for a candidate build. Set when the
    /// pending set fills and after every build attempt that leaves work.
    pub(crate) transaction_enqueue_time: Option<Instant>,
    /// Ordered so that the retry sweep is deterministic.
    pub(crate) pending_block_ids: BTreeSet<Identifier>,
    pub(crate) invalid_block_ids: BTreeSet<Identifier>,
    /// Id to the earliest time another request may be sent.
    pub(crate) requested_blocks: HashMap<Identifier, Instant>,
    pub(crate) requested_transactions: HashMap<Identifier, Instant>,

    pub(crate) head: Identifier,
    pub(crate) pending_block: Option<TransactionBlock>,
    pub(crate) pending_block_built_at: Option<Instant>,

    pub(crate) stats: JournalStats,
    pub(crate) initializing: bool,
    pub(crate) initial_load: bool,
    /// A retry sweep is running. Nested sweeps are skipped.
    pub(crate) retrying: bool,
    pub(crate) initial_transactions: Vec<Transaction>,
    pub(crate) initial_blocks: Vec<TransactionBlock>,
    pub(crate) start_time: Instant,
}

impl JournalState {
    /// Open the journal's stores. Without `restore` every persisted record
    /// is discarded first.
    pub fn new(
        config: JournalConfig,
        db: JournalDb,
        keypair: StrataKeypair,
        network: Arc<dyn Network>,
    ) -> JournalResult<Self> {
        let (transactions, blocks) = if config.restore {
            let transactions = RecordTable::load(Arc::clone(&db.transactions))?;
            let blocks = RecordTable::load(Arc::clone(&db.blocks))?;
            info!(
                transactions = transactions.len(),
                blocks = blocks.len(),
                "loaded persisted journal records"
            );
            (transactions, blocks)
        } else {
            db.clear()?;
            (
                RecordTable::new(Arc::clone(&db.transactions)),
                RecordTable::new(Arc::clone(&db.blocks)),
            )
        };
        let global_stores = GlobalStoreManager::new(Arc::clone(&db.state))?;

        Ok(Self {
            config,
            db,
            keypair,
            network,
            families: FamilyRegistry::new(),
            transactions,
            blocks,
            global_stores,
            pending_transactions: PendingQueue::new(),
            transaction_enqueue_time: None,
            pending_block_ids: BTreeSet::new(),
            invalid_block_ids: BTreeSet::new(),
            requested_blocks: HashMap::new(),
            requested_transactions: HashMap::new(),
            head: Identifier::NULL,
            pending_block: None,
            pending_block_built_at: None,
            stats: JournalStats::default(),
            initializing: true,
            initial_load: false,
            retrying: false,
            initial_transactions: Vec::new(),
            initial_blocks: Vec::new(),
            start_time: Instant::now(),
        })
    }

    // -- Accessors --

    pub fn config(&self) -> &JournalConfig {
        &self.config
    }

    pub fn keypair(&self) -> &StrataKeypair {
        &self.keypair
    }

    pub fn families(&self) -> &FamilyRegistry {
        &self.families
    }

    /// Id of the most recently committed block, `NULL` before genesis.
    pub fn head(&self) -> Identifier {
        self.head
    }

    pub fn head_block(&self) -> Option<&TransactionBlock> {
        self.blocks.get(&self.head)
    }

    pub fn block(&self, id: &Identifier) -> Option<&TransactionBlock> {
        self.blocks.get(id)
    }

    pub fn transaction(&self, id: &Identifier) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    /// The candidate block currently in flight, if any.
    pub fn pending_block(&self) -> Option<&TransactionBlock> {
        self.pending_block.as_ref()
    }

    pub fn pending_transaction_ids(&self) -> Vec<Identifier> {
        self.pending_transactions.ids()
    }

    pub fn pending_block_ids(&self) -> Vec<Identifier> {
        self.pending_block_ids.iter().copied().collect()
    }

    /// Whether the snapshot of `block_id` is held in memory right now.
    pub fn snapshot_in_memory(&self, block_id: &Identifier) -> bool {
        self.global_stores.contains_in_memory(block_id)
    }

    /// Snapshots held in memory, the root included.
    pub fn snapshots_in_memory(&self) -> usize {
        self.global_stores.in_memory_count()
    }

    pub fn is_initializing(&self) -> bool {
        self.initializing
    }

    /// Whole seconds since this journal was created.
    pub fn elapsed_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// A copy of the counters with the pending samples filled in.
    pub fn stats(&self) -> JournalStats {
        let mut stats = self.stats.clone();
        stats.pending_block_count = self.pending_block_ids.len() as u64;
        stats.pending_txn_count = self.pending_transactions.len() as u64;
        stats.head = self.head;
        stats
    }

    /// Committed block ids from the head backwards. `count == 0` means all.
    pub fn committed_block_ids(&self, count: usize) -> Vec<Identifier> {
        let limit = if count == 0 { usize::MAX } else { count };
        let mut ids = Vec::new();
        let mut cursor = self.head;
        while !cursor.is_null() && ids.len() < limit {
            ids.push(cursor);
            match self.blocks.get(&cursor) {
                Some(block) => cursor = block.previous_block_id,
                None => break,
            }
        }
        ids
    }

    /// Walk `depth` predecessors back from `start`. Stops early at `NULL`
    /// or at a block that is not stored.
    pub fn ancestor(&self, start: Identifier, depth: u64) -> Identifier {
        let mut cursor = start;
        for _ in 0..depth {
            match self.blocks.get(&cursor) {
                Some(block) if !cursor.is_null() => cursor = block.previous_block_id,
                _ => return Identifier::NULL,
            }
        }
        cursor
    }

    // -- Missing data --

    /// Ask peers for a block, at most once per `missing_request_interval`.
    pub(crate) fn request_missing_block(&mut self, block_id: Identifier) {
        let now = Instant::now();
        if let Some(next) = self.requested_blocks.get(&block_id) {
            if now < *next {
                return;
            }
        }
        self.requested_blocks
            .insert(block_id, now + self.config.missing_request_interval);
        debug!(block_id = %block_id.short(), "block missing, requesting");
        self.network.request_missing_block(block_id);
    }

    /// Ask peers for a transaction, at most once per
    /// `missing_request_interval`.
    pub(crate) fn request_missing_transaction(&mut self, txn_id: Identifier) {
        let now = Instant::now();
        if let Some(next) = self.requested_transactions.get(&txn_id) {
            if now < *next {
                debug!(txn_id = %txn_id.short(), "already requested");
                return;
            }
        }
        self.requested_transactions
            .insert(txn_id, now + self.config.missing_request_interval);
        self.stats.missing_txn_request_count += 1;
        info!(txn_id = %txn_id.short(), "transaction missing, requesting");
        self.network.request_missing_transaction(txn_id);
    }

    /// Forget outstanding requests that nothing waits on any more: no
    /// pending transaction depends on them and no pending block needs them.
    pub(crate) fn prune_requests(&mut self) {
        let mut wanted_txns: HashSet<Identifier> = self
            .pending_transactions
            .iter()
            .filter_map(|id| self.transactions.get(id))
            .flat_map(|txn| txn.dependencies.iter().copied())
            .collect();
        let mut wanted_blocks = HashSet::new();
        for block in self.pending_block_ids.iter().filter_map(|id| self.blocks.get(id)) {
            wanted_txns.extend(block.transaction_ids.iter().copied());
            wanted_blocks.insert(block.previous_block_id);
        }

        let before = self.requested_transactions.len() + self.requested_blocks.len();
        self.requested_transactions.retain(|id, _| wanted_txns.contains(id));
        self.requested_blocks.retain(|id, _| wanted_blocks.contains(id));
        let pruned = before - self.requested_transactions.len() - self.requested_blocks.len();
        if pruned > 0 {
            debug!(pruned, "forgot requests nothing waits on");
        }
    }

    // -- Chain root --

    /// Tip of the deepest chain among the stored blocks. Used when the head
    /// pointer was not persisted.
    pub(crate) fn compute_chain_root(&self) -> Identifier {
        let mut depths: HashMap<Identifier, u64> = HashMap::new();
        depths.insert(Identifier::NULL, 0);

        for block in self.blocks.values() {
            if depths.contains_key(&block.id) {
                continue;
            }
            // Walk back to a block of known depth, remembering the path.
            let mut path = Vec::new();
            let mut cursor = block.id;
            let base = loop {
                if let Some(depth) = depths.get(&cursor) {
                    break *depth;
                }
                match self.blocks.get(&cursor) {
                    Some(b) => {
                        path.push(cursor);
                        cursor = b.previous_block_id;
                    }
                    // Dangling predecessor: the chain starts here.
                    None => break 0,
                }
            };
            for (offset, id) in path.iter().rev().enumerate() {
                depths.insert(*id, base + offset as u64 + 1);
            }
        }

        depths
            .into_iter()
            .max_by(|(id_a, a), (id_b, b)| a.cmp(b).then_with(|| id_a.cmp(id_b)))
            .map(|(id, _)| id)
            .unwrap_or(Identifier::NULL)
    }
}

impl std::fmt::Debug for JournalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalState")
            .field("head", &self.head)
            .field("transactions", &self.transactions.len())
            .field("blocks", &self.blocks.len())
            .field("pending_transactions", &self.pending_transactions.len())
            .field("pending_blocks", &self.pending_block_ids.len())
            .field("initializing", &self.initializing)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NullNetwork;

    fn id(n: u8) -> Identifier {
        Identifier::from_bytes([n; 32])
    }

    fn state() -> JournalState {
        JournalState::new(
            JournalConfig::default(),
            JournalDb::in_memory(),
            StrataKeypair::from_seed(&[1u8; 32]),
            Arc::new(NullNetwork),
        )
        .unwrap()
    }

    /// Store a valid chain of `len` blocks hanging off `previous`.
    fn store_chain(state: &mut JournalState, previous: Identifier, len: u64, salt: u8) -> Vec<Identifier> {
        let mut ids = Vec::new();
        let mut prev = previous;
        let start = state.blocks.get(&previous).map(|b| b.block_num + 1).unwrap_or(0);
        for n in 0..len {
            let block = TransactionBlock::new(prev, start + n, vec![id(salt.wrapping_add(n as u8))]);
            prev = block.id;
            ids.push(block.id);
            state.blocks.put(block).unwrap();
        }
        ids
    }

    // -- PendingQueue --

    #[test]
    fn pending_queue_keeps_insertion_order() {
        let mut q = PendingQueue::new();
        assert!(q.push_back(id(1)));
        assert!(q.push_back(id(2)));
        assert!(!q.push_back(id(1)));
        q.push_front(id(3));
        assert_eq!(q.ids(), vec![id(3), id(1), id(2)]);
    }

    #[test]
    fn pending_queue_prepend_all_preserves_block_order() {
        let mut q = PendingQueue::new();
        q.push_back(id(9));
        q.prepend_all(&[id(1), id(2), id(3)]);
        assert_eq!(q.ids(), vec![id(1), id(2), id(3), id(9)]);
    }

    #[test]
    fn pending_queue_remove_and_reuse() {
        let mut q = PendingQueue::new();
        q.push_back(id(1));
        assert!(q.remove(&id(1)));
        assert!(!q.remove(&id(1)));
        assert!(q.is_empty());
        q.push_front(id(2));
        q.push_back(id(3));
        assert_eq!(q.ids(), vec![id(2), id(3)]);
    }

    // -- Chain helpers --

    #[test]
    fn committed_block_ids_walks_back_from_head() {
        let mut s = state();
        let chain = store_chain(&mut s, Identifier::NULL, 4, 10);
        s.head = chain[3];
        assert_eq!(s.committed_block_ids(0), vec![chain[3], chain[2], chain[1], chain[0]]);
        assert_eq!(s.committed_block_ids(2), vec![chain[3], chain[2]]);
    }

    #[test]
    fn ancestor_stops_at_null() {
        let mut s = state();
        let chain = store_chain(&mut s, Identifier::NULL, 3, 20);
        assert_eq!(s.ancestor(chain[2], 2), chain[0]);
        assert_eq!(s.ancestor(chain[2], 3), Identifier::NULL);
        assert_eq!(s.ancestor(chain[2], 10), Identifier::NULL);
    }

    #[test]
    fn compute_chain_root_picks_deepest_tip() {
        let mut s = state();
        let main = store_chain(&mut s, Identifier::NULL, 3, 30);
        let fork = store_chain(&mut s, main[0], 4, 40);
        assert_eq!(s.compute_chain_root(), fork[3]);
    }

    #[test]
    fn compute_chain_root_of_empty_store_is_null() {
        assert!(state().compute_chain_root().is_null());
    }

    // -- Requests --

    #[test]
    fn requests_nobody_waits_on_are_pruned() {
        let mut s = state();
        let waited_for = id(1);
        let abandoned = id(2);
        let mut dependent = crate::transaction::integer_key_transaction(1, vec![])
            .depends_on(waited_for)
            .build();
        dependent.status = crate::transaction::TransactionStatus::Pending;
        let dependent_id = dependent.id;
        s.transactions.put(dependent).unwrap();
        s.pending_transactions.push_back(dependent_id);

        s.request_missing_transaction(waited_for);
        s.request_missing_transaction(abandoned);
        s.request_missing_block(id(3));
        s.prune_requests();

        assert!(s.requested_transactions.contains_key(&waited_for));
        assert!(!s.requested_transactions.contains_key(&abandoned));
        assert!(s.requested_blocks.is_empty());
    }

    #[test]
    fn transaction_requests_are_rate_limited() {
        let mut s = state();
        s.request_missing_transaction(id(7));
        s.request_missing_transaction(id(7));
        s.request_missing_transaction(id(8));
        assert_eq!(s.stats.missing_txn_request_count, 2);
    }
}
