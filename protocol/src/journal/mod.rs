//! # Journal
//!
//! The journal keeps an append-mostly chain of transaction blocks, decides
//! which chain is canonical, and maintains per-block state snapshots so that
//! any recent block's state can be read or built upon.
//!
//! ## Architecture
//!
//! ```text
//! mod.rs       : Journal, public API, startup, candidate build and claim
//! state.rs     : JournalState, PendingQueue
//! admission.rs : transaction admission, the block state machine
//! chain.rs     : advance, fork resolution, compaction
//! prepare.rs   : candidate transaction selection
//! observer.rs  : lifecycle hooks
//! stats.rs     : counters
//! service.rs   : tokio task and async handle
//! error.rs     : JournalError
//! ```
//!
//! ## Lifecycle
//!
//! A journal starts *initializing*: transactions and blocks that arrive are
//! buffered. [`Journal::initialization_complete`] replays the buffer (blocks
//! in height order), restores the head when configured to, and, on a
//! genesis ledger with no chain yet, builds and claims the genesis block.
//!
//! `Journal` is a synchronous `&mut self` state machine. Concurrency lives
//! in [`service::JournalService`], which owns one journal inside a tokio
//! task.

pub mod admission;
pub mod chain;
pub mod error;
pub mod observer;
pub mod prepare;
pub mod service;
pub mod state;
pub mod stats;

pub use error::{JournalError, JournalResult};
pub use observer::JournalObserver;
pub use service::{JournalHandle, JournalService};
pub use state::{JournalState, PendingQueue};
pub use stats::JournalStats;

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{JournalConfig, HEAD_KEY};
use crate::consensus::Consensus;
use crate::crypto::keys::StrataKeypair;
use crate::identifier::Identifier;
use crate::network::{JournalMessage, Network};
use crate::storage::block::TransactionBlock;
use crate::storage::db::JournalDb;
use crate::storage::global_store::StateSnapshot;
use crate::transaction::{verify_transaction, Transaction, TransactionFamily, TransactionStatus};

pub struct Journal {
    consensus: Box<dyn Consensus>,
    observers: Vec<Box<dyn JournalObserver>>,
    state: JournalState,
}

impl Journal {
    /// Create a journal over `db`. It starts out initializing.
    pub fn new(
        config: JournalConfig,
        db: JournalDb,
        consensus: Box<dyn Consensus>,
        network: Arc<dyn Network>,
        keypair: StrataKeypair,
    ) -> JournalResult<Self> {
        config.validate()?;
        info!(
            consensus = consensus.name(),
            genesis_ledger = config.genesis_ledger,
            restore = config.restore,
            originator = %keypair.public_key().short(),
            "opening journal"
        );
        let state = JournalState::new(config, db, keypair, network)?;
        Ok(Self {
            consensus,
            observers: Vec::new(),
            state,
        })
    }

    pub fn state(&self) -> &JournalState {
        &self.state
    }

    pub fn consensus_name(&self) -> &str {
        self.consensus.name()
    }

    // -- Registration --

    /// Register a transaction family and give it an empty root store.
    /// Must happen before the first block is applied.
    pub fn register_family(&mut self, family: Arc<dyn TransactionFamily>) -> JournalResult<()> {
        self.state.global_stores.add_transaction_store(family.type_name())?;
        debug!(family = family.type_name(), "registered transaction family");
        self.state.families.register(family);
        Ok(())
    }

    pub fn add_observer(&mut self, observer: Box<dyn JournalObserver>) {
        self.observers.push(observer);
    }

    // -- Startup --

    /// Leave the initializing phase: restore or replay, then create the
    /// genesis block if this node is the genesis ledger and has no chain.
    pub fn initialization_complete(&mut self) -> JournalResult<()> {
        if !self.state.initializing {
            return Ok(());
        }
        self.state.initializing = false;
        self.state.initial_load = true;

        if self.state.config.restore {
            self.restore_chain()?;
        }

        let transactions = std::mem::take(&mut self.state.initial_transactions);
        let mut blocks = std::mem::take(&mut self.state.initial_blocks);
        info!(
            transactions = transactions.len(),
            blocks = blocks.len(),
            "replaying startup backlog"
        );
        for txn in transactions {
            self.add_pending_transaction(txn, false, false)?;
        }
        blocks.sort_by(|a, b| a.block_num.cmp(&b.block_num).then_with(|| a.id.cmp(&b.id)));
        blocks.dedup_by_key(|b| b.id);
        for block in blocks {
            self.commit_transaction_block(block)?;
        }

        self.consensus.initialization_complete(&mut self.state);

        if self.state.head.is_null() {
            if self.state.config.genesis_ledger {
                info!("no chain found, creating genesis block");
                for observer in self.observers.iter_mut() {
                    observer.on_genesis_block(&self.state);
                }
                self.build_transaction_block(true)?;
                self.claim_pending_block()?;
            } else {
                info!("no chain found, waiting for blocks from peers");
            }
        }

        self.state.initial_load = false;
        if self.state.pending_block.is_none() && !self.state.head.is_null() {
            self.build_transaction_block(false)?;
        }
        info!(head = %self.state.head.short(), "journal initialization complete");
        Ok(())
    }

    /// Pick up the chain left behind by a previous run.
    fn restore_chain(&mut self) -> JournalResult<()> {
        let persisted = self
            .state
            .db
            .chain
            .get(HEAD_KEY)?
            .and_then(|bytes| <[u8; 32]>::try_from(bytes.as_slice()).ok())
            .map(Identifier::from_bytes)
            .filter(|id| self.state.blocks.get(id).is_some_and(|b| b.is_valid()));
        let head = match persisted {
            Some(head) => head,
            None => {
                let root = self.state.compute_chain_root();
                warn!(head = %root.short(), "head pointer missing, recomputed from stored blocks");
                root
            }
        };
        self.state.head = head;

        let chain = self.state.committed_block_ids(0);
        self.state.stats.committed_block_count = chain.len() as u64;
        self.state.stats.committed_txn_count = chain
            .iter()
            .filter_map(|id| self.state.blocks.get(id))
            .map(|b| b.tx_count() as u64)
            .sum();
        self.state.stats.head = head;

        let mut pending: Vec<Identifier> = self
            .state
            .transactions
            .values()
            .filter(|txn| txn.status == TransactionStatus::Pending)
            .map(|txn| txn.id)
            .collect();
        pending.sort();
        for txn_id in &pending {
            self.state.pending_transactions.push_back(*txn_id);
        }

        let mut unfinished: Vec<(u64, Identifier)> = self
            .state
            .blocks
            .values()
            .filter(|b| !b.status.is_terminal())
            .map(|b| (b.block_num, b.id))
            .collect();
        unfinished.sort();
        for (_, block_id) in &unfinished {
            self.state.pending_block_ids.insert(*block_id);
        }
        info!(
            head = %head.short(),
            blocks = chain.len(),
            pending_txns = pending.len(),
            unfinished_blocks = unfinished.len(),
            "restored chain"
        );
        for (_, block_id) in unfinished {
            self.handle_block(block_id)?;
        }
        Ok(())
    }

    // -- Candidate --

    /// Ask consensus for a new candidate on top of the head.
    pub fn build_transaction_block(&mut self, genesis: bool) -> JournalResult<Option<Identifier>> {
        for observer in self.observers.iter_mut() {
            observer.on_pre_build_block(&self.state);
        }
        let Some(block) = self.consensus.build_block(&mut self.state, genesis)? else {
            return Ok(None);
        };
        for txn_id in &block.transaction_ids {
            self.state.transactions.update(txn_id, |txn| {
                if txn.in_block.is_none() {
                    txn.in_block = Some(Identifier::NULL);
                }
            })?;
        }
        for observer in self.observers.iter_mut() {
            observer.on_build_block(&self.state, &block);
        }

        // Whatever the candidate left behind starts a fresh wait.
        let remaining = self.state.pending_transactions.len() > block.tx_count();
        self.state.transaction_enqueue_time = remaining.then(Instant::now);

        let block_id = block.id;
        self.state.pending_block = Some(block);
        self.state.pending_block_built_at = Some(Instant::now());
        Ok(Some(block_id))
    }

    /// Claim the candidate, publish it, and admit it locally. Returns the
    /// claimed block's id.
    pub fn claim_pending_block(&mut self) -> JournalResult<Option<Identifier>> {
        let Some(mut block) = self.state.pending_block.take() else {
            return Ok(None);
        };
        self.state.pending_block_built_at = None;

        self.consensus.claim_block(&self.state, &mut block);
        for observer in self.observers.iter_mut() {
            observer.on_claim_block(&self.state, &block);
        }
        self.state.stats.blocks_claimed += 1;
        info!(
            block_id = %block.id.short(),
            block_num = block.block_num,
            txns = block.tx_count(),
            "claimed block"
        );

        let block_id = block.id;
        self.state.network.broadcast(JournalMessage::Block(block.clone()));
        self.commit_transaction_block(block)?;
        Ok(Some(block_id))
    }

    /// Whether the candidate has waited `block_wait_time` and consensus
    /// allows claiming it at `now_ms`.
    pub fn ready_to_claim(&self, now_ms: u64) -> bool {
        let Some(block) = &self.state.pending_block else {
            return false;
        };
        let waited = self
            .state
            .pending_block_built_at
            .is_some_and(|built| built.elapsed() >= self.state.config.block_wait_time);
        waited && self.consensus.check_claim_block(&self.state, block, now_ms)
    }

    /// One pacing step: build a candidate once pending transactions have
    /// waited `maximum_transactions_wait_time`, and claim it once allowed.
    ///
    /// Every build attempt ages the blocked transactions, so a failed
    /// attempt restarts the wait instead of retrying on the next poll.
    pub fn poll_candidate(&mut self, now_ms: u64) -> JournalResult<Option<Identifier>> {
        if self.state.initializing {
            return Ok(None);
        }
        if self.state.pending_block.is_none()
            && !self.state.head.is_null()
            && !self.state.pending_transactions.is_empty()
            && self.transaction_wait_expired()
        {
            debug!(
                pending = self.state.pending_transactions.len(),
                "transaction wait expired, building candidate"
            );
            if self.build_transaction_block(false)?.is_none() {
                self.state.transaction_enqueue_time = Some(Instant::now());
            }
        }
        if self.ready_to_claim(now_ms) {
            return self.claim_pending_block();
        }
        Ok(None)
    }

    /// Starts the wait clock if pending transactions have none yet.
    fn transaction_wait_expired(&mut self) -> bool {
        let wait = self.state.config.maximum_transactions_wait_time;
        match self.state.transaction_enqueue_time {
            Some(since) => since.elapsed() >= wait,
            None => {
                self.state.transaction_enqueue_time = Some(Instant::now());
                wait.is_zero()
            }
        }
    }

    // -- Submission --

    /// Admit a locally originated transaction and gossip it.
    pub fn submit_transaction(&mut self, txn: Transaction) -> JournalResult<()> {
        let known = self.state.transactions.contains(&txn.id);
        self.state.network.broadcast(JournalMessage::Transaction(txn.clone()));
        if known {
            return Ok(());
        }
        self.add_pending_transaction(txn, false, true)
    }

    pub fn submit_block(&mut self, block: TransactionBlock) -> JournalResult<()> {
        self.commit_transaction_block(block)
    }

    /// Network ingress. Records are verified before admission; requests
    /// are answered from the local stores.
    pub fn handle_message(&mut self, message: JournalMessage) -> JournalResult<()> {
        match message {
            JournalMessage::Transaction(txn) => {
                if let Err(e) = verify_transaction(&txn) {
                    warn!(txn_id = %txn.id.short(), error = %e, "dropping unverifiable transaction");
                    return Ok(());
                }
                self.add_pending_transaction(txn, false, true)
            }
            JournalMessage::Block(block) => self.commit_transaction_block(block),
            JournalMessage::BlockRequest { block_id } => {
                if let Some(block) = self.state.blocks.get(&block_id) {
                    debug!(block_id = %block_id.short(), "answering block request");
                    self.state.network.respond(JournalMessage::Block(block.clone()));
                }
                Ok(())
            }
            JournalMessage::TransactionRequest { transaction_id } => {
                if let Some(txn) = self.state.transactions.get(&transaction_id) {
                    debug!(txn_id = %transaction_id.short(), "answering transaction request");
                    self.state.network.respond(JournalMessage::Transaction(txn.clone()));
                }
                Ok(())
            }
        }
    }

    // -- Queries --

    pub fn chain_head_id(&self) -> Identifier {
        self.state.head
    }

    pub fn committed_block_ids(&self, count: usize) -> Vec<Identifier> {
        self.state.committed_block_ids(count)
    }

    /// Composed state of every family as of `block_id`. Evicted snapshots
    /// are rebuilt from their persisted deltas.
    pub fn get_state_snapshot(&mut self, block_id: &Identifier) -> JournalResult<Option<StateSnapshot>> {
        Ok(self
            .state
            .global_stores
            .get_block_store(block_id)?
            .map(|store| store.snapshot()))
    }

    pub fn transaction(&self, txn_id: &Identifier) -> Option<&Transaction> {
        self.state.transaction(txn_id)
    }

    pub fn block(&self, block_id: &Identifier) -> Option<&TransactionBlock> {
        self.state.block(block_id)
    }

    pub fn pending_transaction_ids(&self) -> Vec<Identifier> {
        self.state.pending_transaction_ids()
    }

    pub fn stats(&self) -> JournalStats {
        self.state.stats()
    }

    /// Flush every persistent tree.
    pub fn flush(&self) -> JournalResult<()> {
        self.state.db.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal")
            .field("consensus", &self.consensus.name())
            .field("observers", &self.observers.len())
            .field("state", &self.state)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::consensus::DevModeConsensus;
    use crate::network::NullNetwork;
    use crate::storage::block::BlockStatus;
    use crate::transaction::{
        integer_key_transaction, sign_transaction, IntegerKeyFamily, Update, INTEGER_KEY_FAMILY,
    };

    fn keypair() -> StrataKeypair {
        StrataKeypair::from_seed(&[9u8; 32])
    }

    fn config(genesis: bool) -> JournalConfig {
        JournalConfig {
            genesis_ledger: genesis,
            ..Default::default()
        }
    }

    fn journal_with(config: JournalConfig, db: JournalDb) -> Journal {
        let mut journal = Journal::new(
            config,
            db,
            Box::new(DevModeConsensus),
            Arc::new(NullNetwork),
            keypair(),
        )
        .unwrap();
        journal.register_family(Arc::new(IntegerKeyFamily)).unwrap();
        journal
    }

    /// A genesis journal with its chain started.
    fn genesis_journal() -> Journal {
        let mut journal = journal_with(config(true), JournalDb::in_memory());
        journal.initialization_complete().unwrap();
        journal
    }

    fn signed(nonce: u64, updates: Vec<Update>) -> Transaction {
        let mut txn = integer_key_transaction(nonce, updates).build();
        sign_transaction(&mut txn, &keypair());
        txn
    }

    fn head_value(journal: &mut Journal, key: &str) -> Option<serde_json::Value> {
        let head = journal.chain_head_id();
        journal
            .get_state_snapshot(&head)
            .unwrap()
            .and_then(|snapshot| snapshot.get(INTEGER_KEY_FAMILY).and_then(|m| m.get(key).cloned()))
    }

    // -- Startup --

    #[test]
    fn genesis_ledger_creates_first_block() {
        let journal = genesis_journal();
        let head = journal.chain_head_id();
        assert!(!head.is_null());
        let genesis = journal.block(&head).unwrap();
        assert_eq!(genesis.block_num, 0);
        assert_eq!(genesis.status, BlockStatus::Valid);
        assert_eq!(journal.stats().blocks_claimed, 1);
    }

    #[test]
    fn non_genesis_ledger_waits_for_peers() {
        let mut journal = journal_with(config(false), JournalDb::in_memory());
        journal.initialization_complete().unwrap();
        assert!(journal.chain_head_id().is_null());
    }

    #[test]
    fn transactions_are_buffered_until_initialized() {
        let mut journal = journal_with(config(true), JournalDb::in_memory());
        assert!(journal.state().is_initializing());
        let txn = signed(1, vec![Update::set("a", 1)]);
        journal.submit_transaction(txn.clone()).unwrap();
        assert!(journal.transaction(&txn.id).is_none());

        journal.initialization_complete().unwrap();
        assert!(!journal.state().is_initializing());
        assert!(journal.transaction(&txn.id).is_some());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = JournalConfig {
            maximum_blocks_to_keep: 0,
            ..Default::default()
        };
        let result = Journal::new(
            bad,
            JournalDb::in_memory(),
            Box::new(DevModeConsensus),
            Arc::new(NullNetwork),
            keypair(),
        );
        assert!(matches!(result, Err(JournalError::Config(_))));
    }

    // -- Commit --

    #[test]
    fn submitted_transaction_commits_on_claim() {
        let mut journal = genesis_journal();
        let txn = signed(1, vec![Update::set("a", 5)]);
        journal.submit_transaction(txn.clone()).unwrap();
        assert_eq!(journal.pending_transaction_ids(), vec![txn.id]);

        let claimed = journal.claim_pending_block().unwrap().unwrap();
        assert_eq!(journal.chain_head_id(), claimed);
        let stored = journal.transaction(&txn.id).unwrap();
        assert_eq!(stored.status, TransactionStatus::Committed);
        assert_eq!(stored.in_block, Some(claimed));
        assert!(journal.pending_transaction_ids().is_empty());
        assert_eq!(head_value(&mut journal, "a"), Some(json!(5)));
    }

    #[test]
    fn duplicate_transaction_is_ignored() {
        let mut journal = genesis_journal();
        let txn = signed(1, vec![Update::set("a", 5)]);
        journal.submit_transaction(txn.clone()).unwrap();
        journal.submit_transaction(txn.clone()).unwrap();
        assert_eq!(journal.pending_transaction_ids().len(), 1);
    }

    #[test]
    fn duplicate_block_is_ignored() {
        let mut journal = genesis_journal();
        journal.submit_transaction(signed(1, vec![Update::set("a", 5)])).unwrap();
        let claimed = journal.claim_pending_block().unwrap().unwrap();
        let block = journal.block(&claimed).cloned().unwrap();
        let before = journal.stats();
        journal.submit_block(block).unwrap();
        assert_eq!(journal.stats(), before);
    }

    #[test]
    fn unsigned_block_is_dropped() {
        let mut journal = genesis_journal();
        let block = TransactionBlock::new(journal.chain_head_id(), 1, vec![]);
        journal.submit_block(block.clone()).unwrap();
        assert!(journal.block(&block.id).is_none());
    }

    #[test]
    fn invalid_transaction_is_dropped_from_candidate() {
        let mut journal = genesis_journal();
        let bad = signed(1, vec![Update::inc("missing", 1)]);
        journal.submit_transaction(bad.clone()).unwrap();
        assert!(journal.state().pending_block().is_none());
        assert!(journal.transaction(&bad.id).is_none());
        assert_eq!(journal.stats().invalid_txn_count, 1);
    }

    #[test]
    fn block_with_wrong_height_is_invalid() {
        let mut journal = genesis_journal();
        let genesis = journal.chain_head_id();

        let mut skipped = TransactionBlock::new(genesis, 1_000_000, vec![]);
        skipped.sign_block(&keypair());
        journal.submit_block(skipped.clone()).unwrap();
        assert_eq!(journal.block(&skipped.id).unwrap().status, BlockStatus::Invalid);

        let mut rootless = TransactionBlock::new(Identifier::NULL, 3, vec![]);
        rootless.sign_block(&keypair());
        journal.submit_block(rootless.clone()).unwrap();
        assert_eq!(journal.block(&rootless.id).unwrap().status, BlockStatus::Invalid);

        assert_eq!(journal.chain_head_id(), genesis);
        assert_eq!(journal.state().invalid_block_ids.len(), 2);
    }

    #[test]
    fn block_with_invalid_transaction_is_invalid() {
        let mut journal = genesis_journal();
        let bad = signed(1, vec![Update::dec("a", 1)]);
        // Store it without letting it into a candidate.
        journal.state.transactions.put(bad.clone()).unwrap();

        let mut block = TransactionBlock::new(journal.chain_head_id(), 1, vec![bad.id]);
        block.sign_block(&keypair());
        journal.submit_block(block.clone()).unwrap();
        assert_eq!(journal.block(&block.id).unwrap().status, BlockStatus::Invalid);
        assert!(journal.state().invalid_block_ids.contains(&block.id));
    }

    #[test]
    fn negative_dec_at_the_limit_is_rejected_everywhere() {
        let mut journal = genesis_journal();
        journal.submit_transaction(signed(1, vec![Update::set("a", i64::MAX)])).unwrap();
        journal.claim_pending_block().unwrap().unwrap();

        let bad = signed(2, vec![Update::dec("a", -1)]);
        journal.submit_transaction(bad.clone()).unwrap();
        assert!(journal.state().pending_block().is_none());
        assert!(journal.transaction(&bad.id).is_none());

        journal.state.transactions.put(bad.clone()).unwrap();
        let mut block = TransactionBlock::new(journal.chain_head_id(), 2, vec![bad.id]);
        block.sign_block(&keypair());
        journal.submit_block(block.clone()).unwrap();
        assert_eq!(journal.block(&block.id).unwrap().status, BlockStatus::Invalid);
        assert_eq!(head_value(&mut journal, "a"), Some(json!(i64::MAX)));
    }

    #[test]
    fn children_of_invalid_block_are_invalid() {
        let mut journal = genesis_journal();
        let bad = signed(1, vec![Update::dec("a", 1)]);
        journal.state.transactions.put(bad.clone()).unwrap();

        let mut parent = TransactionBlock::new(journal.chain_head_id(), 1, vec![bad.id]);
        parent.sign_block(&keypair());
        let mut child = TransactionBlock::new(parent.id, 2, vec![]);
        child.sign_block(&keypair());

        journal.submit_block(child.clone()).unwrap();
        assert_eq!(journal.block(&child.id).unwrap().status, BlockStatus::Incomplete);
        journal.submit_block(parent).unwrap();
        assert_eq!(journal.block(&child.id).unwrap().status, BlockStatus::Invalid);
    }

    // -- Fork handling --

    #[test]
    fn decommit_returns_transactions_to_front_of_pending() {
        let mut journal = genesis_journal();
        let first = signed(1, vec![Update::set("a", 1)]);
        journal.submit_transaction(first.clone()).unwrap();
        let committed = journal.claim_pending_block().unwrap().unwrap();

        let later = signed(2, vec![Update::set("b", 1)]);
        journal.submit_transaction(later.clone()).unwrap();

        let block = journal.block(&committed).cloned().unwrap();
        journal.decommit_block(&block).unwrap();

        assert_eq!(journal.pending_transaction_ids(), vec![first.id, later.id]);
        assert_eq!(
            journal.transaction(&first.id).unwrap().status,
            TransactionStatus::Pending
        );
        assert_eq!(journal.chain_head_id(), block.previous_block_id);
    }

    #[test]
    fn comparing_invalid_block_is_an_error() {
        let journal = genesis_journal();
        let head = journal.block(&journal.chain_head_id()).cloned().unwrap();
        let other = TransactionBlock::new(Identifier::NULL, 0, vec![]);
        assert!(matches!(
            journal.compare_valid(&other, &head),
            Err(JournalError::InvalidComparison { .. })
        ));
    }

    // -- Observers --

    #[derive(Default)]
    struct Recorder {
        events: Arc<Mutex<Vec<&'static str>>>,
        reject: bool,
    }

    impl JournalObserver for Recorder {
        fn on_genesis_block(&mut self, _state: &JournalState) {
            self.events.lock().unwrap().push("genesis");
        }

        fn on_claim_block(&mut self, _state: &JournalState, _block: &TransactionBlock) {
            self.events.lock().unwrap().push("claim");
        }

        fn on_commit_block(&mut self, _state: &JournalState, _block: &TransactionBlock) {
            self.events.lock().unwrap().push("commit");
        }

        fn on_block_test(&mut self, _state: &JournalState, block: &TransactionBlock) -> bool {
            !(self.reject && block.block_num > 0)
        }
    }

    #[test]
    fn observers_see_genesis_claim_and_commit() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut journal = journal_with(config(true), JournalDb::in_memory());
        journal.add_observer(Box::new(Recorder {
            events: Arc::clone(&events),
            reject: false,
        }));
        journal.initialization_complete().unwrap();
        assert_eq!(*events.lock().unwrap(), vec!["genesis", "claim", "commit"]);
    }

    #[test]
    fn observer_can_reject_blocks() {
        let mut journal = journal_with(config(true), JournalDb::in_memory());
        journal.add_observer(Box::new(Recorder {
            reject: true,
            ..Default::default()
        }));
        journal.initialization_complete().unwrap();
        let genesis = journal.chain_head_id();

        journal.submit_transaction(signed(1, vec![Update::set("a", 1)])).unwrap();
        let claimed = journal.claim_pending_block().unwrap().unwrap();
        assert_eq!(journal.block(&claimed).unwrap().status, BlockStatus::Invalid);
        assert_eq!(journal.chain_head_id(), genesis);
    }

    // -- Network ingress --

    #[test]
    fn unsigned_transaction_message_is_dropped() {
        let mut journal = genesis_journal();
        let txn = integer_key_transaction(1, vec![Update::set("a", 1)]).build();
        journal.handle_message(JournalMessage::Transaction(txn.clone())).unwrap();
        assert!(journal.transaction(&txn.id).is_none());
    }

    fn dependent_on_absent(nonce: u64) -> (Transaction, Transaction) {
        let absent = signed(nonce + 100, vec![Update::set("a", 1)]);
        let mut dependent = integer_key_transaction(nonce, vec![Update::inc("a", 1)])
            .depends_on(absent.id)
            .build();
        sign_transaction(&mut dependent, &keypair());
        (absent, dependent)
    }

    #[test]
    fn polling_does_not_age_blocked_transactions_before_the_wait() {
        let mut journal = genesis_journal();
        let (absent, dependent) = dependent_on_absent(1);
        journal.submit_transaction(dependent.clone()).unwrap();
        assert_eq!(journal.transaction(&dependent.id).unwrap().age, 1);

        for _ in 0..10 {
            assert_eq!(journal.poll_candidate(crate::config::unix_millis()).unwrap(), None);
        }
        assert_eq!(journal.transaction(&dependent.id).unwrap().age, 1);
        assert_eq!(journal.pending_transaction_ids(), vec![dependent.id]);

        journal.submit_transaction(absent.clone()).unwrap();
        let candidate = journal.state().pending_block().cloned().unwrap();
        assert_eq!(candidate.transaction_ids, vec![absent.id, dependent.id]);
    }

    #[test]
    fn polling_after_the_wait_ages_blocked_transactions_out() {
        let mut journal = journal_with(
            JournalConfig {
                maximum_transactions_wait_time: std::time::Duration::ZERO,
                ..config(true)
            },
            JournalDb::in_memory(),
        );
        journal.initialization_complete().unwrap();
        let (_, dependent) = dependent_on_absent(1);
        journal.submit_transaction(dependent.clone()).unwrap();

        for _ in 0..3 {
            journal.poll_candidate(crate::config::unix_millis()).unwrap();
        }
        assert!(journal.transaction(&dependent.id).is_none());
        assert!(journal.pending_transaction_ids().is_empty());
        assert_eq!(journal.stats().invalid_txn_count, 1);
    }

    #[test]
    fn dependencies_count_toward_the_block_limit() {
        let mut journal = journal_with(
            JournalConfig {
                maximum_transactions_per_block: 2,
                ..config(true)
            },
            JournalDb::in_memory(),
        );
        let first = signed(1, vec![Update::set("a", 1)]);
        let second = signed(2, vec![Update::set("b", 1)]);
        let mut dependent = integer_key_transaction(3, vec![Update::inc("a", 1)])
            .depends_on(first.id)
            .depends_on(second.id)
            .build();
        sign_transaction(&mut dependent, &keypair());

        for txn in [dependent.clone(), first.clone(), second.clone()] {
            journal.submit_transaction(txn).unwrap();
        }
        journal.initialization_complete().unwrap();

        let genesis = journal.block(&journal.chain_head_id()).cloned().unwrap();
        assert_eq!(genesis.transaction_ids, vec![first.id, second.id]);
        assert_eq!(journal.transaction(&dependent.id).unwrap().age, 0);

        let candidate = journal.state().pending_block().cloned().unwrap();
        assert_eq!(candidate.transaction_ids, vec![dependent.id]);
    }

    #[test]
    fn poll_candidate_claims_with_zero_wait() {
        let mut journal = genesis_journal();
        journal.submit_transaction(signed(1, vec![Update::set("a", 1)])).unwrap();
        let claimed = journal.poll_candidate(crate::config::unix_millis()).unwrap();
        assert_eq!(claimed, Some(journal.chain_head_id()));
    }
}
