//! # Journal Service
//!
//! Runs a [`Journal`] inside a single tokio task. Every operation is a
//! command on an mpsc channel carrying a oneshot reply, so the journal is
//! never shared and never locked.
//!
//! ```text
//!   JournalHandle (clone) ──cmd──►┐
//!   JournalHandle (clone) ──cmd──►├─► JournalService task ──► Journal
//!   retry interval ──────────────►│      (select! loop)
//!   claim interval ──────────────►│
//!   shutdown (watch) ────────────►┘
//! ```
//!
//! ## Timers
//!
//! - Every `block_retry_interval` each block parked in `retry` is
//!   re-driven.
//! - Every [`CLAIM_POLL_INTERVAL`] the candidate is claimed once
//!   `block_wait_time` has passed and consensus agrees. With no candidate
//!   in flight, one is rebuilt only after pending transactions have waited
//!   `maximum_transactions_wait_time`.
//!
//! ## Shutdown
//!
//! Sending `true` on the watch channel (or dropping its sender) stops the
//! loop after the current command. The task flushes the database and hands
//! the journal back through its `JoinHandle`.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{Journal, JournalError, JournalResult, JournalStats};
use crate::config::unix_millis;
use crate::identifier::Identifier;
use crate::network::JournalMessage;
use crate::storage::block::TransactionBlock;
use crate::storage::global_store::StateSnapshot;
use crate::transaction::Transaction;

/// How often the service checks whether the candidate can be claimed.
pub const CLAIM_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Capacity of the command channel.
const COMMAND_BUFFER: usize = 1024;

type Reply<T> = oneshot::Sender<T>;

enum Command {
    InitializationComplete(Reply<JournalResult<()>>),
    SubmitTransaction(Transaction, Reply<JournalResult<()>>),
    SubmitBlock(TransactionBlock, Reply<JournalResult<()>>),
    HandleMessage(JournalMessage, Reply<JournalResult<()>>),
    ClaimPendingBlock(Reply<JournalResult<Option<Identifier>>>),
    ChainHeadId(Reply<Identifier>),
    CommittedBlockIds(usize, Reply<Vec<Identifier>>),
    StateSnapshot(Identifier, Reply<JournalResult<Option<StateSnapshot>>>),
    Transaction(Identifier, Reply<Option<Transaction>>),
    Block(Identifier, Reply<Option<TransactionBlock>>),
    PendingTransactionIds(Reply<Vec<Identifier>>),
    Stats(Reply<JournalStats>),
}

// ---------------------------------------------------------------------------
// JournalService
// ---------------------------------------------------------------------------

pub struct JournalService {
    journal: Journal,
    commands: mpsc::Receiver<Command>,
    shutdown: watch::Receiver<bool>,
}

impl JournalService {
    /// Move `journal` into a new task. The returned handle is the only way
    /// to reach it; the join handle yields the journal back after shutdown.
    pub fn spawn(journal: Journal, shutdown: watch::Receiver<bool>) -> (JournalHandle, JoinHandle<Journal>) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        let service = Self {
            journal,
            commands: rx,
            shutdown,
        };
        let task = tokio::spawn(service.run());
        (JournalHandle { commands: tx }, task)
    }

    async fn run(mut self) -> Journal {
        let retry_every = self.journal.state().config().block_retry_interval;
        let mut retry = tokio::time::interval(retry_every);
        let mut claim = tokio::time::interval(CLAIM_POLL_INTERVAL);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        claim.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            consensus = self.journal.consensus_name(),
            retry_ms = retry_every.as_millis() as u64,
            "journal service starting"
        );

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.dispatch(command),
                    None => {
                        debug!("all journal handles dropped");
                        break;
                    }
                },
                _ = retry.tick() => {
                    if let Err(e) = self.journal.retry_blocks() {
                        warn!(error = %e, "block retry failed");
                    }
                }
                _ = claim.tick() => {
                    match self.journal.poll_candidate(unix_millis()) {
                        Ok(Some(block_id)) => debug!(block_id = %block_id.short(), "claimed candidate"),
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "candidate claim failed"),
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = self.journal.flush() {
            warn!(error = %e, "flush on shutdown failed");
        }
        info!(head = %self.journal.chain_head_id().short(), "journal service stopped");
        self.journal
    }

    fn dispatch(&mut self, command: Command) {
        let journal = &mut self.journal;
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            Command::InitializationComplete(reply) => {
                let _ = reply.send(journal.initialization_complete());
            }
            Command::SubmitTransaction(txn, reply) => {
                let _ = reply.send(journal.submit_transaction(txn));
            }
            Command::SubmitBlock(block, reply) => {
                let _ = reply.send(journal.submit_block(block));
            }
            Command::HandleMessage(message, reply) => {
                let _ = reply.send(journal.handle_message(message));
            }
            Command::ClaimPendingBlock(reply) => {
                let _ = reply.send(journal.claim_pending_block());
            }
            Command::ChainHeadId(reply) => {
                let _ = reply.send(journal.chain_head_id());
            }
            Command::CommittedBlockIds(count, reply) => {
                let _ = reply.send(journal.committed_block_ids(count));
            }
            Command::StateSnapshot(block_id, reply) => {
                let _ = reply.send(journal.get_state_snapshot(&block_id));
            }
            Command::Transaction(txn_id, reply) => {
                let _ = reply.send(journal.transaction(&txn_id).cloned());
            }
            Command::Block(block_id, reply) => {
                let _ = reply.send(journal.block(&block_id).cloned());
            }
            Command::PendingTransactionIds(reply) => {
                let _ = reply.send(journal.pending_transaction_ids());
            }
            Command::Stats(reply) => {
                let _ = reply.send(journal.stats());
            }
        }
    }
}

// ---------------------------------------------------------------------------
// JournalHandle
// ---------------------------------------------------------------------------

/// Cheap, clonable async front end of a running [`JournalService`].
///
/// Every call fails with [`JournalError::ServiceClosed`] once the service
/// task has stopped.
#[derive(Clone, Debug)]
pub struct JournalHandle {
    commands: mpsc::Sender<Command>,
}

impl JournalHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> JournalResult<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .await
            .map_err(|_| JournalError::ServiceClosed)?;
        rx.await.map_err(|_| JournalError::ServiceClosed)
    }

    pub async fn initialization_complete(&self) -> JournalResult<()> {
        self.request(Command::InitializationComplete).await?
    }

    pub async fn submit_transaction(&self, txn: Transaction) -> JournalResult<()> {
        self.request(|reply| Command::SubmitTransaction(txn, reply)).await?
    }

    pub async fn submit_block(&self, block: TransactionBlock) -> JournalResult<()> {
        self.request(|reply| Command::SubmitBlock(block, reply)).await?
    }

    pub async fn handle_message(&self, message: JournalMessage) -> JournalResult<()> {
        self.request(|reply| Command::HandleMessage(message, reply)).await?
    }

    pub async fn claim_pending_block(&self) -> JournalResult<Option<Identifier>> {
        self.request(Command::ClaimPendingBlock).await?
    }

    pub async fn chain_head_id(&self) -> JournalResult<Identifier> {
        self.request(Command::ChainHeadId).await
    }

    pub async fn committed_block_ids(&self, count: usize) -> JournalResult<Vec<Identifier>> {
        self.request(|reply| Command::CommittedBlockIds(count, reply)).await
    }

    pub async fn get_state_snapshot(&self, block_id: Identifier) -> JournalResult<Option<StateSnapshot>> {
        self.request(|reply| Command::StateSnapshot(block_id, reply)).await?
    }

    pub async fn transaction(&self, txn_id: Identifier) -> JournalResult<Option<Transaction>> {
        self.request(|reply| Command::Transaction(txn_id, reply)).await
    }

    pub async fn block(&self, block_id: Identifier) -> JournalResult<Option<TransactionBlock>> {
        self.request(|reply| Command::Block(block_id, reply)).await
    }

    pub async fn pending_transaction_ids(&self) -> JournalResult<Vec<Identifier>> {
        self.request(Command::PendingTransactionIds).await
    }

    pub async fn stats(&self) -> JournalResult<JournalStats> {
        self.request(Command::Stats).await
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::InitializationComplete(_) => "InitializationComplete",
            Self::SubmitTransaction(..) => "SubmitTransaction",
            Self::SubmitBlock(..) => "SubmitBlock",
            Self::HandleMessage(..) => "HandleMessage",
            Self::ClaimPendingBlock(_) => "ClaimPendingBlock",
            Self::ChainHeadId(_) => "ChainHeadId",
            Self::CommittedBlockIds(..) => "CommittedBlockIds",
            Self::StateSnapshot(..) => "StateSnapshot",
            Self::Transaction(..) => "Transaction",
            Self::Block(..) => "Block",
            Self::PendingTransactionIds(_) => "PendingTransactionIds",
            Self::Stats(_) => "Stats",
        };
        f.write_str(name)
    }
}
