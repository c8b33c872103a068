//! In-memory ledger doubles.
//!
//! Mirror the observable contract behavior closely enough for tests and local
//! runs: balances decrement on usage, purchases credit the signer, and the
//! knowledge board opens a reward round once three entries are shared.

use super::{
    ACCESS_COST_WEI, Confirmation, CreditLedger, KnowledgeBoard, KnowledgeEntry, LedgerError,
    credits_from_u256,
};
use crate::identity::Identity;
use async_trait::async_trait;
use dashmap::DashMap;
use ethers::types::{TxHash, U256};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Entries needed before the knowledge board starts a reward round.
pub const KNOWLEDGE_PUSH_LIMIT: usize = 3;

fn next_tx_hash(counter: &AtomicU64) -> TxHash {
    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
    TxHash::from_low_u64_be(n)
}

/// In-memory usage-credit ledger.
#[derive(Default)]
pub struct InMemoryLedger {
    balances: DashMap<Identity, u64>,
    signer: Option<Identity>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    balance_reads: AtomicUsize,
    usage_writes: AtomicUsize,
    tx_counter: AtomicU64,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `signer` as the paying account for [`CreditLedger::purchase`].
    pub fn with_signer(mut self, signer: Identity) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn set_balance(&self, identity: Identity, credits: u64) {
        self.balances.insert(identity, credits);
    }

    /// Current balance without counting as a ledger read.
    pub fn peek_balance(&self, identity: &Identity) -> u64 {
        self.balances.get(identity).map(|b| *b).unwrap_or(0)
    }

    /// Make subsequent balance reads fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent usage writes and purchases fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn balance_reads(&self) -> usize {
        self.balance_reads.load(Ordering::SeqCst)
    }

    /// Number of usage writes attempted, successful or not.
    pub fn usage_writes(&self) -> usize {
        self.usage_writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CreditLedger for InMemoryLedger {
    async fn balance_of(&self, identity: &Identity) -> Result<u64, LedgerError> {
        self.balance_reads.fetch_add(1, Ordering::SeqCst);

        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::CallFailed("RPC endpoint unreachable".to_string()));
        }

        Ok(self.peek_balance(identity))
    }

    async fn mark_usage(&self, identity: &Identity) -> Result<Confirmation, LedgerError> {
        self.usage_writes.fetch_add(1, Ordering::SeqCst);

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::SubmissionFailed(
                "nonce too low".to_string(),
            ));
        }

        let tx_hash = next_tx_hash(&self.tx_counter);
        let mut balance = self.balances.entry(*identity).or_insert(0);
        match balance.checked_sub(1) {
            Some(remaining) => {
                *balance = remaining;
                Ok(Confirmation { tx_hash })
            }
            None => Err(LedgerError::Reverted(tx_hash)),
        }
    }

    async fn purchase(&self, value_wei: U256) -> Result<Confirmation, LedgerError> {
        let signer = self
            .signer
            .ok_or_else(|| LedgerError::NotConfigured("no signing account".to_string()))?;

        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(LedgerError::SubmissionFailed(
                "insufficient funds for gas".to_string(),
            ));
        }

        let credits = credits_from_u256(value_wei / U256::from(ACCESS_COST_WEI));
        let mut balance = self.balances.entry(signer).or_insert(0);
        *balance = balance.saturating_add(credits);

        Ok(Confirmation {
            tx_hash: next_tx_hash(&self.tx_counter),
        })
    }
}

#[derive(Default)]
struct BoardState {
    entries: Vec<KnowledgeEntry>,
    reward_in_progress: bool,
    votes: Vec<(Identity, u64)>,
}

/// In-memory knowledge board.
pub struct InMemoryKnowledgeBoard {
    signer: Identity,
    state: Mutex<BoardState>,
    tx_counter: AtomicU64,
}

impl InMemoryKnowledgeBoard {
    /// A board whose writes are attributed to `signer`.
    pub fn new(signer: Identity) -> Self {
        Self {
            signer,
            state: Mutex::new(BoardState::default()),
            tx_counter: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BoardState>, LedgerError> {
        self.state
            .lock()
            .map_err(|_| LedgerError::CallFailed("board state poisoned".to_string()))
    }
}

#[async_trait]
impl KnowledgeBoard for InMemoryKnowledgeBoard {
    async fn is_reward_in_progress(&self) -> Result<bool, LedgerError> {
        Ok(self.lock()?.reward_in_progress)
    }

    async fn submitted_knowledge(&self) -> Result<Vec<KnowledgeEntry>, LedgerError> {
        Ok(self.lock()?.entries.clone())
    }

    async fn share(&self, text: &str) -> Result<Confirmation, LedgerError> {
        let mut state = self.lock()?;

        // the contract accepts the call but ignores shares during a reward round
        if !state.reward_in_progress {
            state.entries.push(KnowledgeEntry {
                author: self.signer,
                text: text.to_string(),
            });
            if state.entries.len() >= KNOWLEDGE_PUSH_LIMIT {
                state.reward_in_progress = true;
            }
        }

        Ok(Confirmation {
            tx_hash: next_tx_hash(&self.tx_counter),
        })
    }

    async fn vote(&self, index: u64) -> Result<Confirmation, LedgerError> {
        let mut state = self.lock()?;
        let signer = self.signer;
        state.votes.retain(|(voter, _)| *voter != signer);
        state.votes.push((signer, index));

        Ok(Confirmation {
            tx_hash: next_tx_hash(&self.tx_counter),
        })
    }

    async fn current_vote(&self) -> Result<u64, LedgerError> {
        let state = self.lock()?;
        Ok(state
            .votes
            .iter()
            .find(|(voter, _)| *voter == self.signer)
            .map(|(_, index)| *index)
            .unwrap_or(0))
    }
}
