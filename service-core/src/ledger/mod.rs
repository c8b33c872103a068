//! On-chain ledger access.
//!
//! Two external contracts are consumed through narrow traits:
//! - [`CreditLedger`]: the usage-credit contract (`balanceOf`, `markUsage`, `purchase`)
//! - [`KnowledgeBoard`]: the knowledge-sharing contract
//!
//! Contract-backed implementations live in [`contracts`]; in-memory doubles for
//! tests and local runs live in [`memory`].

pub mod contracts;
pub mod memory;

use crate::identity::Identity;
use async_trait::async_trait;
use ethers::types::{TxHash, U256};
use thiserror::Error;

pub use contracts::{ContractKnowledgeBoard, ContractLedger, LedgerClientConfig, SignerClient};
pub use memory::{InMemoryKnowledgeBoard, InMemoryLedger};

/// Price of one usage credit in wei.
pub const ACCESS_COST_WEI: u128 = 2_180_330_000_000_000;

/// Error type for ledger operations.
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    #[error("Ledger not configured: {0}")]
    NotConfigured(String),

    #[error("Ledger call failed: {0}")]
    CallFailed(String),

    #[error("Transaction submission failed: {0}")]
    SubmissionFailed(String),

    #[error("Transaction {0:?} reverted")]
    Reverted(TxHash),

    #[error("Transaction dropped before confirmation")]
    Dropped,
}

/// A confirmed ledger-mutating transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: TxHash,
}

/// One entry on the knowledge board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeEntry {
    pub author: Identity,
    pub text: String,
}

/// Usage-credit contract.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Remaining credits for `identity`.
    async fn balance_of(&self, identity: &Identity) -> Result<u64, LedgerError>;

    /// Record one unit of usage and wait for the transaction to confirm.
    async fn mark_usage(&self, identity: &Identity) -> Result<Confirmation, LedgerError>;

    /// Buy credits for the signing account, paying `value_wei`.
    async fn purchase(&self, value_wei: U256) -> Result<Confirmation, LedgerError>;
}

/// Knowledge-sharing contract.
#[async_trait]
pub trait KnowledgeBoard: Send + Sync {
    async fn is_reward_in_progress(&self) -> Result<bool, LedgerError>;

    async fn submitted_knowledge(&self) -> Result<Vec<KnowledgeEntry>, LedgerError>;

    async fn share(&self, text: &str) -> Result<Confirmation, LedgerError>;

    async fn vote(&self, index: u64) -> Result<Confirmation, LedgerError>;

    async fn current_vote(&self) -> Result<u64, LedgerError>;
}

/// Narrow a 256-bit contract value to a credit count, saturating.
pub fn credits_from_u256(value: U256) -> u64 {
    if value > U256::from(u64::MAX) {
        u64::MAX
    } else {
        value.as_u64()
    }
}

/// Price in wei for `credits` usage credits.
pub fn purchase_price(credits: u64) -> U256 {
    U256::from(ACCESS_COST_WEI).saturating_mul(U256::from(credits))
}
