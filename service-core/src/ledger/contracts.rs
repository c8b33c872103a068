//! Contract-backed ledger clients built on ethers-rs.
//!
//! Reads go through `eth_call`; writes are signed locally with the configured
//! key, submitted over JSON-RPC and awaited until confirmed.

use super::{
    Confirmation, CreditLedger, KnowledgeBoard, KnowledgeEntry, LedgerError, credits_from_u256,
};
use crate::identity::Identity;
use async_trait::async_trait;
use ethers::abi::Detokenize;
use ethers::contract::ContractCall;
use ethers::prelude::*;
use std::sync::Arc;
use std::time::Duration;

mod bindings {
    use ethers::prelude::abigen;

    abigen!(
        CreditContract,
        r#"[
            function purchase() external payable returns (uint256)
            function balanceOf(address _address) external view returns (uint256)
            function markUsage(address _address) external returns (uint256)
        ]"#
    );

    abigen!(
        KnowledgeContract,
        r#"[
            function setOwner() external returns (bool)
            function isRewardInProgress() external view returns (bool)
            function share(string knowledge) external
            function getSubmittedKnowledge() external view returns (address[], string[])
            function getVote() external view returns (uint256)
            function vote(uint256 index) external
        ]"#
    );
}

pub use bindings::{CreditContract, KnowledgeContract};

/// JSON-RPC provider with a local signing wallet.
pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Connection settings shared by both contract clients.
#[derive(Debug, Clone)]
pub struct LedgerClientConfig {
    /// JSON-RPC endpoint of the chain.
    pub rpc_url: String,
    /// Chain id for transaction signing; fetched from the node when unset.
    pub chain_id: Option<u64>,
    /// Confirmations to wait for on every write.
    pub confirmations: usize,
    /// Polling interval while waiting for receipts.
    pub poll_interval: Duration,
}

impl Default for LedgerClientConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8547".to_string(),
            chain_id: None,
            confirmations: 1,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Build a signing client for `private_key` against `config.rpc_url`.
pub async fn signer_client(
    config: &LedgerClientConfig,
    private_key: &str,
) -> Result<Arc<SignerClient>, LedgerError> {
    let provider = Provider::<Http>::try_from(config.rpc_url.as_str())
        .map_err(|e| LedgerError::NotConfigured(format!("invalid RPC URL: {}", e)))?
        .interval(config.poll_interval);

    let chain_id = match config.chain_id {
        Some(id) => id,
        None => provider
            .get_chainid()
            .await
            .map_err(|e| LedgerError::CallFailed(format!("failed to get chain id: {}", e)))?
            .as_u64(),
    };

    let wallet = private_key
        .parse::<LocalWallet>()
        .map_err(|e| LedgerError::NotConfigured(format!("invalid signing key: {}", e)))?
        .with_chain_id(chain_id);

    tracing::info!(
        chain_id,
        signer = %Identity::from(wallet.address()),
        "Ledger signer initialized"
    );

    Ok(Arc::new(SignerMiddleware::new(provider, wallet)))
}

/// Submit a contract write and wait for its receipt.
async fn send_and_confirm<M, D>(
    call: ContractCall<M, D>,
    confirmations: usize,
) -> Result<Confirmation, LedgerError>
where
    M: Middleware + 'static,
    D: Detokenize,
{
    let pending = call
        .send()
        .await
        .map_err(|e| LedgerError::SubmissionFailed(e.to_string()))?;
    let tx_hash = pending.tx_hash();

    tracing::debug!(tx_hash = ?tx_hash, "Transaction submitted, awaiting confirmation");

    let receipt = pending
        .confirmations(confirmations)
        .await
        .map_err(|e| LedgerError::SubmissionFailed(e.to_string()))?;

    match receipt {
        Some(receipt) if receipt.status == Some(U64::from(1)) => Ok(Confirmation { tx_hash }),
        Some(_) => Err(LedgerError::Reverted(tx_hash)),
        None => Err(LedgerError::Dropped),
    }
}

/// Usage-credit contract client.
pub struct ContractLedger<M: Middleware + 'static> {
    contract: CreditContract<M>,
    confirmations: usize,
}

impl<M: Middleware + 'static> ContractLedger<M> {
    pub fn new(address: Address, client: Arc<M>, confirmations: usize) -> Self {
        Self {
            contract: CreditContract::new(address, client),
            confirmations: confirmations.max(1),
        }
    }
}

impl ContractLedger<SignerClient> {
    /// Connect to the credit contract at `address`, signing with `private_key`.
    pub async fn connect(
        config: &LedgerClientConfig,
        address: Address,
        private_key: &str,
    ) -> Result<Self, LedgerError> {
        let client = signer_client(config, private_key).await?;
        Ok(Self::new(address, client, config.confirmations))
    }
}

#[async_trait]
impl<M: Middleware + 'static> CreditLedger for ContractLedger<M> {
    async fn balance_of(&self, identity: &Identity) -> Result<u64, LedgerError> {
        self.contract
            .balance_of(identity.address())
            .call()
            .await
            .map(credits_from_u256)
            .map_err(|e| LedgerError::CallFailed(e.to_string()))
    }

    async fn mark_usage(&self, identity: &Identity) -> Result<Confirmation, LedgerError> {
        let confirmation =
            send_and_confirm(self.contract.mark_usage(identity.address()), self.confirmations)
                .await?;

        tracing::info!(
            identity = %identity,
            tx_hash = ?confirmation.tx_hash,
            "Marked usage"
        );

        Ok(confirmation)
    }

    async fn purchase(&self, value_wei: U256) -> Result<Confirmation, LedgerError> {
        let confirmation = send_and_confirm(
            self.contract.purchase().value(value_wei),
            self.confirmations,
        )
        .await?;

        tracing::info!(
            value_wei = %value_wei,
            tx_hash = ?confirmation.tx_hash,
            "Purchased credits"
        );

        Ok(confirmation)
    }
}

/// Knowledge-sharing contract client.
pub struct ContractKnowledgeBoard<M: Middleware + 'static> {
    contract: KnowledgeContract<M>,
    confirmations: usize,
}

impl<M: Middleware + 'static> ContractKnowledgeBoard<M> {
    pub fn new(address: Address, client: Arc<M>, confirmations: usize) -> Self {
        Self {
            contract: KnowledgeContract::new(address, client),
            confirmations: confirmations.max(1),
        }
    }
}

#[async_trait]
impl<M: Middleware + 'static> KnowledgeBoard for ContractKnowledgeBoard<M> {
    async fn is_reward_in_progress(&self) -> Result<bool, LedgerError> {
        self.contract
            .is_reward_in_progress()
            .call()
            .await
            .map_err(|e| LedgerError::CallFailed(e.to_string()))
    }

    async fn submitted_knowledge(&self) -> Result<Vec<KnowledgeEntry>, LedgerError> {
        let (authors, texts) = self
            .contract
            .get_submitted_knowledge()
            .call()
            .await
            .map_err(|e| LedgerError::CallFailed(e.to_string()))?;

        Ok(authors
            .into_iter()
            .zip(texts)
            .map(|(author, text)| KnowledgeEntry {
                author: Identity::from(author),
                text,
            })
            .collect())
    }

    async fn share(&self, text: &str) -> Result<Confirmation, LedgerError> {
        send_and_confirm(self.contract.share(text.to_string()), self.confirmations).await
    }

    async fn vote(&self, index: u64) -> Result<Confirmation, LedgerError> {
        send_and_confirm(self.contract.vote(U256::from(index)), self.confirmations).await
    }

    async fn current_vote(&self) -> Result<u64, LedgerError> {
        self.contract
            .get_vote()
            .call()
            .await
            .map(credits_from_u256)
            .map_err(|e| LedgerError::CallFailed(e.to_string()))
    }
}
