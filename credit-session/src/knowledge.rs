use crate::config::SessionConfig;
use crate::error::SessionError;
use service_core::ledger::contracts::signer_client;
use service_core::ledger::{ContractKnowledgeBoard, KnowledgeBoard, KnowledgeEntry};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Knowledge-sharing board as seen by one client.
///
/// Sharing and voting spend gas from the signing account, not usage credits,
/// so nothing here is balance-gated.
pub struct KnowledgeShare {
    board: Arc<dyn KnowledgeBoard>,
    entries: RwLock<Vec<KnowledgeEntry>>,
}

impl KnowledgeShare {
    pub fn new(board: Arc<dyn KnowledgeBoard>) -> Self {
        Self {
            board,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub async fn from_key(config: &SessionConfig, private_key: &str) -> Result<Self, SessionError> {
        let client = signer_client(&config.ledger_client_config(), private_key).await?;
        let board = ContractKnowledgeBoard::new(config.knowledge_contract, client, 1);
        Ok(Self::new(Arc::new(board)))
    }

    pub async fn is_reward_in_progress(&self) -> Result<bool, SessionError> {
        Ok(self.board.is_reward_in_progress().await?)
    }

    /// Fetch the submitted entries and cache them.
    pub async fn submitted_knowledge(&self) -> Result<Vec<KnowledgeEntry>, SessionError> {
        let entries = self.board.submitted_knowledge().await?;
        *self.entries.write().await = entries.clone();
        Ok(entries)
    }

    /// Entries as of the last fetch.
    pub async fn cached_entries(&self) -> Vec<KnowledgeEntry> {
        self.entries.read().await.clone()
    }

    /// Share `text` and return the refreshed list.
    ///
    /// Refused while a reward round is open, since the board would accept
    /// the transaction and drop the entry.
    pub async fn share(&self, text: &str) -> Result<Vec<KnowledgeEntry>, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if self.is_reward_in_progress().await? {
            return Err(SessionError::RewardInProgress);
        }

        let confirmation = self.board.share(text).await?;
        tracing::info!(tx_hash = ?confirmation.tx_hash, "Knowledge shared");

        self.submitted_knowledge().await
    }

    /// Vote for the entry at `index` of the current list.
    pub async fn vote(&self, index: u64) -> Result<(), SessionError> {
        let entries = self.submitted_knowledge().await?;
        let in_range = usize::try_from(index).is_ok_and(|i| i < entries.len());
        if !in_range {
            return Err(SessionError::InvalidVoteIndex {
                index,
                len: entries.len(),
            });
        }

        let confirmation = self.board.vote(index).await?;
        tracing::info!(index, tx_hash = ?confirmation.tx_hash, "Vote cast");
        Ok(())
    }

    pub async fn current_vote(&self) -> Result<u64, SessionError> {
        Ok(self.board.current_vote().await?)
    }
}
