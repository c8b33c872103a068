use service_core::ledger::LedgerError;
use thiserror::Error;

/// Shown when a failure carries no message of its own.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred. Please try again.";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No Ethereum wallet is available.")]
    NoWalletProvider,

    #[error("Wallet connection was rejected: {0}")]
    ConnectionRejected(String),

    #[error("The wallet returned no accounts.")]
    NoAccounts,

    #[error("A wallet is already connected or connecting.")]
    AlreadyConnected,

    #[error("Please connect your Ethereum wallet to continue.")]
    NotConnected,

    #[error("Insufficient balance to send message.")]
    InsufficientBalance,

    #[error("Message is empty.")]
    EmptyMessage,

    #[error("Invalid canvas: {0}")]
    InvalidCanvas(String),

    #[error("Rewards are currently being processed.")]
    RewardInProgress,

    #[error("Vote index {index} is out of range for {len} entries.")]
    InvalidVoteIndex { index: u64, len: usize },

    /// Non-2xx answer from the relay; `message` is its `error` field.
    #[error("{message}")]
    Relay { status: u16, message: String },

    #[error("Prediction failed: {0}")]
    Prediction(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SessionError {
    /// Text recorded in the conversation when a chat action fails.
    pub fn chat_message(&self) -> String {
        match self {
            SessionError::Relay { message, .. } if !message.is_empty() => message.clone(),
            SessionError::Relay { .. } | SessionError::Transport(_) => {
                GENERIC_ERROR_MESSAGE.to_string()
            }
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(err: reqwest::Error) -> Self {
        SessionError::Transport(err.to_string())
    }
}
