//! credit-session: client-side state for the credit relay.
//!
//! [`SessionManager`] owns the wallet connection, the cached credit balance
//! and the chat history; [`KnowledgeShare`] wraps the knowledge-sharing board.

pub mod config;
pub mod conversation;
pub mod error;
pub mod knowledge;
pub mod prediction;
pub mod relay_client;
pub mod session;
pub mod wallet;

pub use config::SessionConfig;
pub use conversation::{ChatEntry, Sender};
pub use error::SessionError;
pub use knowledge::KnowledgeShare;
pub use prediction::{DigitCanvas, PredictionClient};
pub use relay_client::RelayClient;
pub use session::{SessionManager, SessionSnapshot, SessionState};
pub use wallet::{LocalWalletProvider, MockWallet, WalletError, WalletProvider};
