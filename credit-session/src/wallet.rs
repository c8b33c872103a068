//! Wallet access.
//!
//! A wallet exposes its accounts two ways: `list_accounts` returns the
//! accounts already authorized for this client without prompting, and
//! `request_accounts` asks the user to authorize one.

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use service_core::identity::Identity;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error("wallet unavailable: {0}")]
    Unavailable(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Accounts already authorized, without prompting.
    async fn list_accounts(&self) -> Result<Vec<Identity>, WalletError>;

    /// Ask the user to authorize accounts.
    async fn request_accounts(&self) -> Result<Vec<Identity>, WalletError>;
}

/// Wallet backed by a local signing key. Always authorized.
pub struct LocalWalletProvider {
    identity: Identity,
}

impl LocalWalletProvider {
    pub fn new(wallet: &LocalWallet) -> Self {
        Self {
            identity: Identity::from(wallet.address()),
        }
    }

    pub fn identity(&self) -> Identity {
        self.identity
    }
}

#[async_trait]
impl WalletProvider for LocalWalletProvider {
    async fn list_accounts(&self) -> Result<Vec<Identity>, WalletError> {
        Ok(vec![self.identity])
    }

    async fn request_accounts(&self) -> Result<Vec<Identity>, WalletError> {
        Ok(vec![self.identity])
    }
}

/// Scriptable wallet for tests.
#[derive(Default)]
pub struct MockWallet {
    accounts: Vec<Identity>,
    authorized: bool,
    reject: bool,
    requests: AtomicUsize,
}

impl MockWallet {
    /// A wallet holding `accounts`, already authorized for this client.
    pub fn authorized(accounts: Vec<Identity>) -> Self {
        Self {
            accounts,
            authorized: true,
            ..Default::default()
        }
    }

    /// A wallet holding `accounts` that only reveals them once requested.
    pub fn unauthorized(accounts: Vec<Identity>) -> Self {
        Self {
            accounts,
            ..Default::default()
        }
    }

    /// A wallet whose user declines every prompt.
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    /// Number of `request_accounts` prompts shown.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn list_accounts(&self) -> Result<Vec<Identity>, WalletError> {
        if self.authorized {
            Ok(self.accounts.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn request_accounts(&self) -> Result<Vec<Identity>, WalletError> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.reject {
            return Err(WalletError::Rejected("User rejected the request.".to_string()));
        }
        Ok(self.accounts.clone())
    }
}
