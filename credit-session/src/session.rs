//! Client session: wallet connection, cached credit balance and chat history.
//!
//! The session caches the ledger balance of the connected identity and gates
//! every credit-consuming action on it. A dispatched action decrements the
//! cached balance immediately; the authoritative value is re-read from the
//! ledger once usage is known to be recorded.

use crate::config::SessionConfig;
use crate::conversation::ChatEntry;
use crate::error::SessionError;
use crate::prediction::{DigitCanvas, PredictionClient};
use crate::relay_client::RelayClient;
use crate::wallet::{LocalWalletProvider, WalletError, WalletProvider};
use service_core::api::BillingStatus;
use service_core::identity::Identity;
use service_core::ledger::contracts::signer_client;
use service_core::ledger::{ContractLedger, CreditLedger, purchase_price};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected { identity: Identity, balance: u64 },
}

/// Point-in-time view of the session for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        matches!(self.state, SessionState::Connected { .. })
    }

    pub fn identity(&self) -> Option<Identity> {
        match self.state {
            SessionState::Connected { identity, .. } => Some(identity),
            _ => None,
        }
    }

    /// Cached balance; zero unless connected.
    pub fn balance(&self) -> u64 {
        match self.state {
            SessionState::Connected { balance, .. } => balance,
            _ => 0,
        }
    }
}

struct Inner {
    state: SessionState,
    conversation: Vec<ChatEntry>,
    // bumped on disconnect; work started under an older epoch must not touch state
    epoch: u64,
}

pub struct SessionManager {
    wallet: Option<Arc<dyn WalletProvider>>,
    ledger: Arc<dyn CreditLedger>,
    relay: RelayClient,
    prediction: PredictionClient,
    inner: RwLock<Inner>,
}

impl SessionManager {
    pub fn new(
        wallet: Option<Arc<dyn WalletProvider>>,
        ledger: Arc<dyn CreditLedger>,
        relay: RelayClient,
        prediction: PredictionClient,
    ) -> Self {
        Self {
            wallet,
            ledger,
            relay,
            prediction,
            inner: RwLock::new(Inner {
                state: SessionState::Disconnected,
                conversation: Vec::new(),
                epoch: 0,
            }),
        }
    }

    /// A session whose wallet and ledger writes use a local signing key.
    pub async fn from_key(config: &SessionConfig, private_key: &str) -> Result<Self, SessionError> {
        let client = signer_client(&config.ledger_client_config(), private_key).await?;
        let wallet = LocalWalletProvider::new(client.signer());
        let ledger = ContractLedger::new(config.credit_contract, client, 1);

        Ok(Self::new(
            Some(Arc::new(wallet)),
            Arc::new(ledger),
            RelayClient::new(config.relay_url.clone(), config.request_timeout)?,
            PredictionClient::new(config.prediction_url.clone(), config.request_timeout)?,
        ))
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.inner.read().await.state,
        }
    }

    /// Chat history of this session, oldest first.
    pub async fn conversation(&self) -> Vec<ChatEntry> {
        self.inner.read().await.conversation.clone()
    }

    /// Ask the wallet to authorize an account and connect to it.
    pub async fn connect(&self) -> Result<SessionSnapshot, SessionError> {
        let wallet = self.wallet.clone().ok_or(SessionError::NoWalletProvider)?;
        let epoch = self.begin_connecting().await?;

        let result = match wallet.request_accounts().await {
            Ok(accounts) => self.establish(accounts).await,
            Err(e) => Err(wallet_error(e)),
        };

        self.finish_connecting(epoch, result).await
    }

    /// Reconnect to an already-authorized account without prompting.
    ///
    /// No authorized account leaves the session disconnected without error.
    pub async fn restore(&self) -> Result<SessionSnapshot, SessionError> {
        let wallet = self.wallet.clone().ok_or(SessionError::NoWalletProvider)?;
        let epoch = match self.begin_connecting().await {
            Ok(epoch) => epoch,
            Err(SessionError::AlreadyConnected) => return Ok(self.snapshot().await),
            Err(e) => return Err(e),
        };

        let result = match wallet.list_accounts().await {
            Ok(accounts) if accounts.is_empty() => {
                let mut inner = self.inner.write().await;
                if inner.epoch == epoch {
                    inner.state = SessionState::Disconnected;
                }
                return Ok(SessionSnapshot { state: inner.state });
            }
            Ok(accounts) => self.establish(accounts).await,
            Err(e) => Err(wallet_error(e)),
        };

        self.finish_connecting(epoch, result).await
    }

    /// Forget the connected identity and the chat history.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.write().await;
        inner.state = SessionState::Disconnected;
        inner.conversation.clear();
        inner.epoch += 1;
        tracing::info!("Session disconnected");
    }

    /// Replace the cached balance with the ledger's.
    pub async fn refresh_balance(&self) -> Result<u64, SessionError> {
        let (identity, epoch) = self.connected_identity().await?;
        let balance = self.ledger.balance_of(&identity).await?;
        self.apply_balance(epoch, identity, balance).await;
        Ok(balance)
    }

    /// Send `text` through the relay and record the exchange.
    pub async fn send_chat(&self, text: &str) -> Result<String, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let (identity, epoch) = self.reserve_credit().await?;
        self.push_entry(epoch, ChatEntry::user(text)).await;

        match self.relay.query(&identity, text).await {
            Ok(response) => {
                self.push_entry(epoch, ChatEntry::ai(response.result.clone()))
                    .await;
                if response.billing == BillingStatus::Recorded {
                    self.reconcile(epoch, identity).await;
                } else {
                    tracing::warn!(identity = %identity, "Relay served the query unbilled");
                }
                Ok(response.result)
            }
            Err(e) => {
                self.push_entry(epoch, ChatEntry::error(&e.chat_message()))
                    .await;
                Err(e)
            }
        }
    }

    /// Record one unit of usage on the ledger, then classify `canvas`.
    pub async fn predict_digit(&self, canvas: &DigitCanvas) -> Result<u8, SessionError> {
        let (identity, epoch) = self.reserve_credit().await?;

        let confirmation = self.ledger.mark_usage(&identity).await?;
        tracing::debug!(identity = %identity, tx_hash = ?confirmation.tx_hash, "Usage recorded");
        self.reconcile(epoch, identity).await;

        let digit = self.prediction.predict(canvas).await?;
        tracing::info!(identity = %identity, digit, "Digit predicted");
        Ok(digit)
    }

    /// Buy `credits` for the connected identity.
    pub async fn purchase(&self, credits: u64) -> Result<SessionSnapshot, SessionError> {
        let (identity, _) = self.connected_identity().await?;
        if credits == 0 {
            return Ok(self.snapshot().await);
        }

        let value = purchase_price(credits);
        let confirmation = self.ledger.purchase(value).await?;
        tracing::info!(
            identity = %identity,
            credits,
            tx_hash = ?confirmation.tx_hash,
            "Credits purchased"
        );

        self.refresh_balance().await?;
        Ok(self.snapshot().await)
    }

    async fn begin_connecting(&self) -> Result<u64, SessionError> {
        let mut inner = self.inner.write().await;
        match inner.state {
            SessionState::Disconnected => {
                inner.state = SessionState::Connecting;
                Ok(inner.epoch)
            }
            _ => Err(SessionError::AlreadyConnected),
        }
    }

    async fn establish(&self, accounts: Vec<Identity>) -> Result<(Identity, u64), SessionError> {
        let identity = accounts.into_iter().next().ok_or(SessionError::NoAccounts)?;
        let balance = self.ledger.balance_of(&identity).await?;
        Ok((identity, balance))
    }

    async fn finish_connecting(
        &self,
        epoch: u64,
        result: Result<(Identity, u64), SessionError>,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            return Err(SessionError::NotConnected);
        }

        match result {
            Ok((identity, balance)) => {
                inner.state = SessionState::Connected { identity, balance };
                tracing::info!(identity = %identity, balance, "Session connected");
                Ok(SessionSnapshot { state: inner.state })
            }
            Err(e) => {
                inner.state = SessionState::Disconnected;
                tracing::warn!(error = %e, "Session connection failed");
                Err(e)
            }
        }
    }

    /// Connected identity and the epoch it was observed in.
    async fn connected_identity(&self) -> Result<(Identity, u64), SessionError> {
        let inner = self.inner.read().await;
        match inner.state {
            SessionState::Connected { identity, .. } => Ok((identity, inner.epoch)),
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Gate a credit-consuming action and take one credit from the cache.
    async fn reserve_credit(&self) -> Result<(Identity, u64), SessionError> {
        let mut inner = self.inner.write().await;
        let epoch = inner.epoch;
        match &mut inner.state {
            SessionState::Connected { identity, balance } => {
                if *balance == 0 {
                    return Err(SessionError::InsufficientBalance);
                }
                *balance = balance.saturating_sub(1);
                Ok((*identity, epoch))
            }
            _ => Err(SessionError::NotConnected),
        }
    }

    async fn reconcile(&self, epoch: u64, identity: Identity) {
        match self.ledger.balance_of(&identity).await {
            Ok(balance) => self.apply_balance(epoch, identity, balance).await,
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "Balance reconciliation failed");
            }
        }
    }

    async fn apply_balance(&self, epoch: u64, identity: Identity, authoritative: u64) {
        let mut inner = self.inner.write().await;
        if inner.epoch != epoch {
            return;
        }
        if let SessionState::Connected {
            identity: current,
            balance,
        } = &mut inner.state
        {
            if *current == identity {
                *balance = authoritative;
            }
        }
    }

    async fn push_entry(&self, epoch: u64, entry: ChatEntry) {
        let mut inner = self.inner.write().await;
        if inner.epoch == epoch {
            inner.conversation.push(entry);
        } else {
            tracing::debug!("Dropping chat entry from a disconnected session");
        }
    }
}

fn wallet_error(err: WalletError) -> SessionError {
    match err {
        WalletError::Rejected(reason) => SessionError::ConnectionRejected(reason),
        WalletError::Unavailable(_) => SessionError::NoWalletProvider,
    }
}
