//! Usage-gated relay: validate, check credit, generate, record usage.

use crate::services::guard::InFlightRegistry;
use crate::services::metrics;
use crate::services::providers::{
    ChatMessage, GenerationParams, ProviderError, ProviderResponse, TextProvider,
};
use service_core::api::{BillingStatus, QueryRequest};
use service_core::error::AppError;
use service_core::identity::Identity;
use service_core::ledger::{CreditLedger, LedgerError};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{Span, instrument};
use validator::Validate;

/// System message sent ahead of every query.
pub const SYSTEM_PROMPT: &str = "You are a knowledgeable assistant.";

/// Context sentences placed before the user's query.
pub const CONTEXT_FACTS: [&str; 4] = [
    "The Earth revolves around the Sun.",
    "Water boils at 100 degrees Celsius.",
    "Light travels faster than sound.",
    "The human body has 206 bones.",
];

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Missing query or ethAddress in request body.")]
    InvalidRequest,

    #[error("Invalid Ethereum address.")]
    InvalidIdentity,

    #[error("Insufficient credits.")]
    InsufficientCredit,

    #[error("A request for this address is already in progress.")]
    RequestInFlight,

    #[error("Failed to read credit balance")]
    LedgerReadFailure(#[source] LedgerError),

    #[error("Generation failed")]
    UpstreamError(#[source] ProviderError),
}

impl RelayError {
    /// Label for the `outcome` metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            RelayError::InvalidRequest => "invalid_request",
            RelayError::InvalidIdentity => "invalid_identity",
            RelayError::InsufficientCredit => "insufficient_credit",
            RelayError::RequestInFlight => "in_flight",
            RelayError::LedgerReadFailure(_) => "ledger_read_failure",
            RelayError::UpstreamError(_) => "upstream_error",
        }
    }
}

impl From<RelayError> for AppError {
    fn from(err: RelayError) -> Self {
        match err {
            RelayError::InvalidRequest | RelayError::InvalidIdentity => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            RelayError::InsufficientCredit => AppError::Forbidden(anyhow::anyhow!(err.to_string())),
            RelayError::RequestInFlight => AppError::Conflict(anyhow::anyhow!(err.to_string())),
            RelayError::LedgerReadFailure(_) | RelayError::UpstreamError(_) => {
                AppError::InternalError(anyhow::Error::new(err))
            }
        }
    }
}

/// Model parameters applied to every generation.
#[derive(Debug, Clone, Default)]
pub struct GenerationSettings {
    pub params: GenerationParams,
}

/// A served generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub result: String,
    pub billing: BillingStatus,
}

pub struct RelayService {
    ledger: Arc<dyn CreditLedger>,
    provider: Arc<dyn TextProvider>,
    settings: GenerationSettings,
    in_flight: InFlightRegistry,
}

impl RelayService {
    pub fn new(
        ledger: Arc<dyn CreditLedger>,
        provider: Arc<dyn TextProvider>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            ledger,
            provider,
            settings,
            in_flight: InFlightRegistry::new(),
        }
    }

    /// Messages sent upstream for `query`.
    pub fn compose_messages(query: &str) -> Vec<ChatMessage> {
        let prompt = format!("{}\n\n{}", CONTEXT_FACTS.join(" "), query);
        vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(prompt)]
    }

    pub fn in_flight(&self) -> &InFlightRegistry {
        &self.in_flight
    }

    pub async fn provider_health(&self) -> Result<(), ProviderError> {
        self.provider.health_check().await
    }

    /// Serve one gated query and record the outcome metric.
    #[instrument(skip(self, request), fields(identity))]
    pub async fn handle(&self, request: QueryRequest) -> Result<RelayOutcome, RelayError> {
        let result = self.serve(request).await;

        match &result {
            Ok(_) => metrics::record_request("served"),
            Err(e) => metrics::record_request(e.outcome()),
        }

        result
    }

    async fn serve(&self, request: QueryRequest) -> Result<RelayOutcome, RelayError> {
        request.validate().map_err(|_| RelayError::InvalidRequest)?;
        let (query, address) = match (request.query, request.eth_address) {
            (Some(query), Some(address)) => (query, address),
            _ => return Err(RelayError::InvalidRequest),
        };

        let identity: Identity = address
            .trim()
            .parse()
            .map_err(|_| RelayError::InvalidIdentity)?;
        Span::current().record("identity", tracing::field::display(&identity));

        // held until this request finishes, including when the caller disconnects
        let _guard = self.in_flight.try_acquire(identity).ok_or_else(|| {
            metrics::record_in_flight_rejection();
            tracing::warn!(identity = %identity, "Rejected concurrent request");
            RelayError::RequestInFlight
        })?;

        let balance = self
            .ledger
            .balance_of(&identity)
            .await
            .map_err(RelayError::LedgerReadFailure)?;
        if balance < 1 {
            tracing::info!(identity = %identity, "Insufficient credits");
            return Err(RelayError::InsufficientCredit);
        }

        let response = self.generate(&query).await?;

        let billing = match self.ledger.mark_usage(&identity).await {
            Ok(confirmation) => {
                tracing::info!(
                    identity = %identity,
                    tx_hash = ?confirmation.tx_hash,
                    "Usage recorded"
                );
                BillingStatus::Recorded
            }
            Err(e) => {
                metrics::record_unbilled();
                tracing::error!(
                    identity = %identity,
                    error = %e,
                    "Failed to record usage, generation served unbilled"
                );
                BillingStatus::Unbilled
            }
        };

        Ok(RelayOutcome {
            result: response.text,
            billing,
        })
    }

    async fn generate(&self, query: &str) -> Result<ProviderResponse, RelayError> {
        let messages = Self::compose_messages(query);
        let provider = self.provider.name();
        let model = self.provider.model().to_string();

        let started = Instant::now();
        let result = self
            .provider
            .generate(&messages, &self.settings.params)
            .await;
        metrics::record_generation_latency(provider, &model, started.elapsed().as_secs_f64());

        let mut response = result.map_err(|e| {
            metrics::record_provider_error(provider, e.kind());
            tracing::error!(provider, model = %model, error = %e, "Generation failed");
            RelayError::UpstreamError(e)
        })?;

        response.text = response.text.trim().to_string();
        if response.text.is_empty() {
            metrics::record_provider_error(provider, ProviderError::EmptyResponse.kind());
            return Err(RelayError::UpstreamError(ProviderError::EmptyResponse));
        }

        metrics::record_tokens(&model, response.input_tokens, response.output_tokens);
        tracing::debug!(
            provider,
            model = %model,
            finish_reason = response.finish_reason.as_str(),
            "Generation complete"
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::providers::Role;
    use crate::services::providers::mock::MockTextProvider;
    use service_core::ledger::InMemoryLedger;

    const ADDRESS: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn service(ledger: Arc<InMemoryLedger>, provider: Arc<MockTextProvider>) -> RelayService {
        RelayService::new(ledger, provider, GenerationSettings::default())
    }

    #[test]
    fn composed_prompt_puts_context_before_query() {
        let messages = RelayService::compose_messages("What is the boiling point of water?");

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "You are a knowledgeable assistant.");
        assert_eq!(
            messages[1].content,
            "The Earth revolves around the Sun. Water boils at 100 degrees Celsius. \
             Light travels faster than sound. The human body has 206 bones.\n\n\
             What is the boiling point of water?"
        );
    }

    #[tokio::test]
    async fn served_query_is_billed() {
        let ledger = Arc::new(InMemoryLedger::new());
        let identity: Identity = ADDRESS.parse().unwrap();
        ledger.set_balance(identity, 2);
        let provider = Arc::new(MockTextProvider::new());

        let outcome = service(ledger.clone(), provider.clone())
            .handle(QueryRequest::new("hello", ADDRESS))
            .await
            .unwrap();

        assert_eq!(outcome.result, "Mock response for: hello");
        assert_eq!(outcome.billing, BillingStatus::Recorded);
        assert_eq!(ledger.peek_balance(&identity), 1);
    }

    #[tokio::test]
    async fn lowercase_address_is_accepted() {
        let ledger = Arc::new(InMemoryLedger::new());
        let identity: Identity = ADDRESS.parse().unwrap();
        ledger.set_balance(identity, 1);

        let outcome = service(ledger, Arc::new(MockTextProvider::new()))
            .handle(QueryRequest::new("hi", ADDRESS.to_lowercase()))
            .await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn ledger_read_failure_skips_generation() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.fail_reads(true);
        let provider = Arc::new(MockTextProvider::new());

        let err = service(ledger, provider.clone())
            .handle(QueryRequest::new("hi", ADDRESS))
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::LedgerReadFailure(_)));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn upstream_failure_records_no_usage() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.set_balance(ADDRESS.parse().unwrap(), 1);

        let err = service(ledger.clone(), Arc::new(MockTextProvider::failing()))
            .handle(QueryRequest::new("hi", ADDRESS))
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::UpstreamError(_)));
        assert_eq!(ledger.usage_writes(), 0);
    }

    #[tokio::test]
    async fn guard_is_released_after_each_request() {
        let ledger = Arc::new(InMemoryLedger::new());
        let relay = service(ledger, Arc::new(MockTextProvider::new()));

        let _ = relay.handle(QueryRequest::new("hi", ADDRESS)).await;
        assert!(relay.in_flight().is_empty());
    }

    #[tokio::test]
    async fn abandoned_request_releases_guard() {
        let ledger = Arc::new(InMemoryLedger::new());
        let identity: Identity = ADDRESS.parse().unwrap();
        ledger.set_balance(identity, 1);
        let (provider, _gate) = MockTextProvider::gated();
        let provider = Arc::new(provider);
        let relay = Arc::new(service(ledger.clone(), provider.clone()));

        let pending = tokio::spawn({
            let relay = relay.clone();
            async move { relay.handle(QueryRequest::new("hi", ADDRESS)).await }
        });

        for _ in 0..200 {
            if provider.calls() == 1 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert!(relay.in_flight().is_active(&identity));

        pending.abort();
        assert!(pending.await.unwrap_err().is_cancelled());

        assert!(relay.in_flight().is_empty());
        assert_eq!(ledger.usage_writes(), 0);
        assert_eq!(ledger.peek_balance(&identity), 1);
    }

    #[test]
    fn errors_map_to_http_statuses() {
        use axum::http::StatusCode;
        use axum::response::IntoResponse;

        let cases = [
            (RelayError::InvalidRequest, StatusCode::BAD_REQUEST),
            (RelayError::InvalidIdentity, StatusCode::BAD_REQUEST),
            (RelayError::InsufficientCredit, StatusCode::FORBIDDEN),
            (RelayError::RequestInFlight, StatusCode::CONFLICT),
            (
                RelayError::UpstreamError(ProviderError::Timeout),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            let response = AppError::from(err).into_response();
            assert_eq!(response.status(), status);
        }
    }
}
