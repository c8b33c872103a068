//! Application startup and lifecycle management.

use crate::config::RelayConfig;
use crate::handlers::{
    health::{health_check, readiness_check},
    metrics::metrics,
    query::query_ai,
};
use crate::models::QUERY_PATH;
use crate::services::metrics::init_metrics;
use crate::services::providers::openai::{OpenAiConfig, OpenAiTextProvider};
use crate::services::providers::{GenerationParams, TextProvider};
use crate::services::{GenerationSettings, RelayService};
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use secrecy::ExposeSecret;
use service_core::error::AppError;
use service_core::ledger::{ContractLedger, CreditLedger};
use service_core::middleware::request_id_middleware;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayService>,
}

impl AppState {
    pub fn new(relay: RelayService) -> Self {
        Self {
            relay: Arc::new(relay),
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .route(QUERY_PATH, post(query_ai))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri(),
                    version = ?request.version(),
                )
            }),
        )
        // outermost so the trace span sees the id
        .layer(from_fn(request_id_middleware))
}

/// Application container for managing server lifecycle.
pub struct Application {
    http_port: u16,
    http_listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: RelayConfig) -> Result<Self, AppError> {
        init_metrics().map_err(|e| {
            AppError::InternalError(anyhow::anyhow!("Failed to initialize metrics: {}", e))
        })?;

        let provider = OpenAiTextProvider::new(OpenAiConfig {
            api_key: config.generation.api_key.clone(),
            base_url: config.generation.base_url.clone(),
            model: config.generation.model.clone(),
            timeout: config.generation.timeout(),
        })
        .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;
        let provider: Arc<dyn TextProvider> = Arc::new(provider);

        tracing::info!(
            model = %config.generation.model,
            base_url = %config.generation.base_url,
            "Initialized chat-completion provider"
        );

        let contract = config.ledger.contract_address()?;
        let ledger = ContractLedger::connect(
            &config.ledger.client_config(),
            contract,
            config.ledger.private_key.expose_secret(),
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to credit contract: {}", e);
            AppError::ConfigError(anyhow::Error::new(e))
        })?;
        let ledger: Arc<dyn CreditLedger> = Arc::new(ledger);

        tracing::info!(
            contract = ?contract,
            rpc_url = %config.ledger.rpc_url,
            "Connected to credit contract"
        );

        let settings = GenerationSettings {
            params: GenerationParams {
                temperature: config.generation.temperature,
                max_tokens: config.generation.max_tokens,
            },
        };
        let state = AppState::new(RelayService::new(ledger, provider, settings));

        // Bind HTTP listener (port 0 = random port for testing)
        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!("Failed to bind HTTP listener to {}: {}", http_addr, e);
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!("Relay service listening on port {}", http_port);

        Ok(Self {
            http_port,
            http_listener,
            state,
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    /// Run the application until `shutdown` resolves.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = build_router(self.state);

        axum::serve(self.http_listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| {
                tracing::error!("HTTP server error: {}", e);
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
