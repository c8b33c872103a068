//! Mock provider implementation for testing.

use super::{
    ChatMessage, FinishReason, GenerationParams, ProviderError, ProviderResponse, TextProvider,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Mock text provider for testing.
///
/// Echoes the last message back. A gated mock blocks every call until the
/// returned [`Notify`] is signalled, which lets tests hold a request open.
pub struct MockTextProvider {
    enabled: bool,
    gate: Option<Arc<Notify>>,
    calls: AtomicUsize,
}

impl MockTextProvider {
    pub fn new() -> Self {
        Self {
            enabled: true,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A provider whose every call fails.
    pub fn failing() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    /// A provider that waits on the returned gate before answering.
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let provider = Self {
            gate: Some(gate.clone()),
            ..Self::new()
        };
        (provider, gate)
    }

    /// Number of `generate` calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for MockTextProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextProvider for MockTextProvider {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        _params: &GenerationParams,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        if !self.enabled {
            return Err(ProviderError::ApiError(
                "Mock text provider not enabled".to_string(),
            ));
        }

        let prompt = messages.last().map(|m| m.content.as_str()).unwrap_or("");
        let question = prompt.rsplit("\n\n").next().unwrap_or(prompt);

        Ok(ProviderResponse {
            text: format!("Mock response for: {}", question),
            input_tokens: (prompt.len() / 4) as u32,
            output_tokens: 10,
            finish_reason: FinishReason::Complete,
        })
    }

    async fn health_check(&self) -> Result<(), ProviderError> {
        if self.enabled {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured(
                "Mock text provider not enabled".to_string(),
            ))
        }
    }
}
