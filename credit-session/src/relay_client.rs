use crate::error::{GENERIC_ERROR_MESSAGE, SessionError};
use reqwest::Client;
use service_core::api::{ErrorBody, QUERY_PATH, QueryRequest, QueryResponse};
use service_core::identity::Identity;
use std::time::Duration;

/// HTTP client for the relay's `/query-ai` endpoint.
#[derive(Clone)]
pub struct RelayClient {
    base_url: String,
    client: Client,
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    pub async fn query(
        &self,
        identity: &Identity,
        query: &str,
    ) -> Result<QueryResponse, SessionError> {
        let url = format!("{}{}", self.base_url, QUERY_PATH);
        let request = QueryRequest::new(query, identity.to_string());

        let response = self.client.post(&url).json(&request).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<QueryResponse>().await?);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .map(|body| body.error)
            .unwrap_or_else(|_| GENERIC_ERROR_MESSAGE.to_string());

        tracing::warn!(status = status.as_u16(), error = %message, "Relay rejected query");

        Err(SessionError::Relay {
            status: status.as_u16(),
            message,
        })
    }
}
