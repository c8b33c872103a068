//! Wire types for the relay's HTTP API, shared by the server and its clients.

use serde::{Deserialize, Serialize};
use validator::Validate;

/// Path of the gated completion endpoint.
pub const QUERY_PATH: &str = "/query-ai";

/// Body of `POST /query-ai`.
///
/// Both fields are optional at the serde level so that a missing field is a
/// validation failure (400) rather than a deserialization rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    #[validate(required, length(min = 1))]
    pub query: Option<String>,

    #[validate(required, length(min = 1))]
    pub eth_address: Option<String>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>, eth_address: impl Into<String>) -> Self {
        Self {
            query: Some(query.into()),
            eth_address: Some(eth_address.into()),
        }
    }
}

/// Whether the usage record for a served generation was confirmed on-chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingStatus {
    /// The usage transaction confirmed.
    Recorded,
    /// Generation succeeded but the usage transaction failed.
    Unbilled,
}

impl BillingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingStatus::Recorded => "recorded",
            BillingStatus::Unbilled => "unbilled",
        }
    }
}

/// Successful response of `POST /query-ai`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub result: String,
    pub billing: BillingStatus,
}

/// Error body returned with every non-2xx status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
