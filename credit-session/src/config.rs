use crate::error::SessionError;
use ethers::types::Address;
use service_core::config::get_env_opt;
use service_core::ledger::LedgerClientConfig;
use std::time::Duration;

const DEFAULT_RELAY_URL: &str = "http://localhost:8000";
const DEFAULT_PREDICTION_URL: &str = "http://127.0.0.1:5000";
const DEFAULT_RPC_URL: &str = "http://localhost:8547";
const DEFAULT_CREDIT_CONTRACT: &str = "0x104f5cc5d1593f1ba2a0eecf5882be85e231aca9";
const DEFAULT_KNOWLEDGE_CONTRACT: &str = "0xa95799b35a9b71d8793ff8f160ac447b2ccb96f6";

/// Endpoints and contracts a client session talks to.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub relay_url: String,
    pub prediction_url: String,
    pub rpc_url: String,
    pub chain_id: Option<u64>,
    pub credit_contract: Address,
    pub knowledge_contract: Address,
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            prediction_url: DEFAULT_PREDICTION_URL.to_string(),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            chain_id: None,
            credit_contract: parse_address("CREDIT_CONTRACT_ADDRESS", DEFAULT_CREDIT_CONTRACT)
                .unwrap_or_default(),
            knowledge_contract: parse_address(
                "KNOWLEDGE_CONTRACT_ADDRESS",
                DEFAULT_KNOWLEDGE_CONTRACT,
            )
            .unwrap_or_default(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

fn parse_address(key: &str, value: &str) -> Result<Address, SessionError> {
    value
        .trim()
        .parse()
        .map_err(|e| SessionError::Config(format!("{} is not a valid address: {}", key, e)))
}

impl SessionConfig {
    /// Read `RELAY_URL`, `PREDICTION_URL`, `RPC_URL`, `CHAIN_ID`,
    /// `CREDIT_CONTRACT_ADDRESS`, `KNOWLEDGE_CONTRACT_ADDRESS` and
    /// `REQUEST_TIMEOUT_SECS`, keeping defaults for unset values.
    pub fn from_env() -> Result<Self, SessionError> {
        let defaults = Self::default();

        let credit_contract = match get_env_opt("CREDIT_CONTRACT_ADDRESS") {
            Some(v) => parse_address("CREDIT_CONTRACT_ADDRESS", &v)?,
            None => defaults.credit_contract,
        };
        let knowledge_contract = match get_env_opt("KNOWLEDGE_CONTRACT_ADDRESS") {
            Some(v) => parse_address("KNOWLEDGE_CONTRACT_ADDRESS", &v)?,
            None => defaults.knowledge_contract,
        };

        Ok(Self {
            relay_url: get_env_opt("RELAY_URL").unwrap_or(defaults.relay_url),
            prediction_url: get_env_opt("PREDICTION_URL").unwrap_or(defaults.prediction_url),
            rpc_url: get_env_opt("RPC_URL").unwrap_or(defaults.rpc_url),
            chain_id: get_env_opt("CHAIN_ID").and_then(|v| v.parse().ok()),
            credit_contract,
            knowledge_contract,
            request_timeout: get_env_opt("REQUEST_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
        })
    }

    pub fn ledger_client_config(&self) -> LedgerClientConfig {
        LedgerClientConfig {
            rpc_url: self.rpc_url.clone(),
            chain_id: self.chain_id,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_services_and_known_contracts() {
        let config = SessionConfig::default();
        assert_eq!(config.relay_url, "http://localhost:8000");
        assert_eq!(config.prediction_url, "http://127.0.0.1:5000");
        assert_eq!(
            config.credit_contract,
            DEFAULT_CREDIT_CONTRACT.parse::<Address>().unwrap()
        );
        assert_ne!(config.knowledge_contract, Address::zero());
    }

    #[test]
    fn malformed_contract_address_is_reported() {
        let err = parse_address("KNOWLEDGE_CONTRACT_ADDRESS", "0x12").unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }
}
