use ethers::types::Address;
use secrecy::Secret;
use serde::Deserialize;
use service_core::config::{self as core_config, get_env, get_env_opt, get_env_parsed};
use service_core::error::AppError;
use service_core::ledger::LedgerClientConfig;
use std::time::Duration;

/// Credit contract the relay checks and bills against.
const DEFAULT_CREDIT_CONTRACT: &str = "0x104f5cc5d1593f1ba2a0eecf5882be85e231aca9";

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub generation: GenerationConfig,
    pub ledger: LedgerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub api_key: Secret<String>,
    /// Base URL of an OpenAI-compatible API, without trailing slash.
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    pub rpc_url: String,
    pub private_key: Secret<String>,
    pub credit_contract: String,
    pub chain_id: Option<u64>,
    pub confirmations: usize,
}

impl RelayConfig {
    pub fn load() -> Result<Self, AppError> {
        let common = core_config::Config::load()?;
        let is_prod = core_config::is_production();

        Ok(RelayConfig {
            common,
            generation: GenerationConfig {
                api_key: Secret::new(get_env("OPENAI_API_KEY", None, is_prod)?),
                base_url: get_env("OPENAI_BASE_URL", Some("https://api.openai.com/v1"), is_prod)?
                    .trim_end_matches('/')
                    .to_string(),
                model: get_env("OPENAI_MODEL", Some("gpt-4"), is_prod)?,
                max_tokens: get_env_parsed("GENERATION_MAX_TOKENS", 150, is_prod)?,
                temperature: get_env_parsed("GENERATION_TEMPERATURE", 0.7, is_prod)?,
                timeout_secs: get_env_parsed("GENERATION_TIMEOUT_SECS", 120, is_prod)?,
            },
            ledger: LedgerConfig {
                rpc_url: get_env("RPC_URL", None, is_prod)?,
                private_key: Secret::new(get_env("PRIVATE_KEY", None, is_prod)?),
                credit_contract: get_env(
                    "CREDIT_CONTRACT_ADDRESS",
                    Some(DEFAULT_CREDIT_CONTRACT),
                    is_prod,
                )?,
                chain_id: get_env_opt("CHAIN_ID").and_then(|v| v.parse().ok()),
                confirmations: get_env_parsed("LEDGER_CONFIRMATIONS", 1, is_prod)?,
            },
        })
    }
}

impl GenerationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl LedgerConfig {
    pub fn contract_address(&self) -> Result<Address, AppError> {
        self.credit_contract.parse().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!(
                "CREDIT_CONTRACT_ADDRESS is not a valid address: {}",
                e
            ))
        })
    }

    pub fn client_config(&self) -> LedgerClientConfig {
        LedgerClientConfig {
            rpc_url: self.rpc_url.clone(),
            chain_id: self.chain_id,
            confirmations: self.confirmations,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger_config(contract: &str) -> LedgerConfig {
        LedgerConfig {
            rpc_url: "http://localhost:8547".to_string(),
            private_key: Secret::new("key".to_string()),
            credit_contract: contract.to_string(),
            chain_id: Some(421614),
            confirmations: 2,
        }
    }

    #[test]
    fn default_contract_address_parses() {
        let config = ledger_config(DEFAULT_CREDIT_CONTRACT);
        assert!(config.contract_address().is_ok());
    }

    #[test]
    fn malformed_contract_address_is_a_config_error() {
        let config = ledger_config("0x1234");
        assert!(matches!(
            config.contract_address(),
            Err(AppError::ConfigError(_))
        ));
    }

    #[test]
    fn client_config_carries_chain_settings() {
        let client = ledger_config(DEFAULT_CREDIT_CONTRACT).client_config();
        assert_eq!(client.chain_id, Some(421614));
        assert_eq!(client.confirmations, 2);
    }
}
