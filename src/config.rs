use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fs;

use crate::core_types::Amount;
use crate::error::WalletError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub database: DatabaseConfig,
    pub chain: ChainConfig,
    pub signer: SignerConfig,
    pub funding: FundingConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Create tables on startup if missing
    #[serde(default)]
    pub init_schema: bool,
}

fn default_max_connections() -> u32 {
    10
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// First height scanned when no watermark exists yet
    #[serde(default)]
    pub starting_height: u64,
    pub blocks_step: u64,
    pub confirmations: u64,
    /// Token address recorded for native-coin transfers
    #[serde(default = "default_native_token")]
    pub native_token: String,
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_native_token() -> String {
    "So11111111111111111111111111111111111111112".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignerConfig {
    pub url: String,
    /// Durable nonce account forwarded to the signer, if one is used
    #[serde(default)]
    pub nonce_account: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    #[serde(default = "default_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_decimals() -> u8 {
    9
}

/// Thresholds driving collection and cold sweep
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FundingConfig {
    #[serde(deserialize_with = "amount::deserialize")]
    pub collection_threshold: Amount,
    #[serde(deserialize_with = "amount::deserialize")]
    pub cold_threshold: Amount,
    /// Left behind in the hot wallet by every cold sweep
    #[serde(default, deserialize_with = "amount::deserialize")]
    pub cold_retain: Amount,
    #[serde(default)]
    pub tokens: HashMap<String, TokenThresholds>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TokenThresholds {
    #[serde(default, deserialize_with = "amount::deserialize_opt")]
    pub collection_threshold: Option<Amount>,
    #[serde(default, deserialize_with = "amount::deserialize_opt")]
    pub cold_threshold: Option<Amount>,
}

impl FundingConfig {
    pub fn collection_threshold_for(&self, token: &str) -> Amount {
        self.tokens
            .get(token)
            .and_then(|t| t.collection_threshold)
            .unwrap_or(self.collection_threshold)
    }

    pub fn cold_threshold_for(&self, token: &str) -> Amount {
        self.tokens
            .get(token)
            .and_then(|t| t.cold_threshold)
            .unwrap_or(self.cold_threshold)
    }

    /// Lowest collection threshold over all tokens, used to pre-filter in the store
    pub fn min_collection_threshold(&self) -> Amount {
        self.tokens
            .values()
            .filter_map(|t| t.collection_threshold)
            .fold(self.collection_threshold, Amount::min)
    }

    pub fn min_cold_threshold(&self) -> Amount {
        self.tokens
            .values()
            .filter_map(|t| t.cold_threshold)
            .fold(self.cold_threshold, Amount::min)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WorkersConfig {
    pub scan_interval_ms: u64,
    pub collection_interval_ms: u64,
    pub cold_sweep_interval_ms: u64,
    pub withdraw_interval_ms: u64,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 5000,
            collection_interval_ms: 5000,
            cold_sweep_interval_ms: 5000,
            withdraw_interval_ms: 5000,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub min_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            min_delay_ms: 1000,
            max_delay_ms: 20_000,
            max_jitter_ms: 250,
        }
    }
}

impl AppConfig {
    /// Load `config/<env>.yaml`
    pub fn load(env: &str) -> Result<Self, WalletError> {
        Self::from_file(&format!("config/{}.yaml", env))
    }

    pub fn from_file(path: &str) -> Result<Self, WalletError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, WalletError> {
        let config: AppConfig =
            serde_yaml::from_str(content).map_err(|e| WalletError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), WalletError> {
        if self.chain.blocks_step == 0 {
            return Err(WalletError::Config("chain.blocks_step must be > 0".into()));
        }
        if self.funding.collection_threshold == 0 || self.funding.cold_threshold == 0 {
            return Err(WalletError::Config(
                "funding thresholds must be greater than zero".into(),
            ));
        }
        for (token, overrides) in &self.funding.tokens {
            if overrides.collection_threshold == Some(0) || overrides.cold_threshold == Some(0) {
                return Err(WalletError::Config(format!(
                    "funding.tokens.{}: thresholds must be greater than zero",
                    token
                )));
            }
        }
        Ok(())
    }
}

/// Amounts routinely exceed 2^64, so accept both integers and decimal strings
mod amount {
    use super::*;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }

    fn parse<E: serde::de::Error>(raw: Raw) -> Result<Amount, E> {
        match raw {
            Raw::Int(v) => Ok(v as Amount),
            Raw::Text(s) => s
                .replace('_', "")
                .parse::<Amount>()
                .map_err(|e| E::custom(format!("invalid amount '{}': {}", s, e))),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Amount, D::Error> {
        parse(Raw::deserialize(d)?)
    }

    pub fn deserialize_opt<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Amount>, D::Error> {
        match Option::<Raw>::deserialize(d)? {
            Some(raw) => parse(raw).map(Some),
            None => Ok(None),
        }
    }
}
