/// Configuration module
use crate::registry::{ChainRegistry, is_address_shaped};
use crate::retry::RetryPolicy;
use crate::types::ChainKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

pub const ENCRYPTION_KEY_ENV: &str = "CONTENT_ENCRYPTION_KEY";
pub const PAY_TO_ENV: &str = "X402_PAY_TO_ADDRESS";
pub const FACILITATOR_URL_ENV: &str = "X402_FACILITATOR_URL";
pub const DEFAULT_CHAIN_ENV: &str = "X402_DEFAULT_CHAIN";
pub const MAX_TIMEOUT_ENV: &str = "X402_MAX_TIMEOUT_SECS";

/// Upper bound on how long a settlement may wait for on-chain confirmation.
pub const MAX_TIMEOUT_SECONDS: u64 = 3600;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UnlockConfig {
    /// Base64 encoded 32-byte content key. Never logged.
    #[serde(skip_serializing)]
    pub encryption_key: Option<String>,
    pub pay_to_address: String,
    pub facilitator_url: String,
    pub default_chain: ChainKey,
    pub max_timeout_seconds: u64,
    pub mime_type: String,
    pub retry: RetryPolicy,
    pub rpc_overrides: HashMap<ChainKey, String>,
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            pay_to_address: String::new(),
            facilitator_url: "https://x402.org/facilitator".to_string(),
            default_chain: ChainKey::BaseSepolia,
            max_timeout_seconds: MAX_TIMEOUT_SECONDS,
            mime_type: "application/json".to_string(),
            retry: RetryPolicy::default(),
            rpc_overrides: HashMap::new(),
        }
    }
}

impl fmt::Debug for UnlockConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockConfig")
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .field("pay_to_address", &self.pay_to_address)
            .field("facilitator_url", &self.facilitator_url)
            .field("default_chain", &self.default_chain)
            .field("max_timeout_seconds", &self.max_timeout_seconds)
            .field("mime_type", &self.mime_type)
            .field("retry", &self.retry)
            .field("rpc_overrides", &self.rpc_overrides)
            .finish()
    }
}

impl UnlockConfig {
    /// Checks everything a settlement needs. Failures here are fatal at startup.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_address_shaped(&self.pay_to_address) {
            return Err(ConfigError::InvalidConfig(format!(
                "pay-to address must be 0x followed by 40 hex digits, got {:?}",
                self.pay_to_address
            )));
        }
        url::Url::parse(&self.facilitator_url).map_err(|e| {
            ConfigError::InvalidConfig(format!("facilitator url {}: {}", self.facilitator_url, e))
        })?;
        if self.max_timeout_seconds == 0 || self.max_timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(ConfigError::InvalidConfig(format!(
                "max timeout must be between 1 and {} seconds",
                MAX_TIMEOUT_SECONDS
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "retry policy needs at least one attempt".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct ConfigManager {
    config: UnlockConfig,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_parts(UnlockConfig::default(), Self::load_environment_variables())
    }

    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::FileNotFound(path.to_string()),
            _ => ConfigError::IoError(e),
        })?;
        let config: UnlockConfig = serde_json::from_str(&content)?;
        Self::from_parts(config, Self::load_environment_variables())
    }

    pub fn from_config(config: UnlockConfig) -> Self {
        Self { config }
    }

    /// Layer `environment` over `config`. Environment values win.
    pub fn from_parts(
        mut config: UnlockConfig,
        environment: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        if let Some(key) = environment.get(ENCRYPTION_KEY_ENV) {
            config.encryption_key = Some(key.trim().to_string());
        }
        if let Some(address) = environment.get(PAY_TO_ENV) {
            config.pay_to_address = address.trim().to_string();
        }
        if let Some(url) = environment.get(FACILITATOR_URL_ENV) {
            config.facilitator_url = url.trim().to_string();
        }
        if let Some(chain) = environment.get(DEFAULT_CHAIN_ENV) {
            config.default_chain = ChainKey::from_str(chain)
                .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        }
        if let Some(secs) = environment.get(MAX_TIMEOUT_ENV) {
            config.max_timeout_seconds = secs.trim().parse().map_err(|_| {
                ConfigError::InvalidConfig(format!("{} is not a number: {}", MAX_TIMEOUT_ENV, secs))
            })?;
        }
        for key in ChainKey::ALL {
            if let Some(rpc) = environment.get(&key.rpc_env_var()) {
                config.rpc_overrides.insert(key, rpc.trim().to_string());
            }
        }
        Ok(Self { config })
    }

    pub fn get_config(&self) -> &UnlockConfig {
        &self.config
    }

    pub fn get_pay_to_address(&self) -> &str {
        &self.config.pay_to_address
    }

    /// Built-in chain table with this configuration's RPC overrides applied.
    pub fn chain_registry(&self) -> ChainRegistry {
        self.config
            .rpc_overrides
            .iter()
            .fold(ChainRegistry::with_defaults(), |registry, (key, rpc)| {
                registry.with_rpc_override(*key, rpc.clone())
            })
    }

    pub fn update_config<F>(&mut self, updater: F)
    where
        F: FnOnce(&mut UnlockConfig),
    {
        updater(&mut self.config);
    }

    fn load_environment_variables() -> HashMap<String, String> {
        std::env::vars()
            .filter(|(key, _)| {
                key.starts_with("X402_") || key.starts_with("RPC_") || key == ENCRYPTION_KEY_ENV
            })
            .collect()
    }
}

#[derive(Default)]
pub struct ConfigBuilder {
    config: UnlockConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_encryption_key(mut self, key: &str) -> Self {
        self.config.encryption_key = Some(key.to_string());
        self
    }

    pub fn with_pay_to_address(mut self, address: &str) -> Self {
        self.config.pay_to_address = address.to_string();
        self
    }

    pub fn with_facilitator_url(mut self, url: &str) -> Self {
        self.config.facilitator_url = url.to_string();
        self
    }

    pub fn with_default_chain(mut self, chain: ChainKey) -> Self {
        self.config.default_chain = chain;
        self
    }

    pub fn with_max_timeout(mut self, seconds: u64) -> Self {
        self.config.max_timeout_seconds = seconds;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn with_rpc_override(mut self, chain: ChainKey, rpc: &str) -> Self {
        self.config.rpc_overrides.insert(chain, rpc.to_string());
        self
    }

    pub fn build(self) -> UnlockConfig {
        self.config
    }
}
