/// Static table of supported settlement networks.
use crate::types::{ChainKey, ChainProfile, UnknownChain};
use ethers::types::H160;
use serde::Serialize;
use std::collections::HashMap;
use std::str::FromStr;
use tracing::warn;

/// Shortest token address the registry accepts as configured.
pub const MIN_TOKEN_ADDRESS_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error(transparent)]
    UnknownChain(#[from] UnknownChain),
    #[error("no profile registered for chain {0}")]
    NotFound(ChainKey),
}

/// Outcome of checking one chain profile.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ChainValidation {
    pub valid: bool,
    pub errors: Vec<String>,
}

/// Read-only after construction; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ChainRegistry {
    profiles: HashMap<ChainKey, ChainProfile>,
}

impl ChainRegistry {
    pub fn empty() -> Self {
        Self {
            profiles: HashMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        Self {
            profiles: ChainKey::ALL
                .iter()
                .map(|key| (*key, key.default_profile()))
                .collect(),
        }
    }

    pub fn with_profile(mut self, key: ChainKey, profile: ChainProfile) -> Self {
        self.profiles.insert(key, profile);
        self
    }

    /// Replace the RPC endpoint of a registered chain. Unregistered chains are left alone.
    pub fn with_rpc_override(mut self, key: ChainKey, rpc_endpoint: impl Into<String>) -> Self {
        if let Some(profile) = self.profiles.get_mut(&key) {
            profile.rpc_endpoint = rpc_endpoint.into();
        }
        self
    }

    pub fn get(&self, key: ChainKey) -> Option<&ChainProfile> {
        self.profiles.get(&key)
    }

    pub fn lookup(&self, chain_key: &str) -> Result<(ChainKey, &ChainProfile), RegistryError> {
        let key = ChainKey::from_str(chain_key)?;
        let profile = self.get(key).ok_or(RegistryError::NotFound(key))?;
        Ok((key, profile))
    }

    pub fn validate(&self, chain_key: &str) -> ChainValidation {
        match self.lookup(chain_key) {
            Ok((_, profile)) => validate_profile(profile),
            Err(e) => ChainValidation {
                valid: false,
                errors: vec![e.to_string()],
            },
        }
    }

    pub fn supported_chains(&self) -> Vec<ChainKey> {
        let mut keys: Vec<ChainKey> = self.profiles.keys().copied().collect();
        keys.sort_by_key(|key| key.as_str());
        keys
    }
}

impl Default for ChainRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

pub fn validate_profile(profile: &ChainProfile) -> ChainValidation {
    let mut errors = Vec::new();
    if profile.payment_token_address.trim().len() < MIN_TOKEN_ADDRESS_LEN {
        errors.push(format!(
            "{}: payment token address missing or too short",
            profile.display_name
        ));
    }
    if profile.rpc_endpoint.trim().is_empty() {
        errors.push(format!("{}: rpc endpoint missing", profile.display_name));
    }
    if profile.numeric_id == 0 {
        errors.push(format!("{}: chain id must be positive", profile.display_name));
    }
    for (field, value) in [
        ("rpc endpoint", &profile.rpc_endpoint),
        ("explorer url", &profile.explorer_url),
    ] {
        if !value.is_empty() && url::Url::parse(value).is_err() {
            warn!(chain = %profile.display_name, field, "chain profile url does not parse");
        }
    }
    ChainValidation {
        valid: errors.is_empty(),
        errors,
    }
}

/// `0x` followed by exactly 40 hex digits.
pub fn is_address_shaped(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].chars().all(|c| c.is_ascii_hexdigit())
}

/// Parse a 20-byte hex address.
pub fn parse_address(address: &str) -> Option<H160> {
    if !is_address_shaped(address) {
        return None;
    }
    H160::from_str(address).ok()
}
