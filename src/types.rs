/// Type definitions for global use.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Settlement networks this crate knows how to price and settle on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ChainKey {
    Base,
    BaseSepolia,
    Avalanche,
    AvalancheFuji,
    ArbitrumSepolia,
    Polygon,
}

impl ChainKey {
    pub const ALL: [ChainKey; 6] = [
        ChainKey::Base,
        ChainKey::BaseSepolia,
        ChainKey::Avalanche,
        ChainKey::AvalancheFuji,
        ChainKey::ArbitrumSepolia,
        ChainKey::Polygon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKey::Base => "base",
            ChainKey::BaseSepolia => "base-sepolia",
            ChainKey::Avalanche => "avalanche",
            ChainKey::AvalancheFuji => "avalanche-fuji",
            ChainKey::ArbitrumSepolia => "arbitrum-sepolia",
            ChainKey::Polygon => "polygon",
        }
    }

    pub fn get_standard_chain_id(&self) -> u64 {
        match self {
            ChainKey::Base => 8453,
            ChainKey::BaseSepolia => 84532,
            ChainKey::Avalanche => 43114,
            ChainKey::AvalancheFuji => 43113,
            ChainKey::ArbitrumSepolia => 421614,
            ChainKey::Polygon => 137,
        }
    }

    pub fn get_display_name(&self) -> &'static str {
        match self {
            ChainKey::Base => "Base",
            ChainKey::BaseSepolia => "Base Sepolia",
            ChainKey::Avalanche => "Avalanche C-Chain",
            ChainKey::AvalancheFuji => "Avalanche Fuji",
            ChainKey::ArbitrumSepolia => "Arbitrum Sepolia",
            ChainKey::Polygon => "Polygon",
        }
    }

    pub fn is_testnet(&self) -> bool {
        matches!(
            self,
            ChainKey::BaseSepolia | ChainKey::AvalancheFuji | ChainKey::ArbitrumSepolia
        )
    }

    /// Name of the environment variable that overrides this chain's RPC endpoint.
    pub fn rpc_env_var(&self) -> String {
        format!("RPC_{}", self.as_str().to_uppercase().replace('-', "_"))
    }

    /// Built-in profile for the chain.
    pub fn default_profile(&self) -> ChainProfile {
        let (rpc_endpoint, payment_token_address, token_kind, explorer_url) = match self {
            ChainKey::Base => (
                "https://mainnet.base.org",
                "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913",
                TokenKind::Native,
                "https://basescan.org",
            ),
            ChainKey::BaseSepolia => (
                "https://sepolia.base.org",
                "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
                TokenKind::Native,
                "https://sepolia.basescan.org",
            ),
            ChainKey::Avalanche => (
                "https://api.avax.network/ext/bc/C/rpc",
                "0xB97EF9Ef8734C71904D8002F8b6Bc66Dd9c48a6E",
                TokenKind::Native,
                "https://snowtrace.io",
            ),
            ChainKey::AvalancheFuji => (
                "https://api.avax-test.network/ext/bc/C/rpc",
                "0x5425890298aed601595a70AB815c96711a31Bc65",
                TokenKind::Native,
                "https://testnet.snowtrace.io",
            ),
            ChainKey::ArbitrumSepolia => (
                "https://sepolia-rollup.arbitrum.io/rpc",
                "0x75faf114eafb1BDbe2F0316DF893fd58CE46AA4d",
                TokenKind::Native,
                "https://sepolia.arbiscan.io",
            ),
            ChainKey::Polygon => (
                "https://polygon-rpc.com",
                "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174",
                TokenKind::Bridged,
                "https://polygonscan.com",
            ),
        };
        ChainProfile {
            numeric_id: self.get_standard_chain_id(),
            display_name: self.get_display_name().to_string(),
            rpc_endpoint: rpc_endpoint.to_string(),
            payment_token_address: payment_token_address.to_string(),
            token_kind,
            explorer_url: explorer_url.to_string(),
        }
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKey {
    type Err = UnknownChain;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ChainKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s.trim())
            .ok_or_else(|| UnknownChain(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown chain key: {0}")]
pub struct UnknownChain(pub String);

/// Whether the chain's payment token is the issuer's own deployment or a bridged copy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Native,
    Bridged,
}

impl TokenKind {
    pub fn currency_symbol(&self) -> &'static str {
        match self {
            TokenKind::Native => "USDC",
            TokenKind::Bridged => "USDC.e",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChainProfile {
    pub numeric_id: u64,
    pub display_name: String,
    pub rpc_endpoint: String,
    pub payment_token_address: String,
    pub token_kind: TokenKind,
    pub explorer_url: String,
}

/// Network descriptor handed to the facilitator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub id: u64,
    pub name: String,
    pub rpc: String,
}

impl From<&ChainProfile> for NetworkDescriptor {
    fn from(profile: &ChainProfile) -> Self {
        Self {
            id: profile.numeric_id,
            name: profile.display_name.clone(),
            rpc: profile.rpc_endpoint.clone(),
        }
    }
}

/// One incoming request for a protected resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub resource_url: String,
    pub http_method: String,
    pub payment_proof: Option<String>,
    pub chain_key: String,
    pub price: String,
    pub description: String,
    pub pay_to_address: String,
    pub category: Option<String>,
}

impl PaymentRequest {
    pub fn new(
        resource_url: impl Into<String>,
        http_method: impl Into<String>,
        chain_key: impl Into<String>,
        price: impl Into<String>,
        pay_to_address: impl Into<String>,
    ) -> Self {
        let resource_url = resource_url.into();
        Self {
            description: format!("Access to: {}", resource_url),
            resource_url,
            http_method: http_method.into(),
            payment_proof: None,
            chain_key: chain_key.into(),
            price: price.into(),
            pay_to_address: pay_to_address.into(),
            category: None,
        }
    }

    pub fn with_proof(mut self, proof: impl Into<String>) -> Self {
        self.payment_proof = Some(proof.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Terminal state a settlement attempt ended in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SettlementOutcome {
    /// Facilitator answered 200; value moved.
    Succeeded,
    /// Facilitator answered with any other status, payment-required included.
    Rejected,
    /// Permanent fault, or transient faults used up the attempt budget.
    Exhausted,
    /// Request failed validation; the facilitator was never called.
    Invalid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub success: bool,
    pub outcome: SettlementOutcome,
    pub status_code: u16,
    pub response_headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub metadata: Option<PaymentMetadata>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl PaymentResult {
    pub fn invalid(status_code: u16, error: impl Into<String>) -> Self {
        Self {
            success: false,
            outcome: SettlementOutcome::Invalid,
            status_code,
            response_headers: HashMap::new(),
            body: None,
            metadata: None,
            error: Some(error.into()),
            attempts: 0,
        }
    }

    pub fn is_payment_required(&self) -> bool {
        self.outcome == SettlementOutcome::Rejected && self.status_code == 402
    }
}

/// Audit record of a successful settlement.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMetadata {
    pub request_id: Uuid,
    pub transaction_ref: Option<String>,
    pub chain_id: u64,
    pub chain_name: String,
    pub price: String,
    pub description: String,
    pub category: Option<String>,
    pub timestamp_utc: DateTime<Utc>,
    pub pay_to_address: String,
    pub attempts: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub verified: bool,
    pub chain_id: u64,
    pub error: Option<String>,
}
