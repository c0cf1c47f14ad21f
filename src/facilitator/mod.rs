use crate::types::NetworkDescriptor;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod http;

/// Message fragments that mark an opaque error as worth retrying.
const TRANSIENT_PATTERNS: [&str; 12] = [
    "network",
    "timeout",
    "timed out",
    "etimedout",
    "econnreset",
    "econnrefused",
    "connection",
    "socket hang up",
    "rate limit",
    "too many requests",
    "429",
    "temporary",
];

/// Failure raised by the facilitator boundary itself, as opposed to a settlement
/// status the facilitator reports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FacilitatorError {
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("invalid facilitator response: {0}")]
    InvalidResponse(String),
    /// Error from a source that only hands us a message.
    #[error("{0}")]
    Other(String),
}

impl FacilitatorError {
    /// Tags an opaque error message. Anything unrecognised stays `Other`, which is permanent.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("too many requests") || lower.contains("429")
        {
            FacilitatorError::RateLimited(message)
        } else if lower.contains("timeout") || lower.contains("timed out") || lower.contains("etimedout")
        {
            FacilitatorError::Timeout(message)
        } else if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
            FacilitatorError::Network(message)
        } else {
            FacilitatorError::Other(message)
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            FacilitatorError::Network(_)
            | FacilitatorError::Timeout(_)
            | FacilitatorError::RateLimited(_) => true,
            FacilitatorError::InvalidResponse(_) | FacilitatorError::Other(_) => false,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            FacilitatorError::Network(m)
            | FacilitatorError::Timeout(m)
            | FacilitatorError::RateLimited(m)
            | FacilitatorError::InvalidResponse(m)
            | FacilitatorError::Other(m) => m,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub description: String,
    pub mime_type: String,
    pub max_timeout_seconds: u64,
}

/// Payload of one settlement call. Re-submitted unchanged on every retry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SettleRequest {
    pub resource_url: String,
    pub method: String,
    pub payment_data: Option<String>,
    pub pay_to: String,
    pub network: NetworkDescriptor,
    pub price: String,
    pub route_config: RouteConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub status: u16,
    #[serde(default)]
    pub response_headers: HashMap<String, String>,
    #[serde(default)]
    pub response_body: Option<serde_json::Value>,
}

/// External service that verifies payment proofs and moves funds on-chain.
#[async_trait]
pub trait Facilitator: Send + Sync {
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, FacilitatorError>;
}
