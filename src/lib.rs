//! Pay-to-unlock settlement for an x402 content marketplace.
//!
//! A buyer's request for a protected prompt is settled through an external
//! facilitator ([`core::SettlementEngine`]); only a successful settlement lets
//! the caller open the prompt's [`vault::EncryptedBlob`] with the process-wide
//! [`vault::ContentVault`].
//!
//! - [`registry`] - supported chains and their payment tokens
//! - [`verifier`] - structural pre-flight check of payment proofs
//! - [`facilitator`] - settlement service boundary and its HTTP client
//! - [`retry`] - bounded exponential backoff
//! - [`quote`] - display quotes and payment-required terms
//! - [`config`] - environment and file configuration

pub mod config;
pub mod core;
pub mod facilitator;
pub mod quote;
pub mod registry;
pub mod retry;
pub mod types;
pub mod vault;
pub mod verifier;

pub use crate::core::{EngineError, SettlementEngine, UnlockGate, UnlockOutcome};
pub use crate::registry::ChainRegistry;
pub use crate::types::{ChainKey, PaymentRequest, PaymentResult, SettlementOutcome};
pub use crate::vault::{ContentVault, EncryptedBlob};
