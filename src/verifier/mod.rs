use crate::registry::RegistryError;
use crate::types::{ChainKey, VerificationResult};

pub mod evm;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerificationError {
    #[error("invalid chain: {0}")]
    InvalidChain(#[from] RegistryError),
}

/// Checks a caller-supplied payment proof before any value moves.
///
/// Implementations must be side-effect free: the same proof may be verified any
/// number of times for audit or pre-flight purposes.
pub trait PaymentVerifier: Send + Sync {
    fn verify(&self, proof: &str, chain_key: &str)
    -> Result<VerificationResult, VerificationError>;

    fn supports_chain(&self, chain_key: ChainKey) -> bool;
}
