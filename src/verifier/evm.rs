/// Structural verification of EVM payment proofs.
use crate::registry::ChainRegistry;
use crate::types::{ChainKey, VerificationResult};
use crate::verifier::{PaymentVerifier, VerificationError};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Fields a decoded proof must expose before it is worth sending to settlement.
const REQUIRED_FIELDS: [&str; 3] = ["amount", "tokenAddress", "chainId"];

/// Required fields that are absent or falsy. A proof that is not a JSON object
/// is missing all of them.
fn missing_fields(decoded: &Value) -> Vec<&'static str> {
    match decoded {
        Value::Object(map) => REQUIRED_FIELDS
            .into_iter()
            .filter(|field| !map.get(*field).is_some_and(is_present))
            .collect(),
        _ => REQUIRED_FIELDS.to_vec(),
    }
}

fn claimed_chain_id(decoded: &Value) -> Option<u64> {
    match decoded.get("chainId")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

/// Decode the transport encoding of a payment header into JSON.
fn decode_proof(proof: &str) -> Option<Value> {
    let proof = proof.trim();
    [STANDARD, URL_SAFE, URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(proof).ok())
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
}

/// Presence check over a base64 JSON proof. Economic validity is left to settlement.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use x402_unlock::registry::ChainRegistry;
/// use x402_unlock::verifier::PaymentVerifier;
/// use x402_unlock::verifier::evm::EvmProofVerifier;
///
/// let verifier = EvmProofVerifier::new(Arc::new(ChainRegistry::with_defaults()));
/// let result = verifier.verify("not-a-proof", "base-sepolia").unwrap();
/// assert!(!result.verified);
/// ```
pub struct EvmProofVerifier {
    registry: Arc<ChainRegistry>,
}

impl EvmProofVerifier {
    pub fn new(registry: Arc<ChainRegistry>) -> Self {
        Self { registry }
    }
}

impl PaymentVerifier for EvmProofVerifier {
    fn verify(
        &self,
        proof: &str,
        chain_key: &str,
    ) -> Result<VerificationResult, VerificationError> {
        let (_, profile) = self.registry.lookup(chain_key)?;
        let chain_id = profile.numeric_id;

        let Some(decoded) = decode_proof(proof) else {
            debug!(chain = chain_key, "payment proof did not decode");
            return Ok(VerificationResult {
                verified: false,
                chain_id,
                error: Some("payment proof is not base64 encoded JSON".to_string()),
            });
        };
        let missing = missing_fields(&decoded);
        if !missing.is_empty() {
            return Ok(VerificationResult {
                verified: false,
                chain_id,
                error: Some(format!(
                    "payment proof missing required fields: {}",
                    missing.join(", ")
                )),
            });
        }
        if let Some(claimed) = claimed_chain_id(&decoded) {
            if claimed != chain_id {
                warn!(claimed, expected = chain_id, "payment proof names a different chain");
            }
        }
        Ok(VerificationResult {
            verified: true,
            chain_id,
            error: None,
        })
    }

    fn supports_chain(&self, chain_key: ChainKey) -> bool {
        self.registry.get(chain_key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryError;
    use serde_json::json;

    fn verifier() -> EvmProofVerifier {
        EvmProofVerifier::new(Arc::new(ChainRegistry::with_defaults()))
    }

    fn encode(value: Value) -> String {
        STANDARD.encode(value.to_string())
    }

    #[test]
    fn test_complete_proof_verifies() {
        let proof = encode(json!({
            "amount": "250000",
            "tokenAddress": "0x036CbD53842c5426634e7929541eC2318f3dCF7e",
            "chainId": 84532,
            "signature": "0xabc"
        }));
        let result = verifier().verify(&proof, "base-sepolia").unwrap();
        assert_eq!(
            result,
            VerificationResult {
                verified: true,
                chain_id: 84532,
                error: None
            }
        );
    }

    #[test]
    fn test_missing_fields_fail() {
        let proof = encode(json!({ "amount": "250000", "chainId": 84532 }));
        let result = verifier().verify(&proof, "base-sepolia").unwrap();
        assert!(!result.verified);
        assert!(result.error.unwrap().contains("tokenAddress"));

        let proof = encode(json!({ "amount": "", "tokenAddress": "0x1", "chainId": 84532 }));
        assert!(!verifier().verify(&proof, "base-sepolia").unwrap().verified);
    }

    #[test]
    fn test_undecodable_proof_fails() {
        let result = verifier().verify("%%%not-base64%%%", "base").unwrap();
        assert!(!result.verified);
        assert_eq!(result.chain_id, 8453);

        let not_json = STANDARD.encode("hello");
        assert!(!verifier().verify(&not_json, "base").unwrap().verified);

        let array = encode(json!([1, 2, 3]));
        assert!(!verifier().verify(&array, "base").unwrap().verified);
    }

    #[test]
    fn test_non_object_proofs_fail() {
        for body in [
            json!(["250000", "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", 8453]),
            json!(["junk", "junk", "junk"]),
            json!("amount tokenAddress chainId"),
            json!(8453),
        ] {
            let result = verifier().verify(&encode(body.clone()), "base").unwrap();
            assert!(!result.verified, "{body}");
            assert!(result.error.unwrap().contains("amount, tokenAddress, chainId"));
        }
    }

    #[test]
    fn test_url_safe_encoding_accepted() {
        let body = json!({
            "amount": 1, "tokenAddress": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913", "chainId": "8453"
        });
        let proof = URL_SAFE_NO_PAD.encode(body.to_string());
        assert!(verifier().verify(&proof, "base").unwrap().verified);
    }

    #[test]
    fn test_unknown_chain_errors() {
        let err = verifier().verify("e30=", "unknown-chain").unwrap_err();
        assert!(matches!(
            err,
            VerificationError::InvalidChain(RegistryError::UnknownChain(_))
        ));
    }

    #[test]
    fn test_verification_is_repeatable() {
        let verifier = verifier();
        let proof = encode(json!({ "amount": "1", "tokenAddress": "0xabc", "chainId": 137 }));
        let first = verifier.verify(&proof, "polygon").unwrap();
        let second = verifier.verify(&proof, "polygon").unwrap();
        assert_eq!(first, second);
        assert!(verifier.supports_chain(ChainKey::Polygon));
    }
}
