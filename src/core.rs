/// x402 Core module.
use crate::config::{ConfigError, ConfigManager};
use crate::facilitator::http::HttpFacilitator;
use crate::facilitator::{Facilitator, FacilitatorError, RouteConfig, SettleRequest, SettleResponse};
use crate::quote::{PaymentTerms, quote};
use crate::registry::{ChainRegistry, RegistryError, is_address_shaped, parse_address, validate_profile};
use crate::retry::{Attempt, RetryPolicy, retry_with_policy};
use crate::types::{
    NetworkDescriptor, PaymentMetadata, PaymentRequest, PaymentResult, SettlementOutcome,
    VerificationResult,
};
use crate::vault::{ContentVault, EncryptedBlob, VaultError};
use crate::verifier::evm::EvmProofVerifier;
use crate::verifier::{PaymentVerifier, VerificationError};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Response headers that carry the facilitator's settlement receipt.
const RECEIPT_HEADERS: [&str; 2] = ["x-payment-response", "payment-response"];

/// Drives one paid-unlock request through validation and settlement.
///
/// Stateless across calls: two concurrent settlements of the same resource are
/// not deduplicated here.
pub struct SettlementEngine {
    registry: Arc<ChainRegistry>,
    facilitator: Arc<dyn Facilitator>,
    retry: RetryPolicy,
    max_timeout_seconds: u64,
    mime_type: String,
}

impl SettlementEngine {
    pub fn new(registry: Arc<ChainRegistry>, facilitator: Arc<dyn Facilitator>) -> Self {
        Self {
            registry,
            facilitator,
            retry: RetryPolicy::default(),
            max_timeout_seconds: crate::config::MAX_TIMEOUT_SECONDS,
            mime_type: "application/json".to_string(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_timeout(mut self, seconds: u64) -> Self {
        self.max_timeout_seconds = seconds.min(crate::config::MAX_TIMEOUT_SECONDS);
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = mime_type.into();
        self
    }

    /// Build the facilitator payload, or the reason the request can never settle.
    fn prepare(&self, request: &PaymentRequest) -> Result<(SettleRequest, NetworkDescriptor), PaymentResult> {
        let (_, profile) = self
            .registry
            .lookup(&request.chain_key)
            .map_err(|e| PaymentResult::invalid(400, e.to_string()))?;

        let validation = validate_profile(profile);
        if !validation.valid {
            return Err(PaymentResult::invalid(
                500,
                format!("chain misconfigured: {}", validation.errors.join("; ")),
            ));
        }
        if parse_address(&profile.payment_token_address).is_none() {
            return Err(PaymentResult::invalid(
                500,
                format!(
                    "{}: payment token address is not a 20-byte hex address",
                    profile.display_name
                ),
            ));
        }
        if !is_address_shaped(&request.pay_to_address) {
            return Err(PaymentResult::invalid(
                500,
                "pay-to address must be 0x followed by 40 hex digits",
            ));
        }

        let network = NetworkDescriptor::from(profile);
        let payload = SettleRequest {
            resource_url: request.resource_url.clone(),
            method: request.http_method.clone(),
            payment_data: request.payment_proof.clone(),
            pay_to: request.pay_to_address.clone(),
            network: network.clone(),
            price: request.price.clone(),
            route_config: RouteConfig {
                description: request.description.clone(),
                mime_type: self.mime_type.clone(),
                max_timeout_seconds: self.max_timeout_seconds,
            },
        };
        Ok((payload, network))
    }

    /// Settle a payment for `request`. Never fails: every terminal state is a [`PaymentResult`].
    pub async fn settle(&self, request: &PaymentRequest) -> PaymentResult {
        let (payload, network) = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(rejection) => {
                warn!(
                    chain = %request.chain_key,
                    resource = %request.resource_url,
                    error = rejection.error.as_deref().unwrap_or_default(),
                    "settlement request failed validation"
                );
                return rejection;
            }
        };
        debug!(
            chain = %network.name,
            resource = %payload.resource_url,
            has_proof = payload.payment_data.is_some(),
            "settling payment"
        );

        let facilitator = &self.facilitator;
        let payload_ref = &payload;
        let retried = retry_with_policy(&self.retry, move |attempt| async move {
            debug!(attempt, "calling facilitator");
            match facilitator.settle(payload_ref).await {
                Ok(response) => Attempt::Done(response),
                Err(e) if e.is_transient() => Attempt::Transient(e),
                Err(e) => Attempt::Permanent(e),
            }
        })
        .await;

        match retried.result {
            Ok(response) if response.status == 200 => {
                self.succeeded(request, &network, response, retried.attempts)
            }
            Ok(response) => {
                info!(
                    status = response.status,
                    chain = %network.name,
                    resource = %payload.resource_url,
                    "facilitator declined settlement"
                );
                PaymentResult {
                    success: false,
                    outcome: SettlementOutcome::Rejected,
                    status_code: response.status,
                    response_headers: response.response_headers,
                    body: response.response_body,
                    metadata: None,
                    error: None,
                    attempts: retried.attempts,
                }
            }
            Err(e) => self.exhausted(e, retried.attempts),
        }
    }

    fn succeeded(
        &self,
        request: &PaymentRequest,
        network: &NetworkDescriptor,
        response: SettleResponse,
        attempts: u32,
    ) -> PaymentResult {
        let metadata = PaymentMetadata {
            request_id: Uuid::new_v4(),
            transaction_ref: extract_transaction_ref(&response.response_headers),
            chain_id: network.id,
            chain_name: network.name.clone(),
            price: request.price.clone(),
            description: request.description.clone(),
            category: request.category.clone(),
            timestamp_utc: Utc::now(),
            pay_to_address: request.pay_to_address.clone(),
            attempts,
        };
        info!(
            request_id = %metadata.request_id,
            chain = %metadata.chain_name,
            transaction = metadata.transaction_ref.as_deref().unwrap_or("-"),
            attempts,
            "payment settled"
        );
        PaymentResult {
            success: true,
            outcome: SettlementOutcome::Succeeded,
            status_code: 200,
            response_headers: response.response_headers,
            body: response.response_body,
            metadata: Some(metadata),
            error: None,
            attempts,
        }
    }

    fn exhausted(&self, err: FacilitatorError, attempts: u32) -> PaymentResult {
        error!(attempts, transient = err.is_transient(), error = %err, "payment settlement failed");
        PaymentResult {
            success: false,
            outcome: SettlementOutcome::Exhausted,
            status_code: 500,
            response_headers: HashMap::new(),
            body: None,
            metadata: None,
            error: Some(format!("Payment settlement failed: {}", err.message())),
            attempts,
        }
    }
}

/// Pull the on-chain transaction hash out of a base64 JSON settlement receipt header.
pub fn extract_transaction_ref(headers: &HashMap<String, String>) -> Option<String> {
    let receipt = headers
        .iter()
        .find(|(name, _)| RECEIPT_HEADERS.contains(&name.to_ascii_lowercase().as_str()))
        .map(|(_, value)| value)?;
    let decoded = STANDARD.decode(receipt.trim()).ok()?;
    let json: serde_json::Value = serde_json::from_slice(&decoded).ok()?;
    ["transaction", "txHash", "transactionHash"]
        .iter()
        .find_map(|field| json.get(field).and_then(|v| v.as_str()))
        .filter(|tx| !tx.is_empty())
        .map(str::to_string)
}

/// What a caller gets back from [`UnlockGate::unlock`].
#[derive(Debug)]
pub enum UnlockOutcome {
    Unlocked {
        content: String,
        metadata: PaymentMetadata,
    },
    /// Payment required, declined, or failed; the result carries status and terms.
    NotSettled(PaymentResult),
}

/// Core for gating protected content behind x402 settlement.
///
/// # Examples
///
/// ```rust,no_run
/// use x402_unlock::config::ConfigManager;
/// use x402_unlock::core::{UnlockGate, UnlockOutcome};
///
/// # async fn example(blob: x402_unlock::vault::EncryptedBlob) -> Result<(), Box<dyn std::error::Error>> {
/// let gate = UnlockGate::with_http_facilitator(ConfigManager::new()?)?;
///
/// let request = gate
///     .request("https://market.example.com/api/prompts/42/unlock", "POST", "base-sepolia", "$0.25")
///     .with_proof("eyJhbW91bnQiOiIyNTAwMDAifQ==");
///
/// match gate.unlock(&request, &blob).await? {
///     UnlockOutcome::Unlocked { content, metadata } => {
///         println!("unlocked {} bytes, tx {:?}", content.len(), metadata.transaction_ref);
///     }
///     UnlockOutcome::NotSettled(result) => {
///         // Return the facilitator's status and payment terms to the client
///         println!("status {}", result.status_code);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct UnlockGate {
    config_manager: ConfigManager,
    registry: Arc<ChainRegistry>,
    engine: SettlementEngine,
    verifier: EvmProofVerifier,
    vault: Result<ContentVault, VaultError>,
}

impl UnlockGate {
    pub fn new(
        config_manager: ConfigManager,
        facilitator: Arc<dyn Facilitator>,
    ) -> Result<Self, EngineError> {
        let config = config_manager.get_config();
        config.validate()?;

        let registry = Arc::new(config_manager.chain_registry());
        let default_chain = registry.validate(config.default_chain.as_str());
        if !default_chain.valid {
            return Err(EngineError::ConfigError(ConfigError::InvalidConfig(
                default_chain.errors.join("; "),
            )));
        }

        for key in registry.supported_chains() {
            let check = registry.validate(key.as_str());
            if !check.valid {
                warn!(
                    chain = %key,
                    errors = ?check.errors,
                    "chain profile misconfigured; settlements on it will be refused"
                );
            }
        }
        info!(
            default_chain = %config.default_chain,
            testnet = config.default_chain.is_testnet(),
            "unlock gate configured"
        );

        let vault = match config.encryption_key.as_deref() {
            Some(secret) => ContentVault::from_base64_key(secret),
            None => Err(VaultError::KeyMissing),
        };
        if let Err(e) = &vault {
            error!(error = %e, "content vault unavailable; unlocks will fail closed");
        }

        let engine = SettlementEngine::new(registry.clone(), facilitator)
            .with_retry_policy(config.retry)
            .with_max_timeout(config.max_timeout_seconds)
            .with_mime_type(config.mime_type.clone());
        let verifier = EvmProofVerifier::new(registry.clone());

        Ok(Self {
            config_manager,
            registry,
            engine,
            verifier,
            vault,
        })
    }

    pub fn with_http_facilitator(config_manager: ConfigManager) -> Result<Self, EngineError> {
        let config = config_manager.get_config();
        let facilitator =
            HttpFacilitator::new(&config.facilitator_url, config.max_timeout_seconds)?;
        Self::new(config_manager, Arc::new(facilitator))
    }

    /// Request for `resource_url` paying the configured destination address.
    pub fn request(
        &self,
        resource_url: &str,
        method: &str,
        chain_key: &str,
        price: &str,
    ) -> PaymentRequest {
        PaymentRequest::new(
            resource_url,
            method,
            chain_key,
            price,
            self.config_manager.get_pay_to_address(),
        )
    }

    /// Body of a payment-required response for `request`.
    pub fn payment_terms(&self, request: &PaymentRequest) -> Result<PaymentTerms, EngineError> {
        let quote = quote(&self.registry, &request.price, &request.chain_key)
            .ok_or_else(|| EngineError::UnknownChain(request.chain_key.clone()))?;
        Ok(PaymentTerms::from_quote(
            quote,
            &request.resource_url,
            &request.description,
            &request.pay_to_address,
            self.config_manager.get_config().max_timeout_seconds,
        ))
    }

    /// Structural check of the request's proof. Touches no state.
    pub fn preflight(&self, request: &PaymentRequest) -> Result<VerificationResult, EngineError> {
        match request.payment_proof.as_deref() {
            Some(proof) => Ok(self.verifier.verify(proof, &request.chain_key)?),
            None => {
                let (_, profile) = self.registry.lookup(&request.chain_key)?;
                Ok(VerificationResult {
                    verified: false,
                    chain_id: profile.numeric_id,
                    error: Some("no payment proof supplied".to_string()),
                })
            }
        }
    }

    pub async fn settle(&self, request: &PaymentRequest) -> PaymentResult {
        self.engine.settle(request).await
    }

    /// Settle `request`, then release the plaintext of `blob` only if value moved.
    pub async fn unlock(
        &self,
        request: &PaymentRequest,
        blob: &EncryptedBlob,
    ) -> Result<UnlockOutcome, EngineError> {
        let vault = self.vault()?;
        let result = self.engine.settle(request).await;
        let metadata = match (result.success, result.metadata.clone()) {
            (true, Some(metadata)) => metadata,
            _ => return Ok(UnlockOutcome::NotSettled(result)),
        };
        match vault.open(blob) {
            Ok(content) => Ok(UnlockOutcome::Unlocked { content, metadata }),
            Err(e) => {
                error!(
                    request_id = %metadata.request_id,
                    transaction = metadata.transaction_ref.as_deref().unwrap_or("-"),
                    "payment settled but content could not be opened"
                );
                Err(e.into())
            }
        }
    }

    pub fn seal(&self, plaintext: &str) -> Result<EncryptedBlob, EngineError> {
        Ok(self.vault()?.seal(plaintext)?)
    }

    pub fn key_configured(&self) -> bool {
        self.vault.is_ok()
    }

    pub fn registry(&self) -> &ChainRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &SettlementEngine {
        &self.engine
    }

    pub fn config_manager(&self) -> &ConfigManager {
        &self.config_manager
    }

    fn vault(&self) -> Result<&ContentVault, EngineError> {
        self.vault.as_ref().map_err(|e| EngineError::VaultError(e.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Vault error: {0}")]
    VaultError(#[from] VaultError),
    #[error("Verification error: {0}")]
    VerificationError(#[from] VerificationError),
    #[error("Registry error: {0}")]
    RegistryError(#[from] RegistryError),
    #[error("Facilitator error: {0}")]
    FacilitatorError(#[from] FacilitatorError),
    #[error("Chain not supported: {0}")]
    UnknownChain(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChainKey, ChainProfile, TokenKind};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    const PAY_TO: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";

    /// Replays scripted replies and records every payload it saw.
    struct ScriptedFacilitator {
        replies: Mutex<VecDeque<Result<SettleResponse, FacilitatorError>>>,
        seen: Mutex<Vec<SettleRequest>>,
    }

    impl ScriptedFacilitator {
        fn new(replies: Vec<Result<SettleResponse, FacilitatorError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Facilitator for ScriptedFacilitator {
        async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, FacilitatorError> {
            self.seen.lock().unwrap().push(request.clone());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FacilitatorError::Other("script exhausted".into())))
        }
    }

    fn ok_response(tx: Option<&str>) -> SettleResponse {
        let mut headers = HashMap::new();
        if let Some(tx) = tx {
            let receipt = serde_json::json!({ "success": true, "transaction": tx }).to_string();
            headers.insert("X-PAYMENT-RESPONSE".to_string(), STANDARD.encode(receipt));
        }
        SettleResponse {
            status: 200,
            response_headers: headers,
            response_body: Some(serde_json::json!({ "ok": true })),
        }
    }

    fn engine(facilitator: Arc<ScriptedFacilitator>) -> SettlementEngine {
        SettlementEngine::new(Arc::new(ChainRegistry::with_defaults()), facilitator)
    }

    fn request() -> PaymentRequest {
        PaymentRequest::new(
            "https://market.example.com/api/prompts/42/unlock",
            "POST",
            "base-sepolia",
            "$0.25",
            PAY_TO,
        )
        .with_proof("eyJhbW91bnQiOiIxIn0=")
        .with_category("prompt-unlock")
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_builds_metadata() {
        let facilitator = ScriptedFacilitator::new(vec![Ok(ok_response(Some("0xfeed")))]);
        let result = engine(facilitator.clone()).settle(&request()).await;

        assert!(result.success);
        assert_eq!(result.outcome, SettlementOutcome::Succeeded);
        assert_eq!(result.attempts, 1);
        let metadata = result.metadata.unwrap();
        assert_eq!(metadata.transaction_ref.as_deref(), Some("0xfeed"));
        assert_eq!(metadata.chain_id, 84532);
        assert_eq!(metadata.chain_name, "Base Sepolia");
        assert_eq!(metadata.price, "$0.25");
        assert_eq!(metadata.category.as_deref(), Some("prompt-unlock"));
        assert_eq!(metadata.pay_to_address, PAY_TO);

        let seen = facilitator.seen.lock().unwrap();
        assert_eq!(seen[0].route_config.max_timeout_seconds, 3600);
        assert_eq!(seen[0].network.id, 84532);
        assert_eq!(seen[0].payment_data.as_deref(), Some("eyJhbW91bnQiOiIxIn0="));
    }

    #[tokio::test(start_paused = true)]
    async fn test_payment_required_is_rejected_not_failed() {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let facilitator = ScriptedFacilitator::new(vec![Ok(SettleResponse {
            status: 402,
            response_headers: headers.clone(),
            response_body: Some(serde_json::json!({ "accepts": [{ "maxAmountRequired": "250000" }] })),
        })]);
        let result = engine(facilitator.clone())
            .settle(&PaymentRequest { payment_proof: None, ..request() })
            .await;

        assert!(!result.success);
        assert!(result.is_payment_required());
        assert_eq!(result.response_headers, headers);
        assert!(result.body.is_some());
        assert!(result.error.is_none());
        assert_eq!(facilitator.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_faults_retry_with_backoff() {
        let facilitator = ScriptedFacilitator::new(vec![
            Err(FacilitatorError::from_message("network timeout")),
            Err(FacilitatorError::from_message("network timeout")),
            Ok(ok_response(None)),
        ]);
        let start = tokio::time::Instant::now();
        let result = engine(facilitator.clone()).settle(&request()).await;

        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(facilitator.calls(), 3);
        assert!(start.elapsed() >= Duration::from_millis(3000));
        assert!(result.metadata.unwrap().transaction_ref.is_none());

        let seen = facilitator.seen.lock().unwrap();
        assert!(seen.iter().all(|payload| payload == &seen[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_fault_is_not_retried() {
        let facilitator = ScriptedFacilitator::new(vec![
            Err(FacilitatorError::from_message("invalid signature")),
            Ok(ok_response(None)),
        ]);
        let result = engine(facilitator.clone()).settle(&request()).await;

        assert!(!result.success);
        assert_eq!(result.outcome, SettlementOutcome::Exhausted);
        assert_eq!(result.status_code, 500);
        assert_eq!(result.attempts, 1);
        assert_eq!(facilitator.calls(), 1);
        assert!(result.error.unwrap().contains("invalid signature"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_budget_exhausted() {
        let facilitator = ScriptedFacilitator::new(vec![
            Err(FacilitatorError::RateLimited("429".into())),
            Err(FacilitatorError::Network("connection reset".into())),
            Err(FacilitatorError::Timeout("deadline".into())),
            Ok(ok_response(None)),
        ]);
        let result = engine(facilitator.clone()).settle(&request()).await;

        assert_eq!(result.outcome, SettlementOutcome::Exhausted);
        assert_eq!(result.attempts, 3);
        assert_eq!(facilitator.calls(), 3);
        assert_eq!(result.error.as_deref(), Some("Payment settlement failed: deadline"));
    }

    #[tokio::test]
    async fn test_short_pay_to_rejected_before_facilitator() {
        let facilitator = ScriptedFacilitator::new(vec![Ok(ok_response(None))]);
        let mut req = request();
        req.pay_to_address = PAY_TO[2..].to_string();
        assert_eq!(req.pay_to_address.len(), 40);

        let result = engine(facilitator.clone()).settle(&req).await;
        assert_eq!(result.outcome, SettlementOutcome::Invalid);
        assert_eq!(result.attempts, 0);
        assert_eq!(facilitator.calls(), 0);
    }

    #[tokio::test]
    async fn test_unknown_chain_rejected_before_facilitator() {
        let facilitator = ScriptedFacilitator::new(vec![Ok(ok_response(None))]);
        let mut req = request();
        req.chain_key = "unknown-chain".to_string();

        let result = engine(facilitator.clone()).settle(&req).await;
        assert_eq!(result.outcome, SettlementOutcome::Invalid);
        assert_eq!(result.status_code, 400);
        assert_eq!(facilitator.calls(), 0);
    }

    #[tokio::test]
    async fn test_malformed_token_address_rejected() {
        let facilitator = ScriptedFacilitator::new(vec![Ok(ok_response(None))]);
        let registry = ChainRegistry::with_defaults().with_profile(
            ChainKey::BaseSepolia,
            ChainProfile {
                numeric_id: 84532,
                display_name: "Base Sepolia".to_string(),
                rpc_endpoint: "https://sepolia.base.org".to_string(),
                payment_token_address: "not-an-address-at-all".to_string(),
                token_kind: TokenKind::Native,
                explorer_url: "https://sepolia.basescan.org".to_string(),
            },
        );
        let engine = SettlementEngine::new(Arc::new(registry), facilitator.clone());

        let result = engine.settle(&request()).await;
        assert_eq!(result.outcome, SettlementOutcome::Invalid);
        assert_eq!(result.status_code, 500);
        assert_eq!(facilitator.calls(), 0);
    }

    #[test]
    fn test_transaction_ref_extraction() {
        let mut headers = HashMap::new();
        assert_eq!(extract_transaction_ref(&headers), None);

        headers.insert("Payment-Response".to_string(), "%%%".to_string());
        assert_eq!(extract_transaction_ref(&headers), None);

        let receipt = serde_json::json!({ "txHash": "0xabc" }).to_string();
        headers.insert("Payment-Response".to_string(), STANDARD.encode(receipt));
        assert_eq!(extract_transaction_ref(&headers).as_deref(), Some("0xabc"));
    }
}
