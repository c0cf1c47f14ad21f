/// Facilitator reached over HTTP.
use crate::facilitator::{Facilitator, FacilitatorError, SettleRequest, SettleResponse};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Posts settlement requests as JSON to `<base_url>/settle`.
///
/// # Examples
///
/// ```rust
/// use x402_unlock::facilitator::http::HttpFacilitator;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let facilitator = HttpFacilitator::new("https://x402.org/facilitator", 3600)?;
/// assert_eq!(facilitator.settle_url().as_str(), "https://x402.org/facilitator/settle");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct HttpFacilitator {
    client: reqwest::Client,
    settle_url: Url,
}

impl HttpFacilitator {
    pub fn new(base_url: &str, max_timeout_seconds: u64) -> Result<Self, FacilitatorError> {
        let mut base = Url::parse(base_url)
            .map_err(|e| FacilitatorError::Other(format!("invalid facilitator url: {}", e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let settle_url = base
            .join("settle")
            .map_err(|e| FacilitatorError::Other(format!("invalid facilitator url: {}", e)))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(max_timeout_seconds))
            .build()
            .map_err(|e| FacilitatorError::Other(format!("failed to build http client: {}", e)))?;
        Ok(Self { client, settle_url })
    }

    pub fn settle_url(&self) -> &Url {
        &self.settle_url
    }
}

fn classify_transport(err: reqwest::Error) -> FacilitatorError {
    if err.is_timeout() {
        FacilitatorError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        FacilitatorError::Network(err.to_string())
    } else {
        FacilitatorError::from_message(err.to_string())
    }
}

/// Statuses the facilitator answers when it is briefly unable to settle.
fn transient_status(status: StatusCode, body: &str) -> Option<FacilitatorError> {
    let message = format!("facilitator returned {}: {}", status, body);
    match status {
        StatusCode::TOO_MANY_REQUESTS => Some(FacilitatorError::RateLimited(message)),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            Some(FacilitatorError::Network(message))
        }
        _ => None,
    }
}

fn copy_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

#[async_trait]
impl Facilitator for HttpFacilitator {
    /// A 2xx reply carries a [`SettleResponse`] envelope. Any other status except the
    /// transient ones is handed back as-is, so a payment-required answer keeps its
    /// headers and terms.
    async fn settle(&self, request: &SettleRequest) -> Result<SettleResponse, FacilitatorError> {
        debug!(url = %self.settle_url, resource = %request.resource_url, "posting settlement");
        let response = self
            .client
            .post(self.settle_url.clone())
            .json(request)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status();
        let response_headers = copy_headers(response.headers());
        let body = response.text().await.map_err(classify_transport)?;

        if status.is_success() {
            return serde_json::from_str(&body)
                .map_err(|e| FacilitatorError::InvalidResponse(e.to_string()));
        }
        if let Some(err) = transient_status(status, &body) {
            return Err(err);
        }
        debug!(status = status.as_u16(), "facilitator answered without settling");
        Ok(SettleResponse {
            status: status.as_u16(),
            response_headers,
            response_body: serde_json::from_str(&body).ok(),
        })
    }
}
