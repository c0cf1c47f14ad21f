/// Display quotes and payment-required terms.
use crate::registry::ChainRegistry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentQuote {
    pub price: String,
    pub price_usd: f64,
    pub currency: String,
    pub chain_id: u64,
    pub chain_name: String,
    pub token_address: String,
    pub explorer_url: String,
}

/// Parse a `$`-prefixed decimal price. Unparseable prices quote as zero.
pub fn parse_usd(price: &str) -> f64 {
    let trimmed = price.trim();
    let digits = trimmed.strip_prefix('$').unwrap_or(trimmed).trim();
    let end = digits
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(digits.len());
    digits[..end]
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Pairs a price with the chain it will settle on. `None` only for an unknown chain.
pub fn quote(registry: &ChainRegistry, price: &str, chain_key: &str) -> Option<PaymentQuote> {
    let (_, profile) = registry.lookup(chain_key).ok()?;
    Some(PaymentQuote {
        price: price.to_string(),
        price_usd: parse_usd(price),
        currency: profile.token_kind.currency_symbol().to_string(),
        chain_id: profile.numeric_id,
        chain_name: profile.display_name.clone(),
        token_address: profile.payment_token_address.clone(),
        explorer_url: profile.explorer_url.clone(),
    })
}

/// Machine-readable body of a payment-required response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentTerms {
    pub resource: String,
    pub description: String,
    pub price: String,
    pub price_usd: f64,
    pub currency: String,
    pub pay_to: String,
    pub chain_id: u64,
    pub chain_name: String,
    pub token_address: String,
    pub max_timeout_seconds: u64,
}

impl PaymentTerms {
    pub fn from_quote(
        quote: PaymentQuote,
        resource: &str,
        description: &str,
        pay_to: &str,
        max_timeout_seconds: u64,
    ) -> Self {
        Self {
            resource: resource.to_string(),
            description: description.to_string(),
            price: quote.price,
            price_usd: quote.price_usd,
            currency: quote.currency,
            pay_to: pay_to.to_string(),
            chain_id: quote.chain_id,
            chain_name: quote.chain_name,
            token_address: quote.token_address,
            max_timeout_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_base_sepolia() {
        let registry = ChainRegistry::with_defaults();
        let quote = quote(&registry, "$0.25", "base-sepolia").unwrap();
        assert_eq!(quote.price_usd, 0.25);
        assert_eq!(quote.currency, "USDC");
        assert_eq!(quote.chain_id, 84532);
        assert_eq!(quote.chain_name, "Base Sepolia");
        assert_eq!(quote.token_address, "0x036CbD53842c5426634e7929541eC2318f3dCF7e");
        assert_eq!(quote.explorer_url, "https://sepolia.basescan.org");
    }

    #[test]
    fn test_quote_unknown_chain() {
        let registry = ChainRegistry::with_defaults();
        assert!(quote(&registry, "$0.25", "unknown-chain").is_none());
    }

    #[test]
    fn test_bridged_chain_currency() {
        let registry = ChainRegistry::with_defaults();
        assert_eq!(quote(&registry, "$1", "polygon").unwrap().currency, "USDC.e");
    }

    #[test]
    fn test_parse_usd() {
        assert_eq!(parse_usd("$0.25"), 0.25);
        assert_eq!(parse_usd(" $10 "), 10.0);
        assert_eq!(parse_usd("0.5"), 0.5);
        assert_eq!(parse_usd("$1.50 USD"), 1.5);
        assert_eq!(parse_usd("free"), 0.0);
        assert_eq!(parse_usd("$"), 0.0);
    }

    #[test]
    fn test_quote_is_deterministic() {
        let registry = ChainRegistry::with_defaults();
        assert_eq!(
            quote(&registry, "$0.01", "avalanche-fuji"),
            quote(&registry, "$0.01", "avalanche-fuji")
        );
    }
}
