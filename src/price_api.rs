//! External price API client.
//!
//! Batched token quotes (price, FDV, 24h volume, reserve, supply) from the
//! upstream screener API. The provider enforces a per-minute quota; 429
//! responses carry a retry-after hint that is honored before one retry.
//! Quota accounting itself lives in the scheduler's RefreshBudget - this
//! client only performs the transport.

use eyre::{eyre, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Timeout for quote requests
const API_TIMEOUT_SECS: u64 = 10;

/// Wait applied when a 429 arrives without a usable Retry-After header
const RATE_LIMIT_FALLBACK_SECS: u64 = 5;

/// One token's externally sourced market figures
#[derive(Debug, Clone, Deserialize)]
pub struct TokenQuote {
    pub address: String,
    #[serde(default)]
    pub price_usd: f64,
    #[serde(default)]
    pub fdv: f64,
    #[serde(default)]
    pub volume_24h: f64,
    #[serde(default)]
    pub reserve_usd: f64,
    #[serde(default)]
    pub total_supply: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    #[serde(default)]
    data: Vec<TokenQuote>,
}

pub struct PriceApiClient {
    http_client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl PriceApiClient {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .map_err(|e| eyre!("failed to create HTTP client: {}", e))?;

        Ok(Self {
            http_client,
            base_url,
            api_key,
        })
    }

    /// Fetch quotes for one batch of addresses (one quota unit upstream).
    /// Retries once after a rate-limit response, honoring its hint.
    pub async fn fetch_quotes(&self, addresses: &[String]) -> Result<Vec<TokenQuote>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), addresses.join(","));

        for attempt in 0..2 {
            let mut request = self.http_client.get(&url);
            if let Some(ref key) = self.api_key {
                request = request.header("x-api-key", key);
            }

            let response = request
                .send()
                .await
                .map_err(|e| eyre!("quote request failed: {}", e))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let wait = retry_after_secs(&response).unwrap_or(RATE_LIMIT_FALLBACK_SECS);
                if attempt == 0 {
                    warn!("price API rate limited, retrying in {}s", wait);
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    continue;
                }
                return Err(eyre!("price API rate limited twice for one batch"));
            }

            if !response.status().is_success() {
                return Err(eyre!("price API returned HTTP {}", response.status()));
            }

            let parsed: QuoteResponse = response
                .json()
                .await
                .map_err(|e| eyre!("undecodable quote response: {}", e))?;

            debug!(
                "price API: {} quotes for {} addresses",
                parsed.data.len(),
                addresses.len()
            );

            let mut quotes = parsed.data;
            for quote in &mut quotes {
                quote.address = quote.address.to_lowercase();
            }
            return Ok(quotes);
        }

        unreachable!("quote retry loop always returns")
    }
}

fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_defaults_for_sparse_payload() {
        let raw = r#"{"data":[{"address":"0xABCD"},{"address":"0xEF01","price_usd":1.5,"volume_24h":9000.0}]}"#;
        let parsed: QuoteResponse = serde_json::from_str(raw).unwrap();

        assert_eq!(parsed.data.len(), 2);
        assert_eq!(parsed.data[0].price_usd, 0.0);
        assert_eq!(parsed.data[0].fdv, 0.0);
        assert!(parsed.data[0].total_supply.is_none());
        assert_eq!(parsed.data[1].price_usd, 1.5);
        assert_eq!(parsed.data[1].volume_24h, 9000.0);
    }

    #[test]
    fn test_empty_body_is_zero_quotes() {
        let parsed: QuoteResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.data.is_empty());
    }
}
