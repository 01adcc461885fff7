//! FakeStore HTTP client

use super::types::FakeStoreProduct;
use crate::CatalogClient;
use async_trait::async_trait;
use chrono::Utc;
use favcache_core::{
    CachedProduct, CatalogConfig, CatalogError, ConfigError, FavcacheResult, ProductId,
};
use reqwest::{Client, StatusCode};

/// Catalog client for the FakeStore REST API.
#[derive(Clone)]
pub struct FakeStoreCatalogClient {
    client: Client,
    base_url: String,
}

impl FakeStoreCatalogClient {
    /// Create a client; the configured timeout applies to each request.
    pub fn new(config: &CatalogConfig) -> FavcacheResult<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "catalog_client".to_string(),
                value: config.base_url.clone(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn product_url(&self, id: ProductId) -> String {
        format!("{}/products/{}", self.base_url, id)
    }
}

#[async_trait]
impl CatalogClient for FakeStoreCatalogClient {
    async fn fetch_product(&self, id: ProductId) -> Result<Option<CachedProduct>, CatalogError> {
        let response = self
            .client
            .get(self.product_url(id))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            // Reported for logs only; the gateway's own schedule sets the backoff.
            let retry_after_ms = parse_retry_after_ms(response.headers()).unwrap_or(0);
            return Err(CatalogError::RateLimited { retry_after_ms });
        }
        if !status.is_success() {
            let reason = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(CatalogError::Unexpected {
                status: status.as_u16(),
                reason,
            });
        }

        let body = response.bytes().await.map_err(transport_error)?;
        // FakeStore answers unknown ids with 200 and an empty body.
        if body.iter().all(u8::is_ascii_whitespace) || body.as_ref() == b"null" {
            return Ok(None);
        }

        let wire: FakeStoreProduct =
            serde_json::from_slice(&body).map_err(|e| CatalogError::Malformed {
                reason: format!("Failed to parse product {}: {}", id, e),
            })?;
        wire.into_product(Utc::now()).map(Some)
    }
}

fn transport_error(e: reqwest::Error) -> CatalogError {
    if e.is_timeout() {
        CatalogError::Timeout
    } else {
        CatalogError::Unexpected {
            status: e.status().map(|s| s.as_u16()).unwrap_or(0),
            reason: format!("HTTP request failed: {}", e),
        }
    }
}

fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| (seconds * 1000.0) as u64)
}

impl std::fmt::Debug for FakeStoreCatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeStoreCatalogClient")
            .field("base_url", &self.base_url)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_parse_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after_ms(&headers), Some(1500));
    }

    #[test]
    fn test_parse_retry_after_rejects_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        assert_eq!(parse_retry_after_ms(&headers), None);
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let client = FakeStoreCatalogClient::new(&CatalogConfig {
            base_url: "http://catalog.local/".to_string(),
            ..CatalogConfig::default()
        })
        .unwrap();
        assert_eq!(client.product_url(5), "http://catalog.local/products/5");
    }
}
