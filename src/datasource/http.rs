//! Authenticated, rate limited, retrying JSON-over-HTTP client.
//!
//! Used by the REST API and JIRA adapters.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use super::rate_limit::RateLimiter;
use super::{DataSourceError, DataSourceResult};

/// Install the ring crypto provider for rustls. Safe to call repeatedly.
pub fn init_crypto() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// How requests authenticate against the upstream API.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    Bearer,
    Basic,
    ApiKey,
}

impl AuthType {
    pub fn parse(s: &str) -> DataSourceResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(Self::None),
            "bearer" | "token" => Ok(Self::Bearer),
            "basic" => Ok(Self::Basic),
            "api_key" | "apikey" => Ok(Self::ApiKey),
            other => Err(DataSourceError::Config {
                message: format!("unknown auth type '{}'", other),
            }),
        }
    }
}

/// Resolved credentials.
#[derive(Debug, Clone)]
pub enum Auth {
    None,
    Bearer { token: String },
    Basic { username: String, password: String },
    ApiKey { header: String, key: String },
}

impl Auth {
    pub fn kind(&self) -> AuthType {
        match self {
            Auth::None => AuthType::None,
            Auth::Bearer { .. } => AuthType::Bearer,
            Auth::Basic { .. } => AuthType::Basic,
            Auth::ApiKey { .. } => AuthType::ApiKey,
        }
    }

    /// Default headers carrying the credentials (basic auth is applied per request).
    pub fn headers(&self) -> DataSourceResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        match self {
            Auth::Bearer { token } if !token.is_empty() => {
                headers.insert(AUTHORIZATION, header_value(&format!("Bearer {}", token))?);
            }
            Auth::ApiKey { header, key } if !key.is_empty() => {
                let name =
                    HeaderName::from_bytes(header.as_bytes()).map_err(|e| DataSourceError::Config {
                        message: format!("invalid API key header '{}': {}", header, e),
                    })?;
                headers.insert(name, header_value(key)?);
            }
            _ => {}
        }
        Ok(headers)
    }
}

fn header_value(value: &str) -> DataSourceResult<HeaderValue> {
    let mut value = HeaderValue::from_str(value).map_err(|e| DataSourceError::Config {
        message: format!("invalid header value: {}", e),
    })?;
    value.set_sensitive(true);
    Ok(value)
}

/// Retry settings for transient failures.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Delay before the second attempt; doubles every retry.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

fn is_retryable(error: &DataSourceError) -> bool {
    match error {
        DataSourceError::Connection { .. } => true,
        DataSourceError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
        _ => false,
    }
}

/// HTTP plumbing shared by API-backed adapters.
#[derive(Debug)]
pub struct HttpConnector {
    base_url: String,
    client: Client,
    auth: Auth,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl HttpConnector {
    pub fn new(
        base_url: &str,
        auth: Auth,
        timeout: Duration,
        requests_per_minute: usize,
        retry: RetryPolicy,
    ) -> DataSourceResult<Self> {
        if base_url.trim().is_empty() {
            return Err(DataSourceError::Config {
                message: "base_url must not be empty".to_string(),
            });
        }
        init_crypto();
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(auth.headers()?)
            .build()
            .map_err(|e| DataSourceError::Config {
                message: format!("failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            auth,
            limiter: RateLimiter::per_minute(requests_per_minute),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Absolute URL for an endpoint relative to the base URL.
    pub fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// GET an endpoint and decode JSON.
    pub async fn get_json(&self, endpoint: &str, query: &[(String, String)]) -> DataSourceResult<Value> {
        self.request_json(Method::GET, endpoint, query).await
    }

    /// Send a request, retrying transient failures with exponential backoff.
    pub async fn request_json(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(String, String)],
    ) -> DataSourceResult<Value> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;
            match self.send_once(method.clone(), endpoint, query).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < attempts && is_retryable(&e) => {
                    let delay = self.retry.delay(attempt);
                    warn!(
                        endpoint,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(
        &self,
        method: Method,
        endpoint: &str,
        query: &[(String, String)],
    ) -> DataSourceResult<Value> {
        let url = self.url(endpoint);
        debug!(%method, %url, "sending request");

        let mut request = self.client.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if let Auth::Basic { username, password } = &self.auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(DataSourceError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_type_parse() {
        assert_eq!(AuthType::parse("none").unwrap(), AuthType::None);
        assert_eq!(AuthType::parse("").unwrap(), AuthType::None);
        assert_eq!(AuthType::parse("Bearer").unwrap(), AuthType::Bearer);
        assert_eq!(AuthType::parse("api_key").unwrap(), AuthType::ApiKey);
        assert!(AuthType::parse("oauth").is_err());
    }

    #[test]
    fn test_bearer_header() {
        let auth = Auth::Bearer {
            token: "abc".to_string(),
        };
        let headers = auth.headers().unwrap();
        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer abc");
    }

    #[test]
    fn test_api_key_header() {
        let auth = Auth::ApiKey {
            header: "X-API-Key".to_string(),
            key: "secret".to_string(),
        };
        let headers = auth.headers().unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "secret");
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_empty_bearer_token_sends_no_header() {
        let auth = Auth::Bearer {
            token: String::new(),
        };
        assert!(auth.headers().unwrap().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn test_retry_delay_doubles() {
        let policy = RetryPolicy {
            attempts: 3,
            backoff: Duration::from_millis(100),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let connector = HttpConnector::new(
            "http://localhost:9/api/",
            Auth::None,
            Duration::from_secs(1),
            10,
            RetryPolicy {
                attempts: 1,
                backoff: Duration::ZERO,
            },
        )
        .unwrap();
        assert_eq!(connector.url("/users"), "http://localhost:9/api/users");
        assert_eq!(connector.url("users"), "http://localhost:9/api/users");
    }

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable(&DataSourceError::HttpStatus {
            status: 503,
            body: String::new()
        }));
        assert!(is_retryable(&DataSourceError::HttpStatus {
            status: 429,
            body: String::new()
        }));
        assert!(!is_retryable(&DataSourceError::HttpStatus {
            status: 404,
            body: String::new()
        }));
    }
}
