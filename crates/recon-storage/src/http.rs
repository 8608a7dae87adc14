//! HTTP page client for the remote CRM/ERP APIs.

use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{info_span, warn, Instrument};
use uuid::Uuid;

/// What a failed page request means for the page walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageRetry {
    /// Throttling, gateway trouble or a dropped connection: ask for the same page again.
    Again,
    /// The remote refused the credentials; no retry can succeed.
    AuthRejected,
    /// The remote answered for good (unknown cursor, missing route).
    GiveUp,
}

pub fn classify_page_status(status: StatusCode) -> PageRetry {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PageRetry::AuthRejected,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => PageRetry::Again,
        status if status.is_server_error() => PageRetry::Again,
        _ => PageRetry::GiveUp,
    }
}

/// A page body cut off mid-transfer counts as transient, like a refused connection.
pub fn classify_transport_error(err: &reqwest::Error) -> PageRetry {
    if err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() {
        PageRetry::Again
    } else {
        PageRetry::GiveUp
    }
}

/// Seconds form of `Retry-After`; the HTTP-date form is ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Wait before re-asking for a page. A throttling hint from the remote replaces
    /// the doubling schedule; neither ever exceeds `max_delay`.
    pub fn delay_before_retry(&self, retry: usize, hinted: Option<Duration>) -> Duration {
        let doubled = u32::try_from(retry)
            .ok()
            .and_then(|r| 2u32.checked_pow(r))
            .map_or(self.max_delay, |factor| self.base_delay.saturating_mul(factor));
        hinted.unwrap_or(doubled).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

/// Caller-supplied credentials for a remote API.
#[derive(Debug, Clone, Default)]
pub enum Credentials {
    #[default]
    None,
    Bearer(String),
    Basic { user: String, password: String },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("credentials rejected with status {status} by {url}")]
    AuthRejected { status: u16, url: String },
    #[error("malformed page from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        Ok(Self {
            client: builder.build()?,
            backoff: config.backoff,
        })
    }

    /// GETs one page and decodes it, retrying transient failures with capped backoff.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        run_id: Uuid,
        url: &str,
        query: &[(String, String)],
        credentials: &Credentials,
    ) -> Result<T, FetchError> {
        let span = info_span!("http_fetch", %run_id, url);
        async move {
            let body = self.get_bytes(url, query, credentials).await?;
            serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
                url: url.to_string(),
                source,
            })
        }
        .instrument(span)
        .await
    }

    async fn get_bytes(
        &self,
        url: &str,
        query: &[(String, String)],
        credentials: &Credentials,
    ) -> Result<Vec<u8>, FetchError> {
        let mut retry = 0;
        loop {
            let mut request = self.client.get(url).query(query);
            request = match credentials {
                Credentials::None => request,
                Credentials::Bearer(token) => request.bearer_auth(token),
                Credentials::Basic { user, password } => request.basic_auth(user, Some(password)),
            };

            let (disposition, hinted, failure) = match request.send().await {
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(body) => return Ok(body.to_vec()),
                    Err(err) => (classify_transport_error(&err), None, FetchError::Request(err)),
                },
                Ok(resp) => {
                    let status = resp.status();
                    let url = resp.url().to_string();
                    let disposition = classify_page_status(status);
                    let failure = if disposition == PageRetry::AuthRejected {
                        FetchError::AuthRejected {
                            status: status.as_u16(),
                            url,
                        }
                    } else {
                        FetchError::HttpStatus {
                            status: status.as_u16(),
                            url,
                        }
                    };
                    (disposition, retry_after(resp.headers()), failure)
                }
                Err(err) => (classify_transport_error(&err), None, FetchError::Request(err)),
            };

            if disposition != PageRetry::Again || retry >= self.backoff.max_retries {
                return Err(failure);
            }
            let delay = self.backoff.delay_before_retry(retry, hinted);
            warn!(error = %failure, retry, delay_ms = delay.as_millis() as u64, "page request failed; retrying");
            tokio::time::sleep(delay).await;
            retry += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize)]
    struct Page {
        data: Vec<u32>,
    }

    fn fast_client() -> HttpFetcher {
        HttpFetcher::new(HttpClientConfig {
            backoff: BackoffPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn page_retry_delay_doubles_then_follows_throttling_hint() {
        let policy = BackoffPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        };

        assert_eq!(policy.delay_before_retry(0, None), Duration::from_millis(200));
        assert_eq!(policy.delay_before_retry(2, None), Duration::from_millis(800));
        assert_eq!(policy.delay_before_retry(4, None), Duration::from_secs(2));
        assert_eq!(policy.delay_before_retry(64, None), Duration::from_secs(2));
        assert_eq!(
            policy.delay_before_retry(0, Some(Duration::from_secs(1))),
            Duration::from_secs(1)
        );
        assert_eq!(
            policy.delay_before_retry(0, Some(Duration::from_secs(120))),
            Duration::from_secs(2)
        );
    }

    #[test]
    fn rejected_credentials_are_not_retried_but_throttling_is() {
        assert_eq!(classify_page_status(StatusCode::UNAUTHORIZED), PageRetry::AuthRejected);
        assert_eq!(classify_page_status(StatusCode::FORBIDDEN), PageRetry::AuthRejected);
        assert_eq!(classify_page_status(StatusCode::TOO_MANY_REQUESTS), PageRetry::Again);
        assert_eq!(classify_page_status(StatusCode::BAD_GATEWAY), PageRetry::Again);
        assert_eq!(classify_page_status(StatusCode::BAD_REQUEST), PageRetry::GiveUp);
    }

    #[test]
    fn retry_after_seconds_are_read_and_dates_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, "3".parse().unwrap());
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(3)));
        headers.insert(RETRY_AFTER, "Wed, 21 Oct 2026 07:28:00 GMT".parse().unwrap());
        assert_eq!(retry_after(&headers), None);
        assert_eq!(retry_after(&HeaderMap::new()), None);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_with_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/contracts"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/contracts"))
            .and(query_param("limit", "2"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": [1, 2]})))
            .mount(&server)
            .await;

        let page: Page = fast_client()
            .get_json(
                Uuid::nil(),
                &format!("{}/contracts", server.uri()),
                &[("limit".to_string(), "2".to_string())],
                &Credentials::Bearer("secret".into()),
            )
            .await
            .unwrap();
        assert_eq!(page.data, vec![1, 2]);
    }

    #[tokio::test]
    async fn throttled_page_is_asked_for_again() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": [7]})))
            .expect(1)
            .mount(&server)
            .await;

        let page: Page = fast_client()
            .get_json(Uuid::nil(), &server.uri(), &[], &Credentials::None)
            .await
            .unwrap();
        assert_eq!(page.data, vec![7]);
    }

    #[tokio::test]
    async fn rejected_credentials_fail_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let err = fast_client()
            .get_json::<Page>(Uuid::nil(), &server.uri(), &[], &Credentials::None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::AuthRejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn malformed_page_is_a_decode_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let err = fast_client()
            .get_json::<Page>(Uuid::nil(), &server.uri(), &[], &Credentials::None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }
}
