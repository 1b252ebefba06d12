//! Outbound HTTP transport with a global in-flight limit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(120),
            user_agent: None,
            global_concurrency: 16,
        }
    }
}

/// A reply of any status; the body is kept so callers can read error text
/// the remote sends alongside a failure status.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub host: String,
    pub body: String,
}

impl FetchedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn error_for_status(self) -> Result<String, FetchError> {
        if self.is_success() {
            Ok(self.body)
        } else {
            Err(FetchError::HttpStatus {
                status: self.status,
                host: self.host,
            })
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} from {host}")]
    HttpStatus { status: u16, host: String },
    #[error("no base url configured")]
    MissingBaseUrl,
    #[error("transport limiter closed")]
    LimiterClosed,
}

/// Plain GET client. No retries: a failed call surfaces to the caller once.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
        })
    }

    /// GETs `base_url` with `query` appended and returns status and body.
    /// A non-2xx status is not an error here; see
    /// [`FetchedResponse::error_for_status`].
    ///
    /// Query values may carry credentials, so only the host is recorded in spans.
    pub async fn fetch_text(
        &self,
        base_url: &str,
        query: &[(String, String)],
    ) -> Result<FetchedResponse, FetchError> {
        if base_url.trim().is_empty() {
            return Err(FetchError::MissingBaseUrl);
        }
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::LimiterClosed)?;

        let host = host_of(base_url);
        let span = info_span!("http_fetch", host = %host);
        async {
            let resp = self.client.get(base_url).query(query).send().await?;
            let status = resp.status().as_u16();
            let body = resp.text().await?;
            debug!(status, bytes = body.len(), "fetched");
            Ok::<_, FetchError>(FetchedResponse {
                status,
                host: host.clone(),
                body,
            })
        }
        .instrument(span)
        .await
    }
}

fn host_of(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(ToString::to_string))
        .unwrap_or_else(|| "<invalid-url>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_is_extracted_without_query() {
        assert_eq!(host_of("https://dialer.example.com/vicidial/non_agent_api.php"), "dialer.example.com");
        assert_eq!(host_of("not a url"), "<invalid-url>");
    }

    #[test]
    fn non_success_status_becomes_http_status_error() {
        let response = FetchedResponse {
            status: 502,
            host: "dialer.example.com".into(),
            body: "Bad Gateway".into(),
        };
        assert!(!response.is_success());
        match response.error_for_status().unwrap_err() {
            FetchError::HttpStatus { status, host } => {
                assert_eq!(status, 502);
                assert_eq!(host, "dialer.example.com");
            }
            other => panic!("unexpected {other:?}"),
        }

        let ok = FetchedResponse {
            status: 200,
            host: "dialer.example.com".into(),
            body: "id|name".into(),
        };
        assert_eq!(ok.error_for_status().unwrap(), "id|name");
    }

    #[tokio::test]
    async fn empty_base_url_fails_before_sending() {
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).expect("client");
        let err = fetcher.fetch_text("  ", &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::MissingBaseUrl));
    }
}
