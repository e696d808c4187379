//! Remote sheet access for the roster pipeline: relay-rotating HTTP fetch,
//! an in-memory table cache, and the mutation gateway.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

mod cache;
mod mutation;

pub use cache::TableCache;
pub use mutation::{MutationError, MutationGateway, MutationResponse, MutationResult, MutationSink};

pub const CRATE_NAME: &str = "acad-storage";

/// Public CORS relays that forward a GET to the URL appended to their base.
pub const DEFAULT_RELAYS: &[&str] = &[
    "https://api.allorigins.win/raw?url=",
    "https://corsproxy.io/?url=",
    "https://api.codetabs.com/v1/proxy?quest=",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Per-attempt timeout.
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
    /// Extra pause after a relay answers 429.
    pub rate_limit_pause: Duration,
    /// Relay bases tried round-robin. An empty base fetches the target directly.
    pub relays: Vec<String>,
    pub export_base: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(8),
            user_agent: None,
            global_concurrency: 16,
            backoff: BackoffPolicy::default(),
            rate_limit_pause: Duration::from_secs(2),
            relays: DEFAULT_RELAYS.iter().map(ToString::to_string).collect(),
            export_base: acad_core::DEFAULT_EXPORT_BASE.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("no relay produced a usable body for {url} after {attempts} attempts")]
    Exhausted { url: String, attempts: usize },
}

/// Why a single relay attempt was abandoned.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RelayFailure {
    Transport(String),
    Status(u16),
    RateLimited,
    HtmlBody,
}

#[derive(Debug)]
pub struct RelayFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    relays: Vec<String>,
    next_relay: AtomicUsize,
    backoff: BackoffPolicy,
    rate_limit_pause: Duration,
    export_base: String,
}

impl RelayFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        let relays = if config.relays.is_empty() {
            vec![String::new()]
        } else {
            config.relays
        };

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            relays,
            next_relay: AtomicUsize::new(0),
            backoff: config.backoff,
            rate_limit_pause: config.rate_limit_pause,
            export_base: config.export_base,
        })
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn export_base(&self) -> &str {
        &self.export_base
    }

    fn current_relay(&self) -> (usize, &str) {
        let idx = self.next_relay.load(Ordering::Relaxed) % self.relays.len();
        (idx, self.relays[idx].as_str())
    }

    fn advance_relay(&self, from: usize) {
        let _ = self.next_relay.compare_exchange(
            from,
            (from + 1) % self.relays.len(),
            Ordering::Relaxed,
            Ordering::Relaxed,
        );
    }

    /// Fetch `target` through the relay pool. Rotates to the next relay on any
    /// failed attempt; the relay that succeeds stays selected for later calls.
    pub async fn fetch_text(&self, target: &str) -> Result<String, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .expect("semaphore not closed");

        let span = info_span!("http_fetch", url = target);
        async {
            for attempt in 0..self.backoff.max_attempts {
                if attempt > 0 {
                    tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                }

                let (relay_idx, relay) = self.current_relay();
                match self.attempt(relay, target).await {
                    Ok(body) => {
                        debug!(attempt, relay_idx, bytes = body.len(), "relay fetch ok");
                        return Ok(body);
                    }
                    Err(failure) => {
                        warn!(attempt, relay_idx, ?failure, "relay attempt failed");
                        if failure == RelayFailure::RateLimited {
                            tokio::time::sleep(self.rate_limit_pause).await;
                        }
                        self.advance_relay(relay_idx);
                    }
                }
            }

            Err(FetchError::Exhausted {
                url: target.to_string(),
                attempts: self.backoff.max_attempts,
            })
        }
        .instrument(span)
        .await
    }

    async fn attempt(&self, relay: &str, target: &str) -> Result<String, RelayFailure> {
        let url = relay_url(relay, target);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| RelayFailure::Transport(e.to_string()))?;

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(RelayFailure::RateLimited);
        }
        if !status.is_success() {
            return Err(RelayFailure::Status(status.as_u16()));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| RelayFailure::Transport(e.to_string()))?;
        if looks_like_html(&body) {
            return Err(RelayFailure::HtmlBody);
        }
        Ok(body)
    }

    /// Download binary content without relays (PDF exports, direct links).
    pub async fn fetch_bytes_direct(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .expect("semaphore not closed");

        let span = info_span!("http_fetch_direct", url);
        async {
            let mut last_request_error: Option<reqwest::Error> = None;

            for attempt in 0..self.backoff.max_attempts {
                match self.client.get(url).send().await {
                    Ok(resp) => {
                        let status = resp.status();
                        if status.is_success() {
                            return Ok(resp.bytes().await?.to_vec());
                        }

                        if classify_status(status) == RetryDisposition::Retryable
                            && attempt + 1 < self.backoff.max_attempts
                        {
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            continue;
                        }

                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: resp.url().to_string(),
                        });
                    }
                    Err(err) => {
                        if classify_reqwest_error(&err) == RetryDisposition::Retryable
                            && attempt + 1 < self.backoff.max_attempts
                        {
                            warn!(attempt, error = %err, "direct fetch failed; retrying");
                            last_request_error = Some(err);
                            tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                            continue;
                        }
                        return Err(FetchError::Request(err));
                    }
                }
            }

            match last_request_error {
                Some(err) => Err(FetchError::Request(err)),
                None => Err(FetchError::Exhausted {
                    url: url.to_string(),
                    attempts: self.backoff.max_attempts,
                }),
            }
        }
        .instrument(span)
        .await
    }
}

/// `<relay-base><url-encoded target>`, or the target itself for an empty base.
pub fn relay_url(relay: &str, target: &str) -> String {
    if relay.is_empty() {
        return target.to_string();
    }
    let encoded: String = url::form_urlencoded::byte_serialize(target.as_bytes()).collect();
    format!("{relay}{encoded}")
}

/// True when a body is an HTML document rather than the forwarded payload.
pub fn looks_like_html(body: &str) -> bool {
    let head: String = body
        .trim_start()
        .chars()
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// Rewrite a Drive share link (`/file/d/<id>/view`, `open?id=<id>`) to its
/// direct-download form. Other URLs pass through unchanged.
pub fn direct_download_url(link: &str) -> String {
    let Ok(parsed) = Url::parse(link.trim()) else {
        return link.to_string();
    };
    let is_drive = parsed
        .host_str()
        .map(|h| h.ends_with("drive.google.com"))
        .unwrap_or(false);
    if !is_drive {
        return link.to_string();
    }

    let segments: Vec<&str> = parsed
        .path_segments()
        .map(|s| s.filter(|p| !p.is_empty()).collect())
        .unwrap_or_default();
    let from_path = segments
        .windows(3)
        .find(|w| w[0] == "file" && w[1] == "d")
        .map(|w| w[2].to_string());
    let from_query = || {
        parsed
            .query_pairs()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.into_owned())
    };

    match from_path.or_else(from_query) {
        Some(id) => format!("https://drive.google.com/uc?export=download&id={id}"),
        None => link.to_string(),
    }
}
