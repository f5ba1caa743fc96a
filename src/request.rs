use std::sync::Arc;
use std::time::Duration;

use reqwest::cookie::Jar;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::{Config, RetryPolicy};
use crate::{Result, USER_AGENT};

/// Per-call knobs for [`Transport::get`].
#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Read the body chunk by chunk instead of in one piece.
    pub stream: bool,
    /// Overrides the default spacing since the last request for this call only.
    pub min_interval: Option<Duration>,
    pub headers: HeaderMap,
}

impl GetOptions {
    pub fn stream(mut self) -> Self {
        self.stream = true;
        self
    }

    pub fn min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = Some(interval);
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }
}

/// A completed, fully read response.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl Fetched {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Why a single attempt did not produce a usable response.
enum Attempt {
    /// Not found, forbidden or rate limited. Retrying won't help.
    Permanent(StatusCode),
    /// The request could not even be built, e.g. an unparseable URL.
    Invalid(String),
    Transient(String),
}

/// Throttled HTTP GET with bounded exponential-backoff retries.
///
/// Never surfaces a failure as an error: after logging, every failure becomes `None`,
/// and callers skip that unit of work.
pub struct Transport {
    client: Client,
    jar: Arc<Jar>,
    default_headers: HeaderMap,
    interval: Duration,
    retry: RetryPolicy,
    last_request: Option<Instant>,
}

impl Transport {
    pub fn new(config: &Config, jar: Arc<Jar>) -> Result<Self> {
        let client = Client::builder()
            .cookie_provider(jar.clone())
            .user_agent(USER_AGENT)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            client,
            jar,
            default_headers: HeaderMap::new(),
            interval: config.interval,
            retry: config.retry,
            last_request: None,
        })
    }

    pub fn jar(&self) -> &Arc<Jar> {
        &self.jar
    }

    /// Header sent with every following request.
    pub fn set_default_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.default_headers.insert(name, value);
    }

    pub async fn get(&mut self, url: &str, opts: GetOptions) -> Option<Fetched> {
        self.throttle(opts.min_interval).await;

        let mut retry = 0;
        let outcome = loop {
            match self.attempt(url, &opts).await {
                Ok(fetched) => break Some(fetched),
                Err(Attempt::Permanent(status)) if status == StatusCode::NOT_FOUND => {
                    info!("{url} does not exist ({status})");
                    break None;
                }
                Err(Attempt::Permanent(status)) => {
                    warn!("{url} refused with {status}, not retrying");
                    break None;
                }
                Err(Attempt::Invalid(reason)) => {
                    warn!("Can't request {url:?}: {reason}");
                    break None;
                }
                Err(Attempt::Transient(reason)) if retry < self.retry.max_retries => {
                    let delay = self.retry.delay(retry);
                    retry += 1;
                    warn!(
                        "GET {url} failed: {reason}. Retry {retry}/{} in {delay:?}",
                        self.retry.max_retries
                    );
                    sleep(delay).await;
                }
                Err(Attempt::Transient(reason)) => {
                    warn!(
                        "GET {url} failed: {reason}. Giving up after {} attempts",
                        retry + 1
                    );
                    break None;
                }
            }
        };
        self.last_request = Some(Instant::now());
        outcome
    }

    async fn throttle(&self, min_interval: Option<Duration>) {
        let Some(last) = self.last_request else {
            return;
        };
        let interval = min_interval.unwrap_or(self.interval);
        let ready_at = last + interval;
        if ready_at > Instant::now() {
            debug!("throttling for {:?}", ready_at - Instant::now());
            tokio::time::sleep_until(ready_at).await;
        }
    }

    async fn attempt(
        &self,
        url: &str,
        opts: &GetOptions,
    ) -> core::result::Result<Fetched, Attempt> {
        let mut headers = self.default_headers.clone();
        headers.extend(opts.headers.clone());

        let mut res = self
            .client
            .get(url)
            .headers(headers)
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() {
                    Attempt::Invalid(e.to_string())
                } else {
                    Attempt::Transient(e.to_string())
                }
            })?;

        let status = res.status();
        if matches!(
            status,
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
        ) {
            return Err(Attempt::Permanent(status));
        }
        if !status.is_success() {
            return Err(Attempt::Transient(format!("status {status}")));
        }

        let declared = res
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let content_type = res
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = if opts.stream {
            let mut body = Vec::with_capacity(declared.unwrap_or(0));
            while let Some(chunk) = res
                .chunk()
                .await
                .map_err(|e| Attempt::Transient(e.to_string()))?
            {
                body.extend_from_slice(&chunk);
            }
            body
        } else {
            res.bytes()
                .await
                .map_err(|e| Attempt::Transient(e.to_string()))?
                .to_vec()
        };

        if let Some(declared) = declared {
            if declared != body.len() {
                return Err(Attempt::Transient(format!(
                    "received {} of {declared} bytes",
                    body.len()
                )));
            }
        }

        Ok(Fetched {
            content_type,
            body,
        })
    }
}
