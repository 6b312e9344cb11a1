//! Concurrent HTTP accessibility probing for extracted links.
//!
//! The probe is built to classify, not to fetch: it tries HEAD first, falls
//! back to a 1 KiB ranged GET, and only then a plain GET, presenting a
//! browser-like header profile throughout so bot-detection layers treat it
//! like ordinary traffic. Network failure is never an error at this layer;
//! every outcome is recorded in a [`ValidationResult`].

pub mod dataset;
pub mod headers;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, RANGE};
use reqwest::{Client, Method, StatusCode, redirect};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace, warn};

use crate::pool::{CancelToken, WorkerPool};
use self::dataset::{DatasetSignals, dataset_score, is_dataset};
use self::headers::{browser_headers, next_user_agent};

/// Default per-request deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default batch concurrency.
pub const DEFAULT_CONCURRENCY: usize = 5;

/// Maximum redirect hops followed per probe.
const MAX_REDIRECTS: usize = 10;

/// Bytes requested by the ranged-GET fallback.
const RANGE_PROBE_BYTES: u64 = 1024;

/// Outcome of probing one URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// True when a probe method returned a non-error status.
    pub accessible: bool,
    /// Final HTTP status code, when any response was received.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Content-Type of the accepted response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Content-Length of the accepted response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
    /// Last-Modified header, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// ETag header, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Server header, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// URL after following redirects.
    pub final_url: String,
    /// Every URL visited along the redirect chain, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub redirect_chain: Vec<String>,
    /// Wall-clock time for the accepted (or final failed) attempt.
    pub response_time: Duration,
    /// Probe method that produced the outcome: HEAD, GET (Range), or GET.
    pub request_method: String,
    /// True when the dataset score crosses the threshold.
    pub is_dataset: bool,
    /// Dataset-likelihood score in [0, 1].
    pub dataset_score: f64,
    /// Transport-level error, when no response was received at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    fn failure(url: &str, method: &str, elapsed: Duration, error: String) -> Self {
        Self {
            accessible: false,
            status_code: None,
            content_type: None,
            content_length: None,
            last_modified: None,
            etag: None,
            server: None,
            final_url: url.to_string(),
            redirect_chain: Vec::new(),
            response_time: elapsed,
            request_method: method.to_string(),
            is_dataset: false,
            dataset_score: 0.0,
            error: Some(error),
        }
    }
}

/// Browser-impersonating URL probe with bounded concurrency.
///
/// Cloning shares the underlying connection pool.
#[derive(Debug, Clone)]
pub struct LinkValidator {
    client: Client,
    timeout: Duration,
}

impl LinkValidator {
    /// Creates a validator with the default 15 second request deadline.
    ///
    /// # Errors
    ///
    /// Returns the underlying builder error when TLS initialization fails.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a validator with an explicit per-request deadline.
    ///
    /// Redirects are followed manually so the chain can be recorded and
    /// the original headers re-applied on every hop.
    ///
    /// # Errors
    ///
    /// Returns the underlying builder error when TLS initialization fails.
    pub fn with_timeout(timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .gzip(true)
            .build()?;
        Ok(Self { client, timeout })
    }

    /// Probes a single URL and classifies the outcome.
    ///
    /// Never returns an error; transport failures are recorded in the
    /// result's `error` field.
    #[instrument(skip(self), fields(url))]
    pub async fn validate_url(&self, url: &str) -> ValidationResult {
        let user_agent = next_user_agent();
        let base_headers = browser_headers(user_agent);
        let start = Instant::now();

        // 1. HEAD: no body transferred at all.
        let head = self
            .send_with_redirects(Method::HEAD, url, base_headers.clone())
            .await;
        match head {
            Ok(probe) if probe.status.as_u16() < 400 => {
                return self.accept(url, probe, "HEAD", start);
            }
            Ok(probe) => {
                trace!(status = probe.status.as_u16(), "HEAD rejected, trying ranged GET");
            }
            Err(error) => {
                trace!(%error, "HEAD failed, trying ranged GET");
            }
        }

        // 2. GET with a 1 KiB range: classification with minimal transfer.
        let mut range_headers = base_headers.clone();
        if let Ok(value) = HeaderValue::from_str(&format!("bytes=0-{}", RANGE_PROBE_BYTES - 1)) {
            range_headers.insert(RANGE, value);
        }
        match self
            .send_with_redirects(Method::GET, url, range_headers)
            .await
        {
            Ok(probe) if probe.status.as_u16() < 400 => {
                return self.accept(url, probe, "GET (Range)", start);
            }
            Ok(probe) => {
                trace!(status = probe.status.as_u16(), "ranged GET rejected, trying plain GET");
            }
            Err(error) => {
                trace!(%error, "ranged GET failed, trying plain GET");
            }
        }

        // 3. Plain GET: last resort; the body is dropped unread.
        match self.send_with_redirects(Method::GET, url, base_headers).await {
            Ok(probe) => self.accept(url, probe, "GET", start),
            Err(error) => {
                debug!(url, %error, "all probe methods failed");
                ValidationResult::failure(url, "GET", start.elapsed(), error)
            }
        }
    }

    /// Probes a URL, returning early with a failure record on cancellation.
    pub async fn validate_url_cancellable(
        &self,
        url: &str,
        cancel: &CancelToken,
    ) -> ValidationResult {
        tokio::select! {
            result = self.validate_url(url) => result,
            () = cancel.cancelled() => {
                ValidationResult::failure(url, "HEAD", Duration::ZERO, "cancelled".to_string())
            }
        }
    }

    /// Probes a set of URLs concurrently.
    ///
    /// Results are keyed by the input URL; completion order is not
    /// guaranteed. `concurrency` is clamped to a minimum of 1.
    #[instrument(skip(self, urls, cancel), fields(count = urls.len()))]
    pub async fn validate_batch(
        &self,
        urls: Vec<String>,
        concurrency: usize,
        cancel: CancelToken,
    ) -> HashMap<String, ValidationResult> {
        let validator = Arc::new(self.clone());
        let worker_cancel = cancel.clone();

        let mut pool = WorkerPool::start_with_cancel(
            concurrency.max(1),
            move |url: String| {
                let validator = Arc::clone(&validator);
                let cancel = worker_cancel.clone();
                async move {
                    let result = validator.validate_url_cancellable(&url, &cancel).await;
                    Ok::<_, String>((url, result))
                }
            },
            cancel,
        );

        let total = urls.len();
        for url in urls {
            if pool.submit(url).await.is_err() {
                warn!("validation pool closed early");
                break;
            }
        }
        pool.close();

        let mut results = HashMap::with_capacity(total);
        for outcome in pool.collect().await {
            if let Ok((url, record)) = outcome.result {
                results.insert(url, record);
            }
        }
        results
    }

    fn accept(
        &self,
        url: &str,
        probe: ProbeResponse,
        method: &str,
        start: Instant,
    ) -> ValidationResult {
        let signals = DatasetSignals {
            url: &probe.final_url,
            content_type: probe.content_type.as_deref(),
            content_length: probe.content_length,
            content_disposition: probe.content_disposition.as_deref(),
        };
        let score = dataset_score(&signals);
        let accessible = probe.status.as_u16() < 400;

        debug!(
            url,
            status = probe.status.as_u16(),
            method,
            score,
            "probe classified"
        );

        ValidationResult {
            accessible,
            status_code: Some(probe.status.as_u16()),
            content_type: probe.content_type,
            content_length: probe.content_length,
            last_modified: probe.last_modified,
            etag: probe.etag,
            server: probe.server,
            final_url: probe.final_url,
            redirect_chain: probe.redirect_chain,
            response_time: start.elapsed(),
            request_method: method.to_string(),
            is_dataset: accessible && is_dataset(score),
            dataset_score: score,
            error: None,
        }
    }

    /// Sends a request, following up to [`MAX_REDIRECTS`] hops manually
    /// with the original headers cloned onto each hop.
    async fn send_with_redirects(
        &self,
        method: Method,
        url: &str,
        headers: HeaderMap,
    ) -> Result<ProbeResponse, String> {
        let mut current = url.to_string();
        let mut chain = Vec::new();

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .client
                .request(method.clone(), &current)
                .headers(headers.clone())
                .timeout(self.timeout)
                .send()
                .await
                .map_err(|e| e.to_string())?;

            let status = response.status();
            if status.is_redirection() {
                let Some(location) = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                else {
                    return Ok(ProbeResponse::from_response(&response, current, chain));
                };
                let next = response
                    .url()
                    .join(location)
                    .map_err(|e| format!("bad redirect location '{location}': {e}"))?;
                chain.push(current.clone());
                current = next.to_string();
                continue;
            }

            return Ok(ProbeResponse::from_response(&response, current, chain));
        }

        Err(format!("redirect chain exceeded {MAX_REDIRECTS} hops"))
    }
}

/// Header snapshot taken from a probe response.
struct ProbeResponse {
    status: StatusCode,
    content_type: Option<String>,
    content_length: Option<u64>,
    content_disposition: Option<String>,
    last_modified: Option<String>,
    etag: Option<String>,
    server: Option<String>,
    final_url: String,
    redirect_chain: Vec<String>,
}

impl ProbeResponse {
    fn from_response(
        response: &reqwest::Response,
        final_url: String,
        redirect_chain: Vec<String>,
    ) -> Self {
        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        // Content-Length from headers rather than reqwest's helper, which
        // reports the decoded length for compressed responses.
        let content_length = response
            .headers()
            .get(reqwest::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());

        Self {
            status: response.status(),
            content_type: header(reqwest::header::CONTENT_TYPE),
            content_length,
            content_disposition: header(reqwest::header::CONTENT_DISPOSITION),
            last_modified: header(reqwest::header::LAST_MODIFIED),
            etag: header(reqwest::header::ETAG),
            server: header(reqwest::header::SERVER),
            final_url,
            redirect_chain,
        }
    }
}

// ==================== Confidence rewrite policy ====================

/// Rewrites a link's confidence from its probe outcome.
///
/// Accessible datasets earn at most a 1.1x boost (capped at 1.0);
/// accessible non-datasets are left unchanged; error statuses are scaled
/// down and capped by class.
#[must_use]
pub fn rewrite_confidence(result: &ValidationResult, confidence: f64) -> f64 {
    if result.accessible {
        return if result.is_dataset {
            (confidence * 1.1).min(1.0)
        } else {
            confidence
        };
    }

    match result.status_code {
        Some(404) => (confidence * 0.1).min(0.15),
        Some(403) => (confidence * 0.6).min(0.7),
        Some(status) if (500..600).contains(&status) => (confidence * 0.7).min(0.8),
        Some(status) if (400..500).contains(&status) => (confidence * 0.3).min(0.4),
        _ => (confidence * 0.5).min(0.6),
    }
}
