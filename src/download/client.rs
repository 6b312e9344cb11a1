//! Shared HTTP plumbing for source adapters.
//!
//! One [`RepoClient`] per adapter wraps a pooled `reqwest` client with the
//! adapter's rate limiter and retry policy. File downloads stream to a
//! `.part` sidecar with an incremental SHA-256, then rename into place, so
//! an interrupted transfer never leaves a plausible-looking final file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{CONTENT_TYPE, RANGE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use std::sync::LazyLock;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, instrument, trace, warn};

use super::error::DownloadError;
use super::rate_limiter::{RateLimiter, parse_retry_after};
use super::retry::RetryPolicy;
use crate::pool::CancelToken;

/// Deadline for metadata and listing calls.
const METADATA_TIMEOUT: Duration = Duration::from_secs(30);

/// Connect timeout for all adapter traffic.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Read timeout for large file transfers.
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(600);

/// Checksum algorithm tag recorded with every file.
pub const CHECKSUM_ALGORITHM: &str = "sha256";

/// Project URL for User-Agent identification.
const PROJECT_UA_URL: &str = "https://github.com/btraven00/hapiq";

/// Tool-identifying User-Agent for repository API traffic.
#[must_use]
pub(crate) fn repo_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("hapiq/{version} (dataset-retrieval-tool; +{PROJECT_UA_URL})")
}

/// A fully written file with its integrity record.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    /// Final path on disk.
    pub path: PathBuf,
    /// Bytes written.
    pub size: u64,
    /// SHA-256 hex digest of the file content.
    pub checksum: String,
    /// Content-Type the server reported, when any.
    pub content_type: Option<String>,
    /// True when the transfer appended to a partial file.
    pub resumed: bool,
}

/// Rate-limited, retrying HTTP client shared by one adapter.
#[derive(Debug, Clone)]
pub struct RepoClient {
    client: Client,
    limiter: RateLimiter,
    retry: RetryPolicy,
}

impl RepoClient {
    /// Creates a client for the given endpoint class and request rate.
    ///
    /// # Errors
    ///
    /// Returns the builder error when TLS initialization fails.
    pub fn new(endpoint_class: &str, requests_per_sec: f64) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .user_agent(repo_user_agent())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(TRANSFER_TIMEOUT)
            .pool_max_idle_per_host(10)
            .gzip(true)
            .build()
            .map_err(|e| DownloadError::network("client construction", e.to_string()))?;
        Ok(Self {
            client,
            limiter: RateLimiter::per_second(endpoint_class, requests_per_sec),
            retry: RetryPolicy::default(),
        })
    }

    /// Fetches a text body (API responses, directory listings).
    ///
    /// Rate-limited and retried; non-success statuses become errors.
    ///
    /// # Errors
    ///
    /// [`DownloadError::HttpStatus`] for non-2xx responses,
    /// [`DownloadError::Network`] for transport failures surviving retries.
    #[instrument(skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String, DownloadError> {
        self.retry
            .run("get_text", || async {
                self.limiter.acquire().await;
                let response = self
                    .client
                    .get(url)
                    .timeout(METADATA_TIMEOUT)
                    .send()
                    .await
                    .map_err(|e| DownloadError::network(url, e.to_string()))?;
                let status = response.status();
                if status == StatusCode::TOO_MANY_REQUESTS {
                    // Honor the server's Retry-After before the policy's
                    // own backoff kicks in.
                    if let Some(delay) = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(parse_retry_after)
                    {
                        debug!(url, delay_secs = delay.as_secs(), "server rate limited");
                        tokio::time::sleep(delay).await;
                    }
                    return Err(DownloadError::network(url, "temporary failure: HTTP 429"));
                }
                if !status.is_success() {
                    return Err(status_error(url, status));
                }
                response
                    .text()
                    .await
                    .map_err(|e| DownloadError::network(url, e.to_string()))
            })
            .await
    }

    /// Probes a URL with HEAD; true for any non-error status.
    ///
    /// Used to decide whether to descend into per-sample subdirectories.
    #[instrument(skip(self))]
    pub async fn head_ok(&self, url: &str) -> bool {
        self.limiter.acquire().await;
        match self
            .client
            .head(url)
            .timeout(METADATA_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response.status().as_u16() < 400,
            Err(error) => {
                trace!(url, %error, "HEAD probe failed");
                false
            }
        }
    }

    /// Streams a URL to `dest`, computing SHA-256 along the way.
    ///
    /// Content is written to `<dest>.part` and renamed on completion. With
    /// `resume`, an existing `.part` file is extended via a Range request
    /// when the server honors it. Cancellation aborts the transfer, closes
    /// the writer, and removes the partial file.
    ///
    /// # Errors
    ///
    /// [`DownloadError::Cancelled`] on cancellation; otherwise transport,
    /// status, or IO errors.
    #[instrument(skip(self, cancel, on_progress), fields(dest = %dest.display()))]
    pub async fn download_to_file(
        &self,
        url: &str,
        dest: &Path,
        resume: bool,
        cancel: &CancelToken,
        mut on_progress: impl FnMut(u64) + Send,
    ) -> Result<DownloadedFile, DownloadError> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let part_path = part_path_for(dest);
        let existing = if resume {
            tokio::fs::metadata(&part_path).await.ok().map(|m| m.len())
        } else {
            None
        };

        self.limiter.acquire().await;

        let mut request = self.client.get(url);
        if let Some(offset) = existing.filter(|&len| len > 0) {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = tokio::select! {
            response = request.send() => {
                response.map_err(|e| DownloadError::network(url, e.to_string()))?
            }
            () = cancel.cancelled() => {
                warn!(url, "transfer cancelled before response");
                return Err(DownloadError::Cancelled);
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(url, status));
        }
        let resumed = status == StatusCode::PARTIAL_CONTENT;
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let (file, mut written) = if resumed {
            let file = OpenOptions::new()
                .append(true)
                .open(&part_path)
                .await
                .map_err(|e| DownloadError::io(&part_path, e))?;
            debug!(offset = existing.unwrap_or(0), "resuming partial transfer");
            (file, existing.unwrap_or(0))
        } else {
            let file = File::create(&part_path)
                .await
                .map_err(|e| DownloadError::io(&part_path, e))?;
            (file, 0)
        };
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                () = cancel.cancelled() => {
                    // Close the writer before removing the partial file.
                    drop(writer);
                    let _ = tokio::fs::remove_file(&part_path).await;
                    warn!(url, "transfer cancelled");
                    return Err(DownloadError::Cancelled);
                }
            };
            let Some(chunk) = chunk else {
                break;
            };
            let bytes = chunk.map_err(|e| DownloadError::network(url, e.to_string()))?;
            writer
                .write_all(&bytes)
                .await
                .map_err(|e| DownloadError::io(&part_path, e))?;
            written += bytes.len() as u64;
            on_progress(bytes.len() as u64);
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(&part_path, e))?;
        drop(writer);

        // The digest covers the whole file, including any resumed prefix.
        let checksum = hash_file(&part_path).await?;
        tokio::fs::rename(&part_path, dest)
            .await
            .map_err(|e| DownloadError::io(dest, e))?;

        debug!(bytes = written, "file written");
        Ok(DownloadedFile {
            path: dest.to_path_buf(),
            size: written,
            checksum,
            content_type,
            resumed,
        })
    }
}

fn status_error(url: &str, status: StatusCode) -> DownloadError {
    if status == StatusCode::NOT_FOUND {
        DownloadError::HttpStatus {
            url: url.to_string(),
            status: 404,
        }
    } else if matches!(status.as_u16(), 401 | 403) {
        DownloadError::AccessDenied {
            source_name: "http".to_string(),
            id: url.to_string(),
            status: status.as_u16(),
        }
    } else if status.is_server_error() {
        // Server errors read as transient so the retry policy engages.
        DownloadError::network(url, format!("temporary failure: HTTP {}", status.as_u16()))
    } else {
        DownloadError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        }
    }
}

fn part_path_for(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map_or_else(
        || std::ffi::OsString::from("download"),
        std::ffi::OsStr::to_os_string,
    );
    name.push(".part");
    dest.with_file_name(name)
}

/// Computes the SHA-256 hex digest of a file.
async fn hash_file(path: &Path) -> Result<String, DownloadError> {
    let content = tokio::fs::read(path)
        .await
        .map_err(|e| DownloadError::io(path, e))?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(format!("{:x}", hasher.finalize()))
}

// ==================== Directory listings ====================

static HREF_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    crate::extract::patterns::compile_static_regex(r#"<a\s+[^>]*href\s*=\s*["']([^"']+)["']"#)
});

/// Extracts file entries from an HTML directory index.
///
/// Parent links (`../`) and subdirectories (entries ending in `/`) are
/// excluded; the result preserves listing order.
#[must_use]
pub fn parse_directory_listing(html: &str) -> Vec<String> {
    HREF_RE
        .captures_iter(html)
        .map(|c| c[1].to_string())
        .filter(|href| href != "../" && !href.ends_with('/') && !href.starts_with('?'))
        .collect()
}

/// Replaces path-hostile characters in a source filename.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = sanitized.trim_matches(['.', ' ']);
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // ==================== Listing Parser Tests ====================

    #[test]
    fn test_listing_extracts_files_in_order() {
        let html = r#"<html><body>
            <a href="../">Parent</a>
            <a href="GSE123_matrix.txt.gz">matrix</a>
            <a href="suppl/">suppl dir</a>
            <a href='GSE123_raw.tar'>raw</a>
        </body></html>"#;
        assert_eq!(
            parse_directory_listing(html),
            vec!["GSE123_matrix.txt.gz", "GSE123_raw.tar"]
        );
    }

    #[test]
    fn test_listing_ignores_sort_links_and_dirs() {
        let html = r#"<a href="?C=N;O=D">Name</a><a href="sub/">sub</a>"#;
        assert!(parse_directory_listing(html).is_empty());
    }

    #[test]
    fn test_listing_empty_html() {
        assert!(parse_directory_listing("<html></html>").is_empty());
    }

    // ==================== Filename Tests ====================

    #[test]
    fn test_sanitize_replaces_separators() {
        assert_eq!(sanitize_filename("a/b\\c:d"), "a_b_c_d");
    }

    #[test]
    fn test_sanitize_trims_dots_and_spaces() {
        assert_eq!(sanitize_filename("  data.csv. "), "data.csv");
    }

    #[test]
    fn test_sanitize_empty_fallback() {
        assert_eq!(sanitize_filename("..."), "unnamed");
    }

    // ==================== Download Tests ====================

    #[tokio::test]
    async fn test_download_writes_file_with_checksum() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.bin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "application/octet-stream")
                    .set_body_bytes(b"hello dataset".to_vec()),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("data.bin");
        let client = RepoClient::new("test_dl", 0.0).unwrap();
        let mut seen = 0u64;

        let file = client
            .download_to_file(
                &format!("{}/data.bin", server.uri()),
                &dest,
                false,
                &CancelToken::new(),
                |delta| seen += delta,
            )
            .await
            .unwrap();

        assert_eq!(file.size, 13);
        assert_eq!(seen, 13);
        assert!(!file.resumed);
        assert_eq!(file.checksum.len(), 64);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello dataset");
        assert!(
            !dest.with_file_name("data.bin.part").exists(),
            "partial file must be renamed away"
        );
    }

    #[tokio::test]
    async fn test_download_resumes_partial_file() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big"))
            .and(header("Range", "bytes=6-"))
            .respond_with(ResponseTemplate::new(206).set_body_bytes(b"world!".to_vec()))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("big");
        std::fs::write(dir.path().join("big.part"), b"hello ").unwrap();

        let client = RepoClient::new("test_resume", 0.0).unwrap();
        let file = client
            .download_to_file(
                &format!("{}/big", server.uri()),
                &dest,
                true,
                &CancelToken::new(),
                |_| {},
            )
            .await
            .unwrap();

        assert!(file.resumed);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world!");
    }

    #[tokio::test]
    async fn test_download_404_is_error_and_leaves_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("missing");
        let client = RepoClient::new("test_404", 0.0).unwrap();

        let result = client
            .download_to_file(&server.uri(), &dest, false, &CancelToken::new(), |_| {})
            .await;

        assert!(matches!(
            result,
            Err(DownloadError::HttpStatus { status: 404, .. })
        ));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_download_cancellation_removes_partial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(vec![0u8; 1 << 20])
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("slow");
        let client = RepoClient::new("test_cancel", 0.0).unwrap();
        let cancel = CancelToken::new();

        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel_clone.cancel();
        });

        let result = client
            .download_to_file(&server.uri(), &dest, false, &cancel, |_| {})
            .await;

        assert!(matches!(result, Err(DownloadError::Cancelled)));
        assert!(!dest.exists());
        assert!(!dest.with_file_name("slow.part").exists());
    }

    #[tokio::test]
    async fn test_get_text_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
            .mount(&server)
            .await;

        let client = RepoClient::new("test_text", 0.0).unwrap();
        assert_eq!(client.get_text(&server.uri()).await.unwrap(), "payload");
    }

    #[tokio::test]
    async fn test_head_ok_reflects_status() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/there"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = RepoClient::new("test_head", 0.0).unwrap();
        assert!(client.head_ok(&format!("{}/there", server.uri())).await);
        assert!(!client.head_ok(&format!("{}/gone", server.uri())).await);
    }
}
