//! Browser-like request headers for accessibility probes.
//!
//! Repository and publisher sites aggressively reject obvious bots. The
//! probe therefore presents a realistic desktop browser profile: a rotating
//! User-Agent plus the accompanying header set a real browser would send.

use std::sync::atomic::{AtomicUsize, Ordering};

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Fixed rotation of realistic desktop browser User-Agent strings.
pub const USER_AGENTS: [&str; 7] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:132.0) Gecko/20100101 Firefox/132.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:132.0) Gecko/20100101 Firefox/132.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.6 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

static NEXT_AGENT: AtomicUsize = AtomicUsize::new(0);

/// Returns the next User-Agent from the rotation.
#[must_use]
pub fn next_user_agent() -> &'static str {
    let index = NEXT_AGENT.fetch_add(1, Ordering::Relaxed) % USER_AGENTS.len();
    USER_AGENTS[index]
}

/// Builds the full browser-like header set for one probe request.
///
/// The same map is cloned onto every hop of a redirect chain.
#[must_use]
pub fn browser_headers(user_agent: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    insert(&mut headers, "User-Agent", user_agent);
    insert(
        &mut headers,
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    );
    insert(&mut headers, "Accept-Language", "en-US,en;q=0.9");
    insert(&mut headers, "Accept-Encoding", "gzip, deflate, br");
    insert(&mut headers, "DNT", "1");
    insert(&mut headers, "Connection", "keep-alive");
    insert(&mut headers, "Upgrade-Insecure-Requests", "1");
    insert(&mut headers, "Sec-Fetch-Dest", "document");
    insert(&mut headers, "Sec-Fetch-Mode", "navigate");
    insert(&mut headers, "Sec-Fetch-Site", "none");
    insert(&mut headers, "Sec-Fetch-User", "?1");
    insert(&mut headers, "Cache-Control", "max-age=0");
    headers
}

fn insert(headers: &mut HeaderMap, name: &'static str, value: &str) {
    // All values are static ASCII; parse failures cannot occur.
    if let (Ok(name), Ok(value)) = (
        HeaderName::from_bytes(name.as_bytes()),
        HeaderValue::from_str(value),
    ) {
        headers.insert(name, value);
    }
}
