//! Minimum-interval rate limiting per external endpoint class.
//!
//! Repository APIs publish request-rate ceilings (NCBI e-utils allows
//! 3 req/s anonymous and 10 req/s with an API key; this tool stays under
//! both). The limiter enforces a minimum spacing between calls of the
//! same endpoint class, with the last-call timestamp shared process-wide
//! so every adapter instance and task observes the same clock.
//!
//! # Example
//!
//! ```no_run
//! use hapiq::download::rate_limiter::RateLimiter;
//!
//! # async fn example() {
//! let limiter = RateLimiter::per_second("eutils", 2.5);
//! limiter.acquire().await; // first call: immediate
//! limiter.acquire().await; // second call: waits ~400ms
//! # }
//! ```

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument, trace};

/// Process-wide last-call timestamps, one per endpoint class.
static CLASSES: LazyLock<DashMap<String, Arc<ClassState>>> = LazyLock::new(DashMap::new);

/// Shared state for one endpoint class.
#[derive(Debug)]
struct ClassState {
    /// Time of the last permitted call. `None` until the first call.
    last_call: Mutex<Option<Instant>>,
}

/// Minimum-interval limiter for one endpoint class.
///
/// Instances are cheap handles; all limiters for the same class share the
/// same last-call timestamp for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    class: String,
    min_interval: Duration,
}

impl RateLimiter {
    /// Creates a limiter allowing `rate` requests per second.
    ///
    /// A non-positive rate disables the limiter.
    #[must_use]
    pub fn per_second(class: impl Into<String>, rate: f64) -> Self {
        let min_interval = if rate > 0.0 {
            Duration::from_secs_f64(1.0 / rate)
        } else {
            Duration::ZERO
        };
        Self {
            class: class.into(),
            min_interval,
        }
    }

    /// Returns the enforced minimum spacing between calls.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until a call of this class is permitted, then claims the slot.
    ///
    /// The first call of a class proceeds immediately. The timestamp is
    /// updated while the class lock is held, so concurrent acquirers
    /// serialize correctly.
    #[instrument(skip(self), fields(class = %self.class))]
    pub async fn acquire(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        // Clone the Arc so the DashMap shard lock is not held across await.
        let state = CLASSES
            .entry(self.class.clone())
            .or_insert_with(|| {
                Arc::new(ClassState {
                    last_call: Mutex::new(None),
                })
            })
            .clone();

        let mut last_call = state.last_call.lock().await;
        if let Some(last) = *last_call {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval.saturating_sub(elapsed);
                debug!(class = %self.class, wait_ms = wait.as_millis(), "rate limit wait");
                tokio::time::sleep(wait).await;
            }
        } else {
            trace!(class = %self.class, "first call for class");
        }
        *last_call = Some(Instant::now());
    }
}

/// Maximum Retry-After value honored (servers occasionally send hours).
const MAX_RETRY_AFTER: Duration = Duration::from_secs(120);

/// Parses a Retry-After header value into a Duration.
///
/// Accepts both RFC 7231 forms: integer seconds and HTTP-date. Values are
/// capped at [`MAX_RETRY_AFTER`]; unparseable values return `None`.
#[must_use]
pub fn parse_retry_after(header_value: &str) -> Option<Duration> {
    let header_value = header_value.trim();

    if let Ok(seconds) = header_value.parse::<i64>() {
        if seconds < 0 {
            return None;
        }
        #[allow(clippy::cast_sign_loss)]
        let duration = Duration::from_secs(seconds as u64);
        return Some(duration.min(MAX_RETRY_AFTER));
    }

    let datetime = httpdate::parse_http_date(header_value).ok()?;
    match datetime.duration_since(std::time::SystemTime::now()) {
        Ok(duration) => Some(duration.min(MAX_RETRY_AFTER)),
        // A date in the past means no further waiting.
        Err(_) => Some(Duration::ZERO),
    }
}
