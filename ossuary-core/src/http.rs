//! HTTP transport shared by the registry and forge collectors.
//!
//! Wraps a blocking reqwest client with retry, jittered exponential backoff,
//! and a per-host token bucket. Collectors never talk to reqwest directly;
//! they see JSON values or typed errors.
//!
//! Invariants enforced:
//! - No single call, retries included, outlives the hard ceiling
//! - 404 is data ("the record does not exist"), never an error
//! - 5xx and transport errors surface as `Transient` after retries

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use log::{debug, warn};
use serde_json::Value;

use crate::error::{OssuaryError, Result};

/// Hard ceiling on one logical call, retries included.
pub const CALL_CEILING: Duration = Duration::from_secs(60);

/// Configuration for the transport layer.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Initial backoff duration (doubles each retry).
    pub initial_backoff: Duration,
    /// Maximum backoff duration.
    pub max_backoff: Duration,
    /// Requests per minute allowed against one host.
    pub host_requests_per_minute: u32,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(15),
            host_requests_per_minute: 60,
            user_agent: format!("ossuary-risk/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Token bucket for one host. Refills continuously; an empty bucket makes
/// the caller sleep, never fail.
#[derive(Debug)]
struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(per_minute: u32) -> Bucket {
        let capacity = per_minute.max(1) as f64;
        Bucket {
            tokens: capacity,
            capacity,
            refill_per_sec: capacity / 60.0,
            last_refill: Instant::now(),
        }
    }

    /// Time to wait before a token is available; takes the token.
    fn take(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Duration::ZERO
        } else {
            let deficit = 1.0 - self.tokens;
            self.tokens = 0.0;
            Duration::from_secs_f64(deficit / self.refill_per_sec)
        }
    }
}

/// Blocking HTTP client with pacing and retry.
pub struct HttpClient {
    inner: reqwest::blocking::Client,
    config: HttpConfig,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl HttpClient {
    pub fn new(config: HttpConfig) -> Result<HttpClient> {
        let inner = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| OssuaryError::Transient(format!("http client init failed: {}", e)))?;
        Ok(HttpClient {
            inner,
            config,
            buckets: Mutex::new(HashMap::new()),
        })
    }

    /// GET a JSON document. `Ok(None)` means 404.
    pub fn get_json(&self, url: &str, headers: &[(&str, String)]) -> Result<Option<Value>> {
        self.request_json(reqwest::Method::GET, url, headers, None)
    }

    /// POST a JSON payload and parse a JSON response. `Ok(None)` means 404.
    pub fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<Option<Value>> {
        self.request_json(reqwest::Method::POST, url, headers, Some(body))
    }

    fn request_json(
        &self,
        method: reqwest::Method,
        url: &str,
        headers: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Option<Value>> {
        let started = Instant::now();
        let mut backoff = self.config.initial_backoff;
        let mut last_error = String::new();

        for attempt in 0..=self.config.max_retries {
            if started.elapsed() >= CALL_CEILING {
                break;
            }
            self.pace(url, started)?;

            let mut req = self.inner.request(method.clone(), url);
            for (k, v) in headers {
                req = req.header(*k, v.as_str());
            }
            if let Some(b) = body {
                req = req.json(b);
            }

            match req.send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.as_u16() == 404 {
                        return Ok(None);
                    }
                    if status.is_success() {
                        return resp.json::<Value>().map(Some).map_err(|e| {
                            OssuaryError::Transient(format!("bad JSON from {}: {}", url, e))
                        });
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        last_error = format!("HTTP {} from {}", status.as_u16(), url);
                        debug!("{} (attempt {})", last_error, attempt + 1);
                    } else {
                        // Remaining 4xx are caller bugs or revoked access;
                        // retrying cannot help.
                        return Err(OssuaryError::Transient(format!(
                            "HTTP {} from {}",
                            status.as_u16(),
                            url
                        )));
                    }
                }
                Err(e) => {
                    last_error = format!("request to {} failed: {}", url, e);
                    debug!("{} (attempt {})", last_error, attempt + 1);
                }
            }

            if attempt < self.config.max_retries {
                let wait = jitter(backoff).min(self.config.max_backoff);
                std::thread::sleep(wait);
                backoff = (backoff * 2).min(self.config.max_backoff);
            }
        }

        warn!("giving up on {}: {}", url, last_error);
        Err(OssuaryError::Transient(last_error))
    }

    /// Sleep until the host's bucket yields a token, still honoring the
    /// per-call ceiling.
    fn pace(&self, url: &str, started: Instant) -> Result<()> {
        let host = host_of(url);
        let wait = {
            let mut buckets = self
                .buckets
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            buckets
                .entry(host)
                .or_insert_with(|| Bucket::new(self.config.host_requests_per_minute))
                .take()
        };
        if wait > Duration::ZERO {
            if started.elapsed() + wait >= CALL_CEILING {
                return Err(OssuaryError::Transient(format!(
                    "rate-limit budget exhausted for {}",
                    url
                )));
            }
            std::thread::sleep(wait);
        }
        Ok(())
    }
}

fn host_of(url: &str) -> String {
    url.trim_start_matches("https://")
        .trim_start_matches("http://")
        .split(['/', ':'])
        .next()
        .unwrap_or("")
        .to_ascii_lowercase()
}

/// Add up to 25% random jitter, seeded from the clock's subsecond noise so
/// concurrent retries decorrelate without a PRNG dependency.
fn jitter(base: Duration) -> Duration {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let factor = 1.0 + (nanos % 1000) as f64 / 4000.0;
    base.mul_f64(factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("https://api.github.com/repos/a/b"), "api.github.com");
        assert_eq!(host_of("http://pypi.org/pypi/x/json"), "pypi.org");
        assert_eq!(host_of("https://crates.io"), "crates.io");
    }

    #[test]
    fn bucket_depletes_then_waits() {
        let mut b = Bucket::new(60);
        for _ in 0..60 {
            assert_eq!(b.take(), Duration::ZERO);
        }
        assert!(b.take() > Duration::ZERO);
    }

    #[test]
    fn jitter_stays_bounded() {
        let base = Duration::from_millis(400);
        let j = jitter(base);
        assert!(j >= base);
        assert!(j <= base.mul_f64(1.25));
    }
}
