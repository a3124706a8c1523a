//! Rate-limited HTTPS client for the external metadata Provider.
//!
//! Two token buckets share a configured total request rate: a foreground
//! bucket for request-path calls and a background bucket for backfill
//! workers. The caller always states which bucket a call draws from
//! explicitly (`BucketKind`) rather than through thread-local state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

/// Which token bucket a Provider call should draw from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketKind {
    Foreground,
    Background,
}

/// A single token bucket: refills continuously from elapsed wall time,
/// capacity equal to its rate (minimum 1). `rate == 0` disables limiting
/// entirely (`acquire` never blocks).
struct TokenBucket {
    rate: f64,
    capacity: f64,
    tokens: Mutex<(f64, Instant)>,
}

impl TokenBucket {
    fn new(rate: f64) -> Self {
        let capacity = rate.max(1.0);
        Self {
            rate,
            capacity,
            tokens: Mutex::new((capacity, Instant::now())),
        }
    }

    /// Blocks the current (blocking) thread until one token is available.
    fn acquire(&self) {
        if self.rate <= 0.0 {
            return;
        }
        loop {
            let sleep_for = {
                let mut guard = self.tokens.lock();
                let (tokens, last) = *guard;
                let now = Instant::now();
                let elapsed = now.saturating_duration_since(last).as_secs_f64();
                let refilled = (tokens + elapsed * self.rate).min(self.capacity);
                if refilled >= 1.0 {
                    *guard = (refilled - 1.0, now);
                    None
                } else {
                    *guard = (refilled, now);
                    let need = 1.0 - refilled;
                    Some(Duration::from_secs_f64((need / self.rate).max(0.001)))
                }
            };
            match sleep_for {
                None => return,
                Some(d) => std::thread::sleep(d),
            }
        }
    }
}

/// Outcome of a Provider GET. `status` is `None` on transport failure after
/// all retries are exhausted; `body` is `None` whenever `status` is not a
/// successful JSON-object response.
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: Option<u16>,
    pub body: Option<Value>,
}

impl ProviderResponse {
    fn empty() -> Self {
        Self {
            status: None,
            body: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Some(200) && self.body.is_some()
    }
}

/// Provider credentials: either a bearer token or a legacy `api_key` query
/// parameter, mirroring the two auth styles the Provider accepts.
#[derive(Debug, Clone)]
pub enum ProviderAuth {
    Bearer(String),
    ApiKey(String),
}

const BASE_URL: &str = "https://api.themoviedb.org/3";
const MAX_ATTEMPTS: u32 = 6;

/// Client wrapping the two token buckets and the blocking HTTP agent. Cheap
/// to clone: internal state is behind `Arc`.
#[derive(Clone)]
pub struct ProviderClient {
    inner: Arc<Inner>,
}

struct Inner {
    auth: Option<ProviderAuth>,
    foreground: TokenBucket,
    background: TokenBucket,
    agent: ureq::Agent,
}

impl ProviderClient {
    /// `total_rps` is the shared total rate `R`; `foreground_rps` is clamped
    /// to `min(foreground_rps, R-1)` per §4.2, with the remainder going to
    /// the background bucket.
    pub fn new(auth: Option<ProviderAuth>, total_rps: u32, foreground_rps: u32) -> Self {
        let total = total_rps as f64;
        let fg = (foreground_rps as f64).min((total - 1.0).max(0.0));
        let bg = (total - fg).max(0.0);
        Self {
            inner: Arc::new(Inner {
                auth,
                foreground: TokenBucket::new(fg),
                background: TokenBucket::new(bg),
                agent: ureq::AgentBuilder::new()
                    .timeout(Duration::from_secs(10))
                    .build(),
            }),
        }
    }

    pub fn has_api_key(&self) -> bool {
        self.inner.auth.is_some()
    }

    /// Performs a GET against `{BASE_URL}{path}` with retry/backoff fully
    /// internal: callers never see HTTP error kinds, only a status/body
    /// pair (or a sentinel on exhausted retries). Blocking; run this inside
    /// `spawn_blocking`.
    pub fn get_json(&self, bucket: BucketKind, path: &str, query: &[(&str, &str)]) -> ProviderResponse {
        let Some(auth) = &self.inner.auth else {
            return ProviderResponse::empty();
        };
        let bucket_ref = match bucket {
            BucketKind::Foreground => &self.inner.foreground,
            BucketKind::Background => &self.inner.background,
        };

        let url = format!("{BASE_URL}{path}");
        for attempt in 0..MAX_ATTEMPTS {
            bucket_ref.acquire();

            let mut req = self.inner.agent.get(&url);
            req = req.set("accept", "application/json");
            for (k, v) in query {
                req = req.query(k, v);
            }
            req = match auth {
                ProviderAuth::Bearer(token) => req.set("Authorization", &format!("Bearer {token}")),
                ProviderAuth::ApiKey(key) => req.query("api_key", key),
            };

            match req.call() {
                Ok(resp) => {
                    let status = resp.status();
                    match resp.into_json::<Value>() {
                        Ok(json) if json.is_object() => {
                            return ProviderResponse {
                                status: Some(status),
                                body: Some(json),
                            };
                        }
                        _ => return ProviderResponse {
                            status: Some(status),
                            body: None,
                        },
                    }
                }
                Err(ureq::Error::Status(429, resp)) => {
                    let retry_after = resp
                        .header("Retry-After")
                        .and_then(|v| v.parse::<f64>().ok())
                        .unwrap_or(1.0);
                    std::thread::sleep(Duration::from_secs_f64(retry_after));
                }
                Err(ureq::Error::Status(code, _)) if (500..600).contains(&code) => {
                    std::thread::sleep(backoff(attempt));
                }
                Err(ureq::Error::Status(code, _)) => {
                    return ProviderResponse {
                        status: Some(code),
                        body: None,
                    };
                }
                Err(ureq::Error::Transport(_)) => {
                    std::thread::sleep(backoff(attempt));
                }
            }
        }
        ProviderResponse::empty()
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs_f64(0.5 * 2f64.powi(attempt as i32))
}
