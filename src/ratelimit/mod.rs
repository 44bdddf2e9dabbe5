//! Per-bucket request pacing for the remote API.
//!
//! Every outbound call is tagged with a bucket key (for example
//! `search:<community>` or `delete:<channel>`). Calls sharing a key run
//! strictly one at a time in arrival order; calls on different keys run
//! concurrently. Each active key gets a single drain task that is spawned on
//! the first enqueue and exits once its queue is empty.
//!
//! Before each attempt the drain waits for, in order:
//!
//! 1. a global freeze declared by a global 429,
//! 2. the bucket's reset time when it has no calls remaining,
//! 3. the bucket's adaptive delay plus jitter.
//!
//! The adaptive delay grows on every 429 and shrinks on every other
//! response, so a bucket converges on the pace the server tolerates.
//!
//! The server may report its own bucket identifier, which can differ from the
//! caller's key. State is re-keyed onto the server bucket so that distinct
//! keys multiplexed onto one server bucket share a single budget.

mod headers;

use std::{
    collections::{HashMap, HashSet, VecDeque},
    future::Future,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};
pub use headers::*;
use http::StatusCode;
use parking_lot::Mutex;
use tokio::{sync::oneshot, time::Instant};
use tracing::{debug, warn};

use crate::config::RateLimitConfig;

/// A fully buffered HTTP response.
pub type ApiResponse = http::Response<Bytes>;

/// Failure to obtain any HTTP response (connect, TLS, timeout, body read).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        Self(error.to_string())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RateLimitError {
    #[error("Exceeded {attempts} attempts for rate limit bucket {bucket}")]
    RetriesExhausted { bucket: String, attempts: u32 },

    #[error("Network error on bucket {bucket}: {source}")]
    Transport {
        bucket: String,
        #[source]
        source: TransportError,
    },

    #[error("Request on bucket {0} was dropped before completing")]
    Dropped(String),
}

pub type RateLimitResult<T> = Result<T, RateLimitError>;

/// Longest wait honoured from a server-provided `reset-after` or `retry-after`.
pub const MAX_SERVER_WAIT: Duration = Duration::from_secs(60 * 60);

/// Convert server-provided seconds into a bounded wait.
fn server_wait(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs)
        .unwrap_or(MAX_SERVER_WAIT)
        .min(MAX_SERVER_WAIT)
}

type RequestFn = Box<dyn Fn() -> BoxFuture<'static, Result<ApiResponse, TransportError>> + Send + Sync>;

struct QueueEntry {
    request: RequestFn,
    reply: oneshot::Sender<RateLimitResult<ApiResponse>>,
}

/// Learned state of one rate limit bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketState {
    /// Calls left before `reset_at`.
    pub remaining: i64,
    /// When the server window resets.
    pub reset_at: Option<Instant>,
    /// Minimum spacing between calls on this bucket.
    pub adaptive_delay_ms: u64,
}

impl BucketState {
    fn new(config: &RateLimitConfig) -> Self {
        Self {
            remaining: 1,
            reset_at: None,
            adaptive_delay_ms: config.default_delay_ms,
        }
    }
}

#[derive(Default)]
struct LimiterState {
    buckets: HashMap<String, BucketState>,
    /// Caller key -> server-reported bucket id.
    aliases: HashMap<String, String>,
    queues: HashMap<String, VecDeque<QueueEntry>>,
    draining: HashSet<String>,
    global_reset_at: Option<Instant>,
}

impl LimiterState {
    fn resolve<'a>(&'a self, key: &'a str) -> &'a str {
        self.aliases.get(key).map(String::as_str).unwrap_or(key)
    }

    fn bucket_mut(&mut self, id: &str, config: &RateLimitConfig) -> &mut BucketState {
        self.buckets
            .entry(id.to_string())
            .or_insert_with(|| BucketState::new(config))
    }
}

struct Inner {
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
}

/// Serialises requests per bucket key and absorbs 429 responses.
///
/// Cheap to clone; clones share all bucket state.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(LimiterState::default()),
            }),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.inner.config
    }

    /// Queue a request on `bucket` and wait for its response.
    ///
    /// `request` is invoked once per attempt. A 429 is retried on the same
    /// bucket; any other status is returned to the caller as-is. Dropping the
    /// returned future abandons the request if it has not started yet.
    pub async fn enqueue<F, Fut>(&self, bucket: &str, request: F) -> RateLimitResult<ApiResponse>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ApiResponse, TransportError>> + Send + 'static,
    {
        let (reply, rx) = oneshot::channel();
        let entry = QueueEntry {
            request: Box::new(move || request().boxed()),
            reply,
        };

        let start_drain = {
            let mut state = self.inner.state.lock();
            state
                .queues
                .entry(bucket.to_string())
                .or_default()
                .push_back(entry);
            state.draining.insert(bucket.to_string())
        };

        if start_drain {
            let inner = Arc::clone(&self.inner);
            let key = bucket.to_string();
            tokio::spawn(async move { inner.drain(key).await });
        }

        rx.await
            .unwrap_or_else(|_| Err(RateLimitError::Dropped(bucket.to_string())))
    }

    /// Copy of the state for a caller key or server bucket id.
    pub fn bucket_state(&self, bucket: &str) -> Option<BucketState> {
        let state = self.inner.state.lock();
        state.buckets.get(state.resolve(bucket)).copied()
    }

    /// Server bucket id a caller key has been mapped to, if any.
    pub fn resolved_bucket(&self, bucket: &str) -> Option<String> {
        self.inner.state.lock().aliases.get(bucket).cloned()
    }

    /// Number of keys with a live drain task.
    pub fn active_drains(&self) -> usize {
        self.inner.state.lock().draining.len()
    }
}

/// Releases a key's drain slot if its task dies before emptying the queue.
/// Requests still queued are dropped and their callers see `Dropped`.
struct DrainGuard<'a> {
    state: &'a Mutex<LimiterState>,
    key: &'a str,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            state.queues.remove(self.key);
            state.draining.remove(self.key);
        }
    }
}

impl Inner {
    async fn drain(&self, key: String) {
        let mut guard = DrainGuard {
            state: &self.state,
            key: &key,
            armed: true,
        };
        loop {
            let entry = {
                let mut state = self.state.lock();
                match state.queues.get_mut(&key).and_then(VecDeque::pop_front) {
                    Some(entry) => entry,
                    None => {
                        state.queues.remove(&key);
                        state.draining.remove(&key);
                        guard.armed = false;
                        return;
                    }
                }
            };

            if entry.reply.is_closed() {
                debug!(bucket = %key, "Skipping abandoned request");
                continue;
            }

            match self.execute_with_backoff(&key, &entry.request).await {
                Err(error @ RateLimitError::Transport { .. }) => {
                    // The request never produced a response; fail everything
                    // queued behind it so callers see the outage immediately.
                    let pending = {
                        let mut state = self.state.lock();
                        state
                            .queues
                            .get_mut(&key)
                            .map(std::mem::take)
                            .unwrap_or_default()
                    };
                    warn!(
                        bucket = %key,
                        pending = pending.len(),
                        error = %error,
                        "Request failed without a response, failing queued requests"
                    );
                    for queued in pending {
                        let _ = queued.reply.send(Err(error.clone()));
                    }
                    let _ = entry.reply.send(Err(error));
                }
                result => {
                    let _ = entry.reply.send(result);
                }
            }
        }
    }

    async fn execute_with_backoff(
        &self,
        key: &str,
        request: &RequestFn,
    ) -> RateLimitResult<ApiResponse> {
        let max_attempts = self.config.max_attempts;

        for attempt in 1..=max_attempts {
            self.wait_for_bucket(key).await;

            let response = request().await.map_err(|source| RateLimitError::Transport {
                bucket: key.to_string(),
                source,
            })?;

            let limits = RateLimitHeaders::parse(response.headers());
            let now = Instant::now();
            let mut state = self.state.lock();

            if let Some(server_bucket) = &limits.bucket {
                state
                    .aliases
                    .insert(key.to_string(), server_bucket.clone());
            }
            let bucket_id = state.resolve(key).to_string();

            if let (Some(remaining), Some(reset_after)) = (limits.remaining, limits.reset_after) {
                let bucket = state.bucket_mut(&bucket_id, &self.config);
                bucket.remaining = remaining;
                bucket.reset_at = now.checked_add(server_wait(reset_after));
            }

            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                let bucket = state.bucket_mut(&bucket_id, &self.config);
                bucket.adaptive_delay_ms = self.config.recover(bucket.adaptive_delay_ms);
                if attempt > 1 {
                    debug!(bucket = %bucket_id, attempt, "Request succeeded after rate limit");
                }
                return Ok(response);
            }

            let wait = server_wait(
                limits
                    .retry_after
                    .unwrap_or(self.config.default_retry_after_secs),
            );

            if limits.global {
                state.global_reset_at = now.checked_add(wait);
            } else {
                let bucket = state.bucket_mut(&bucket_id, &self.config);
                bucket.remaining = 0;
                bucket.reset_at = now.checked_add(wait);
                bucket.adaptive_delay_ms = self.config.backoff(bucket.adaptive_delay_ms);
            }

            warn!(
                bucket = %bucket_id,
                global = limits.global,
                attempt,
                max_attempts,
                wait_ms = wait.as_millis() as u64,
                "Rate limited (429), waiting before retry"
            );
        }

        Err(RateLimitError::RetriesExhausted {
            bucket: key.to_string(),
            attempts: max_attempts,
        })
    }

    async fn wait_for_bucket(&self, key: &str) {
        let global_reset_at = self.state.lock().global_reset_at;
        if let Some(until) = global_reset_at
            && until > Instant::now()
        {
            tokio::time::sleep_until(until).await;
        }

        let (reset_at, adaptive_delay_ms) = {
            let state = self.state.lock();
            match state.buckets.get(state.resolve(key)) {
                Some(bucket) if bucket.remaining <= 0 => {
                    (bucket.reset_at, bucket.adaptive_delay_ms)
                }
                Some(bucket) => (None, bucket.adaptive_delay_ms),
                None => (None, self.config.default_delay_ms),
            }
        };

        if let Some(until) = reset_at
            && until > Instant::now()
        {
            tokio::time::sleep_until(until).await;
        }

        tokio::time::sleep(self.config.with_jitter(adaptive_delay_ms)).await;
    }
}
