/// Rate-limited fetch client with adaptive slow-down and retry/backoff
///
/// One client instance is shared by every worker. Its pacing state sits
/// behind a single mutex so that N workers collectively respect the
/// configured interval instead of each believing it is under the limit.
use super::transport::{FetchRequest, FetchResponse, HttpTransport};
use crate::error::TransportError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Retry and pacing parameters
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Minimum spacing between requests
    pub base_interval: Duration,
    /// Total attempts per fetch, including the first
    pub max_retries: u32,
    /// Consecutive 429s before the adaptive delay starts growing
    pub throttle_threshold: u32,
    /// Growth of the adaptive delay per 429 past the threshold
    pub throttle_step: Duration,
    /// Upper bound on the adaptive delay
    pub throttle_cap: Duration,
    /// Decay of the adaptive delay per successful request
    pub relax_step: Duration,
    /// Per-attempt waits after a 429, the last entry repeats
    pub throttle_schedule: Vec<Duration>,
}

impl RetryPolicy {
    pub fn new(base_interval: Duration, max_retries: u32) -> Self {
        Self {
            base_interval,
            max_retries,
            ..Self::default()
        }
    }

    /// Exponential backoff for 403, other statuses and transport errors
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_interval.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Escalating wait after a 429
    pub fn throttle_backoff(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.throttle_schedule.len().saturating_sub(1));
        self.throttle_schedule
            .get(idx)
            .copied()
            .unwrap_or_else(|| self.backoff(attempt))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_secs(1),
            max_retries: 3,
            throttle_threshold: 3,
            throttle_step: Duration::from_secs(1),
            throttle_cap: Duration::from_secs(5),
            relax_step: Duration::from_millis(500),
            throttle_schedule: vec![
                Duration::from_secs(5),
                Duration::from_secs(15),
                Duration::from_secs(30),
            ],
        }
    }
}

/// Shared pacing state
#[derive(Debug, Clone, Copy, Default)]
pub struct RateState {
    pub last_request: Option<Instant>,
    pub adaptive_extra: Duration,
    pub consecutive_throttles: u32,
}

/// Result of a fetch that did not hit a transport error
#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Success(FetchResponse),
    /// Retries exhausted on a non-200 status
    Failure { status: u16, attempts: u32 },
}

impl FetchOutcome {
    pub fn into_response(self) -> Option<FetchResponse> {
        match self {
            FetchOutcome::Success(response) => Some(response),
            FetchOutcome::Failure { .. } => None,
        }
    }
}

pub struct RateLimitedClient {
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    state: Mutex<RateState>,
}

impl RateLimitedClient {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            state: Mutex::new(RateState::default()),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Current pacing state
    pub async fn rate_state(&self) -> RateState {
        *self.state.lock().await
    }

    pub async fn adaptive_extra(&self) -> Duration {
        self.state.lock().await.adaptive_extra
    }

    /// Issue a request under the pacing and retry policy.
    ///
    /// HTTP-level failures come back as [`FetchOutcome::Failure`]; only a
    /// transport error on the final attempt is returned as `Err`.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchOutcome, TransportError> {
        let max_attempts = self.policy.max_retries.max(1);
        let mut attempt = 0;

        loop {
            self.pace().await;
            let is_last = attempt + 1 >= max_attempts;

            match self.transport.execute(&request).await {
                Ok(response) if response.status == 200 => {
                    self.record_success().await;
                    return Ok(FetchOutcome::Success(response));
                }
                Ok(response) if response.status == 429 => {
                    let count = self.record_throttle().await;
                    warn!(
                        "⏳ Throttled (429) on {}, attempt {}/{}, consecutive 429s: {}",
                        request.url,
                        attempt + 1,
                        max_attempts,
                        count
                    );
                    if is_last {
                        return Ok(FetchOutcome::Failure { status: 429, attempts: max_attempts });
                    }
                    let wait = self.policy.throttle_backoff(attempt);
                    info!("Waiting {:.2}s before retry", wait.as_secs_f64());
                    sleep(wait).await;
                }
                Ok(response) => {
                    warn!(
                        "🚫 HTTP {} from {}, attempt {}/{}",
                        response.status,
                        request.url,
                        attempt + 1,
                        max_attempts
                    );
                    if is_last {
                        return Ok(FetchOutcome::Failure {
                            status: response.status,
                            attempts: max_attempts,
                        });
                    }
                    let wait = self.policy.backoff(attempt);
                    info!("Waiting {:.2}s before retry", wait.as_secs_f64());
                    sleep(wait).await;
                }
                Err(e) => {
                    warn!("Request failed (attempt {}/{}): {}", attempt + 1, max_attempts, e);
                    if is_last {
                        return Err(e);
                    }
                    sleep(self.policy.backoff(attempt)).await;
                }
            }

            attempt += 1;
        }
    }

    /// Wait out the remainder of `base_interval + adaptive_extra` and claim
    /// the next slot. The lock is held across the sleep so callers queue up.
    async fn pace(&self) {
        let mut state = self.state.lock().await;
        let gap = self.policy.base_interval + state.adaptive_extra;

        if let Some(last) = state.last_request {
            let elapsed = last.elapsed();
            if elapsed < gap {
                let wait = gap - elapsed;
                debug!(
                    "Rate limit: waiting {:.2}s (base {:.2}s + adaptive {:.2}s)",
                    wait.as_secs_f64(),
                    self.policy.base_interval.as_secs_f64(),
                    state.adaptive_extra.as_secs_f64()
                );
                sleep(wait).await;
            }
        }

        state.last_request = Some(Instant::now());
    }

    async fn record_throttle(&self) -> u32 {
        let mut state = self.state.lock().await;
        state.consecutive_throttles += 1;
        if state.consecutive_throttles >= self.policy.throttle_threshold {
            state.adaptive_extra = (state.adaptive_extra + self.policy.throttle_step).min(self.policy.throttle_cap);
            info!("🐌 Adaptive slow-down: extra delay now {:.1}s", state.adaptive_extra.as_secs_f64());
        }
        state.consecutive_throttles
    }

    async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if state.consecutive_throttles > 0 {
            debug!("✅ Request succeeded, resetting 429 counter");
        }
        state.consecutive_throttles = 0;
        state.adaptive_extra = state.adaptive_extra.saturating_sub(self.policy.relax_step);
    }
}
