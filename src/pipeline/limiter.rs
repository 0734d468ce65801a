use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Token bucket shared by every fetch worker.
///
/// One token is released every `interval`, up to `burst` tokens banked.
/// Workers call [`acquire`](Self::acquire) before each request, so the
/// aggregate request rate stays under `1 / interval` whatever the pool
/// size. The bucket also carries the process-wide backoff clock: after a
/// rate-limit response [`pause_for`](Self::pause_for) holds back every
/// worker, not only the one that got throttled.
pub struct RateLimiter {
    interval: Duration,
    burst: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    refilled_at: Instant,
    paused_until: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            interval,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                refilled_at: Instant::now(),
                paused_until: None,
            }),
        }
    }

    /// A limiter with one request per `interval` and no burst.
    pub fn per_interval(interval: Duration) -> Self {
        Self::new(interval, 1)
    }

    pub fn unlimited() -> Self {
        Self::new(Duration::ZERO, 1)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Waits until a request may be sent.
    pub async fn acquire(&self) {
        loop {
            let wake_at = {
                let mut state = self.state.lock().await;
                let now = Instant::now();

                match state.paused_until {
                    Some(until) if until > now => Some(until),
                    _ => {
                        state.paused_until = None;
                        if self.interval.is_zero() {
                            return;
                        }

                        let elapsed = now.duration_since(state.refilled_at);
                        let refill = elapsed.as_secs_f64() / self.interval.as_secs_f64();
                        state.tokens = (state.tokens + refill).min(self.burst);
                        state.refilled_at = now;

                        if state.tokens >= 1.0 {
                            state.tokens -= 1.0;
                            return;
                        }
                        let missing = 1.0 - state.tokens;
                        Some(now + self.interval.mul_f64(missing))
                    }
                }
            };

            if let Some(at) = wake_at {
                sleep_until(at).await;
            }
        }
    }

    /// Holds back every caller of [`acquire`](Self::acquire) for at least
    /// `delay`. Overlapping pauses keep the later deadline.
    pub async fn pause_for(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut state = self.state.lock().await;
        state.paused_until = Some(match state.paused_until {
            Some(existing) if existing > until => existing,
            _ => until,
        });
    }

    pub async fn is_paused(&self) -> bool {
        let state = self.state.lock().await;
        state.paused_until.is_some_and(|until| until > Instant::now())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}
