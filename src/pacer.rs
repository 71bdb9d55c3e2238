//! Token bucket that spaces carrier sends to the account's rate limit.

use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

/// Slowest supported pace: one message per hour.
pub const MIN_RATE_PER_SECOND: f64 = 1.0 / 3600.0;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

#[derive(Debug)]
pub struct SendPacer {
    rate_per_second: f64,
    capacity: f64,
    bucket: Mutex<Bucket>,
}

impl SendPacer {
    /// A non-positive, infinite or NaN rate disables pacing. Positive rates
    /// below `MIN_RATE_PER_SECOND` are raised to it.
    pub fn new(rate_per_second: f64, burst: u32) -> Self {
        let rate_per_second = if !rate_per_second.is_finite() || rate_per_second <= 0.0 {
            0.0
        } else if rate_per_second < MIN_RATE_PER_SECOND {
            tracing::warn!("carrier rate {rate_per_second}/s is below the minimum, using {MIN_RATE_PER_SECOND}/s");
            MIN_RATE_PER_SECOND
        } else {
            rate_per_second
        };
        let capacity = f64::from(burst.max(1));
        Self {
            rate_per_second,
            capacity,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(0.0, 1)
    }

    pub fn is_unlimited(&self) -> bool {
        self.rate_per_second <= 0.0
    }

    /// Waits until one send is allowed and consumes it.
    pub async fn acquire(&self) {
        if self.is_unlimited() {
            return;
        }
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.rate_per_second).min(self.capacity);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate_per_second)
            };
            sleep(wait).await;
        }
    }
}
