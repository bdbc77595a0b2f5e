//! Fixed-window rate limiter.
//!
//! Each key gets `capacity` admissions per window. Buckets are created on
//! first use and evicted by a janitor once idle for `idle_multiplier`
//! windows. Time comes from `tokio::time::Instant`, so tests can drive the
//! clock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::RateLimitConfig;

#[derive(Debug)]
struct Bucket {
    count: u32,
    window_start: Instant,
    last_seen: Instant,
}

/// Per-key admission counter, safe for concurrent use.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    window: Duration,
    idle_after: Duration,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl RateLimiter {
    /// Create a limiter admitting `capacity` calls per `window` per key.
    #[must_use]
    pub fn new(capacity: u32, window: Duration, idle_multiplier: u32) -> Self {
        Self {
            capacity,
            window,
            idle_after: window.saturating_mul(idle_multiplier.max(1)),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    /// Create a limiter from configuration.
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.capacity, config.window(), config.idle_multiplier)
    }

    /// Count one call for `key`. Returns `false` if the window is exhausted.
    pub fn allow(&self, key: &str) -> bool {
        let bucket = self.bucket(key);
        let mut bucket = bucket.lock();
        let now = Instant::now();

        if now.duration_since(bucket.window_start) >= self.window {
            bucket.window_start = now;
            bucket.count = 0;
        }
        bucket.last_seen = now;

        if bucket.count < self.capacity {
            bucket.count += 1;
            true
        } else {
            false
        }
    }

    /// Time until `key`'s current window ends. Zero for unknown keys.
    #[must_use]
    pub fn retry_after(&self, key: &str) -> Duration {
        let Some(bucket) = self.buckets.read().get(key).cloned() else {
            return Duration::ZERO;
        };
        let bucket = bucket.lock();
        (bucket.window_start + self.window).saturating_duration_since(Instant::now())
    }

    /// Number of live buckets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.read().len()
    }

    /// Whether there are no live buckets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    /// Drop buckets idle for longer than the idle threshold. Returns how many
    /// were removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.duration_since(bucket.lock().last_seen) < self.idle_after);
        before - buckets.len()
    }

    /// Sweep idle buckets once per window until `cancel` fires.
    pub fn spawn_janitor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(limiter.window);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_idle();
                        if evicted > 0 {
                            tracing::debug!(evicted, remaining = limiter.len(), "Evicted idle rate-limit buckets");
                        }
                    }
                }
            }
            tracing::debug!("Rate limiter janitor stopped");
        })
    }

    fn bucket(&self, key: &str) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().get(key) {
            return Arc::clone(bucket);
        }
        let now = Instant::now();
        let mut buckets = self.buckets.write();
        Arc::clone(buckets.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Bucket {
                count: 0,
                window_start: now,
                last_seen: now,
            }))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(10, Duration::from_secs(60), 3)
    }

    #[tokio::test(start_paused = true)]
    async fn eleventh_call_in_window_is_refused() {
        let limiter = limiter();
        for _ in 0..10 {
            assert!(limiter.allow("10.0.0.1"));
        }
        assert!(!limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.2"));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(limiter.retry_after("10.0.0.1"), Duration::from_secs(40));
    }

    #[tokio::test(start_paused = true)]
    async fn window_elapse_restores_capacity() {
        let limiter = limiter();
        for _ in 0..10 {
            limiter.allow("k");
        }
        assert!(!limiter.allow("k"));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.allow("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_buckets_are_evicted() {
        let limiter = limiter();
        limiter.allow("old");
        tokio::time::advance(Duration::from_secs(120)).await;
        limiter.allow("fresh");

        assert_eq!(limiter.evict_idle(), 0);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.evict_idle(), 1);
        assert_eq!(limiter.len(), 1);
        assert_eq!(limiter.retry_after("old"), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn janitor_sweeps_and_stops_on_cancel() {
        let limiter = Arc::new(limiter());
        limiter.allow("a");

        let cancel = CancellationToken::new();
        let janitor = limiter.spawn_janitor(cancel.clone());

        tokio::time::sleep(Duration::from_secs(4 * 60 + 1)).await;
        assert!(limiter.is_empty());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), janitor)
            .await
            .expect("janitor did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn concurrent_callers_share_capacity() {
        let limiter = Arc::new(RateLimiter::new(50, Duration::from_secs(60), 3));
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            tasks.push(tokio::spawn(async move {
                (0..20).filter(|_| limiter.allow("shared")).count()
            }));
        }

        let mut admitted = 0;
        for task in tasks {
            admitted += task.await.unwrap();
        }
        assert_eq!(admitted, 50);
    }
}
