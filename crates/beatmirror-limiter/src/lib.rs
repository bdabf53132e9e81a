//! Beatmirror Limiter
//!
//! A sliding-window rate limiter. At most `limit` acquisitions succeed in any
//! trailing `window`; callers beyond that wait (in arrival order) instead of
//! being rejected.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Limits the rate of calls into the upstream provider.
#[derive(Debug)]
pub struct RateLimiter {
  limit: usize,
  window: Duration,
  // Instants of the acquisitions still inside the window, oldest first.
  // tokio's Mutex is fair, so waiters are served FIFO.
  granted: Mutex<VecDeque<Instant>>,
  acquisitions: AtomicU64,
}

impl RateLimiter {
  /// Create a limiter allowing `limit` permits per `window`.
  ///
  /// A `limit` of zero is treated as one.
  pub fn new(limit: usize, window: Duration) -> Self {
    let limit = limit.max(1);
    Self {
      limit,
      window,
      granted: Mutex::new(VecDeque::with_capacity(limit)),
      acquisitions: AtomicU64::new(0),
    }
  }

  /// Total permits granted since creation.
  pub fn acquisitions(&self) -> u64 {
    self.acquisitions.load(Ordering::Relaxed)
  }

  /// Wait for a permit and consume it.
  pub async fn acquire(&self) {
    let mut granted = self.granted.lock().await;

    loop {
      let now = Instant::now();
      while let Some(&oldest) = granted.front() {
        if now.duration_since(oldest) >= self.window {
          granted.pop_front();
        } else {
          break;
        }
      }

      if granted.len() < self.limit {
        granted.push_back(now);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        return;
      }

      // Full window: sleep until the oldest permit leaves it. The lock stays
      // held so later callers queue behind this one.
      if let Some(&oldest) = granted.front() {
        let ready_at = oldest + self.window;
        debug!(wait_ms = ready_at.duration_since(now).as_millis() as u64, "rate limited");
        tokio::time::sleep_until(ready_at).await;
      }
    }
  }
}

impl Default for RateLimiter {
  /// 1200 permits per minute.
  fn default() -> Self {
    Self::new(1200, Duration::from_secs(60))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;

  #[tokio::test(start_paused = true)]
  async fn test_burst_within_limit_is_immediate() {
    let limiter = RateLimiter::new(5, Duration::from_secs(10));
    let start = Instant::now();

    for _ in 0..5 {
      limiter.acquire().await;
    }

    assert_eq!(start.elapsed(), Duration::ZERO);
    assert_eq!(limiter.acquisitions(), 5);
  }

  #[tokio::test(start_paused = true)]
  async fn test_double_limit_takes_a_window_longer() {
    let window = Duration::from_secs(10);
    let limit = 4;

    let limiter = RateLimiter::new(limit, window);
    let start = Instant::now();
    for _ in 0..limit {
      limiter.acquire().await;
    }
    let single = start.elapsed();

    let limiter = RateLimiter::new(limit, window);
    let start = Instant::now();
    for _ in 0..(2 * limit) {
      limiter.acquire().await;
    }
    let double = start.elapsed();

    assert!(double >= single + window, "single={single:?} double={double:?}");
  }

  #[tokio::test(start_paused = true)]
  async fn test_no_window_holds_more_than_limit() {
    let window = Duration::from_secs(1);
    let limiter = Arc::new(RateLimiter::new(3, window));
    let stamps = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for _ in 0..10 {
      let limiter = limiter.clone();
      let stamps = stamps.clone();
      handles.push(tokio::spawn(async move {
        limiter.acquire().await;
        stamps.lock().await.push(Instant::now());
      }));
    }
    for handle in handles {
      handle.await.unwrap();
    }

    let mut stamps = stamps.lock().await.clone();
    stamps.sort();
    assert_eq!(stamps.len(), 10);
    for pair in stamps.windows(4) {
      assert!(pair[3].duration_since(pair[0]) >= window);
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_permits_replenish_after_window() {
    let window = Duration::from_secs(5);
    let limiter = RateLimiter::new(2, window);

    limiter.acquire().await;
    limiter.acquire().await;

    tokio::time::advance(window).await;

    let start = Instant::now();
    limiter.acquire().await;
    assert_eq!(start.elapsed(), Duration::ZERO);
  }
}
