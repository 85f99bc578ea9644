//! Exponential backoff for rate-limited upstream calls.
//!
//! Only [`Error::RateLimited`] is retried. The delay before the next attempt is the server's
//! `Retry-After` hint when one was sent, otherwise `base * 2^n` plus up to half of that as
//! jitter. Both are capped at the configured ceiling. Every other error returns on the spot.

// std
use std::time::Duration as StdDuration;
// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, config::UpstreamConfig};

/// Bounded retry schedule applied to every upstream call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Total attempts, the first one included.
	pub max_attempts: u32,
	/// Delay before the first retry (before jitter).
	pub base_delay: StdDuration,
	/// Ceiling applied to computed delays and to server hints.
	pub max_delay: StdDuration,
}
impl RetryPolicy {
	/// Creates a policy; at least one attempt is always made.
	pub fn new(max_attempts: u32, base_delay: StdDuration, max_delay: StdDuration) -> Self {
		Self { max_attempts: max_attempts.max(1), base_delay, max_delay: max_delay.max(base_delay) }
	}

	/// Reads the retry settings from the runtime configuration.
	pub fn from_config(config: &UpstreamConfig) -> Self {
		Self::new(config.retry_max_attempts, config.retry_base_delay, config.retry_max_delay)
	}

	/// Un-jittered delay before retry number `retry` (zero based), capped at `max_delay`.
	pub fn base_backoff(&self, retry: u32) -> StdDuration {
		self.base_delay.saturating_mul(2_u32.saturating_pow(retry)).min(self.max_delay)
	}

	/// Jittered delay before retry number `retry` (zero based).
	///
	/// The jitter never exceeds half of the un-jittered step, so consecutive delays never shrink.
	pub fn backoff_for(&self, retry: u32) -> StdDuration {
		let step = self.base_backoff(retry);
		let half = u64::try_from((step / 2).as_nanos()).unwrap_or(u64::MAX);
		let jitter = if half == 0 {
			StdDuration::ZERO
		} else {
			StdDuration::from_nanos(rand::rng().random_range(0..=half))
		};

		(step + jitter).min(self.max_delay)
	}

	/// Delay to wait before retry number `retry`, preferring the server's hint.
	///
	/// A hint longer than `max_delay` is cut to `max_delay`.
	pub fn delay_for(&self, retry: u32, retry_after: Option<StdDuration>) -> StdDuration {
		match retry_after {
			Some(hint) => hint.min(self.max_delay),
			None => self.backoff_for(retry),
		}
	}

	/// Runs `operation` until it succeeds, fails with a non-retryable error, or the attempts run
	/// out. The closure receives the one-based attempt number.
	pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T>
	where
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Result<T>>,
	{
		let mut attempt = 1;

		loop {
			match operation(attempt).await {
				Err(Error::RateLimited { status, retry_after }) if attempt < self.max_attempts => {
					let delay = self.delay_for(attempt - 1, retry_after);

					tracing::warn!(
						attempt,
						max_attempts = self.max_attempts,
						status,
						?delay,
						"Upstream rate limited the call; backing off."
					);
					tokio::time::sleep(delay).await;

					attempt += 1;
				},
				result => return result,
			}
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(5, StdDuration::from_millis(500), StdDuration::from_secs(30))
	}
}
