//! Process-wide admission control for upstream calls.
//!
//! Every call passes through one [`RequestScheduler`] regardless of scope: a FIFO-fair
//! semaphore caps concurrency and a start reservation keeps consecutive starts at least
//! `min_interval` apart. The reservation lock is never held across an `.await`.

// std
use std::time::Duration as StdDuration;
// crates.io
use tokio::{sync::Semaphore, time::Instant};
// self
use crate::{_prelude::*, config::UpstreamConfig};

/// Concurrency cap plus minimum start spacing shared by all upstream calls.
#[derive(Debug)]
pub struct RequestScheduler {
	semaphore: Semaphore,
	last_start: Mutex<Option<Instant>>,
	max_concurrent: usize,
	min_interval: StdDuration,
}
impl RequestScheduler {
	/// Creates a scheduler; a zero cap is raised to one.
	pub fn new(max_concurrent: usize, min_interval: StdDuration) -> Self {
		let max_concurrent = max_concurrent.max(1);

		Self {
			semaphore: Semaphore::new(max_concurrent),
			last_start: Mutex::new(None),
			max_concurrent,
			min_interval,
		}
	}

	/// Reads the scheduler settings from the runtime configuration.
	pub fn from_config(config: &UpstreamConfig) -> Self {
		Self::new(config.max_concurrent, config.min_interval)
	}

	/// Runs `work` once a permit is granted and its reserved start time has arrived.
	///
	/// Waiters are admitted in arrival order. The permit is released when `work` completes,
	/// fails, or is dropped.
	pub async fn schedule<T, F>(&self, work: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		let _permit = self.semaphore.acquire().await.map_err(|_| Error::SchedulerClosed)?;
		let start = self.reserve_start(Instant::now());

		tokio::time::sleep_until(start).await;

		work.await
	}

	/// Number of calls currently holding a permit.
	pub fn active_count(&self) -> usize {
		self.max_concurrent - self.semaphore.available_permits()
	}

	/// Configured concurrency cap.
	pub fn max_concurrent(&self) -> usize {
		self.max_concurrent
	}

	/// Stops admitting calls; queued and future callers get [`Error::SchedulerClosed`].
	pub fn close(&self) {
		self.semaphore.close();
	}

	fn reserve_start(&self, now: Instant) -> Instant {
		let mut last_start = self.last_start.lock();
		let start = match *last_start {
			Some(previous) => now.max(previous + self.min_interval),
			None => now,
		};

		*last_start = Some(start);

		start
	}
}
