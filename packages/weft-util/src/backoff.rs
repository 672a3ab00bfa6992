use std::time::Duration;

const DEFAULT_BASE: Duration = Duration::from_millis(100);
const DEFAULT_MAX: Duration = Duration::from_secs(5);
const DEFAULT_MAX_RETRIES: usize = 8;

/// Exponential backoff for transient failures (store writes, publishes).
///
/// `tick` sleeps for the next interval and returns `false` once the retry
/// budget is exhausted.
pub struct Backoff {
	base: Duration,
	max: Duration,
	max_retries: usize,
	attempt: usize,
}

impl Backoff {
	pub fn new(base: Duration, max: Duration, max_retries: usize) -> Self {
		Backoff {
			base,
			max,
			max_retries,
			attempt: 0,
		}
	}

	pub fn attempt(&self) -> usize {
		self.attempt
	}

	pub fn next_delay(&self) -> Duration {
		let exp = self.attempt.min(32) as u32;
		self.base
			.saturating_mul(2u32.saturating_pow(exp))
			.min(self.max)
	}

	pub async fn tick(&mut self) -> bool {
		if self.attempt >= self.max_retries {
			return false;
		}

		let delay = self.next_delay();
		self.attempt += 1;

		tokio::time::sleep(delay).await;

		true
	}
}

impl Default for Backoff {
	fn default() -> Self {
		Backoff::new(DEFAULT_BASE, DEFAULT_MAX, DEFAULT_MAX_RETRIES)
	}
}
