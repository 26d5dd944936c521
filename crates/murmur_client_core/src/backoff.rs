#![forbid(unsafe_code)]

use std::time::Duration;

/// Exponential reconnect delay: `base`, `2*base`, `4*base`, ... capped at `max`.
#[derive(Debug, Clone)]
pub struct Backoff {
	base: Duration,
	max: Duration,
	current: Duration,
}

impl Backoff {
	pub fn new(base: Duration, max: Duration) -> Self {
		let base = base.min(max);
		Self { base, max, current: base }
	}

	/// Delay to wait now; doubles the next one.
	pub fn next_delay(&mut self) -> Duration {
		let delay = self.current;
		self.current = self.current.checked_mul(2).unwrap_or(self.max).min(self.max);
		delay
	}

	/// The delay `next_delay` would return.
	pub fn peek(&self) -> Duration {
		self.current
	}

	/// Back to `base` after a successful open.
	pub fn reset(&mut self) {
		self.current = self.base;
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn doubles_until_capped() {
		let mut b = Backoff::new(Duration::from_secs(2), Duration::from_secs(10));
		let seen: Vec<u64> = (0..5).map(|_| b.next_delay().as_secs()).collect();
		assert_eq!(seen, vec![2, 4, 8, 10, 10]);
	}

	#[test]
	fn reset_returns_to_base() {
		let mut b = Backoff::new(Duration::from_secs(2), Duration::from_secs(300));
		b.next_delay();
		b.next_delay();
		assert_eq!(b.peek(), Duration::from_secs(8));
		b.reset();
		assert_eq!(b.next_delay(), Duration::from_secs(2));
	}

	#[test]
	fn huge_delays_saturate() {
		let mut b = Backoff::new(Duration::MAX / 2 + Duration::from_secs(1), Duration::MAX);
		b.next_delay();
		assert_eq!(b.peek(), Duration::MAX);
	}
}
