//! Helpers around the monotonic clock used by every deadline in skiff
use std::time::Duration;

use tokio::time::Instant;

lazy_static::lazy_static! {
	static ref PROCESS_START: Instant = Instant::now();
}

/// Milliseconds elapsed on the monotonic clock since the process started.
/// Only meant for logging and coarse bookkeeping, never for deadlines:
/// deadlines are `tokio::time::Instant` values.
pub fn now_ms() -> u64 {
	PROCESS_START.elapsed().as_millis() as u64
}

/// A deadline `ms` milliseconds from now
pub fn deadline_ms(ms: u64) -> Instant {
	Instant::now() + Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_now_ms_monotonic() {
		let a = now_ms();
		let b = now_ms();
		assert!(b >= a);
	}

	#[test]
	fn test_deadline_in_future() {
		let dl = deadline_ms(50);
		assert!(dl > Instant::now());
	}
}
