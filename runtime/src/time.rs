//! Monotonic-and-wall-clock time, without an actor-scheduler core to borrow them from.
//!
//! The teacher derived both from `stakker::Core`'s own simulated clock; this project has no
//! scheduler core, so a [`Clock`] simply remembers its own creation instant and wall time and
//! derives both later from `Instant::now()`, the same arithmetic the teacher used.

use std::time::{Instant, SystemTime};

pub struct Clock {
	start_instant: Instant,
	start_system: SystemTime,
}

impl Clock {
	#[must_use]
	pub fn start() -> Self {
		Self { start_instant: Instant::now(), start_system: SystemTime::now() }
	}

	/// The current system (wall-clock) time, derived from the monotonic clock since startup.
	#[must_use]
	pub fn system(&self) -> SystemTime {
		self.start_system + self.start_instant.elapsed()
	}

	/// The current UNIX time in seconds.
	#[must_use]
	pub fn unix(&self) -> u32 {
		let unix = self.system().duration_since(SystemTime::UNIX_EPOCH).expect("current time should be after the UNIX epoch");

		unix.as_secs().try_into().expect("32-bit UNIX time should not overflow")
	}

	/// Monotonic time elapsed since the clock started, in whole milliseconds.
	#[must_use]
	pub fn elapsed_ms(&self) -> u64 {
		self.start_instant.elapsed().as_millis() as u64
	}
}

impl Default for Clock {
	fn default() -> Self {
		Self::start()
	}
}
