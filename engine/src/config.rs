//! Engine configuration, populated by the CLI crate (spec.md §6.2's confirmed defaults).

use std::net::SocketAddr;

use dns::Rcode;

use crate::output::Format;
use crate::resolver::Selection;

/// The retry policy: which rcodes are considered "unacceptable" and trigger a retry, same as
/// a timeout would. `never` disables retries outright regardless of this set's contents.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
	unacceptable: [bool; 16],
	pub never: bool,
}

impl RetryPolicy {
	/// Default policy: retry on `REFUSED` only, matching `original_source/main.c`'s
	/// `retry_codes[REFUSED] = true` default.
	#[must_use]
	pub fn default_policy() -> Self {
		let mut unacceptable = [false; 16];
		unacceptable[u8::from(Rcode::Refused) as usize] = true;
		Self { unacceptable, never: false }
	}

	#[must_use]
	pub fn never() -> Self {
		Self { unacceptable: [false; 16], never: true }
	}

	#[must_use]
	pub fn empty() -> Self {
		Self { unacceptable: [false; 16], never: false }
	}

	pub fn mark_unacceptable(&mut self, rcode: Rcode) {
		self.unacceptable[(u8::from(rcode) & 0b1111) as usize] = true;
	}

	#[must_use]
	pub fn is_unacceptable(&self, rcode: Rcode) -> bool {
		!self.never && self.unacceptable[(u8::from(rcode) & 0b1111) as usize]
	}
}

/// Aggression level: how eagerly the engine pushes new sends (GLOSSARY).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Aggression {
	/// Completion-driven only.
	Zero,
	/// Warmup send-readiness, then completion-driven.
	One,
	/// Always send-readiness driven, plus completion kicks.
	Two,
}

impl Aggression {
	#[must_use]
	pub fn from_u8(v: u8) -> Self {
		match v {
			0 => Self::Zero,
			1 => Self::One,
			_ => Self::Two,
		}
	}

	/// Whether completion should immediately pump admission (spec.md §4.3 "Completion").
	#[must_use]
	pub fn pumps_on_completion(self) -> bool {
		matches!(self, Self::Zero | Self::Two)
	}

	/// Whether send-readiness stays armed once `Querying` begins (spec.md §4.3).
	#[must_use]
	pub fn keeps_send_readiness(self) -> bool {
		matches!(self, Self::Two)
	}
}

pub struct EngineConfig {
	pub resolve_count: u32,
	pub interval_ms: u64,
	pub hashmap_size: usize,
	pub timed_ring_buckets: usize,
	pub aggression: Aggression,
	pub retry: RetryPolicy,
	pub recursion_desired: bool,
	pub selection: Selection,
	pub qtype: u16,
	pub output_format: Format,
	pub quiet: bool,
	pub binds: Vec<SocketAddr>,
	pub resolvers: Vec<SocketAddr>,
}

impl EngineConfig {
	#[must_use]
	pub fn max_retries(&self) -> u32 {
		self.resolve_count.saturating_sub(1)
	}
}

impl Default for EngineConfig {
	/// Defaults confirmed against `original_source/main.c`'s `parse_cmd`.
	fn default() -> Self {
		Self {
			resolve_count: 50,
			interval_ms: 500,
			hashmap_size: 100_000,
			timed_ring_buckets: 10_000,
			aggression: Aggression::Zero,
			retry: RetryPolicy::default_policy(),
			recursion_desired: true,
			selection: Selection::Random,
			qtype: dns::wire::TYPE_A,
			output_format: Format::Full,
			quiet: false,
			binds: Vec::new(),
			resolvers: Vec::new(),
		}
	}
}
