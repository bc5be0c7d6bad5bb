//! The lookup record (spec.md §3): a mutable entity created on admission and destroyed on
//! completion, living in the [`collections::pool::Pool`].

use std::net::SocketAddr;

use collections::wheel;

use crate::key::LookupKey;

/// Distinguishes what a timing-wheel entry's payload means, so `Engine::on_tick` can dispatch
/// without a second table lookup: a lookup's retry deadline, or the periodic stats tick.
#[derive(Clone, Copy, Debug)]
pub enum TimerPayload {
	Timeout(collections::pool::Handle),
	ProgressTick,
}

/// A single in-flight (or about-to-be-admitted) DNS lookup.
///
/// Invariants (spec.md §3, I1-I3): at most one record per key lives in the correlation table at
/// once (enforced by the table itself); exactly one timing-wheel entry references a record while
/// it's in the table (`timer` is always `Some` once admitted); `retries <= max_retries`.
pub struct LookupRecord {
	pub key: LookupKey,
	/// The resolver this lookup is pinned to once chosen; re-used across retries when `sticky`.
	pub resolver: Option<SocketAddr>,
	pub retries: u32,
	/// Random per-lookup transaction id, stable for the record's lifetime.
	pub xid: u16,
	pub timer: Option<wheel::Handle>,
}

impl LookupRecord {
	#[must_use]
	pub fn new(key: LookupKey, xid: u16) -> Self {
		Self { key, resolver: None, retries: 0, xid, timer: None }
	}
}
