//! The socket set (spec.md §3 "socket entry", §4.3 "source socket selection"): one or more UDP
//! endpoints per address family, each independently readable and writable.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use rand::Rng;
use runtime::{Interest, Poller, Token};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Family {
	V4,
	V6,
}

impl Family {
	#[must_use]
	pub fn of(addr: SocketAddr) -> Self {
		match addr {
			SocketAddr::V4(_) => Self::V4,
			SocketAddr::V6(_) => Self::V6,
		}
	}
}

pub struct QuerySocket {
	pub socket: UdpSocket,
	pub family: Family,
	pub token: Token,
}

/// The sockets a single worker sends/receives queries through, bound strictly after `fork()`
/// (spec.md §5's resolution of the "per-worker socket ownership" open question).
pub struct SocketSet {
	sockets: Vec<QuerySocket>,
}

impl SocketSet {
	/// Binds one non-blocking UDP socket per address in `binds`, registering each with
	/// `poller`. A bind failure is not fatal to the set as a whole; the caller (startup code)
	/// decides whether an empty resulting family is acceptable.
	pub fn bind(binds: &[SocketAddr], poller: &mut Poller, interest: Interest) -> io::Result<Self> {
		let mut sockets = Vec::with_capacity(binds.len());

		for &addr in binds {
			let socket = UdpSocket::bind(addr)?;
			socket.set_nonblocking(true)?;
			let token = poller.register(&socket, interest);
			sockets.push(QuerySocket { socket, family: Family::of(addr), token });
		}

		Ok(Self { sockets })
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.sockets.is_empty()
	}

	#[must_use]
	pub fn iter(&self) -> impl Iterator<Item = &QuerySocket> {
		self.sockets.iter()
	}

	#[must_use]
	pub fn has_family(&self, family: Family) -> bool {
		self.sockets.iter().any(|s| s.family == family)
	}

	/// Chooses a source socket uniformly at random among those matching `family`.
	#[must_use]
	pub fn pick(&self, family: Family) -> Option<&QuerySocket> {
		let matching: Vec<_> = self.sockets.iter().filter(|s| s.family == family).collect();

		if matching.is_empty() {
			return None;
		}

		Some(matching[rand::thread_rng().gen_range(0..matching.len())])
	}

	pub fn set_write_interest(&mut self, poller: &mut Poller, write: bool) {
		for s in &self.sockets {
			poller.set_interest(s.token, Interest { read: true, write });
		}
	}
}
