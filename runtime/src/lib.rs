//! A non-blocking I/O readiness multiplexer built directly on `poll(2)`/`WSAPoll`.
//!
//! Grounded on the teacher's `runtime` crate, with the `stakker`-based `Fwd` callback dispatch
//! removed: the engine this project drives is a flat, single-threaded state machine that
//! inspects readiness itself once per event-loop iteration, not an actor graph that wants
//! events pushed to it. The raw `poll` wrapper and its cross-platform `sys` shim are unchanged
//! in spirit from the teacher's version.

use std::time::Duration;

pub mod logger;
pub mod time;

#[cfg(target_family = "unix")]
mod sys {
	pub use std::os::fd::{AsRawFd, RawFd};

	pub use libc::{poll, pollfd as Poll, POLLERR, POLLHUP, POLLIN, POLLNVAL, POLLOUT};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_fd()
	}

	pub fn make_poll(fd: RawFd, events: i16) -> Poll {
		Poll { fd, events, revents: 0 }
	}
}

#[cfg(target_family = "windows")]
mod sys {
	pub use std::os::windows::io::AsRawSocket as AsRawFd;

	pub use windows_sys::Win32::Networking::WinSock::{
		WSAPoll as poll, POLLERR, POLLHUP, POLLNVAL, POLLRDNORM as POLLIN, POLLWRNORM as POLLOUT, SOCKET as RawFd, WSAPOLLFD as Poll,
	};

	pub fn as_raw<T: AsRawFd>(t: &T) -> RawFd {
		t.as_raw_socket() as _
	}

	pub fn make_poll(fd: RawFd, events: i16) -> Poll {
		Poll { fd, events: events as u16, revents: 0 }
	}
}

pub use sys::AsRawFd;
use sys::*;
use utils::error::*;

fn as_timeout(t: Option<Duration>) -> i32 {
	t.and_then(|d| d.as_millis().try_into().ok()).unwrap_or(-1)
}

/// Opaque handle to a descriptor registered with a [`Poller`]. Stable for the descriptor's
/// lifetime; this project never deregisters a socket once registered, since every query
/// socket, stats pipe, and capture handle a worker owns lives until the worker exits.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Token(usize);

/// Readiness a caller wants to be notified of, and what was observed after a [`Poller::wait`].
#[derive(Clone, Copy, Default, PartialEq, Eq, Debug)]
pub struct Interest {
	pub read: bool,
	pub write: bool,
}

impl Interest {
	pub const READ: Self = Self { read: true, write: false };
	pub const READ_WRITE: Self = Self { read: true, write: true };

	fn to_events(self) -> i16 {
		let mut events = 0;

		if self.read {
			events |= POLLIN;
		}

		if self.write {
			events |= POLLOUT;
		}

		events
	}
}

/// A thin wrapper over `poll(2)`: registers raw descriptors once, waits for readiness, and
/// reports which registered descriptors became readable/writable on the last wait.
pub struct Poller {
	fds: Vec<Poll>,
}

impl Poller {
	#[must_use]
	pub fn new() -> Self {
		Self { fds: Vec::new() }
	}

	/// Registers `fd` for `interest`, returning a token used to query its readiness.
	pub fn register<T: AsRawFd>(&mut self, fd: &T, interest: Interest) -> Token {
		let token = Token(self.fds.len());
		self.fds.push(make_poll(as_raw(fd), interest.to_events()));
		token
	}

	/// Changes which readiness a registered descriptor is polled for, e.g. disarming
	/// write-readiness once the engine leaves `Warmup`.
	pub fn set_interest(&mut self, token: Token, interest: Interest) {
		self.fds[token.0].events = interest.to_events();
	}

	/// Blocks up to `timeout` for any registered descriptor to become ready. `None` waits
	/// indefinitely; the event loop always passes a bounded timeout (spec.md caps it at 1ms).
	pub fn wait(&mut self, timeout: Option<Duration>) -> Result<()> {
		let ret = unsafe { poll(self.fds.as_mut_ptr(), self.fds.len().try_into().expect("fewer than u32::MAX fds"), as_timeout(timeout)) };

		if ret < 0 {
			let err = std::io::Error::last_os_error();
			log::error!("poll() failed: {err}");
			return Err(());
		}

		Ok(())
	}

	#[must_use]
	pub fn readable(&self, token: Token) -> bool {
		let revents = self.fds[token.0].revents;
		revents as i16 & (POLLIN | POLLERR | POLLHUP | POLLNVAL) != 0
	}

	#[must_use]
	pub fn writable(&self, token: Token) -> bool {
		self.fds[token.0].revents as i16 & POLLOUT != 0
	}
}

impl Default for Poller {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(all(test, target_family = "unix"))]
mod tests {
	use std::net::UdpSocket;

	use super::*;

	#[test]
	fn freshly_bound_socket_is_write_ready_not_read_ready() {
		let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
		socket.set_nonblocking(true).unwrap();

		let mut poller = Poller::new();
		let token = poller.register(&socket, Interest::READ_WRITE);

		poller.wait(Some(Duration::from_millis(50))).unwrap();

		assert!(poller.writable(token));
		assert!(!poller.readable(token));
	}

	#[test]
	fn data_written_makes_socket_read_ready() {
		let a = UdpSocket::bind("127.0.0.1:0").unwrap();
		let b = UdpSocket::bind("127.0.0.1:0").unwrap();
		a.set_nonblocking(true).unwrap();

		b.send_to(b"hello", a.local_addr().unwrap()).unwrap();

		let mut poller = Poller::new();
		let token = poller.register(&a, Interest::READ);

		poller.wait(Some(Duration::from_millis(200))).unwrap();
		assert!(poller.readable(token));
	}
}
