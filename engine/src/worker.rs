//! Multi-process worker model (spec.md §5): fork `N` workers before the event loop starts,
//! each partitioning the input by `line_index mod N`; only statistics cross worker boundaries,
//! over unidirectional pipes from every non-coordinator worker to worker 0.

#[cfg(target_family = "unix")]
pub use unix::{spawn, Workers};

#[cfg(not(target_family = "unix"))]
pub use fallback::{spawn, Workers};

/// `fork()` has no equivalent outside Unix; a non-Unix build is always a single process (the
/// CLI rejects `--processes > 1` up front rather than silently ignoring it here).
#[cfg(not(target_family = "unix"))]
mod fallback {
	use std::fs::File;
	use std::io;

	pub struct Workers {
		pub index: u32,
		pub count: u32,
		pub stats_readers: Vec<File>,
		pub stats_writer: Option<File>,
	}

	impl Workers {
		#[must_use]
		pub fn is_coordinator(&self) -> bool {
			self.index == 0
		}
	}

	pub fn spawn(_count: u32) -> io::Result<Workers> {
		Ok(Workers { index: 0, count: 1, stats_readers: Vec::new(), stats_writer: None })
	}
}

#[cfg(target_family = "unix")]
mod unix {
	use std::fs::File;
	use std::io;
	use std::os::fd::{FromRawFd, RawFd};

	/// This process's role after [`spawn`] returns: which worker index it is, how many
	/// workers exist in total, and its end of the stats pipe(s).
	pub struct Workers {
		pub index: u32,
		pub count: u32,
		/// Coordinator only: one read end per other worker, in worker-index order.
		pub stats_readers: Vec<File>,
		/// Non-coordinator workers only: the write end of their pipe to the coordinator.
		pub stats_writer: Option<File>,
	}

	impl Workers {
		#[must_use]
		pub fn is_coordinator(&self) -> bool {
			self.index == 0
		}
	}

	fn set_nonblocking(fd: RawFd) -> io::Result<()> {
		let flags = unsafe { libc::fcntl(fd, libc::F_GETFL, 0) };

		if flags < 0 {
			return Err(io::Error::last_os_error());
		}

		if unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } < 0 {
			return Err(io::Error::last_os_error());
		}

		Ok(())
	}

	/// Forks `count - 1` additional worker processes, returning each process's own [`Workers`].
	/// Every pipe is created up front, before any `fork()`, so each child's fd table at fork
	/// time is identical and cleanup is simply "close every end that isn't mine" — unlike
	/// incrementally forking while accumulating pipes, which would leave earlier workers'
	/// pipe ends dangling open in later children.
	///
	/// Sockets must be created only after this returns (SPEC_FULL.md §9): this function itself
	/// never touches a socket.
	pub fn spawn(count: u32) -> io::Result<Workers> {
		if count <= 1 {
			return Ok(Workers { index: 0, count: 1, stats_readers: Vec::new(), stats_writer: None });
		}

		let mut pipes = Vec::with_capacity(count as usize - 1);

		for _ in 1..count {
			let mut fds = [0 as RawFd; 2];

			if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
				return Err(io::Error::last_os_error());
			}

			pipes.push((fds[0], fds[1]));
		}

		for (i, &(_, write_fd)) in pipes.iter().enumerate() {
			let worker = i as u32 + 1;

			match unsafe { libc::fork() } {
				-1 => return Err(io::Error::last_os_error()),
				0 => {
					for (j, &(read_fd, other_write)) in pipes.iter().enumerate() {
						unsafe { libc::close(read_fd) };

						if j as u32 + 1 != worker {
							unsafe { libc::close(other_write) };
						}
					}

					set_nonblocking(write_fd)?;
					return Ok(Workers { index: worker, count, stats_readers: Vec::new(), stats_writer: Some(unsafe { File::from_raw_fd(write_fd) }) });
				}
				_pid => {}
			}
		}

		let mut stats_readers = Vec::with_capacity(pipes.len());

		for &(read_fd, write_fd) in &pipes {
			unsafe { libc::close(write_fd) };
			set_nonblocking(read_fd)?;
			stats_readers.push(unsafe { File::from_raw_fd(read_fd) });
		}

		Ok(Workers { index: 0, count, stats_readers, stats_writer: None })
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	// `spawn(2..)` forks a real child process; exercising that here would make the test
	// binary itself fork mid test-run, which is unsafe to do without an immediate `exit()`
	// in the child branch (the forked copy would otherwise go on to run the rest of the test
	// suite a second time). The `count <= 1` path below is the only shape that's safe to
	// cover without a subprocess-based test harness.

	#[test]
	fn single_process_spawn_is_always_its_own_coordinator() {
		let workers = spawn(1).unwrap();

		assert!(workers.is_coordinator());
		assert_eq!(workers.count, 1);
		assert_eq!(workers.index, 0);
		assert!(workers.stats_readers.is_empty());
		assert!(workers.stats_writer.is_none());
	}

	#[test]
	fn zero_is_treated_the_same_as_one_worker() {
		let workers = spawn(0).unwrap();
		assert_eq!(workers.count, 1);
	}
}
