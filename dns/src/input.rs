//! Domain-list and resolver-list loading (spec.md §6).

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::net::{SocketAddr, ToSocketAddrs};

use log::warn;

const DEFAULT_PORT: u16 = 53;

/// A line-oriented source of domain names, plus a best-effort progress estimate.
///
/// When the underlying file is seekable its size backs the estimate; reading from standard
/// input (`-`) leaves the total unknown, and progress is reported as 0%.
pub struct Domains<R> {
	reader: BufReader<R>,
	total_bytes: Option<u64>,
	bytes_read: u64,
}

impl Domains<File> {
	pub fn open(path: &str) -> io::Result<Self> {
		if path == "-" {
			return Err(io::Error::new(io::ErrorKind::Unsupported, "use Domains::stdin for `-`"));
		}

		let mut file = File::open(path)?;
		let total_bytes = file.seek(SeekFrom::End(0)).ok().and_then(|n| file.seek(SeekFrom::Start(0)).ok().map(|_| n));

		Ok(Self { reader: BufReader::new(file), total_bytes, bytes_read: 0 })
	}
}

impl Domains<io::Stdin> {
	#[must_use]
	pub fn stdin() -> Self {
		Self { reader: BufReader::new(io::stdin()), total_bytes: None, bytes_read: 0 }
	}
}

/// Either a seekable file or standard input, so a caller that doesn't know which one it got
/// until argument-parsing time (`-` meaning stdin) can still hold a single concrete `Domains<_>`
/// type rather than choosing between `Domains<File>` and `Domains<io::Stdin>` at every call site.
pub enum Source {
	File(File),
	Stdin(io::Stdin),
}

impl Read for Source {
	fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
		match self {
			Self::File(f) => f.read(buf),
			Self::Stdin(s) => s.read(buf),
		}
	}
}

impl Domains<Source> {
	/// `-` means standard input (progress is then always reported as unknown); anything else is
	/// opened as a seekable file.
	pub fn open_path_or_stdin(path: &str) -> io::Result<Self> {
		if path == "-" {
			return Ok(Self { reader: BufReader::new(Source::Stdin(io::stdin())), total_bytes: None, bytes_read: 0 });
		}

		let mut file = File::open(path)?;
		let total_bytes = file.seek(SeekFrom::End(0)).ok().and_then(|n| file.seek(SeekFrom::Start(0)).ok().map(|_| n));

		Ok(Self { reader: BufReader::new(Source::File(file)), total_bytes, bytes_read: 0 })
	}
}

impl<R: Read> Domains<R> {
	/// Wraps an arbitrary reader with no progress estimate (the total size is unknown).
	#[must_use]
	pub fn from_reader(reader: R) -> Self {
		Self { reader: BufReader::new(reader), total_bytes: None, bytes_read: 0 }
	}

	/// Reads the next non-blank line, trimmed, or `None` at end of input.
	pub fn next_domain(&mut self) -> io::Result<Option<String>> {
		loop {
			let mut line = String::new();
			let n = self.reader.read_line(&mut line)?;

			if n == 0 {
				return Ok(None);
			}

			self.bytes_read += n as u64;
			let trimmed = line.trim_end();

			if trimmed.is_empty() {
				continue;
			}

			return Ok(Some(trimmed.to_owned()));
		}
	}

	/// Progress through the input, in the range `0.0..=1.0`. `0.0` if the total size is unknown.
	#[must_use]
	pub fn progress(&self) -> f64 {
		match self.total_bytes {
			Some(0) | None => 0.0,
			Some(total) => (self.bytes_read as f64 / total as f64).min(1.0),
		}
	}
}

/// Appends a trailing dot if absent and lowercases the name, producing a canonical lookup key.
#[must_use]
pub fn canonicalize(name: &str) -> String {
	let mut out = name.to_ascii_lowercase();

	if !out.ends_with('.') {
		out.push('.');
	}

	out
}

/// Parses a resolvers file: one `IP` or `IP:port` literal per non-blank line, default port 53.
/// Lines that fail to parse are logged and skipped, not fatal.
pub fn read_resolvers(path: &str) -> io::Result<Vec<SocketAddr>> {
	let file = File::open(path)?;
	let reader = BufReader::new(file);
	let mut resolvers = Vec::new();

	for line in reader.lines() {
		let line = line?;
		let trimmed = line.trim();

		if trimmed.is_empty() {
			continue;
		}

		match parse_resolver(trimmed) {
			Some(addr) => resolvers.push(addr),
			None => warn!("skipping unparseable resolver line: {trimmed}"),
		}
	}

	Ok(resolvers)
}

fn parse_resolver(s: &str) -> Option<SocketAddr> {
	if let Ok(addr) = s.parse::<SocketAddr>() {
		return Some(addr);
	}

	if let Ok(ip) = s.parse::<std::net::IpAddr>() {
		return Some(SocketAddr::new(ip, DEFAULT_PORT));
	}

	// Bracketed IPv6 without a port, e.g. "[::1]", falls through std's SocketAddr parser; try
	// appending the default port the way a `host:port` literal would be resolved.
	(s, DEFAULT_PORT).to_socket_addrs().ok()?.next()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn canonicalize_lowercases_and_appends_dot() {
		assert_eq!(canonicalize("Example.COM"), "example.com.");
		assert_eq!(canonicalize("example.com."), "example.com.");
	}

	#[test]
	fn resolver_parses_bare_ip_with_default_port() {
		assert_eq!(parse_resolver("8.8.8.8"), Some("8.8.8.8:53".parse().unwrap()));
	}

	#[test]
	fn resolver_parses_ip_with_explicit_port() {
		assert_eq!(parse_resolver("8.8.8.8:5353"), Some("8.8.8.8:5353".parse().unwrap()));
	}

	#[test]
	fn resolver_rejects_garbage() {
		assert_eq!(parse_resolver("not-an-address"), None);
	}
}
