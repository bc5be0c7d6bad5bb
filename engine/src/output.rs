//! Output sinks: simple text (`S`), full text (`F`), and binary (`B`) (spec.md §6).
//!
//! The binary format is preserved exactly, host-endian and host-layout, per the resolved design
//! note in SPEC_FULL.md §9 ("Binary output format", option (a)): existing tooling that reads
//! this format keys off the self-describing header, not off any Rust-side type.

use std::io::{self, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use dns::{type_name, Message};

/// Linux/glibc `sockaddr_storage` layout constants (spec.md §6's binary header table). These
/// describe the buffer this writer itself produces; a reader need not share this project's
/// notion of the struct; it only needs to honor the header's declared sizes and offsets (R2).
mod sockaddr_layout {
	pub const STORAGE_LEN: usize = 128;
	pub const FAMILY_OFFSET: usize = 0;
	pub const FAMILY_SIZE: usize = 2;

	pub const AF_INET: u16 = 2;
	pub const SIN_ADDR_OFFSET: usize = 4;
	pub const SIN_PORT_OFFSET: usize = 2;

	pub const AF_INET6: u16 = 10;
	pub const SIN6_ADDR_OFFSET: usize = 8;
	pub const SIN6_PORT_OFFSET: usize = 2;
}

const BINARY_FORMAT_VERSION: u32 = 1;

/// Fills a `sockaddr_storage`-shaped buffer for `addr`, following the same offsets the file
/// header declares.
fn encode_sockaddr(addr: SocketAddr) -> [u8; sockaddr_layout::STORAGE_LEN] {
	use sockaddr_layout::*;

	let mut buf = [0u8; STORAGE_LEN];

	match addr {
		SocketAddr::V4(v4) => {
			buf[FAMILY_OFFSET..FAMILY_OFFSET + FAMILY_SIZE].copy_from_slice(&AF_INET.to_ne_bytes());
			buf[SIN_PORT_OFFSET..SIN_PORT_OFFSET + 2].copy_from_slice(&v4.port().to_be_bytes());
			buf[SIN_ADDR_OFFSET..SIN_ADDR_OFFSET + 4].copy_from_slice(&v4.ip().octets());
		}
		SocketAddr::V6(v6) => {
			buf[FAMILY_OFFSET..FAMILY_OFFSET + FAMILY_SIZE].copy_from_slice(&AF_INET6.to_ne_bytes());
			buf[SIN6_PORT_OFFSET..SIN6_PORT_OFFSET + 2].copy_from_slice(&v6.port().to_be_bytes());
			buf[SIN6_ADDR_OFFSET..SIN6_ADDR_OFFSET + 16].copy_from_slice(&v6.ip().octets());
		}
	}

	buf
}

/// Writes the one-time binary file header (spec.md §6's table).
pub fn write_binary_header(out: &mut impl Write) -> io::Result<()> {
	use sockaddr_layout::*;

	out.write_all(b"massdns\0")?;
	out.write_all(&0x1234_5678u32.to_ne_bytes())?;
	out.write_all(&BINARY_FORMAT_VERSION.to_ne_bytes())?;
	out.write_all(&(std::mem::size_of::<usize>() as u8).to_ne_bytes())?;

	write_size(out, STORAGE_LEN)?;
	write_size(out, FAMILY_OFFSET)?;
	write_size(out, FAMILY_SIZE)?;
	out.write_all(&AF_INET.to_ne_bytes())?;
	write_size(out, SIN_ADDR_OFFSET)?;
	write_size(out, SIN_PORT_OFFSET)?;
	out.write_all(&AF_INET6.to_ne_bytes())?;
	write_size(out, SIN6_ADDR_OFFSET)?;
	write_size(out, SIN6_PORT_OFFSET)?;

	Ok(())
}

fn write_size(out: &mut impl Write, v: usize) -> io::Result<()> {
	out.write_all(&v.to_ne_bytes())
}

/// Appends one reply frame: timestamp, `sockaddr_storage`, payload length, raw payload.
pub fn write_binary_record(out: &mut impl Write, server: SocketAddr, payload: &[u8]) -> io::Result<()> {
	let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;

	out.write_all(&timestamp.to_ne_bytes())?;
	out.write_all(&encode_sockaddr(server))?;
	out.write_all(&(payload.len() as u16).to_ne_bytes())?;
	out.write_all(payload)?;

	Ok(())
}

/// Writes one `<name> <type> <rdata>` line per answer whose name matches the question name
/// (spec.md §6 "simple text").
pub fn write_simple(out: &mut impl Write, message: &Message) -> io::Result<()> {
	for answer in &message.answers {
		if !answer.name.eq_ignore_ascii_case(&message.question_name) {
			continue;
		}

		writeln!(out, "{} {} {}", answer.name, type_name(answer.ty), answer.rdata_string())?;
	}

	Ok(())
}

/// Writes a dig-style multi-line block (spec.md §6 "full text").
pub fn write_full(out: &mut impl Write, server: SocketAddr, payload_len: usize, message: &Message) -> io::Result<()> {
	let unix = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();

	writeln!(out, ";; Server: {server}")?;
	writeln!(out, ";; Size: {payload_len}")?;
	writeln!(out, ";; Unix time: {unix}")?;
	writeln!(out, ";; QUESTION SECTION:")?;
	writeln!(out, ";{} IN {}", message.question_name, type_name(message.question_type))?;
	writeln!(out, ";; ANSWER SECTION:")?;

	for answer in &message.answers {
		writeln!(out, "{}\t{}\tIN\t{}\t{}", answer.name, answer.ttl, type_name(answer.ty), answer.rdata_string())?;
	}

	writeln!(out)?;

	Ok(())
}

/// Which text/binary format a worker's output file uses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Format {
	Simple,
	Full,
	Binary,
}

/// Owns the output file (already suffixed with the worker index by the caller, spec.md §5) and
/// dispatches to the right writer per reply.
pub struct Sink<W> {
	format: Format,
	out: W,
	header_written: bool,
	flush_every: bool,
}

impl<W: Write> Sink<W> {
	#[must_use]
	pub fn new(format: Format, out: W) -> Self {
		Self { format, out, header_written: false, flush_every: false }
	}

	/// When set, every reply is flushed individually instead of only at shutdown (`--flush`).
	#[must_use]
	pub fn with_flush_every(mut self, flush_every: bool) -> Self {
		self.flush_every = flush_every;
		self
	}

	pub fn write_reply(&mut self, server: SocketAddr, payload: &[u8], message: &Message) -> io::Result<()> {
		let result = match self.format {
			Format::Simple => write_simple(&mut self.out, message),
			Format::Full => write_full(&mut self.out, server, payload.len(), message),
			Format::Binary => {
				if !self.header_written {
					write_binary_header(&mut self.out)?;
					self.header_written = true;
				}

				write_binary_record(&mut self.out, server, payload)
			}
		};

		if self.flush_every {
			self.out.flush()?;
		}

		result
	}

	pub fn flush(&mut self) -> io::Result<()> {
		self.out.flush()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_message() -> Message {
		Message {
			header: dns::Header {
				id: 1,
				flags: dns::Flags { qr: true, opcode: dns::Opcode::Query, aa: false, tc: false, rd: true, ra: true, rcode: dns::Rcode::Ok },
				qdcount: 1,
				ancount: 1,
				nscount: 0,
				arcount: 0,
			},
			question_name: "example.com.".into(),
			question_type: dns::wire::TYPE_A,
			question_class: dns::wire::CLASS_IN,
			answers: vec![dns::Record { name: "example.com.".into(), ty: dns::wire::TYPE_A, class: dns::wire::CLASS_IN, ttl: 300, rdata: vec![93, 184, 216, 34] }],
		}
	}

	#[test]
	fn simple_format_emits_one_line_per_matching_answer() {
		let mut buf = Vec::new();
		write_simple(&mut buf, &sample_message()).unwrap();
		assert_eq!(String::from_utf8(buf).unwrap(), "example.com. A 93.184.216.34\n");
	}

	#[test]
	fn binary_header_starts_with_magic_and_endian_probe() {
		let mut buf = Vec::new();
		write_binary_header(&mut buf).unwrap();

		assert_eq!(&buf[0..8], b"massdns\0");
		assert_eq!(u32::from_ne_bytes(buf[8..12].try_into().unwrap()), 0x1234_5678);
	}

	#[test]
	fn binary_record_round_trips_length_and_payload() {
		let mut buf = Vec::new();
		let server: SocketAddr = "8.8.8.8:53".parse().unwrap();
		write_binary_record(&mut buf, server, b"hello").unwrap();

		let sockaddr_len = sockaddr_layout::STORAGE_LEN;
		let len_offset = 8 + sockaddr_len;
		let len = u16::from_ne_bytes(buf[len_offset..len_offset + 2].try_into().unwrap());
		assert_eq!(len, 5);
		assert_eq!(&buf[len_offset + 2..], b"hello");
	}
}
