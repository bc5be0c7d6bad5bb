//! Plain byte-slice DNS message encode/decode.
//!
//! Grounded on the teacher's `net::dns` module (header layout, the `Rcode`/`Opcode` enums, the
//! `Flags` bitfield), rewritten against plain big-endian byte slices instead of `bilge`/`Cast`
//! zero-copy structs, since those existed to serve the teacher's actor-based packet pipeline,
//! which this project's flat event loop does not have.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

pub const HEADER_LEN: usize = 12;

pub const TYPE_A: u16 = 1;
pub const TYPE_NS: u16 = 2;
pub const TYPE_CNAME: u16 = 5;
pub const TYPE_SOA: u16 = 6;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_MX: u16 = 15;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;

pub const CLASS_IN: u16 = 1;

/// Name of a record type for text output, e.g. `A`, `AAAA`, or `TYPE65` for anything unlisted.
#[must_use]
pub fn type_name(ty: u16) -> String {
	match ty {
		TYPE_A => "A".into(),
		TYPE_NS => "NS".into(),
		TYPE_CNAME => "CNAME".into(),
		TYPE_SOA => "SOA".into(),
		TYPE_PTR => "PTR".into(),
		TYPE_MX => "MX".into(),
		TYPE_TXT => "TXT".into(),
		TYPE_AAAA => "AAAA".into(),
		other => format!("TYPE{other}"),
	}
}

/// Parses a record-type name back into its numeric code, for `--type` CLI parsing.
#[must_use]
pub fn parse_type_name(s: &str) -> Option<u16> {
	match s.to_ascii_uppercase().as_str() {
		"A" => Some(TYPE_A),
		"NS" => Some(TYPE_NS),
		"CNAME" => Some(TYPE_CNAME),
		"SOA" => Some(TYPE_SOA),
		"PTR" => Some(TYPE_PTR),
		"MX" => Some(TYPE_MX),
		"TXT" => Some(TYPE_TXT),
		"AAAA" => Some(TYPE_AAAA),
		s if s.starts_with("TYPE") => s[4..].parse().ok(),
		_ => None,
	}
}

/// A four bit field that specifies kind of query in this message.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Opcode {
	/// A standard query.
	Query,
	/// An inverse query.
	IQuery,
	/// A server status request.
	Status,
	/// Any other value; reserved by RFC 1035.
	Reserved(u8),
}

impl From<u8> for Opcode {
	fn from(v: u8) -> Self {
		match v & 0b1111 {
			0 => Self::Query,
			1 => Self::IQuery,
			2 => Self::Status,
			other => Self::Reserved(other),
		}
	}
}

impl From<Opcode> for u8 {
	fn from(op: Opcode) -> Self {
		match op {
			Opcode::Query => 0,
			Opcode::IQuery => 1,
			Opcode::Status => 2,
			Opcode::Reserved(v) => v & 0b1111,
		}
	}
}

/// Response code, the four-bit field set as part of responses.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Rcode {
	/// No error condition.
	Ok,
	/// The name server was unable to interpret the query.
	FormatErr,
	/// The name server was unable to process this query due to a problem with the name server.
	ServerFailure,
	/// Meaningful only for authoritative responses: the queried domain does not exist.
	NameErr,
	/// The name server does not support the requested kind of query.
	NotImplemented,
	/// The name server refuses to perform the specified operation for policy reasons.
	Refused,
	/// Any other value; reserved by RFC 1035.
	Reserved(u8),
}

impl From<u8> for Rcode {
	fn from(v: u8) -> Self {
		match v & 0b1111 {
			0 => Self::Ok,
			1 => Self::FormatErr,
			2 => Self::ServerFailure,
			3 => Self::NameErr,
			4 => Self::NotImplemented,
			5 => Self::Refused,
			other => Self::Reserved(other),
		}
	}
}

impl From<Rcode> for u8 {
	fn from(rc: Rcode) -> Self {
		match rc {
			Rcode::Ok => 0,
			Rcode::FormatErr => 1,
			Rcode::ServerFailure => 2,
			Rcode::NameErr => 3,
			Rcode::NotImplemented => 4,
			Rcode::Refused => 5,
			Rcode::Reserved(v) => v & 0b1111,
		}
	}
}

impl fmt::Display for Rcode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::Ok => "NOERROR",
			Self::FormatErr => "FORMERR",
			Self::ServerFailure => "SERVFAIL",
			Self::NameErr => "NXDOMAIN",
			Self::NotImplemented => "NOTIMP",
			Self::Refused => "REFUSED",
			Self::Reserved(_) => "RESERVED",
		};

		f.write_str(s)
	}
}

/// The 16 flag/opcode/rcode bits of the DNS header, following the second two octets.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Flags {
	/// Whether this message is a query (`false`) or a response (`true`).
	pub qr: bool,
	pub opcode: Opcode,
	/// Valid in responses: the responding server is authoritative for the queried name.
	pub aa: bool,
	/// The message was truncated due to length greater than permitted on the channel.
	pub tc: bool,
	/// Set in a query to request recursive resolution; copied into the response.
	pub rd: bool,
	/// Set in a response: recursive query support is available at this server.
	pub ra: bool,
	pub rcode: Rcode,
}

impl Flags {
	#[must_use]
	pub fn to_u16(self) -> u16 {
		let mut v = 0u16;
		v |= u16::from(self.qr) << 15;
		v |= u16::from(u8::from(self.opcode)) << 11;
		v |= u16::from(self.aa) << 10;
		v |= u16::from(self.tc) << 9;
		v |= u16::from(self.rd) << 8;
		v |= u16::from(self.ra) << 7;
		v |= u16::from(u8::from(self.rcode));
		v
	}

	#[must_use]
	pub fn from_u16(v: u16) -> Self {
		Self {
			qr: v & (1 << 15) != 0,
			opcode: Opcode::from(((v >> 11) & 0b1111) as u8),
			aa: v & (1 << 10) != 0,
			tc: v & (1 << 9) != 0,
			rd: v & (1 << 8) != 0,
			ra: v & (1 << 7) != 0,
			rcode: Rcode::from((v & 0b1111) as u8),
		}
	}
}

/// The 12-byte section present at the start of every DNS message.
#[derive(Clone, Copy, Debug)]
pub struct Header {
	pub id: u16,
	pub flags: Flags,
	pub qdcount: u16,
	pub ancount: u16,
	pub nscount: u16,
	pub arcount: u16,
}

impl Header {
	pub fn encode_into(&self, buf: &mut [u8]) {
		buf[0..2].copy_from_slice(&self.id.to_be_bytes());
		buf[2..4].copy_from_slice(&self.flags.to_u16().to_be_bytes());
		buf[4..6].copy_from_slice(&self.qdcount.to_be_bytes());
		buf[6..8].copy_from_slice(&self.ancount.to_be_bytes());
		buf[8..10].copy_from_slice(&self.nscount.to_be_bytes());
		buf[10..12].copy_from_slice(&self.arcount.to_be_bytes());
	}

	#[must_use]
	pub fn parse(buf: &[u8]) -> Option<Self> {
		if buf.len() < HEADER_LEN {
			return None;
		}

		Some(Self {
			id: u16::from_be_bytes([buf[0], buf[1]]),
			flags: Flags::from_u16(u16::from_be_bytes([buf[2], buf[3]])),
			qdcount: u16::from_be_bytes([buf[4], buf[5]]),
			ancount: u16::from_be_bytes([buf[6], buf[7]]),
			nscount: u16::from_be_bytes([buf[8], buf[9]]),
			arcount: u16::from_be_bytes([buf[10], buf[11]]),
		})
	}
}

#[derive(Debug, PartialEq, Eq)]
pub enum WireError {
	BufferTooShort,
	NameTooLong,
	LabelTooLong,
	TooManyCompressionPointers,
}

impl fmt::Display for WireError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Self::BufferTooShort => "buffer too short",
			Self::NameTooLong => "domain name exceeds 255 octets",
			Self::LabelTooLong => "label exceeds 63 octets",
			Self::TooManyCompressionPointers => "too many name-compression pointers",
		};

		f.write_str(s)
	}
}

/// Encodes a single-question query into `buf`, returning the number of bytes written.
///
/// `name` must already be canonicalized (trailing dot, ASCII). The caller supplies the buffer
/// so the engine can reuse a single static 512-byte send buffer across every query.
pub fn encode_query(buf: &mut [u8], id: u16, name: &str, qtype: u16, recursion_desired: bool) -> Result<usize, WireError> {
	let header = Header {
		id,
		flags: Flags { qr: false, opcode: Opcode::Query, aa: false, tc: false, rd: recursion_desired, ra: false, rcode: Rcode::Ok },
		qdcount: 1,
		ancount: 0,
		nscount: 0,
		arcount: 0,
	};

	if buf.len() < HEADER_LEN {
		return Err(WireError::BufferTooShort);
	}

	header.encode_into(buf);
	let mut pos = HEADER_LEN;

	for label in name.trim_end_matches('.').split('.') {
		if label.is_empty() {
			continue;
		}

		let bytes = label.as_bytes();

		if bytes.len() > 63 {
			return Err(WireError::LabelTooLong);
		}

		if pos + 1 + bytes.len() > buf.len() {
			return Err(WireError::BufferTooShort);
		}

		buf[pos] = bytes.len() as u8;
		pos += 1;
		buf[pos..pos + bytes.len()].copy_from_slice(bytes);
		pos += bytes.len();
	}

	if pos - HEADER_LEN > 253 {
		return Err(WireError::NameTooLong);
	}

	if pos + 5 > buf.len() {
		return Err(WireError::BufferTooShort);
	}

	buf[pos] = 0;
	pos += 1;
	buf[pos..pos + 2].copy_from_slice(&qtype.to_be_bytes());
	pos += 2;
	buf[pos..pos + 2].copy_from_slice(&CLASS_IN.to_be_bytes());
	pos += 2;

	Ok(pos)
}

const MAX_COMPRESSION_POINTERS: u32 = 128;

/// Reads a (possibly compressed) domain name starting at `pos`, returning the lowercased,
/// trailing-dot-terminated name and the offset immediately after the name as it appears
/// in-line (i.e. after the first pointer, if any — not after the jump target).
pub fn read_name(buf: &[u8], mut pos: usize) -> Result<(String, usize), WireError> {
	let mut name = String::new();
	let mut jumps = 0;
	let mut after_pointer = None;

	loop {
		let len = *buf.get(pos).ok_or(WireError::BufferTooShort)?;

		match len >> 6 {
			0b00 => {
				if len == 0 {
					pos += 1;
					break;
				}

				let start = pos + 1;
				let end = start + len as usize;
				let label = buf.get(start..end).ok_or(WireError::BufferTooShort)?;

				for &b in label {
					name.push((b as char).to_ascii_lowercase());
				}

				name.push('.');
				pos = end;
			}
			0b11 => {
				let hi = (len & 0b0011_1111) as usize;
				let lo = *buf.get(pos + 1).ok_or(WireError::BufferTooShort)? as usize;
				let target = (hi << 8) | lo;

				if after_pointer.is_none() {
					after_pointer = Some(pos + 2);
				}

				jumps += 1;

				if jumps > MAX_COMPRESSION_POINTERS {
					return Err(WireError::TooManyCompressionPointers);
				}

				pos = target;
			}
			_ => return Err(WireError::BufferTooShort),
		}

		if name.len() > 255 {
			return Err(WireError::NameTooLong);
		}
	}

	if name.is_empty() {
		name.push('.');
	}

	Ok((name, after_pointer.unwrap_or(pos)))
}

/// A parsed answer/authority/additional-section resource record.
#[derive(Clone, Debug)]
pub struct Record {
	pub name: String,
	pub ty: u16,
	pub class: u16,
	pub ttl: u32,
	pub rdata: Vec<u8>,
}

impl Record {
	/// Renders the record's `rdata` in the `dig`/massdns text-output style, e.g. an A record's
	/// rdata renders as a dotted-quad, an NS record's as a domain name.
	#[must_use]
	pub fn rdata_string(&self) -> String {
		match self.ty {
			TYPE_A if self.rdata.len() == 4 => Ipv4Addr::new(self.rdata[0], self.rdata[1], self.rdata[2], self.rdata[3]).to_string(),
			TYPE_AAAA if self.rdata.len() == 16 => {
				let mut octets = [0u8; 16];
				octets.copy_from_slice(&self.rdata);
				Ipv6Addr::from(octets).to_string()
			}
			TYPE_NS | TYPE_CNAME | TYPE_PTR => read_name(&self.rdata, 0).map(|(n, _)| n).unwrap_or_else(|_| hex(&self.rdata)),
			TYPE_MX if self.rdata.len() >= 2 => {
				let preference = u16::from_be_bytes([self.rdata[0], self.rdata[1]]);
				let exchange = read_name(&self.rdata, 2).map(|(n, _)| n).unwrap_or_else(|_| hex(&self.rdata));
				format!("{preference} {exchange}")
			}
			TYPE_TXT => {
				let mut out = String::new();
				let mut pos = 0;

				while pos < self.rdata.len() {
					let len = self.rdata[pos] as usize;
					pos += 1;

					let Some(chunk) = self.rdata.get(pos..pos + len) else { break };
					out.push('"');
					out.push_str(&String::from_utf8_lossy(chunk));
					out.push('"');
					pos += len;

					if pos < self.rdata.len() {
						out.push(' ');
					}
				}

				out
			}
			_ => hex(&self.rdata),
		}
	}
}

fn hex(bytes: &[u8]) -> String {
	use std::fmt::Write;

	let mut out = String::with_capacity(bytes.len() * 2);

	for b in bytes {
		let _ = write!(out, "{b:02x}");
	}

	out
}

/// A fully parsed DNS message: header, the (assumed single) question, and the answer records.
#[derive(Debug)]
pub struct Message {
	pub header: Header,
	pub question_name: String,
	pub question_type: u16,
	pub question_class: u16,
	pub answers: Vec<Record>,
}

/// Parses a complete DNS message out of a received datagram.
///
/// Authority and additional records are skipped over (their length is honored so the answer
/// section parses correctly) but not retained; nothing downstream needs them.
pub fn parse_message(buf: &[u8]) -> Result<Message, WireError> {
	let header = Header::parse(buf).ok_or(WireError::BufferTooShort)?;
	let mut pos = HEADER_LEN;

	let (question_name, next) = read_name(buf, pos)?;
	pos = next;

	let question_type = u16::from_be_bytes(*buf.get(pos..pos + 2).and_then(|s| s.try_into().ok()).ok_or(WireError::BufferTooShort)?);
	pos += 2;
	let question_class = u16::from_be_bytes(*buf.get(pos..pos + 2).and_then(|s| s.try_into().ok()).ok_or(WireError::BufferTooShort)?);
	pos += 2;

	let mut answers = Vec::with_capacity(header.ancount as usize);

	for _ in 0..header.ancount {
		let (name, next) = read_name(buf, pos)?;
		pos = next;

		let fixed = buf.get(pos..pos + 10).ok_or(WireError::BufferTooShort)?;
		let ty = u16::from_be_bytes([fixed[0], fixed[1]]);
		let class = u16::from_be_bytes([fixed[2], fixed[3]]);
		let ttl = u32::from_be_bytes([fixed[4], fixed[5], fixed[6], fixed[7]]);
		let rdlength = u16::from_be_bytes([fixed[8], fixed[9]]) as usize;
		pos += 10;

		let rdata = buf.get(pos..pos + rdlength).ok_or(WireError::BufferTooShort)?.to_vec();
		pos += rdlength;

		answers.push(Record { name, ty, class, ttl, rdata });
	}

	Ok(Message { header, question_name, question_type, question_class, answers })
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encode_and_parse_round_trip_question() {
		let mut buf = [0u8; 512];
		let len = encode_query(&mut buf, 0x1234, "example.com.", TYPE_A, true).unwrap();

		let header = Header::parse(&buf[..len]).unwrap();
		assert_eq!(header.id, 0x1234);
		assert!(header.flags.rd);
		assert_eq!(header.qdcount, 1);

		let (name, pos) = read_name(&buf[..len], HEADER_LEN).unwrap();
		assert_eq!(name, "example.com.");
		assert_eq!(pos + 4, len);
	}

	#[test]
	fn name_compression_pointer_is_followed() {
		// "example.com." at offset 12, then a second name that's just a pointer back to it.
		let mut buf = vec![0u8; 12];
		buf.extend_from_slice(b"\x07example\x03com\x00");
		let pointer_offset = buf.len();
		buf.extend_from_slice(&[0xC0, 0x0C]);

		let (name, next) = read_name(&buf, pointer_offset).unwrap();
		assert_eq!(name, "example.com.");
		assert_eq!(next, pointer_offset + 2);
	}

	#[test]
	fn a_record_rdata_renders_as_dotted_quad() {
		let record = Record { name: "example.com.".into(), ty: TYPE_A, class: CLASS_IN, ttl: 300, rdata: vec![93, 184, 216, 34] };
		assert_eq!(record.rdata_string(), "93.184.216.34");
	}

	#[test]
	fn type_name_round_trips_for_known_types() {
		for ty in [TYPE_A, TYPE_NS, TYPE_CNAME, TYPE_SOA, TYPE_PTR, TYPE_MX, TYPE_TXT, TYPE_AAAA] {
			let name = type_name(ty);
			assert_eq!(parse_type_name(&name), Some(ty));
		}
	}

	#[test]
	fn unknown_type_name_is_numeric() {
		assert_eq!(type_name(65), "TYPE65");
		assert_eq!(parse_type_name("TYPE65"), Some(65));
	}
}
