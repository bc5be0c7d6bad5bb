//! Per-worker statistics and the multi-process aggregator (spec.md §3, §4.4).

use std::io::{self, Read, Write};
use std::time::Instant;

use dns::Rcode;

/// Rcode is a 4-bit field; every possible value gets a histogram slot.
pub const RCODE_SLOTS: usize = 16;

/// Counters owned and mutated only by the worker that collects them (spec.md §3).
#[derive(Clone)]
pub struct WorkerStats {
	pub admitted: u64,
	pub received: u64,
	pub parsed: u64,
	pub success: u64,
	pub success_by_rcode: [u64; RCODE_SLOTS],
	pub any_by_rcode: [u64; RCODE_SLOTS],
	/// Replies that failed to parse as a DNS message at all.
	pub parse_errors: u64,
	/// Parsed replies with no matching in-flight lookup (unknown name/type, late reply, spoof).
	pub mismatch_domain: u64,
	pub mismatch_id: u64,
	/// Length `max_retries + 1`; bucket `k` counts lookups that used `k` sends.
	pub retries_histogram: Vec<u64>,
	pub current_second_replies: u64,
}

impl WorkerStats {
	#[must_use]
	pub fn new(max_retries: u32) -> Self {
		Self {
			admitted: 0,
			received: 0,
			parsed: 0,
			success: 0,
			success_by_rcode: [0; RCODE_SLOTS],
			any_by_rcode: [0; RCODE_SLOTS],
			parse_errors: 0,
			mismatch_domain: 0,
			mismatch_id: 0,
			retries_histogram: vec![0; max_retries as usize + 1],
			current_second_replies: 0,
		}
	}

	pub fn record_rcode(&mut self, rcode: Rcode, success: bool) {
		let idx = rcode_index(rcode);
		self.any_by_rcode[idx] += 1;

		if success {
			self.success += 1;
			self.success_by_rcode[idx] += 1;
		}
	}

	/// The serialized record size for a given histogram length — fixed for the lifetime of a
	/// run, since `max_retries` is a single CLI-wide setting.
	#[must_use]
	pub fn encoded_len(max_retries: u32) -> usize {
		let fixed_u64_fields = 7;
		let histogram_len = max_retries as usize + 1;
		(fixed_u64_fields + 2 * RCODE_SLOTS + histogram_len) * 8
	}

	pub fn encode(&self, out: &mut Vec<u8>) {
		out.clear();

		for v in [self.admitted, self.received, self.parsed, self.success, self.parse_errors, self.mismatch_domain, self.mismatch_id] {
			out.extend_from_slice(&v.to_le_bytes());
		}

		for v in self.success_by_rcode {
			out.extend_from_slice(&v.to_le_bytes());
		}

		for v in self.any_by_rcode {
			out.extend_from_slice(&v.to_le_bytes());
		}

		for &v in &self.retries_histogram {
			out.extend_from_slice(&v.to_le_bytes());
		}
	}

	#[must_use]
	pub fn decode(buf: &[u8], max_retries: u32) -> Option<Self> {
		if buf.len() != Self::encoded_len(max_retries) {
			return None;
		}

		let mut words = buf.chunks_exact(8).map(|c| u64::from_le_bytes(c.try_into().unwrap()));
		let mut next = || words.next().unwrap();

		let admitted = next();
		let received = next();
		let parsed = next();
		let success = next();
		let parse_errors = next();
		let mismatch_domain = next();
		let mismatch_id = next();

		let mut success_by_rcode = [0u64; RCODE_SLOTS];
		for slot in &mut success_by_rcode {
			*slot = next();
		}

		let mut any_by_rcode = [0u64; RCODE_SLOTS];
		for slot in &mut any_by_rcode {
			*slot = next();
		}

		let retries_histogram = (0..=max_retries).map(|_| next()).collect();

		Some(Self {
			admitted,
			received,
			parsed,
			success,
			success_by_rcode,
			any_by_rcode,
			parse_errors,
			mismatch_domain,
			mismatch_id,
			retries_histogram,
			current_second_replies: 0,
		})
	}

	fn add_from(&mut self, other: &Self) {
		self.admitted += other.admitted;
		self.received += other.received;
		self.parsed += other.parsed;
		self.success += other.success;
		self.parse_errors += other.parse_errors;
		self.mismatch_domain += other.mismatch_domain;
		self.mismatch_id += other.mismatch_id;

		for i in 0..RCODE_SLOTS {
			self.success_by_rcode[i] += other.success_by_rcode[i];
			self.any_by_rcode[i] += other.any_by_rcode[i];
		}

		for (a, b) in self.retries_histogram.iter_mut().zip(&other.retries_histogram) {
			*a += *b;
		}
	}
}

fn rcode_index(rcode: Rcode) -> usize {
	(u8::from(rcode) & 0b1111) as usize
}

/// Writes a stats snapshot to an outbound pipe in one atomic write. A short write is logged
/// as an error; the engine keeps running (spec.md §7, "channel error").
pub fn send_snapshot(writer: &mut impl Write, stats: &WorkerStats, buf: &mut Vec<u8>) {
	stats.encode(buf);

	if let Err(err) = writer.write_all(buf) {
		log::error!("failed to write stats snapshot to coordinator pipe: {err}");
	}
}

/// Reads exactly one stats record from a readiness-ready pipe, or `None` on a short/closed read.
pub fn recv_snapshot(reader: &mut impl Read, max_retries: u32) -> io::Result<Option<WorkerStats>> {
	let mut buf = vec![0u8; WorkerStats::encoded_len(max_retries)];

	match reader.read_exact(&mut buf) {
		Ok(()) => Ok(WorkerStats::decode(&buf, max_retries)),
		Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
		Err(err) => Err(err),
	}
}

/// Coordinator-side aggregation: one snapshot slot per worker (slot 0 is the coordinator's
/// own), summed in place and rendered to stderr every tick.
pub struct Aggregator {
	slots: Vec<WorkerStats>,
	started: Instant,
	last_tick: Instant,
	quiet: bool,
}

impl Aggregator {
	#[must_use]
	pub fn new(workers: usize, max_retries: u32, quiet: bool) -> Self {
		let now = Instant::now();
		Self { slots: (0..workers).map(|_| WorkerStats::new(max_retries)).collect(), started: now, last_tick: now, quiet }
	}

	/// Replaces worker `idx`'s snapshot with the latest received; the aggregator treats only
	/// the newest snapshot per worker as authoritative (spec.md §4.4).
	pub fn update(&mut self, idx: usize, snapshot: WorkerStats) {
		self.slots[idx] = snapshot;
	}

	pub fn coordinator_slot_mut(&mut self) -> &mut WorkerStats {
		&mut self.slots[0]
	}

	/// Sums every slot into a fresh total and prints a human-readable progress line.
	pub fn tick(&mut self, progress: f64) {
		let now = Instant::now();
		let elapsed_total = now.duration_since(self.started).as_secs_f64();
		let elapsed_tick = now.duration_since(self.last_tick).as_secs_f64().max(0.001);
		self.last_tick = now;

		let mut total = WorkerStats::new(self.slots[0].retries_histogram.len() as u32 - 1);

		for slot in &self.slots {
			total.add_from(slot);
		}

		let rate = total.current_second_replies as f64 / elapsed_tick;

		if !self.quiet {
			eprintln!(
				"progress: {:.1}% admitted={} received={} parsed={} success={} parse_errors={} mismatch_domain={} mismatch_id={} rate={:.0}/s elapsed={:.1}s",
				progress * 100.0,
				total.admitted,
				total.received,
				total.parsed,
				total.success,
				total.parse_errors,
				total.mismatch_domain,
				total.mismatch_id,
				rate,
				elapsed_total,
			);
		}

		for slot in &mut self.slots {
			slot.current_second_replies = 0;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn round_trips_through_encode_decode() {
		let mut stats = WorkerStats::new(3);
		stats.admitted = 10;
		stats.record_rcode(Rcode::Ok, true);
		stats.retries_histogram[2] = 4;

		let mut buf = Vec::new();
		stats.encode(&mut buf);

		let decoded = WorkerStats::decode(&buf, 3).unwrap();
		assert_eq!(decoded.admitted, 10);
		assert_eq!(decoded.success, 1);
		assert_eq!(decoded.any_by_rcode[rcode_index(Rcode::Ok)], 1);
		assert_eq!(decoded.retries_histogram[2], 4);
	}

	#[test]
	fn decode_rejects_wrong_length() {
		assert!(WorkerStats::decode(&[0u8; 3], 3).is_none());
	}

	#[test]
	fn aggregator_sums_worker_slots() {
		let mut agg = Aggregator::new(2, 1, true);

		let mut a = WorkerStats::new(1);
		a.admitted = 5;
		agg.update(0, a);

		let mut b = WorkerStats::new(1);
		b.admitted = 7;
		agg.update(1, b);

		agg.tick(0.5);
	}
}
