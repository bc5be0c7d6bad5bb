//! The query engine (spec.md §4.3): admission, send, receive, retry, and completion, driving
//! the engine-wide and per-lookup state machines.

use std::io::{Read, Write};
use std::time::Duration;

use collections::map::{Entry as MapEntry, Map};
use collections::pool::{Handle as PoolHandle, Pool};
use collections::wheel::Wheel;
use dns::{canonicalize, parse_message, Domains};
use rand::Rng;
use runtime::time::Clock;

use crate::config::EngineConfig;
use crate::key::LookupKey;
use crate::output::Sink;
use crate::record::{LookupRecord, TimerPayload};
use crate::resolver::Resolvers;
use crate::socket::{Family, SocketSet};
use crate::stats::WorkerStats;

/// Engine-wide state (spec.md §4.3), monotone and forward-only.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum State {
	Warmup,
	Querying,
	Cooldown,
	Done,
}

/// Maps a key to the pool handle holding its mutable record. This is the correlation table
/// proper (spec.md §4.2); the records themselves live in the larger, headroom-sized `Pool`
/// (spec.md §3 "Lookup pool") so the table's hash-load stays independent of record storage.
struct TableEntry {
	key: LookupKey,
	handle: PoolHandle,
}

impl collections::map::Key for TableEntry {
	type Type = LookupKey;

	fn key(&self) -> &Self::Type {
		&self.key
	}
}

const SEND_BUF_LEN: usize = 512;
const RECV_BUF_LEN: usize = 65535;

pub struct Engine<R, W> {
	state: State,
	config: EngineConfig,

	table: Map<TableEntry>,
	pool: Pool<LookupRecord>,
	wheel: Wheel<TimerPayload>,

	resolvers: Resolvers,
	sockets: SocketSet,
	poller: runtime::Poller,

	domains: Domains<R>,
	line_index: u64,
	worker_index: u32,
	worker_count: u32,

	sink: Sink<W>,
	stats: WorkerStats,
	admission_counter: u64,

	clock: Clock,
	progress_timer: Option<collections::wheel::Handle>,
	ticked_buckets: u64,

	send_buf: [u8; SEND_BUF_LEN],
	recv_buf: Vec<u8>,
}

impl<R: Read, W: Write> Engine<R, W> {
	#[must_use]
	pub fn new(config: EngineConfig, resolvers: Resolvers, sockets: SocketSet, poller: runtime::Poller, domains: Domains<R>, sink: Sink<W>, worker_index: u32, worker_count: u32) -> Self {
		let hashmap_size = config.hashmap_size;
		let pool_capacity = 2 * hashmap_size;
		let max_retries = config.max_retries();
		let wheel = Wheel::new(config.timed_ring_buckets);

		let mut engine = Self {
			state: State::Warmup,
			table: Map::with_capacity(hashmap_size),
			pool: Pool::with_capacity(pool_capacity),
			wheel,
			resolvers,
			sockets,
			poller,
			domains,
			line_index: 0,
			worker_index,
			worker_count,
			sink,
			stats: WorkerStats::new(max_retries),
			admission_counter: 0,
			clock: Clock::start(),
			progress_timer: None,
			ticked_buckets: 0,
			send_buf: [0u8; SEND_BUF_LEN],
			recv_buf: vec![0u8; RECV_BUF_LEN],
			config,
		};

		let progress_buckets = engine.ms_to_buckets(1000);
		engine.progress_timer = Some(engine.wheel.schedule(progress_buckets, TimerPayload::ProgressTick));

		engine
	}

	#[must_use]
	pub fn state(&self) -> State {
		self.state
	}

	#[must_use]
	pub fn stats(&self) -> &WorkerStats {
		&self.stats
	}

	#[must_use]
	pub fn sockets_mut(&mut self) -> &mut SocketSet {
		&mut self.sockets
	}

	#[must_use]
	pub fn poller_mut(&mut self) -> &mut runtime::Poller {
		&mut self.poller
	}

	fn ms_to_buckets(&self, ms: u64) -> usize {
		let resolution = self.config.interval_ms.max(1);
		((ms + resolution - 1) / resolution) as usize
	}

	/// Whether this worker owns `line_index` under `line_index mod worker_count = worker_index`
	/// (spec.md §5).
	fn owns_line(&self, line_index: u64) -> bool {
		self.worker_count <= 1 || line_index % u64::from(self.worker_count) == u64::from(self.worker_index)
	}

	/// The admission (`can_send`) loop: admits domains until the table is full, input is
	/// exhausted, or a duplicate in-flight name stops this tick (spec.md §4.3, B1/B3).
	pub fn pump_admission(&mut self) -> utils::error::Result {
		while self.table.len() < self.config.hashmap_size && matches!(self.state, State::Warmup | State::Querying) {
			let Some(name) = self.next_owned_domain()? else {
				self.on_input_exhausted();
				return Ok(());
			};

			let key = LookupKey::new(canonicalize(&name), self.config.qtype);

			if matches!(self.table.entry(&key), MapEntry::Filled(_)) {
				// Duplicate admission of an in-flight name (B3): stop this tick without
				// retrying or deduplicating; resume from the next line next tick.
				return Ok(());
			}

			self.admit(key)?;
		}

		Ok(())
	}

	fn next_owned_domain(&mut self) -> utils::error::Result<Option<String>> {
		loop {
			let Some(name) = self.domains.next_domain().map_err(|err| log::error!("failed to read domain list: {err}"))? else {
				return Ok(None);
			};

			let idx = self.line_index;
			self.line_index += 1;

			if self.owns_line(idx) {
				return Ok(Some(name));
			}
		}
	}

	fn on_input_exhausted(&mut self) {
		self.state = if self.pool.is_empty() { State::Done } else { State::Cooldown };
	}

	fn admit(&mut self, key: LookupKey) -> utils::error::Result {
		let xid = self.gen_xid();
		let record = LookupRecord::new(key.clone(), xid);

		let Some(handle) = self.pool.insert(record) else {
			log::error!("lookup pool exhausted; this indicates a table/pool capacity invariant violation");
			return Err(());
		};

		match self.table.entry(&key) {
			MapEntry::Vacant(vacant) => {
				vacant.insert(TableEntry { key, handle });
			}
			MapEntry::Filled(_) => unreachable!("pump_admission already rejected duplicates before calling admit"),
		}

		self.stats.admitted += 1;
		self.stats.retries_histogram[0] += 1;
		self.admission_counter += 1;

		self.send_query(handle)?;

		if self.table.len() >= self.config.hashmap_size && self.state == State::Warmup {
			self.state = State::Querying;

			if !self.config.aggression.keeps_send_readiness() {
				self.sockets.set_write_interest(&mut self.poller, false);
			}
		}

		Ok(())
	}

	fn gen_xid(&self) -> u16 {
		rand::thread_rng().gen()
	}

	fn send_query(&mut self, handle: PoolHandle) -> utils::error::Result {
		let Some(record) = self.pool.get(handle) else { return Ok(()) };

		let resolver = self.resolvers.choose(record.resolver, self.admission_counter);
		let family = Family::of(resolver);

		let Some(socket) = self.sockets.pick(family) else {
			log::error!("no bound socket for resolver family of {resolver}");
			return Err(());
		};

		let name = record.key.name.clone();
		let xid = record.xid;
		let qtype = record.key.qtype;
		let recursion_desired = self.config.recursion_desired;

		let len = match dns::encode_query(&mut self.send_buf, xid, &name, qtype, recursion_desired) {
			Ok(len) => len,
			Err(err) => {
				log::error!("failed to encode query for {name}: {err}");
				return Err(());
			}
		};

		match socket.socket.send_to(&self.send_buf[..len], resolver) {
			Ok(n) if n == len => {}
			Ok(n) => log::error!("short send to {resolver}: {n}/{len} bytes"),
			Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
				log::warn!("send to {resolver} would block; retry timer will resend");
			}
			Err(err) => log::error!("send to {resolver} failed: {err}"),
		}

		let interval_ms = self.config.interval_ms;
		let buckets = self.ms_to_buckets(interval_ms);

		let timer = self.wheel.schedule(buckets, TimerPayload::Timeout(handle));

		if let Some(record) = self.pool.get_mut(handle) {
			record.resolver = Some(resolver);
			record.timer = Some(timer);
		}

		Ok(())
	}

	/// Advances the timing wheel by however many bucket-widths of wall-clock time have actually
	/// elapsed since the last call (`0` if called again before a full bucket has passed),
	/// dispatching each fired entry. Returns whether a progress tick fired this call, so the
	/// event loop knows when to forward/aggregate stats.
	pub fn on_tick(&mut self) -> utils::error::Result<bool> {
		let resolution = self.config.interval_ms.max(1);
		let elapsed_buckets = self.clock.elapsed_ms() / resolution;
		let steps = elapsed_buckets.saturating_sub(self.ticked_buckets);
		self.ticked_buckets = elapsed_buckets;

		let mut fired = Vec::new();
		self.wheel.advance(steps as usize, |payload| fired.push(payload));

		let mut progress_fired = false;

		for payload in fired {
			match payload {
				TimerPayload::Timeout(handle) => self.retry(handle)?,
				TimerPayload::ProgressTick => {
					self.on_progress_tick();
					progress_fired = true;
				}
			}
		}

		Ok(progress_fired)
	}

	fn on_progress_tick(&mut self) {
		self.stats.current_second_replies = 0;
		let buckets = self.ms_to_buckets(1000);
		self.progress_timer = Some(self.wheel.schedule(buckets, TimerPayload::ProgressTick));
	}

	/// Resends a lookup if it still has retry budget left (spec.md §4.3's retry-set and timeout
	/// rows share this same `retries + 1 <= max_retries` gate), otherwise completes it as a
	/// failure. Used both by timeout firing and by an unacceptable-rcode reply.
	fn retry(&mut self, handle: PoolHandle) -> utils::error::Result {
		let Some(record) = self.pool.get(handle) else { return Ok(()) };

		if record.retries + 1 > self.config.max_retries() {
			return self.complete(handle, false);
		}

		if let Some(record) = self.pool.get_mut(handle) {
			record.retries += 1;
			let bucket = record.retries as usize;

			if bucket < self.stats.retries_histogram.len() {
				self.stats.retries_histogram[bucket - 1] = self.stats.retries_histogram[bucket - 1].saturating_sub(1);
				self.stats.retries_histogram[bucket] += 1;
			}
		}

		self.send_query(handle)
	}

	fn complete(&mut self, handle: PoolHandle, _success: bool) -> utils::error::Result {
		if let Some(record) = self.pool.get(handle) {
			if let Some(timer) = record.timer {
				self.wheel.cancel(timer);
			}

			let key = record.key.clone();
			self.table.remove(&key);
		}

		self.pool.remove(handle);

		if self.state == State::Cooldown && self.pool.is_empty() {
			self.state = State::Done;
		}

		if self.config.aggression.pumps_on_completion() {
			self.pump_admission()?;
		}

		Ok(())
	}

	/// Receives and processes one datagram from `socket_idx`'s socket (spec.md §4.3 "Receive").
	pub fn recv_one(&mut self, socket_idx: usize) -> utils::error::Result {
		let (n, from) = {
			let socket = self.sockets.iter().nth(socket_idx).expect("valid socket index");

			match socket.socket.recv_from(&mut self.recv_buf) {
				Ok(ok) => ok,
				Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
				Err(err) => {
					log::error!("recv failed: {err}");
					return Ok(());
				}
			}
		};

		self.stats.received += 1;
		self.stats.current_second_replies += 1;

		let payload = self.recv_buf[..n].to_vec();
		self.process_reply(from, &payload)
	}

	/// Feeds one already-received `(from, payload)` pair through parse/match/complete, used by
	/// both the normal socket-recv path and the alternate capture path.
	pub fn process_reply(&mut self, from: std::net::SocketAddr, payload: &[u8]) -> utils::error::Result {
		let message = match parse_message(payload) {
			Ok(m) => m,
			Err(_) => {
				self.stats.parse_errors += 1;
				return Ok(());
			}
		};

		self.stats.parsed += 1;

		let key = LookupKey::new(canonicalize(&message.question_name), message.question_type);

		let Some(filled) = self.table.entry(&key).filled() else {
			self.stats.mismatch_domain += 1;
			return Ok(());
		};

		let handle = filled.get().handle;

		let Some(record) = self.pool.get(handle) else {
			self.stats.mismatch_domain += 1;
			return Ok(());
		};

		if record.xid != message.header.id {
			self.stats.mismatch_id += 1;
			return Ok(());
		}

		let rcode = message.header.flags.rcode;
		let unacceptable = self.config.retry.is_unacceptable(rcode);
		self.stats.record_rcode(rcode, !unacceptable);

		if let Some(timer) = record.timer {
			self.wheel.cancel(timer);
		}

		if unacceptable {
			return self.retry(handle);
		}

		if let Err(err) = self.sink.write_reply(from, payload, &message) {
			log::error!("failed to write output record: {err}");
		}

		self.complete(handle, true)
	}

	/// Drains a batch from an alternate (e.g. raw-capture) receive path.
	pub fn recv_alt_batch(&mut self, alt: &mut dyn crate::alt::AltReceiver) -> utils::error::Result {
		let mut batch = Vec::new();
		alt.drain(&mut |from, payload| batch.push((from, payload.to_vec())));

		for (from, payload) in batch {
			self.stats.received += 1;
			self.process_reply(from, &payload)?;
		}

		Ok(())
	}

	pub fn flush_output(&mut self) -> utils::error::Result {
		self.sink.flush().map_err(|err| log::error!("failed to flush output: {err}"))
	}

	#[must_use]
	pub fn poll_timeout(&self) -> Duration {
		Duration::from_millis(1)
	}

	#[must_use]
	pub fn progress(&self) -> f64 {
		self.domains.progress()
	}
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;
	use std::net::SocketAddr;

	use super::*;
	use crate::output::Format;
	use crate::resolver::Resolvers;
	use crate::socket::SocketSet;

	type TestEngine = Engine<Cursor<Vec<u8>>, Vec<u8>>;

	fn make_engine(domains: &str, hashmap_size: usize) -> TestEngine {
		make_engine_ext(domains, hashmap_size, 50, 500)
	}

	fn make_engine_ext(domains: &str, hashmap_size: usize, resolve_count: u32, interval_ms: u64) -> TestEngine {
		let resolver: SocketAddr = "127.0.0.1:19053".parse().unwrap();

		let config = EngineConfig {
			hashmap_size,
			resolve_count,
			interval_ms,
			binds: vec!["127.0.0.1:0".parse().unwrap()],
			resolvers: vec![resolver],
			..EngineConfig::default()
		};

		let resolvers = Resolvers::new(config.resolvers.clone(), config.selection);
		let mut poller = runtime::Poller::new();
		let sockets = SocketSet::bind(&config.binds, &mut poller, runtime::Interest::READ_WRITE).expect("bind loopback test socket");
		let domains = Domains::from_reader(Cursor::new(domains.as_bytes().to_vec()));
		let sink = Sink::new(Format::Full, Vec::new());

		Engine::new(config, resolvers, sockets, poller, domains, sink, 0, 1)
	}

	/// Builds a reply datagram answering `name`/`qtype` with `id` and `rcode`, and (if `answer` is
	/// given) a single compressed-name A-style answer record pointing back at the question.
	fn encode_reply(id: u16, name: &str, qtype: u16, rcode: dns::Rcode, answer: Option<[u8; 4]>) -> Vec<u8> {
		let mut buf = [0u8; 512];
		let qlen = dns::encode_query(&mut buf, id, name, qtype, true).unwrap();
		let mut out = buf[..qlen].to_vec();

		let mut header = dns::Header::parse(&out).unwrap();
		header.flags.qr = true;
		header.flags.rcode = rcode;
		header.ancount = u16::from(answer.is_some());
		header.encode_into(&mut out[..dns::wire::HEADER_LEN]);

		if let Some(rdata) = answer {
			out.extend_from_slice(&[0xC0, 0x0C]);
			out.extend_from_slice(&qtype.to_be_bytes());
			out.extend_from_slice(&dns::wire::CLASS_IN.to_be_bytes());
			out.extend_from_slice(&300u32.to_be_bytes());
			out.extend_from_slice(&4u16.to_be_bytes());
			out.extend_from_slice(&rdata);
		}

		out
	}

	fn admitted_key(name: &str) -> LookupKey {
		LookupKey::new(dns::canonicalize(name), dns::wire::TYPE_A)
	}

	fn xid_for(engine: &TestEngine, key: &LookupKey) -> u16 {
		let entry = engine.table.get(key).expect("key was admitted");
		engine.pool.get(entry.handle).expect("handle is live").xid
	}

	#[test]
	fn pump_admission_fills_table_and_enters_querying() {
		let mut engine = make_engine("a.com\nb.com\nc.com\n", 2);
		engine.pump_admission().unwrap();

		assert_eq!(engine.table.len(), 2);
		assert_eq!(engine.stats.admitted, 2);
		assert_eq!(engine.state, State::Querying);
	}

	#[test]
	fn duplicate_in_flight_name_stops_admission_tick_without_reprocessing() {
		let mut engine = make_engine("a.com\na.com\nb.com\n", 10);
		engine.pump_admission().unwrap();

		assert_eq!(engine.table.len(), 1);
		assert_eq!(engine.stats.admitted, 1);
	}

	#[test]
	fn exhausting_input_with_no_pending_lookups_reaches_done() {
		let mut engine = make_engine("", 10);
		engine.pump_admission().unwrap();

		assert_eq!(engine.state, State::Done);
	}

	#[test]
	fn exhausting_input_with_pending_lookups_reaches_cooldown() {
		let mut engine = make_engine("a.com\n", 10);
		engine.pump_admission().unwrap();

		assert_eq!(engine.state, State::Cooldown);
		assert_eq!(engine.table.len(), 1);
	}

	/// With a 1000ms progress period, an immediate second call hasn't let a full second of wall
	/// time pass and must not fire; only once that much real time has actually elapsed does it.
	#[test]
	fn progress_tick_fires_once_a_second_of_wall_time_has_elapsed() {
		let mut engine = make_engine_ext("", 10, 50, 1000);

		assert!(!engine.on_tick().unwrap());

		std::thread::sleep(std::time::Duration::from_millis(1050));
		assert!(engine.on_tick().unwrap());
	}

	/// `on_tick` advances the wheel by however many bucket-widths of wall-clock time have
	/// actually passed, not once per call: a retry timer scheduled 50ms out doesn't fire on an
	/// immediate second call, only once the wheel has caught up to that much real time.
	#[test]
	fn on_tick_advances_by_elapsed_wall_clock_time_not_call_count() {
		let mut engine = make_engine_ext("a.com\n", 10, 50, 50);
		engine.pump_admission().unwrap();

		engine.on_tick().unwrap();
		assert_eq!(engine.stats.retries_histogram[1], 0);

		std::thread::sleep(std::time::Duration::from_millis(60));
		engine.on_tick().unwrap();
		assert_eq!(engine.stats.retries_histogram[1], 1);
	}

	#[test]
	fn process_reply_with_acceptable_rcode_completes_the_lookup() {
		let mut engine = make_engine("a.com\n", 10);
		engine.pump_admission().unwrap();

		let key = admitted_key("a.com");
		let xid = xid_for(&engine, &key);
		let reply = encode_reply(xid, &key.name, key.qtype, dns::Rcode::Ok, Some([93, 184, 216, 34]));

		engine.process_reply("127.0.0.1:19053".parse().unwrap(), &reply).unwrap();

		assert_eq!(engine.stats.success, 1);
		assert_eq!(engine.stats.parsed, 1);
		assert!(engine.table.get(&key).is_none());
	}

	#[test]
	fn process_reply_rejects_unparseable_payload() {
		let mut engine = make_engine("a.com\n", 10);
		engine.pump_admission().unwrap();

		engine.process_reply("127.0.0.1:19053".parse().unwrap(), &[1, 2, 3]).unwrap();

		assert_eq!(engine.stats.parse_errors, 1);
		assert_eq!(engine.stats.parsed, 0);
	}

	#[test]
	fn process_reply_with_no_matching_lookup_is_counted_as_mismatch_domain() {
		let mut engine = make_engine("a.com\n", 10);
		engine.pump_admission().unwrap();

		let reply = encode_reply(0x1234, "unknown.com.", dns::wire::TYPE_A, dns::Rcode::Ok, None);
		engine.process_reply("127.0.0.1:19053".parse().unwrap(), &reply).unwrap();

		assert_eq!(engine.stats.mismatch_domain, 1);
	}

	#[test]
	fn process_reply_with_wrong_xid_is_counted_as_mismatch_id_and_keeps_the_record() {
		let mut engine = make_engine("a.com\n", 10);
		engine.pump_admission().unwrap();

		let key = admitted_key("a.com");
		let xid = xid_for(&engine, &key);
		let reply = encode_reply(xid.wrapping_add(1), &key.name, key.qtype, dns::Rcode::Ok, None);

		engine.process_reply("127.0.0.1:19053".parse().unwrap(), &reply).unwrap();

		assert_eq!(engine.stats.mismatch_id, 1);
		assert!(engine.table.get(&key).is_some());
	}

	#[test]
	fn process_reply_with_unacceptable_rcode_retries_instead_of_completing() {
		let mut engine = make_engine("a.com\n", 10);
		engine.pump_admission().unwrap();

		let key = admitted_key("a.com");
		let xid = xid_for(&engine, &key);
		let reply = encode_reply(xid, &key.name, key.qtype, dns::Rcode::Refused, None);

		engine.process_reply("127.0.0.1:19053".parse().unwrap(), &reply).unwrap();

		assert_eq!(engine.stats.success, 0);
		assert_eq!(engine.stats.retries_histogram[1], 1);
		assert!(engine.table.get(&key).is_some());
	}

	#[test]
	fn process_reply_with_unacceptable_rcode_completes_once_retry_budget_is_exhausted() {
		// resolve_count of 1 means max_retries() == 0: the very first reply already exhausts it.
		let mut engine = make_engine_ext("a.com\n", 10, 1, 500);
		engine.pump_admission().unwrap();

		let key = admitted_key("a.com");
		let xid = xid_for(&engine, &key);
		let reply = encode_reply(xid, &key.name, key.qtype, dns::Rcode::Refused, None);

		engine.process_reply("127.0.0.1:19053".parse().unwrap(), &reply).unwrap();

		assert_eq!(engine.stats.success, 0);
		assert!(engine.table.get(&key).is_none());
		assert_eq!(engine.state, State::Done);
	}
}
