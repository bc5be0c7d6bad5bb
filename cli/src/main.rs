//! `bulkdns`: argument parsing, worker forking, privilege dropping, and wiring `dns`/`engine`/
//! `runtime` together into a running resolver (spec.md §6, SPEC_FULL.md §6.2-§6.3).

mod privilege;

use std::fs::File;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::process::ExitCode;

use clap::Parser;
use dns::{parse_type_name, read_resolvers, Domains, Rcode, Source};
use engine::alt::NoopReceiver;
use engine::config::{Aggression, EngineConfig, RetryPolicy};
use engine::output::{Format, Sink};
use engine::resolver::{Resolvers, Selection};
use engine::socket::SocketSet;
use engine::worker;
use engine::Engine;
use runtime::{Interest, Poller};

/// A high-throughput stub DNS resolver: bulk-resolve a domain list against a pool of upstream
/// recursive resolvers.
#[derive(Parser, Debug)]
#[command(name = "bulkdns", version, about)]
struct Args {
	/// Path to the domain list, or `-` for standard input.
	domains: String,

	/// Path to the resolver list (one `ip` or `ip:port` literal per line, default port 53).
	#[arg(long)]
	resolvers: String,

	/// Source address to bind query sockets to (repeatable; supply both a v4 and a v6 address
	/// to query both families). Defaults to `0.0.0.0:0` and `[::]:0` if omitted.
	#[arg(long = "bindto")]
	bindto: Vec<SocketAddr>,

	/// Maximum sends per lookup (initial send plus retries) before giving up.
	#[arg(long, default_value_t = 50)]
	resolve_count: u32,

	/// Milliseconds between a send and its retry timeout.
	#[arg(long, default_value_t = 500)]
	interval: u64,

	/// Correlation table capacity: bounds how many lookups are in flight at once.
	#[arg(long, default_value_t = 100_000)]
	hashmap_size: usize,

	/// Timing-wheel bucket count.
	#[arg(long, default_value_t = 10_000)]
	timed_ring_buckets: usize,

	/// Rcode that should trigger a retry rather than be accepted (repeatable; the first
	/// occurrence clears the default `REFUSED`-only set). Pass `never` to disable retries.
	#[arg(long = "retry")]
	retry: Vec<String>,

	/// Clear the recursion-desired bit on outgoing queries.
	#[arg(long)]
	norecurse: bool,

	/// Choose resolvers by `admission_counter mod N` instead of uniformly at random.
	#[arg(long)]
	predictable: bool,

	/// Reuse the same resolver across a lookup's retries.
	#[arg(long)]
	sticky: bool,

	/// Record type to query for (A, AAAA, NS, CNAME, SOA, PTR, MX, TXT, ...).
	#[arg(long, default_value = "A")]
	qtype: String,

	/// Output format: `S`(imple), `F`(ull, default), or `B`(inary).
	#[arg(long, default_value = "F")]
	output: String,

	/// Output file path; `-` (the default) means standard output. Suffixed with the worker
	/// index when `--processes` is greater than 1.
	#[arg(long, default_value = "-")]
	outfile: String,

	/// Number of worker processes (Unix only; `fork()`-based).
	#[arg(long, default_value_t = 1)]
	processes: u32,

	/// Socket send buffer size in bytes (best-effort).
	#[arg(long)]
	sndbuf: Option<u32>,

	/// Socket receive buffer size in bytes (best-effort).
	#[arg(long)]
	rcvbuf: Option<u32>,

	/// Aggression level: 0 (completion-driven), 1 (warmup-aggressive), 2 (always-aggressive).
	#[arg(long, default_value_t = 0)]
	extreme: u8,

	/// Flush the output sink after every write instead of only at shutdown.
	#[arg(long)]
	flush: bool,

	/// Suppress the periodic progress summary.
	#[arg(long)]
	quiet: bool,

	/// User to drop privileges to after binding sockets, if currently running as root.
	#[arg(long, default_value = "nobody")]
	drop_user: String,

	/// Keep running as root instead of dropping privileges (not recommended).
	#[arg(long)]
	root: bool,
}

fn parse_rcode(s: &str) -> Option<Rcode> {
	let rcode = match s.to_ascii_uppercase().as_str() {
		"NOERROR" => Rcode::Ok,
		"FORMERR" => Rcode::FormatErr,
		"SERVFAIL" => Rcode::ServerFailure,
		"NXDOMAIN" => Rcode::NameErr,
		"NOTIMP" => Rcode::NotImplemented,
		"REFUSED" => Rcode::Refused,
		other => Rcode::from(other.parse::<u8>().ok()?),
	};

	Some(rcode)
}

fn build_retry_policy(flags: &[String]) -> utils::error::Result<RetryPolicy> {
	if flags.is_empty() {
		return Ok(RetryPolicy::default_policy());
	}

	if flags.iter().any(|f| f.eq_ignore_ascii_case("never")) {
		return Ok(RetryPolicy::never());
	}

	let mut policy = RetryPolicy::empty();

	for flag in flags {
		let Some(rcode) = parse_rcode(flag) else {
			log::error!("unknown rcode in --retry: {flag}");
			return Err(());
		};

		policy.mark_unacceptable(rcode);
	}

	Ok(policy)
}

fn default_binds() -> Vec<SocketAddr> {
	vec!["0.0.0.0:0".parse().unwrap(), "[::]:0".parse().unwrap()]
}

/// Either a seekable file or standard output, so the engine can hold one concrete `Sink<_>`
/// type regardless of which `--outfile` the user chose.
enum OutTarget {
	File(File),
	Stdout(io::Stdout),
}

impl Write for OutTarget {
	fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
		match self {
			Self::File(f) => f.write(buf),
			Self::Stdout(s) => s.write(buf),
		}
	}

	fn flush(&mut self) -> io::Result<()> {
		match self {
			Self::File(f) => f.flush(),
			Self::Stdout(s) => s.flush(),
		}
	}
}

fn open_outfile(path: &str, worker_index: u32, worker_count: u32) -> io::Result<OutTarget> {
	if path == "-" {
		return Ok(OutTarget::Stdout(io::stdout()));
	}

	let path = if worker_count > 1 { format!("{path}.{worker_index}") } else { path.to_owned() };

	Ok(OutTarget::File(File::create(path)?))
}

fn run(args: Args) -> utils::error::Result {
	if args.processes > 1 && cfg!(not(target_family = "unix")) {
		log::error!("--processes > 1 requires fork(), which this platform does not support");
		return Err(());
	}

	let workers = worker::spawn(args.processes).map_err(|err| log::error!("failed to fork workers: {err}"))?;

	// Everything below this line runs independently in every forked process.

	let resolvers_list = read_resolvers(&args.resolvers).map_err(|err| log::error!("failed to read resolvers file {}: {err}", args.resolvers))?;

	if resolvers_list.is_empty() {
		log::error!("resolvers file {} contained no usable resolvers", args.resolvers);
		return Err(());
	}

	let selection = if args.predictable {
		Selection::Predictable
	} else if args.sticky {
		Selection::Sticky
	} else {
		Selection::Random
	};

	let qtype = parse_type_name(&args.qtype).ok_or_else(|| log::error!("unknown query type: {}", args.qtype))?;

	let format = match args.output.to_ascii_uppercase().as_str() {
		"S" => Format::Simple,
		"F" => Format::Full,
		"B" => Format::Binary,
		other => {
			log::error!("unknown output format: {other} (expected S, F, or B)");
			return Err(());
		}
	};

	let retry = build_retry_policy(&args.retry)?;

	let binds = if args.bindto.is_empty() { default_binds() } else { args.bindto.clone() };

	let config = EngineConfig {
		resolve_count: args.resolve_count,
		interval_ms: args.interval,
		hashmap_size: args.hashmap_size,
		timed_ring_buckets: args.timed_ring_buckets,
		aggression: Aggression::from_u8(args.extreme),
		retry,
		recursion_desired: !args.norecurse,
		selection,
		qtype,
		output_format: format,
		quiet: args.quiet,
		binds,
		resolvers: resolvers_list,
	};

	let max_retries = config.max_retries();

	let mut poller = Poller::new();
	let sockets = SocketSet::bind(&config.binds, &mut poller, Interest::READ_WRITE)
		.map_err(|err| log::error!("failed to bind query sockets: {err}"))?;

	if sockets.is_empty() {
		log::error!("no query sockets could be bound");
		return Err(());
	}

	apply_socket_buffer_sizes(&sockets, args.sndbuf, args.rcvbuf);

	privilege::drop_to(&args.drop_user, args.root, args.quiet)?;

	let domains = Domains::<Source>::open_path_or_stdin(&args.domains).map_err(|err| log::error!("failed to open domain list {}: {err}", args.domains))?;

	let out = open_outfile(&args.outfile, workers.index, workers.count).map_err(|err| log::error!("failed to open output file {}: {err}", args.outfile))?;
	let sink = Sink::new(format, out).with_flush_every(args.flush);

	let resolvers = Resolvers::new(config.resolvers.clone(), config.selection);

	let mut engine = Engine::new(config, resolvers, sockets, poller, domains, sink, workers.index, workers.count);

	let mut alt = NoopReceiver;
	engine::run::run(&mut engine, &mut alt, workers, max_retries, args.quiet)
}

#[cfg(target_family = "unix")]
fn apply_socket_buffer_sizes(sockets: &SocketSet, sndbuf: Option<u32>, rcvbuf: Option<u32>) {
	use std::os::fd::AsRawFd;

	for socket in sockets.iter() {
		let fd = socket.socket.as_raw_fd();

		if let Some(size) = sndbuf {
			let size = size as libc::c_int;
			unsafe { libc::setsockopt(fd, libc::SOL_SOCKET, libc::SO_SNDBUF, &size as *const _ as *const libc::c_void, std::mem::size_of::<libc::c_int>() as u32) };
		}

		if let Some(size) = rcvbuf {
			let size = size as libc::c_int;
			unsafe { libc::setsockopt(fd, libc::SOL_SOCKET, libc::SO_RCVBUF, &size as *const _ as *const libc::c_void, std::mem::size_of::<libc::c_int>() as u32) };
		}
	}
}

#[cfg(not(target_family = "unix"))]
fn apply_socket_buffer_sizes(_sockets: &SocketSet, _sndbuf: Option<u32>, _rcvbuf: Option<u32>) {}

fn main() -> ExitCode {
	runtime::logger::init();

	let args = Args::parse();

	match run(args) {
		Ok(()) => ExitCode::SUCCESS,
		Err(()) => ExitCode::FAILURE,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn args_parses_required_positional_and_flag() {
		let args = Args::try_parse_from(["bulkdns", "domains.txt", "--resolvers", "resolvers.txt"]).unwrap();

		assert_eq!(args.domains, "domains.txt");
		assert_eq!(args.resolvers, "resolvers.txt");
		assert_eq!(args.resolve_count, 50);
		assert_eq!(args.interval, 500);
		assert_eq!(args.hashmap_size, 100_000);
		assert_eq!(args.processes, 1);
		assert_eq!(args.qtype, "A");
		assert_eq!(args.output, "F");
		assert_eq!(args.outfile, "-");
		assert!(!args.norecurse);
	}

	#[test]
	fn args_rejects_missing_resolvers() {
		assert!(Args::try_parse_from(["bulkdns", "domains.txt"]).is_err());
	}

	#[test]
	fn args_accepts_repeated_bindto_and_retry_flags() {
		let args = Args::try_parse_from(["bulkdns", "domains.txt", "--resolvers", "r.txt", "--bindto", "127.0.0.1:0", "--bindto", "[::]:0", "--retry", "SERVFAIL", "--retry", "NXDOMAIN"]).unwrap();

		assert_eq!(args.bindto.len(), 2);
		assert_eq!(args.retry, vec!["SERVFAIL".to_owned(), "NXDOMAIN".to_owned()]);
	}

	#[test]
	fn parse_rcode_accepts_named_and_numeric_forms() {
		assert_eq!(parse_rcode("servfail"), Some(Rcode::ServerFailure));
		assert_eq!(parse_rcode("NXDOMAIN"), Some(Rcode::NameErr));
		assert_eq!(parse_rcode("3"), Some(Rcode::NameErr));
		assert_eq!(parse_rcode("not-a-code"), None);
	}

	#[test]
	fn build_retry_policy_defaults_to_refused_only() {
		let policy = build_retry_policy(&[]).unwrap();

		assert!(policy.is_unacceptable(Rcode::Refused));
		assert!(!policy.is_unacceptable(Rcode::ServerFailure));
		assert!(!policy.never);
	}

	#[test]
	fn build_retry_policy_never_disables_retries_outright() {
		let policy = build_retry_policy(&["never".to_owned()]).unwrap();

		assert!(policy.never);
		assert!(!policy.is_unacceptable(Rcode::Refused));
	}

	#[test]
	fn build_retry_policy_explicit_list_clears_the_default_and_replaces_it() {
		let policy = build_retry_policy(&["SERVFAIL".to_owned(), "NXDOMAIN".to_owned()]).unwrap();

		assert!(!policy.is_unacceptable(Rcode::Refused));
		assert!(policy.is_unacceptable(Rcode::ServerFailure));
		assert!(policy.is_unacceptable(Rcode::NameErr));
	}

	#[test]
	fn build_retry_policy_rejects_unknown_rcode_names() {
		assert!(build_retry_policy(&["not-a-real-code".to_owned()]).is_err());
	}

	#[test]
	fn default_binds_covers_both_address_families() {
		let binds = default_binds();
		assert_eq!(binds.len(), 2);
		assert!(binds.iter().any(SocketAddr::is_ipv4));
		assert!(binds.iter().any(SocketAddr::is_ipv6));
	}

	#[test]
	fn open_outfile_dash_means_stdout() {
		assert!(matches!(open_outfile("-", 0, 1).unwrap(), OutTarget::Stdout(_)));
	}

	#[test]
	fn open_outfile_suffixes_with_worker_index_when_multi_process() {
		let dir = std::env::temp_dir().join(format!("bulkdns-test-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let base = dir.join("out").to_string_lossy().into_owned();

		assert!(open_outfile(&base, 2, 4).is_ok());
		assert!(std::path::Path::new(&format!("{base}.2")).exists());

		std::fs::remove_dir_all(&dir).ok();
	}

	#[test]
	fn open_outfile_does_not_suffix_single_process_runs() {
		let dir = std::env::temp_dir().join(format!("bulkdns-test-single-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let base = dir.join("out").to_string_lossy().into_owned();

		assert!(open_outfile(&base, 0, 1).is_ok());
		assert!(std::path::Path::new(&base).exists());

		std::fs::remove_dir_all(&dir).ok();
	}
}
