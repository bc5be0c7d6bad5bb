//! The event loop (spec.md §4.5): turns poller readiness into engine calls, advances the
//! timing wheel up to however far wall-clock time has moved since the last pass, and — in the
//! coordinator — aggregates worker stats.

use std::fs::File;
use std::io::{Read, Write};

use runtime::Token;

use crate::alt::AltReceiver;
use crate::engine::{Engine, State};
use crate::stats::{recv_snapshot, send_snapshot, Aggregator};
use crate::worker::Workers;

enum Role {
	Worker { writer: File },
	Coordinator { aggregator: Aggregator, readers: Vec<(File, Token)> },
}

/// Drives a single process's event loop to completion (engine state [`State::Done`]).
///
/// `workers` determines this process's role: worker 0 (including the sole worker of a
/// single-process run) aggregates and prints progress; every other worker only forwards its
/// own stats up the pipe `workers` gave it.
pub fn run<R: Read, W: Write>(engine: &mut Engine<R, W>, alt: &mut dyn AltReceiver, workers: Workers, max_retries: u32, quiet: bool) -> utils::error::Result {
	let socket_tokens: Vec<Token> = engine.sockets_mut().iter().map(|s| s.token).collect();
	let alt_token = alt.register(engine.poller_mut());

	let is_coordinator = workers.is_coordinator();
	let worker_count = workers.count;

	let mut role = if is_coordinator {
		let readers = workers
			.stats_readers
			.into_iter()
			.map(|reader| {
				let token = engine.poller_mut().register(&reader, runtime::Interest::READ);
				(reader, token)
			})
			.collect();

		Role::Coordinator { aggregator: Aggregator::new(worker_count as usize, max_retries, quiet), readers }
	} else {
		Role::Worker { writer: workers.stats_writer.expect("non-coordinator worker always has a stats pipe") }
	};

	engine.pump_admission()?;

	loop {
		engine.poller_mut().wait(Some(engine.poll_timeout()))?;

		let mut send_ready = false;

		for &token in &socket_tokens {
			if engine.poller_mut().writable(token) {
				send_ready = true;
			}
		}

		for (idx, &token) in socket_tokens.iter().enumerate() {
			if engine.poller_mut().readable(token) {
				engine.recv_one(idx)?;
			}
		}

		if let Some(token) = alt_token {
			if engine.poller_mut().readable(token) {
				engine.recv_alt_batch(alt)?;
			}
		}

		if send_ready {
			engine.pump_admission()?;
		}

		// The wheel catches up to however much wall-clock time has actually elapsed since the
		// last call, after this iteration's sends/receives; a loop spinning faster than one
		// bucket's width of real time simply advances zero buckets until it catches up.
		let progress_fired = engine.on_tick()?;

		if progress_fired {
			match &mut role {
				Role::Worker { writer } => {
					let mut buf = Vec::new();
					send_snapshot(writer, engine.stats(), &mut buf);
				}
				Role::Coordinator { aggregator, readers } => {
					*aggregator.coordinator_slot_mut() = engine.stats().clone();

					for (idx, (reader, token)) in readers.iter_mut().enumerate() {
						if !engine.poller_mut().readable(*token) {
							continue;
						}

						match recv_snapshot(reader, max_retries) {
							Ok(Some(snapshot)) => aggregator.update(idx + 1, snapshot),
							Ok(None) => log::warn!("stats pipe for worker {} closed", idx + 1),
							Err(err) => log::error!("failed to read stats from worker {}: {err}", idx + 1),
						}
					}

					aggregator.tick(engine.progress());
				}
			}
		}

		if engine.state() == State::Done {
			break;
		}
	}

	engine.flush_output()
}

#[cfg(test)]
mod tests {
	use std::io::Cursor;

	use super::*;
	use crate::alt::NoopReceiver;
	use crate::config::EngineConfig;
	use crate::output::{Format, Sink};
	use crate::resolver::Resolvers;
	use crate::socket::SocketSet;
	use crate::worker;
	use dns::Domains;

	/// With no domains to admit, `pump_admission` (called once, up front, by `run`) drives the
	/// engine straight to `State::Done`; the loop should then exit on its very first iteration.
	#[test]
	fn run_terminates_immediately_when_there_is_nothing_to_admit() {
		let config = EngineConfig { binds: vec!["127.0.0.1:0".parse().unwrap()], resolvers: vec!["127.0.0.1:19053".parse().unwrap()], ..EngineConfig::default() };

		let resolvers = Resolvers::new(config.resolvers.clone(), config.selection);
		let mut poller = runtime::Poller::new();
		let sockets = SocketSet::bind(&config.binds, &mut poller, runtime::Interest::READ_WRITE).unwrap();
		let domains = Domains::from_reader(Cursor::new(Vec::new()));
		let sink = Sink::new(Format::Full, Vec::new());
		let max_retries = config.max_retries();

		let mut engine = Engine::new(config, resolvers, sockets, poller, domains, sink, 0, 1);
		let mut alt = NoopReceiver;
		let workers = worker::spawn(1).unwrap();

		run(&mut engine, &mut alt, workers, max_retries, true).unwrap();

		assert_eq!(engine.state(), State::Done);
	}
}
