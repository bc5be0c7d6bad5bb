//! The resolver set (spec.md §4.3 "resolver selection"): a read-only vector of upstream
//! servers, chosen per query either stickily, predictably, or uniformly at random.

use std::net::SocketAddr;

use rand::Rng;

/// How a query's upstream resolver is chosen.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Selection {
	/// Reuse the resolver a lookup was already pinned to, if any; otherwise fall back to random.
	Sticky,
	/// `admission_counter mod |resolvers|`, deterministic and reproducible across runs.
	Predictable,
	/// Uniformly random each time.
	Random,
}

pub struct Resolvers {
	servers: Vec<SocketAddr>,
	selection: Selection,
}

impl Resolvers {
	#[must_use]
	pub fn new(servers: Vec<SocketAddr>, selection: Selection) -> Self {
		assert!(!servers.is_empty(), "resolver set must not be empty at construction");
		Self { servers, selection }
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.servers.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.servers.is_empty()
	}

	/// Chooses a resolver for a lookup. `pinned` is the lookup's already-chosen resolver, if
	/// any (only consulted under [`Selection::Sticky`]); `admission_counter` backs
	/// [`Selection::Predictable`].
	#[must_use]
	pub fn choose(&self, pinned: Option<SocketAddr>, admission_counter: u64) -> SocketAddr {
		if self.selection == Selection::Sticky {
			if let Some(addr) = pinned {
				return addr;
			}
		}

		match self.selection {
			Selection::Predictable => self.servers[(admission_counter as usize) % self.servers.len()],
			Selection::Sticky | Selection::Random => self.servers[rand::thread_rng().gen_range(0..self.servers.len())],
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn predictable_selection_cycles_in_order() {
		let servers: Vec<SocketAddr> = vec!["1.1.1.1:53".parse().unwrap(), "8.8.8.8:53".parse().unwrap()];
		let resolvers = Resolvers::new(servers.clone(), Selection::Predictable);

		assert_eq!(resolvers.choose(None, 0), servers[0]);
		assert_eq!(resolvers.choose(None, 1), servers[1]);
		assert_eq!(resolvers.choose(None, 2), servers[0]);
	}

	#[test]
	fn sticky_selection_reuses_pinned_resolver() {
		let servers: Vec<SocketAddr> = vec!["1.1.1.1:53".parse().unwrap(), "8.8.8.8:53".parse().unwrap()];
		let resolvers = Resolvers::new(servers.clone(), Selection::Sticky);

		assert_eq!(resolvers.choose(Some(servers[1]), 0), servers[1]);
	}
}
