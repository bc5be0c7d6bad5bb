//! A fixed-capacity pool of reusable records, grounded on massdns's `lookup_pool`
//! (`original_source/main.c`): a flat array of slots allocated once at startup, handed out on
//! `new_lookup` and returned to a free list on completion, never grown or shrunk at runtime.

use slab::Slab;

/// A handle into a [`Pool`]. Carries a generation counter so a handle from a completed lookup
/// can never be mistaken for the handle of whatever later lookup reused its slot.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Handle {
	index: usize,
	generation: u32,
}

/// A capacity-bounded pool of `T`, handed out as generation-checked [`Handle`]s.
///
/// massdns sizes its lookup pool at twice the hashmap size so that timed-out-but-not-yet-evicted
/// entries don't starve admission of new lookups; callers here choose their own capacity for the
/// same reason.
pub struct Pool<T> {
	slab: Slab<T>,
	/// Generation per slab index, indexed independently of occupancy so it survives removal.
	generations: Vec<u32>,
	capacity: usize,
}

impl<T> Pool<T> {
	#[must_use]
	pub fn with_capacity(capacity: usize) -> Self {
		Self { slab: Slab::with_capacity(capacity), generations: Vec::with_capacity(capacity), capacity }
	}

	#[must_use]
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.slab.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.slab.is_empty()
	}

	#[must_use]
	pub fn is_full(&self) -> bool {
		self.slab.len() >= self.capacity
	}

	/// Allocates a slot for `value`, returning `None` if the pool is at capacity.
	pub fn insert(&mut self, value: T) -> Option<Handle> {
		if self.is_full() {
			return None;
		}

		let index = self.slab.insert(value);

		if index == self.generations.len() {
			self.generations.push(0);
		}

		Some(Handle { index, generation: self.generations[index] })
	}

	#[must_use]
	pub fn get(&self, handle: Handle) -> Option<&T> {
		if self.generations[handle.index] != handle.generation {
			return None;
		}

		self.slab.get(handle.index)
	}

	#[must_use]
	pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
		if self.generations[handle.index] != handle.generation {
			return None;
		}

		self.slab.get_mut(handle.index)
	}

	/// Releases the slot back to the pool, bumping its generation so stale handles miss.
	pub fn remove(&mut self, handle: Handle) -> Option<T> {
		if self.generations[handle.index] != handle.generation {
			return None;
		}

		let value = self.slab.try_remove(handle.index)?;
		self.generations[handle.index] = self.generations[handle.index].wrapping_add(1);
		Some(value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn stale_handle_is_rejected_after_reuse() {
		let mut pool = Pool::with_capacity(2);

		let a = pool.insert(1u32).unwrap();
		pool.remove(a).unwrap();

		let b = pool.insert(2u32).unwrap();
		assert_eq!(b.index, a.index);
		assert_ne!(b.generation, a.generation);

		assert_eq!(pool.get(a), None);
		assert_eq!(pool.get(b), Some(&2));
	}

	#[test]
	fn insert_fails_once_full() {
		let mut pool = Pool::with_capacity(1);
		assert!(pool.insert(1u32).is_some());
		assert!(pool.insert(2u32).is_none());
	}
}
