//! A timing wheel, grounded on massdns's `timed_ring` (`original_source/main.c`): a circular
//! array of buckets, each a list of entries due at roughly the same time, advanced one bucket
//! per tick so scheduling and cancellation are both O(1) regardless of how many timers are live.
//!
//! massdns's `timed_ring` stores one entry per bucket in a fixed-size array and resolves
//! collisions with in-place linear probing within the bucket's neighborhood. Since a lookup's
//! retry deadline and a worker's periodic progress tick can legitimately land in the same
//! bucket, and the number of concurrently scheduled timers isn't known up front, buckets here
//! hold an arbitrary number of entries via an intrusive doubly linked list threaded through a
//! single slab — the circular-indexing idiom carries over, the fixed-arity-per-bucket
//! restriction doesn't.

use slab::Slab;

const NIL: usize = usize::MAX;

struct Node<T> {
	value: T,
	bucket: usize,
	prev: usize,
	next: usize,
}

/// A handle into a [`Wheel`]. Used to cancel a scheduled entry before it fires.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Handle(usize);

/// A circular timing wheel over `buckets` slots, each holding zero or more entries of `T`.
///
/// `cursor` is the bucket that represents "now"; advancing by one bucket represents one tick
/// of the wheel's time unit (massdns ticks every `interval_ms`, configurable at startup).
pub struct Wheel<T> {
	nodes: Slab<Node<T>>,
	heads: Vec<usize>,
	cursor: usize,
}

impl<T> Wheel<T> {
	#[must_use]
	pub fn new(buckets: usize) -> Self {
		assert!(buckets > 0, "a timing wheel needs at least one bucket");
		Self { nodes: Slab::new(), heads: vec![NIL; buckets], cursor: 0 }
	}

	#[must_use]
	pub fn buckets(&self) -> usize {
		self.heads.len()
	}

	/// Schedules `value` to fire `delay` buckets from now (`0` means the current bucket).
	/// Delays that would outrun the ring (`delay >= buckets()`) are clamped to the furthest
	/// reachable bucket rather than wrapping around to one that's already due sooner.
	pub fn schedule(&mut self, delay: usize, value: T) -> Handle {
		let delay = delay.min(self.heads.len() - 1);
		let bucket = (self.cursor + delay) % self.heads.len();
		let old_head = self.heads[bucket];

		let index = self.nodes.insert(Node { value, bucket, prev: NIL, next: old_head });

		if old_head != NIL {
			self.nodes[old_head].prev = index;
		}

		self.heads[bucket] = index;
		Handle(index)
	}

	/// Removes a previously scheduled entry before it fires. No-op if already fired.
	pub fn cancel(&mut self, handle: Handle) -> Option<T> {
		if !self.nodes.contains(handle.0) {
			return None;
		}

		let node = self.nodes.remove(handle.0);
		self.unlink(&node);
		Some(node.value)
	}

	fn unlink(&mut self, node: &Node<T>) {
		if node.prev != NIL {
			self.nodes[node.prev].next = node.next;
		} else {
			self.heads[node.bucket] = node.next;
		}

		if node.next != NIL {
			self.nodes[node.next].prev = node.prev;
		}
	}

	/// Advances the wheel by `steps` buckets — the number of bucket-widths of wall-clock time
	/// that have elapsed since the last advance — draining every entry due in each bucket
	/// crossed and passing it to `callback` in unspecified order. `steps` of `0` is a no-op, so
	/// a caller can advance however far real time has actually moved rather than once per call.
	/// `steps` beyond `buckets()` is equivalent to exactly `buckets()`: every bucket gets visited
	/// either way, since nothing scheduled during this call can land in an already-visited one.
	pub fn advance(&mut self, steps: usize, mut callback: impl FnMut(T)) {
		let steps = steps.min(self.heads.len());

		for _ in 0..steps {
			self.cursor = (self.cursor + 1) % self.heads.len();
			let mut cur = self.heads[self.cursor];
			self.heads[self.cursor] = NIL;

			while cur != NIL {
				let node = self.nodes.remove(cur);
				cur = node.next;
				callback(node.value);
			}
		}
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.nodes.is_empty()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.nodes.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fires_after_exact_delay() {
		let mut wheel = Wheel::new(4);
		wheel.schedule(2, "retry");

		let mut fired = Vec::new();
		wheel.advance(1, |v| fired.push(v));
		assert!(fired.is_empty());

		wheel.advance(1, |v| fired.push(v));
		assert_eq!(fired, vec!["retry"]);
	}

	#[test]
	fn cancel_prevents_fire() {
		let mut wheel = Wheel::new(4);
		let handle = wheel.schedule(1, "retry");
		assert_eq!(wheel.cancel(handle), Some("retry"));

		let mut fired = Vec::new();
		wheel.advance(1, |v| fired.push(v));
		assert!(fired.is_empty());
	}

	#[test]
	fn multiple_entries_share_a_bucket() {
		let mut wheel = Wheel::new(4);
		wheel.schedule(1, 1);
		wheel.schedule(1, 2);
		wheel.schedule(1, 3);

		let mut fired = Vec::new();
		wheel.advance(1, |v| fired.push(v));
		fired.sort_unstable();
		assert_eq!(fired, vec![1, 2, 3]);
	}

	#[test]
	fn schedule_clamps_overlong_delays_to_the_furthest_bucket() {
		let mut wheel = Wheel::new(3);
		wheel.schedule(5, "clamped");

		let mut fired = Vec::new();
		wheel.advance(1, |v| fired.push(v));
		assert!(fired.is_empty());

		// The furthest reachable bucket is `buckets() - 1` away, not the unclamped delay of 5.
		wheel.advance(1, |v| fired.push(v));
		assert_eq!(fired, vec!["clamped"]);
	}

	#[test]
	fn advance_catches_up_several_buckets_in_one_call() {
		let mut wheel = Wheel::new(4);
		wheel.schedule(1, "a");
		wheel.schedule(3, "b");

		let mut fired = Vec::new();
		wheel.advance(3, |v| fired.push(v));
		fired.sort_unstable();

		assert_eq!(fired, vec!["a", "b"]);
	}

	#[test]
	fn zero_steps_advances_nothing() {
		let mut wheel = Wheel::new(4);
		wheel.schedule(1, "retry");

		let mut fired = Vec::new();
		wheel.advance(0, |v| fired.push(v));
		assert!(fired.is_empty());
	}
}
