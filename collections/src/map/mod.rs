use core::hash::{BuildHasher, BuildHasherDefault, Hash};

use ahash::AHasher;
use hashbrown::hash_table::{Entry as RawEntry, HashTable};
use slab::Slab;

/// A type that can be looked up by an embedded key.
pub trait Key {
	type Type: Hash + Eq + ?Sized;

	/// Get the contained key.
	fn key(&self) -> &Self::Type;
}

/// Backing storage: a slab of values plus a hash table of slab indices.
///
/// Splitting the two lets entries move through the slab-index namespace without rehashing
/// anything, and keeps the hash table's load factor independent of slab occupancy bookkeeping.
struct Core<T> {
	slab: Slab<T>,
	table: HashTable<usize>,
}

impl<T> Core<T> {
	fn with_capacity(capacity: usize) -> Self {
		Self { slab: Slab::with_capacity(capacity), table: HashTable::with_capacity(capacity) }
	}

	fn len(&self) -> usize {
		self.slab.len()
	}

	fn get(&self, idx: usize) -> &T {
		&self.slab[idx]
	}

	fn get_mut(&mut self, idx: usize) -> &mut T {
		&mut self.slab[idx]
	}

	fn find(&self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Option<usize> {
		self.table.find(hash, |&idx| eq(&self.slab[idx])).copied()
	}

	/// Returns `Ok(idx)` if an entry matching `eq` already exists, otherwise reserves a slab
	/// slot and returns `Err(idx)` for the caller to fill with [`Core::insert`].
	///
	/// Admission control relies on this split to implement duplicate suppression: a second
	/// lookup for an in-flight `(name, type)` lands on the existing slot instead of a new one.
	fn find_or_reserve(&mut self, hash: u64, mut eq: impl FnMut(&T) -> bool) -> Result<usize, usize> {
		match self.table.find(hash, |&idx| eq(&self.slab[idx])) {
			Some(&idx) => Ok(idx),
			None => Err(self.slab.vacant_key()),
		}
	}

	fn insert(&mut self, idx: usize, hash: u64, value: T) {
		let inserted = self.slab.insert(value);
		debug_assert_eq!(inserted, idx);
		self.table.insert_unique(hash, idx, |_| hash);
	}

	fn remove(&mut self, hash: u64, idx: usize) -> T {
		if let RawEntry::Occupied(e) = self.table.entry(hash, |&i| i == idx, |_| hash) {
			e.remove();
		}

		self.slab.remove(idx)
	}
}

/// A handle into a [`Map`]'s backing slab. Stable until the occupying entry is removed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Slot(usize);

/// A fixed-capacity, open-addressed associative container.
///
/// Unlike `std::collections::HashMap`, capacity is a runtime parameter rather than a const
/// generic: this backs the engine's name/type correlation table, whose size is chosen by
/// `--hashmap-size` at startup rather than known at compile time.
pub struct Map<T, S = BuildHasherDefault<AHasher>> {
	core: Core<T>,
	hash: S,
	capacity: usize,
}

impl<T> Map<T, BuildHasherDefault<AHasher>> {
	#[must_use]
	pub fn with_capacity(capacity: usize) -> Self {
		Self::new(capacity, BuildHasherDefault::default())
	}
}

impl<T: Key, S: BuildHasher> Map<T, S> {
	#[must_use]
	pub fn new(capacity: usize, hash: S) -> Self {
		Self { core: Core::with_capacity(capacity), hash, capacity }
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.core.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	#[must_use]
	pub fn capacity(&self) -> usize {
		self.capacity
	}

	#[must_use]
	pub fn get(&self, k: &T::Type) -> Option<&T> {
		let hash = self.hash.hash_one(k);
		let idx = self.core.find(hash, |i| i.key() == k)?;
		Some(self.core.get(idx))
	}

	#[must_use]
	pub fn get_mut(&mut self, k: &T::Type) -> Option<&mut T> {
		let hash = self.hash.hash_one(k);
		let idx = self.core.find(hash, |i| i.key() == k)?;
		Some(self.core.get_mut(idx))
	}

	/// Removes the entry matching `k`, if present.
	pub fn remove(&mut self, k: &T::Type) -> Option<T> {
		let hash = self.hash.hash_one(k);
		let idx = self.core.find(hash, |i| i.key() == k)?;
		Some(self.core.remove(hash, idx))
	}

	/// Looks up or prepares to insert at `k`'s position, without hashing twice.
	#[must_use]
	pub fn entry(&mut self, k: &T::Type) -> Entry<'_, T> {
		let hash = self.hash.hash_one(k);

		match self.core.find_or_reserve(hash, |i| i.key() == k) {
			Ok(idx) => Entry::Filled(Filled { core: &mut self.core, slot: Slot(idx), hash }),
			Err(idx) => Entry::Vacant(Vacant { core: &mut self.core, slot: Slot(idx), hash }),
		}
	}
}

pub enum Entry<'a, T> {
	Filled(Filled<'a, T>),
	Vacant(Vacant<'a, T>),
}

impl<'a, T> Entry<'a, T> {
	#[must_use]
	pub fn filled(self) -> Option<Filled<'a, T>> {
		match self {
			Self::Filled(f) => Some(f),
			Self::Vacant(_) => None,
		}
	}
}

pub struct Filled<'a, T> {
	core: &'a mut Core<T>,
	slot: Slot,
	hash: u64,
}

impl<'a, T> Filled<'a, T> {
	#[must_use]
	pub fn slot(&self) -> Slot {
		self.slot
	}

	#[must_use]
	pub fn get(&self) -> &T {
		self.core.get(self.slot.0)
	}

	#[must_use]
	pub fn get_mut(&mut self) -> &mut T {
		self.core.get_mut(self.slot.0)
	}

	pub fn remove(self) -> T {
		self.core.remove(self.hash, self.slot.0)
	}
}

pub struct Vacant<'a, T> {
	core: &'a mut Core<T>,
	slot: Slot,
	hash: u64,
}

impl<'a, T> Vacant<'a, T> {
	#[must_use]
	pub fn slot(&self) -> Slot {
		self.slot
	}

	pub fn insert(self, t: T) -> Slot {
		self.core.insert(self.slot.0, self.hash, t);
		self.slot
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Named(String);

	impl Key for Named {
		type Type = str;

		fn key(&self) -> &Self::Type {
			&self.0
		}
	}

	#[test]
	fn insert_find_remove() {
		let mut map = Map::<Named>::with_capacity(8);

		if let Entry::Vacant(v) = map.entry("example.com.") {
			v.insert(Named("example.com.".into()));
		} else {
			panic!("expected vacant entry");
		}

		assert_eq!(map.len(), 1);
		assert!(map.get("example.com.").is_some());
		assert!(map.get("other.com.").is_none());

		assert!(map.remove("example.com.").is_some());
		assert_eq!(map.len(), 0);
		assert!(map.get("example.com.").is_none());
	}

	#[test]
	fn duplicate_insert_keeps_existing() {
		let mut map = Map::<Named>::with_capacity(8);

		if let Entry::Vacant(v) = map.entry("dup.com.") {
			v.insert(Named("dup.com.".into()));
		}

		match map.entry("dup.com.") {
			Entry::Filled(_) => {}
			Entry::Vacant(_) => panic!("second insert should observe the first entry"),
		}

		assert_eq!(map.len(), 1);
	}

	#[test]
	fn capacity_reports_requested_value() {
		let map = Map::<Named>::with_capacity(100_000);
		assert_eq!(map.capacity(), 100_000);
	}
}
