#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// Keyed registry of shared instances that never extends their lifetime.
///
/// Entries are weak; once every caller drops its handle the next lookup for the
/// key builds a fresh instance. Expired entries are pruned lazily.
pub struct ConnectionPool<K, T> {
	entries: Mutex<HashMap<K, Weak<T>>>,
}

impl<K: Eq + Hash, T> ConnectionPool<K, T> {
	pub fn new() -> Self {
		Self {
			entries: Mutex::new(HashMap::new()),
		}
	}

	/// Live instance for `key`, if any.
	pub fn get(&self, key: &K) -> Option<Arc<T>> {
		self.entries.lock().get(key).and_then(Weak::upgrade)
	}

	/// Live instance for `key`, or a new one from `make`.
	///
	/// `make` runs under the pool lock, so two concurrent callers never both build.
	pub fn get_or_create(&self, key: K, make: impl FnOnce() -> T) -> Arc<T> {
		let mut entries = self.entries.lock();
		if let Some(existing) = entries.get(&key).and_then(Weak::upgrade) {
			return existing;
		}

		entries.retain(|_, weak| weak.strong_count() > 0);
		let created = Arc::new(make());
		entries.insert(key, Arc::downgrade(&created));
		created
	}

	/// Like [`get_or_create`](Self::get_or_create) for fallible construction.
	pub fn get_or_try_create<E>(&self, key: K, make: impl FnOnce() -> Result<T, E>) -> Result<Arc<T>, E> {
		let mut entries = self.entries.lock();
		if let Some(existing) = entries.get(&key).and_then(Weak::upgrade) {
			return Ok(existing);
		}

		entries.retain(|_, weak| weak.strong_count() > 0);
		let created = Arc::new(make()?);
		entries.insert(key, Arc::downgrade(&created));
		Ok(created)
	}

	/// Number of live instances.
	pub fn live_count(&self) -> usize {
		let mut entries = self.entries.lock();
		entries.retain(|_, weak| weak.strong_count() > 0);
		entries.len()
	}
}

impl<K: Eq + Hash, T> Default for ConnectionPool<K, T> {
	fn default() -> Self {
		Self::new()
	}
}
