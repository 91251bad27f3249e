#![forbid(unsafe_code)]

use std::collections::VecDeque;

/// Default number of recently seen EventSub message ids to remember.
pub const DEFAULT_DEDUPE_WINDOW: usize = 20;

/// Fixed-size FIFO of recently seen message ids.
///
/// An id already in the window is rejected. Otherwise the oldest id is evicted
/// when the window is full and the new one is appended.
///
/// Only ids still inside the window are rejected: with capacity 3, the second
/// `a` in `a, b, c, d, a` is accepted because `d` evicted the first one.
#[derive(Debug, Clone)]
pub struct DedupeWindow {
	ids: VecDeque<String>,
	capacity: usize,
}

impl DedupeWindow {
	pub fn new(capacity: usize) -> Self {
		let capacity = capacity.max(1);
		Self {
			ids: VecDeque::with_capacity(capacity),
			capacity,
		}
	}

	/// Record `id`. Returns `false` if it was already seen within the window.
	pub fn check_and_insert(&mut self, id: &str) -> bool {
		if self.contains(id) {
			return false;
		}
		if self.ids.len() >= self.capacity {
			self.ids.pop_front();
		}
		self.ids.push_back(id.to_string());
		true
	}

	pub fn contains(&self, id: &str) -> bool {
		self.ids.iter().any(|seen| seen == id)
	}

	pub fn len(&self) -> usize {
		self.ids.len()
	}

	pub fn is_empty(&self) -> bool {
		self.ids.is_empty()
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn clear(&mut self) {
		self.ids.clear();
	}
}

impl Default for DedupeWindow {
	fn default() -> Self {
		Self::new(DEFAULT_DEDUPE_WINDOW)
	}
}
