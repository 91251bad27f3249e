#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Default per-consumer buffer capacity.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

struct BufferInner<T> {
	queue: Mutex<VecDeque<T>>,
	/// 0 means unbounded.
	capacity: usize,
	dropped: AtomicU64,
	notify: Notify,
}

impl<T> BufferInner<T> {
	fn push(&self, msg: T) {
		{
			let mut queue = self.queue.lock();
			if self.capacity > 0 && queue.len() >= self.capacity {
				queue.pop_front();
				self.dropped.fetch_add(1, Ordering::Relaxed);
			}
			queue.push_back(msg);
		}
		self.notify.notify_one();
	}
}

/// Fan-out of decoded messages to independent consumer buffers.
///
/// The dispatcher only keeps weak references; a buffer stops receiving once its
/// owner drops it, and the dead entry is pruned on the next dispatch.
pub struct MessageDispatcher<T> {
	buffers: Mutex<Vec<Weak<BufferInner<T>>>>,
	capacity: usize,
}

impl<T: Clone> MessageDispatcher<T> {
	pub fn new(capacity: usize) -> Self {
		Self {
			buffers: Mutex::new(Vec::new()),
			capacity,
		}
	}

	/// New buffer receiving every message dispatched from now on.
	pub fn register(&self) -> MessageBuffer<T> {
		let inner = Arc::new(BufferInner {
			queue: Mutex::new(VecDeque::new()),
			capacity: self.capacity,
			dropped: AtomicU64::new(0),
			notify: Notify::new(),
		});
		self.buffers.lock().push(Arc::downgrade(&inner));
		MessageBuffer { inner }
	}

	/// Append `msg` to every live buffer. Never waits on consumers.
	pub fn dispatch(&self, msg: T) {
		let mut buffers = self.buffers.lock();
		buffers.retain(|weak| match weak.upgrade() {
			Some(buffer) => {
				buffer.push(msg.clone());
				true
			}
			None => false,
		});
	}

	/// Number of live consumers.
	pub fn consumer_count(&self) -> usize {
		let mut buffers = self.buffers.lock();
		buffers.retain(|weak| weak.strong_count() > 0);
		buffers.len()
	}
}

impl<T: Clone> Default for MessageDispatcher<T> {
	fn default() -> Self {
		Self::new(DEFAULT_BUFFER_CAPACITY)
	}
}

/// Single-reader FIFO fed by a [`MessageDispatcher`].
pub struct MessageBuffer<T> {
	inner: Arc<BufferInner<T>>,
}

impl<T> MessageBuffer<T> {
	pub fn empty(&self) -> bool {
		self.inner.queue.lock().is_empty()
	}

	pub fn len(&self) -> usize {
		self.inner.queue.lock().len()
	}

	/// Pop the oldest unread message.
	pub fn consume_message(&self) -> Option<T> {
		self.inner.queue.lock().pop_front()
	}

	/// Discard everything buffered so far.
	pub fn clear(&self) {
		self.inner.queue.lock().clear();
	}

	/// Messages evicted because the buffer was full.
	pub fn dropped(&self) -> u64 {
		self.inner.dropped.load(Ordering::Relaxed)
	}

	/// Wait for the next message.
	///
	/// Pending forever if the dispatcher is gone; wrap in a timeout where that matters.
	pub async fn recv(&mut self) -> T {
		loop {
			if let Some(msg) = self.consume_message() {
				return msg;
			}
			self.inner.notify.notified().await;
		}
	}
}

impl<T> std::fmt::Debug for MessageBuffer<T> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MessageBuffer")
			.field("len", &self.len())
			.field("dropped", &self.dropped())
			.finish()
	}
}
