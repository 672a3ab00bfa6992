use std::sync::Arc;

use weft_pubsub::{driver::memory::MemoryDriver, PubSub};

use crate::db::{memory::MemoryStore, StoreHandle};

struct ConnectionInner {
	store: StoreHandle,
	pubsub: PubSub,
	namespace: String,
}

/// Bundle of the store, pub/sub, and namespace shared by clients, workers,
/// and the dispatch loop. Cheap to clone.
#[derive(Clone)]
pub struct Connection {
	inner: Arc<ConnectionInner>,
}

impl Connection {
	pub fn new(store: StoreHandle, pubsub: PubSub, namespace: impl Into<String>) -> Self {
		Connection {
			inner: Arc::new(ConnectionInner {
				store,
				pubsub,
				namespace: namespace.into(),
			}),
		}
	}

	/// Connection over the in-memory drivers. Suitable for tests and
	/// single-process deployments.
	pub fn memory(namespace: impl Into<String>) -> Self {
		Connection::new(
			Arc::new(MemoryStore::new()),
			PubSub::new(Arc::new(MemoryDriver::new())),
			namespace,
		)
	}

	/// Same store and pub/sub under a different namespace.
	pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
		Connection::new(
			self.inner.store.clone(),
			self.inner.pubsub.clone(),
			namespace,
		)
	}

	pub fn store(&self) -> &StoreHandle {
		&self.inner.store
	}

	pub fn pubsub(&self) -> &PubSub {
		&self.inner.pubsub
	}

	pub fn namespace(&self) -> &str {
		&self.inner.namespace
	}
}
