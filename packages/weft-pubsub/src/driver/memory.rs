use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use anyhow::*;
use async_trait::async_trait;
use scc::HashMap;
use tokio::sync::mpsc;

use crate::driver::{PubSubDriver, SubscriberDriver, SubscriberDriverHandle};
use crate::pubsub::DriverOutput;

type Subscribers = HashMap<String, Vec<mpsc::UnboundedSender<Vec<u8>>>>;

const GC_INTERVAL: Duration = Duration::from_secs(60);

pub struct MemoryDriverInner {
	subscribers: Subscribers,
}

/// In-process driver. Every subscriber of a subject receives every payload
/// published to it; delivery order per subscriber matches publish order.
#[derive(Clone)]
pub struct MemoryDriver(Arc<MemoryDriverInner>);

impl Deref for MemoryDriver {
	type Target = MemoryDriverInner;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl MemoryDriver {
	pub fn new() -> Self {
		let inner = Arc::new(MemoryDriverInner {
			subscribers: HashMap::new(),
		});

		// Spawn GC task to clean up closed subscribers
		let gc_inner = Arc::downgrade(&inner);
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(GC_INTERVAL);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

			loop {
				interval.tick().await;
				if let Some(inner) = gc_inner.upgrade() {
					inner
						.subscribers
						.retain_async(|_, senders| {
							senders.retain(|sender| !sender.is_closed());
							!senders.is_empty()
						})
						.await;
				} else {
					break;
				}
			}
		});

		Self(inner)
	}
}

impl Default for MemoryDriver {
	fn default() -> Self {
		MemoryDriver::new()
	}
}

#[async_trait]
impl PubSubDriver for MemoryDriver {
	async fn subscribe(&self, subject: &str) -> Result<SubscriberDriverHandle> {
		let (tx, rx) = mpsc::unbounded_channel();

		self.subscribers
			.entry_async(subject.to_string())
			.await
			.or_default()
			.push(tx);

		Ok(Box::new(MemorySubscriber {
			subject: subject.to_string(),
			rx,
		}))
	}

	async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
		if let Some(subs) = self.subscribers.get_async(subject).await {
			for tx in &*subs {
				let _ = tx.send(payload.to_vec());
			}
		}

		Ok(())
	}

	async fn flush(&self) -> Result<()> {
		Ok(())
	}
}

pub struct MemorySubscriber {
	subject: String,
	rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl SubscriberDriver for MemorySubscriber {
	async fn next(&mut self) -> Result<DriverOutput> {
		match self.rx.recv().await {
			Some(payload) => Ok(DriverOutput::Message {
				subject: self.subject.clone(),
				payload,
			}),
			None => Ok(DriverOutput::Unsubscribed),
		}
	}
}
