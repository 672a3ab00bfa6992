use std::ops::Deref;
use std::sync::Arc;

use anyhow::*;

use weft_util::backoff::Backoff;

use crate::driver::{PubSubDriverHandle, SubscriberDriverHandle};

pub struct PubSubInner {
	driver: PubSubDriverHandle,
}

#[derive(Clone)]
pub struct PubSub(Arc<PubSubInner>);

impl Deref for PubSub {
	type Target = PubSubInner;

	fn deref(&self) -> &Self::Target {
		&self.0
	}
}

impl PubSub {
	pub fn new(driver: PubSubDriverHandle) -> Self {
		Self(Arc::new(PubSubInner { driver }))
	}

	pub async fn subscribe(&self, subject: &str) -> Result<Subscriber> {
		let driver = self.driver.subscribe(subject).await?;

		Ok(Subscriber { driver })
	}

	/// Fire-and-forget publish. Transient driver errors are retried with
	/// backoff before giving up.
	pub async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()> {
		let mut backoff = Backoff::default();
		loop {
			match self.driver.publish(subject, payload).await {
				Result::Ok(_) => break,
				Err(err) if !backoff.tick().await => {
					tracing::warn!(?err, %subject, "error publishing, cannot retry again");
					return Err(err);
				}
				Err(err) => {
					tracing::debug!(?err, %subject, "error publishing, retrying");
				}
			}
		}

		Ok(())
	}

	pub async fn flush(&self) -> Result<()> {
		self.driver.flush().await
	}
}

pub struct Subscriber {
	driver: SubscriberDriverHandle,
}

impl Subscriber {
	pub async fn next(&mut self) -> Result<NextOutput> {
		match self.driver.next().await? {
			DriverOutput::Message { subject, payload } => {
				Ok(NextOutput::Message(Message { subject, payload }))
			}
			DriverOutput::Unsubscribed => Ok(NextOutput::Unsubscribed),
		}
	}
}

// Output from drivers (raw binary messages)
pub enum DriverOutput {
	Message { subject: String, payload: Vec<u8> },
	Unsubscribed,
}

// Output from subscriber
pub enum NextOutput {
	Message(Message),
	Unsubscribed,
}

pub struct Message {
	pub subject: String,
	pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
	use std::sync::Arc;

	use super::*;
	use crate::driver::memory::MemoryDriver;

	#[tokio::test]
	async fn delivers_to_all_subscribers() {
		let pubsub = PubSub::new(Arc::new(MemoryDriver::new()));

		let mut sub_a = pubsub.subscribe("test.subject").await.unwrap();
		let mut sub_b = pubsub.subscribe("test.subject").await.unwrap();

		pubsub.publish("test.subject", b"hello").await.unwrap();

		for sub in [&mut sub_a, &mut sub_b] {
			match sub.next().await.unwrap() {
				NextOutput::Message(msg) => assert_eq!(msg.payload, b"hello"),
				NextOutput::Unsubscribed => panic!("unexpected unsubscribe"),
			}
		}
	}

	#[tokio::test]
	async fn ignores_subjects_without_subscribers() {
		let pubsub = PubSub::new(Arc::new(MemoryDriver::new()));

		pubsub.publish("nobody.home", b"x").await.unwrap();

		let mut sub = pubsub.subscribe("nobody.home").await.unwrap();
		pubsub.publish("nobody.home", b"y").await.unwrap();

		match sub.next().await.unwrap() {
			NextOutput::Message(msg) => assert_eq!(msg.payload, b"y"),
			NextOutput::Unsubscribed => panic!("unexpected unsubscribe"),
		}
	}
}
