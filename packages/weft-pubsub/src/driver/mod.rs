use std::sync::Arc;

use anyhow::*;
use async_trait::async_trait;

pub mod memory;

pub type PubSubDriverHandle = Arc<dyn PubSubDriver>;

#[async_trait]
pub trait PubSubDriver: Send + Sync {
	async fn subscribe(&self, subject: &str) -> Result<Box<dyn SubscriberDriver>>;
	async fn publish(&self, subject: &str, payload: &[u8]) -> Result<()>;
	async fn flush(&self) -> Result<()>;
}

pub type SubscriberDriverHandle = Box<dyn SubscriberDriver>;

#[async_trait]
pub trait SubscriberDriver: Send + Sync {
	async fn next(&mut self) -> Result<crate::pubsub::DriverOutput>;
}
