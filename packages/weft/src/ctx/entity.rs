use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Mutex,
	},
};

use anyhow::Result;
use serde_json::Value;

use crate::{
	ctx::WorkflowCtx,
	db::{ContextOp, ContextVerb},
	job::{self, SlotOp},
};

/// Session handle over the job's JSONB `context` document.
///
/// Every mutation consumes a session-scoped marker (`<session>.<n>` under the
/// entity op) committed atomically with the document update, so a replayed
/// invocation observes the mutation exactly once. Reads go through an
/// in-process cache that mutations invalidate.
pub struct Entity {
	ctx: WorkflowCtx,
	session: u64,
	seq: AtomicU64,
	cache: Mutex<HashMap<String, Value>>,
}

impl Entity {
	pub(crate) fn new(ctx: WorkflowCtx, session: u64) -> Self {
		Entity {
			ctx,
			session,
			seq: AtomicU64::new(0),
			cache: Mutex::new(HashMap::new()),
		}
	}

	fn next_marker(&self) -> String {
		let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

		job::slot_name(
			SlotOp::Entity,
			self.ctx.dimension(),
			format_args!("{}.{}", self.session, n),
		)
	}

	async fn mutate(&self, ops: Vec<ContextOp>) -> Result<Vec<Value>> {
		let marker = self.next_marker();
		self.cache.lock().unwrap().clear();

		// In-memory replay hit; the store also skips on marker presence, this
		// just avoids the round trip
		if let Some(slot) = self.ctx.lookup(&marker).await? {
			let results = match slot.data {
				Some(Value::Array(items)) => items,
				_ => Vec::new(),
			};

			return Ok(results);
		}

		self.ctx
			.conn()
			.store()
			.update_context(self.ctx.job_key(), &ops, Some(marker.as_str()))
			.await
	}

	/// Value at `path` (empty for the whole document). Read-through cached.
	pub async fn get(&self, path: &str) -> Result<Value> {
		if let Some(hit) = self.cache.lock().unwrap().get(path) {
			return Ok(hit.clone());
		}

		let mut results = self
			.ctx
			.conn()
			.store()
			.update_context(
				self.ctx.job_key(),
				&[ContextOp::new(ContextVerb::Get, path, None)],
				None,
			)
			.await?;
		let value = results.pop().unwrap_or(Value::Null);

		self.cache
			.lock()
			.unwrap()
			.insert(path.to_string(), value.clone());

		Ok(value)
	}

	/// Replaces the whole document.
	pub async fn set(&self, value: Value) -> Result<()> {
		self.mutate(vec![ContextOp::new(ContextVerb::Set, "", Some(value))])
			.await?;

		Ok(())
	}

	pub async fn set_at(&self, path: &str, value: Value) -> Result<()> {
		self.mutate(vec![ContextOp::new(ContextVerb::Set, path, Some(value))])
			.await?;

		Ok(())
	}

	/// Deep-merges into the document root.
	pub async fn merge(&self, value: Value) -> Result<()> {
		self.mutate(vec![ContextOp::new(ContextVerb::Merge, "", Some(value))])
			.await?;

		Ok(())
	}

	pub async fn merge_at(&self, path: &str, value: Value) -> Result<()> {
		self.mutate(vec![ContextOp::new(ContextVerb::Merge, path, Some(value))])
			.await?;

		Ok(())
	}

	pub async fn delete(&self, path: &str) -> Result<()> {
		self.mutate(vec![ContextOp::new(ContextVerb::Delete, path, None)])
			.await?;

		Ok(())
	}

	pub async fn append(&self, path: &str, value: Value) -> Result<()> {
		self.mutate(vec![ContextOp::new(ContextVerb::Append, path, Some(value))])
			.await?;

		Ok(())
	}

	pub async fn prepend(&self, path: &str, value: Value) -> Result<()> {
		self.mutate(vec![ContextOp::new(ContextVerb::Prepend, path, Some(value))])
			.await?;

		Ok(())
	}

	/// Removes the first array element equal to `value`; returns how many
	/// elements were removed.
	pub async fn remove(&self, path: &str, value: Value) -> Result<u64> {
		let results = self
			.mutate(vec![ContextOp::new(ContextVerb::Remove, path, Some(value))])
			.await?;

		Ok(results
			.first()
			.and_then(|v| v.as_u64())
			.unwrap_or_default())
	}

	/// Floating-point increment; returns the new value.
	pub async fn increment(&self, path: &str, delta: f64) -> Result<f64> {
		let results = self
			.mutate(vec![ContextOp::new(
				ContextVerb::Increment,
				path,
				Some(delta.into()),
			)])
			.await?;

		Ok(results
			.first()
			.and_then(|v| v.as_f64())
			.unwrap_or_default())
	}

	/// Boolean toggle; returns the new value.
	pub async fn toggle(&self, path: &str) -> Result<bool> {
		let results = self
			.mutate(vec![ContextOp::new(ContextVerb::Toggle, path, None)])
			.await?;

		Ok(results
			.first()
			.and_then(|v| v.as_bool())
			.unwrap_or_default())
	}

	/// Sets only when the path is absent; returns whether the write happened.
	pub async fn set_if_not_exists(&self, path: &str, value: Value) -> Result<bool> {
		let results = self
			.mutate(vec![ContextOp::new(
				ContextVerb::SetIfNotExists,
				path,
				Some(value),
			)])
			.await?;

		Ok(results
			.first()
			.and_then(|v| v.as_bool())
			.unwrap_or_default())
	}
}
