use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Mutex,
	},
};

use anyhow::Result;
use serde_json::json;

use crate::{
	ctx::WorkflowCtx,
	error::WorkflowError,
	job::{self, Slot, SlotOp},
};

/// Session handle over the job's flat search fields.
///
/// User keys are underscore-prefixed on the record so they cannot collide
/// with reserved fields; a `"quoted"` key bypasses the prefix for direct
/// field access. Mutations consume session markers like the entity handle's.
pub struct Search {
	ctx: WorkflowCtx,
	session: u64,
	seq: AtomicU64,
	cache: Mutex<HashMap<String, Option<String>>>,
}

impl Search {
	pub(crate) fn new(ctx: WorkflowCtx, session: u64) -> Self {
		Search {
			ctx,
			session,
			seq: AtomicU64::new(0),
			cache: Mutex::new(HashMap::new()),
		}
	}

	/// Record field name for a user key.
	pub fn field(key: &str) -> String {
		if let Some(raw) = key
			.strip_prefix('"')
			.and_then(|rest| rest.strip_suffix('"'))
		{
			raw.to_string()
		} else {
			format!("{}{}", job::fields::SEARCH_PREFIX, key)
		}
	}

	fn next_marker(&self) -> String {
		let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;

		job::slot_name(
			SlotOp::Search,
			self.ctx.dimension(),
			format_args!("{}.{}", self.session, n),
		)
	}

	/// Read-through cached get of one field.
	pub async fn get(&self, key: &str) -> Result<Option<String>> {
		let field = Search::field(key);

		if let Some(hit) = self.cache.lock().unwrap().get(&field) {
			return Ok(hit.clone());
		}

		let value = self
			.ctx
			.conn()
			.store()
			.get_field(self.ctx.job_key(), &field)
			.await?;

		self.cache
			.lock()
			.unwrap()
			.insert(field, value.clone());

		Ok(value)
	}

	pub async fn mget(&self, keys: &[&str]) -> Result<Vec<Option<String>>> {
		let fields = keys.iter().map(|k| Search::field(k)).collect::<Vec<_>>();
		let values = self
			.ctx
			.conn()
			.store()
			.get_fields(self.ctx.job_key(), &fields)
			.await?;

		let mut cache = self.cache.lock().unwrap();
		for (field, value) in fields.iter().zip(&values) {
			cache.insert(field.clone(), value.clone());
		}

		Ok(values)
	}

	/// Sets fields. The marker rides in the same multi-field write, so the
	/// mutation and its idempotency record commit together.
	pub async fn set(&self, fields: impl IntoIterator<Item = (String, String)>) -> Result<()> {
		let marker = self.next_marker();
		let encoded = fields
			.into_iter()
			.map(|(k, v)| (Search::field(&k), v))
			.collect::<HashMap<_, _>>();

		{
			let mut cache = self.cache.lock().unwrap();
			for field in encoded.keys() {
				cache.remove(field);
			}
		}

		if self.ctx.lookup(&marker).await?.is_some() {
			return Ok(());
		}

		let mut write = encoded;
		write.insert(marker, Slot::data(json!(null)).encode());
		write.insert(
			job::fields::UPDATED.to_string(),
			weft_util::timestamp::now().to_string(),
		);

		self.ctx
			.conn()
			.store()
			.set_fields(self.ctx.job_key(), write)
			.await?;

		Ok(())
	}

	/// Deletes fields; returns how many existed.
	pub async fn del(&self, keys: &[&str]) -> Result<u64> {
		let marker = self.next_marker();
		let fields = keys.iter().map(|k| Search::field(k)).collect::<Vec<_>>();

		{
			let mut cache = self.cache.lock().unwrap();
			for field in &fields {
				cache.remove(field);
			}
		}

		if let Some(slot) = self.ctx.lookup(&marker).await? {
			return Ok(slot.data.and_then(|v| v.as_u64()).unwrap_or_default());
		}

		let count = self
			.ctx
			.conn()
			.store()
			.delete_fields(self.ctx.job_key(), &fields)
			.await? as u64;

		self.ctx
			.write_marker(&marker, Slot::data(json!(count)))
			.await?;

		Ok(count)
	}

	/// Floating-point increment; returns the accumulated value. The marker
	/// caches the post-increment total so replays converge.
	pub async fn incr(&self, key: &str, delta: f64) -> Result<f64> {
		let marker = self.next_marker();
		let field = Search::field(key);

		self.cache.lock().unwrap().remove(&field);

		if let Some(slot) = self.ctx.lookup(&marker).await? {
			return Ok(slot.data.and_then(|v| v.as_f64()).unwrap_or_default());
		}

		let total = self
			.ctx
			.conn()
			.store()
			.increment_field_by_float(self.ctx.job_key(), &field, delta)
			.await?;

		self.ctx
			.write_marker(&marker, Slot::data(json!(total)))
			.await?;

		Ok(total)
	}

	/// Multiplicative accumulation in the log domain: the field stores
	/// `ln(product)` so repeated factors compose through float increments;
	/// the returned value is the product itself.
	pub async fn mult(&self, key: &str, factor: f64) -> Result<f64> {
		if factor <= 0.0 {
			return Err(WorkflowError::InvalidArgument("mult factor must be positive").into());
		}

		let marker = self.next_marker();
		let field = Search::field(key);

		self.cache.lock().unwrap().remove(&field);

		if let Some(slot) = self.ctx.lookup(&marker).await? {
			return Ok(slot.data.and_then(|v| v.as_f64()).unwrap_or_default());
		}

		let log_sum = self
			.ctx
			.conn()
			.store()
			.increment_field_by_float(self.ctx.job_key(), &field, factor.ln())
			.await?;
		let product = log_sum.exp();

		self.ctx
			.write_marker(&marker, Slot::data(json!(product)))
			.await?;

		Ok(product)
	}
}
