use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
	builder::BuilderError,
	ctx::WorkflowCtx,
	error::WorkflowError,
	job::{self, SlotOp},
	protocol::{ExitCode, Interruption, InterruptionPayload, RetryPolicy},
	utils::{time::DurationToSecs, topic},
};

/// Proxied activity call. Routes to `<task-queue>-activity` unless an
/// explicit queue is set.
pub struct ActivityBuilder<'a> {
	ctx: &'a WorkflowCtx,
	activity_name: String,
	arguments: Vec<Value>,
	task_queue: Option<String>,
	retry: RetryPolicy,
	expire: Option<u64>,
	error: Option<BuilderError>,
}

impl<'a> ActivityBuilder<'a> {
	pub(crate) fn new(ctx: &'a WorkflowCtx, activity_name: String) -> Self {
		ActivityBuilder {
			ctx,
			activity_name,
			arguments: Vec::new(),
			task_queue: None,
			retry: RetryPolicy::default(),
			expire: None,
			error: None,
		}
	}

	pub fn arg(mut self, arg: impl Serialize) -> Self {
		if self.error.is_some() {
			return self;
		}

		match serde_json::to_value(&arg) {
			Ok(v) => self.arguments.push(v),
			Err(err) => self.error = Some(err.into()),
		}

		self
	}

	pub fn args(mut self, args: Vec<Value>) -> Self {
		if self.error.is_some() {
			return self;
		}

		self.arguments.extend(args);

		self
	}

	pub fn task_queue(mut self, task_queue: impl Into<String>) -> Self {
		if self.error.is_some() {
			return self;
		}

		self.task_queue = Some(task_queue.into());

		self
	}

	pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
		if self.error.is_some() {
			return self;
		}

		// Preserve an earlier throw_on_error override
		let throw_on_error = self.retry.throw_on_error && retry.throw_on_error;
		self.retry = retry;
		self.retry.throw_on_error = throw_on_error;

		self
	}

	/// When false, a cached activity error is returned as the call's value
	/// instead of raised.
	pub fn throw_on_error(mut self, throw_on_error: bool) -> Self {
		if self.error.is_some() {
			return self;
		}

		self.retry.throw_on_error = throw_on_error;

		self
	}

	/// Per-attempt deadline for the activity job.
	pub fn expire(mut self, expire: impl DurationToSecs) -> Self {
		if self.error.is_some() {
			return self;
		}

		match expire.to_secs() {
			Ok(secs) => self.expire = Some(secs),
			Err(err) => self.error = Some(BuilderError::InvalidDuration(err)),
		}

		self
	}

	/// Replays the cached result, or suspends the workflow until the
	/// scheduler has executed the activity.
	#[tracing::instrument(skip_all, fields(activity_name = %self.activity_name))]
	pub async fn call<T: DeserializeOwned>(self) -> Result<T> {
		if let Some(err) = self.error {
			return Err(err.into());
		}

		let ctx = self.ctx;
		let index = ctx.take_index();
		let slot = job::slot_name(SlotOp::Proxy, ctx.dimension(), index);

		if let Some(slot) = ctx.lookup(&slot).await? {
			tracing::debug!(%index, "replaying activity");

			if let Some(wire) = slot.error {
				if self.retry.throw_on_error {
					return Err(WorkflowError::from_wire(wire).into());
				}

				// Error-as-value path
				let raw = serde_json::to_value(&wire)
					.map_err(|err| WorkflowError::Serialize("activity error", err))?;
				return serde_json::from_value(raw)
					.map_err(|err| WorkflowError::Deserialize("activity error", err).into());
			}

			let data = slot.data.unwrap_or(Value::Null);
			return serde_json::from_value(data)
				.map_err(|err| WorkflowError::Deserialize("activity result", err).into());
		}

		let task_queue = self
			.task_queue
			.unwrap_or_else(|| topic::activity_topic(ctx.task_queue()));

		let interruption = Interruption {
			code: ExitCode::Proxy,
			index,
			dimension: ctx.dimension().to_string(),
			payload: InterruptionPayload::Proxy {
				activity_name: self.activity_name.clone(),
				task_queue,
				arguments: self.arguments,
				retry: self.retry,
				expire: self.expire,
			},
		};

		let err = ctx.interrupt_with(
			interruption,
			WorkflowError::Proxy {
				index,
				activity: self.activity_name,
			},
		);

		// Micro-tick so parallel siblings register before the signal escapes
		tokio::task::yield_now().await;

		Err(err)
	}
}
