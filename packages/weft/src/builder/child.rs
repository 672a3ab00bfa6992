use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
	builder::BuilderError,
	ctx::WorkflowCtx,
	error::WorkflowError,
	protocol::{ExitCode, Interruption, InterruptionPayload, RetryPolicy},
	utils::time::DurationToSecs,
};

/// Child workflow spawn. `exec` suspends until the child completes and
/// replays its return value; `start` replays the child's job id without
/// waiting.
pub struct ChildBuilder<'a> {
	ctx: &'a WorkflowCtx,
	workflow_name: String,
	task_queue: Option<String>,
	workflow_id: Option<String>,
	entity: Option<String>,
	arguments: Vec<Value>,
	retry: RetryPolicy,
	expire: Option<u64>,
	persistent: bool,
	signal_in: bool,
	error: Option<BuilderError>,
}

impl<'a> ChildBuilder<'a> {
	pub(crate) fn new(ctx: &'a WorkflowCtx, workflow_name: String) -> Self {
		ChildBuilder {
			ctx,
			workflow_name,
			task_queue: None,
			workflow_id: None,
			entity: None,
			arguments: Vec::new(),
			retry: RetryPolicy::default(),
			expire: None,
			persistent: false,
			signal_in: true,
			error: None,
		}
	}

	/// Explicit child job id; takes precedence over the derived id.
	pub fn workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
		if self.error.is_some() {
			return self;
		}

		self.workflow_id = Some(workflow_id.into());

		self
	}

	/// Entity name folded into the derived child job id.
	pub fn entity(mut self, entity: impl Into<String>) -> Self {
		if self.error.is_some() {
			return self;
		}

		self.entity = Some(entity.into());

		self
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

		self.retry = retry;

		self
	}

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

	pub fn persistent(mut self, persistent: bool) -> Self {
		if self.error.is_some() {
			return self;
		}

		self.persistent = persistent;

		self
	}

	pub fn signal_in(mut self, signal_in: bool) -> Self {
		if self.error.is_some() {
			return self;
		}

		self.signal_in = signal_in;

		self
	}

	/// Spawns the child and suspends until it completes. Cached child errors
	/// re-raise as their typed kind.
	#[tracing::instrument(skip_all, fields(workflow_name = %self.workflow_name))]
	pub async fn exec<T: DeserializeOwned>(self) -> Result<T> {
		let slot = self.run(true).await?;

		let data = slot.unwrap_or(Value::Null);
		serde_json::from_value(data)
			.map_err(|err| WorkflowError::Deserialize("child result", err).into())
	}

	/// Spawns the child without waiting; returns its job id.
	#[tracing::instrument(skip_all, fields(workflow_name = %self.workflow_name))]
	pub async fn start(self) -> Result<String> {
		let slot = self.run(false).await?;

		match slot {
			Some(Value::String(job_id)) => Ok(job_id),
			other => Err(WorkflowError::ReplayDiverged(format!(
				"child spawn slot holds {other:?} instead of a job id"
			))
			.into()),
		}
	}

	async fn run(self, await_result: bool) -> Result<Option<Value>> {
		if let Some(err) = self.error {
			return Err(err.into());
		}

		let ctx = self.ctx;
		let index = ctx.take_index();
		let op = if await_result {
			crate::job::SlotOp::Child
		} else {
			crate::job::SlotOp::Start
		};
		let slot = crate::job::slot_name(op, ctx.dimension(), index);

		if let Some(slot) = ctx.lookup(&slot).await? {
			tracing::debug!(%index, "replaying child spawn");

			if let Some(wire) = slot.error {
				return Err(WorkflowError::from_wire(wire).into());
			}

			return Ok(slot.data);
		}

		let task_queue = self
			.task_queue
			.unwrap_or_else(|| ctx.task_queue().to_string());

		// Derived ids fold in the dimension and index, so a retried
		// invocation re-derives the same id and job creation stays
		// idempotent.
		let job_id = self.workflow_id.clone().unwrap_or_else(|| {
			let entity = self.entity.as_deref().unwrap_or(&self.workflow_name);
			format!(
				"{}-{}{}-{}",
				ctx.workflow_id(),
				entity,
				ctx.dimension(),
				index
			)
		});

		let interruption = Interruption {
			code: ExitCode::Child,
			index,
			dimension: ctx.dimension().to_string(),
			payload: InterruptionPayload::Child {
				job_id,
				workflow_name: self.workflow_name.clone(),
				task_queue,
				arguments: self.arguments,
				retry: self.retry,
				expire: self.expire,
				persistent: self.persistent,
				signal_in: self.signal_in,
				await_result,
			},
		};

		let err = ctx.interrupt_with(interruption, WorkflowError::Child { index });

		tokio::task::yield_now().await;

		Err(err)
	}
}
