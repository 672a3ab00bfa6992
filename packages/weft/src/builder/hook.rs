use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};

use crate::{
	builder::BuilderError,
	ctx::WorkflowCtx,
	error::WorkflowError,
	job::{self, Slot, SlotOp},
	protocol::HookMessage,
	utils::topic,
};

/// Spawns a dimensional thread on a live job, this job unless a target id
/// is given. `send` is fire-and-forget; `exec` synthesizes a completion
/// signal, injects it as the hook's last argument, and waits for it.
pub struct HookBuilder<'a> {
	ctx: &'a WorkflowCtx,
	workflow_name: String,
	task_queue: Option<String>,
	workflow_id: Option<String>,
	entity: Option<String>,
	arguments: Vec<Value>,
	error: Option<BuilderError>,
}

impl<'a> HookBuilder<'a> {
	pub(crate) fn new(ctx: &'a WorkflowCtx, workflow_name: String) -> Self {
		HookBuilder {
			ctx,
			workflow_name,
			task_queue: None,
			workflow_id: None,
			entity: None,
			arguments: Vec::new(),
			error: None,
		}
	}

	/// Job to re-enter. Defaults to the current job.
	pub fn workflow_id(mut self, workflow_id: impl Into<String>) -> Self {
		if self.error.is_some() {
			return self;
		}

		self.workflow_id = Some(workflow_id.into());

		self
	}

	/// Entity routing override; targets the entity's record instead of the
	/// current job.
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

	/// Dispatches the hook exactly once across replays.
	#[tracing::instrument(skip_all, fields(workflow_name = %self.workflow_name))]
	pub async fn send(self) -> Result<()> {
		if let Some(err) = self.error {
			return Err(err.into());
		}

		let index = self.ctx.take_index();
		self.dispatch(index).await
	}

	/// `send` plus a durable wait for the hook's completion signal.
	#[tracing::instrument(skip_all, fields(workflow_name = %self.workflow_name))]
	pub async fn exec<T: DeserializeOwned>(mut self) -> Result<T> {
		if let Some(err) = self.error.take() {
			return Err(err.into());
		}

		let ctx = self.ctx;
		let index = ctx.take_index();

		// The signal id derives from the hook's own execution index, so it is
		// identical on every replay
		let signal_id = format!(
			"{}{}-hook-{}",
			ctx.workflow_id(),
			ctx.dimension(),
			index
		);
		self.arguments.push(json!(signal_id));

		self.dispatch(index).await?;

		ctx.wait_for(&signal_id).await
	}

	async fn dispatch(self, index: u64) -> Result<()> {
		let ctx = self.ctx;
		let slot = job::slot_name(SlotOp::Hook, ctx.dimension(), index);

		if ctx.lookup(&slot).await?.is_some() {
			tracing::debug!(%index, "skipping replayed hook dispatch");
			return Ok(());
		}

		let task_queue = self
			.task_queue
			.clone()
			.unwrap_or_else(|| ctx.task_queue().to_string());
		let hook_topic = topic::workflow_topic(&task_queue, &self.workflow_name);

		// Infinite-loop guard: a hook that re-enters its own workflow topic
		// must name a different entity or queue explicitly
		if hook_topic == ctx.workflow_topic()
			&& self.entity.is_none()
			&& self.task_queue.is_none()
		{
			return Err(WorkflowError::HookRecursion(hook_topic).into());
		}

		let target = self
			.workflow_id
			.or(self.entity)
			.unwrap_or_else(|| ctx.workflow_id().to_string());

		let msg = HookMessage {
			workflow_id: target.clone(),
			workflow_name: self.workflow_name,
			task_queue,
			arguments: self.arguments,
			parent_dimension: ctx.dimension().to_string(),
		};

		ctx.conn()
			.pubsub()
			.publish(
				&topic::flow_signal(ctx.namespace()),
				&serde_json::to_vec(&msg)
					.map_err(|err| WorkflowError::Serialize("hook message", err))?,
			)
			.await?;

		ctx.write_marker(&slot, Slot::data(json!({ "workflow_id": target })))
			.await?;

		Ok(())
	}
}
