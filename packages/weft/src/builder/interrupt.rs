use anyhow::Result;

use crate::{
	builder::BuilderError,
	ctx::WorkflowCtx,
	error::WorkflowError,
	job::{self, Slot, SlotOp},
	protocol::InterruptMessage,
	utils::{time::DurationToSecs, topic},
};

/// Cancellation directive for a running job, honored at its next suspension
/// point. One-shot across replays.
pub struct InterruptBuilder<'a> {
	ctx: &'a WorkflowCtx,
	workflow_id: String,
	message: Option<String>,
	throw: bool,
	descend: bool,
	expire: Option<u64>,
	error: Option<BuilderError>,
}

impl<'a> InterruptBuilder<'a> {
	pub(crate) fn new(ctx: &'a WorkflowCtx, workflow_id: String) -> Self {
		InterruptBuilder {
			ctx,
			workflow_id,
			message: None,
			throw: true,
			descend: false,
			expire: None,
			error: None,
		}
	}

	pub fn message(mut self, message: impl Into<String>) -> Self {
		if self.error.is_some() {
			return self;
		}

		self.message = Some(message.into());

		self
	}

	/// When false, the target stops without recording `$error`.
	pub fn throw(mut self, throw: bool) -> Self {
		if self.error.is_some() {
			return self;
		}

		self.throw = throw;

		self
	}

	/// Cascade the interruption to the target's child jobs.
	pub fn descend(mut self, descend: bool) -> Self {
		if self.error.is_some() {
			return self;
		}

		self.descend = descend;

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

	#[tracing::instrument(skip_all, fields(target = %self.workflow_id))]
	pub async fn send(self) -> Result<()> {
		if let Some(err) = self.error {
			return Err(err.into());
		}

		let ctx = self.ctx;
		let index = ctx.take_index();
		let slot = job::slot_name(SlotOp::Publish, ctx.dimension(), index);

		if ctx.lookup(&slot).await?.is_some() {
			tracing::debug!(%index, "skipping replayed interrupt send");
			return Ok(());
		}

		let msg = InterruptMessage {
			workflow_id: self.workflow_id.clone(),
			message: self.message,
			throw: self.throw,
			descend: self.descend,
			expire: self.expire,
		};

		ctx.conn()
			.pubsub()
			.publish(
				&topic::interrupt(ctx.namespace()),
				&serde_json::to_vec(&msg)
					.map_err(|err| WorkflowError::Serialize("interrupt message", err))?,
			)
			.await?;

		ctx.write_marker(
			&slot,
			Slot::data(serde_json::json!({ "workflow_id": self.workflow_id })),
		)
		.await?;

		Ok(())
	}
}
