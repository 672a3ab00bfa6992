use std::{
	collections::HashMap,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
};

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::{
	builder::{
		activity::ActivityBuilder, child::ChildBuilder, hook::HookBuilder,
		interrupt::InterruptBuilder,
	},
	connection::Connection,
	ctx::{Entity, Search},
	error::WorkflowError,
	executable::Executable,
	job::{self, Slot, SlotOp},
	protocol::{ExitCode, Interruption, InterruptionPayload, ReentryMessage, SignalMessage},
	utils::{random, time::DurationToSecs, topic},
};

struct CtxInner {
	msg: ReentryMessage,
	workflow_topic: String,
	job_key: String,
	conn: Connection,
	/// Shared execution counter; every durable primitive on this dimensional
	/// thread draws its index here, including parallel branches.
	counter: AtomicU64,
	/// Replay log loaded at invocation start, plus read-through inserts when
	/// the initial load was truncated.
	replay: Mutex<HashMap<String, String>>,
	/// Interruption envelopes registered during this invocation, in index
	/// order.
	registry: Mutex<Vec<Interruption>>,
	/// Non-zero when the replay load was truncated; uncached-looking slots
	/// are then re-checked with per-field gets.
	cursor: u64,
	can_retry: bool,
}

/// Ambient context of one executor invocation. Cloneable (inner arcs) so the
/// parallel combinator can fan branches out over the same counter, replay
/// log, and interruption registry. Dropped when the invocation returns.
#[derive(Clone)]
pub struct WorkflowCtx {
	inner: Arc<CtxInner>,
}

impl WorkflowCtx {
	pub(crate) fn new(
		conn: Connection,
		msg: ReentryMessage,
		replay: HashMap<String, String>,
		cursor: u64,
	) -> Self {
		let workflow_topic = msg.workflow_topic();
		let job_key = job::key(conn.namespace(), &msg.workflow_id);
		let can_retry = msg.attempt < msg.retry.maximum_attempts;

		WorkflowCtx {
			inner: Arc::new(CtxInner {
				workflow_topic,
				job_key,
				conn,
				counter: AtomicU64::new(0),
				replay: Mutex::new(replay),
				registry: Mutex::new(Vec::new()),
				cursor,
				can_retry,
				msg,
			}),
		}
	}

	/// Draws the next execution index. Indices are 1-based and identify this
	/// call site across every replay of the job, provided user code stays
	/// deterministic.
	fn next_index(&self) -> u64 {
		self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1
	}

	fn register(&self, interruption: Interruption) {
		self.inner.registry.lock().unwrap().push(interruption);
	}

	pub(crate) fn drain_registry(&self) -> Vec<Interruption> {
		std::mem::take(&mut *self.inner.registry.lock().unwrap())
	}

	/// Replay-log lookup for a slot name. Never contacts the store unless the
	/// initial load was truncated.
	pub(crate) async fn lookup(&self, slot: &str) -> Result<Option<Slot>> {
		let cached = self.inner.replay.lock().unwrap().get(slot).cloned();
		if let Some(raw) = cached {
			return Ok(Some(Slot::decode(&raw)?));
		}

		if self.inner.cursor != 0 {
			if let Some(raw) = self
				.inner
				.conn
				.store()
				.get_field(&self.inner.job_key, slot)
				.await?
			{
				self.inner
					.replay
					.lock()
					.unwrap()
					.insert(slot.to_string(), raw.clone());

				return Ok(Some(Slot::decode(&raw)?));
			}
		}

		Ok(None)
	}

	/// Records a one-shot side-effect marker so the effect is skipped on
	/// subsequent replays.
	pub(crate) async fn write_marker(&self, slot: &str, value: Slot) -> Result<()> {
		let fields = HashMap::from([
			(slot.to_string(), value.encode()),
			(
				job::fields::UPDATED.to_string(),
				weft_util::timestamp::now().to_string(),
			),
		]);

		self.inner
			.conn
			.store()
			.set_fields(&self.inner.job_key, fields)
			.await?;

		Ok(())
	}

	pub(crate) fn interrupt_with(&self, interruption: Interruption, err: WorkflowError) -> anyhow::Error {
		self.register(interruption);

		err.into()
	}
}

impl WorkflowCtx {
	/// Durable timer. Returns the slept duration in seconds once elapsed.
	#[tracing::instrument(skip_all, fields(workflow_id = %self.workflow_id()))]
	pub async fn sleep_for(&self, duration: impl DurationToSecs) -> Result<u64> {
		let duration_secs = duration.to_secs()?;
		let index = self.next_index();
		let slot = job::slot_name(SlotOp::Sleep, self.dimension(), index);

		if let Some(slot) = self.lookup(&slot).await? {
			tracing::debug!(%index, "replaying sleep");

			return Ok(slot
				.data
				.and_then(|v| v.as_u64())
				.unwrap_or(duration_secs));
		}

		let interruption = Interruption {
			code: ExitCode::Sleep,
			index,
			dimension: self.dimension().to_string(),
			payload: InterruptionPayload::Sleep { duration_secs },
		};

		let err = self.interrupt_with(interruption, WorkflowError::Sleep { index });

		// Micro-tick so parallel siblings register before the signal escapes
		tokio::task::yield_now().await;

		Err(err)
	}

	/// Durable signal wait. Suspends until the scheduler delivers a payload
	/// for `signal_id`; always surfaces to the scheduler as a collated
	/// envelope so concurrent waits become one request.
	#[tracing::instrument(skip_all, fields(workflow_id = %self.workflow_id(), %signal_id))]
	pub async fn wait_for<T: DeserializeOwned>(&self, signal_id: &str) -> Result<T> {
		let index = self.next_index();
		let slot = job::slot_name(SlotOp::Wait, self.dimension(), index);

		if let Some(slot) = self.lookup(&slot).await? {
			tracing::debug!(%index, "replaying signal wait");

			let data = slot.data.unwrap_or(Value::Null);
			return serde_json::from_value(data)
				.map_err(|err| WorkflowError::Deserialize("signal payload", err).into());
		}

		let interruption = Interruption {
			code: ExitCode::Wait,
			index,
			dimension: self.dimension().to_string(),
			payload: InterruptionPayload::Wait {
				signal_id: signal_id.to_string(),
			},
		};

		let err = self.interrupt_with(
			interruption,
			WorkflowError::Wait {
				index,
				signal_id: signal_id.to_string(),
			},
		);

		tokio::task::yield_now().await;

		Err(err)
	}

	/// One-shot signal send. Performed exactly once across replays.
	#[tracing::instrument(skip_all, fields(workflow_id = %self.workflow_id(), %signal_id))]
	pub async fn signal(&self, signal_id: &str, data: Value) -> Result<()> {
		let index = self.next_index();
		let slot = job::slot_name(SlotOp::Publish, self.dimension(), index);

		if self.lookup(&slot).await?.is_some() {
			tracing::debug!(%index, "skipping replayed signal send");
			return Ok(());
		}

		let msg = SignalMessage {
			signal_id: signal_id.to_string(),
			data,
		};
		self.conn()
			.pubsub()
			.publish(
				&topic::signal(self.namespace()),
				&serde_json::to_vec(&msg)
					.map_err(|err| WorkflowError::Serialize("signal message", err))?,
			)
			.await?;

		self.write_marker(&slot, Slot::data(json!({ "signal_id": signal_id })))
			.await?;

		Ok(())
	}

	/// Proxied activity call builder.
	pub fn activity(&self, activity_name: impl Into<String>) -> ActivityBuilder<'_> {
		ActivityBuilder::new(self, activity_name.into())
	}

	/// Child workflow builder; `exec` awaits the result, `start` is
	/// fire-and-forget.
	pub fn child(&self, workflow_name: impl Into<String>) -> ChildBuilder<'_> {
		ChildBuilder::new(self, workflow_name.into())
	}

	/// Hook builder: re-enters a live job (this one by default) on a new
	/// dimensional thread.
	pub fn hook(&self, workflow_name: impl Into<String>) -> HookBuilder<'_> {
		HookBuilder::new(self, workflow_name.into())
	}

	/// Interruption directive builder for a running job.
	pub fn interrupt(&self, workflow_id: impl Into<String>) -> InterruptBuilder<'_> {
		InterruptBuilder::new(self, workflow_id.into())
	}

	/// Session handle over the job's JSONB document.
	pub fn entity(&self) -> Entity {
		Entity::new(self.clone(), self.next_index())
	}

	/// Session handle over the job's flat search fields.
	pub fn search(&self) -> Search {
		Search::new(self.clone(), self.next_index())
	}

	/// Sugar for `search().set(fields)`.
	pub async fn enrich(
		&self,
		fields: impl IntoIterator<Item = (String, String)>,
	) -> Result<()> {
		self.search().set(fields).await
	}

	/// Publishes `topic -> payload` entries to the pub/sub bus. With `once`,
	/// the publish happens exactly once across replays.
	#[tracing::instrument(skip_all, fields(workflow_id = %self.workflow_id()))]
	pub async fn emit(
		&self,
		events: impl IntoIterator<Item = (String, Value)>,
		once: bool,
	) -> Result<()> {
		let index = self.next_index();
		let slot = job::slot_name(SlotOp::Emit, self.dimension(), index);

		if once && self.lookup(&slot).await?.is_some() {
			tracing::debug!(%index, "skipping replayed emit");
			return Ok(());
		}

		let mut topics = Vec::new();
		for (event_topic, payload) in events {
			self.conn()
				.pubsub()
				.publish(
					&event_topic,
					&serde_json::to_vec(&payload)
						.map_err(|err| WorkflowError::Serialize("emit payload", err))?,
				)
				.await?;
			topics.push(event_topic);
		}

		if once {
			self.write_marker(&slot, Slot::data(json!(topics))).await?;
		}

		Ok(())
	}

	/// Publishes a span to the telemetry sink, once per job by default.
	#[tracing::instrument(skip_all, fields(workflow_id = %self.workflow_id()))]
	pub async fn trace(&self, span: Value, once: bool) -> Result<()> {
		let index = self.next_index();
		let slot = job::slot_name(SlotOp::Trace, self.dimension(), index);

		if once && self.lookup(&slot).await?.is_some() {
			tracing::debug!(%index, "skipping replayed trace");
			return Ok(());
		}

		self.conn()
			.pubsub()
			.publish(
				&topic::telemetry(self.namespace()),
				&serde_json::to_vec(&span)
					.map_err(|err| WorkflowError::Serialize("trace span", err))?,
			)
			.await?;

		if once {
			self.write_marker(&slot, Slot::data(Value::Null)).await?;
		}

		Ok(())
	}

	/// Deterministic unit-interval random number. Derived from the job
	/// identity and the execution counter, so replays see identical
	/// sequences without a replay slot.
	pub fn random(&self) -> f64 {
		let index = self.next_index();
		let seed = format!("{}{}", self.inner.job_key, self.dimension());

		random::deterministic(&seed, index)
	}

	/// Runs branches concurrently. Branch order fixes index assignment;
	/// branches that suspend merge into one collated request. Errors do not
	/// short circuit, so every branch registers its side effects.
	pub async fn all<T: Executable>(&self, exec: T) -> Result<T::Output> {
		exec.execute(self).await
	}
}

impl WorkflowCtx {
	pub fn workflow_id(&self) -> &str {
		&self.inner.msg.workflow_id
	}

	pub fn workflow_name(&self) -> &str {
		&self.inner.msg.workflow_name
	}

	pub fn workflow_topic(&self) -> &str {
		&self.inner.workflow_topic
	}

	pub fn task_queue(&self) -> &str {
		&self.inner.msg.task_queue
	}

	pub fn namespace(&self) -> &str {
		&self.inner.msg.namespace
	}

	/// Root job of the spawn tree; self for top-level jobs.
	pub fn origin_job_id(&self) -> Option<&str> {
		self.inner.msg.origin_job_id.as_deref()
	}

	pub fn parent_workflow_id(&self) -> Option<&str> {
		self.inner.msg.parent_workflow_id.as_deref()
	}

	pub fn expire(&self) -> Option<u64> {
		self.inner.msg.expire
	}

	/// Dimensional thread coordinate; empty on the main thread.
	pub fn dimension(&self) -> &str {
		&self.inner.msg.workflow_dimension
	}

	/// Whether the scheduler will retry this invocation if it fails.
	pub fn can_retry(&self) -> bool {
		self.inner.can_retry
	}

	/// The raw scheduler message for this re-entry.
	pub fn raw(&self) -> &ReentryMessage {
		&self.inner.msg
	}

	pub(crate) fn conn(&self) -> &Connection {
		&self.inner.conn
	}

	pub(crate) fn job_key(&self) -> &str {
		&self.inner.job_key
	}

	pub(crate) fn take_index(&self) -> u64 {
		self.next_index()
	}
}
