use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use futures_util::{future::BoxFuture, FutureExt};
use serde_json::{json, Value};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
	client,
	connection::Connection,
	error::{WireError, WorkflowError},
	executor,
	job::{self, status, Slot},
	protocol::{
		ExitCode, HookMessage, InterruptMessage, Interruption, InterruptionPayload, Outcome,
		ReentryMessage, SignalMessage, SignalWaiter,
	},
	registry::RegistryHandle,
	utils::topic,
};

struct EngineInner {
	conn: Connection,
	registry: RegistryHandle,
	/// Serializes work per job record; the scheduler contract allows at most
	/// one in-flight re-entry per (job, dimension).
	locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
	/// Durable operations dispatched but not yet slotted, keyed by
	/// (job key, slot). Keeps collated re-entries from double-dispatching.
	in_flight: Mutex<HashSet<(String, String)>>,
	tracker: TaskTracker,
	shutdown: CancellationToken,
}

/// Scheduler cooperation for the worker process: consumes execute / signal /
/// hook / interrupt messages, invokes the executor, and acts on the outcome
/// envelopes: timers, activity dispatch, child spawns, signal queueing, the
/// retry ladder, and terminal-state bookkeeping.
#[derive(Clone)]
pub(crate) struct Engine {
	inner: Arc<EngineInner>,
}

impl Engine {
	pub(crate) fn new(
		conn: Connection,
		registry: RegistryHandle,
		tracker: TaskTracker,
		shutdown: CancellationToken,
	) -> Self {
		Engine {
			inner: Arc::new(EngineInner {
				conn,
				registry,
				locks: Mutex::new(HashMap::new()),
				in_flight: Mutex::new(HashSet::new()),
				tracker,
				shutdown,
			}),
		}
	}

	fn conn(&self) -> &Connection {
		&self.inner.conn
	}

	fn namespace(&self) -> &str {
		self.inner.conn.namespace()
	}

	fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
		self.inner
			.locks
			.lock()
			.unwrap()
			.entry(key.to_string())
			.or_default()
			.clone()
	}

	fn mark_in_flight(&self, job_key: &str, slot: &str) -> bool {
		self.inner
			.in_flight
			.lock()
			.unwrap()
			.insert((job_key.to_string(), slot.to_string()))
	}

	fn clear_in_flight(&self, job_key: &str, slot: &str) {
		self.inner
			.in_flight
			.lock()
			.unwrap()
			.remove(&(job_key.to_string(), slot.to_string()));
	}

	fn clear_job(&self, job_key: &str) {
		self.inner
			.in_flight
			.lock()
			.unwrap()
			.retain(|(key, _)| key != job_key);
		self.inner.locks.lock().unwrap().remove(job_key);
	}

	async fn status(&self, job_key: &str) -> Result<Option<i64>> {
		let raw = self
			.conn()
			.store()
			.get_field(job_key, job::fields::STATUS)
			.await?;

		Ok(raw.and_then(|v| v.parse::<i64>().ok()))
	}

	pub(crate) async fn enqueue(&self, msg: &ReentryMessage) -> Result<()> {
		self.conn()
			.pubsub()
			.publish(
				&topic::execute(self.namespace()),
				&serde_json::to_vec(msg)
					.map_err(|err| WorkflowError::Serialize("re-entry message", err))?,
			)
			.await
	}

	async fn write_slot(&self, job_key: &str, slot: &str, value: Slot) -> Result<()> {
		let fields = HashMap::from([
			(slot.to_string(), value.encode()),
			(
				job::fields::UPDATED.to_string(),
				weft_util::timestamp::now().to_string(),
			),
		]);

		self.conn().store().set_fields(job_key, fields).await?;
		self.clear_in_flight(job_key, slot);

		Ok(())
	}

	async fn publish_done(&self, workflow_id: &str, job_status: i64) -> Result<()> {
		let msg = crate::protocol::DoneMessage {
			workflow_id: workflow_id.to_string(),
			status: job_status,
		};

		self.conn()
			.pubsub()
			.publish(
				&topic::done(self.namespace(), workflow_id),
				&serde_json::to_vec(&msg)
					.map_err(|err| WorkflowError::Serialize("done message", err))?,
			)
			.await
	}

	/// One re-entry: guard the terminal semaphore, run the executor, act on
	/// the outcome.
	#[tracing::instrument(skip_all, fields(
		workflow_id = %msg.workflow_id,
		dimension = %msg.workflow_dimension,
	))]
	pub(crate) async fn handle_execute(&self, msg: ReentryMessage) -> Result<()> {
		// Another worker's topic; the subject is shared
		if !self.inner.registry.contains(&msg.workflow_topic()) {
			return Ok(());
		}

		let job_key = job::key(self.namespace(), &msg.workflow_id);
		let lock = self.lock_for(&job_key);
		let _guard = lock.lock().await;

		let Some(st) = self.status(&job_key).await? else {
			tracing::warn!("re-entry for unknown job record");
			return Ok(());
		};

		if status::is_terminal(st) {
			tracing::debug!(%st, "job terminal, skipping re-entry");
			return Ok(());
		}

		let outcome = executor::execute(&self.inner.registry, self.conn(), msg.clone()).await?;

		match outcome {
			Outcome::Completed { response } => self.complete(&job_key, &msg, response).await,
			Outcome::Suspended { interruption } => {
				self.dispatch(&job_key, &msg, interruption).await
			}
			Outcome::Collated { interruptions } => {
				for interruption in interruptions {
					self.dispatch(&job_key, &msg, interruption).await?;
				}

				Ok(())
			}
			Outcome::Failed {
				code: ExitCode::Retry,
				error,
			} => self.retry(&job_key, &msg, error).await,
			Outcome::Failed { code, error } => self.fail(&job_key, &msg, code, error).await,
		}
	}

	async fn complete(&self, job_key: &str, msg: &ReentryMessage, response: Value) -> Result<()> {
		// A finished hook thread leaves the job untouched; `response` belongs
		// to the main thread
		if !msg.workflow_dimension.is_empty() {
			tracing::debug!("hook thread completed");

			let fields = HashMap::from([(
				job::fields::UPDATED.to_string(),
				weft_util::timestamp::now().to_string(),
			)]);
			return self.conn().store().set_fields(job_key, fields).await.map(|_| ());
		}

		tracing::debug!("workflow completed");

		let fields = HashMap::from([
			(
				job::fields::RESPONSE.to_string(),
				serde_json::to_string(&response)
					.map_err(|err| WorkflowError::Serialize("workflow response", err))?,
			),
			(
				job::fields::STATUS.to_string(),
				status::COMPLETED.to_string(),
			),
			(
				job::fields::UPDATED.to_string(),
				weft_util::timestamp::now().to_string(),
			),
		]);
		self.conn().store().set_fields(job_key, fields).await?;

		self.resume_parent(job_key, Slot::data(response)).await?;
		self.publish_done(&msg.workflow_id, status::COMPLETED).await?;
		self.settle_terminal(job_key).await?;

		Ok(())
	}

	async fn retry(&self, job_key: &str, msg: &ReentryMessage, error: WireError) -> Result<()> {
		let next_attempt = msg.attempt + 1;

		if next_attempt >= msg.retry.maximum_attempts {
			tracing::debug!(%error.message, "workflow retries exhausted");

			let maxed = WireError {
				message: error.message,
				code: ExitCode::Maxed as u16,
				stack: error.stack,
				job_id: None,
			};
			return self.fail(job_key, msg, ExitCode::Maxed, maxed).await;
		}

		let delay = msg.retry.delay(next_attempt);
		tracing::debug!(?delay, %next_attempt, "retrying workflow");

		let engine = self.clone();
		let mut retry_msg = msg.clone();
		retry_msg.attempt = next_attempt;

		self.inner.tracker.spawn(async move {
			tokio::select! {
				_ = engine.inner.shutdown.cancelled() => {}
				_ = tokio::time::sleep(delay) => {
					if let Err(err) = engine.enqueue(&retry_msg).await {
						tracing::error!(?err, "failed re-enqueueing retry");
					}
				}
			}
		});

		Ok(())
	}

	async fn fail(
		&self,
		job_key: &str,
		msg: &ReentryMessage,
		code: ExitCode,
		error: WireError,
	) -> Result<()> {
		tracing::debug!(%code, %error.message, "workflow failed");

		let fields = HashMap::from([
			(
				job::fields::ERROR.to_string(),
				serde_json::to_string(&error)
					.map_err(|err| WorkflowError::Serialize("job error", err))?,
			),
			(job::fields::STATUS.to_string(), status::FAILED.to_string()),
			(
				job::fields::UPDATED.to_string(),
				weft_util::timestamp::now().to_string(),
			),
		]);
		self.conn().store().set_fields(job_key, fields).await?;

		self.resume_parent(job_key, Slot::error(error)).await?;
		self.publish_done(&msg.workflow_id, status::FAILED).await?;
		self.settle_terminal(job_key).await?;

		Ok(())
	}

	/// Wakes a parent awaiting this job, if there is one, by filling the
	/// parent's child replay slot and re-enqueueing it.
	async fn resume_parent(&self, job_key: &str, slot_value: Slot) -> Result<()> {
		let names = vec![
			job::fields::PARENT_SLOT.to_string(),
			job::fields::PARENT_MESSAGE.to_string(),
		];
		let mut values = self.conn().store().get_fields(job_key, &names).await?;
		let parent_msg = values.pop().flatten();
		let parent_slot = values.pop().flatten();

		let (Some(parent_slot), Some(parent_msg)) = (parent_slot, parent_msg) else {
			return Ok(());
		};

		let parent: ReentryMessage = serde_json::from_str(&parent_msg)
			.map_err(|err| WorkflowError::Deserialize("parent re-entry", err))?;
		let parent_key = job::key(self.namespace(), &parent.workflow_id);

		tracing::debug!(parent_id = %parent.workflow_id, "resuming awaiting parent");

		self.write_slot(&parent_key, &parent_slot, slot_value).await?;
		self.enqueue(&parent).await?;

		Ok(())
	}

	/// Applies the post-terminal TTL: non-persistent records are removed
	/// after their `expire` window.
	async fn settle_terminal(&self, job_key: &str) -> Result<()> {
		self.clear_job(job_key);

		let names = vec![
			job::fields::PERSISTENT.to_string(),
			job::fields::EXPIRE.to_string(),
		];
		let mut values = self.conn().store().get_fields(job_key, &names).await?;
		let expire = values
			.pop()
			.flatten()
			.and_then(|v| v.parse::<u64>().ok());
		let persistent = values
			.pop()
			.flatten()
			.map(|v| v == "true")
			.unwrap_or(false);

		if persistent {
			return Ok(());
		}

		let Some(expire) = expire else {
			return Ok(());
		};

		let engine = self.clone();
		let job_key = job_key.to_string();

		self.inner.tracker.spawn(async move {
			tokio::select! {
				_ = engine.inner.shutdown.cancelled() => {}
				_ = tokio::time::sleep(Duration::from_secs(expire)) => {
					if let Err(err) = engine.conn().store().delete_job(&job_key).await {
						tracing::error!(?err, "failed expiring job record");
					}
				}
			}
		});

		Ok(())
	}

	/// Acts on one interruption envelope. Idempotent: already-slotted or
	/// already-dispatched operations are skipped, so a collated re-entry that
	/// re-emits pending envelopes is harmless.
	async fn dispatch(
		&self,
		job_key: &str,
		msg: &ReentryMessage,
		interruption: Interruption,
	) -> Result<()> {
		let slot = interruption.slot();

		if self
			.conn()
			.store()
			.get_field(job_key, &slot)
			.await?
			.is_some()
		{
			self.clear_in_flight(job_key, &slot);
			return Ok(());
		}

		if !self.mark_in_flight(job_key, &slot) {
			return Ok(());
		}

		match interruption.payload {
			InterruptionPayload::Sleep { duration_secs } => {
				tracing::debug!(%duration_secs, %slot, "starting durable timer");

				let engine = self.clone();
				let job_key = job_key.to_string();
				let wake = msg.reset();

				self.inner.tracker.spawn(async move {
					tokio::select! {
						_ = engine.inner.shutdown.cancelled() => {}
						_ = tokio::time::sleep(Duration::from_secs(duration_secs)) => {
							let res: Result<()> = async {
								engine
									.write_slot(&job_key, &slot, Slot::data(json!(duration_secs)))
									.await?;
								engine.enqueue(&wake).await
							}
							.await;

							if let Err(err) = res {
								tracing::error!(?err, "failed waking timer");
							}
						}
					}
				});

				Ok(())
			}
			InterruptionPayload::Wait { signal_id } => {
				self.park_waiter(
					signal_id,
					SignalWaiter {
						reentry: msg.reset(),
						slot,
					},
				)
				.await
			}
			InterruptionPayload::Proxy {
				activity_name,
				task_queue,
				arguments,
				retry,
				expire,
			} => {
				tracing::debug!(%activity_name, %task_queue, %slot, "dispatching activity");

				let activity_job = crate::protocol::ActivityJob {
					reentry: msg.reset(),
					slot,
					activity_name,
					arguments,
					retry,
					expire,
				};

				self.conn()
					.pubsub()
					.publish(
						&topic::queue(self.namespace(), &task_queue),
						&serde_json::to_vec(&activity_job)
							.map_err(|err| WorkflowError::Serialize("activity job", err))?,
					)
					.await
			}
			payload @ InterruptionPayload::Child { .. } => {
				self.spawn_child(job_key, msg, &slot, payload).await
			}
		}
	}

	async fn spawn_child(
		&self,
		job_key: &str,
		msg: &ReentryMessage,
		slot: &str,
		payload: InterruptionPayload,
	) -> Result<()> {
		let InterruptionPayload::Child {
			job_id,
			workflow_name,
			task_queue,
			arguments,
			retry,
			expire,
			persistent,
			signal_in,
			await_result,
		} = payload
		else {
			return Ok(());
		};

		tracing::debug!(child_id = %job_id, %workflow_name, "spawning child workflow");

		// Track the child for cascading interrupts
		let mut children: Vec<String> = self
			.conn()
			.store()
			.get_field(job_key, job::fields::CHILDREN)
			.await?
			.and_then(|raw| serde_json::from_str(&raw).ok())
			.unwrap_or_default();
		if !children.contains(&job_id) {
			children.push(job_id.clone());
			let fields = HashMap::from([(
				job::fields::CHILDREN.to_string(),
				json!(children).to_string(),
			)]);
			self.conn().store().set_fields(job_key, fields).await?;
		}

		let child_msg = ReentryMessage {
			workflow_id: job_id.clone(),
			workflow_name,
			task_queue,
			namespace: self.namespace().to_string(),
			arguments,
			origin_job_id: msg
				.origin_job_id
				.clone()
				.or_else(|| Some(msg.workflow_id.clone())),
			parent_workflow_id: Some(msg.workflow_id.clone()),
			workflow_dimension: String::new(),
			expire,
			persistent,
			signal_in,
			attempt: 0,
			retry,
		};

		let parent_link = await_result.then(|| client::ParentLink {
			slot: slot.to_string(),
			reentry: msg.reset(),
		});

		match client::create_job(
			self.conn(),
			client::JobSpec {
				msg: child_msg,
				search: None,
				marker: None,
				pending: false,
				parent_link,
			},
		)
		.await
		{
			Ok(()) => {}
			Err(err)
				if err
					.chain()
					.any(|c| matches!(c.downcast_ref::<WorkflowError>(), Some(WorkflowError::DuplicateJob(_)))) =>
			{
				tracing::debug!(child_id = %job_id, "child already exists");
			}
			Err(err) => return Err(err),
		}

		if !await_result {
			self.write_slot(job_key, slot, Slot::data(json!(job_id))).await?;
			self.enqueue(&msg.reset()).await?;
		}

		Ok(())
	}

	/// Parks a wait on the signal registry, or resolves it immediately from
	/// the queued-payload backlog.
	async fn park_waiter(&self, signal_id: String, waiter: SignalWaiter) -> Result<()> {
		let sig_key = job::signals_key(self.namespace());
		let lock = self.lock_for(&sig_key);
		let _guard = lock.lock().await;

		let queue_field = format!("q:{signal_id}");
		let waiters_field = format!("w:{signal_id}");

		let mut queued: Vec<Value> = self
			.conn()
			.store()
			.get_field(&sig_key, &queue_field)
			.await?
			.and_then(|raw| serde_json::from_str(&raw).ok())
			.unwrap_or_default();

		if !queued.is_empty() {
			tracing::debug!(%signal_id, "resolving wait from queued signal");

			let data = queued.remove(0);
			let fields =
				HashMap::from([(queue_field, json!(queued).to_string())]);
			self.conn().store().set_fields(&sig_key, fields).await?;

			let waiter_key = job::key(self.namespace(), &waiter.reentry.workflow_id);
			self.write_slot(&waiter_key, &waiter.slot, Slot::data(data)).await?;
			self.enqueue(&waiter.reentry).await?;

			return Ok(());
		}

		let mut waiters: Vec<SignalWaiter> = self
			.conn()
			.store()
			.get_field(&sig_key, &waiters_field)
			.await?
			.and_then(|raw| serde_json::from_str(&raw).ok())
			.unwrap_or_default();

		let duplicate = waiters.iter().any(|w| {
			w.slot == waiter.slot && w.reentry.workflow_id == waiter.reentry.workflow_id
		});
		if !duplicate {
			tracing::debug!(%signal_id, "parking signal waiter");

			waiters.push(waiter);
			let fields = HashMap::from([(
				waiters_field,
				serde_json::to_string(&waiters)
					.map_err(|err| WorkflowError::Serialize("signal waiters", err))?,
			)]);
			self.conn().store().set_fields(&sig_key, fields).await?;
		}

		Ok(())
	}

	/// Delivers a signal: wakes every parked waiter, or queues the payload
	/// until a waiter arrives.
	#[tracing::instrument(skip_all, fields(signal_id = %msg.signal_id))]
	pub(crate) async fn handle_signal(&self, msg: SignalMessage) -> Result<()> {
		let sig_key = job::signals_key(self.namespace());
		let lock = self.lock_for(&sig_key);
		let _guard = lock.lock().await;

		let waiters_field = format!("w:{}", msg.signal_id);
		let waiters: Vec<SignalWaiter> = self
			.conn()
			.store()
			.get_field(&sig_key, &waiters_field)
			.await?
			.and_then(|raw| serde_json::from_str(&raw).ok())
			.unwrap_or_default();

		if waiters.is_empty() {
			tracing::debug!("no waiters, queueing signal");

			let queue_field = format!("q:{}", msg.signal_id);
			let mut queued: Vec<Value> = self
				.conn()
				.store()
				.get_field(&sig_key, &queue_field)
				.await?
				.and_then(|raw| serde_json::from_str(&raw).ok())
				.unwrap_or_default();
			queued.push(msg.data);

			let fields = HashMap::from([(queue_field, json!(queued).to_string())]);
			self.conn().store().set_fields(&sig_key, fields).await?;

			return Ok(());
		}

		tracing::debug!(count = waiters.len(), "waking signal waiters");

		let fields = HashMap::from([(waiters_field, "[]".to_string())]);
		self.conn().store().set_fields(&sig_key, fields).await?;

		for waiter in waiters {
			let waiter_key = job::key(self.namespace(), &waiter.reentry.workflow_id);
			self.write_slot(&waiter_key, &waiter.slot, Slot::data(msg.data.clone()))
				.await?;
			self.enqueue(&waiter.reentry).await?;
		}

		Ok(())
	}

	/// Re-enters a live job on a freshly allocated dimensional thread.
	#[tracing::instrument(skip_all, fields(workflow_id = %msg.workflow_id, workflow_name = %msg.workflow_name))]
	pub(crate) async fn handle_hook(&self, msg: HookMessage) -> Result<()> {
		let job_key = job::key(self.namespace(), &msg.workflow_id);
		let lock = self.lock_for(&job_key);
		let _guard = lock.lock().await;

		let Some(st) = self.status(&job_key).await? else {
			tracing::warn!("hook for unknown job record");
			return Ok(());
		};

		if status::is_terminal(st) {
			tracing::debug!("hook for terminal job, dropping");
			return Ok(());
		}

		let names = vec![
			job::fields::SIGNAL_IN.to_string(),
			job::fields::PENDING.to_string(),
			job::fields::MESSAGE.to_string(),
		];
		let mut values = self.conn().store().get_fields(&job_key, &names).await?;
		let main_msg = values.pop().flatten();
		let pending = values.pop().flatten();
		let signal_in = values.pop().flatten();

		if signal_in.as_deref() == Some("false") {
			tracing::warn!("hook for job with signals disabled, dropping");
			return Ok(());
		}

		// A deferred job dispatches its main thread on first inbound contact
		if pending.is_some() {
			self.conn()
				.store()
				.delete_fields(&job_key, &[job::fields::PENDING.to_string()])
				.await?;

			if let Some(raw) = &main_msg {
				let main: ReentryMessage = serde_json::from_str(raw)
					.map_err(|err| WorkflowError::Deserialize("main re-entry", err))?;
				self.enqueue(&main).await?;
			}
		}

		// Allocate the next dimensional coordinate under this parent thread
		let allocated = self
			.conn()
			.store()
			.increment_field_by_float(&job_key, job::fields::HOOKS, 1.0)
			.await?;
		let dimension = format!("{},{}", msg.parent_dimension, (allocated as u64).saturating_sub(1));

		// Inherit job-level settings from the stored main message
		let main = main_msg
			.as_deref()
			.and_then(|raw| serde_json::from_str::<ReentryMessage>(raw).ok());

		let reentry = ReentryMessage {
			workflow_id: msg.workflow_id,
			workflow_name: msg.workflow_name,
			task_queue: msg.task_queue,
			namespace: self.namespace().to_string(),
			arguments: msg.arguments,
			origin_job_id: main.as_ref().and_then(|m| m.origin_job_id.clone()),
			parent_workflow_id: main.as_ref().and_then(|m| m.parent_workflow_id.clone()),
			workflow_dimension: dimension,
			expire: main.as_ref().and_then(|m| m.expire),
			persistent: main.as_ref().map(|m| m.persistent).unwrap_or(false),
			signal_in: main.as_ref().map(|m| m.signal_in).unwrap_or(true),
			attempt: 0,
			retry: main.map(|m| m.retry).unwrap_or_default(),
		};

		self.enqueue(&reentry).await
	}

	/// Stops a job at its next suspension point and optionally cascades to
	/// its children.
	pub(crate) fn handle_interrupt(
		&self,
		msg: InterruptMessage,
	) -> BoxFuture<'_, Result<()>> {
		async move {
			let job_key = job::key(self.namespace(), &msg.workflow_id);
			let lock = self.lock_for(&job_key);
			let _guard = lock.lock().await;

			let Some(st) = self.status(&job_key).await? else {
				tracing::warn!(workflow_id = %msg.workflow_id, "interrupt for unknown job");
				return Ok(());
			};

			if status::is_terminal(st) {
				tracing::debug!(workflow_id = %msg.workflow_id, "interrupt for terminal job");
				return Ok(());
			}

			tracing::debug!(workflow_id = %msg.workflow_id, descend = msg.descend, "interrupting job");

			let error = WireError::interrupted(
				msg.workflow_id.clone(),
				msg.message.clone().unwrap_or_else(|| "interrupted".to_string()),
			);

			let mut fields = HashMap::from([
				(
					job::fields::STATUS.to_string(),
					status::INTERRUPTED.to_string(),
				),
				(
					job::fields::UPDATED.to_string(),
					weft_util::timestamp::now().to_string(),
				),
			]);
			if msg.throw {
				fields.insert(
					job::fields::ERROR.to_string(),
					serde_json::to_string(&error)
						.map_err(|err| WorkflowError::Serialize("job error", err))?,
				);
			}
			if let Some(expire) = msg.expire {
				fields.insert(job::fields::EXPIRE.to_string(), expire.to_string());
			}
			self.conn().store().set_fields(&job_key, fields).await?;

			self.resume_parent(&job_key, Slot::error(error)).await?;
			self.publish_done(&msg.workflow_id, status::INTERRUPTED).await?;

			let children: Vec<String> = self
				.conn()
				.store()
				.get_field(&job_key, job::fields::CHILDREN)
				.await?
				.and_then(|raw| serde_json::from_str(&raw).ok())
				.unwrap_or_default();

			self.settle_terminal(&job_key).await?;
			drop(_guard);

			if msg.descend {
				for child in children {
					self.handle_interrupt(InterruptMessage {
						workflow_id: child,
						message: msg.message.clone(),
						throw: msg.throw,
						descend: true,
						expire: msg.expire,
					})
					.await?;
				}
			}

			Ok(())
		}
		.boxed()
	}
}
