use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures_util::FutureExt;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use weft_pubsub::{NextOutput, Subscriber};

use crate::{
	connection::Connection,
	ctx::ActivityCtx,
	engine::Engine,
	error::{classify, WireError},
	interceptor::{self, ActivityFn},
	job::{self, Slot},
	protocol::{
		ActivityJob, ExitCode, HookMessage, InterruptMessage, ReentryMessage, SignalMessage,
	},
	registry::Registry,
	utils::topic,
};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// Workflow-pool worker: registers workflow functions on a task queue,
/// consumes the namespace's execute / signal / hook / interrupt subjects, and
/// drives the dispatch engine.
pub struct Worker {
	conn: Connection,
	task_queue: String,
	registry: Registry,
}

impl Worker {
	pub fn new(conn: Connection, task_queue: impl Into<String>) -> Self {
		Worker {
			conn,
			task_queue: task_queue.into(),
			registry: Registry::new(),
		}
	}

	pub fn task_queue(&self) -> &str {
		&self.task_queue
	}

	pub fn register_workflow<F, Fut>(&mut self, workflow_name: &str, workflow: F)
	where
		F: Fn(crate::ctx::WorkflowCtx, Vec<Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value>> + Send + 'static,
	{
		self.registry
			.register_workflow(&self.task_queue, workflow_name, workflow);
	}

	/// Subscribes to the namespace subjects and starts the poll loops. All
	/// subscriptions are established before this returns, so no dispatch
	/// published afterwards is missed.
	#[tracing::instrument(skip_all, fields(task_queue = %self.task_queue))]
	pub async fn start(self) -> Result<WorkerHandle> {
		tracing::debug!(registered_workflows = self.registry.size(), "starting worker");

		let tracker = TaskTracker::new();
		let shutdown = CancellationToken::new();
		let registry = Arc::new(self.registry);
		let engine = Engine::new(
			self.conn.clone(),
			registry,
			tracker.clone(),
			shutdown.clone(),
		);

		let ns = self.conn.namespace();
		let execute_sub = self.conn.pubsub().subscribe(&topic::execute(ns)).await?;
		let signal_sub = self.conn.pubsub().subscribe(&topic::signal(ns)).await?;
		let flow_sub = self.conn.pubsub().subscribe(&topic::flow_signal(ns)).await?;
		let interrupt_sub = self.conn.pubsub().subscribe(&topic::interrupt(ns)).await?;

		{
			let engine = engine.clone();
			spawn_loop(&tracker, &shutdown, execute_sub, "execute", move |msg: ReentryMessage| {
				let engine = engine.clone();
				async move { engine.handle_execute(msg).await }
			});
		}
		{
			let engine = engine.clone();
			spawn_loop(&tracker, &shutdown, signal_sub, "signal", move |msg: SignalMessage| {
				let engine = engine.clone();
				async move { engine.handle_signal(msg).await }
			});
		}
		{
			let engine = engine.clone();
			spawn_loop(&tracker, &shutdown, flow_sub, "hook", move |msg: HookMessage| {
				let engine = engine.clone();
				async move { engine.handle_hook(msg).await }
			});
		}
		{
			let engine = engine.clone();
			spawn_loop(
				&tracker,
				&shutdown,
				interrupt_sub,
				"interrupt",
				move |msg: InterruptMessage| {
					let engine = engine.clone();
					async move { engine.handle_interrupt(msg).await }
				},
			);
		}

		Ok(WorkerHandle { tracker, shutdown })
	}
}

/// `Worker` construction sugar for the single-workflow case.
pub fn create_worker<F, Fut>(
	conn: Connection,
	task_queue: &str,
	workflow_name: &str,
	workflow: F,
) -> Worker
where
	F: Fn(crate::ctx::WorkflowCtx, Vec<Value>) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<Value>> + Send + 'static,
{
	let mut worker = Worker::new(conn, task_queue);
	worker.register_workflow(workflow_name, workflow);

	worker
}

/// Activity-pool worker bound to one task-queue subject.
pub struct ActivityWorker {
	conn: Connection,
	queue_topic: String,
	activities: HashMap<String, ActivityFn>,
}

impl ActivityWorker {
	/// Serves the derived activity topic of a workflow task queue.
	pub fn new(conn: Connection, task_queue: &str) -> Self {
		ActivityWorker::for_topic(conn, topic::activity_topic(task_queue))
	}

	/// Serves an explicitly named queue topic.
	pub fn for_topic(conn: Connection, queue_topic: impl Into<String>) -> Self {
		ActivityWorker {
			conn,
			queue_topic: queue_topic.into(),
			activities: HashMap::new(),
		}
	}

	pub fn register_activity<F, Fut>(&mut self, activity_name: &str, activity: F)
	where
		F: Fn(ActivityCtx, Vec<Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value>> + Send + 'static,
	{
		self.activities.insert(
			activity_name.to_string(),
			Arc::new(move |ctx, args| activity(ctx, args).boxed()),
		);
	}

	#[tracing::instrument(skip_all, fields(queue_topic = %self.queue_topic))]
	pub async fn start(self) -> Result<WorkerHandle> {
		tracing::debug!(
			registered_activities = self.activities.len(),
			"starting activity worker"
		);

		let tracker = TaskTracker::new();
		let shutdown = CancellationToken::new();

		let sub = self
			.conn
			.pubsub()
			.subscribe(&topic::queue(self.conn.namespace(), &self.queue_topic))
			.await?;

		let pool = Arc::new(ActivityPool {
			conn: self.conn,
			queue_topic: self.queue_topic,
			activities: self.activities,
		});

		spawn_loop(&tracker, &shutdown, sub, "activity", move |msg: ActivityJob| {
			let pool = pool.clone();
			async move { pool.run(msg).await }
		});

		Ok(WorkerHandle { tracker, shutdown })
	}
}

/// `ActivityWorker` construction from a prepared registration map.
pub fn register_activity_worker(
	conn: Connection,
	task_queue: &str,
	activities: HashMap<String, ActivityFn>,
) -> ActivityWorker {
	let mut worker = ActivityWorker::new(conn, task_queue);
	worker.activities = activities;

	worker
}

/// Running worker; dropping it leaves the loops running, `shutdown` drains
/// them.
pub struct WorkerHandle {
	tracker: TaskTracker,
	shutdown: CancellationToken,
}

impl WorkerHandle {
	/// Stops the poll loops and waits for in-flight work to drain.
	pub async fn shutdown(self) {
		tracing::debug!("worker shutting down");

		self.shutdown.cancel();
		self.tracker.close();

		if tokio::time::timeout(SHUTDOWN_GRACE, self.tracker.wait())
			.await
			.is_err()
		{
			tracing::warn!("worker shutdown timed out");
		}
	}
}

struct ActivityPool {
	conn: Connection,
	queue_topic: String,
	activities: HashMap<String, ActivityFn>,
}

impl ActivityPool {
	/// Runs one activity job through the interceptor ring and the per-job
	/// retry policy, writes the replay slot, and wakes the workflow.
	#[tracing::instrument(skip_all, fields(
		workflow_id = %job.reentry.workflow_id,
		activity_name = %job.activity_name,
	))]
	async fn run(&self, job: ActivityJob) -> Result<()> {
		let Some(activity) = self.activities.get(&job.activity_name) else {
			tracing::error!("activity not registered");

			let wire = WireError::new(
				format!(
					"no activity {} registered on queue {}",
					job.activity_name, self.queue_topic
				),
				ExitCode::Fatal,
			);
			return self.finish(&job, Slot::error(wire)).await;
		};

		let onion = interceptor::compose_activity(activity.clone());
		let workflow_topic = job.reentry.workflow_topic();
		let mut attempt: u32 = 0;

		loop {
			let ctx = ActivityCtx::new(
				self.conn.clone(),
				job.reentry.workflow_id.clone(),
				job.reentry.workflow_name.clone(),
				workflow_topic.clone(),
				job.activity_name.clone(),
				attempt,
			);

			let fut = (onion)(ctx, job.arguments.clone());
			let res = match job.expire {
				Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), fut).await {
					Ok(inner) => inner,
					Err(_) => {
						tracing::debug!("activity deadline exceeded");

						let wire = WireError::new(
							format!("activity {} exceeded its deadline", job.activity_name),
							ExitCode::Timeout,
						);
						return self.finish(&job, Slot::error(wire)).await;
					}
				},
				None => fut.await,
			};

			match res {
				Ok(value) => {
					tracing::debug!("activity succeeded");

					return self.finish(&job, Slot::data(value)).await;
				}
				Err(err) => {
					let (code, wire) = classify(&err);

					match code {
						ExitCode::Fatal | ExitCode::Timeout | ExitCode::Maxed => {
							tracing::debug!(%code, "activity failed terminally");

							return self.finish(&job, Slot::error(wire)).await;
						}
						_ => {
							attempt += 1;

							if attempt >= job.retry.maximum_attempts {
								tracing::debug!("activity retries exhausted");

								let maxed = WireError {
									message: wire.message,
									code: ExitCode::Maxed as u16,
									stack: wire.stack,
									job_id: None,
								};
								return self.finish(&job, Slot::error(maxed)).await;
							}

							let delay = job.retry.delay(attempt);
							tracing::debug!(?delay, %attempt, "retrying activity");

							tokio::time::sleep(delay).await;
						}
					}
				}
			}
		}
	}

	/// Writes the replay slot and re-enqueues the owning workflow.
	async fn finish(&self, job: &ActivityJob, slot_value: Slot) -> Result<()> {
		let job_key = job::key(self.conn.namespace(), &job.reentry.workflow_id);

		let fields = HashMap::from([
			(job.slot.clone(), slot_value.encode()),
			(
				job::fields::UPDATED.to_string(),
				weft_util::timestamp::now().to_string(),
			),
		]);
		self.conn.store().set_fields(&job_key, fields).await?;

		self.conn
			.pubsub()
			.publish(
				&topic::execute(self.conn.namespace()),
				&serde_json::to_vec(&job.reentry)
					.map_err(|err| crate::error::WorkflowError::Serialize("re-entry message", err))?,
			)
			.await
	}
}

/// Subscription poll loop: decodes each message and hands it to `handler` on
/// a tracked task so slow handlers never block the subject.
fn spawn_loop<T, F, Fut>(
	tracker: &TaskTracker,
	shutdown: &CancellationToken,
	mut sub: Subscriber,
	what: &'static str,
	handler: F,
) where
	T: DeserializeOwned + Send + 'static,
	F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
	Fut: Future<Output = Result<()>> + Send + 'static,
{
	let tracker2 = tracker.clone();
	let shutdown = shutdown.clone();

	tracker.spawn(async move {
		loop {
			tokio::select! {
				_ = shutdown.cancelled() => break,
				res = sub.next() => match res {
					Ok(NextOutput::Message(msg)) => {
						let decoded: T = match serde_json::from_slice(&msg.payload) {
							Ok(v) => v,
							Err(err) => {
								tracing::warn!(?err, %what, "dropping undecodable message");
								continue;
							}
						};

						let handler = handler.clone();
						tracker2.spawn(async move {
							if let Err(err) = handler(decoded).await {
								tracing::error!(?err, %what, "message handler failed");
							}
						});
					}
					Ok(NextOutput::Unsubscribed) | Err(_) => {
						tracing::debug!(%what, "subscription closed");
						break;
					}
				}
			}
		}
	});
}
