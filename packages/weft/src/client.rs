use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_pubsub::NextOutput;

use crate::{
	connection::Connection,
	ctx::Search,
	error::{WireError, WorkflowError},
	job::{self, status},
	protocol::{HookMessage, InterruptMessage, ReentryMessage, RetryPolicy, SignalMessage},
	utils::topic,
};

/// Poll fallback while awaiting a job's done notification.
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Options for [`Client::start`].
#[derive(Debug, Clone)]
pub struct StartOptions {
	pub args: Vec<Value>,
	pub task_queue: String,
	pub workflow_name: String,
	/// Explicit job id; generated when absent.
	pub workflow_id: Option<String>,
	/// TTL (seconds) applied once the job reaches a terminal state.
	pub expire: Option<u64>,
	/// Seed values for underscore-prefixed search fields.
	pub search: Option<HashMap<String, String>>,
	/// Seed replay-shaped fields (names must be dash-delimited).
	pub marker: Option<HashMap<String, String>>,
	/// Create the record without dispatching; the first inbound hook or
	/// signal dispatches the deferred main thread.
	pub pending: bool,
	pub signal_in: bool,
	/// Keep the record after completion until explicitly removed.
	pub persistent: bool,
	/// Workflow-level retry configuration.
	pub retry: Option<RetryPolicy>,
}

impl Default for StartOptions {
	fn default() -> Self {
		StartOptions {
			args: Vec::new(),
			task_queue: String::new(),
			workflow_name: String::new(),
			workflow_id: None,
			expire: None,
			search: None,
			marker: None,
			pending: false,
			signal_in: true,
			persistent: false,
			retry: None,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct HookOptions {
	pub task_queue: String,
	pub workflow_name: String,
	pub workflow_id: String,
	pub args: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct InterruptOptions {
	pub message: Option<String>,
	/// When false the job stops without recording `$error`.
	pub throw: bool,
	/// Cascade to child jobs.
	pub descend: bool,
	pub expire: Option<u64>,
}

impl Default for InterruptOptions {
	fn default() -> Self {
		InterruptOptions {
			message: None,
			throw: true,
			descend: false,
			expire: None,
		}
	}
}

#[derive(Debug, Clone)]
pub struct ResultOptions {
	/// When false, a terminal `$error` is returned as a value on
	/// [`JobResult::error`] instead of raised.
	pub throw_on_error: bool,
	/// Attach the full job state to the result.
	pub with_state: bool,
}

impl Default for ResultOptions {
	fn default() -> Self {
		ResultOptions {
			throw_on_error: true,
			with_state: false,
		}
	}
}

#[derive(Debug)]
pub struct JobResult<T> {
	pub data: Option<T>,
	pub error: Option<WireError>,
	pub state: Option<JobState>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobMetadata {
	pub created: i64,
	pub updated: i64,
	pub expire: Option<u64>,
	pub persistent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobState {
	pub status: i64,
	pub context: Value,
	pub search: HashMap<String, String>,
	pub metadata: Option<JobMetadata>,
}

/// Full record dump: state plus the raw replay log. Debug surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExport {
	pub status: i64,
	pub state: JobState,
	pub replay: BTreeMap<String, String>,
}

pub(crate) struct ParentLink {
	pub slot: String,
	pub reentry: ReentryMessage,
}

pub(crate) struct JobSpec {
	pub msg: ReentryMessage,
	pub search: Option<HashMap<String, String>>,
	pub marker: Option<HashMap<String, String>>,
	pub pending: bool,
	pub parent_link: Option<ParentLink>,
}

/// Creates the job record and, unless deferred, dispatches the first
/// re-entry. Shared between the client surface and child spawns.
pub(crate) async fn create_job(conn: &Connection, spec: JobSpec) -> Result<()> {
	let job_key = job::key(conn.namespace(), &spec.msg.workflow_id);

	if conn.store().exists(&job_key).await? {
		return Err(WorkflowError::DuplicateJob(spec.msg.workflow_id.clone()).into());
	}

	let now = weft_util::timestamp::now();
	let mut fields = HashMap::from([
		(job::fields::STATUS.to_string(), status::ACTIVE.to_string()),
		(job::fields::CREATED.to_string(), now.to_string()),
		(job::fields::UPDATED.to_string(), now.to_string()),
		(
			job::fields::SIGNAL_IN.to_string(),
			spec.msg.signal_in.to_string(),
		),
		(
			job::fields::PERSISTENT.to_string(),
			spec.msg.persistent.to_string(),
		),
		(
			job::fields::MESSAGE.to_string(),
			serde_json::to_string(&spec.msg)
				.map_err(|err| WorkflowError::Serialize("re-entry message", err))?,
		),
	]);

	if let Some(expire) = spec.msg.expire {
		fields.insert(job::fields::EXPIRE.to_string(), expire.to_string());
	}
	if spec.pending {
		fields.insert(job::fields::PENDING.to_string(), "true".to_string());
	}

	if let Some(search) = spec.search {
		for (key, value) in search {
			fields.insert(Search::field(&key), value);
		}
	}

	if let Some(marker) = spec.marker {
		for (key, value) in marker {
			if !key.starts_with('-') {
				return Err(WorkflowError::InvalidArgument(
					"marker fields must be dash-delimited",
				)
				.into());
			}
			fields.insert(key, value);
		}
	}

	if let Some(link) = spec.parent_link {
		fields.insert(
			job::fields::PARENT.to_string(),
			link.reentry.workflow_id.clone(),
		);
		fields.insert(job::fields::PARENT_SLOT.to_string(), link.slot);
		fields.insert(
			job::fields::PARENT_MESSAGE.to_string(),
			serde_json::to_string(&link.reentry)
				.map_err(|err| WorkflowError::Serialize("parent re-entry", err))?,
		);
	}

	conn.store().set_fields(&job_key, fields).await?;

	if !spec.pending {
		conn.pubsub()
			.publish(
				&topic::execute(conn.namespace()),
				&serde_json::to_vec(&spec.msg)
					.map_err(|err| WorkflowError::Serialize("re-entry message", err))?,
			)
			.await?;
	}

	Ok(())
}

/// Scheduler-side surface: start workflows, send signals and hooks, and
/// obtain handles to running jobs.
#[derive(Clone)]
pub struct Client {
	conn: Connection,
}

impl Client {
	pub fn new(conn: Connection) -> Self {
		Client { conn }
	}

	/// Same client under a different namespace.
	pub fn with_namespace(&self, namespace: impl Into<String>) -> Self {
		Client {
			conn: self.conn.with_namespace(namespace),
		}
	}

	#[tracing::instrument(skip_all, fields(workflow_name = %opts.workflow_name, workflow_id))]
	pub async fn start(&self, opts: StartOptions) -> Result<WorkflowHandle> {
		if opts.task_queue.is_empty() {
			return Err(WorkflowError::InvalidArgument("task queue must not be empty").into());
		}
		if opts.workflow_name.is_empty() {
			return Err(WorkflowError::InvalidArgument("workflow name must not be empty").into());
		}

		let workflow_id = opts.workflow_id.unwrap_or_else(weft_util::id::guid);
		tracing::Span::current().record("workflow_id", workflow_id.as_str());

		let msg = ReentryMessage {
			workflow_id: workflow_id.clone(),
			workflow_name: opts.workflow_name.clone(),
			task_queue: opts.task_queue.clone(),
			namespace: self.conn.namespace().to_string(),
			arguments: opts.args,
			origin_job_id: None,
			parent_workflow_id: None,
			workflow_dimension: String::new(),
			expire: opts.expire,
			persistent: opts.persistent,
			signal_in: opts.signal_in,
			attempt: 0,
			retry: opts.retry.unwrap_or_default(),
		};

		create_job(
			&self.conn,
			JobSpec {
				msg,
				search: opts.search,
				marker: opts.marker,
				pending: opts.pending,
				parent_link: None,
			},
		)
		.await?;

		Ok(self.get_handle(&opts.task_queue, &opts.workflow_name, &workflow_id))
	}

	/// One-shot signal delivery; queued by the scheduler when nobody waits.
	pub async fn signal(&self, signal_id: &str, data: Value) -> Result<()> {
		let msg = SignalMessage {
			signal_id: signal_id.to_string(),
			data,
		};

		self.conn
			.pubsub()
			.publish(
				&topic::signal(self.conn.namespace()),
				&serde_json::to_vec(&msg)
					.map_err(|err| WorkflowError::Serialize("signal message", err))?,
			)
			.await
	}

	/// Spawns a dimensional thread on a running job.
	pub async fn hook(&self, opts: HookOptions) -> Result<()> {
		let msg = HookMessage {
			workflow_id: opts.workflow_id,
			workflow_name: opts.workflow_name,
			task_queue: opts.task_queue,
			arguments: opts.args,
			parent_dimension: String::new(),
		};

		self.conn
			.pubsub()
			.publish(
				&topic::flow_signal(self.conn.namespace()),
				&serde_json::to_vec(&msg)
					.map_err(|err| WorkflowError::Serialize("hook message", err))?,
			)
			.await
	}

	pub fn get_handle(
		&self,
		task_queue: &str,
		workflow_name: &str,
		workflow_id: &str,
	) -> WorkflowHandle {
		WorkflowHandle {
			conn: self.conn.clone(),
			task_queue: task_queue.to_string(),
			workflow_name: workflow_name.to_string(),
			workflow_id: workflow_id.to_string(),
		}
	}

	pub fn connection(&self) -> &Connection {
		&self.conn
	}
}

/// Handle to one workflow job.
#[derive(Clone)]
pub struct WorkflowHandle {
	conn: Connection,
	task_queue: String,
	workflow_name: String,
	workflow_id: String,
}

impl WorkflowHandle {
	pub fn workflow_id(&self) -> &str {
		&self.workflow_id
	}

	pub fn workflow_name(&self) -> &str {
		&self.workflow_name
	}

	pub fn task_queue(&self) -> &str {
		&self.task_queue
	}

	fn job_key(&self) -> String {
		job::key(self.conn.namespace(), &self.workflow_id)
	}

	/// Current status semaphore value.
	pub async fn status(&self) -> Result<i64> {
		let raw = self
			.conn
			.store()
			.get_field(&self.job_key(), job::fields::STATUS)
			.await?;

		raw.and_then(|v| v.parse::<i64>().ok())
			.ok_or_else(|| WorkflowError::JobNotFound(self.workflow_id.clone()).into())
	}

	/// Awaits the job's terminal state and returns its response, raising any
	/// recorded `$error` as its typed kind.
	pub async fn result<T: DeserializeOwned>(&self) -> Result<T> {
		let settled = self
			.result_with::<T>(ResultOptions::default())
			.await?;

		settled
			.data
			.ok_or_else(|| WorkflowError::ReplayDiverged("job settled without a response".into()).into())
	}

	#[tracing::instrument(skip_all, fields(workflow_id = %self.workflow_id))]
	pub async fn result_with<T: DeserializeOwned>(
		&self,
		opts: ResultOptions,
	) -> Result<JobResult<T>> {
		let st = self.wait_done().await?;

		let state = if opts.with_state {
			Some(self.state(true).await?)
		} else {
			None
		};

		if st == status::COMPLETED {
			let raw = self
				.conn
				.store()
				.get_field(&self.job_key(), job::fields::RESPONSE)
				.await?
				.unwrap_or_else(|| "null".to_string());
			let data: T = serde_json::from_str(&raw)
				.map_err(|err| WorkflowError::Deserialize("workflow response", err))?;

			return Ok(JobResult {
				data: Some(data),
				error: None,
				state,
			});
		}

		// Failed or interrupted
		let error = self
			.conn
			.store()
			.get_field(&self.job_key(), job::fields::ERROR)
			.await?
			.and_then(|raw| serde_json::from_str::<WireError>(&raw).ok())
			.unwrap_or_else(|| {
				WireError::interrupted(self.workflow_id.clone(), "interrupted")
			});

		if opts.throw_on_error {
			return Err(WorkflowError::from_wire(error).into());
		}

		Ok(JobResult {
			data: None,
			error: Some(error),
			state,
		})
	}

	async fn wait_done(&self) -> Result<i64> {
		// Subscribe before the status check so a completion between the two
		// is not missed
		let mut sub = self
			.conn
			.pubsub()
			.subscribe(&topic::done(self.conn.namespace(), &self.workflow_id))
			.await?;

		let mut interval = tokio::time::interval(RESULT_POLL_INTERVAL);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

		loop {
			let st = self.status().await?;
			if status::is_terminal(st) {
				return Ok(st);
			}

			tokio::select! {
				res = sub.next() => {
					if matches!(res, Ok(NextOutput::Unsubscribed) | Err(_)) {
						// Fall back to polling only
						tokio::time::sleep(RESULT_POLL_INTERVAL).await;
					}
				}
				_ = interval.tick() => {}
			}
		}
	}

	/// Snapshot of the job's user-visible state.
	pub async fn state(&self, include_metadata: bool) -> Result<JobState> {
		let (_, fields) = self
			.conn
			.store()
			.find_job_fields(&self.job_key(), "*", usize::MAX, usize::MAX)
			.await?;

		if fields.is_empty() {
			return Err(WorkflowError::JobNotFound(self.workflow_id.clone()).into());
		}

		Ok(build_state(&self.workflow_id, &fields, include_metadata)?)
	}

	/// Values of named search fields.
	pub async fn query_state(&self, keys: &[&str]) -> Result<HashMap<String, Option<String>>> {
		let fields = keys.iter().map(|k| Search::field(k)).collect::<Vec<_>>();
		let values = self
			.conn
			.store()
			.get_fields(&self.job_key(), &fields)
			.await?;

		Ok(keys
			.iter()
			.map(|k| k.to_string())
			.zip(values)
			.collect())
	}

	/// Requests cancellation; honored at the job's next suspension point.
	pub async fn interrupt(&self, opts: InterruptOptions) -> Result<()> {
		let msg = InterruptMessage {
			workflow_id: self.workflow_id.clone(),
			message: opts.message,
			throw: opts.throw,
			descend: opts.descend,
			expire: opts.expire,
		};

		self.conn
			.pubsub()
			.publish(
				&topic::interrupt(self.conn.namespace()),
				&serde_json::to_vec(&msg)
					.map_err(|err| WorkflowError::Serialize("interrupt message", err))?,
			)
			.await
	}

	/// Full record dump, replay log included.
	pub async fn export(&self) -> Result<JobExport> {
		let (_, fields) = self
			.conn
			.store()
			.find_job_fields(&self.job_key(), "*", usize::MAX, usize::MAX)
			.await?;

		if fields.is_empty() {
			return Err(WorkflowError::JobNotFound(self.workflow_id.clone()).into());
		}

		let state = build_state(&self.workflow_id, &fields, true)?;
		let replay = fields
			.iter()
			.filter(|(name, _)| job::parse_slot(name).is_some())
			.map(|(name, value)| (name.clone(), value.clone()))
			.collect();

		Ok(JobExport {
			status: state.status,
			state,
			replay,
		})
	}

	/// Signal sugar bound to this handle's connection.
	pub async fn signal(&self, signal_id: &str, data: Value) -> Result<()> {
		Client::new(self.conn.clone()).signal(signal_id, data).await
	}
}

fn build_state(
	workflow_id: &str,
	fields: &HashMap<String, String>,
	include_metadata: bool,
) -> Result<JobState> {
	let st = fields
		.get(job::fields::STATUS)
		.and_then(|v| v.parse::<i64>().ok())
		.ok_or_else(|| WorkflowError::JobNotFound(workflow_id.to_string()))?;

	let context = fields
		.get(job::fields::CONTEXT)
		.map(|raw| serde_json::from_str(raw))
		.transpose()
		.map_err(|err| WorkflowError::Deserialize("job context", err))?
		.unwrap_or(Value::Null);

	let search = fields
		.iter()
		.filter_map(|(name, value)| {
			name.strip_prefix(job::fields::SEARCH_PREFIX)
				.map(|key| (key.to_string(), value.clone()))
		})
		.collect();

	let metadata = include_metadata.then(|| JobMetadata {
		created: fields
			.get(job::fields::CREATED)
			.and_then(|v| v.parse().ok())
			.unwrap_or_default(),
		updated: fields
			.get(job::fields::UPDATED)
			.and_then(|v| v.parse().ok())
			.unwrap_or_default(),
		expire: fields.get(job::fields::EXPIRE).and_then(|v| v.parse().ok()),
		persistent: fields
			.get(job::fields::PERSISTENT)
			.map(|v| v == "true")
			.unwrap_or(false),
	});

	Ok(JobState {
		status: st,
		context,
		search,
		metadata,
	})
}
