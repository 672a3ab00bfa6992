use serde::{Deserialize, Serialize};

use crate::protocol::ExitCode;

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised by the engine.
///
/// The four suspension variants (`Sleep`, `Wait`, `Proxy`, `Child`) are
/// control signals, not failures: a durable primitive raises one after
/// registering its interruption envelope, and the executor turns the set of
/// registered envelopes into the outcome returned to the scheduler. User code
/// must never swallow them; see [`did_interrupt`].
#[derive(thiserror::Error, Debug)]
pub enum WorkflowError {
	#[error("workflow suspended for timer at index {index}")]
	Sleep { index: u64 },

	#[error("workflow suspended awaiting signal {signal_id} at index {index}")]
	Wait { index: u64, signal_id: String },

	#[error("workflow suspended for activity {activity} at index {index}")]
	Proxy { index: u64, activity: String },

	#[error("workflow suspended for child workflow at index {index}")]
	Child { index: u64 },

	#[error("{message}")]
	Fatal {
		message: String,
		stack: Option<String>,
	},

	#[error("retry attempts exhausted: {message}")]
	Maxed {
		message: String,
		stack: Option<String>,
	},

	#[error("deadline exceeded: {message}")]
	Timeout {
		message: String,
		stack: Option<String>,
	},

	#[error("{message}")]
	Retryable {
		message: String,
		stack: Option<String>,
	},

	#[error("job {job_id} interrupted")]
	Interrupted { job_id: String },

	#[error("job {0} not found")]
	JobNotFound(String),

	#[error("job {0} already exists")]
	DuplicateJob(String),

	#[error("no workflow registered for topic {0}")]
	WorkflowNotRegistered(String),

	#[error("no activity {name} registered on queue {queue}")]
	ActivityNotRegistered { queue: String, name: String },

	#[error("hook targets its own workflow topic {0} without an entity or task queue override")]
	HookRecursion(String),

	#[error("job {0} does not accept inbound signals")]
	SignalsDisabled(String),

	#[error("invalid duration: {0}")]
	InvalidDuration(String),

	#[error("invalid {0}")]
	InvalidArgument(&'static str),

	#[error("replay log diverged: {0}")]
	ReplayDiverged(String),

	#[error("failed serializing {0}")]
	Serialize(&'static str, #[source] serde_json::Error),

	#[error("failed deserializing {0}")]
	Deserialize(&'static str, #[source] serde_json::Error),
}

impl WorkflowError {
	/// Marks a user error as unrecoverable. Short-circuits the retry ladder.
	pub fn fatal(message: impl Into<String>) -> Self {
		WorkflowError::Fatal {
			message: message.into(),
			stack: None,
		}
	}

	/// True for the suspension control signals.
	pub fn is_interruption(&self) -> bool {
		matches!(
			self,
			WorkflowError::Sleep { .. }
				| WorkflowError::Wait { .. }
				| WorkflowError::Proxy { .. }
				| WorkflowError::Child { .. }
		)
	}

	/// Rebuilds the typed error for a cached `$error` payload.
	pub fn from_wire(err: WireError) -> Self {
		match ExitCode::from_repr(err.code) {
			Some(ExitCode::Timeout) => WorkflowError::Timeout {
				message: err.message,
				stack: err.stack,
			},
			Some(ExitCode::Maxed) => WorkflowError::Maxed {
				message: err.message,
				stack: err.stack,
			},
			Some(ExitCode::Fatal) => WorkflowError::Fatal {
				message: err.message,
				stack: err.stack,
			},
			_ if err.code == INTERRUPT_CODE => WorkflowError::Interrupted {
				job_id: err.job_id.unwrap_or_default(),
			},
			_ => WorkflowError::Retryable {
				message: err.message,
				stack: err.stack,
			},
		}
	}
}

/// Reserved code recorded in `$error` for externally interrupted jobs.
pub const INTERRUPT_CODE: u16 = 410;

/// Serialized form of an error as stored in `$error` fields and replay slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
	pub message: String,
	pub code: u16,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub job_id: Option<String>,
}

impl WireError {
	pub fn new(message: impl Into<String>, code: ExitCode) -> Self {
		WireError {
			message: message.into(),
			code: code as u16,
			stack: None,
			job_id: None,
		}
	}

	pub fn interrupted(job_id: impl Into<String>, message: impl Into<String>) -> Self {
		WireError {
			message: message.into(),
			code: INTERRUPT_CODE,
			stack: None,
			job_id: Some(job_id.into()),
		}
	}
}

/// Classifies an error chain into its terminal wire code and `$error` payload.
/// Anything that is not a typed engine error is retryable.
pub fn classify(err: &anyhow::Error) -> (ExitCode, WireError) {
	let typed = err
		.chain()
		.find_map(|cause| cause.downcast_ref::<WorkflowError>());

	match typed {
		Some(WorkflowError::Fatal { message, stack }) => (
			ExitCode::Fatal,
			WireError {
				message: message.clone(),
				code: ExitCode::Fatal as u16,
				stack: stack.clone(),
				job_id: None,
			},
		),
		Some(WorkflowError::Maxed { message, stack }) => (
			ExitCode::Maxed,
			WireError {
				message: message.clone(),
				code: ExitCode::Maxed as u16,
				stack: stack.clone(),
				job_id: None,
			},
		),
		Some(WorkflowError::Timeout { message, stack }) => (
			ExitCode::Timeout,
			WireError {
				message: message.clone(),
				code: ExitCode::Timeout as u16,
				stack: stack.clone(),
				job_id: None,
			},
		),
		Some(WorkflowError::Interrupted { job_id }) => (
			ExitCode::Fatal,
			WireError::interrupted(job_id.clone(), err.to_string()),
		),
		// Deterministic engine errors would fail identically on every
		// attempt; skip the ladder
		Some(
			WorkflowError::HookRecursion(_)
			| WorkflowError::ReplayDiverged(_)
			| WorkflowError::DuplicateJob(_)
			| WorkflowError::SignalsDisabled(_)
			| WorkflowError::InvalidDuration(_)
			| WorkflowError::InvalidArgument(_)
			| WorkflowError::Serialize(..)
			| WorkflowError::Deserialize(..),
		) => (
			ExitCode::Fatal,
			WireError::new(err.to_string(), ExitCode::Fatal),
		),
		_ => (
			ExitCode::Retry,
			WireError::new(err.to_string(), ExitCode::Retry),
		),
	}
}

/// Returns true when the error chain carries a suspension control signal.
///
/// User `match`/`?` recovery around durable primitives must consult this and
/// re-raise anything it flags; swallowing a control signal corrupts the
/// replay log.
pub fn did_interrupt(err: &anyhow::Error) -> bool {
	err.chain()
		.filter_map(|cause| cause.downcast_ref::<WorkflowError>())
		.any(|we| we.is_interruption())
}
