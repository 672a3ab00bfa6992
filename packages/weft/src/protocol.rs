use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
	error::WireError,
	job::SlotOp,
	utils::topic,
};

/// Return-envelope discriminators shared with the scheduler. These are wire
/// values and must stay bit-exact across releases.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::FromRepr, Serialize, Deserialize,
)]
#[repr(u16)]
#[serde(into = "u16", try_from = "u16")]
pub enum ExitCode {
	Success = 200,
	Sleep = 588,
	Collated = 589,
	Child = 590,
	Proxy = 591,
	Wait = 595,
	Timeout = 596,
	Maxed = 597,
	Fatal = 598,
	Retry = 599,
}

impl From<ExitCode> for u16 {
	fn from(code: ExitCode) -> u16 {
		code as u16
	}
}

impl TryFrom<u16> for ExitCode {
	type Error = String;

	fn try_from(v: u16) -> Result<Self, Self::Error> {
		ExitCode::from_repr(v).ok_or_else(|| format!("unknown exit code {v}"))
	}
}

fn default_max_attempts() -> u32 {
	5
}

fn default_backoff_coefficient() -> f64 {
	10.0
}

fn default_maximum_interval_secs() -> u64 {
	120
}

fn default_true() -> bool {
	true
}

/// Retry configuration for workflows and proxied activities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
	#[serde(default = "default_max_attempts")]
	pub maximum_attempts: u32,
	#[serde(default = "default_backoff_coefficient")]
	pub backoff_coefficient: f64,
	#[serde(default = "default_maximum_interval_secs")]
	pub maximum_interval_secs: u64,
	/// When false, a cached activity error is returned as a value instead of
	/// raised as a typed error.
	#[serde(default = "default_true")]
	pub throw_on_error: bool,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		RetryPolicy {
			maximum_attempts: default_max_attempts(),
			backoff_coefficient: default_backoff_coefficient(),
			maximum_interval_secs: default_maximum_interval_secs(),
			throw_on_error: true,
		}
	}
}

impl RetryPolicy {
	/// Backoff before the given attempt (1-based):
	/// `min(backoff_coefficient ^ attempt, maximum_interval)`.
	pub fn delay(&self, attempt: u32) -> Duration {
		let exp = self.backoff_coefficient.powi(attempt.min(64) as i32);
		let capped = exp.min(self.maximum_interval_secs as f64).max(0.0);

		Duration::from_secs_f64(capped)
	}
}

/// One re-entry request, delivered on the execute topic. The scheduler owns
/// the attempt counter; the executor only derives `can_retry` from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReentryMessage {
	pub workflow_id: String,
	pub workflow_name: String,
	pub task_queue: String,
	pub namespace: String,
	#[serde(default)]
	pub arguments: Vec<Value>,
	#[serde(default)]
	pub origin_job_id: Option<String>,
	#[serde(default)]
	pub parent_workflow_id: Option<String>,
	/// Dimensional thread coordinate; empty for the main thread. Assigned by
	/// the scheduler and preserved byte-for-byte.
	#[serde(default)]
	pub workflow_dimension: String,
	#[serde(default)]
	pub expire: Option<u64>,
	#[serde(default)]
	pub persistent: bool,
	#[serde(default = "default_true")]
	pub signal_in: bool,
	#[serde(default)]
	pub attempt: u32,
	#[serde(default)]
	pub retry: RetryPolicy,
}

impl ReentryMessage {
	pub fn workflow_topic(&self) -> String {
		topic::workflow_topic(&self.task_queue, &self.workflow_name)
	}

	/// Copy used when the scheduler re-enqueues after completing a durable
	/// operation; the retry attempt counter starts over.
	pub fn reset(&self) -> Self {
		let mut msg = self.clone();
		msg.attempt = 0;
		msg
	}
}

/// One durable-operation request registered during an invocation. A single
/// uncached primitive surfaces as one of these; parallel primitives surface
/// as several, collated by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Interruption {
	pub code: ExitCode,
	pub index: u64,
	pub dimension: String,
	pub payload: InterruptionPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InterruptionPayload {
	Sleep {
		duration_secs: u64,
	},
	Wait {
		signal_id: String,
	},
	Proxy {
		activity_name: String,
		task_queue: String,
		arguments: Vec<Value>,
		retry: RetryPolicy,
		expire: Option<u64>,
	},
	Child {
		job_id: String,
		workflow_name: String,
		task_queue: String,
		arguments: Vec<Value>,
		retry: RetryPolicy,
		expire: Option<u64>,
		persistent: bool,
		signal_in: bool,
		/// False for fire-and-forget spawns; the parent's replay slot then
		/// caches the child job id instead of its result.
		await_result: bool,
	},
}

impl Interruption {
	pub fn slot_op(&self) -> SlotOp {
		match &self.payload {
			InterruptionPayload::Sleep { .. } => SlotOp::Sleep,
			InterruptionPayload::Wait { .. } => SlotOp::Wait,
			InterruptionPayload::Proxy { .. } => SlotOp::Proxy,
			InterruptionPayload::Child { await_result, .. } => {
				if *await_result {
					SlotOp::Child
				} else {
					SlotOp::Start
				}
			}
		}
	}

	pub fn slot(&self) -> String {
		crate::job::slot_name(self.slot_op(), &self.dimension, self.index)
	}
}

/// What one executor invocation produced. Exactly one per re-entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
	Completed {
		response: Value,
	},
	Suspended {
		interruption: Interruption,
	},
	Collated {
		interruptions: Vec<Interruption>,
	},
	Failed {
		code: ExitCode,
		error: WireError,
	},
}

impl Outcome {
	pub fn code(&self) -> ExitCode {
		match self {
			Outcome::Completed { .. } => ExitCode::Success,
			Outcome::Suspended { interruption } => interruption.code,
			Outcome::Collated { .. } => ExitCode::Collated,
			Outcome::Failed { code, .. } => *code,
		}
	}
}

/// Signal published on `<ns>.wfs.signal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage {
	pub signal_id: String,
	#[serde(default)]
	pub data: Value,
}

/// Hook request published on `<ns>.flow.signal`; re-enters a live job on a
/// fresh dimensional thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookMessage {
	pub workflow_id: String,
	pub workflow_name: String,
	pub task_queue: String,
	#[serde(default)]
	pub arguments: Vec<Value>,
	/// Dimension of the thread that spawned the hook; hooks from hooks extend
	/// their parent's coordinate.
	#[serde(default)]
	pub parent_dimension: String,
}

/// Cancellation directive published on `<ns>.wfs.interrupt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterruptMessage {
	pub workflow_id: String,
	#[serde(default)]
	pub message: Option<String>,
	/// When false the job is stopped without recording `$error`.
	#[serde(default = "default_true")]
	pub throw: bool,
	#[serde(default)]
	pub descend: bool,
	#[serde(default)]
	pub expire: Option<u64>,
}

/// Activity dispatch published to the activity task-queue subject. Carries the
/// originating re-entry so the activity pool can wake the workflow once the
/// replay slot is written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityJob {
	pub reentry: ReentryMessage,
	pub slot: String,
	pub activity_name: String,
	#[serde(default)]
	pub arguments: Vec<Value>,
	#[serde(default)]
	pub retry: RetryPolicy,
	#[serde(default)]
	pub expire: Option<u64>,
}

/// Published on the per-job done subject when a job reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoneMessage {
	pub workflow_id: String,
	pub status: i64,
}

/// Waiter parked on a signal id, stored in the signal registry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalWaiter {
	pub reentry: ReentryMessage,
	pub slot: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exit_codes_are_wire_stable() {
		assert_eq!(ExitCode::Success as u16, 200);
		assert_eq!(ExitCode::Sleep as u16, 588);
		assert_eq!(ExitCode::Collated as u16, 589);
		assert_eq!(ExitCode::Child as u16, 590);
		assert_eq!(ExitCode::Proxy as u16, 591);
		assert_eq!(ExitCode::Wait as u16, 595);
		assert_eq!(ExitCode::Timeout as u16, 596);
		assert_eq!(ExitCode::Maxed as u16, 597);
		assert_eq!(ExitCode::Fatal as u16, 598);
		assert_eq!(ExitCode::Retry as u16, 599);

		let encoded = serde_json::to_string(&ExitCode::Wait).unwrap();
		assert_eq!(encoded, "595");
	}

	#[test]
	fn retry_delay_is_capped() {
		let policy = RetryPolicy {
			maximum_attempts: 5,
			backoff_coefficient: 2.0,
			maximum_interval_secs: 10,
			throw_on_error: true,
		};

		assert_eq!(policy.delay(1), Duration::from_secs(2));
		assert_eq!(policy.delay(2), Duration::from_secs(4));
		assert_eq!(policy.delay(3), Duration::from_secs(8));
		assert_eq!(policy.delay(4), Duration::from_secs(10));
		assert_eq!(policy.delay(10), Duration::from_secs(10));
	}

	#[test]
	fn fire_and_forget_children_use_the_start_op() {
		let base = Interruption {
			code: ExitCode::Child,
			index: 4,
			dimension: String::new(),
			payload: InterruptionPayload::Child {
				job_id: "job-c".into(),
				workflow_name: "childFlow".into(),
				task_queue: "demo".into(),
				arguments: Vec::new(),
				retry: RetryPolicy::default(),
				expire: None,
				persistent: false,
				signal_in: true,
				await_result: true,
			},
		};

		assert_eq!(base.slot(), "-child-4-");

		let mut started = base;
		if let InterruptionPayload::Child { await_result, .. } = &mut started.payload {
			*await_result = false;
		}
		assert_eq!(started.slot(), "-start-4-");
	}
}
