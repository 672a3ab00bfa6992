use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{WireError, WorkflowError, WorkflowResult};

/// Reserved field names on the per-job record. User search fields are
/// underscore-prefixed and replay slots are dash-delimited, so bare names
/// never collide with either.
pub mod fields {
	/// User document store (JSONB semantics).
	pub const CONTEXT: &str = "context";
	/// Status semaphore; values at or below zero are terminal.
	pub const STATUS: &str = "status";
	/// Job-create timestamp (ms).
	pub const CREATED: &str = "jc";
	/// Job-update timestamp (ms).
	pub const UPDATED: &str = "ju";
	/// Terminal error payload.
	pub const ERROR: &str = "$error";
	/// Main-thread return value.
	pub const RESPONSE: &str = "response";
	/// Record survives completion until explicitly removed.
	pub const PERSISTENT: &str = "persistent";
	/// TTL (seconds) applied after the job reaches a terminal state.
	pub const EXPIRE: &str = "expire";
	/// Whether inbound signals and hooks are accepted.
	pub const SIGNAL_IN: &str = "signal_in";
	/// Deferred-dispatch flag; removed when the main thread is dispatched.
	pub const PENDING: &str = "pending";
	/// Allocation counter for hook thread dimensions.
	pub const HOOKS: &str = "hooks";
	/// Serialized main-thread re-entry message.
	pub const MESSAGE: &str = "msg";
	/// Child job ids spawned by this job (JSON array).
	pub const CHILDREN: &str = "children";
	/// Parent job id, set on child records.
	pub const PARENT: &str = "parent";
	/// Replay slot on the parent to fill when this child completes.
	pub const PARENT_SLOT: &str = "pslot";
	/// Serialized parent re-entry to enqueue when this child completes.
	pub const PARENT_MESSAGE: &str = "pmsg";

	/// Prefix for user search fields.
	pub const SEARCH_PREFIX: &str = "_";
}

/// Job status semaphore values. The scheduler may use higher positive values
/// to count open branches; anything at or below zero is terminal.
pub mod status {
	pub const ACTIVE: i64 = 1;
	pub const COMPLETED: i64 = 0;
	pub const INTERRUPTED: i64 = -1;
	pub const FAILED: i64 = -2;

	pub fn is_terminal(v: i64) -> bool {
		v <= 0
	}
}

/// Namespaced record key for a job id.
pub fn key(namespace: &str, job_id: &str) -> String {
	format!("{namespace}:{job_id}")
}

/// Record key of the per-namespace signal registry (queued payloads and
/// parked waiters).
pub fn signals_key(namespace: &str) -> String {
	format!("{namespace}:signals")
}

/// Durable operation kinds, as embedded in replay slot names.
#[derive(
	Debug,
	Clone,
	Copy,
	PartialEq,
	Eq,
	Hash,
	strum::Display,
	strum::EnumString,
	Serialize,
	Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SlotOp {
	Proxy,
	Child,
	Start,
	Sleep,
	Wait,
	Hook,
	Entity,
	Search,
	Trace,
	Emit,
	Publish,
}

/// Composes the replay slot field name for `(op, dimension, index)`:
/// `-<op><dimension>-<index>-`. The dimension is empty for the main thread
/// and `,`-prefixed for hook threads, so the name parses unambiguously.
pub fn slot_name(op: SlotOp, dimension: &str, index: impl Display) -> String {
	format!("-{op}{dimension}-{index}-")
}

/// Parses a replay slot field name back into `(op, dimension, index)`.
/// Returns `None` for reserved fields, search fields, and malformed names.
pub fn parse_slot(name: &str) -> Option<(SlotOp, &str, &str)> {
	let body = name.strip_prefix('-')?.strip_suffix('-')?;
	let split = body.rfind('-')?;
	let (head, index) = (&body[..split], &body[split + 1..]);

	if index.is_empty() {
		return None;
	}

	let dim_start = head.find(',').unwrap_or(head.len());
	let (op, dimension) = head.split_at(dim_start);
	let op = op.parse::<SlotOp>().ok()?;

	Some((op, dimension, index))
}

/// Field-match pattern loading the replay log for one dimensional thread.
/// Deliberately broad; the executor filters the result to the exact
/// dimension, since `-*<dim>-*` also matches deeper coordinates.
pub fn replay_pattern(dimension: &str) -> String {
	format!("-*{dimension}-*")
}

/// Cached result of a durable primitive, stored as the replay slot value.
/// Exactly one of `data`/`error` is set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Slot {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
	#[serde(rename = "$error", default, skip_serializing_if = "Option::is_none")]
	pub error: Option<WireError>,
}

impl Slot {
	pub fn data(value: Value) -> Self {
		Slot {
			data: Some(value),
			error: None,
		}
	}

	pub fn error(error: WireError) -> Self {
		Slot {
			data: None,
			error: Some(error),
		}
	}

	pub fn encode(&self) -> String {
		serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
	}

	pub fn decode(raw: &str) -> WorkflowResult<Self> {
		serde_json::from_str(raw).map_err(|err| WorkflowError::Deserialize("replay slot", err))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn slot_names_round_trip() {
		let name = slot_name(SlotOp::Proxy, "", 1);
		assert_eq!(name, "-proxy-1-");
		assert_eq!(parse_slot(&name), Some((SlotOp::Proxy, "", "1")));

		let name = slot_name(SlotOp::Wait, ",0,1", 12);
		assert_eq!(name, "-wait,0,1-12-");
		assert_eq!(parse_slot(&name), Some((SlotOp::Wait, ",0,1", "12")));

		let name = slot_name(SlotOp::Entity, ",0", "3.2");
		assert_eq!(name, "-entity,0-3.2-");
		assert_eq!(parse_slot(&name), Some((SlotOp::Entity, ",0", "3.2")));
	}

	#[test]
	fn reserved_and_search_fields_do_not_parse() {
		assert_eq!(parse_slot("context"), None);
		assert_eq!(parse_slot("_customer"), None);
		assert_eq!(parse_slot("$error"), None);
		assert_eq!(parse_slot("-unknown-1-"), None);
		assert_eq!(parse_slot("-proxy-"), None);
	}

	#[test]
	fn slot_values_encode_data_or_error() {
		let slot = Slot::data(serde_json::json!({"greeting": "Hi A"}));
		let decoded = Slot::decode(&slot.encode()).unwrap();
		assert_eq!(decoded.data.unwrap()["greeting"], "Hi A");
		assert!(decoded.error.is_none());

		let raw = r#"{"$error":{"message":"boom","code":598}}"#;
		let decoded = Slot::decode(raw).unwrap();
		assert_eq!(decoded.error.unwrap().code, 598);
	}

	#[test]
	fn dimensions_never_collide_on_slot_names() {
		let main = slot_name(SlotOp::Proxy, "", 1);
		let hook = slot_name(SlotOp::Proxy, ",0", 1);
		let nested = slot_name(SlotOp::Proxy, ",0,1", 1);

		assert_ne!(main, hook);
		assert_ne!(hook, nested);
	}
}
