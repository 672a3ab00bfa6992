use std::sync::Arc;

use crate::connection::Connection;

struct ActivityInner {
	workflow_id: String,
	workflow_name: String,
	workflow_topic: String,
	activity_name: String,
	namespace: String,
	attempt: u32,
	conn: Connection,
}

/// Per-attempt context handed to activity functions. Activities are plain
/// side-effecting code; nothing here participates in the replay protocol.
#[derive(Clone)]
pub struct ActivityCtx {
	inner: Arc<ActivityInner>,
}

impl ActivityCtx {
	pub(crate) fn new(
		conn: Connection,
		workflow_id: String,
		workflow_name: String,
		workflow_topic: String,
		activity_name: String,
		attempt: u32,
	) -> Self {
		let namespace = conn.namespace().to_string();

		ActivityCtx {
			inner: Arc::new(ActivityInner {
				workflow_id,
				workflow_name,
				workflow_topic,
				activity_name,
				namespace,
				attempt,
				conn,
			}),
		}
	}

	/// Id of the workflow job this activity runs on behalf of.
	pub fn workflow_id(&self) -> &str {
		&self.inner.workflow_id
	}

	pub fn workflow_name(&self) -> &str {
		&self.inner.workflow_name
	}

	pub fn workflow_topic(&self) -> &str {
		&self.inner.workflow_topic
	}

	pub fn activity_name(&self) -> &str {
		&self.inner.activity_name
	}

	pub fn namespace(&self) -> &str {
		&self.inner.namespace
	}

	/// Zero-based retry attempt of this execution.
	pub fn attempt(&self) -> u32 {
		self.inner.attempt
	}

	pub fn connection(&self) -> &Connection {
		&self.inner.conn
	}
}
