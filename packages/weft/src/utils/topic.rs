//! Pub/sub subject composition. The signal, flow-signal, and execute subject
//! shapes are part of the scheduler contract.

/// Re-entry requests for workflow jobs.
pub fn execute(namespace: &str) -> String {
	format!("{namespace}.execute")
}

/// One-shot signals addressed by signal id.
pub fn signal(namespace: &str) -> String {
	format!("{namespace}.wfs.signal")
}

/// Hook requests that re-enter live jobs on new dimensional threads.
pub fn flow_signal(namespace: &str) -> String {
	format!("{namespace}.flow.signal")
}

/// Cancellation directives.
pub fn interrupt(namespace: &str) -> String {
	format!("{namespace}.wfs.interrupt")
}

/// Terminal-state notifications for one job.
pub fn done(namespace: &str, workflow_id: &str) -> String {
	format!("{namespace}.wfs.done.{workflow_id}")
}

/// Task-queue subject carrying dispatched activity jobs.
pub fn queue(namespace: &str, task_queue_topic: &str) -> String {
	format!("{namespace}.q.{task_queue_topic}")
}

/// Telemetry sink for `trace` spans.
pub fn telemetry(namespace: &str) -> String {
	format!("{namespace}.telemetry")
}

/// Routing topic of a workflow function.
pub fn workflow_topic(task_queue: &str, workflow_name: &str) -> String {
	format!("{task_queue}-{workflow_name}")
}

/// Default activity routing topic for a workflow task queue.
pub fn activity_topic(task_queue: &str) -> String {
	format!("{task_queue}-activity")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn contract_subjects_are_stable() {
		assert_eq!(signal("meshdata"), "meshdata.wfs.signal");
		assert_eq!(flow_signal("meshdata"), "meshdata.flow.signal");
		assert_eq!(execute("meshdata"), "meshdata.execute");
	}

	#[test]
	fn activity_topic_derives_from_task_queue() {
		assert_eq!(workflow_topic("orders", "fulfill"), "orders-fulfill");
		assert_eq!(activity_topic("orders"), "orders-activity");
	}
}
