use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use futures_util::FutureExt;
use serde_json::Value;

use crate::{
	ctx::WorkflowCtx,
	error::{WorkflowError, WorkflowResult},
	interceptor::WorkflowFn,
	utils::topic,
};

pub type RegistryHandle = Arc<Registry>;

/// Workflow functions known to a worker, keyed by workflow topic
/// (`<task-queue>-<workflow-name>`).
#[derive(Default)]
pub struct Registry {
	workflows: HashMap<String, WorkflowFn>,
}

impl Registry {
	pub fn new() -> Self {
		Registry::default()
	}

	pub fn register_workflow<F, Fut>(&mut self, task_queue: &str, workflow_name: &str, workflow: F)
	where
		F: Fn(WorkflowCtx, Vec<Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<Value>> + Send + 'static,
	{
		self.workflows.insert(
			topic::workflow_topic(task_queue, workflow_name),
			Arc::new(move |ctx, args| workflow(ctx, args).boxed()),
		);
	}

	pub fn workflow(&self, workflow_topic: &str) -> WorkflowResult<WorkflowFn> {
		self.workflows
			.get(workflow_topic)
			.cloned()
			.ok_or_else(|| WorkflowError::WorkflowNotRegistered(workflow_topic.to_string()))
	}

	pub fn contains(&self, workflow_topic: &str) -> bool {
		self.workflows.contains_key(workflow_topic)
	}

	pub fn size(&self) -> usize {
		self.workflows.len()
	}
}
