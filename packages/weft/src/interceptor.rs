use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{future::BoxFuture, FutureExt};
use serde_json::Value;

use crate::ctx::{ActivityCtx, WorkflowCtx};

pub type WorkflowFn =
	Arc<dyn Fn(WorkflowCtx, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

pub type ActivityFn =
	Arc<dyn Fn(ActivityCtx, Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wraps the whole workflow invocation. Interceptors that use durable
/// primitives participate in the replay protocol and must re-raise anything
/// [`crate::error::did_interrupt`] flags.
#[async_trait]
pub trait WorkflowInterceptor: Send + Sync {
	async fn execute(
		&self,
		ctx: &WorkflowCtx,
		args: Vec<Value>,
		next: &WorkflowFn,
	) -> Result<Value>;
}

/// Wraps each activity execution on the activity pool. The activity context
/// carries the owning workflow's identity.
#[async_trait]
pub trait ActivityInterceptor: Send + Sync {
	async fn execute(
		&self,
		ctx: &ActivityCtx,
		args: Vec<Value>,
		next: &ActivityFn,
	) -> Result<Value>;
}

lazy_static::lazy_static! {
	static ref WORKFLOW_INTERCEPTORS: RwLock<Vec<Arc<dyn WorkflowInterceptor>>> =
		RwLock::new(Vec::new());
	static ref ACTIVITY_INTERCEPTORS: RwLock<Vec<Arc<dyn ActivityInterceptor>>> =
		RwLock::new(Vec::new());
}

/// Registers a workflow interceptor. The first registered runs outermost.
pub fn register_interceptor(interceptor: Arc<dyn WorkflowInterceptor>) {
	WORKFLOW_INTERCEPTORS.write().unwrap().push(interceptor);
}

pub fn register_activity_interceptor(interceptor: Arc<dyn ActivityInterceptor>) {
	ACTIVITY_INTERCEPTORS.write().unwrap().push(interceptor);
}

/// Clears both rings. Registration is a startup concern; this exists for
/// process teardown and tests.
pub fn clear_interceptors() {
	WORKFLOW_INTERCEPTORS.write().unwrap().clear();
	ACTIVITY_INTERCEPTORS.write().unwrap().clear();
}

/// Folds the registered ring around the workflow function, first-registered
/// outermost. The composition is built once per invocation, not per call.
pub(crate) fn compose_workflow(terminal: WorkflowFn) -> WorkflowFn {
	let ring = WORKFLOW_INTERCEPTORS.read().unwrap().clone();

	ring.into_iter().rev().fold(terminal, |next, layer| {
		Arc::new(move |ctx: WorkflowCtx, args: Vec<Value>| {
			let layer = layer.clone();
			let next = next.clone();

			async move { layer.execute(&ctx, args, &next).await }.boxed()
		})
	})
}

pub(crate) fn compose_activity(terminal: ActivityFn) -> ActivityFn {
	let ring = ACTIVITY_INTERCEPTORS.read().unwrap().clone();

	ring.into_iter().rev().fold(terminal, |next, layer| {
		Arc::new(move |ctx: ActivityCtx, args: Vec<Value>| {
			let layer = layer.clone();
			let next = next.clone();

			async move { layer.execute(&ctx, args, &next).await }.boxed()
		})
	})
}
