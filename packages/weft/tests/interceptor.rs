mod common;

use std::sync::{Arc, Mutex};

use weft::interceptor::{ActivityFn, WorkflowFn};
use weft::prelude::*;

struct InvocationRecorder {
	log: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl WorkflowInterceptor for InvocationRecorder {
	async fn execute(
		&self,
		ctx: &WorkflowCtx,
		args: Vec<Value>,
		next: &WorkflowFn,
	) -> Result<Value> {
		self.log
			.lock()
			.unwrap()
			.push(format!("enter:{}", ctx.workflow_name()));

		let res = next(ctx.clone(), args).await;

		// Suspension control signals must pass through untouched
		let label = match &res {
			Ok(_) => "done".to_string(),
			Err(err) if did_interrupt(err) => "suspend".to_string(),
			Err(_) => "error".to_string(),
		};
		self.log.lock().unwrap().push(label);

		res
	}
}

struct ActivityTagger {
	log: Arc<Mutex<Vec<String>>>,
}

#[async_trait::async_trait]
impl ActivityInterceptor for ActivityTagger {
	async fn execute(
		&self,
		ctx: &ActivityCtx,
		args: Vec<Value>,
		next: &ActivityFn,
	) -> Result<Value> {
		self.log
			.lock()
			.unwrap()
			.push(format!("activity:{}", ctx.activity_name()));

		next(ctx.clone(), args).await
	}
}

#[tokio::test]
async fn interceptors_wrap_every_reentry_and_activity() {
	let log = Arc::new(Mutex::new(Vec::new()));

	register_interceptor(Arc::new(InvocationRecorder { log: log.clone() }));
	register_activity_interceptor(Arc::new(ActivityTagger { log: log.clone() }));

	let h = common::start("interceptors", |worker, activity_worker| {
		worker.register_workflow("greeter", |ctx: WorkflowCtx, _args| async move {
			let out: String = ctx.activity("greet").arg("ring").call().await?;

			Ok(json!(out))
		});

		activity_worker.register_activity("greet", |_ctx, args: Vec<Value>| async move {
			let name = args
				.first()
				.and_then(|v| v.as_str())
				.unwrap_or_default()
				.to_string();

			Ok(json!(format!("Hi {name}")))
		});
	})
	.await;

	let handle = h
		.client
		.start(h.start_options("greeter", "job-ringed"))
		.await
		.unwrap();

	let result: String = handle.result().await.unwrap();
	assert_eq!(result, "Hi ring");

	let log = log.lock().unwrap().clone();

	// First re-entry suspends on the activity, the second completes, and the
	// activity pool ran the tagged activity exactly once in between
	assert_eq!(
		log,
		vec![
			"enter:greeter".to_string(),
			"suspend".to_string(),
			"activity:greet".to_string(),
			"enter:greeter".to_string(),
			"done".to_string(),
		]
	);

	clear_interceptors();
	h.shutdown().await;
}
