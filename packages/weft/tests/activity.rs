mod common;

use weft::prelude::*;

fn greeter(worker: &mut Worker, activity_worker: &mut ActivityWorker) {
	worker.register_workflow("greeter", |ctx: WorkflowCtx, args: Vec<Value>| async move {
		let name = args
			.first()
			.and_then(|v| v.as_str())
			.unwrap_or("world")
			.to_string();

		let greeting: String = ctx.activity("greet").arg(&name).call().await?;

		Ok(json!(greeting))
	});

	activity_worker.register_activity("greet", |_ctx: ActivityCtx, args: Vec<Value>| async move {
		let name = args
			.first()
			.and_then(|v| v.as_str())
			.unwrap_or_default()
			.to_string();

		Ok(json!(format!("Hi {name}")))
	});
}

#[tokio::test]
async fn activity_runs_once_and_replays() {
	let h = common::start("activity-replay", greeter).await;

	let handle = h
		.client
		.start(StartOptions {
			args: vec![json!("A")],
			..h.start_options("greeter", "job-greet")
		})
		.await
		.unwrap();

	let result: String = handle.result().await.unwrap();
	assert_eq!(result, "Hi A");

	// The first re-entry interrupted at index 1; the scheduler cached the
	// activity result there and the second re-entry replayed it
	let export = handle.export().await.unwrap();
	assert!(export.replay.contains_key("-proxy-1-"));
	assert_eq!(export.status, 0);

	h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cached_activity_error_returns_as_value_when_not_thrown() {
	let h = common::start("activity-error-value", |worker, activity_worker| {
		worker.register_workflow("stoic", |ctx: WorkflowCtx, _args| async move {
			let outcome: Value = ctx
				.activity("explode")
				.throw_on_error(false)
				.retry_policy(RetryPolicy {
					maximum_attempts: 2,
					backoff_coefficient: 2.0,
					maximum_interval_secs: 1,
					throw_on_error: false,
				})
				.call()
				.await?;

			Ok(json!({ "observed": outcome }))
		});

		activity_worker.register_activity("explode", |_ctx, _args| async move {
			Err::<Value, _>(anyhow::anyhow!("kaboom"))
		});
	})
	.await;

	let handle = h
		.client
		.start(h.start_options("stoic", "job-stoic"))
		.await
		.unwrap();

	let result: Value = handle.result().await.unwrap();
	// Retries exhausted server-side, error handed back as a value
	assert_eq!(result["observed"]["code"], json!(597));
	assert!(result["observed"]["message"]
		.as_str()
		.unwrap()
		.contains("kaboom"));

	h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_activity_fails_the_workflow_as_maxed() {
	let h = common::start("activity-maxed", |worker, activity_worker| {
		worker.register_workflow("doomed", |ctx: WorkflowCtx, _args| async move {
			let out: Value = ctx
				.activity("explode")
				.retry_policy(RetryPolicy {
					maximum_attempts: 2,
					backoff_coefficient: 2.0,
					maximum_interval_secs: 1,
					throw_on_error: true,
				})
				.call()
				.await?;

			Ok(out)
		});

		activity_worker.register_activity("explode", |_ctx, _args| async move {
			Err::<Value, _>(anyhow::anyhow!("kaboom"))
		});
	})
	.await;

	let handle = h
		.client
		.start(h.start_options("doomed", "job-doomed"))
		.await
		.unwrap();

	let settled = handle
		.result_with::<Value>(ResultOptions {
			throw_on_error: false,
			with_state: false,
		})
		.await
		.unwrap();

	let error = settled.error.expect("terminal error");
	assert_eq!(error.code, 597);
	assert!(settled.data.is_none());
	assert!(handle.status().await.unwrap() <= 0);

	h.shutdown().await;
}
