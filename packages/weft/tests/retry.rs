mod common;

use std::sync::{
	atomic::{AtomicU32, Ordering},
	Arc,
};
use tokio::time::Instant;
use weft::prelude::*;

#[tokio::test(start_paused = true)]
async fn activity_retries_with_capped_backoff_until_success() {
	let attempts = Arc::new(AtomicU32::new(0));
	let attempts_in_activity = attempts.clone();

	let h = common::start("retry-ladder", move |worker, activity_worker| {
		worker.register_workflow("persistent", |ctx: WorkflowCtx, _args| async move {
			let out: String = ctx
				.activity("fail_thrice")
				.retry_policy(RetryPolicy {
					maximum_attempts: 5,
					backoff_coefficient: 2.0,
					maximum_interval_secs: 10,
					throw_on_error: true,
				})
				.call()
				.await?;

			Ok(json!(out))
		});

		activity_worker.register_activity("fail_thrice", move |_ctx, _args| {
			let attempts = attempts_in_activity.clone();

			async move {
				let n = attempts.fetch_add(1, Ordering::SeqCst);
				if n < 3 {
					anyhow::bail!("transient failure {n}");
				}

				Ok(json!("ok"))
			}
		});
	})
	.await;

	let started = Instant::now();
	let handle = h
		.client
		.start(h.start_options("persistent", "job-retry"))
		.await
		.unwrap();

	let result: String = handle.result().await.unwrap();
	assert_eq!(result, "ok");

	// Three failures, then success on the fourth attempt
	assert_eq!(attempts.load(Ordering::SeqCst), 4);

	// Backoff between attempts: 2s, 4s, 8s (cap of 10s never reached)
	let elapsed = started.elapsed();
	assert!(elapsed >= std::time::Duration::from_secs(14), "{elapsed:?}");
	assert!(elapsed < std::time::Duration::from_secs(30), "{elapsed:?}");

	h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn workflow_level_retry_reaches_maxed() {
	let attempts = Arc::new(AtomicU32::new(0));
	let attempts_in_workflow = attempts.clone();

	let h = common::start("workflow-retry", move |worker, _| {
		worker.register_workflow("glitchy", move |_ctx: WorkflowCtx, _args: Vec<Value>| {
			let attempts = attempts_in_workflow.clone();

			async move {
				attempts.fetch_add(1, Ordering::SeqCst);
				Err::<Value, _>(anyhow::anyhow!("workflow glitch"))
			}
		});
	})
	.await;

	let handle = h
		.client
		.start(StartOptions {
			retry: Some(RetryPolicy {
				maximum_attempts: 3,
				backoff_coefficient: 2.0,
				maximum_interval_secs: 4,
				throw_on_error: true,
			}),
			..h.start_options("glitchy", "job-glitchy")
		})
		.await
		.unwrap();

	let settled = handle
		.result_with::<Value>(ResultOptions {
			throw_on_error: false,
			with_state: false,
		})
		.await
		.unwrap();

	assert_eq!(attempts.load(Ordering::SeqCst), 3);
	assert_eq!(settled.error.expect("terminal error").code, 597);

	h.shutdown().await;
}
