mod common;

use weft::prelude::*;

#[tokio::test]
async fn hook_thread_signals_the_waiting_main_thread() {
	let h = common::start("hook-signal", |worker, _| {
		worker.register_workflow("mainline", |ctx: WorkflowCtx, _args| async move {
			let approval: Value = ctx.wait_for("done").await?;

			Ok(approval)
		});

		worker.register_workflow("sidecar", |ctx: WorkflowCtx, args: Vec<Value>| async move {
			let verdict = args.first().cloned().unwrap_or(json!(null));
			ctx.signal("done", json!({ "ok": verdict })).await?;

			Ok(json!(null))
		});
	})
	.await;

	let handle = h
		.client
		.start(h.start_options("mainline", "job-hooked"))
		.await
		.unwrap();

	// Give the main thread a beat to park on the signal
	tokio::time::sleep(std::time::Duration::from_millis(100)).await;

	h.client
		.hook(HookOptions {
			task_queue: "test".into(),
			workflow_name: "sidecar".into(),
			workflow_id: "job-hooked".into(),
			args: vec![json!(true)],
		})
		.await
		.unwrap();

	let result: Value = handle.result().await.unwrap();
	assert_eq!(result, json!({ "ok": true }));

	// The hook ran on its own dimensional thread: its side-effect marker is
	// namespaced under `,0` and invisible to the main thread's replay
	let export = handle.export().await.unwrap();
	assert!(export.replay.keys().any(|name| name.contains(",0")));
	assert!(export.replay.keys().any(|name| name.starts_with("-wait-")));

	h.shutdown().await;
}

#[tokio::test]
async fn signals_queue_until_someone_waits() {
	let h = common::start("queued-signal", |worker, _| {
		worker.register_workflow("late-waiter", |ctx: WorkflowCtx, _args| async move {
			let payload: Value = ctx.wait_for("early-bird").await?;

			Ok(payload)
		});
	})
	.await;

	// Deliver the signal before anyone waits on it
	h.client.signal("early-bird", json!(42)).await.unwrap();
	tokio::time::sleep(std::time::Duration::from_millis(50)).await;

	let handle = h
		.client
		.start(h.start_options("late-waiter", "job-late"))
		.await
		.unwrap();

	let result: i64 = handle.result().await.unwrap();
	assert_eq!(result, 42);

	h.shutdown().await;
}

#[tokio::test]
async fn exec_hook_round_trips_through_the_synthesized_signal() {
	let h = common::start("exec-hook", |worker, _| {
		worker.register_workflow("caller", |ctx: WorkflowCtx, _args| async move {
			let doubled: i64 = ctx.hook("helper").arg(21).exec().await?;

			Ok(json!(doubled))
		});

		worker.register_workflow("helper", |ctx: WorkflowCtx, args: Vec<Value>| async move {
			let n = args.first().and_then(|v| v.as_i64()).unwrap_or_default();
			let signal_id = args
				.last()
				.and_then(|v| v.as_str())
				.unwrap_or_default()
				.to_string();

			ctx.signal(&signal_id, json!(n * 2)).await?;

			Ok(json!(null))
		});
	})
	.await;

	let handle = h
		.client
		.start(h.start_options("caller", "job-caller"))
		.await
		.unwrap();

	let result: i64 = handle.result().await.unwrap();
	assert_eq!(result, 42);

	h.shutdown().await;
}

#[tokio::test]
async fn hooking_your_own_topic_without_an_override_is_fatal() {
	let h = common::start("hook-recursion", |worker, _| {
		worker.register_workflow("narcissist", |ctx: WorkflowCtx, _args| async move {
			ctx.hook("narcissist").send().await?;

			Ok(json!(null))
		});
	})
	.await;

	let handle = h
		.client
		.start(h.start_options("narcissist", "job-narcissist"))
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
	assert_eq!(error.code, 598);
	assert!(error.message.contains("task queue override"));

	h.shutdown().await;
}
