mod common;

use std::time::Duration;

use weft::prelude::*;

async fn wait_for_status(handle: &WorkflowHandle, pred: impl Fn(i64) -> bool) {
	for _ in 0..100 {
		if let Ok(st) = handle.status().await {
			if pred(st) {
				return;
			}
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
	}

	panic!("status condition never reached");
}

#[tokio::test]
async fn interrupt_cascades_to_children() {
	let h = common::start("interrupt-cascade", |worker, _| {
		worker.register_workflow("parent", |ctx: WorkflowCtx, _args| async move {
			let child_id: String = ctx
				.child("sleeper")
				.workflow_id("job-cascade-child")
				.start()
				.await?;

			let _: Value = ctx.wait_for("never").await?;

			Ok(json!(child_id))
		});

		worker.register_workflow("sleeper", |ctx: WorkflowCtx, _args| async move {
			ctx.sleep_for("3600s").await?;

			Ok(json!(null))
		});
	})
	.await;

	let parent = h
		.client
		.start(h.start_options("parent", "job-cascade-parent"))
		.await
		.unwrap();
	let child = h
		.client
		.get_handle("test", "sleeper", "job-cascade-child");

	// Child spawned and suspended on its timer
	wait_for_status(&child, |st| st > 0).await;

	parent
		.interrupt(InterruptOptions {
			descend: true,
			..Default::default()
		})
		.await
		.unwrap();

	let err = parent.result::<Value>().await.unwrap_err();
	let interrupted = err
		.chain()
		.filter_map(|cause| cause.downcast_ref::<WorkflowError>())
		.any(|we| matches!(we, WorkflowError::Interrupted { job_id } if job_id == "job-cascade-parent"));
	assert!(interrupted, "{err:?}");

	wait_for_status(&child, |st| st <= 0).await;
	assert!(child.status().await.unwrap() <= 0);

	h.shutdown().await;
}

#[tokio::test]
async fn awaited_child_completion_resumes_the_parent() {
	let h = common::start("child-await", |worker, activity_worker| {
		worker.register_workflow("parent", |ctx: WorkflowCtx, _args| async move {
			let total: i64 = ctx.child("adder").arg(19).arg(23).exec().await?;

			Ok(json!(total))
		});

		worker.register_workflow("adder", |ctx: WorkflowCtx, args: Vec<Value>| async move {
			let a = args.first().and_then(|v| v.as_i64()).unwrap_or_default();
			let b = args.get(1).and_then(|v| v.as_i64()).unwrap_or_default();

			let sum: i64 = ctx.activity("add").arg(a).arg(b).call().await?;

			Ok(json!(sum))
		});

		activity_worker.register_activity("add", |_ctx, args: Vec<Value>| async move {
			let a = args.first().and_then(|v| v.as_i64()).unwrap_or_default();
			let b = args.get(1).and_then(|v| v.as_i64()).unwrap_or_default();

			Ok(json!(a + b))
		});
	})
	.await;

	let parent = h
		.client
		.start(h.start_options("parent", "job-await-parent"))
		.await
		.unwrap();

	let result: i64 = parent.result().await.unwrap();
	assert_eq!(result, 42);

	// The parent's child slot caches the child's response
	let export = parent.export().await.unwrap();
	assert!(export.replay.contains_key("-child-1-"));

	h.shutdown().await;
}

#[tokio::test]
async fn terminal_jobs_ignore_further_reentries() {
	let h = common::start("terminal-monotonic", |worker, _| {
		worker.register_workflow("oneshot", |_ctx: WorkflowCtx, _args| async move {
			Ok(json!("done"))
		});
	})
	.await;

	let handle = h
		.client
		.start(h.start_options("oneshot", "job-oneshot"))
		.await
		.unwrap();

	let result: String = handle.result().await.unwrap();
	assert_eq!(result, "done");

	// Interrupting after completion is a no-op; the record keeps its
	// completed status and response
	handle.interrupt(InterruptOptions::default()).await.unwrap();
	tokio::time::sleep(Duration::from_millis(100)).await;

	assert_eq!(handle.status().await.unwrap(), 0);
	let again: String = handle.result().await.unwrap();
	assert_eq!(again, "done");

	h.shutdown().await;
}
