mod common;

use weft::prelude::*;

#[tokio::test(start_paused = true)]
async fn parallel_branches_collate_into_one_suspension() {
	let h = common::start("parallel-collation", |worker, activity_worker| {
		worker.register_workflow("fanout", |ctx: WorkflowCtx, _args| async move {
			let (one, two, slept) = ctx
				.all((
					closure(|ctx: &WorkflowCtx| {
						async move { ctx.activity("greet").arg("1").call::<String>().await }
							.boxed()
					}),
					closure(|ctx: &WorkflowCtx| {
						async move { ctx.activity("greet").arg("2").call::<String>().await }
							.boxed()
					}),
					closure(|ctx: &WorkflowCtx| async move { ctx.sleep_for("5s").await }.boxed()),
				))
				.await?;

			Ok(json!([one, two, slept]))
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
		.start(h.start_options("fanout", "job-fanout"))
		.await
		.unwrap();

	let result: Value = handle.result().await.unwrap();
	assert_eq!(result, json!(["Hi 1", "Hi 2", 5]));

	// Branch order fixed the indices: the two activities then the timer
	let export = handle.export().await.unwrap();
	assert!(export.replay.contains_key("-proxy-1-"));
	assert!(export.replay.contains_key("-proxy-2-"));
	assert!(export.replay.contains_key("-sleep-3-"));

	h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn vec_branches_preserve_order() {
	let h = common::start("parallel-vec", |worker, activity_worker| {
		worker.register_workflow("mapper", |ctx: WorkflowCtx, _args| async move {
			let branches = (0..4)
				.map(|i| {
					closure(move |ctx: &WorkflowCtx| {
						async move { ctx.activity("double").arg(i).call::<i64>().await }.boxed()
					})
				})
				.collect::<Vec<_>>();

			let doubled = ctx.all(branches).await?;

			Ok(json!(doubled))
		});

		activity_worker.register_activity("double", |_ctx, args: Vec<Value>| async move {
			let n = args.first().and_then(|v| v.as_i64()).unwrap_or_default();

			Ok(json!(n * 2))
		});
	})
	.await;

	let handle = h
		.client
		.start(h.start_options("mapper", "job-mapper"))
		.await
		.unwrap();

	let result: Vec<i64> = handle.result().await.unwrap();
	assert_eq!(result, vec![0, 2, 4, 6]);

	h.shutdown().await;
}
