use anyhow::Result;
use serde_json::Value;

use crate::{
	connection::Connection,
	ctx::WorkflowCtx,
	error::{classify, WireError, WorkflowError},
	interceptor,
	job,
	protocol::{ExitCode, Outcome, ReentryMessage},
	registry::Registry,
};

/// Replay-log load caps. A truncated load returns a cursor and the context
/// falls back to per-field gets for slots beyond it.
pub(crate) const MAX_REPLAY_FIELDS: usize = 5_000;
pub(crate) const MAX_REPLAY_BYTES: usize = 4 * 1024 * 1024;

/// Runs one re-entry of a workflow function and settles it into exactly one
/// outcome envelope.
///
/// 1. Load the replay log for the message's dimensional thread.
/// 2. Establish the invocation context (counter at zero, empty registry).
/// 3. Invoke the interceptor onion around the registered function.
/// 4. Map the single result: completion, suspension (collated when more than
///    one envelope registered or the escaping signal is a wait), or an error
///    envelope on the retry ladder.
#[tracing::instrument(skip_all, fields(
	workflow_id = %msg.workflow_id,
	workflow_name = %msg.workflow_name,
	dimension = %msg.workflow_dimension,
	attempt = msg.attempt,
))]
pub async fn execute(
	registry: &Registry,
	conn: &Connection,
	msg: ReentryMessage,
) -> Result<Outcome> {
	let workflow = registry.workflow(&msg.workflow_topic())?;

	let job_key = job::key(conn.namespace(), &msg.workflow_id);
	let (cursor, fields) = conn
		.store()
		.find_job_fields(
			&job_key,
			&job::replay_pattern(&msg.workflow_dimension),
			MAX_REPLAY_FIELDS,
			MAX_REPLAY_BYTES,
		)
		.await?;

	// The load pattern is broad; keep only slots of this exact dimensional
	// thread so other threads' history stays invisible here
	let replay = fields
		.into_iter()
		.filter(|(name, _)| {
			job::parse_slot(name)
				.map_or(false, |(_, dim, _)| dim == msg.workflow_dimension)
		})
		.collect();

	tracing::debug!(%cursor, "replay log loaded");

	let ctx = WorkflowCtx::new(conn.clone(), msg, replay, cursor);
	let onion = interceptor::compose_workflow(workflow);
	let args = ctx.raw().arguments.clone();

	let res = (onion)(ctx.clone(), args).await;

	Ok(settle(&ctx, res))
}

fn settle(ctx: &WorkflowCtx, res: Result<Value>) -> Outcome {
	match res {
		Ok(response) => {
			tracing::debug!("workflow completed");

			Outcome::Completed { response }
		}
		Err(err) => {
			let typed = err
				.chain()
				.find_map(|cause| cause.downcast_ref::<WorkflowError>());

			match typed {
				Some(we) if we.is_interruption() => {
					let mut interruptions = ctx.drain_registry();
					let waiting = matches!(we, WorkflowError::Wait { .. });

					if interruptions.is_empty() {
						// A control signal escaped without an envelope; user
						// code re-threw a signal it did not own
						Outcome::Failed {
							code: ExitCode::Fatal,
							error: WireError::new(
								"suspension signal escaped with an empty interruption registry",
								ExitCode::Fatal,
							),
						}
					} else if interruptions.len() > 1 || waiting {
						tracing::debug!(count = interruptions.len(), "collating interruptions");

						Outcome::Collated { interruptions }
					} else {
						Outcome::Suspended {
							interruption: interruptions.remove(0),
						}
					}
				}
				_ => {
					let (code, error) = classify(&err);

					if code == ExitCode::Retry {
						tracing::debug!(%error.message, "workflow errored, retryable");
					} else {
						tracing::warn!(%error.message, %code, "workflow errored, terminal");
					}

					Outcome::Failed { code, error }
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::collections::HashMap;

	use serde_json::json;

	use super::*;
	use crate::protocol::{Interruption, InterruptionPayload, RetryPolicy};

	fn test_ctx() -> WorkflowCtx {
		let msg = ReentryMessage {
			workflow_id: "job-1".into(),
			workflow_name: "flow".into(),
			task_queue: "q".into(),
			namespace: "test".into(),
			arguments: Vec::new(),
			origin_job_id: None,
			parent_workflow_id: None,
			workflow_dimension: String::new(),
			expire: None,
			persistent: false,
			signal_in: true,
			attempt: 0,
			retry: RetryPolicy::default(),
		};

		WorkflowCtx::new(Connection::memory("test"), msg, HashMap::new(), 0)
	}

	fn sleep_interruption(index: u64) -> Interruption {
		Interruption {
			code: ExitCode::Sleep,
			index,
			dimension: String::new(),
			payload: InterruptionPayload::Sleep { duration_secs: 5 },
		}
	}

	#[tokio::test]
	async fn single_interruption_suspends() {
		let ctx = test_ctx();
		ctx.interrupt_with(sleep_interruption(1), WorkflowError::Sleep { index: 1 });

		let outcome = settle(&ctx, Err(WorkflowError::Sleep { index: 1 }.into()));
		assert_eq!(outcome.code(), ExitCode::Sleep);
	}

	#[tokio::test]
	async fn multiple_interruptions_collate() {
		let ctx = test_ctx();
		ctx.interrupt_with(sleep_interruption(1), WorkflowError::Sleep { index: 1 });
		ctx.interrupt_with(sleep_interruption(2), WorkflowError::Sleep { index: 2 });

		let outcome = settle(&ctx, Err(WorkflowError::Sleep { index: 2 }.into()));
		assert_eq!(outcome.code(), ExitCode::Collated);
	}

	#[tokio::test]
	async fn single_wait_still_collates() {
		let ctx = test_ctx();
		let err = ctx.interrupt_with(
			Interruption {
				code: ExitCode::Wait,
				index: 1,
				dimension: String::new(),
				payload: InterruptionPayload::Wait {
					signal_id: "done".into(),
				},
			},
			WorkflowError::Wait {
				index: 1,
				signal_id: "done".into(),
			},
		);

		let outcome = settle(&ctx, Err(err));
		assert_eq!(outcome.code(), ExitCode::Collated);
	}

	#[tokio::test]
	async fn plain_errors_ride_the_retry_ladder() {
		let ctx = test_ctx();
		let outcome = settle(&ctx, Err(anyhow::anyhow!("flaky downstream")));
		assert_eq!(outcome.code(), ExitCode::Retry);

		let ctx = test_ctx();
		let outcome = settle(&ctx, Err(WorkflowError::fatal("no recovery").into()));
		assert_eq!(outcome.code(), ExitCode::Fatal);
	}

	#[tokio::test]
	async fn completion_carries_the_response() {
		let ctx = test_ctx();
		let outcome = settle(&ctx, Ok(json!("Hi A")));
		assert_eq!(outcome.code(), ExitCode::Success);
		match outcome {
			Outcome::Completed { response } => assert_eq!(response, json!("Hi A")),
			_ => panic!("expected completion"),
		}
	}
}
