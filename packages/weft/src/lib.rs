//! Durable workflow engine in the Temporal programming model.
//!
//! User code authors ordinary async workflow functions; every durable
//! operation (activity calls, timers, signal waits, child spawns, entity
//! mutations) draws a deterministic execution index, caches its result in
//! the per-job replay log, and replays on re-entry, so a workflow runs to
//! completion across process restarts and arbitrary scheduling delays.
//!
//! Suspension is signaled by typed errors: an uncached primitive registers an
//! interruption envelope and raises, user code propagates with `?`, and the
//! executor settles the invocation into exactly one outcome envelope for the
//! scheduler.

pub mod builder;
pub mod client;
pub mod connection;
pub mod ctx;
pub mod db;
pub(crate) mod engine;
pub mod error;
pub mod executable;
pub mod executor;
pub mod interceptor;
pub mod job;
pub mod protocol;
pub mod registry;
pub mod utils;
pub mod worker;

pub mod prelude {
	pub use anyhow::Result;
	pub use futures_util::FutureExt;
	pub use serde::{Deserialize, Serialize};
	pub use serde_json::{json, Value};

	pub use crate::client::{
		Client, HookOptions, InterruptOptions, JobResult, ResultOptions, StartOptions,
		WorkflowHandle,
	};
	pub use crate::connection::Connection;
	pub use crate::ctx::{ActivityCtx, WorkflowCtx};
	pub use crate::error::{did_interrupt, WorkflowError, WorkflowResult};
	pub use crate::executable::{closure, AsyncResult, Executable};
	pub use crate::interceptor::{
		clear_interceptors, register_activity_interceptor, register_interceptor,
		ActivityInterceptor, WorkflowInterceptor,
	};
	pub use crate::protocol::{ExitCode, RetryPolicy};
	pub use crate::registry::Registry;
	pub use crate::worker::{
		create_worker, register_activity_worker, ActivityWorker, Worker, WorkerHandle,
	};
}
