#![allow(dead_code)]

use rand::Rng;
use weft::prelude::*;

/// In-memory engine, one workflow worker and one activity worker on the
/// `test` task queue.
pub struct TestHarness {
	pub client: Client,
	pub conn: Connection,
	workers: Vec<WorkerHandle>,
}

fn init_tracing() {
	static INIT: std::sync::Once = std::sync::Once::new();

	INIT.call_once(|| {
		let _ = tracing_subscriber::fmt()
			.with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
			.with_test_writer()
			.try_init();
	});
}

pub async fn start(
	namespace: &str,
	build: impl FnOnce(&mut Worker, &mut ActivityWorker),
) -> TestHarness {
	init_tracing();

	// Salt the namespace; stores are per-connection but subjects read better
	// unique in logs
	let namespace = format!("{namespace}-{:04x}", rand::thread_rng().gen::<u16>());
	let conn = Connection::memory(namespace);

	let mut worker = Worker::new(conn.clone(), "test");
	let mut activity_worker = ActivityWorker::new(conn.clone(), "test");
	build(&mut worker, &mut activity_worker);

	let workers = vec![
		worker.start().await.expect("worker start"),
		activity_worker.start().await.expect("activity worker start"),
	];

	TestHarness {
		client: Client::new(conn.clone()),
		conn,
		workers,
	}
}

impl TestHarness {
	pub fn start_options(&self, workflow_name: &str, workflow_id: &str) -> StartOptions {
		StartOptions {
			task_queue: "test".into(),
			workflow_name: workflow_name.into(),
			workflow_id: Some(workflow_id.into()),
			// Keep records around so tests can inspect the replay log
			persistent: true,
			..Default::default()
		}
	}

	pub async fn shutdown(self) {
		for worker in self.workers {
			worker.shutdown().await;
		}
	}
}
