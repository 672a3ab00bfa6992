use crate::error::WorkflowError;

pub mod activity;
pub mod child;
pub mod hook;
pub mod interrupt;

/// Builder-surface errors. Captured on the builder and deferred until the
/// dispatching call so chained setters stay infallible.
#[derive(thiserror::Error, Debug)]
pub enum BuilderError {
	#[error("failed serializing argument")]
	SerializeArg(#[from] serde_json::Error),

	#[error("{0}")]
	InvalidDuration(#[source] WorkflowError),

	#[error("{0}")]
	Invalid(&'static str),
}
