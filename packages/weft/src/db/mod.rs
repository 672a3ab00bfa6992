use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

pub mod memory;

pub type StoreHandle = Arc<dyn Store>;

/// JSONB-pointer directives applied to the job's `context` document. The
/// directive strings are part of the store contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextVerb {
	Set,
	Merge,
	Get,
	Delete,
	Append,
	Prepend,
	Remove,
	Increment,
	Toggle,
	SetIfNotExists,
}

impl ContextVerb {
	pub fn directive(&self) -> &'static str {
		match self {
			ContextVerb::Set => "@context",
			ContextVerb::Merge => "@context:merge",
			ContextVerb::Get => "@context:get",
			ContextVerb::Delete => "@context:delete",
			ContextVerb::Append => "@context:append",
			ContextVerb::Prepend => "@context:prepend",
			ContextVerb::Remove => "@context:remove",
			ContextVerb::Increment => "@context:increment",
			ContextVerb::Toggle => "@context:toggle",
			ContextVerb::SetIfNotExists => "@context:setIfNotExists",
		}
	}
}

/// One document operation: a verb, a dot-separated path (empty for the
/// document root), and an operand where the verb takes one.
#[derive(Debug, Clone)]
pub struct ContextOp {
	pub verb: ContextVerb,
	pub path: String,
	pub value: Option<Value>,
}

impl ContextOp {
	pub fn new(verb: ContextVerb, path: impl Into<String>, value: Option<Value>) -> Self {
		ContextOp {
			verb,
			path: path.into(),
			value,
		}
	}
}

/// HASH-record store backing job state. Implementations must make
/// `update_context` atomic with its replay marker: the mutation and its
/// idempotency record commit together or not at all.
#[async_trait]
pub trait Store: Send + Sync {
	/// Prefix-match query over one record's field names. Returns a non-zero
	/// cursor when the result was truncated by `max_fields`/`max_bytes`;
	/// callers fetch the remainder with per-field gets.
	async fn find_job_fields(
		&self,
		job_key: &str,
		pattern: &str,
		max_fields: usize,
		max_bytes: usize,
	) -> Result<(u64, HashMap<String, String>)>;

	/// Atomic multi-field set. Creates the record when absent.
	async fn set_fields(&self, job_key: &str, fields: HashMap<String, String>) -> Result<usize>;

	async fn get_field(&self, job_key: &str, name: &str) -> Result<Option<String>>;

	async fn get_fields(&self, job_key: &str, names: &[String]) -> Result<Vec<Option<String>>>;

	async fn delete_fields(&self, job_key: &str, names: &[String]) -> Result<usize>;

	async fn increment_field_by_float(&self, job_key: &str, name: &str, delta: f64) -> Result<f64>;

	/// Applies document ops to the record's `context` field and returns one
	/// result per op (`Null` for pure mutations, the produced value for
	/// `Get`/`Increment`/`Toggle`/`SetIfNotExists`).
	///
	/// When `marker` is given and the field already exists, nothing is
	/// applied and the results cached in the marker are returned; otherwise
	/// the ops and the marker commit atomically.
	async fn update_context(
		&self,
		job_key: &str,
		ops: &[ContextOp],
		marker: Option<&str>,
	) -> Result<Vec<Value>>;

	async fn exists(&self, job_key: &str) -> Result<bool>;

	async fn delete_job(&self, job_key: &str) -> Result<bool>;
}
