use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use super::{ContextOp, ContextVerb, Store};
use crate::job::{self, Slot};

/// In-process store driver: one HASH-shaped record per job key. Every method
/// runs under one lock, which gives the same atomicity the contract demands
/// from real providers.
#[derive(Default)]
pub struct MemoryStore {
	jobs: Mutex<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryStore {
	pub fn new() -> Self {
		MemoryStore::default()
	}
}

#[async_trait]
impl Store for MemoryStore {
	async fn find_job_fields(
		&self,
		job_key: &str,
		pattern: &str,
		max_fields: usize,
		max_bytes: usize,
	) -> Result<(u64, HashMap<String, String>)> {
		let jobs = self.jobs.lock().unwrap();
		let Some(record) = jobs.get(job_key) else {
			return Ok((0, HashMap::new()));
		};

		let mut out = HashMap::new();
		let mut bytes = 0usize;
		let mut cursor = 0u64;

		for (name, value) in record {
			if !glob_match(pattern, name) {
				continue;
			}

			if out.len() >= max_fields || bytes + name.len() + value.len() > max_bytes {
				cursor = out.len() as u64;
				break;
			}

			bytes += name.len() + value.len();
			out.insert(name.clone(), value.clone());
		}

		Ok((cursor, out))
	}

	async fn set_fields(&self, job_key: &str, fields: HashMap<String, String>) -> Result<usize> {
		let mut jobs = self.jobs.lock().unwrap();
		let record = jobs.entry(job_key.to_string()).or_default();

		let count = fields.len();
		for (name, value) in fields {
			record.insert(name, value);
		}

		Ok(count)
	}

	async fn get_field(&self, job_key: &str, name: &str) -> Result<Option<String>> {
		let jobs = self.jobs.lock().unwrap();

		Ok(jobs.get(job_key).and_then(|record| record.get(name)).cloned())
	}

	async fn get_fields(&self, job_key: &str, names: &[String]) -> Result<Vec<Option<String>>> {
		let jobs = self.jobs.lock().unwrap();
		let record = jobs.get(job_key);

		Ok(names
			.iter()
			.map(|name| record.and_then(|r| r.get(name)).cloned())
			.collect())
	}

	async fn delete_fields(&self, job_key: &str, names: &[String]) -> Result<usize> {
		let mut jobs = self.jobs.lock().unwrap();
		let Some(record) = jobs.get_mut(job_key) else {
			return Ok(0);
		};

		Ok(names
			.iter()
			.filter(|name| record.remove(*name).is_some())
			.count())
	}

	async fn increment_field_by_float(&self, job_key: &str, name: &str, delta: f64) -> Result<f64> {
		let mut jobs = self.jobs.lock().unwrap();
		let record = jobs.entry(job_key.to_string()).or_default();

		let current = match record.get(name) {
			Some(raw) => match raw.parse::<f64>() {
				Ok(v) => v,
				Err(_) => bail!("field {name} holds a non-numeric value"),
			},
			None => 0.0,
		};

		let next = current + delta;
		record.insert(name.to_string(), next.to_string());

		Ok(next)
	}

	async fn update_context(
		&self,
		job_key: &str,
		ops: &[ContextOp],
		marker: Option<&str>,
	) -> Result<Vec<Value>> {
		let mut jobs = self.jobs.lock().unwrap();
		let record = jobs.entry(job_key.to_string()).or_default();

		// Replayed mutation: serve the results cached in the marker
		if let Some(marker) = marker {
			if let Some(raw) = record.get(marker) {
				let slot = Slot::decode(raw)?;
				let results = match slot.data {
					Some(Value::Array(items)) => items,
					_ => Vec::new(),
				};

				return Ok(results);
			}
		}

		let mut doc = record
			.get(job::fields::CONTEXT)
			.map(|raw| serde_json::from_str(raw))
			.transpose()?
			.unwrap_or_else(|| json!({}));

		let results = ops
			.iter()
			.map(|op| apply_op(&mut doc, op))
			.collect::<Vec<_>>();

		record.insert(job::fields::CONTEXT.to_string(), doc.to_string());
		if let Some(marker) = marker {
			record.insert(
				marker.to_string(),
				Slot::data(Value::Array(results.clone())).encode(),
			);
		}

		Ok(results)
	}

	async fn exists(&self, job_key: &str) -> Result<bool> {
		let jobs = self.jobs.lock().unwrap();

		Ok(jobs.contains_key(job_key))
	}

	async fn delete_job(&self, job_key: &str) -> Result<bool> {
		let mut jobs = self.jobs.lock().unwrap();

		Ok(jobs.remove(job_key).is_some())
	}
}

fn apply_op(doc: &mut Value, op: &ContextOp) -> Value {
	let operand = op.value.clone().unwrap_or(Value::Null);

	match op.verb {
		ContextVerb::Set => {
			set_path(doc, &op.path, operand);
			Value::Null
		}
		ContextVerb::Merge => {
			let target = ensure_path(doc, &op.path);
			deep_merge(target, operand);
			Value::Null
		}
		ContextVerb::Get => lookup_path(doc, &op.path).cloned().unwrap_or(Value::Null),
		ContextVerb::Delete => {
			delete_path(doc, &op.path);
			Value::Null
		}
		ContextVerb::Append => {
			let arr = ensure_array(doc, &op.path);
			arr.push(operand);
			Value::Null
		}
		ContextVerb::Prepend => {
			let arr = ensure_array(doc, &op.path);
			arr.insert(0, operand);
			Value::Null
		}
		ContextVerb::Remove => {
			let arr = ensure_array(doc, &op.path);
			let removed = match arr.iter().position(|item| *item == operand) {
				Some(pos) => {
					arr.remove(pos);
					1
				}
				None => 0,
			};
			json!(removed)
		}
		ContextVerb::Increment => {
			let delta = operand.as_f64().unwrap_or(0.0);
			let target = ensure_path(doc, &op.path);
			let next = target.as_f64().unwrap_or(0.0) + delta;
			*target = json!(next);
			json!(next)
		}
		ContextVerb::Toggle => {
			let target = ensure_path(doc, &op.path);
			let next = !target.as_bool().unwrap_or(false);
			*target = Value::Bool(next);
			Value::Bool(next)
		}
		ContextVerb::SetIfNotExists => {
			let existing = lookup_path(doc, &op.path).map(|v| !v.is_null()).unwrap_or(false);
			if !existing {
				set_path(doc, &op.path, operand);
			}
			Value::Bool(!existing)
		}
	}
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
	path.split('.').filter(|s| !s.is_empty())
}

fn lookup_path<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
	let mut current = doc;
	for seg in segments(path) {
		current = current.as_object()?.get(seg)?;
	}

	Some(current)
}

/// Walks to `path`, materializing intermediate objects. Non-object values on
/// the way are replaced.
fn ensure_path<'a>(doc: &'a mut Value, path: &str) -> &'a mut Value {
	let mut current = doc;
	for seg in segments(path) {
		if !current.is_object() {
			*current = json!({});
		}
		current = current
			.as_object_mut()
			.map(|map| map.entry(seg.to_string()).or_insert(Value::Null))
			.unwrap_or_else(|| unreachable!("object materialized above"))
	}

	current
}

fn ensure_array<'a>(doc: &'a mut Value, path: &str) -> &'a mut Vec<Value> {
	let target = ensure_path(doc, path);
	if !target.is_array() {
		*target = json!([]);
	}

	match target {
		Value::Array(arr) => arr,
		_ => unreachable!("array materialized above"),
	}
}

fn set_path(doc: &mut Value, path: &str, value: Value) {
	if segments(path).next().is_none() {
		*doc = value;
		return;
	}

	*ensure_path(doc, path) = value;
}

fn delete_path(doc: &mut Value, path: &str) {
	let segs = segments(path).collect::<Vec<_>>();
	let Some((last, parents)) = segs.split_last() else {
		*doc = json!({});
		return;
	};

	let mut current = doc;
	for seg in parents {
		match current.as_object_mut().and_then(|map| map.get_mut(*seg)) {
			Some(next) => current = next,
			None => return,
		}
	}

	if let Some(map) = current.as_object_mut() {
		map.remove(*last);
	}
}

fn deep_merge(target: &mut Value, incoming: Value) {
	match (target, incoming) {
		(Value::Object(target), Value::Object(incoming)) => {
			for (k, v) in incoming {
				match target.get_mut(&k) {
					Some(existing) => deep_merge(existing, v),
					None => {
						target.insert(k, v);
					}
				}
			}
		}
		(target, incoming) => *target = incoming,
	}
}

/// Field-name matcher: `*` matches any run of characters, everything else is
/// literal.
pub(crate) fn glob_match(pattern: &str, name: &str) -> bool {
	let p: Vec<char> = pattern.chars().collect();
	let n: Vec<char> = name.chars().collect();

	let (mut pi, mut ni) = (0usize, 0usize);
	let mut star: Option<(usize, usize)> = None;

	while ni < n.len() {
		if pi < p.len() && (p[pi] == n[ni]) {
			pi += 1;
			ni += 1;
		} else if pi < p.len() && p[pi] == '*' {
			star = Some((pi, ni));
			pi += 1;
		} else if let Some((sp, sn)) = star {
			pi = sp + 1;
			ni = sn + 1;
			star = Some((sp, sn + 1));
		} else {
			return false;
		}
	}

	while pi < p.len() && p[pi] == '*' {
		pi += 1;
	}

	pi == p.len()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::job::replay_pattern;

	#[test]
	fn glob_matches_replay_patterns() {
		assert!(glob_match(&replay_pattern(""), "-proxy-1-"));
		assert!(glob_match(&replay_pattern(""), "-sleep,0-3-"));
		assert!(glob_match(&replay_pattern(",0"), "-wait,0-2-"));
		assert!(!glob_match(&replay_pattern(",0"), "-wait-2-"));
		assert!(!glob_match(&replay_pattern(""), "context"));
		assert!(!glob_match(&replay_pattern(""), "_customer"));
	}

	#[tokio::test]
	async fn find_caps_and_cursors() {
		let store = MemoryStore::new();
		let fields = (0..10)
			.map(|i| (format!("-proxy-{i}-"), "{}".to_string()))
			.collect();
		store.set_fields("ns:job", fields).await.unwrap();

		let (cursor, found) = store
			.find_job_fields("ns:job", "-*-*", 4, usize::MAX)
			.await
			.unwrap();
		assert_eq!(found.len(), 4);
		assert_ne!(cursor, 0);

		let (cursor, found) = store
			.find_job_fields("ns:job", "-*-*", 100, usize::MAX)
			.await
			.unwrap();
		assert_eq!(found.len(), 10);
		assert_eq!(cursor, 0);
	}

	#[tokio::test]
	async fn context_ops_apply_jsonb_semantics() {
		let store = MemoryStore::new();

		store
			.update_context(
				"ns:job",
				&[
					ContextOp::new(ContextVerb::Merge, "", Some(json!({"a": 1}))),
					ContextOp::new(ContextVerb::Merge, "", Some(json!({"b": {"c": 2}}))),
					ContextOp::new(ContextVerb::Append, "tags", Some(json!("x"))),
					ContextOp::new(ContextVerb::Prepend, "tags", Some(json!("y"))),
				],
				None,
			)
			.await
			.unwrap();

		let results = store
			.update_context(
				"ns:job",
				&[
					ContextOp::new(ContextVerb::Increment, "b.c", Some(json!(3))),
					ContextOp::new(ContextVerb::Toggle, "flag", None),
					ContextOp::new(ContextVerb::Get, "", None),
				],
				None,
			)
			.await
			.unwrap();

		assert_eq!(results[0], json!(5.0));
		assert_eq!(results[1], json!(true));
		assert_eq!(
			results[2],
			json!({"a": 1, "b": {"c": 5.0}, "tags": ["y", "x"], "flag": true})
		);
	}

	#[tokio::test]
	async fn marked_mutations_apply_once() {
		let store = MemoryStore::new();
		let ops = [ContextOp::new(
			ContextVerb::Increment,
			"count",
			Some(json!(2)),
		)];

		let first = store
			.update_context("ns:job", &ops, Some("-entity-1.1-"))
			.await
			.unwrap();
		let replayed = store
			.update_context("ns:job", &ops, Some("-entity-1.1-"))
			.await
			.unwrap();

		assert_eq!(first, vec![json!(2.0)]);
		assert_eq!(replayed, vec![json!(2.0)]);

		let results = store
			.update_context(
				"ns:job",
				&[ContextOp::new(ContextVerb::Get, "count", None)],
				None,
			)
			.await
			.unwrap();
		assert_eq!(results[0], json!(2.0));
	}

	#[tokio::test]
	async fn float_increments_accumulate() {
		let store = MemoryStore::new();

		let v = store
			.increment_field_by_float("ns:job", "_score", 1.5)
			.await
			.unwrap();
		assert_eq!(v, 1.5);

		let v = store
			.increment_field_by_float("ns:job", "_score", 2.25)
			.await
			.unwrap();
		assert_eq!(v, 3.75);
	}
}
