use std::time::Duration;

use crate::error::{WorkflowError, WorkflowResult};

/// Converts timer inputs to whole seconds. Implemented for [`Duration`] and
/// for `"500ms"` / `"5s"` / `"2m"` / `"1h"` / `"3d"` / `"1w"` strings; a bare
/// number is taken as seconds. Sub-second inputs truncate to zero, which the
/// scheduler treats as an immediate re-dispatch.
pub trait DurationToSecs {
	fn to_secs(&self) -> WorkflowResult<u64>;
}

impl DurationToSecs for Duration {
	fn to_secs(&self) -> WorkflowResult<u64> {
		Ok(self.as_secs())
	}
}

impl DurationToSecs for u64 {
	fn to_secs(&self) -> WorkflowResult<u64> {
		Ok(*self)
	}
}

impl DurationToSecs for &str {
	fn to_secs(&self) -> WorkflowResult<u64> {
		parse_duration(self).map(|d| d.as_secs())
	}
}

impl DurationToSecs for String {
	fn to_secs(&self) -> WorkflowResult<u64> {
		self.as_str().to_secs()
	}
}

impl DurationToSecs for &String {
	fn to_secs(&self) -> WorkflowResult<u64> {
		self.as_str().to_secs()
	}
}

impl DurationToSecs for &Duration {
	fn to_secs(&self) -> WorkflowResult<u64> {
		Ok(self.as_secs())
	}
}

fn parse_duration(raw: &str) -> WorkflowResult<Duration> {
	let raw = raw.trim();
	let split = raw
		.find(|c: char| !c.is_ascii_digit() && c != '.')
		.unwrap_or(raw.len());
	let (num, unit) = raw.split_at(split);

	let value = num
		.parse::<f64>()
		.map_err(|_| WorkflowError::InvalidDuration(raw.to_string()))?;

	let unit_secs = match unit.trim() {
		"ms" => 0.001,
		"s" | "" => 1.0,
		"m" => 60.0,
		"h" => 3600.0,
		"d" => 86_400.0,
		"w" => 604_800.0,
		_ => return Err(WorkflowError::InvalidDuration(raw.to_string())),
	};

	Ok(Duration::from_secs_f64(value * unit_secs))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_unit_suffixes() {
		assert_eq!("5s".to_secs().unwrap(), 5);
		assert_eq!("0s".to_secs().unwrap(), 0);
		assert_eq!("2m".to_secs().unwrap(), 120);
		assert_eq!("1h".to_secs().unwrap(), 3600);
		assert_eq!("1d".to_secs().unwrap(), 86_400);
		assert_eq!("1w".to_secs().unwrap(), 604_800);
		assert_eq!("1.5m".to_secs().unwrap(), 90);
		assert_eq!("90".to_secs().unwrap(), 90);
	}

	#[test]
	fn sub_second_truncates_to_zero() {
		assert_eq!("500ms".to_secs().unwrap(), 0);
		assert_eq!(Duration::from_millis(999).to_secs().unwrap(), 0);
	}

	#[test]
	fn rejects_garbage() {
		assert!("soon".to_secs().is_err());
		assert!("5parsecs".to_secs().is_err());
		assert!("".to_secs().is_err());
	}
}
