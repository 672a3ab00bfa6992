use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque identifier for signals, workers, and generated job names.
///
/// Rendered as 32 lowercase hex chars so ids can be embedded in record field
/// names and pub/sub subjects without separator collisions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id(Uuid);

impl Id {
	pub fn new() -> Self {
		Id(Uuid::new_v4())
	}

	pub fn nil() -> Self {
		Id(Uuid::nil())
	}
}

impl Default for Id {
	fn default() -> Self {
		Id::new()
	}
}

impl fmt::Display for Id {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0.simple())
	}
}

impl fmt::Debug for Id {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Id({})", self.0.simple())
	}
}

impl FromStr for Id {
	type Err = uuid::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Ok(Id(Uuid::parse_str(s)?))
	}
}

/// Shorthand for a fresh id rendered to a string.
pub fn guid() -> String {
	Id::new().to_string()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn renders_without_hyphens() {
		let id = Id::new().to_string();
		assert_eq!(id.len(), 32);
		assert!(!id.contains('-'));
	}

	#[test]
	fn round_trips_through_str() {
		let id = Id::new();
		assert_eq!(id, id.to_string().parse::<Id>().unwrap());
	}
}
