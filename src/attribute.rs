//! Attribute value helpers shared by connectors, mappings and entities
use std::{collections::BTreeMap, fmt::Display};

use base64::prelude::{Engine, BASE64_STANDARD};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// A named set of multi-valued attributes.
///
/// Ordered so that payloads, diffs and reports come out the same way on
/// every run.
pub type AttributeSet = BTreeMap<String, Vec<AttributeValue>>;

/// A single attribute value, either text or raw bytes
#[derive(Clone, Debug, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
	/// A string
	String(String),
	/// A byte string
	Bytes(Vec<u8>),
}

impl AttributeValue {
	/// Borrow the value as a string, if it is valid UTF-8
	#[must_use]
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(value) => Some(value),
			Self::Bytes(value) => std::str::from_utf8(value).ok(),
		}
	}

	/// Borrow the raw bytes of the value
	#[must_use]
	pub fn as_bytes(&self) -> &[u8] {
		match self {
			Self::String(value) => value.as_bytes(),
			Self::Bytes(value) => value,
		}
	}

	/// The value as text; only bytes that are not UTF-8 come out as base64
	#[must_use]
	pub fn to_text(&self) -> String {
		self.as_str().map_or_else(|| self.to_string(), ToOwned::to_owned)
	}
}

impl PartialEq for AttributeValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(Self::String(s), Self::String(o)) => s == o,
			(Self::String(s), Self::Bytes(o)) => s.as_bytes() == o,
			(Self::Bytes(s), Self::String(o)) => s == o.as_bytes(),
			(Self::Bytes(s), Self::Bytes(o)) => s == o,
		}
	}
}

impl Display for AttributeValue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			AttributeValue::String(value) => write!(f, "{}", value),
			AttributeValue::Bytes(value) => write!(f, "{}", BASE64_STANDARD.encode(value)),
		}
	}
}

impl From<String> for AttributeValue {
	fn from(value: String) -> Self {
		Self::String(value)
	}
}

impl From<&str> for AttributeValue {
	fn from(value: &str) -> Self {
		Self::String(value.to_owned())
	}
}

impl From<Vec<u8>> for AttributeValue {
	fn from(value: Vec<u8>) -> Self {
		Self::Bytes(value)
	}
}

/// Compare two value lists ignoring order, but not multiplicity.
///
/// Directories rarely preserve the order of multi-valued attributes, so a
/// reordering alone must not count as a change.
#[must_use]
pub fn same_values(left: &[AttributeValue], right: &[AttributeValue]) -> bool {
	left.len() == right.len()
		&& left.iter().map(AttributeValue::as_bytes).counts()
			== right.iter().map(AttributeValue::as_bytes).counts()
}

/// Read the first value of an attribute as text
#[must_use]
pub fn first_string(attributes: &AttributeSet, name: &str) -> Option<String> {
	attributes.get(name).and_then(|values| values.first()).map(AttributeValue::to_text)
}
