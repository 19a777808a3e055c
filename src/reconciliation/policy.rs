//! Conflict resolution and matching/unmatching rules
use serde::Deserialize;

use crate::error::SyncError;

/// What to do when a delta correlates to more than one local entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolutionAction {
	/// Skip the delta
	#[default]
	Ignore,
	/// Keep the first match
	FirstMatch,
	/// Keep the last match
	LastMatch,
	/// Act on every match
	All,
}

impl ConflictResolutionAction {
	/// Narrow the correlated ids down according to the policy.
	///
	/// Zero or one match is returned unchanged whatever the policy.
	pub fn resolve(self, uid: &str, mut matches: Vec<u64>) -> Result<Vec<u64>, SyncError> {
		if matches.len() <= 1 {
			return Ok(matches);
		}
		match self {
			Self::Ignore => Err(SyncError::CorrelationAmbiguity { uid: uid.to_owned(), matches }),
			Self::FirstMatch => {
				matches.truncate(1);
				Ok(matches)
			}
			Self::LastMatch => Ok(matches.pop().into_iter().collect()),
			Self::All => Ok(matches),
		}
	}
}

/// Action for a create-or-update delta that correlates to local entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingRule {
	/// Do nothing
	Ignore,
	/// Apply the changed mapped attributes and propagate
	#[default]
	Update,
	/// Remove the remote object, keep the link
	Deprovision,
	/// Remove the remote object and the link
	Unassign,
	/// Link the resource without propagating
	Link,
	/// Unlink the resource without removing the remote object
	Unlink,
}

/// Action for a create-or-update delta without local match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchingRule {
	/// Do nothing
	Ignore,
	/// Create locally, link the resource and propagate
	Assign,
	/// Create locally without linking the resource
	#[default]
	Provision,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_disambiguation() {
		let matches = vec![1, 2, 3];
		assert_eq!(ConflictResolutionAction::FirstMatch.resolve("u1", matches.clone()).ok(), Some(vec![1]));
		assert_eq!(ConflictResolutionAction::LastMatch.resolve("u1", matches.clone()).ok(), Some(vec![3]));
		assert_eq!(ConflictResolutionAction::All.resolve("u1", matches.clone()).ok(), Some(vec![1, 2, 3]));
		assert!(matches!(
			ConflictResolutionAction::Ignore.resolve("u1", matches),
			Err(SyncError::CorrelationAmbiguity { matches, .. }) if matches == vec![1, 2, 3]
		));
	}

	#[test]
	fn test_single_match_passes_every_policy() {
		for policy in [
			ConflictResolutionAction::Ignore,
			ConflictResolutionAction::FirstMatch,
			ConflictResolutionAction::LastMatch,
			ConflictResolutionAction::All,
		] {
			assert_eq!(policy.resolve("u1", vec![7]).ok(), Some(vec![7]));
			assert_eq!(policy.resolve("u1", vec![]).ok(), Some(vec![]));
		}
	}
}
