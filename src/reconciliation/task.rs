//! Sync task definitions
use serde::Deserialize;

use super::{
	policy::{ConflictResolutionAction, MatchingRule, UnmatchingRule},
	report::TraceLevel,
};
use crate::entity::SubjectType;

/// How far a failing before-hook reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookErrorScope {
	/// Record a failure for the current delta and carry on
	#[default]
	Delta,
	/// Abort the whole run
	Run,
}

/// One configured reconciliation of a resource into the local repository
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SyncTask {
	/// Unique task name, also the key of its sync token
	pub name: String,
	/// Resource to pull from
	pub resource: String,
	/// Kind of local entity the resource objects become
	pub subject_type: SubjectType,
	/// Action for correlated deltas
	#[serde(default)]
	pub matching_rule: MatchingRule,
	/// Action for uncorrelated deltas
	#[serde(default)]
	pub unmatching_rule: UnmatchingRule,
	/// Choice among several correlated entities
	#[serde(default)]
	pub conflict_policy: ConflictResolutionAction,
	/// Read every object instead of the changes since the last token
	#[serde(default)]
	pub full_reconciliation: bool,
	/// Run every step without touching anything
	#[serde(default)]
	pub dry_run: bool,
	/// Verbosity of the run report
	#[serde(default)]
	pub trace_level: TraceLevel,
	/// How far a failing before-hook reaches
	#[serde(default)]
	pub hook_error_scope: HookErrorScope,
	/// Whether local entities may be created
	#[serde(default = "default_true")]
	pub perform_create: bool,
	/// Whether local entities may be updated, linked or unlinked
	#[serde(default = "default_true")]
	pub perform_update: bool,
	/// Whether local entities may be deleted
	#[serde(default = "default_true")]
	pub perform_delete: bool,
}

/// Serde default helper
fn default_true() -> bool {
	true
}

impl SyncTask {
	/// A task with default rules for the resource
	pub fn new(name: impl Into<String>, resource: impl Into<String>, subject_type: SubjectType) -> Self {
		Self {
			name: name.into(),
			resource: resource.into(),
			subject_type,
			matching_rule: MatchingRule::default(),
			unmatching_rule: UnmatchingRule::default(),
			conflict_policy: ConflictResolutionAction::default(),
			full_reconciliation: false,
			dry_run: false,
			trace_level: TraceLevel::default(),
			hook_error_scope: HookErrorScope::default(),
			perform_create: true,
			perform_update: true,
			perform_delete: true,
		}
	}
}
