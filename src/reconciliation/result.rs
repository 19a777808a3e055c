//! Outcomes of reconciliation and the per-run profile
use std::{fmt::Display, sync::Arc};

use super::{actions::SyncActions, task::SyncTask};
use crate::{connector::Connector, entity::SubjectType, propagation::PropagationStatus};

/// Operation performed on an entity or resource object
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceOperation {
	/// Created
	Create,
	/// Updated
	Update,
	/// Deleted
	Delete,
	/// Nothing, or only a link change
	None,
}

impl Display for ResourceOperation {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Create => write!(f, "CREATE"),
			Self::Update => write!(f, "UPDATE"),
			Self::Delete => write!(f, "DELETE"),
			Self::None => write!(f, "NONE"),
		}
	}
}

/// Whether the local operation succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResultStatus {
	/// The local repository operation succeeded
	Success,
	/// The local repository operation failed
	Failure,
}

/// Outcome of handling one delta for one local entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
	/// What was done
	pub operation: ResourceOperation,
	/// Whether it worked
	pub status: ResultStatus,
	/// Kind of entity
	pub subject_type: SubjectType,
	/// Local id; 0 for entities that were not (or only pretend to be) created
	pub id: u64,
	/// Entity name
	pub name: String,
	/// Failure message
	pub message: Option<String>,
}

impl SyncResult {
	/// A successful result
	pub fn success(
		operation: ResourceOperation,
		subject_type: SubjectType,
		id: u64,
		name: impl Into<String>,
	) -> Self {
		Self {
			operation,
			status: ResultStatus::Success,
			subject_type,
			id,
			name: name.into(),
			message: None,
		}
	}

	/// Turn the result into a failure with the given message
	#[must_use]
	pub fn failed(mut self, message: impl Into<String>) -> Self {
		self.status = ResultStatus::Failure;
		self.message = Some(message.into());
		self
	}
}

/// Context of exactly one reconciliation run
pub struct SyncProfile<'a> {
	/// The task being run
	pub task: &'a SyncTask,
	/// Whether the run only pretends
	pub dry_run: bool,
	/// Connector of the reconciled resource
	pub connector: Arc<dyn Connector>,
	/// Registered sync actions, in invocation order
	pub actions: &'a [Arc<dyn SyncActions>],
	/// Results accumulated so far
	pub results: Vec<SyncResult>,
	/// Statuses of propagation triggered by the run
	pub propagation: Vec<PropagationStatus>,
}

impl std::fmt::Debug for SyncProfile<'_> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SyncProfile")
			.field("task", &self.task.name)
			.field("dry_run", &self.dry_run)
			.field("connector", &self.connector.name())
			.field("actions", &self.actions.len())
			.field("results", &self.results)
			.finish_non_exhaustive()
	}
}
