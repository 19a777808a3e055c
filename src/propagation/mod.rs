//! Push direction: local entity changes written out to resources.
//!
//! A [`PropagationManager`] turns an entity change into per-resource
//! [`PropagationTask`]s, and the [`PropagationExecutor`] runs them primary
//! first, reporting every outcome to a [`PropagationHandler`].

use std::fmt::Display;

use crate::{
	attribute::AttributeSet,
	connector::{ConnectorObject, Uid},
	entity::SubjectType,
	reconciliation::ResourceOperation,
	resource::PropagationMode,
};

mod executor;
mod handler;
mod manager;

pub use executor::PropagationExecutor;
pub use handler::{PropagationHandler, StatusCollector};
pub use manager::PropagationManager;

/// One write to one resource for one entity change
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationTask {
	/// Kind of the entity being propagated
	pub subject_type: SubjectType,
	/// Local id of the entity
	pub subject_id: u64,
	/// Name of the entity, for logs
	pub subject_name: String,
	/// Target resource
	pub resource: String,
	/// Remote object class
	pub object_class: String,
	/// Requested operation
	pub operation: ResourceOperation,
	/// Remote identifier after the change
	pub account_id: Uid,
	/// Remote identifier before the change, when it was renamed
	pub old_account_id: Option<Uid>,
	/// Attributes to write
	pub attributes: AttributeSet,
	/// Whether the caller waits for this task
	pub mode: PropagationMode,
	/// Whether a failure fails the whole entity operation
	pub primary: bool,
	/// Order among primary tasks, lowest first
	pub priority: u32,
}

/// Final state of a propagation task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecStatus {
	/// The resource accepted the write
	Success,
	/// The resource rejected the write or could not be reached
	Failure,
	/// The task was never sent to the resource
	NotAttempted,
}

impl Display for ExecStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Success => write!(f, "SUCCESS"),
			Self::Failure => write!(f, "FAILURE"),
			Self::NotAttempted => write!(f, "NOT_ATTEMPTED"),
		}
	}
}

/// What happened when a task was handled
#[derive(Debug, Clone, PartialEq)]
pub struct PropagationOutcome {
	/// Final state
	pub status: ExecStatus,
	/// Operation actually sent, after the existence probe
	pub executed: ResourceOperation,
	/// Whether the connector was asked to write at all
	pub attempted: bool,
	/// Failure or skip reason
	pub message: Option<String>,
	/// The remote object before the write, if it existed
	pub before: Option<ConnectorObject>,
}

impl PropagationOutcome {
	/// An outcome for a task that never reached the connector
	pub fn not_attempted(message: impl Into<String>) -> Self {
		Self {
			status: ExecStatus::NotAttempted,
			executed: ResourceOperation::None,
			attempted: false,
			message: Some(message.into()),
			before: None,
		}
	}
}

/// Caller visible status of one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationStatus {
	/// Resource name
	pub resource: String,
	/// Final state
	pub status: ExecStatus,
	/// Failure or skip reason
	pub message: Option<String>,
}
