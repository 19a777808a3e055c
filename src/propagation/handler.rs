//! Receivers of propagation outcomes
use std::sync::{Mutex, PoisonError};

use super::{PropagationOutcome, PropagationStatus, PropagationTask};

/// Receives the outcome of every task the executor handles, including the
/// ones it never attempted
pub trait PropagationHandler: Send + Sync {
	/// Called once per task; may be called concurrently
	fn handle(&self, task: &PropagationTask, outcome: &PropagationOutcome);
}

/// Collects a [`PropagationStatus`] per task, safe for concurrent writers
#[derive(Debug, Default)]
pub struct StatusCollector {
	/// Collected statuses in completion order
	statuses: Mutex<Vec<PropagationStatus>>,
}

impl StatusCollector {
	/// An empty collector
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Copy of the statuses collected so far
	#[must_use]
	pub fn statuses(&self) -> Vec<PropagationStatus> {
		self.statuses.lock().unwrap_or_else(PoisonError::into_inner).clone()
	}

	/// Consume the collector
	#[must_use]
	pub fn into_statuses(self) -> Vec<PropagationStatus> {
		self.statuses.into_inner().unwrap_or_else(PoisonError::into_inner)
	}
}

impl PropagationHandler for StatusCollector {
	fn handle(&self, task: &PropagationTask, outcome: &PropagationOutcome) {
		let status = PropagationStatus {
			resource: task.resource.clone(),
			status: outcome.status,
			message: outcome.message.clone(),
		};
		self.statuses.lock().unwrap_or_else(PoisonError::into_inner).push(status);
	}
}
