//! Runs propagation tasks against resources
use std::sync::Arc;

use futures::future::join_all;

use super::{ExecStatus, PropagationHandler, PropagationOutcome, PropagationTask};
use crate::{
	collaborators::Context,
	connector::Capability,
	error::PropagationError,
	mapping::MappingPurpose,
	reconciliation::ResourceOperation,
	resource::{PropagationMode, ResourceRegistry},
};

/// Executes the tasks of one entity change.
///
/// Primary tasks run first, one at a time, ordered by resource priority. A
/// failed SYNC primary task stops the run: every task not yet executed is
/// reported as not attempted and the caller gets a
/// [`PropagationError::PrimaryFailed`]. Non-primary tasks never fail the
/// operation; they run sequentially unless parallel execution is enabled.
/// There is no retry at this level.
#[derive(Debug, Clone)]
pub struct PropagationExecutor {
	/// Known resources
	resources: Arc<ResourceRegistry>,
	/// Run non-primary tasks concurrently
	parallel_non_primary: bool,
	/// Report every task as not attempted without calling any connector
	dry_run: bool,
}

impl PropagationExecutor {
	/// Sequential, non dry-run executor
	#[must_use]
	pub fn new(resources: Arc<ResourceRegistry>) -> Self {
		Self { resources, parallel_non_primary: false, dry_run: false }
	}

	/// Run non-primary tasks concurrently
	#[must_use]
	pub fn with_parallel_non_primary(mut self, parallel: bool) -> Self {
		self.parallel_non_primary = parallel;
		self
	}

	/// Skip every connector call
	#[must_use]
	pub fn with_dry_run(mut self, dry_run: bool) -> Self {
		self.dry_run = dry_run;
		self
	}

	/// Execute all tasks of one entity change, reporting each to `handler`
	pub async fn execute(
		&self,
		ctx: &Context,
		tasks: Vec<PropagationTask>,
		handler: &dyn PropagationHandler,
	) -> Result<(), PropagationError> {
		let (mut primary, non_primary): (Vec<_>, Vec<_>) =
			tasks.into_iter().partition(|task| task.primary);
		primary.sort_by_key(|task| task.priority);

		let mut pending = primary.into_iter();
		while let Some(task) = pending.next() {
			let outcome = self.execute_task(ctx, &task).await;
			handler.handle(&task, &outcome);

			if outcome.status == ExecStatus::Failure && task.mode == PropagationMode::Sync {
				let message = outcome.message.unwrap_or_default();
				tracing::error!(
					run_id = %ctx.run_id,
					"Propagation of {} to primary resource {} failed, aborting: {}",
					task.subject_name,
					task.resource,
					message
				);
				let skipped = format!("primary resource `{}` failed", task.resource);
				for remaining in pending.chain(non_primary) {
					handler.handle(&remaining, &PropagationOutcome::not_attempted(skipped.clone()));
				}
				return Err(PropagationError::PrimaryFailed { resource: task.resource, message });
			}
		}

		if self.parallel_non_primary {
			join_all(non_primary.iter().map(|task| async move {
				let outcome = self.execute_task(ctx, task).await;
				handler.handle(task, &outcome);
			}))
			.await;
		} else {
			for task in &non_primary {
				let outcome = self.execute_task(ctx, task).await;
				handler.handle(task, &outcome);
			}
		}

		Ok(())
	}

	/// Probe the remote object, pick the operation and run it
	async fn execute_task(&self, ctx: &Context, task: &PropagationTask) -> PropagationOutcome {
		if self.dry_run {
			return PropagationOutcome::not_attempted("dry run");
		}

		let outcome = self.try_execute_task(task).await;
		match (outcome.status, task.mode) {
			(ExecStatus::Failure, PropagationMode::Async) => tracing::warn!(
				run_id = %ctx.run_id,
				"Asynchronous propagation of {} to {} failed: {}",
				task.subject_name,
				task.resource,
				outcome.message.as_deref().unwrap_or_default()
			),
			(status, _) => tracing::info!(
				run_id = %ctx.run_id,
				"Propagation of {} to {} ({:?}): {}",
				task.subject_name,
				task.resource,
				outcome.executed,
				status
			),
		}
		outcome
	}

	/// Execution without logging
	async fn try_execute_task(&self, task: &PropagationTask) -> PropagationOutcome {
		let failure = |message: String| PropagationOutcome {
			status: ExecStatus::Failure,
			executed: task.operation,
			attempted: true,
			message: Some(message),
			before: None,
		};

		let resource = match self.resources.get(&task.resource) {
			Ok(resource) => resource,
			Err(error) => return failure(error.to_string()),
		};
		let mapping = match resource.mapping(task.subject_type) {
			Ok(mapping) => mapping,
			Err(error) => return failure(error.to_string()),
		};
		let connector = &resource.connector;
		let options = mapping.operation_options(MappingPurpose::Propagation);

		let probe_uid = task.old_account_id.as_ref().unwrap_or(&task.account_id);
		let before = match connector.probe_object(&task.object_class, probe_uid, &options).await {
			Ok(before) => before,
			Err(error) => return failure(error.to_string()),
		};

		let (executed, capability) = match (task.operation, &before) {
			(ResourceOperation::None, _) => {
				return PropagationOutcome {
					status: ExecStatus::Success,
					executed: ResourceOperation::None,
					attempted: false,
					message: None,
					before,
				};
			}
			(ResourceOperation::Delete, None) => {
				return PropagationOutcome {
					status: ExecStatus::Success,
					executed: ResourceOperation::None,
					attempted: false,
					message: Some("object not found on resource, nothing to delete".to_owned()),
					before,
				};
			}
			(ResourceOperation::Delete, Some(_)) => (ResourceOperation::Delete, Capability::Delete),
			(_, None) => (ResourceOperation::Create, Capability::Create),
			(_, Some(_)) => (ResourceOperation::Update, Capability::Update),
		};

		if !connector.capabilities().contains(&capability) {
			return PropagationOutcome {
				status: ExecStatus::NotAttempted,
				executed,
				attempted: false,
				message: Some(format!("{capability:?} is not enabled on `{}`", resource.name)),
				before,
			};
		}

		let result = match (executed, &before) {
			(ResourceOperation::Delete, Some(object)) => {
				connector.delete(&task.object_class, &object.uid, &options).await
			}
			(ResourceOperation::Update, Some(object)) => connector
				.update(&task.object_class, &object.uid, task.attributes.clone(), &options)
				.await
				.map(drop),
			_ => connector
				.create(&task.object_class, task.attributes.clone(), &options)
				.await
				.map(drop),
		};

		match result {
			Ok(()) => PropagationOutcome {
				status: ExecStatus::Success,
				executed,
				attempted: true,
				message: None,
				before,
			},
			Err(error) => PropagationOutcome {
				status: ExecStatus::Failure,
				executed,
				attempted: true,
				message: Some(error.to_string()),
				before,
			},
		}
	}
}
