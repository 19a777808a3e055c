//! The reconciliation run loop
use std::sync::Arc;

use anyhow::Context as _;
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};

use super::{report, SyncActions, SyncProfile, SyncResult, SyncTask};
use crate::{
	collaborators::{
		AccountIdCorrelation, AuditSink, Context, CorrelationRule, EntityRepository, NoopSink,
		NotificationSink, WorkflowAdapter,
	},
	connector::SyncToken,
	error::SyncError,
	mapping::MappingPurpose,
	propagation::{PropagationExecutor, PropagationManager, PropagationStatus},
	resource::ResourceRegistry,
	token_store::TokenStore,
};

/// Default number of deltas buffered between connector and engine
pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// What a finished run hands back
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
	/// Name of the task that ran
	pub task: String,
	/// One result per handled entity, in processing order
	pub results: Vec<SyncResult>,
	/// Statuses of all propagation the run triggered
	pub propagation: Vec<PropagationStatus>,
	/// Text report at the task's trace level
	pub report: String,
	/// Token persisted at the end of the run, if any
	pub persisted_token: Option<SyncToken>,
}

/// Pulls deltas from a resource and reconciles them into the local
/// repository.
///
/// One run processes its delta stream strictly in order on the calling task.
/// Serializing runs of the same sync task is up to the scheduler.
pub struct ReconciliationEngine {
	/// Known resources
	pub(super) resources: Arc<ResourceRegistry>,
	/// Read access to local entities
	pub(super) repository: Arc<dyn EntityRepository>,
	/// Entity lifecycle requests
	pub(super) workflow: Arc<dyn WorkflowAdapter>,
	/// Delta to local entity correlation
	pub(super) correlation: Arc<dyn CorrelationRule>,
	/// Sync token persistence
	pub(super) tokens: Arc<dyn TokenStore>,
	/// Audit side channel
	pub(super) audit: Arc<dyn AuditSink>,
	/// Notification side channel
	pub(super) notifications: Arc<dyn NotificationSink>,
	/// Builds propagation tasks
	pub(super) manager: PropagationManager,
	/// Runs propagation tasks
	pub(super) executor: PropagationExecutor,
	/// Registered extensions, in invocation order
	pub(super) actions: Vec<Arc<dyn SyncActions>>,
	/// Force every run into dry-run mode
	pub(super) dry_run: bool,
	/// Delta buffer size
	pub(super) channel_capacity: usize,
}

impl std::fmt::Debug for ReconciliationEngine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ReconciliationEngine")
			.field("resources", &self.resources)
			.field("actions", &self.actions.len())
			.field("dry_run", &self.dry_run)
			.field("channel_capacity", &self.channel_capacity)
			.finish_non_exhaustive()
	}
}

impl ReconciliationEngine {
	/// Create an engine correlating on account ids, without side channels
	/// or extensions
	pub fn new(
		resources: Arc<ResourceRegistry>,
		repository: Arc<dyn EntityRepository>,
		workflow: Arc<dyn WorkflowAdapter>,
		tokens: Arc<dyn TokenStore>,
	) -> Self {
		Self {
			manager: PropagationManager::new(resources.clone()),
			executor: PropagationExecutor::new(resources.clone()),
			resources,
			repository,
			workflow,
			correlation: Arc::new(AccountIdCorrelation),
			tokens,
			audit: Arc::new(NoopSink),
			notifications: Arc::new(NoopSink),
			actions: Vec::new(),
			dry_run: false,
			channel_capacity: DEFAULT_CHANNEL_CAPACITY,
		}
	}

	/// Use a different correlation rule
	#[must_use]
	pub fn with_correlation(mut self, correlation: Arc<dyn CorrelationRule>) -> Self {
		self.correlation = correlation;
		self
	}

	/// Send every outcome to an audit sink
	#[must_use]
	pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
		self.audit = audit;
		self
	}

	/// Send every outcome to a notification generator
	#[must_use]
	pub fn with_notifications(mut self, notifications: Arc<dyn NotificationSink>) -> Self {
		self.notifications = notifications;
		self
	}

	/// Register an extension after the ones already registered
	#[must_use]
	pub fn with_action(mut self, action: Arc<dyn SyncActions>) -> Self {
		self.actions.push(action);
		self
	}

	/// Run non-primary propagation tasks concurrently
	#[must_use]
	pub fn with_parallel_propagation(mut self, parallel: bool) -> Self {
		self.executor = self.executor.with_parallel_non_primary(parallel);
		self
	}

	/// Force every run into dry-run mode
	#[must_use]
	pub fn with_dry_run(mut self, dry_run: bool) -> Self {
		self.dry_run = dry_run;
		self
	}

	/// Number of deltas buffered between connector and engine
	#[must_use]
	pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
		self.channel_capacity = capacity.max(1);
		self
	}

	/// Run one sync task to completion.
	///
	/// Only fatal problems are returned as errors: a missing mapping (before
	/// any delta is read), a connector failure while pulling, a token store
	/// failure, or a hook failure when the task's hook scope is `run`.
	/// Everything else ends up in the results and the report.
	pub async fn run(&self, ctx: &Context, task: &SyncTask) -> Result<RunSummary, SyncError> {
		let resource = self.resources.get(&task.resource)?;
		let mapping = resource.mapping(task.subject_type)?;
		let dry_run = self.dry_run || task.dry_run;

		tracing::info!(
			run_id = %ctx.run_id,
			"Starting {} of `{}` from {}{}",
			if task.full_reconciliation { "full reconciliation" } else { "synchronization" },
			task.name,
			resource.name,
			if dry_run { " (dry run)" } else { "" }
		);

		let mut profile = SyncProfile {
			task,
			dry_run,
			connector: resource.connector.clone(),
			actions: &self.actions,
			results: Vec::new(),
			propagation: Vec::new(),
		};

		for action in &self.actions {
			action.before_all(&profile).await.map_err(|error| SyncError::Hook {
				hook: "before_all",
				message: format!("{error:#}"),
			})?;
		}

		let object_class = mapping.object_class();
		let options = mapping.operation_options(MappingPurpose::Synchronization);

		// Captured before pulling so changes made while the run is in
		// progress are picked up next time.
		let (stored_token, latest_token) = if task.full_reconciliation {
			(None, None)
		} else {
			let stored = self.tokens.load(&task.name).await.context("failed to load sync token")?;
			let latest = resource.connector.get_latest_sync_token(object_class).await?;
			(stored, latest)
		};

		let (sender, receiver) = mpsc::channel(self.channel_capacity);
		let connector = resource.connector.clone();
		let pull = async {
			if task.full_reconciliation {
				connector.get_all_objects(object_class, &options, sender).await
			} else {
				connector.sync(object_class, stored_token.as_ref(), &options, sender).await
			}
		};
		let consume = async {
			let mut deltas = ReceiverStream::new(receiver);
			while let Some(delta) = deltas.next().await {
				self.handle_delta(ctx, &mut profile, mapping, delta).await?;
			}
			Ok::<(), SyncError>(())
		};
		let (pulled, consumed) = tokio::join!(pull, consume);
		consumed?;
		pulled?;

		for action in &self.actions {
			action.after_all(&profile).await.map_err(|error| SyncError::Hook {
				hook: "after_all",
				message: format!("{error:#}"),
			})?;
		}

		let persisted_token = match latest_token {
			Some(token) if !dry_run => {
				self.tokens
					.store(&task.name, &token)
					.await
					.context("failed to persist sync token")?;
				tracing::debug!(run_id = %ctx.run_id, "Persisted sync token for `{}`", task.name);
				Some(token)
			}
			_ => None,
		};

		let report =
			report::generate(task.subject_type, dry_run, &profile.results, task.trace_level);
		tracing::info!(
			run_id = %ctx.run_id,
			"Finished `{}` with {} result(s)",
			task.name,
			profile.results.len()
		);

		Ok(RunSummary {
			task: task.name.clone(),
			results: profile.results,
			propagation: profile.propagation,
			report,
			persisted_token,
		})
	}
}
