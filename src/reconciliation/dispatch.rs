//! Per-delta handling: correlate, disambiguate, dispatch, hooks and outcome
use std::collections::BTreeSet;

use chrono::Utc;

use super::{
	HookErrorScope, MatchingRule, ReconciliationEngine, ResourceOperation, SyncProfile, SyncResult,
	UnmatchingRule,
};
use crate::{
	collaborators::{Context, SyncEvent},
	connector::{SyncDelta, SyncDeltaType},
	entity::{Attributable, EntityPatch},
	error::SyncError,
	mapping::ResourceMapping,
	propagation::{PropagationTask, StatusCollector},
};

/// Before-hooks that may rewrite the new entity
#[derive(Debug, Clone, Copy)]
enum Unmatched {
	/// `before_create`
	Create,
	/// `before_assign`
	Assign,
}

/// Before-hooks on an existing entity
#[derive(Debug, Clone, Copy)]
enum Matched {
	/// `before_update`
	Update,
	/// `before_deprovision`
	Deprovision,
	/// `before_unassign`
	Unassign,
	/// `before_link`
	Link,
	/// `before_unlink`
	Unlink,
	/// `before_delete`
	Delete,
}

impl Unmatched {
	/// Hook name for errors
	fn hook(self) -> &'static str {
		match self {
			Self::Create => "before_create",
			Self::Assign => "before_assign",
		}
	}
}

impl Matched {
	/// Hook name for errors
	fn hook(self) -> &'static str {
		match self {
			Self::Update => "before_update",
			Self::Deprovision => "before_deprovision",
			Self::Unassign => "before_unassign",
			Self::Link => "before_link",
			Self::Unlink => "before_unlink",
			Self::Delete => "before_delete",
		}
	}
}

impl ReconciliationEngine {
	/// Handle one delta. Only errors that must abort the run are returned.
	pub(super) async fn handle_delta(
		&self,
		ctx: &Context,
		profile: &mut SyncProfile<'_>,
		mapping: &ResourceMapping,
		delta: SyncDelta,
	) -> Result<(), SyncError> {
		let task = profile.task;
		tracing::debug!(
			run_id = %ctx.run_id,
			"Processing {:?} delta for {} on {}",
			delta.delta_type,
			delta.uid,
			task.resource
		);

		let correlated = self
			.correlation
			.correlate(ctx, &delta, mapping, self.repository.as_ref())
			.await
			.and_then(|matches| {
				task.conflict_policy.resolve(delta.correlation_uid().as_str(), matches)
			});
		let matches = match correlated {
			Ok(matches) => matches,
			Err(error) if error.is_skippable() => {
				tracing::warn!(run_id = %ctx.run_id, "Skipping {}: {}", delta.uid, error);
				return Ok(());
			}
			Err(error) => {
				tracing::error!(run_id = %ctx.run_id, "Could not correlate {}: {}", delta.uid, error);
				return Ok(());
			}
		};

		match (delta.delta_type, matches.is_empty()) {
			(SyncDeltaType::CreateOrUpdate, true) => {
				self.on_unmatched(ctx, profile, mapping, delta).await
			}
			(SyncDeltaType::CreateOrUpdate, false) => {
				self.on_matched(ctx, profile, mapping, delta, matches).await
			}
			(SyncDeltaType::Delete, true) => {
				tracing::debug!(
					run_id = %ctx.run_id,
					"No local {} for deleted {}, nothing to do",
					task.subject_type,
					delta.uid
				);
				Ok(())
			}
			(SyncDeltaType::Delete, false) => self.on_deleted(ctx, profile, delta, matches).await,
		}
	}

	/// A create-or-update delta without local entity
	async fn on_unmatched(
		&self,
		ctx: &Context,
		profile: &mut SyncProfile<'_>,
		mapping: &ResourceMapping,
		delta: SyncDelta,
	) -> Result<(), SyncError> {
		let task = profile.task;
		let hook = match task.unmatching_rule {
			UnmatchingRule::Ignore => {
				tracing::info!(run_id = %ctx.run_id, "Ignoring unmatched {}", delta.uid);
				return Ok(());
			}
			UnmatchingRule::Assign => Unmatched::Assign,
			UnmatchingRule::Provision => Unmatched::Create,
		};
		if !task.perform_create {
			tracing::info!(
				run_id = %ctx.run_id,
				"Task `{}` may not create, skipping {}",
				task.name,
				delta.uid
			);
			return Ok(());
		}

		let mut subject = mapping.to_entity(&delta.attributes);
		if subject.name.is_empty() {
			subject.name = delta.uid.to_string();
		}
		if matches!(hook, Unmatched::Assign) {
			subject.resources.insert(task.resource.clone());
		}

		let delta = match self.before_unmatched(profile, hook, delta, &mut subject).await {
			Ok(delta) => delta,
			Err(error) => {
				let result = SyncResult::success(
					ResourceOperation::Create,
					task.subject_type,
					0,
					&subject.name,
				);
				return self.hook_failed(ctx, profile, error, result).await;
			}
		};

		let result = if profile.dry_run {
			SyncResult::success(ResourceOperation::Create, task.subject_type, 0, &subject.name)
		} else {
			match self.workflow.create(ctx, subject.clone()).await {
				Ok(created) => {
					subject.id = created.id;
					subject.name.clone_from(&created.name);
					// ASSIGN also reaches the synced resource; the existing
					// remote object turns the create into an update there.
					let excluded = match hook {
						Unmatched::Assign => BTreeSet::new(),
						Unmatched::Create => BTreeSet::from([task.resource.clone()]),
					};
					let tasks = self.manager.create_tasks(&subject, &excluded);
					self.propagate(ctx, profile, tasks).await;
					SyncResult::success(
						ResourceOperation::Create,
						task.subject_type,
						created.id,
						created.name,
					)
				}
				Err(error) if error.is_skippable() => {
					tracing::error!(run_id = %ctx.run_id, "Skipping creation of {}: {}", subject.name, error);
					return Ok(());
				}
				Err(error) => {
					tracing::error!(run_id = %ctx.run_id, "Could not create {}: {}", subject.name, error);
					SyncResult::success(
						ResourceOperation::Create,
						task.subject_type,
						0,
						&subject.name,
					)
					.failed(error.to_string())
				}
			}
		};

		self.finish(ctx, profile, &delta, Some(&subject), result).await
	}

	/// A create-or-update delta correlated to local entities
	async fn on_matched(
		&self,
		ctx: &Context,
		profile: &mut SyncProfile<'_>,
		mapping: &ResourceMapping,
		delta: SyncDelta,
		matches: Vec<u64>,
	) -> Result<(), SyncError> {
		let task = profile.task;
		if !task.perform_update {
			tracing::info!(
				run_id = %ctx.run_id,
				"Task `{}` may not update, skipping {}",
				task.name,
				delta.uid
			);
			return Ok(());
		}

		for id in matches {
			let Some(subject) = self.load(ctx, profile, id).await else {
				continue;
			};
			match task.matching_rule {
				MatchingRule::Ignore => {
					tracing::info!(run_id = %ctx.run_id, "Ignoring matched {}", subject.name);
					let result = SyncResult::success(
						ResourceOperation::None,
						task.subject_type,
						subject.id,
						&subject.name,
					);
					self.record(ctx, profile, result).await;
				}
				MatchingRule::Update => {
					self.update(ctx, profile, mapping, delta.clone(), subject).await?;
				}
				MatchingRule::Deprovision => {
					self.deprovision(ctx, profile, Matched::Deprovision, delta.clone(), subject)
						.await?;
				}
				MatchingRule::Unassign => {
					self.deprovision(ctx, profile, Matched::Unassign, delta.clone(), subject).await?;
				}
				MatchingRule::Link => {
					self.relink(ctx, profile, Matched::Link, delta.clone(), subject).await?;
				}
				MatchingRule::Unlink => {
					self.relink(ctx, profile, Matched::Unlink, delta.clone(), subject).await?;
				}
			}
		}
		Ok(())
	}

	/// A delete delta correlated to local entities
	async fn on_deleted(
		&self,
		ctx: &Context,
		profile: &mut SyncProfile<'_>,
		delta: SyncDelta,
		matches: Vec<u64>,
	) -> Result<(), SyncError> {
		let task = profile.task;
		if !task.perform_delete {
			tracing::info!(
				run_id = %ctx.run_id,
				"Task `{}` may not delete, skipping {}",
				task.name,
				delta.uid
			);
			return Ok(());
		}

		for id in matches {
			let Some(subject) = self.load(ctx, profile, id).await else {
				continue;
			};
			let base =
				SyncResult::success(ResourceOperation::Delete, task.subject_type, id, &subject.name);
			let delta =
				match self.before_matched(profile, Matched::Delete, delta.clone(), &subject).await {
					Ok(delta) => delta,
					Err(error) => {
						self.hook_failed(ctx, profile, error, base).await?;
						continue;
					}
				};

			let result = if profile.dry_run {
				base
			} else {
				let tasks =
					self.manager.delete_tasks(&subject, &BTreeSet::from([task.resource.clone()]));
				match self.workflow.delete(ctx, task.subject_type, id).await {
					Ok(_) => {
						self.propagate(ctx, profile, tasks).await;
						base
					}
					Err(error) if error.is_skippable() => {
						tracing::error!(run_id = %ctx.run_id, "Skipping deletion of {}: {}", subject.name, error);
						continue;
					}
					Err(error) => {
						tracing::error!(run_id = %ctx.run_id, "Could not delete {}: {}", subject.name, error);
						base.failed(error.to_string())
					}
				}
			};
			self.finish(ctx, profile, &delta, Some(&subject), result).await?;
		}
		Ok(())
	}

	/// Apply the changed mapped attributes to an entity and propagate them
	async fn update(
		&self,
		ctx: &Context,
		profile: &mut SyncProfile<'_>,
		mapping: &ResourceMapping,
		delta: SyncDelta,
		subject: Attributable,
	) -> Result<(), SyncError> {
		let task = profile.task;
		let base =
			SyncResult::success(ResourceOperation::Update, task.subject_type, subject.id, &subject.name);
		let delta = match self.before_matched(profile, Matched::Update, delta, &subject).await {
			Ok(delta) => delta,
			Err(error) => return self.hook_failed(ctx, profile, error, base).await,
		};

		let patch = mapping.diff(&subject, &delta.attributes);
		let result = if profile.dry_run {
			base
		} else if patch.is_empty() {
			tracing::debug!(run_id = %ctx.run_id, "{} is up to date", subject.name);
			base
		} else {
			match self.workflow.update(ctx, task.subject_type, subject.id, &patch).await {
				Ok(updated) => {
					let after = match self.repository.find(ctx, task.subject_type, subject.id).await {
						Ok(Some(after)) => after,
						read => {
							if let Err(error) = read {
								tracing::warn!(
									run_id = %ctx.run_id,
									"Could not re-read {}, propagating a patched copy: {}",
									subject.name,
									error
								);
							}
							let mut after = subject.clone();
							patch.apply(&mut after);
							after
						}
					};
					let tasks = self.manager.update_tasks(
						&subject,
						&after,
						&updated.affected_attributes,
						&BTreeSet::from([task.resource.clone()]),
					);
					self.propagate(ctx, profile, tasks).await;
					SyncResult::success(
						ResourceOperation::Update,
						task.subject_type,
						updated.id,
						updated.name,
					)
				}
				Err(error) if error.is_skippable() => {
					tracing::error!(run_id = %ctx.run_id, "Skipping update of {}: {}", subject.name, error);
					return Ok(());
				}
				Err(error) => {
					tracing::error!(run_id = %ctx.run_id, "Could not update {}: {}", subject.name, error);
					base.failed(error.to_string())
				}
			}
		};

		self.finish(ctx, profile, &delta, Some(&subject), result).await
	}

	/// Remove the remote object of an entity, and for unassign also the link
	async fn deprovision(
		&self,
		ctx: &Context,
		profile: &mut SyncProfile<'_>,
		hook: Matched,
		delta: SyncDelta,
		subject: Attributable,
	) -> Result<(), SyncError> {
		let task = profile.task;
		let base =
			SyncResult::success(ResourceOperation::Delete, task.subject_type, subject.id, &subject.name);
		let delta = match self.before_matched(profile, hook, delta, &subject).await {
			Ok(delta) => delta,
			Err(error) => return self.hook_failed(ctx, profile, error, base).await,
		};

		let result = if profile.dry_run {
			base
		} else {
			let resources = BTreeSet::from([task.resource.clone()]);
			let tasks = self.manager.deprovision_tasks(&subject, &resources);
			let unlinked = match hook {
				Matched::Unassign => self
					.workflow
					.update(ctx, task.subject_type, subject.id, &EntityPatch::unlink(&task.resource))
					.await
					.map(|_| ()),
				_ => Ok(()),
			};
			match unlinked {
				Ok(()) => {
					self.propagate(ctx, profile, tasks).await;
					base
				}
				Err(error) if error.is_skippable() => {
					tracing::error!(run_id = %ctx.run_id, "Skipping unassign of {}: {}", subject.name, error);
					return Ok(());
				}
				Err(error) => {
					tracing::error!(run_id = %ctx.run_id, "Could not unassign {}: {}", subject.name, error);
					base.failed(error.to_string())
				}
			}
		};

		self.finish(ctx, profile, &delta, Some(&subject), result).await
	}

	/// Link or unlink the synced resource without propagating
	async fn relink(
		&self,
		ctx: &Context,
		profile: &mut SyncProfile<'_>,
		hook: Matched,
		delta: SyncDelta,
		subject: Attributable,
	) -> Result<(), SyncError> {
		let task = profile.task;
		let base =
			SyncResult::success(ResourceOperation::None, task.subject_type, subject.id, &subject.name);
		let delta = match self.before_matched(profile, hook, delta, &subject).await {
			Ok(delta) => delta,
			Err(error) => return self.hook_failed(ctx, profile, error, base).await,
		};

		let result = if profile.dry_run {
			base
		} else {
			let patch = match hook {
				Matched::Link => EntityPatch::link(&task.resource),
				_ => EntityPatch::unlink(&task.resource),
			};
			match self.workflow.update(ctx, task.subject_type, subject.id, &patch).await {
				Ok(_) => base,
				Err(error) if error.is_skippable() => {
					tracing::error!(run_id = %ctx.run_id, "Skipping {} of {}: {}", hook.hook(), subject.name, error);
					return Ok(());
				}
				Err(error) => {
					tracing::error!(run_id = %ctx.run_id, "Could not relink {}: {}", subject.name, error);
					base.failed(error.to_string())
				}
			}
		};

		self.finish(ctx, profile, &delta, Some(&subject), result).await
	}

	/// Read a correlated entity, logging when it cannot be read
	async fn load(&self, ctx: &Context, profile: &SyncProfile<'_>, id: u64) -> Option<Attributable> {
		let subject_type = profile.task.subject_type;
		match self.repository.find(ctx, subject_type, id).await {
			Ok(Some(subject)) => Some(subject),
			Ok(None) => {
				tracing::error!(run_id = %ctx.run_id, "Correlated {} {} no longer exists", subject_type, id);
				None
			}
			Err(error) => {
				tracing::error!(run_id = %ctx.run_id, "Could not read {} {}: {}", subject_type, id, error);
				None
			}
		}
	}

	/// Run the create/assign hooks of every extension in order
	async fn before_unmatched(
		&self,
		profile: &SyncProfile<'_>,
		hook: Unmatched,
		mut delta: SyncDelta,
		subject: &mut Attributable,
	) -> Result<SyncDelta, SyncError> {
		for action in profile.actions {
			delta = match hook {
				Unmatched::Create => action.before_create(profile, delta, subject).await,
				Unmatched::Assign => action.before_assign(profile, delta, subject).await,
			}
			.map_err(|error| SyncError::Hook { hook: hook.hook(), message: format!("{error:#}") })?;
		}
		Ok(delta)
	}

	/// Run the hooks for an existing entity of every extension in order
	async fn before_matched(
		&self,
		profile: &SyncProfile<'_>,
		hook: Matched,
		mut delta: SyncDelta,
		subject: &Attributable,
	) -> Result<SyncDelta, SyncError> {
		for action in profile.actions {
			delta = match hook {
				Matched::Update => action.before_update(profile, delta, subject).await,
				Matched::Deprovision => action.before_deprovision(profile, delta, subject).await,
				Matched::Unassign => action.before_unassign(profile, delta, subject).await,
				Matched::Link => action.before_link(profile, delta, subject).await,
				Matched::Unlink => action.before_unlink(profile, delta, subject).await,
				Matched::Delete => action.before_delete(profile, delta, subject).await,
			}
			.map_err(|error| SyncError::Hook { hook: hook.hook(), message: format!("{error:#}") })?;
		}
		Ok(delta)
	}

	/// A before-hook failed: abort the run or record a failure for the delta
	async fn hook_failed(
		&self,
		ctx: &Context,
		profile: &mut SyncProfile<'_>,
		error: SyncError,
		result: SyncResult,
	) -> Result<(), SyncError> {
		match profile.task.hook_error_scope {
			HookErrorScope::Run => Err(error),
			HookErrorScope::Delta => {
				tracing::error!(run_id = %ctx.run_id, "{}: {}", result.name, error);
				self.record(ctx, profile, result.failed(error.to_string())).await;
				Ok(())
			}
		}
	}

	/// Run the after hooks, then record the outcome
	async fn finish(
		&self,
		ctx: &Context,
		profile: &mut SyncProfile<'_>,
		delta: &SyncDelta,
		subject: Option<&Attributable>,
		result: SyncResult,
	) -> Result<(), SyncError> {
		let mut failed = None;
		for action in profile.actions {
			if let Err(error) = action.after(profile, delta, subject, &result).await {
				tracing::error!(run_id = %ctx.run_id, "After hook failed for {}: {:#}", result.name, error);
				failed.get_or_insert(SyncError::Hook { hook: "after", message: format!("{error:#}") });
			}
		}
		self.record(ctx, profile, result).await;

		match failed {
			Some(error) if profile.task.hook_error_scope == HookErrorScope::Run => Err(error),
			_ => Ok(()),
		}
	}

	/// Append an outcome to the run and hand it to the side channels.
	///
	/// Dry runs still audit but never generate notifications.
	async fn record(&self, ctx: &Context, profile: &mut SyncProfile<'_>, result: SyncResult) {
		let event = SyncEvent {
			task: profile.task.name.clone(),
			resource: profile.task.resource.clone(),
			result: result.clone(),
			at: Utc::now(),
		};
		if let Err(error) = self.audit.record(ctx, &event).await {
			tracing::error!(run_id = %ctx.run_id, "Could not audit {}: {:#}", result.name, error);
		}
		if !profile.dry_run {
			if let Err(error) = self.notifications.notify(ctx, &event).await {
				tracing::error!(run_id = %ctx.run_id, "Could not notify about {}: {:#}", result.name, error);
			}
		}
		profile.results.push(result);
	}

	/// Execute propagation tasks and keep their statuses.
	///
	/// A failed primary resource is logged; the local result stays as it is.
	async fn propagate(
		&self,
		ctx: &Context,
		profile: &mut SyncProfile<'_>,
		tasks: Vec<PropagationTask>,
	) {
		if tasks.is_empty() {
			return;
		}
		let collector = StatusCollector::new();
		if let Err(error) = self.executor.execute(ctx, tasks, &collector).await {
			tracing::warn!(run_id = %ctx.run_id, "{}", error);
		}
		profile.propagation.extend(collector.into_statuses());
	}
}
