//! Builds propagation tasks from entity state
use std::{collections::BTreeSet, sync::Arc};

use super::PropagationTask;
use crate::{
	attribute::AttributeSet,
	entity::Attributable,
	reconciliation::ResourceOperation,
	resource::ResourceRegistry,
};

/// Turns local entity changes into per-resource tasks
#[derive(Debug, Clone)]
pub struct PropagationManager {
	/// Known resources
	resources: Arc<ResourceRegistry>,
}

impl PropagationManager {
	/// Create a manager over the registry
	#[must_use]
	pub fn new(resources: Arc<ResourceRegistry>) -> Self {
		Self { resources }
	}

	/// Create tasks for every resource the new entity is linked to
	#[must_use]
	pub fn create_tasks(
		&self,
		entity: &Attributable,
		excluded: &BTreeSet<String>,
	) -> Vec<PropagationTask> {
		entity
			.resources
			.iter()
			.filter(|resource| !excluded.contains(*resource))
			.filter_map(|resource| self.task(entity, resource, ResourceOperation::Create, None, None))
			.collect()
	}

	/// Update tasks for the resources the entity is still linked to, and
	/// delete tasks for the ones it was unlinked from.
	///
	/// `affected` holds the internal attribute names the local change touched;
	/// update tasks only write the attributes mapped from them.
	#[must_use]
	pub fn update_tasks(
		&self,
		before: &Attributable,
		after: &Attributable,
		affected: &BTreeSet<String>,
		excluded: &BTreeSet<String>,
	) -> Vec<PropagationTask> {
		let updates = after
			.resources
			.iter()
			.filter(|resource| !excluded.contains(*resource))
			.filter_map(|resource| {
				self.task(after, resource, ResourceOperation::Update, Some(before), Some(affected))
			});
		let deletes = before
			.resources
			.difference(&after.resources)
			.filter(|resource| !excluded.contains(*resource))
			.filter_map(|resource| {
				self.task(before, resource, ResourceOperation::Delete, None, None)
			});
		updates.chain(deletes).collect()
	}

	/// Delete tasks for every resource the entity is linked to
	#[must_use]
	pub fn delete_tasks(
		&self,
		entity: &Attributable,
		excluded: &BTreeSet<String>,
	) -> Vec<PropagationTask> {
		entity
			.resources
			.iter()
			.filter(|resource| !excluded.contains(*resource))
			.filter_map(|resource| self.task(entity, resource, ResourceOperation::Delete, None, None))
			.collect()
	}

	/// Delete tasks for exactly the given resources, whether linked or not
	#[must_use]
	pub fn deprovision_tasks(
		&self,
		entity: &Attributable,
		resources: &BTreeSet<String>,
	) -> Vec<PropagationTask> {
		resources
			.iter()
			.filter_map(|resource| self.task(entity, resource, ResourceOperation::Delete, None, None))
			.collect()
	}

	/// Build one task, or `None` when the resource cannot take it
	fn task(
		&self,
		entity: &Attributable,
		resource_name: &str,
		operation: ResourceOperation,
		before: Option<&Attributable>,
		affected: Option<&BTreeSet<String>>,
	) -> Option<PropagationTask> {
		let resource = match self.resources.get(resource_name) {
			Ok(resource) => resource,
			Err(error) => {
				tracing::warn!("Not propagating {} to {}: {}", entity.name, resource_name, error);
				return None;
			}
		};
		let mapping = match resource.mapping(entity.subject_type) {
			Ok(mapping) => mapping,
			Err(error) => {
				tracing::debug!("Not propagating {} to {}: {}", entity.name, resource_name, error);
				return None;
			}
		};
		let Some(account_id) = mapping.account_id_of(entity) else {
			tracing::warn!(
				"Not propagating {} to {}: no value for account id `{}`",
				entity.name,
				resource_name,
				mapping.account_id_item().ext_attr_name
			);
			return None;
		};
		let old_account_id = before
			.and_then(|before| mapping.account_id_of(before))
			.filter(|old| *old != account_id);

		let attributes = match (operation, affected) {
			(ResourceOperation::Delete, _) => AttributeSet::new(),
			(_, Some(affected)) => mapping.changed_write_attributes(entity, affected),
			(_, None) => mapping.write_attributes(entity),
		};

		Some(PropagationTask {
			subject_type: entity.subject_type,
			subject_id: entity.id,
			subject_name: entity.name.clone(),
			resource: resource.name.clone(),
			object_class: mapping.object_class().to_owned(),
			operation,
			account_id,
			old_account_id,
			attributes,
			mode: resource.mode,
			primary: resource.primary,
			priority: resource.priority,
		})
	}
}
