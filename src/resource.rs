//! External resources: a connector plus its mappings and propagation settings
use std::{
	collections::{BTreeMap, HashMap},
	sync::Arc,
};

use serde::Deserialize;

use crate::{
	connector::Connector,
	entity::SubjectType,
	error::MappingError,
	mapping::{MappingItem, ResourceMapping},
};

/// Whether the caller waits for a propagation task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationMode {
	/// The caller blocks for the result
	#[default]
	Sync,
	/// The outcome is only logged and recorded
	Async,
}

/// Resource configuration as read from the config file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ResourceConfig {
	/// Unique resource name
	pub name: String,
	/// Whether a failure on this resource fails the whole operation
	#[serde(default)]
	pub propagation_primary: bool,
	/// Execution order among primary resources, lowest first
	#[serde(default)]
	pub propagation_priority: u32,
	/// Whether callers wait for propagation to this resource
	#[serde(default)]
	pub propagation_mode: PropagationMode,
	/// One mapping per subject type
	#[serde(default)]
	pub mappings: Vec<MappingConfig>,
}

/// Mapping of one subject type as read from the config file
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct MappingConfig {
	/// Subject type being mapped
	pub subject_type: SubjectType,
	/// Remote object class
	pub object_class: String,
	/// Mapping items
	pub items: Vec<MappingItem>,
}

/// A configured resource bound to a live connector
pub struct Resource {
	/// Unique resource name
	pub name: String,
	/// Connector reaching the resource
	pub connector: Arc<dyn Connector>,
	/// Whether a failure on this resource fails the whole operation
	pub primary: bool,
	/// Execution order among primary resources, lowest first
	pub priority: u32,
	/// Whether callers wait for propagation to this resource
	pub mode: PropagationMode,
	/// Validated mappings by subject type
	mappings: BTreeMap<SubjectType, ResourceMapping>,
}

impl std::fmt::Debug for Resource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Resource")
			.field("name", &self.name)
			.field("connector", &self.connector.name())
			.field("primary", &self.primary)
			.field("priority", &self.priority)
			.field("mode", &self.mode)
			.field("mappings", &self.mappings.keys().collect::<Vec<_>>())
			.finish()
	}
}

impl Resource {
	/// Bind a resource configuration to its connector, validating every
	/// mapping
	pub fn new(config: &ResourceConfig, connector: Arc<dyn Connector>) -> Result<Self, MappingError> {
		let mappings = config
			.mappings
			.iter()
			.map(|mapping| {
				ResourceMapping::new(
					config.name.clone(),
					mapping.subject_type,
					mapping.object_class.clone(),
					mapping.items.clone(),
				)
				.map(|validated| (mapping.subject_type, validated))
			})
			.collect::<Result<_, _>>()?;

		Ok(Self {
			name: config.name.clone(),
			connector,
			primary: config.propagation_primary,
			priority: config.propagation_priority,
			mode: config.propagation_mode,
			mappings,
		})
	}

	/// The mapping for a subject type
	pub fn mapping(&self, subject_type: SubjectType) -> Result<&ResourceMapping, MappingError> {
		self.mappings
			.get(&subject_type)
			.ok_or_else(|| MappingError::NoMapping { resource: self.name.clone(), subject_type })
	}
}

/// All resources known to the engines, by name
#[derive(Debug, Default)]
pub struct ResourceRegistry {
	/// Resources by name
	resources: BTreeMap<String, Arc<Resource>>,
}

impl ResourceRegistry {
	/// Build the registry from configuration and the live connectors keyed by
	/// resource name
	pub fn from_config(
		configs: &[ResourceConfig],
		mut connectors: HashMap<String, Arc<dyn Connector>>,
	) -> Result<Self, MappingError> {
		let mut registry = Self::default();
		for config in configs {
			let connector = connectors
				.remove(&config.name)
				.ok_or_else(|| MappingError::MissingConnector(config.name.clone()))?;
			registry.insert(Resource::new(config, connector)?);
		}
		Ok(registry)
	}

	/// Add or replace a resource
	pub fn insert(&mut self, resource: Resource) {
		self.resources.insert(resource.name.clone(), Arc::new(resource));
	}

	/// Look a resource up by name
	pub fn get(&self, name: &str) -> Result<&Arc<Resource>, MappingError> {
		self.resources.get(name).ok_or_else(|| MappingError::UnknownResource(name.to_owned()))
	}

	/// All resource names
	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.resources.keys().map(String::as_str)
	}
}
