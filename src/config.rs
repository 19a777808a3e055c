//! Configuration of resources, sync tasks and runtime switches
use std::{
	collections::{BTreeSet, HashMap},
	path::{Path, PathBuf},
	sync::Arc,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::{
	collaborators::{EntityRepository, WorkflowAdapter},
	connector::Connector,
	mapping::ResourceMapping,
	reconciliation::{ReconciliationEngine, SyncTask, DEFAULT_CHANNEL_CAPACITY},
	resource::{ResourceConfig, ResourceRegistry},
	token_store::FileTokenStore,
};

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Config {
	/// Log level, `info` when unset
	pub log_level: Option<String>,
	/// File the sync tokens are kept in
	#[serde(default = "default_token_cache_path")]
	pub token_cache_path: PathBuf,
	/// Enabled optional behavior
	#[serde(default)]
	pub feature_flags: Set<FeatureFlag>,
	/// Propagation tuning
	#[serde(default)]
	pub propagation: PropagationConfig,
	/// External resources
	#[serde(default)]
	pub resources: Vec<ResourceConfig>,
	/// Reconciliation tasks
	#[serde(default)]
	pub sync_tasks: Vec<SyncTask>,
}

/// Serde default helper
fn default_token_cache_path() -> PathBuf {
	PathBuf::from("sync_tokens.bin")
}

/// Propagation tuning
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct PropagationConfig {
	/// Deltas buffered between a connector and the engine
	#[serde(default = "default_channel_capacity")]
	pub channel_capacity: usize,
}

impl Default for PropagationConfig {
	fn default() -> Self {
		Self { channel_capacity: DEFAULT_CHANNEL_CAPACITY }
	}
}

/// Serde default helper
fn default_channel_capacity() -> usize {
	DEFAULT_CHANNEL_CAPACITY
}

/// Unordered collection of flags
pub type Set<T> = Vec<T>;

/// Optional behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFlag {
	/// Run every sync task as a dry run and skip all connector writes
	DryRun,
	/// Propagate to non-primary resources concurrently
	ParallelPropagation,
}

impl Config {
	/// Read the config file at `path`, overridden by `IDENTITY_SYNC__*`
	/// environment variables (`IDENTITY_SYNC__LOG_LEVEL=debug`, ...)
	pub fn new(path: &Path) -> Result<Self> {
		let config: Self = config::Config::builder()
			.add_source(config::File::from(path))
			.add_source(config::Environment::with_prefix("IDENTITY_SYNC").separator("__"))
			.build()
			.context("failed to read configuration")?
			.try_deserialize()
			.context("failed to parse configuration")?;
		config.validate()?;
		Ok(config)
	}

	/// Whether a feature flag is set
	#[must_use]
	pub fn feature_enabled(&self, flag: FeatureFlag) -> bool {
		self.feature_flags.contains(&flag)
	}

	/// Check everything that can be checked without live connectors: unique
	/// names, valid mappings, and that every sync task has a resource with a
	/// mapping for its subject type
	pub fn validate(&self) -> Result<()> {
		if self.propagation.channel_capacity == 0 {
			bail!("propagation.channel_capacity must be at least 1");
		}

		let mut resources = BTreeSet::new();
		for resource in &self.resources {
			if !resources.insert(resource.name.as_str()) {
				bail!("resource `{}` is configured more than once", resource.name);
			}
			let mut subject_types = BTreeSet::new();
			for mapping in &resource.mappings {
				if !subject_types.insert(mapping.subject_type) {
					bail!(
						"resource `{}` maps {} more than once",
						resource.name,
						mapping.subject_type
					);
				}
				ResourceMapping::new(
					resource.name.clone(),
					mapping.subject_type,
					mapping.object_class.clone(),
					mapping.items.clone(),
				)?;
			}
		}

		let mut tasks = BTreeSet::new();
		for task in &self.sync_tasks {
			if !tasks.insert(task.name.as_str()) {
				bail!("sync task `{}` is configured more than once", task.name);
			}
			let Some(resource) = self.resources.iter().find(|resource| resource.name == task.resource)
			else {
				bail!("sync task `{}` refers to unknown resource `{}`", task.name, task.resource);
			};
			if !resource.mappings.iter().any(|mapping| mapping.subject_type == task.subject_type) {
				bail!(
					"sync task `{}` needs a {} mapping on resource `{}`",
					task.name,
					task.subject_type,
					task.resource
				);
			}
		}

		Ok(())
	}

	/// Look up a sync task by name
	pub fn sync_task(&self, name: &str) -> Result<&SyncTask> {
		self.sync_tasks
			.iter()
			.find(|task| task.name == name)
			.with_context(|| format!("no sync task named `{name}`"))
	}

	/// Bind the configured resources to live connectors keyed by resource
	/// name
	pub fn resource_registry(
		&self,
		connectors: HashMap<String, Arc<dyn Connector>>,
	) -> Result<ResourceRegistry> {
		ResourceRegistry::from_config(&self.resources, connectors)
			.context("failed to set up resources")
	}

	/// Wire up an engine from this configuration, keeping sync tokens in
	/// [`Self::token_cache_path`]
	pub fn reconciliation_engine(
		&self,
		connectors: HashMap<String, Arc<dyn Connector>>,
		repository: Arc<dyn EntityRepository>,
		workflow: Arc<dyn WorkflowAdapter>,
	) -> Result<ReconciliationEngine> {
		let resources = Arc::new(self.resource_registry(connectors)?);
		Ok(ReconciliationEngine::new(
			resources,
			repository,
			workflow,
			Arc::new(FileTokenStore::new(&self.token_cache_path)),
		)
		.with_dry_run(self.feature_enabled(FeatureFlag::DryRun))
		.with_parallel_propagation(self.feature_enabled(FeatureFlag::ParallelPropagation))
		.with_channel_capacity(self.propagation.channel_capacity))
	}
}

#[cfg(test)]
mod tests {
	#![allow(clippy::expect_used)]

	use indoc::indoc;

	use super::*;
	use crate::{
		attribute::AttributeValue,
		collaborators::Context,
		connector::{SyncDelta, SyncToken},
		entity::SubjectType,
		reconciliation::{ConflictResolutionAction, MatchingRule, TraceLevel, UnmatchingRule},
		resource::PropagationMode,
		test_helpers::{MemoryConnector, MemoryRepository, MemoryWorkflow},
		token_store::{FileTokenStore, TokenStore},
	};

	const EXAMPLE_CONFIG: &str = indoc! {r#"
		log_level: debug
		token_cache_path: ./tokens.bin
		feature_flags:
		  - parallel_propagation
		resources:
		  - name: ldap
		    propagation_primary: true
		    propagation_priority: 1
		    mappings:
		      - subject_type: user
		        object_class: __ACCOUNT__
		        items:
		          - ext_attr_name: uid
		            int_mapping_type: username
		            accountid: true
		          - ext_attr_name: mail
		            int_attr_name: email
		            int_mapping_type: plain
		  - name: crm
		    propagation_mode: async
		    mappings:
		      - subject_type: user
		        object_class: contact
		        items:
		          - ext_attr_name: login
		            int_mapping_type: username
		            accountid: true
		sync_tasks:
		  - name: ldap-users
		    resource: ldap
		    subject_type: user
		    matching_rule: link
		    unmatching_rule: assign
		    conflict_policy: first_match
		    trace_level: all
	"#};

	fn parse(yaml: &str) -> Config {
		serde_yaml::from_str(yaml).expect("invalid config")
	}

	#[test]
	fn test_parse_example() {
		let config = parse(EXAMPLE_CONFIG);
		assert_eq!(config.log_level.as_deref(), Some("debug"));
		assert_eq!(config.token_cache_path, PathBuf::from("./tokens.bin"));
		assert!(config.feature_enabled(FeatureFlag::ParallelPropagation));
		assert!(!config.feature_enabled(FeatureFlag::DryRun));
		assert_eq!(config.propagation.channel_capacity, DEFAULT_CHANNEL_CAPACITY);

		assert_eq!(config.resources.len(), 2);
		assert!(config.resources[0].propagation_primary);
		assert_eq!(config.resources[1].propagation_mode, PropagationMode::Async);

		let task = config.sync_task("ldap-users").expect("task missing");
		assert_eq!(task.subject_type, SubjectType::User);
		assert_eq!(task.matching_rule, MatchingRule::Link);
		assert_eq!(task.unmatching_rule, UnmatchingRule::Assign);
		assert_eq!(task.conflict_policy, ConflictResolutionAction::FirstMatch);
		assert_eq!(task.trace_level, TraceLevel::All);
		assert!(task.perform_create && task.perform_update && task.perform_delete);

		config.validate().expect("example config should be valid");
	}

	#[test]
	fn test_unknown_resource_is_rejected() {
		let mut config = parse(EXAMPLE_CONFIG);
		config.sync_tasks[0].resource = "nowhere".to_owned();
		let error = config.validate().expect_err("unknown resource accepted");
		assert!(error.to_string().contains("unknown resource `nowhere`"));
	}

	#[test]
	fn test_missing_subject_mapping_is_rejected() {
		let mut config = parse(EXAMPLE_CONFIG);
		config.sync_tasks[0].subject_type = SubjectType::Role;
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_invalid_mapping_is_rejected() {
		let config = parse(indoc! {"
			resources:
			  - name: ldap
			    mappings:
			      - subject_type: user
			        object_class: __ACCOUNT__
			        items:
			          - ext_attr_name: mail
			            int_attr_name: email
			            int_mapping_type: plain
		"});
		let error = config.validate().expect_err("mapping without account id accepted");
		assert!(error.to_string().contains("account id"));
	}

	#[test]
	fn test_duplicate_task_is_rejected() {
		let mut config = parse(EXAMPLE_CONFIG);
		config.sync_tasks.push(config.sync_tasks[0].clone());
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_load_from_file() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("config.yaml");
		std::fs::write(&path, EXAMPLE_CONFIG).expect("write config");

		let config = Config::new(&path).expect("config should load");
		assert_eq!(config, parse(EXAMPLE_CONFIG));
	}

	#[tokio::test]
	async fn test_engine_keeps_tokens_in_the_cache_file() {
		let dir = tempfile::tempdir().expect("tempdir");
		let mut config = parse(EXAMPLE_CONFIG);
		config.token_cache_path = dir.path().join("tokens.bin");

		let ldap = Arc::new(MemoryConnector::new("ldap", "uid"));
		ldap.push_delta(SyncDelta::create_or_update(
			"alice",
			"__ACCOUNT__",
			[("uid".to_owned(), vec![AttributeValue::from("alice")])].into(),
		));
		let mut connectors: HashMap<String, Arc<dyn Connector>> = HashMap::new();
		connectors.insert("ldap".to_owned(), ldap);
		connectors.insert("crm".to_owned(), Arc::new(MemoryConnector::new("crm", "login")));
		let repository = Arc::new(MemoryRepository::new());
		let workflow = Arc::new(MemoryWorkflow::new(repository.clone()));

		let engine = config
			.reconciliation_engine(connectors, repository.clone(), workflow)
			.expect("engine should be built");
		let task = config.sync_task("ldap-users").expect("task missing");
		let summary = engine.run(&Context::new("admin"), task).await.expect("run failed");

		assert_eq!(summary.results.len(), 1);
		assert_eq!(repository.all(SubjectType::User).len(), 1);
		let stored = FileTokenStore::new(&config.token_cache_path).load("ldap-users").await;
		assert_eq!(stored.expect("token file unreadable"), Some(SyncToken("1".to_owned())));
	}
}
