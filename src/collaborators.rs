//! Narrow contracts to the systems around the engines: persistence,
//! workflow, correlation, audit and notification.
//!
//! The engines perform no transaction management; the persistence side is
//! assumed to make find/save/delete consistent on its own.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{
	attribute::AttributeValue,
	connector::SyncDelta,
	entity::{Attributable, EntityPatch, SubjectType},
	error::SyncError,
	mapping::{IntMappingType, ResourceMapping},
	reconciliation::SyncResult,
};

/// Who a call is made for. Passed explicitly to every collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Context {
	/// Authenticated principal
	pub principal: String,
	/// Correlation id for the logs of one run or request
	pub run_id: Uuid,
}

impl Context {
	/// A fresh context for the principal
	pub fn new(principal: impl Into<String>) -> Self {
		Self { principal: principal.into(), run_id: Uuid::new_v4() }
	}
}

/// Equality condition on one internal attribute
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeCondition {
	/// Attribute family, or username
	pub mapping_type: IntMappingType,
	/// Internal attribute name; ignored for username
	pub name: String,
	/// Value to look for
	pub value: AttributeValue,
}

/// Read and write access to stored entities
#[async_trait]
pub trait EntityRepository: Send + Sync {
	/// Find an entity by id
	async fn find(
		&self,
		ctx: &Context,
		subject_type: SubjectType,
		id: u64,
	) -> Result<Option<Attributable>, SyncError>;

	/// Ids of all entities matching the condition, in id order
	async fn search(
		&self,
		ctx: &Context,
		subject_type: SubjectType,
		condition: &AttributeCondition,
	) -> Result<Vec<u64>, SyncError>;

	/// Store an entity and return the managed copy; id 0 assigns a new id
	async fn save(&self, ctx: &Context, entity: Attributable) -> Result<Attributable, SyncError>;

	/// Remove an entity
	async fn delete(&self, ctx: &Context, subject_type: SubjectType, id: u64)
		-> Result<(), SyncError>;
}

/// What the workflow reports back for an entity operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowResult {
	/// Id of the entity
	pub id: u64,
	/// Name of the entity
	pub name: String,
	/// Internal attribute names the operation changed
	pub affected_attributes: BTreeSet<String>,
}

/// Entity lifecycle requests; the workflow's own states stay hidden
#[async_trait]
pub trait WorkflowAdapter: Send + Sync {
	/// Create an entity
	async fn create(&self, ctx: &Context, entity: Attributable) -> Result<WorkflowResult, SyncError>;

	/// Apply a patch to an entity
	async fn update(
		&self,
		ctx: &Context,
		subject_type: SubjectType,
		id: u64,
		patch: &EntityPatch,
	) -> Result<WorkflowResult, SyncError>;

	/// Delete an entity
	async fn delete(
		&self,
		ctx: &Context,
		subject_type: SubjectType,
		id: u64,
	) -> Result<WorkflowResult, SyncError>;
}

/// Finds the local entities a delta refers to
#[async_trait]
pub trait CorrelationRule: Send + Sync {
	/// Local ids matching the delta, in a stable order
	async fn correlate(
		&self,
		ctx: &Context,
		delta: &SyncDelta,
		mapping: &ResourceMapping,
		repository: &dyn EntityRepository,
	) -> Result<Vec<u64>, SyncError>;
}

/// Correlates on the mapped account id, using the previous uid of a
/// renamed object
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountIdCorrelation;

#[async_trait]
impl CorrelationRule for AccountIdCorrelation {
	async fn correlate(
		&self,
		ctx: &Context,
		delta: &SyncDelta,
		mapping: &ResourceMapping,
		repository: &dyn EntityRepository,
	) -> Result<Vec<u64>, SyncError> {
		let item = mapping.account_id_item();
		let condition = AttributeCondition {
			mapping_type: item.int_mapping_type,
			name: item.int_attr_name.clone(),
			value: AttributeValue::String(delta.correlation_uid().as_str().to_owned()),
		};
		repository.search(ctx, mapping.subject_type(), &condition).await
	}
}

/// One reconciliation outcome as seen by side channels
#[derive(Debug, Clone, PartialEq)]
pub struct SyncEvent {
	/// Sync task that produced the outcome
	pub task: String,
	/// Resource being reconciled
	pub resource: String,
	/// The outcome
	pub result: SyncResult,
	/// When it was produced
	pub at: DateTime<Utc>,
}

/// Audit log sink
#[async_trait]
pub trait AuditSink: Send + Sync {
	/// Record an outcome
	async fn record(&self, ctx: &Context, event: &SyncEvent) -> anyhow::Result<()>;
}

/// Notification task generator
#[async_trait]
pub trait NotificationSink: Send + Sync {
	/// Generate notification tasks for an outcome, if any apply
	async fn notify(&self, ctx: &Context, event: &SyncEvent) -> anyhow::Result<()>;
}

/// A sink that drops everything, for deployments without audit or
/// notifications
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl AuditSink for NoopSink {
	async fn record(&self, _ctx: &Context, _event: &SyncEvent) -> anyhow::Result<()> {
		Ok(())
	}
}

#[async_trait]
impl NotificationSink for NoopSink {
	async fn notify(&self, _ctx: &Context, _event: &SyncEvent) -> anyhow::Result<()> {
		Ok(())
	}
}
