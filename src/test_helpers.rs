//! In-memory collaborators for tests and local experiments
use std::{
	collections::{BTreeMap, BTreeSet},
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tokio::sync::mpsc::Sender;

use crate::{
	attribute::{first_string, AttributeSet},
	collaborators::{
		AttributeCondition, AuditSink, Context, EntityRepository, NotificationSink, SyncEvent,
		WorkflowAdapter, WorkflowResult,
	},
	connector::{
		Capability, Connector, ConnectorObject, Filter, OperationOptions, SyncDelta, SyncToken, Uid,
	},
	entity::{Attributable, EntityPatch, SubjectType},
	error::{ConnectorError, ConnectorResult, SyncError},
	mapping::IntMappingType,
	reconciliation::{HookResult, SyncActions, SyncProfile, SyncResult},
	token_store::TokenStore,
};

/// Lock a mutex, ignoring poisoning
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A connector over an in-memory object table and a scripted change log.
///
/// Sync tokens are positions in the change log, so `sync` after token `n`
/// replays every delta pushed after the first `n`.
#[derive(Debug)]
pub struct MemoryConnector {
	/// Resource name
	name: String,
	/// Attribute whose first value becomes the uid of created objects
	uid_attribute: String,
	/// Enabled operations
	capabilities: Mutex<BTreeSet<Capability>>,
	/// Objects by uid
	objects: Mutex<BTreeMap<Uid, ConnectorObject>>,
	/// Change log
	deltas: Mutex<Vec<SyncDelta>>,
	/// Error message every write fails with, when set
	failing_writes: Mutex<Option<String>>,
	/// Every call, in order
	calls: Mutex<Vec<String>>,
}

impl MemoryConnector {
	/// An empty connector with every capability enabled
	pub fn new(name: impl Into<String>, uid_attribute: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			uid_attribute: uid_attribute.into(),
			capabilities: Mutex::new(BTreeSet::from([
				Capability::Authenticate,
				Capability::Create,
				Capability::Update,
				Capability::Delete,
				Capability::Search,
				Capability::Sync,
			])),
			objects: Mutex::default(),
			deltas: Mutex::default(),
			failing_writes: Mutex::default(),
			calls: Mutex::default(),
		}
	}

	/// Replace the enabled operations
	pub fn set_capabilities(&self, capabilities: impl IntoIterator<Item = Capability>) {
		*lock(&self.capabilities) = capabilities.into_iter().collect();
	}

	/// Put an object on the resource without recording a delta
	pub fn insert_object(&self, object_class: &str, uid: &str, attributes: AttributeSet) {
		lock(&self.objects).insert(
			Uid::from(uid),
			ConnectorObject { uid: Uid::from(uid), object_class: object_class.to_owned(), attributes },
		);
	}

	/// Append a delta to the change log
	pub fn push_delta(&self, delta: SyncDelta) {
		lock(&self.deltas).push(delta);
	}

	/// Make every create, update and delete fail with `message`
	pub fn fail_writes(&self, message: impl Into<String>) {
		*lock(&self.failing_writes) = Some(message.into());
	}

	/// Snapshot of an object
	pub fn object(&self, uid: &str) -> Option<ConnectorObject> {
		lock(&self.objects).get(&Uid::from(uid)).cloned()
	}

	/// Every call made so far, like `create alice` or `sync`
	pub fn calls(&self) -> Vec<String> {
		lock(&self.calls).clone()
	}

	/// Only the write calls made so far
	pub fn writes(&self) -> Vec<String> {
		self.calls()
			.into_iter()
			.filter(|call| {
				call.starts_with("create ") || call.starts_with("update ") || call.starts_with("delete ")
			})
			.collect()
	}

	/// Record a call
	fn record(&self, call: String) {
		lock(&self.calls).push(call);
	}

	/// Fail if writes are set to fail
	fn check_writable(&self) -> ConnectorResult<()> {
		match lock(&self.failing_writes).as_ref() {
			Some(message) => Err(ConnectorError::OperationFailed(message.clone())),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl Connector for MemoryConnector {
	fn name(&self) -> &str {
		&self.name
	}

	fn capabilities(&self) -> BTreeSet<Capability> {
		lock(&self.capabilities).clone()
	}

	async fn authenticate(
		&self,
		_object_class: &str,
		username: &str,
		password: &str,
	) -> ConnectorResult<Uid> {
		self.record(format!("authenticate {username}"));
		let objects = lock(&self.objects);
		let object = objects
			.get(&Uid::from(username))
			.ok_or_else(|| ConnectorError::AuthenticationFailed(username.to_owned()))?;
		match first_string(&object.attributes, "__PASSWORD__") {
			Some(stored) if stored == password => Ok(object.uid.clone()),
			_ => Err(ConnectorError::AuthenticationFailed(username.to_owned())),
		}
	}

	async fn create(
		&self,
		object_class: &str,
		attributes: AttributeSet,
		_options: &OperationOptions,
	) -> ConnectorResult<Uid> {
		let uid = first_string(&attributes, &self.uid_attribute).map(Uid::from).ok_or_else(|| {
			ConnectorError::InvalidConfiguration(format!("missing `{}`", self.uid_attribute))
		})?;
		self.record(format!("create {uid}"));
		self.check_writable()?;

		let mut objects = lock(&self.objects);
		if objects.contains_key(&uid) {
			return Err(ConnectorError::AlreadyExists(uid.to_string()));
		}
		objects.insert(
			uid.clone(),
			ConnectorObject { uid: uid.clone(), object_class: object_class.to_owned(), attributes },
		);
		Ok(uid)
	}

	async fn update(
		&self,
		_object_class: &str,
		uid: &Uid,
		attributes: AttributeSet,
		_options: &OperationOptions,
	) -> ConnectorResult<Uid> {
		self.record(format!("update {uid}"));
		self.check_writable()?;

		let mut objects = lock(&self.objects);
		let mut object =
			objects.remove(uid).ok_or_else(|| ConnectorError::ObjectNotFound(uid.to_string()))?;
		object.attributes.extend(attributes);
		if let Some(renamed) = first_string(&object.attributes, &self.uid_attribute) {
			object.uid = Uid::from(renamed);
		}
		let new_uid = object.uid.clone();
		objects.insert(new_uid.clone(), object);
		Ok(new_uid)
	}

	async fn delete(
		&self,
		_object_class: &str,
		uid: &Uid,
		_options: &OperationOptions,
	) -> ConnectorResult<()> {
		self.record(format!("delete {uid}"));
		self.check_writable()?;

		lock(&self.objects)
			.remove(uid)
			.map(drop)
			.ok_or_else(|| ConnectorError::ObjectNotFound(uid.to_string()))
	}

	async fn sync(
		&self,
		_object_class: &str,
		token: Option<&SyncToken>,
		_options: &OperationOptions,
		deltas: Sender<SyncDelta>,
	) -> ConnectorResult<()> {
		self.record(format!("sync {}", token.map_or("-", |token| token.0.as_str())));
		let start = match token {
			Some(token) => token.0.parse::<usize>().map_err(|_| {
				ConnectorError::InvalidConfiguration(format!("bad sync token `{}`", token.0))
			})?,
			None => 0,
		};
		let pending: Vec<SyncDelta> = lock(&self.deltas).iter().skip(start).cloned().collect();
		for delta in pending {
			deltas.send(delta).await.map_err(|_| ConnectorError::ChannelClosed)?;
		}
		Ok(())
	}

	async fn get_latest_sync_token(
		&self,
		_object_class: &str,
	) -> ConnectorResult<Option<SyncToken>> {
		self.record("get_latest_sync_token".to_owned());
		Ok(Some(SyncToken(lock(&self.deltas).len().to_string())))
	}

	async fn get_object(
		&self,
		_object_class: &str,
		uid: &Uid,
		_options: &OperationOptions,
	) -> ConnectorResult<Option<ConnectorObject>> {
		Ok(lock(&self.objects).get(uid).cloned())
	}

	async fn search(
		&self,
		object_class: &str,
		filter: Option<&Filter>,
		_options: &OperationOptions,
	) -> ConnectorResult<Vec<ConnectorObject>> {
		self.record("search".to_owned());
		Ok(lock(&self.objects)
			.values()
			.filter(|object| object.object_class == object_class)
			.filter(|object| filter.map_or(true, |filter| filter.matches(&object.attributes)))
			.cloned()
			.collect())
	}

	async fn get_schema_names(
		&self,
		object_class: &str,
		include_special: bool,
	) -> ConnectorResult<BTreeSet<String>> {
		Ok(lock(&self.objects)
			.values()
			.filter(|object| object.object_class == object_class)
			.flat_map(|object| object.attributes.keys().cloned())
			.filter(|name| include_special || !name.starts_with("__"))
			.collect())
	}

	async fn get_supported_object_classes(&self) -> ConnectorResult<BTreeSet<String>> {
		Ok(lock(&self.objects).values().map(|object| object.object_class.clone()).collect())
	}

	async fn validate(&self) -> ConnectorResult<()> {
		Ok(())
	}

	async fn test(&self) -> ConnectorResult<()> {
		Ok(())
	}
}

/// Entity storage in a map
#[derive(Debug, Default)]
pub struct MemoryRepository {
	/// Entities by subject type and id
	entities: Mutex<BTreeMap<(SubjectType, u64), Attributable>>,
	/// Last id handed out
	last_id: Mutex<u64>,
}

impl MemoryRepository {
	/// An empty repository
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Store an entity, assigning an id when it has none
	pub fn insert(&self, mut entity: Attributable) -> u64 {
		if entity.id == 0 {
			let mut last_id = lock(&self.last_id);
			*last_id += 1;
			entity.id = *last_id;
		}
		let id = entity.id;
		lock(&self.entities).insert((entity.subject_type, id), entity);
		id
	}

	/// Snapshot of an entity
	pub fn get(&self, subject_type: SubjectType, id: u64) -> Option<Attributable> {
		lock(&self.entities).get(&(subject_type, id)).cloned()
	}

	/// Snapshot of every entity of a type, in id order
	pub fn all(&self, subject_type: SubjectType) -> Vec<Attributable> {
		lock(&self.entities)
			.iter()
			.filter(|((entity_type, _), _)| *entity_type == subject_type)
			.map(|(_, entity)| entity.clone())
			.collect()
	}
}

#[async_trait]
impl EntityRepository for MemoryRepository {
	async fn find(
		&self,
		_ctx: &Context,
		subject_type: SubjectType,
		id: u64,
	) -> Result<Option<Attributable>, SyncError> {
		Ok(self.get(subject_type, id))
	}

	async fn search(
		&self,
		_ctx: &Context,
		subject_type: SubjectType,
		condition: &AttributeCondition,
	) -> Result<Vec<u64>, SyncError> {
		Ok(self
			.all(subject_type)
			.into_iter()
			.filter(|entity| match condition.mapping_type {
				IntMappingType::Username => condition.value.as_str() == Some(entity.name.as_str()),
				IntMappingType::Password => false,
				other => other
					.attribute_kind()
					.and_then(|kind| entity.attributes(kind).get(&condition.name))
					.is_some_and(|values| values.contains(&condition.value)),
			})
			.map(|entity| entity.id)
			.collect())
	}

	async fn save(&self, _ctx: &Context, entity: Attributable) -> Result<Attributable, SyncError> {
		let subject_type = entity.subject_type;
		let id = self.insert(entity);
		self.get(subject_type, id).ok_or(SyncError::NotFound { subject_type, id })
	}

	async fn delete(
		&self,
		_ctx: &Context,
		subject_type: SubjectType,
		id: u64,
	) -> Result<(), SyncError> {
		lock(&self.entities)
			.remove(&(subject_type, id))
			.map(drop)
			.ok_or(SyncError::NotFound { subject_type, id })
	}
}

/// A workflow that applies every request straight to a [`MemoryRepository`]
#[derive(Debug)]
pub struct MemoryWorkflow {
	/// Backing storage
	repository: Arc<MemoryRepository>,
	/// Every request, in order
	calls: Mutex<Vec<String>>,
	/// Every patch passed to `update`, in order
	patches: Mutex<Vec<EntityPatch>>,
	/// Error message every request fails with, when set
	failing: Mutex<Option<String>>,
}

impl MemoryWorkflow {
	/// A workflow over the repository
	#[must_use]
	pub fn new(repository: Arc<MemoryRepository>) -> Self {
		Self {
			repository,
			calls: Mutex::default(),
			patches: Mutex::default(),
			failing: Mutex::default(),
		}
	}

	/// Make every request fail with `message`
	pub fn fail_with(&self, message: impl Into<String>) {
		*lock(&self.failing) = Some(message.into());
	}

	/// Requests made so far, like `create alice` or `update 1`
	pub fn calls(&self) -> Vec<String> {
		lock(&self.calls).clone()
	}

	/// Patches passed to `update` so far
	pub fn patches(&self) -> Vec<EntityPatch> {
		lock(&self.patches).clone()
	}

	/// Record a request and fail if requests are set to fail
	fn request(&self, call: String) -> Result<(), SyncError> {
		lock(&self.calls).push(call);
		match lock(&self.failing).as_ref() {
			Some(message) => Err(SyncError::Workflow(message.clone())),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl WorkflowAdapter for MemoryWorkflow {
	async fn create(&self, ctx: &Context, entity: Attributable) -> Result<WorkflowResult, SyncError> {
		self.request(format!("create {}", entity.name))?;
		let mut affected: BTreeSet<String> = entity.plain.keys().cloned().collect();
		affected.extend(entity.virtuals.keys().cloned());
		let saved = self.repository.save(ctx, entity).await?;
		Ok(WorkflowResult { id: saved.id, name: saved.name, affected_attributes: affected })
	}

	async fn update(
		&self,
		ctx: &Context,
		subject_type: SubjectType,
		id: u64,
		patch: &EntityPatch,
	) -> Result<WorkflowResult, SyncError> {
		self.request(format!("update {id}"))?;
		lock(&self.patches).push(patch.clone());
		let mut entity = self
			.repository
			.find(ctx, subject_type, id)
			.await?
			.ok_or(SyncError::NotFound { subject_type, id })?;
		let affected = patch.apply(&mut entity);
		let saved = self.repository.save(ctx, entity).await?;
		Ok(WorkflowResult { id: saved.id, name: saved.name, affected_attributes: affected })
	}

	async fn delete(
		&self,
		ctx: &Context,
		subject_type: SubjectType,
		id: u64,
	) -> Result<WorkflowResult, SyncError> {
		self.request(format!("delete {id}"))?;
		let entity = self
			.repository
			.find(ctx, subject_type, id)
			.await?
			.ok_or(SyncError::NotFound { subject_type, id })?;
		self.repository.delete(ctx, subject_type, id).await?;
		Ok(WorkflowResult { id, name: entity.name, affected_attributes: BTreeSet::new() })
	}
}

/// Keeps every event it receives; usable as audit and notification sink
#[derive(Debug, Default)]
pub struct RecordingSink {
	/// Received events
	events: Mutex<Vec<SyncEvent>>,
	/// Whether every event is rejected
	unavailable: Mutex<bool>,
}

impl RecordingSink {
	/// An empty sink
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Reject every event from now on
	pub fn set_unavailable(&self) {
		*lock(&self.unavailable) = true;
	}

	/// Events received so far
	pub fn events(&self) -> Vec<SyncEvent> {
		lock(&self.events).clone()
	}

	/// Keep an event unless the sink is unavailable
	fn receive(&self, event: &SyncEvent) -> anyhow::Result<()> {
		if *lock(&self.unavailable) {
			anyhow::bail!("sink unavailable");
		}
		lock(&self.events).push(event.clone());
		Ok(())
	}
}

#[async_trait]
impl AuditSink for RecordingSink {
	async fn record(&self, _ctx: &Context, event: &SyncEvent) -> anyhow::Result<()> {
		self.receive(event)
	}
}

#[async_trait]
impl NotificationSink for RecordingSink {
	async fn notify(&self, _ctx: &Context, event: &SyncEvent) -> anyhow::Result<()> {
		self.receive(event)
	}
}

/// Sync tokens in a map
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
	/// Tokens by task name
	tokens: Mutex<BTreeMap<String, SyncToken>>,
}

impl MemoryTokenStore {
	/// An empty store
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Current token of a task
	pub fn get(&self, task: &str) -> Option<SyncToken> {
		lock(&self.tokens).get(task).cloned()
	}
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
	async fn load(&self, task: &str) -> anyhow::Result<Option<SyncToken>> {
		Ok(self.get(task))
	}

	async fn store(&self, task: &str, token: &SyncToken) -> anyhow::Result<()> {
		lock(&self.tokens).insert(task.to_owned(), token.clone());
		Ok(())
	}
}

/// Records every hook call and can fail a chosen hook
#[derive(Debug, Default)]
pub struct RecordingActions {
	/// Hook calls like `before_update alice`
	calls: Mutex<Vec<String>>,
	/// Name of the hook that fails, if any
	failing_hook: Option<&'static str>,
}

impl RecordingActions {
	/// Actions that never fail
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Actions whose hook named `hook` fails
	#[must_use]
	pub fn failing(hook: &'static str) -> Self {
		Self { calls: Mutex::default(), failing_hook: Some(hook) }
	}

	/// Hook calls so far
	pub fn calls(&self) -> Vec<String> {
		lock(&self.calls).clone()
	}

	/// Record a call and fail if it is the failing hook
	fn called(&self, hook: &'static str, subject: &str) -> HookResult<()> {
		lock(&self.calls).push(format!("{hook} {subject}").trim_end().to_owned());
		if self.failing_hook == Some(hook) {
			anyhow::bail!("{hook} refused {subject}");
		}
		Ok(())
	}
}

#[async_trait]
impl SyncActions for RecordingActions {
	async fn before_all(&self, profile: &SyncProfile<'_>) -> HookResult<()> {
		self.called("before_all", &profile.task.name)
	}

	async fn before_create(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		subject: &mut Attributable,
	) -> HookResult<SyncDelta> {
		self.called("before_create", &subject.name)?;
		Ok(delta)
	}

	async fn before_assign(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		subject: &mut Attributable,
	) -> HookResult<SyncDelta> {
		self.called("before_assign", &subject.name)?;
		Ok(delta)
	}

	async fn before_update(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		subject: &Attributable,
	) -> HookResult<SyncDelta> {
		self.called("before_update", &subject.name)?;
		Ok(delta)
	}

	async fn before_deprovision(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		subject: &Attributable,
	) -> HookResult<SyncDelta> {
		self.called("before_deprovision", &subject.name)?;
		Ok(delta)
	}

	async fn before_unassign(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		subject: &Attributable,
	) -> HookResult<SyncDelta> {
		self.called("before_unassign", &subject.name)?;
		Ok(delta)
	}

	async fn before_link(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		subject: &Attributable,
	) -> HookResult<SyncDelta> {
		self.called("before_link", &subject.name)?;
		Ok(delta)
	}

	async fn before_unlink(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		subject: &Attributable,
	) -> HookResult<SyncDelta> {
		self.called("before_unlink", &subject.name)?;
		Ok(delta)
	}

	async fn before_delete(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		subject: &Attributable,
	) -> HookResult<SyncDelta> {
		self.called("before_delete", &subject.name)?;
		Ok(delta)
	}

	async fn after(
		&self,
		_profile: &SyncProfile<'_>,
		_delta: &SyncDelta,
		_subject: Option<&Attributable>,
		result: &SyncResult,
	) -> HookResult<()> {
		self.called("after", &result.name)
	}

	async fn after_all(&self, profile: &SyncProfile<'_>) -> HookResult<()> {
		self.called("after_all", &profile.task.name)
	}
}
