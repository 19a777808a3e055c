//! Pull reconciliation from a resource into the local repository
#![allow(clippy::expect_used)]

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use identity_sync::{
	attribute::{AttributeSet, AttributeValue},
	collaborators::{Context, CorrelationRule, EntityRepository},
	connector::{Connector, SyncDelta, SyncToken},
	entity::{Attributable, EntityPatch, SubjectType},
	mapping::ResourceMapping,
	propagation::ExecStatus,
	reconciliation::{
		ConflictResolutionAction, HookErrorScope, MatchingRule, ResourceOperation, ResultStatus,
		SyncResult, TraceLevel, UnmatchingRule,
	},
	resource::ResourceRegistry,
	test_helpers::{
		MemoryConnector, MemoryRepository, MemoryTokenStore, MemoryWorkflow, RecordingActions,
		RecordingSink,
	},
	Config, MappingError, ReconciliationEngine, SyncError, SyncTask,
};
use indoc::indoc;
use test_log::test;

const CONFIG: &str = indoc! {"
	resources:
	  - name: ldap
	    mappings:
	      - subject_type: user
	        object_class: __ACCOUNT__
	        items:
	          - ext_attr_name: uid
	            int_attr_name: ldap_uid
	            int_mapping_type: plain
	            accountid: true
	          - ext_attr_name: name
	            int_mapping_type: username
	          - ext_attr_name: mail
	            int_attr_name: email
	            int_mapping_type: plain
	          - ext_attr_name: phone
	            int_attr_name: phone
	            int_mapping_type: plain
	  - name: crm
	    propagation_primary: true
	    mappings:
	      - subject_type: user
	        object_class: contact
	        items:
	          - ext_attr_name: login
	            int_mapping_type: username
	            accountid: true
	          - ext_attr_name: email
	            int_attr_name: email
	            int_mapping_type: plain
	sync_tasks:
	  - name: ldap-users
	    resource: ldap
	    subject_type: user
"};

/// An engine over in-memory collaborators, pulling users from `ldap`
struct Harness {
	config: Config,
	ldap: Arc<MemoryConnector>,
	crm: Arc<MemoryConnector>,
	resources: Arc<ResourceRegistry>,
	repository: Arc<MemoryRepository>,
	workflow: Arc<MemoryWorkflow>,
	tokens: Arc<MemoryTokenStore>,
	audit: Arc<RecordingSink>,
	notifications: Arc<RecordingSink>,
}

impl Harness {
	fn new() -> Self {
		let config: Config = serde_yaml::from_str(CONFIG).expect("invalid config");
		config.validate().expect("config should be valid");

		let ldap = Arc::new(MemoryConnector::new("ldap", "uid"));
		let crm = Arc::new(MemoryConnector::new("crm", "login"));
		let mut connectors: HashMap<String, Arc<dyn Connector>> = HashMap::new();
		connectors.insert("ldap".to_owned(), ldap.clone());
		connectors.insert("crm".to_owned(), crm.clone());
		let resources = Arc::new(config.resource_registry(connectors).expect("invalid resources"));
		let repository = Arc::new(MemoryRepository::new());

		Self {
			config,
			ldap,
			crm,
			resources,
			workflow: Arc::new(MemoryWorkflow::new(repository.clone())),
			repository,
			tokens: Arc::new(MemoryTokenStore::new()),
			audit: Arc::new(RecordingSink::new()),
			notifications: Arc::new(RecordingSink::new()),
		}
	}

	fn engine(&self) -> ReconciliationEngine {
		ReconciliationEngine::new(
			self.resources.clone(),
			self.repository.clone(),
			self.workflow.clone(),
			self.tokens.clone(),
		)
		.with_audit(self.audit.clone())
		.with_notifications(self.notifications.clone())
	}

	fn task(&self) -> SyncTask {
		self.config.sync_task("ldap-users").expect("task missing").clone()
	}

	/// Store a user known on `ldap` as `uid`
	fn add_user(&self, name: &str, uid: &str, resources: &[&str], plain: &[(&str, &str)]) -> u64 {
		let mut user = Attributable::new(SubjectType::User, name);
		user.plain.insert("ldap_uid".to_owned(), vec![AttributeValue::from(uid)]);
		for (attribute, value) in plain {
			user.plain.insert((*attribute).to_owned(), vec![AttributeValue::from(*value)]);
		}
		user.resources = resources.iter().map(|resource| (*resource).to_owned()).collect();
		self.repository.insert(user)
	}

	fn user(&self, id: u64) -> Option<Attributable> {
		self.repository.get(SubjectType::User, id)
	}
}

fn attrs(pairs: &[(&str, &str)]) -> AttributeSet {
	pairs
		.iter()
		.map(|(name, value)| ((*name).to_owned(), vec![AttributeValue::from(*value)]))
		.collect()
}

fn upsert(uid: &str, pairs: &[(&str, &str)]) -> SyncDelta {
	SyncDelta::create_or_update(uid, "__ACCOUNT__", attrs(pairs))
}

fn ctx() -> Context {
	Context::new("admin")
}

/// Correlates every delta to a fixed list of ids
struct FixedCorrelation(Vec<u64>);

#[async_trait]
impl CorrelationRule for FixedCorrelation {
	async fn correlate(
		&self,
		_ctx: &Context,
		_delta: &SyncDelta,
		_mapping: &ResourceMapping,
		_repository: &dyn EntityRepository,
	) -> Result<Vec<u64>, SyncError> {
		Ok(self.0.clone())
	}
}

#[test(tokio::test)]
async fn test_assign_creates_links_and_propagates() {
	let harness = Harness::new();
	harness.ldap.insert_object("__ACCOUNT__", "u1", attrs(&[("uid", "u1"), ("name", "alice")]));
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
	let mut task = harness.task();
	task.unmatching_rule = UnmatchingRule::Assign;

	let summary = harness.engine().run(&ctx(), &task).await.expect("run failed");

	assert_eq!(
		summary.results,
		[SyncResult::success(ResourceOperation::Create, SubjectType::User, 1, "alice")]
	);
	let user = harness.user(1).expect("user not created");
	assert!(user.resources.contains("ldap"));
	assert_eq!(user.plain["ldap_uid"], vec![AttributeValue::from("u1")]);

	assert_eq!(summary.propagation.len(), 1);
	assert_eq!(summary.propagation[0].resource, "ldap");
	assert_eq!(summary.propagation[0].status, ExecStatus::Success);
	assert_eq!(harness.ldap.writes(), ["update u1"]);

	assert_eq!(harness.audit.events().len(), 1);
	assert_eq!(harness.notifications.events().len(), 1);
	assert_eq!(harness.audit.events()[0].task, "ldap-users");
}

#[test(tokio::test)]
async fn test_provision_does_not_link() {
	let harness = Harness::new();
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));

	let summary = harness.engine().run(&ctx(), &harness.task()).await.expect("run failed");

	assert_eq!(summary.results.len(), 1);
	assert_eq!(summary.results[0].operation, ResourceOperation::Create);
	assert!(harness.user(1).expect("user not created").resources.is_empty());
	assert!(summary.propagation.is_empty());
	assert!(harness.ldap.writes().is_empty());
}

#[test(tokio::test)]
async fn test_unmatched_ignore_does_nothing() {
	let harness = Harness::new();
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
	let mut task = harness.task();
	task.unmatching_rule = UnmatchingRule::Ignore;

	let summary = harness.engine().run(&ctx(), &task).await.expect("run failed");

	assert!(summary.results.is_empty());
	assert!(harness.workflow.calls().is_empty());
}

#[test(tokio::test)]
async fn test_delete_without_match_is_a_no_op() {
	let harness = Harness::new();
	harness.add_user("alice", "u1", &[], &[]);
	harness.ldap.push_delta(SyncDelta::delete("ghost", "__ACCOUNT__"));

	let summary = harness.engine().run(&ctx(), &harness.task()).await.expect("run failed");

	assert!(summary.results.is_empty());
	assert!(harness.workflow.calls().is_empty());
	assert!(harness.user(1).is_some());
	assert!(harness.audit.events().is_empty());
}

#[test(tokio::test)]
async fn test_update_only_sends_changed_attributes() {
	let harness = Harness::new();
	let id = harness.add_user(
		"alice",
		"u1",
		&["ldap", "crm"],
		&[("email", "old@example.org"), ("phone", "123")],
	);
	harness.crm.insert_object("contact", "alice", attrs(&[("login", "alice")]));
	harness.ldap.push_delta(upsert(
		"u1",
		&[("uid", "u1"), ("name", "alice"), ("mail", "new@example.org"), ("phone", "123")],
	));

	let summary = harness.engine().run(&ctx(), &harness.task()).await.expect("run failed");

	let mut expected = EntityPatch::default();
	expected.set_plain("email", vec![AttributeValue::from("new@example.org")]);
	assert_eq!(harness.workflow.patches(), [expected]);
	assert_eq!(
		summary.results,
		[SyncResult::success(ResourceOperation::Update, SubjectType::User, id, "alice")]
	);

	// propagated everywhere except back to the resource it came from
	assert!(harness.ldap.writes().is_empty());
	assert_eq!(harness.crm.writes(), ["update alice"]);
	let contact = harness.crm.object("alice").expect("contact missing");
	assert_eq!(contact.attributes["email"], vec![AttributeValue::from("new@example.org")]);
}

#[test(tokio::test)]
async fn test_unchanged_delta_updates_nothing() {
	let harness = Harness::new();
	harness.add_user("alice", "u1", &["crm"], &[("email", "alice@example.org")]);
	harness.ldap.push_delta(upsert(
		"u1",
		&[("uid", "u1"), ("name", "alice"), ("mail", "alice@example.org")],
	));

	let summary = harness.engine().run(&ctx(), &harness.task()).await.expect("run failed");

	assert_eq!(summary.results.len(), 1);
	assert_eq!(summary.results[0].status, ResultStatus::Success);
	assert!(harness.workflow.calls().is_empty());
	assert!(harness.crm.writes().is_empty());
}

#[test(tokio::test)]
async fn test_unassign_deprovisions_and_unlinks() {
	let harness = Harness::new();
	let id = harness.add_user("alice", "u1", &["ldap"], &[]);
	harness.ldap.insert_object("__ACCOUNT__", "u1", attrs(&[("uid", "u1")]));
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
	let mut task = harness.task();
	task.matching_rule = MatchingRule::Unassign;

	let summary = harness.engine().run(&ctx(), &task).await.expect("run failed");

	assert_eq!(
		summary.results,
		[SyncResult::success(ResourceOperation::Delete, SubjectType::User, id, "alice")]
	);
	assert!(harness.ldap.object("u1").is_none());
	assert!(harness.user(id).expect("user vanished").resources.is_empty());
}

#[test(tokio::test)]
async fn test_deprovision_keeps_the_link() {
	let harness = Harness::new();
	let id = harness.add_user("alice", "u1", &["ldap"], &[]);
	harness.ldap.insert_object("__ACCOUNT__", "u1", attrs(&[("uid", "u1")]));
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
	let mut task = harness.task();
	task.matching_rule = MatchingRule::Deprovision;

	harness.engine().run(&ctx(), &task).await.expect("run failed");

	assert_eq!(harness.ldap.writes(), ["delete u1"]);
	assert!(harness.user(id).expect("user vanished").resources.contains("ldap"));
}

#[test(tokio::test)]
async fn test_link_and_unlink_never_propagate() {
	let harness = Harness::new();
	let id = harness.add_user("alice", "u1", &[], &[]);
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
	let mut task = harness.task();
	task.matching_rule = MatchingRule::Link;

	let summary = harness.engine().run(&ctx(), &task).await.expect("run failed");
	assert_eq!(summary.results[0].operation, ResourceOperation::None);
	assert!(harness.user(id).expect("user vanished").resources.contains("ldap"));

	task.matching_rule = MatchingRule::Unlink;
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
	harness.engine().run(&ctx(), &task).await.expect("run failed");
	assert!(harness.user(id).expect("user vanished").resources.is_empty());

	assert!(harness.ldap.writes().is_empty());
	assert!(harness.crm.writes().is_empty());
}

#[test(tokio::test)]
async fn test_remote_delete_removes_entity_and_propagates() {
	let harness = Harness::new();
	let id = harness.add_user("alice", "u1", &["ldap", "crm"], &[]);
	harness.crm.insert_object("contact", "alice", attrs(&[("login", "alice")]));
	harness.ldap.push_delta(SyncDelta::delete("u1", "__ACCOUNT__"));

	let summary = harness.engine().run(&ctx(), &harness.task()).await.expect("run failed");

	assert_eq!(
		summary.results,
		[SyncResult::success(ResourceOperation::Delete, SubjectType::User, id, "alice")]
	);
	assert!(harness.user(id).is_none());
	assert_eq!(harness.crm.writes(), ["delete alice"]);
	assert!(harness.ldap.writes().is_empty());
}

#[test(tokio::test)]
async fn test_renamed_object_correlates_on_previous_uid() {
	let harness = Harness::new();
	let id = harness.add_user("alice", "u1", &[], &[]);
	harness.ldap.push_delta(upsert("u9", &[("uid", "u9"), ("name", "alice")]).renamed_from("u1"));

	let summary = harness.engine().run(&ctx(), &harness.task()).await.expect("run failed");

	assert_eq!(summary.results[0].operation, ResourceOperation::Update);
	assert_eq!(harness.user(id).expect("user vanished").plain["ldap_uid"], vec![AttributeValue::from("u9")]);
}

#[test(tokio::test)]
async fn test_disambiguation() {
	for (policy, expected) in [
		(ConflictResolutionAction::FirstMatch, vec![1]),
		(ConflictResolutionAction::LastMatch, vec![2]),
		(ConflictResolutionAction::All, vec![1, 2]),
		(ConflictResolutionAction::Ignore, vec![]),
	] {
		let harness = Harness::new();
		harness.add_user("alice", "u1", &[], &[]);
		harness.add_user("alice2", "u1", &[], &[]);
		harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
		let mut task = harness.task();
		task.conflict_policy = policy;
		task.matching_rule = MatchingRule::Ignore;

		let summary = harness.engine().run(&ctx(), &task).await.expect("run failed");

		let ids: Vec<u64> = summary.results.iter().map(|result| result.id).collect();
		assert_eq!(ids, expected, "{policy:?}");
		assert!(summary.results.iter().all(|result| result.operation == ResourceOperation::None));
		assert!(harness.workflow.calls().is_empty());
	}
}

#[test(tokio::test)]
async fn test_vanished_entity_skips_only_its_id() {
	let harness = Harness::new();
	let alice = harness.add_user("alice", "u1", &[], &[]);
	let bob = harness.add_user("bob", "u1", &[], &[]);
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("mail", "shared@example.org")]));
	let mut task = harness.task();
	task.conflict_policy = ConflictResolutionAction::All;

	let summary = harness
		.engine()
		.with_correlation(Arc::new(FixedCorrelation(vec![alice, 99, bob])))
		.run(&ctx(), &task)
		.await
		.expect("run failed");

	let ids: Vec<u64> = summary.results.iter().map(|result| result.id).collect();
	assert_eq!(ids, [alice, bob]);
	assert!(summary.results.iter().all(|result| result.status == ResultStatus::Success));
	assert_eq!(harness.workflow.calls(), [format!("update {alice}"), format!("update {bob}")]);
	assert_eq!(harness.tokens.get("ldap-users"), Some(SyncToken("1".to_owned())));
}

#[test(tokio::test)]
async fn test_side_channel_failures_do_not_abort() {
	let harness = Harness::new();
	harness.audit.set_unavailable();
	harness.notifications.set_unavailable();
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
	harness.ldap.push_delta(upsert("u2", &[("uid", "u2"), ("name", "bob")]));

	let summary = harness.engine().run(&ctx(), &harness.task()).await.expect("run failed");

	assert_eq!(summary.results.len(), 2);
	assert!(summary.results.iter().all(|result| result.status == ResultStatus::Success));
	assert_eq!(harness.workflow.calls(), ["create alice", "create bob"]);
	assert!(harness.audit.events().is_empty());
	assert!(harness.notifications.events().is_empty());
	assert_eq!(harness.tokens.get("ldap-users"), Some(SyncToken("2".to_owned())));
}

#[test(tokio::test)]
async fn test_dry_run_replay_gives_identical_reports() {
	let harness = Harness::new();
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
	harness.ldap.push_delta(upsert("u2", &[("uid", "u2"), ("name", "bob")]));
	let mut task = harness.task();
	task.dry_run = true;
	task.trace_level = TraceLevel::All;
	let engine = harness.engine();

	let first = engine.run(&ctx(), &task).await.expect("first run failed");
	let second = engine.run(&ctx(), &task).await.expect("second run failed");

	assert_eq!(first.report, second.report);
	assert_eq!(
		first.report,
		indoc! {"
			==> Dry run only, no modifications were made <==

			Users [created/failures]: 2/0 [updated/failures]: 0/0 [deleted/failures]: 0/0 [no operation/ignored]: 0

			Users created:
			  alice (0)
			  bob (0)
		"}
	);
	assert!(harness.workflow.calls().is_empty());
	assert!(harness.repository.all(SubjectType::User).is_empty());
	assert!(harness.ldap.writes().is_empty());
	assert_eq!(harness.tokens.get("ldap-users"), None);
	assert_eq!(first.persisted_token, None);
	// audited, but no notifications
	assert_eq!(harness.audit.events().len(), 4);
	assert!(harness.notifications.events().is_empty());
}

#[test(tokio::test)]
async fn test_global_dry_run_flag() {
	let harness = Harness::new();
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));

	let summary =
		harness.engine().with_dry_run(true).run(&ctx(), &harness.task()).await.expect("run failed");

	assert!(summary.report.starts_with("==> Dry run only"));
	assert!(harness.workflow.calls().is_empty());
}

#[test(tokio::test)]
async fn test_token_is_captured_before_pulling() {
	let harness = Harness::new();
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
	harness.ldap.push_delta(upsert("u2", &[("uid", "u2"), ("name", "bob")]));
	let task = harness.task();
	let engine = harness.engine();

	let summary = engine.run(&ctx(), &task).await.expect("first run failed");
	assert_eq!(summary.results.len(), 2);
	assert_eq!(summary.persisted_token, Some(SyncToken("2".to_owned())));
	assert_eq!(harness.tokens.get("ldap-users"), Some(SyncToken("2".to_owned())));
	let calls = harness.ldap.calls();
	let latest = calls.iter().position(|call| call == "get_latest_sync_token");
	let pulled = calls.iter().position(|call| call == "sync -");
	assert!(latest.is_some() && pulled.is_some() && latest < pulled, "{calls:?}");

	let summary = engine.run(&ctx(), &task).await.expect("second run failed");
	assert!(summary.results.is_empty());
	assert!(harness.ldap.calls().contains(&"sync 2".to_owned()));

	harness.ldap.push_delta(upsert("u3", &[("uid", "u3"), ("name", "carol")]));
	let summary = engine.run(&ctx(), &task).await.expect("third run failed");
	assert_eq!(summary.results.len(), 1);
	assert_eq!(summary.results[0].name, "carol");
	assert_eq!(harness.tokens.get("ldap-users"), Some(SyncToken("3".to_owned())));
}

#[test(tokio::test)]
async fn test_full_reconciliation_never_persists_a_token() {
	let harness = Harness::new();
	harness.ldap.insert_object("__ACCOUNT__", "u1", attrs(&[("uid", "u1"), ("name", "alice")]));
	harness.ldap.insert_object("__ACCOUNT__", "u2", attrs(&[("uid", "u2"), ("name", "bob")]));
	let mut task = harness.task();
	task.full_reconciliation = true;

	let summary = harness.engine().run(&ctx(), &task).await.expect("run failed");

	assert_eq!(summary.results.len(), 2);
	assert_eq!(summary.persisted_token, None);
	assert_eq!(harness.tokens.get("ldap-users"), None);
	let calls = harness.ldap.calls();
	assert!(calls.contains(&"search".to_owned()));
	assert!(!calls.iter().any(|call| call.starts_with("sync") || call == "get_latest_sync_token"));
}

#[test(tokio::test)]
async fn test_workflow_failure_is_recorded() {
	let harness = Harness::new();
	harness.workflow.fail_with("duplicate name");
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));

	let summary = harness.engine().run(&ctx(), &harness.task()).await.expect("run failed");

	assert_eq!(
		summary.results,
		[SyncResult::success(ResourceOperation::Create, SubjectType::User, 0, "alice")
			.failed("workflow failed: duplicate name")]
	);
	assert!(summary.report.contains("Users failed to create:\n  alice (0): workflow failed"));
	// per-entity failures do not hold back the token
	assert_eq!(harness.tokens.get("ldap-users"), Some(SyncToken("1".to_owned())));
}

#[test(tokio::test)]
async fn test_failed_primary_propagation_keeps_local_success() {
	let harness = Harness::new();
	let id = harness.add_user("alice", "u1", &["crm"], &[("email", "old@example.org")]);
	harness.crm.fail_writes("crm is down");
	harness.ldap.push_delta(upsert(
		"u1",
		&[("uid", "u1"), ("name", "alice"), ("mail", "new@example.org")],
	));

	let summary = harness.engine().run(&ctx(), &harness.task()).await.expect("run failed");

	assert_eq!(summary.results[0].status, ResultStatus::Success);
	assert_eq!(summary.propagation.len(), 1);
	assert_eq!(summary.propagation[0].status, ExecStatus::Failure);
	assert_eq!(
		harness.user(id).expect("user vanished").plain["email"],
		vec![AttributeValue::from("new@example.org")]
	);
}

#[test(tokio::test)]
async fn test_operation_switches() {
	let harness = Harness::new();
	harness.add_user("alice", "u1", &[], &[]);
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alicia")]));
	harness.ldap.push_delta(upsert("u2", &[("uid", "u2"), ("name", "bob")]));
	harness.ldap.push_delta(SyncDelta::delete("u1", "__ACCOUNT__"));
	let mut task = harness.task();
	task.perform_create = false;
	task.perform_update = false;
	task.perform_delete = false;

	let summary = harness.engine().run(&ctx(), &task).await.expect("run failed");

	assert!(summary.results.is_empty());
	assert!(harness.workflow.calls().is_empty());
}

#[test(tokio::test)]
async fn test_hooks_run_in_order() {
	let harness = Harness::new();
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
	let actions = Arc::new(RecordingActions::new());
	let mut task = harness.task();
	task.unmatching_rule = UnmatchingRule::Assign;

	harness.engine().with_action(actions.clone()).run(&ctx(), &task).await.expect("run failed");

	assert_eq!(
		actions.calls(),
		["before_all ldap-users", "before_assign alice", "after alice", "after_all ldap-users"]
	);
}

#[test(tokio::test)]
async fn test_hook_failure_skips_only_the_delta() {
	let harness = Harness::new();
	harness.add_user("alice", "u1", &[], &[]);
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice"), ("mail", "a@b.c")]));
	harness.ldap.push_delta(upsert("u2", &[("uid", "u2"), ("name", "bob")]));

	let summary = harness
		.engine()
		.with_action(Arc::new(RecordingActions::failing("before_update")))
		.run(&ctx(), &harness.task())
		.await
		.expect("run failed");

	assert_eq!(summary.results.len(), 2);
	assert_eq!(summary.results[0].operation, ResourceOperation::Update);
	assert_eq!(summary.results[0].status, ResultStatus::Failure);
	assert!(summary.results[0]
		.message
		.as_deref()
		.is_some_and(|message| message.contains("before_update refused alice")));
	assert_eq!(summary.results[1].name, "bob");
	assert_eq!(summary.results[1].status, ResultStatus::Success);
	assert_eq!(harness.workflow.calls(), ["create bob"]);
	assert!(harness.tokens.get("ldap-users").is_some());
}

#[test(tokio::test)]
async fn test_hook_failure_can_abort_the_run() {
	let harness = Harness::new();
	harness.add_user("alice", "u1", &[], &[]);
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice"), ("mail", "a@b.c")]));
	harness.ldap.push_delta(upsert("u2", &[("uid", "u2"), ("name", "bob")]));
	let mut task = harness.task();
	task.hook_error_scope = HookErrorScope::Run;

	let result = harness
		.engine()
		.with_action(Arc::new(RecordingActions::failing("before_update")))
		.run(&ctx(), &task)
		.await;

	assert!(matches!(result, Err(SyncError::Hook { hook: "before_update", .. })));
	assert!(harness.workflow.calls().is_empty());
	assert_eq!(harness.tokens.get("ldap-users"), None);
}

#[test(tokio::test)]
async fn test_missing_mapping_fails_before_pulling() {
	let harness = Harness::new();
	harness.ldap.push_delta(upsert("u1", &[("uid", "u1"), ("name", "alice")]));
	let task = SyncTask::new("ldap-roles", "ldap", SubjectType::Role);

	let result = harness.engine().run(&ctx(), &task).await;

	assert!(matches!(result, Err(SyncError::Mapping(MappingError::NoMapping { .. }))));
	assert!(harness.ldap.calls().is_empty());
}
