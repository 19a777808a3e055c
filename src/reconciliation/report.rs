//! Textual run reports
use std::{
	collections::{BTreeMap, BTreeSet},
	fmt::Write,
};

use itertools::Itertools;
use serde::Deserialize;

use super::{ResourceOperation, ResultStatus, SyncResult};
use crate::entity::SubjectType;

/// Report verbosity, from nothing to every result
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceLevel {
	/// No report
	None,
	/// Only failed results
	Failures,
	/// Counts per bucket plus failed results
	#[default]
	Summary,
	/// Counts plus every result
	All,
}

/// Bucket key: subject type × operation × status
type Bucket = (SubjectType, ResourceOperation, ResultStatus);

/// Render the report of a run.
///
/// The output depends only on its inputs, so replaying the same deltas
/// yields the same text.
#[must_use]
pub fn generate(
	subject_type: SubjectType,
	dry_run: bool,
	results: &[SyncResult],
	level: TraceLevel,
) -> String {
	if level == TraceLevel::None {
		return String::new();
	}

	let mut buckets: BTreeMap<Bucket, Vec<&SyncResult>> = BTreeMap::new();
	for result in results {
		buckets.entry((result.subject_type, result.operation, result.status)).or_default().push(result);
	}
	let mut subject_types: BTreeSet<SubjectType> =
		results.iter().map(|result| result.subject_type).collect();
	subject_types.insert(subject_type);

	let count = |key: Bucket| buckets.get(&key).map_or(0, Vec::len);
	let mut report = String::new();

	if dry_run {
		report.push_str("==> Dry run only, no modifications were made <==\n\n");
	}

	if level >= TraceLevel::Summary {
		for subject_type in &subject_types {
			let mut line = subject_type.plural().to_owned();
			for (operation, label) in [
				(ResourceOperation::Create, "created"),
				(ResourceOperation::Update, "updated"),
				(ResourceOperation::Delete, "deleted"),
			] {
				let _ = write!(
					line,
					" [{label}/failures]: {}/{}",
					count((*subject_type, operation, ResultStatus::Success)),
					count((*subject_type, operation, ResultStatus::Failure)),
				);
			}
			let _ = write!(
				line,
				" [no operation/ignored]: {}",
				count((*subject_type, ResourceOperation::None, ResultStatus::Success))
					+ count((*subject_type, ResourceOperation::None, ResultStatus::Failure)),
			);
			report.push_str(&line);
			report.push('\n');
		}
	}

	let statuses: &[ResultStatus] = if level == TraceLevel::All {
		&[ResultStatus::Failure, ResultStatus::Success]
	} else {
		&[ResultStatus::Failure]
	};
	for status in statuses {
		for ((subject_type, operation, _), bucket) in
			buckets.iter().filter(|((_, _, bucket_status), _)| bucket_status == status)
		{
			let heading = match status {
				ResultStatus::Failure => format!("{} failed to {}", subject_type.plural(), verb(*operation)),
				ResultStatus::Success => format!("{} {}", subject_type.plural(), past(*operation)),
			};
			let lines = bucket.iter().map(|result| describe(result)).join("\n");
			let _ = write!(report, "\n{heading}:\n{lines}\n");
		}
	}

	report
}

/// One line per result
fn describe(result: &SyncResult) -> String {
	match &result.message {
		Some(message) => format!("  {} ({}): {}", result.name, result.id, message),
		None => format!("  {} ({})", result.name, result.id),
	}
}

/// Infinitive label of an operation
fn verb(operation: ResourceOperation) -> &'static str {
	match operation {
		ResourceOperation::Create => "create",
		ResourceOperation::Update => "update",
		ResourceOperation::Delete => "delete",
		ResourceOperation::None => "process",
	}
}

/// Past tense label of an operation
fn past(operation: ResourceOperation) -> &'static str {
	match operation {
		ResourceOperation::Create => "created",
		ResourceOperation::Update => "updated",
		ResourceOperation::Delete => "deleted",
		ResourceOperation::None => "with no operation",
	}
}

#[cfg(test)]
mod tests {
	use indoc::indoc;

	use super::*;

	fn results() -> Vec<SyncResult> {
		vec![
			SyncResult::success(ResourceOperation::Create, SubjectType::User, 1, "alice"),
			SyncResult::success(ResourceOperation::Update, SubjectType::User, 2, "bob"),
			SyncResult::success(ResourceOperation::Create, SubjectType::User, 0, "carol")
				.failed("workflow failed: duplicate name"),
			SyncResult::success(ResourceOperation::None, SubjectType::User, 3, "dave"),
		]
	}

	#[test]
	fn test_none_is_empty() {
		assert_eq!(generate(SubjectType::User, false, &results(), TraceLevel::None), "");
	}

	#[test]
	fn test_failures_only() {
		let report = generate(SubjectType::User, false, &results(), TraceLevel::Failures);
		assert_eq!(
			report,
			"\nUsers failed to create:\n  carol (0): workflow failed: duplicate name\n"
		);
	}

	#[test]
	fn test_summary() {
		let report = generate(SubjectType::User, true, &results(), TraceLevel::Summary);
		assert_eq!(
			report,
			indoc! {"
				==> Dry run only, no modifications were made <==

				Users [created/failures]: 1/1 [updated/failures]: 1/0 [deleted/failures]: 0/0 [no operation/ignored]: 1

				Users failed to create:
				  carol (0): workflow failed: duplicate name
			"}
		);
	}

	#[test]
	fn test_all_lists_successes() {
		let report = generate(SubjectType::User, false, &results(), TraceLevel::All);
		assert!(report.contains("\nUsers created:\n  alice (1)\n"));
		assert!(report.contains("\nUsers updated:\n  bob (2)\n"));
		assert!(report.contains("\nUsers with no operation:\n  dave (3)\n"));
	}

	#[test]
	fn test_empty_run_still_summarizes_task_subject() {
		let report = generate(SubjectType::Role, false, &[], TraceLevel::Summary);
		assert_eq!(
			report,
			"Roles [created/failures]: 0/0 [updated/failures]: 0/0 [deleted/failures]: 0/0 [no operation/ignored]: 0\n"
		);
	}
}
