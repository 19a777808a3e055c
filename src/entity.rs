//! Local entities: users, roles and memberships carrying mapped attributes
use std::{
	collections::{BTreeMap, BTreeSet},
	fmt::Display,
};

use serde::{Deserialize, Serialize};

use crate::attribute::{AttributeSet, AttributeValue};

/// Kind of local entity
#[derive(
	Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SubjectType {
	/// A user
	#[default]
	User,
	/// A role
	Role,
	/// A user's membership in a role
	Membership,
}

impl SubjectType {
	/// Plural label used in reports
	#[must_use]
	pub fn plural(self) -> &'static str {
		match self {
			Self::User => "Users",
			Self::Role => "Roles",
			Self::Membership => "Memberships",
		}
	}
}

impl Display for SubjectType {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::User => write!(f, "user"),
			Self::Role => write!(f, "role"),
			Self::Membership => write!(f, "membership"),
		}
	}
}

/// Schema family an internal attribute belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeKind {
	/// Stored attribute
	Plain,
	/// Computed from other attributes, read only
	Derived,
	/// Fetched from a resource on demand, never stored
	Virtual,
}

/// A user, role or membership as held by the local repository
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributable {
	/// Local id; 0 until the repository assigned one
	pub id: u64,
	/// What kind of entity this is
	pub subject_type: SubjectType,
	/// Username or role name
	pub name: String,
	/// Clear text password, only present while being created or changed
	pub password: Option<String>,
	/// Plain attributes
	pub plain: AttributeSet,
	/// Derived attributes
	pub derived: AttributeSet,
	/// Virtual attributes
	pub virtuals: AttributeSet,
	/// Resources the entity is linked to
	pub resources: BTreeSet<String>,
}

impl Attributable {
	/// Create an empty entity of the given type
	#[must_use]
	pub fn new(subject_type: SubjectType, name: impl Into<String>) -> Self {
		Self { subject_type, name: name.into(), ..Self::default() }
	}

	/// Borrow the attribute family of the given kind
	#[must_use]
	pub fn attributes(&self, kind: AttributeKind) -> &AttributeSet {
		match kind {
			AttributeKind::Plain => &self.plain,
			AttributeKind::Derived => &self.derived,
			AttributeKind::Virtual => &self.virtuals,
		}
	}

	/// Mutably borrow the attribute family of the given kind
	pub fn attributes_mut(&mut self, kind: AttributeKind) -> &mut AttributeSet {
		match kind {
			AttributeKind::Plain => &mut self.plain,
			AttributeKind::Derived => &mut self.derived,
			AttributeKind::Virtual => &mut self.virtuals,
		}
	}
}

/// A set of explicit changes to apply to an entity.
///
/// Every field maps onto exactly one field of [`Attributable`]; there is no
/// generic property copying.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityPatch {
	/// New name
	pub name: Option<String>,
	/// New password
	pub password: Option<String>,
	/// Plain attributes to set
	pub plain_upserts: AttributeSet,
	/// Plain attributes to remove
	pub plain_removals: BTreeSet<String>,
	/// Virtual attributes to set
	pub virtual_upserts: AttributeSet,
	/// Virtual attributes to remove
	pub virtual_removals: BTreeSet<String>,
	/// Resources to link
	pub resources_to_add: BTreeSet<String>,
	/// Resources to unlink
	pub resources_to_remove: BTreeSet<String>,
}

impl EntityPatch {
	/// Whether the patch would change nothing
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.name.is_none()
			&& self.password.is_none()
			&& self.plain_upserts.is_empty()
			&& self.plain_removals.is_empty()
			&& self.virtual_upserts.is_empty()
			&& self.virtual_removals.is_empty()
			&& self.resources_to_add.is_empty()
			&& self.resources_to_remove.is_empty()
	}

	/// A patch that only links a resource
	#[must_use]
	pub fn link(resource: &str) -> Self {
		Self { resources_to_add: BTreeSet::from([resource.to_owned()]), ..Self::default() }
	}

	/// A patch that only unlinks a resource
	#[must_use]
	pub fn unlink(resource: &str) -> Self {
		Self { resources_to_remove: BTreeSet::from([resource.to_owned()]), ..Self::default() }
	}

	/// Set a plain attribute
	pub fn set_plain(&mut self, name: &str, values: Vec<AttributeValue>) {
		self.plain_removals.remove(name);
		self.plain_upserts.insert(name.to_owned(), values);
	}

	/// Apply the patch and return the names of the attributes it touched.
	///
	/// `name` and `password` are reported as `__NAME__` and `__PASSWORD__`.
	pub fn apply(&self, entity: &mut Attributable) -> BTreeSet<String> {
		let mut affected = BTreeSet::new();

		if let Some(name) = &self.name {
			entity.name.clone_from(name);
			affected.insert(NAME_ATTRIBUTE.to_owned());
		}
		if let Some(password) = &self.password {
			entity.password = Some(password.clone());
			affected.insert(PASSWORD_ATTRIBUTE.to_owned());
		}

		apply_family(&mut entity.plain, &self.plain_upserts, &self.plain_removals, &mut affected);
		apply_family(
			&mut entity.virtuals,
			&self.virtual_upserts,
			&self.virtual_removals,
			&mut affected,
		);

		entity.resources.extend(self.resources_to_add.iter().cloned());
		for resource in &self.resources_to_remove {
			entity.resources.remove(resource);
		}

		affected
	}
}

/// Pseudo attribute name for the entity name in affected-attribute sets
pub const NAME_ATTRIBUTE: &str = "__NAME__";
/// Pseudo attribute name for the password in affected-attribute sets
pub const PASSWORD_ATTRIBUTE: &str = "__PASSWORD__";

/// Apply upserts and removals to one attribute family
fn apply_family(
	target: &mut AttributeSet,
	upserts: &BTreeMap<String, Vec<AttributeValue>>,
	removals: &BTreeSet<String>,
	affected: &mut BTreeSet<String>,
) {
	for (name, values) in upserts {
		target.insert(name.clone(), values.clone());
		affected.insert(name.clone());
	}
	for name in removals {
		if target.remove(name).is_some() {
			affected.insert(name.clone());
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_apply_reports_touched_attributes() {
		let mut entity = Attributable::new(SubjectType::User, "alice");
		entity.plain.insert("mail".to_owned(), vec!["old@example.com".into()]);
		entity.plain.insert("phone".to_owned(), vec!["123".into()]);

		let mut patch = EntityPatch::link("ldap");
		patch.set_plain("mail", vec!["new@example.com".into()]);
		patch.plain_removals.insert("phone".to_owned());
		patch.plain_removals.insert("never-there".to_owned());

		let affected = patch.apply(&mut entity);

		assert_eq!(affected, BTreeSet::from(["mail".to_owned(), "phone".to_owned()]));
		assert_eq!(entity.plain.get("mail"), Some(&vec!["new@example.com".into()]));
		assert!(!entity.plain.contains_key("phone"));
		assert!(entity.resources.contains("ldap"));
	}

	#[test]
	fn test_empty_patch() {
		assert!(EntityPatch::default().is_empty());
		assert!(!EntityPatch::unlink("ldap").is_empty());
	}

	#[test]
	fn test_default_entity_is_a_user() {
		assert_eq!(SubjectType::default(), SubjectType::User);
		assert_eq!(Attributable::default().subject_type, SubjectType::User);
	}
}
