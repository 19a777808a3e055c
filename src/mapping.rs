//! Attribute mapping between the internal schema and a resource's native
//! attributes.
//!
//! A [`ResourceMapping`] is only constructed through [`ResourceMapping::new`],
//! which enforces that exactly one item is the account id, that this item is
//! neither virtual nor the password, and that at most one item carries the
//! password. Reconciliation reads and the propagation existence probe both
//! take their attribute projection from [`ResourceMapping::operation_options`].

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::{
	attribute::{first_string, same_values, AttributeSet, AttributeValue},
	connector::{OperationOptions, Uid},
	entity::{
		AttributeKind, Attributable, EntityPatch, SubjectType, NAME_ATTRIBUTE, PASSWORD_ATTRIBUTE,
	},
	error::MappingError,
};

/// Direction(s) a mapping item is used in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingPurpose {
	/// Local to resource only
	Propagation,
	/// Resource to local only
	Synchronization,
	/// Both directions
	#[default]
	Both,
	/// Disabled
	None,
}

impl MappingPurpose {
	/// Whether an item with this purpose takes part in `wanted`
	#[must_use]
	pub fn covers(self, wanted: MappingPurpose) -> bool {
		match self {
			Self::None => false,
			Self::Both => wanted != Self::None,
			own => own == wanted || wanted == Self::Both,
		}
	}
}

/// Where the internal side of a mapping item lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntMappingType {
	/// The entity name
	Username,
	/// The entity password
	Password,
	/// A plain attribute
	Plain,
	/// A derived attribute
	Derived,
	/// A virtual attribute
	Virtual,
}

impl IntMappingType {
	/// Attribute family for schema-backed types
	#[must_use]
	pub fn attribute_kind(self) -> Option<AttributeKind> {
		match self {
			Self::Plain => Some(AttributeKind::Plain),
			Self::Derived => Some(AttributeKind::Derived),
			Self::Virtual => Some(AttributeKind::Virtual),
			Self::Username | Self::Password => None,
		}
	}
}

/// One field-level correspondence between an internal attribute and a
/// resource attribute
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MappingItem {
	/// Attribute name on the resource
	pub ext_attr_name: String,
	/// Internal schema name; unused for username and password
	#[serde(default)]
	pub int_attr_name: String,
	/// Internal attribute family
	pub int_mapping_type: IntMappingType,
	/// Direction(s) the item is used in
	#[serde(default)]
	pub purpose: MappingPurpose,
	/// Whether this item identifies the remote object
	#[serde(default, rename = "accountid")]
	pub account_id: bool,
	/// Whether this item carries the password
	#[serde(default)]
	pub password: bool,
}

impl MappingItem {
	/// Internal name as reported in affected-attribute sets
	#[must_use]
	pub fn internal_name(&self) -> &str {
		match self.int_mapping_type {
			IntMappingType::Username => NAME_ATTRIBUTE,
			IntMappingType::Password => PASSWORD_ATTRIBUTE,
			_ => &self.int_attr_name,
		}
	}

	/// Read the internal value(s) of this item from an entity
	#[must_use]
	pub fn values_of(&self, entity: &Attributable) -> Vec<AttributeValue> {
		match self.int_mapping_type {
			IntMappingType::Username => vec![AttributeValue::String(entity.name.clone())],
			IntMappingType::Password => {
				entity.password.iter().cloned().map(AttributeValue::String).collect()
			}
			_ => self
				.int_mapping_type
				.attribute_kind()
				.and_then(|kind| entity.attributes(kind).get(&self.int_attr_name))
				.cloned()
				.unwrap_or_default(),
		}
	}
}

/// Build connector options requesting exactly the external attributes of
/// `items`
pub fn operation_options<'a>(items: impl IntoIterator<Item = &'a MappingItem>) -> OperationOptions {
	OperationOptions {
		attributes_to_get: items
			.into_iter()
			.filter(|item| !item.password)
			.map(|item| item.ext_attr_name.clone())
			.collect(),
	}
}

/// A validated mapping of one subject type onto one resource
#[derive(Debug, Clone)]
pub struct ResourceMapping {
	/// Resource the mapping belongs to
	resource: String,
	/// Subject type being mapped
	subject_type: SubjectType,
	/// Remote object class
	object_class: String,
	/// All mapping items
	items: Vec<MappingItem>,
	/// Index of the account id item in `items`
	account_id: usize,
	/// Index of the password item in `items`, if any
	password: Option<usize>,
}

impl ResourceMapping {
	/// Validate the items and build the mapping
	pub fn new(
		resource: impl Into<String>,
		subject_type: SubjectType,
		object_class: impl Into<String>,
		items: Vec<MappingItem>,
	) -> Result<Self, MappingError> {
		let resource = resource.into();

		let mut account_ids = items.iter().enumerate().filter(|(_, item)| item.account_id);
		let account_id = match (account_ids.next(), account_ids.next()) {
			(None, _) => {
				return Err(MappingError::MissingAccountId { resource, subject_type });
			}
			(Some(_), Some(_)) => {
				return Err(MappingError::MultipleAccountIds { resource, subject_type });
			}
			(Some((index, item)), None) => {
				if item.password
					|| matches!(
						item.int_mapping_type,
						IntMappingType::Virtual | IntMappingType::Password
					) {
					return Err(MappingError::InvalidAccountId {
						resource,
						ext_attr_name: item.ext_attr_name.clone(),
					});
				}
				index
			}
		};

		if let Some(item) = items
			.iter()
			.find(|item| item.password != (item.int_mapping_type == IntMappingType::Password))
		{
			return Err(MappingError::InvalidPassword {
				resource,
				ext_attr_name: item.ext_attr_name.clone(),
			});
		}

		let mut passwords = items.iter().enumerate().filter(|(_, item)| item.password);
		let password = passwords.next().map(|(index, _)| index);
		if passwords.next().is_some() {
			return Err(MappingError::MultiplePasswords { resource });
		}

		Ok(Self { resource, subject_type, object_class: object_class.into(), items, account_id, password })
	}

	/// Resource name
	#[must_use]
	pub fn resource(&self) -> &str {
		&self.resource
	}

	/// Subject type
	#[must_use]
	pub fn subject_type(&self) -> SubjectType {
		self.subject_type
	}

	/// Remote object class
	#[must_use]
	pub fn object_class(&self) -> &str {
		&self.object_class
	}

	/// The item identifying the remote object
	#[must_use]
	pub fn account_id_item(&self) -> &MappingItem {
		&self.items[self.account_id]
	}

	/// The item carrying the password, if mapped
	#[must_use]
	pub fn password_item(&self) -> Option<&MappingItem> {
		self.password.map(|index| &self.items[index])
	}

	/// Items taking part in the given direction
	pub fn items(&self, purpose: MappingPurpose) -> impl Iterator<Item = &MappingItem> {
		self.items.iter().filter(move |item| item.purpose.covers(purpose))
	}

	/// Read options for the given direction.
	///
	/// The account id attribute is always requested, whatever its purpose.
	#[must_use]
	pub fn operation_options(&self, purpose: MappingPurpose) -> OperationOptions {
		let mut options = operation_options(self.items(purpose));
		options.attributes_to_get.insert(self.account_id_item().ext_attr_name.clone());
		options
	}

	/// The remote identifier of an entity, if it has a value for the account
	/// id item
	#[must_use]
	pub fn account_id_of(&self, entity: &Attributable) -> Option<Uid> {
		self.account_id_item().values_of(entity).first().map(|value| Uid::new(value.to_text()))
	}

	/// Build the connector write set for an entity.
	///
	/// Derived values are written but never read back. An empty password is
	/// left out rather than sent as a removal.
	#[must_use]
	pub fn write_attributes(&self, entity: &Attributable) -> AttributeSet {
		self.items(MappingPurpose::Propagation)
			.filter_map(|item| {
				let values = item.values_of(entity);
				(!(item.password && values.is_empty())).then(|| (item.ext_attr_name.clone(), values))
			})
			.collect()
	}

	/// Build the connector write set for an update that changed the given
	/// internal attributes.
	///
	/// The account id is always sent. Derived values cannot be traced back to
	/// their sources and are resent as well.
	#[must_use]
	pub fn changed_write_attributes(
		&self,
		entity: &Attributable,
		affected: &BTreeSet<String>,
	) -> AttributeSet {
		let changed = self.external_names(affected);
		let mut attributes = self.write_attributes(entity);
		attributes.retain(|name, _| {
			changed.contains(name)
				|| *name == self.account_id_item().ext_attr_name
				|| self.items.iter().any(|item| {
					item.int_mapping_type == IntMappingType::Derived && item.ext_attr_name == *name
				})
		});
		attributes
	}

	/// Build a new local entity from a remote attribute snapshot
	#[must_use]
	pub fn to_entity(&self, attributes: &AttributeSet) -> Attributable {
		let mut entity = Attributable::new(self.subject_type, String::new());
		for item in self.items(MappingPurpose::Synchronization) {
			let Some(values) = attributes.get(&item.ext_attr_name) else {
				continue;
			};
			match item.int_mapping_type {
				IntMappingType::Username => {
					entity.name = first_string(attributes, &item.ext_attr_name).unwrap_or_default();
				}
				IntMappingType::Password => {
					entity.password = first_string(attributes, &item.ext_attr_name);
				}
				IntMappingType::Plain | IntMappingType::Virtual => {
					if let Some(kind) = item.int_mapping_type.attribute_kind() {
						entity.attributes_mut(kind).insert(item.int_attr_name.clone(), values.clone());
					}
				}
				IntMappingType::Derived => {}
			}
		}
		entity
	}

	/// Compute the changes a remote snapshot implies for a local entity.
	///
	/// Only synchronization items whose external attribute is present in the
	/// snapshot are considered, and only values that actually differ end up
	/// in the patch. Derived attributes are never written.
	#[must_use]
	pub fn diff(&self, current: &Attributable, attributes: &AttributeSet) -> EntityPatch {
		let mut patch = EntityPatch::default();
		for item in self.items(MappingPurpose::Synchronization) {
			let Some(incoming) = attributes.get(&item.ext_attr_name) else {
				continue;
			};
			match item.int_mapping_type {
				IntMappingType::Username => {
					if let Some(name) = incoming.first().map(AttributeValue::to_text) {
						if name != current.name {
							patch.name = Some(name);
						}
					}
				}
				IntMappingType::Password => {
					let password = incoming.first().map(AttributeValue::to_text);
					if password.is_some() && password != current.password {
						patch.password = password;
					}
				}
				IntMappingType::Plain | IntMappingType::Virtual => {
					let existing = item.values_of(current);
					if same_values(&existing, incoming) {
						continue;
					}
					let (upserts, removals) = if item.int_mapping_type == IntMappingType::Plain {
						(&mut patch.plain_upserts, &mut patch.plain_removals)
					} else {
						(&mut patch.virtual_upserts, &mut patch.virtual_removals)
					};
					if incoming.is_empty() {
						removals.insert(item.int_attr_name.clone());
					} else {
						upserts.insert(item.int_attr_name.clone(), incoming.clone());
					}
				}
				IntMappingType::Derived => {}
			}
		}
		patch
	}

	/// External attribute names mapped from any of the given internal names.
	///
	/// The name and password are matched as [`NAME_ATTRIBUTE`] and
	/// [`PASSWORD_ATTRIBUTE`].
	#[must_use]
	pub fn external_names(&self, internal: &BTreeSet<String>) -> BTreeSet<String> {
		self.items
			.iter()
			.filter(|item| internal.contains(item.internal_name()))
			.map(|item| item.ext_attr_name.clone())
			.collect()
	}
}
