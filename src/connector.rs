//! The uniform contract to one object class on one external resource.
//!
//! Every remote system (directory, database, flat file, SaaS API) is reached
//! through a [`Connector`]. Reads return `None` or an empty collection for a
//! missing remote object instead of failing; `validate` and `test` must fail
//! loudly and must never change remote state.

use std::{collections::BTreeSet, fmt::Display};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::Sender;

use crate::{
	attribute::{AttributeSet, AttributeValue},
	error::{ConnectorError, ConnectorResult},
};

/// Identifier of an object on a remote resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Uid(String);

impl Uid {
	/// Wrap a remote identifier
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// The raw identifier
	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Display for Uid {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl From<&str> for Uid {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

/// Opaque cursor into a resource's change stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncToken(pub String);

/// What a delta reports about the remote object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncDeltaType {
	/// The object was created or changed
	CreateOrUpdate,
	/// The object was removed
	Delete,
}

/// A change on one external object, as reported by the connector
#[derive(Debug, Clone, PartialEq)]
pub struct SyncDelta {
	/// Current remote identifier
	pub uid: Uid,
	/// Identifier before a rename, if the object was renamed
	pub previous_uid: Option<Uid>,
	/// Kind of change
	pub delta_type: SyncDeltaType,
	/// Object class of the changed object
	pub object_class: String,
	/// Attribute snapshot; empty for deletions
	pub attributes: AttributeSet,
}

impl SyncDelta {
	/// A create-or-update delta
	pub fn create_or_update(
		uid: impl Into<Uid>,
		object_class: impl Into<String>,
		attributes: AttributeSet,
	) -> Self {
		Self {
			uid: uid.into(),
			previous_uid: None,
			delta_type: SyncDeltaType::CreateOrUpdate,
			object_class: object_class.into(),
			attributes,
		}
	}

	/// A delete delta
	pub fn delete(uid: impl Into<Uid>, object_class: impl Into<String>) -> Self {
		Self {
			uid: uid.into(),
			previous_uid: None,
			delta_type: SyncDeltaType::Delete,
			object_class: object_class.into(),
			attributes: AttributeSet::new(),
		}
	}

	/// Mark the delta as a rename from `previous`
	#[must_use]
	pub fn renamed_from(mut self, previous: impl Into<Uid>) -> Self {
		self.previous_uid = Some(previous.into());
		self
	}

	/// The identifier local correlation should use
	#[must_use]
	pub fn correlation_uid(&self) -> &Uid {
		self.previous_uid.as_ref().unwrap_or(&self.uid)
	}
}

impl From<String> for Uid {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// An object read from a resource
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectorObject {
	/// Remote identifier
	pub uid: Uid,
	/// Object class
	pub object_class: String,
	/// Attributes returned for the requested projection
	pub attributes: AttributeSet,
}

/// Options passed along with connector calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationOptions {
	/// External attribute names to return on reads
	pub attributes_to_get: BTreeSet<String>,
}

/// Search filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
	/// Attribute has the value
	Equals {
		/// External attribute name
		attribute: String,
		/// Value to compare with
		value: AttributeValue,
	},
	/// Both filters match
	And(Box<Filter>, Box<Filter>),
	/// Either filter matches
	Or(Box<Filter>, Box<Filter>),
}

impl Filter {
	/// Evaluate the filter against an attribute set
	#[must_use]
	pub fn matches(&self, attributes: &AttributeSet) -> bool {
		match self {
			Self::Equals { attribute, value } => {
				attributes.get(attribute).is_some_and(|values| values.contains(value))
			}
			Self::And(left, right) => left.matches(attributes) && right.matches(attributes),
			Self::Or(left, right) => left.matches(attributes) || right.matches(attributes),
		}
	}
}

/// Operations a connector may have enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Capability {
	/// Authenticate against the resource
	Authenticate,
	/// Create objects
	Create,
	/// Update objects
	Update,
	/// Delete objects
	Delete,
	/// Search and read objects
	Search,
	/// Report change deltas
	Sync,
}

/// A uniform interface to one external object class on one resource
#[async_trait]
pub trait Connector: Send + Sync {
	/// Resource name, for logging
	fn name(&self) -> &str;

	/// Operations this connector instance is allowed to perform
	fn capabilities(&self) -> BTreeSet<Capability>;

	/// Check credentials of an account and return its uid
	async fn authenticate(
		&self,
		object_class: &str,
		username: &str,
		password: &str,
	) -> ConnectorResult<Uid>;

	/// Create an object, returning its uid
	async fn create(
		&self,
		object_class: &str,
		attributes: AttributeSet,
		options: &OperationOptions,
	) -> ConnectorResult<Uid>;

	/// Replace the given attributes of an object; the uid may change
	async fn update(
		&self,
		object_class: &str,
		uid: &Uid,
		attributes: AttributeSet,
		options: &OperationOptions,
	) -> ConnectorResult<Uid>;

	/// Delete an object
	async fn delete(
		&self,
		object_class: &str,
		uid: &Uid,
		options: &OperationOptions,
	) -> ConnectorResult<()>;

	/// Send every change after `token` into `deltas`, in order.
	///
	/// Returns when the stream is exhausted. A closed channel means the
	/// consumer gave up and should end the call with
	/// [`ConnectorError::ChannelClosed`].
	async fn sync(
		&self,
		object_class: &str,
		token: Option<&SyncToken>,
		options: &OperationOptions,
		deltas: Sender<SyncDelta>,
	) -> ConnectorResult<()>;

	/// The token marking the current end of the change stream
	async fn get_latest_sync_token(&self, object_class: &str)
		-> ConnectorResult<Option<SyncToken>>;

	/// Read one object
	async fn get_object(
		&self,
		object_class: &str,
		uid: &Uid,
		options: &OperationOptions,
	) -> ConnectorResult<Option<ConnectorObject>>;

	/// Search objects; `None` returns everything
	async fn search(
		&self,
		object_class: &str,
		filter: Option<&Filter>,
		options: &OperationOptions,
	) -> ConnectorResult<Vec<ConnectorObject>>;

	/// Names of the attributes the resource knows for the object class
	async fn get_schema_names(
		&self,
		object_class: &str,
		include_special: bool,
	) -> ConnectorResult<BTreeSet<String>>;

	/// Object classes the resource supports
	async fn get_supported_object_classes(&self) -> ConnectorResult<BTreeSet<String>>;

	/// Check the connector configuration without touching the resource
	async fn validate(&self) -> ConnectorResult<()>;

	/// Check that the resource can be reached with the configuration
	async fn test(&self) -> ConnectorResult<()>;

	/// Existence probe used by propagation to choose between create and
	/// update.
	///
	/// A "not found" error from the resource counts as absent.
	async fn probe_object(
		&self,
		object_class: &str,
		uid: &Uid,
		options: &OperationOptions,
	) -> ConnectorResult<Option<ConnectorObject>> {
		match self.get_object(object_class, uid, options).await {
			Err(ConnectorError::ObjectNotFound(_)) => Ok(None),
			other => other,
		}
	}

	/// Send every object as a create-or-update delta, for full
	/// reconciliation without a token
	async fn get_all_objects(
		&self,
		object_class: &str,
		options: &OperationOptions,
		deltas: Sender<SyncDelta>,
	) -> ConnectorResult<()> {
		for object in self.search(object_class, None, options).await? {
			let delta = SyncDelta::create_or_update(object.uid, object_class, object.attributes);
			deltas.send(delta).await.map_err(|_| ConnectorError::ChannelClosed)?;
		}
		Ok(())
	}

	/// Read a single attribute of an object
	async fn get_object_attribute(
		&self,
		object_class: &str,
		uid: &Uid,
		attribute: &str,
	) -> ConnectorResult<Option<Vec<AttributeValue>>> {
		let options = OperationOptions { attributes_to_get: BTreeSet::from([attribute.to_owned()]) };
		Ok(self
			.get_object(object_class, uid, &options)
			.await?
			.and_then(|mut object| object.attributes.remove(attribute)))
	}

	/// Read the requested attributes of an object; empty if it is absent
	async fn get_object_attributes(
		&self,
		object_class: &str,
		uid: &Uid,
		options: &OperationOptions,
	) -> ConnectorResult<AttributeSet> {
		Ok(self
			.get_object(object_class, uid, options)
			.await?
			.map(|object| object.attributes)
			.unwrap_or_default())
	}
}
