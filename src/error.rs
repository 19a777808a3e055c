//! Error kinds raised by the reconciliation and propagation engines
use thiserror::Error;

use crate::entity::SubjectType;

/// Result alias for connector calls
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Failure reaching or operating on an external resource
#[derive(Debug, Error)]
pub enum ConnectorError {
	/// The resource could not be reached
	#[error("connection failed: {0}")]
	ConnectionFailed(String),
	/// The resource rejected the configured credentials
	#[error("authentication failed: {0}")]
	AuthenticationFailed(String),
	/// The connector configuration is invalid
	#[error("invalid configuration: {0}")]
	InvalidConfiguration(String),
	/// The addressed object does not exist on the resource
	#[error("object not found: {0}")]
	ObjectNotFound(String),
	/// An object with the same identifier already exists
	#[error("object already exists: {0}")]
	AlreadyExists(String),
	/// The connector does not implement the requested operation
	#[error("operation not supported: {0}")]
	Unsupported(String),
	/// The delta consumer went away while the connector was still sending
	#[error("delta consumer closed the channel")]
	ChannelClosed,
	/// Any other failure reported by the resource
	#[error("operation failed: {0}")]
	OperationFailed(String),
}

/// Invalid or missing mapping configuration.
///
/// Always fatal: raised while building the resource registry or before the
/// first delta of a run is processed.
#[derive(Debug, Error)]
pub enum MappingError {
	/// No item is flagged as account id
	#[error("no account id mapping item for {subject_type} on resource `{resource}`")]
	MissingAccountId {
		/// Resource name
		resource: String,
		/// Subject type the mapping is for
		subject_type: SubjectType,
	},
	/// More than one item is flagged as account id
	#[error("more than one account id mapping item for {subject_type} on resource `{resource}`")]
	MultipleAccountIds {
		/// Resource name
		resource: String,
		/// Subject type the mapping is for
		subject_type: SubjectType,
	},
	/// The account id item points to a virtual schema or the password
	#[error("mapping item `{ext_attr_name}` on resource `{resource}` cannot be the account id")]
	InvalidAccountId {
		/// Resource name
		resource: String,
		/// External attribute name of the offending item
		ext_attr_name: String,
	},
	/// More than one item is flagged as password
	#[error("more than one password mapping item on resource `{resource}`")]
	MultiplePasswords {
		/// Resource name
		resource: String,
	},
	/// A password flag on an item that is not of password type, or the reverse
	#[error("mapping item `{ext_attr_name}` on resource `{resource}` mixes password and non-password")]
	InvalidPassword {
		/// Resource name
		resource: String,
		/// External attribute name of the offending item
		ext_attr_name: String,
	},
	/// The resource is not known to the registry
	#[error("unknown resource `{0}`")]
	UnknownResource(String),
	/// No connector instance was bound to a configured resource
	#[error("no connector bound to resource `{0}`")]
	MissingConnector(String),
	/// The resource has no mapping for the subject type
	#[error("resource `{resource}` has no mapping for {subject_type}")]
	NoMapping {
		/// Resource name
		resource: String,
		/// Subject type that was looked up
		subject_type: SubjectType,
	},
}

/// An entity level propagation failure surfaced to the caller
#[derive(Debug, Error)]
pub enum PropagationError {
	/// A SYNC primary resource failed; every later task was not attempted
	#[error("propagation to primary resource `{resource}` failed: {message}")]
	PrimaryFailed {
		/// Name of the failing resource
		resource: String,
		/// Root-cause message
		message: String,
	},
}

/// Anything that can go wrong while reconciling a delta
#[derive(Debug, Error)]
pub enum SyncError {
	/// The connector failed
	#[error(transparent)]
	Connector(#[from] ConnectorError),
	/// More than one local entity matched under an IGNORE conflict policy
	#[error("uid `{uid}` matches more than one local entity: {matches:?}")]
	CorrelationAmbiguity {
		/// Remote uid that was correlated
		uid: String,
		/// Matching local ids
		matches: Vec<u64>,
	},
	/// The entity vanished between correlation and action
	#[error("{subject_type} {id} not found")]
	NotFound {
		/// Subject type of the entity
		subject_type: SubjectType,
		/// Local id
		id: u64,
	},
	/// The acting principal may not touch the entity
	#[error("`{principal}` is not authorized: {reason}")]
	Unauthorized {
		/// Principal the call was made for
		principal: String,
		/// Reason given by the collaborator
		reason: String,
	},
	/// Mapping configuration problem
	#[error(transparent)]
	Mapping(#[from] MappingError),
	/// Propagation failure of a SYNC primary resource
	#[error(transparent)]
	Propagation(#[from] PropagationError),
	/// The workflow adapter rejected the request
	#[error("workflow failed: {0}")]
	Workflow(String),
	/// A sync action hook failed
	#[error("sync action hook `{hook}` failed: {message}")]
	Hook {
		/// Name of the hook
		hook: &'static str,
		/// Message of the underlying error
		message: String,
	},
	/// Any other failure
	#[error(transparent)]
	Other(#[from] anyhow::Error),
}

impl SyncError {
	/// Whether the error only skips the current entity instead of producing a
	/// failed result
	#[must_use]
	pub fn is_skippable(&self) -> bool {
		matches!(self, Self::CorrelationAmbiguity { .. } | Self::NotFound { .. } | Self::Unauthorized { .. })
	}
}
