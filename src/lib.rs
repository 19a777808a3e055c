//! Identity synchronization between a local repository and external
//! resources.
//!
//! Two engines do the work. The [`ReconciliationEngine`] pulls changes from a
//! resource through its [`Connector`] and turns them into local entity
//! changes. The [`PropagationExecutor`] pushes local changes out to every
//! resource an entity is linked to. [`ResourceMapping`]s translate between
//! the two sides.

pub mod attribute;
pub mod collaborators;
mod config;
pub mod connector;
pub mod entity;
pub mod error;
pub mod mapping;
pub mod propagation;
pub mod reconciliation;
pub mod resource;
pub mod test_helpers;
pub mod token_store;

pub use self::config::{Config, FeatureFlag, PropagationConfig};
pub use connector::Connector;
pub use error::{ConnectorError, MappingError, PropagationError, SyncError};
pub use mapping::ResourceMapping;
pub use propagation::{PropagationExecutor, PropagationManager};
pub use reconciliation::{ReconciliationEngine, RunSummary, SyncTask};
