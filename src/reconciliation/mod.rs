//! Pulling resource changes into the local repository.
//!
//! A run moves every delta through the same steps: correlate it to local
//! entities, narrow several matches down with the conflict policy, dispatch
//! on the matching or unmatching rule, call the registered hooks around the
//! action and append the outcome to the run's results.

mod actions;
mod dispatch;
mod engine;
mod policy;
pub mod report;
mod result;
mod task;

pub use actions::{HookResult, SyncActions};
pub use engine::{ReconciliationEngine, RunSummary, DEFAULT_CHANNEL_CAPACITY};
pub use policy::{ConflictResolutionAction, MatchingRule, UnmatchingRule};
pub use report::TraceLevel;
pub use result::{ResourceOperation, ResultStatus, SyncProfile, SyncResult};
pub use task::{HookErrorScope, SyncTask};
