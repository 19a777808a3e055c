//! Extension points invoked around every reconciliation action.
//!
//! Registered [`SyncActions`] are called in registration order. Every
//! `before_*` hook receives the delta as left by the previous hook and
//! returns the delta the next hook (and finally the action) works with.
//! All methods default to doing nothing.

use async_trait::async_trait;

use super::{SyncProfile, SyncResult};
use crate::{connector::SyncDelta, entity::Attributable};

/// Result of a hook; errors are reported as [`crate::SyncError::Hook`]
pub type HookResult<T> = anyhow::Result<T>;

/// Hooks around reconciliation actions
#[async_trait]
pub trait SyncActions: Send + Sync {
	/// Called once before the first delta
	async fn before_all(&self, _profile: &SyncProfile<'_>) -> HookResult<()> {
		Ok(())
	}

	/// Before creating a local entity without linking it; the entity may be
	/// rewritten
	async fn before_create(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		_subject: &mut Attributable,
	) -> HookResult<SyncDelta> {
		Ok(delta)
	}

	/// Before creating a local entity and linking it; the entity may be
	/// rewritten
	async fn before_assign(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		_subject: &mut Attributable,
	) -> HookResult<SyncDelta> {
		Ok(delta)
	}

	/// Before updating a matched entity
	async fn before_update(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		_subject: &Attributable,
	) -> HookResult<SyncDelta> {
		Ok(delta)
	}

	/// Before removing the remote object of a matched entity
	async fn before_deprovision(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		_subject: &Attributable,
	) -> HookResult<SyncDelta> {
		Ok(delta)
	}

	/// Before removing the remote object and the link of a matched entity
	async fn before_unassign(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		_subject: &Attributable,
	) -> HookResult<SyncDelta> {
		Ok(delta)
	}

	/// Before linking a matched entity
	async fn before_link(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		_subject: &Attributable,
	) -> HookResult<SyncDelta> {
		Ok(delta)
	}

	/// Before unlinking a matched entity
	async fn before_unlink(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		_subject: &Attributable,
	) -> HookResult<SyncDelta> {
		Ok(delta)
	}

	/// Before deleting a matched entity
	async fn before_delete(
		&self,
		_profile: &SyncProfile<'_>,
		delta: SyncDelta,
		_subject: &Attributable,
	) -> HookResult<SyncDelta> {
		Ok(delta)
	}

	/// After an action, with its outcome
	async fn after(
		&self,
		_profile: &SyncProfile<'_>,
		_delta: &SyncDelta,
		_subject: Option<&Attributable>,
		_result: &SyncResult,
	) -> HookResult<()> {
		Ok(())
	}

	/// Called once after the last delta
	async fn after_all(&self, _profile: &SyncProfile<'_>) -> HookResult<()> {
		Ok(())
	}
}
