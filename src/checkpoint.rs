//! The Checkpoint Engine: whole-inner-session snapshots taken on demand
//! and after tool-bearing turns.
//!
//! Grounded on `original_source/core/checkpoint.py`'s `CheckpointManager`
//! and, for the store/error split, on the runtime's in-memory
//! checkpointer.

use miette::Diagnostic;
use thiserror::Error;

use crate::store::{Checkpoint, CheckpointCounts, InnerSession, Store, StoreError};
use crate::tools::ToolTrackRegistry;

#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] crate::tools::ToolRegistryError),
}

pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Captures a whole inner-session snapshot and persists it via the [`Store`].
pub struct CheckpointEngine {
    store: std::sync::Arc<dyn Store>,
}

impl CheckpointEngine {
    pub fn new(store: std::sync::Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// `Snapshot(inner_session, name?, is_auto, user_id?)`: copies `state`,
    /// `transcript`, and `tool_invocations` by value, stamps
    /// `metadata.tool_track_position` with the live track's current length,
    /// persists, and bumps `inner_session.checkpoint_count`.
    pub async fn snapshot(
        &self,
        inner: &InnerSession,
        track: &ToolTrackRegistry,
        name: Option<String>,
        is_auto: bool,
        user_id: Option<i64>,
    ) -> Result<Checkpoint> {
        let inner_id = inner
            .id
            .expect("snapshot requires a persisted inner session");

        let mut checkpoint = Checkpoint {
            id: None,
            inner_session_id: inner_id,
            name,
            state_snapshot: inner.state.clone(),
            transcript_snapshot: inner.transcript.clone(),
            tool_invocations_snapshot: track.track()?,
            is_auto,
            created_at: chrono::Utc::now(),
            user_id,
            metadata: Default::default(),
        };
        checkpoint.set_tool_track_position(track.len()?);

        let saved = self.store.create_checkpoint(checkpoint).await?;

        if let Some(mut current) = self.store.get_inner_session_by_id(inner_id).await? {
            current.checkpoint_count += 1;
            self.store.update_inner_session(current).await?;
        }
        self.store
            .increment_total_checkpoints(inner.outer_session_id)
            .await?;

        Ok(saved)
    }

    /// Called by the Agent Loop's checkpoint phase: a turn that ran at
    /// least one non-reserved tool gets an automatic checkpoint named
    /// `"After <last_tool_name>"`.
    pub async fn auto_checkpoint_after_turn(
        &self,
        inner: &InnerSession,
        track: &ToolTrackRegistry,
        last_tool_name: &str,
    ) -> Result<Checkpoint> {
        self.snapshot(
            inner,
            track,
            Some(format!("After {last_tool_name}")),
            true,
            None,
        )
        .await
    }

    /// `CleanupAuto(inner_id, keep_latest=k)`: deletes every auto-checkpoint
    /// of `inner_id` except the `k` most recent by `created_at`; manual
    /// checkpoints are never touched.
    pub async fn cleanup_auto(&self, inner_id: i64, keep_latest: i64) -> Result<i64> {
        self.store
            .delete_auto_keeping_latest(inner_id, keep_latest)
            .await
            .map_err(Into::into)
    }

    pub async fn counts(&self, inner_id: i64) -> Result<CheckpointCounts> {
        self.store.count_checkpoints(inner_id).await.map_err(Into::into)
    }
}
