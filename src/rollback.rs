//! The Branch/Rollback Engine: creates a new inner session
//! branched from a chosen checkpoint, carrying over the checkpoint history
//! up to the branch point and best-effort reversing the live tool track.
//!
//! Grounded on `original_source/core/internal_session.py`'s
//! `create_branch_from_checkpoint`.

use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::state_value::StateValue;
use crate::store::{Checkpoint, InnerSession, Store, StoreError};
use crate::tools::{ReverseResult, ToolRegistryError, ToolTrackRegistry};

#[derive(Debug, Error, Diagnostic)]
pub enum RollbackError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Registry(#[from] ToolRegistryError),

    #[error("checkpoint not found: {id}")]
    #[diagnostic(code(rollback_agent::rollback::checkpoint_not_found))]
    CheckpointNotFound { id: i64 },
}

pub type Result<T> = std::result::Result<T, RollbackError>;

/// Options for [`RollbackEngine::rollback_to`].
#[derive(Clone, Copy, Debug)]
pub struct RollbackOptions {
    pub rollback_tools: bool,
}

impl Default for RollbackOptions {
    fn default() -> Self {
        Self {
            rollback_tools: true,
        }
    }
}

/// The outcome of a rollback: the new branch session plus the reverse-walk
/// results (empty when `rollback_tools` was false or the track was empty).
#[derive(Debug)]
pub struct RollbackOutcome {
    pub branch: InnerSession,
    pub reverse_results: Vec<ReverseResult>,
}

pub struct RollbackEngine {
    store: Arc<dyn Store>,
}

impl RollbackEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// `RollbackTo(checkpoint_id, outer_session_id, track, options)`: loads
    /// the checkpoint, best-effort reverses the live tool track back to its
    /// cursor, and branches a new inner session from it. `track` is the
    /// live agent's tool track, truncated in place to the checkpoint's
    /// cursor on return.
    pub async fn rollback_to(
        &self,
        checkpoint_id: i64,
        outer_session_id: i64,
        track: &ToolTrackRegistry,
        options: RollbackOptions,
    ) -> Result<RollbackOutcome> {
        // 1. Load checkpoint C.
        let checkpoint = self
            .store
            .get_checkpoint_by_id(checkpoint_id)
            .await?
            .ok_or(RollbackError::CheckpointNotFound { id: checkpoint_id })?;
        let cursor = checkpoint.tool_track_position();

        // 2. Best-effort reverse walk of the live track down to the cursor.
        let reverse_results = if options.rollback_tools {
            track.rollback_from_track_index(cursor).await?
        } else {
            Vec::new()
        };
        for failure in reverse_results.iter().filter(|r| !r.ok) {
            tracing::warn!(
                tool = %failure.tool_name,
                error = ?failure.err,
                "reverse handler failed during rollback; continuing"
            );
        }

        // 3. Create the branch inner session.
        let mut branch = InnerSession::new(outer_session_id);
        branch.state = checkpoint.state_snapshot.clone();
        branch.transcript = checkpoint.transcript_snapshot.clone();
        branch.is_current = true;
        branch.parent_inner_session_id = Some(checkpoint.inner_session_id);
        branch.branch_point_checkpoint_id = checkpoint.id;
        branch.metadata.insert(
            "branched_from".to_string(),
            StateValue::String(
                checkpoint
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("Checkpoint {checkpoint_id}")),
            ),
        );
        branch.metadata.insert(
            "branch_created_at".to_string(),
            StateValue::String(chrono::Utc::now().to_rfc3339()),
        );
        let branch = self.store.create_inner_session(branch).await?;

        // 4. Clone ancestor checkpoints (created_at <= C.created_at) into the branch.
        let siblings = self
            .store
            .list_checkpoints_by_inner(checkpoint.inner_session_id, None)
            .await?;
        for ancestor in siblings
            .into_iter()
            .filter(|c| c.created_at <= checkpoint.created_at)
        {
            let clone = Checkpoint {
                id: None,
                inner_session_id: branch.id.expect("freshly created branch has an id"),
                ..ancestor
            };
            self.store.create_checkpoint(clone).await?;
        }

        // 5. Truncate the live track to the checkpoint's cursor.
        track.truncate(cursor)?;

        // 6. Register the branch as current for the outer session.
        self.store
            .add_inner_session(outer_session_id, &branch.graph_session_id, true)
            .await?;
        self.store
            .set_current_inner(outer_session_id, &branch.graph_session_id)
            .await?;

        Ok(RollbackOutcome {
            branch,
            reverse_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;
    use crate::store::OuterSession;
    use std::sync::atomic::{AtomicI64, Ordering};

    async fn seeded_outer(store: &Arc<InMemoryStore>) -> i64 {
        let user = store
            .find_user_by_username("rootusr")
            .await
            .unwrap()
            .unwrap();
        let outer = store
            .create_outer_session(OuterSession::new(user.id.unwrap(), "s"))
            .await
            .unwrap();
        outer.id.unwrap()
    }

    struct SetX(Arc<AtomicI64>);
    #[async_trait::async_trait]
    impl crate::tools::ToolForward for SetX {
        async fn call(&self, args: &serde_json::Value) -> std::result::Result<serde_json::Value, String> {
            let v = args.get("v").and_then(serde_json::Value::as_i64).unwrap_or(0);
            let prior = self.0.swap(v, Ordering::SeqCst);
            Ok(serde_json::json!({ "prior": prior }))
        }
    }
    struct UnsetX(Arc<AtomicI64>);
    #[async_trait::async_trait]
    impl crate::tools::ToolReverse for UnsetX {
        async fn call(&self, _args: &serde_json::Value, prior_result: &serde_json::Value) -> std::result::Result<(), String> {
            let prior = prior_result.get("prior").and_then(serde_json::Value::as_i64).unwrap_or(0);
            self.0.store(prior, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    /// Rollback creates a branch pointing at the checkpoint's inner session
    /// and reverses tool effects back to the checkpoint's cursor.
    async fn test_rollback_creates_branch_and_reverses() {
        let store = Arc::new(InMemoryStore::new());
        let outer_id = seeded_outer(&store).await;
        let inner = store
            .create_inner_session(InnerSession::new(outer_id))
            .await
            .unwrap();

        let x = Arc::new(AtomicI64::new(0));
        let track = ToolTrackRegistry::new();
        track
            .register(
                crate::tools::ToolSpec::new("set_x", "sets x", Arc::new(SetX(x.clone())))
                    .with_reverse(Arc::new(UnsetX(x.clone()))),
            )
            .unwrap();

        // Checkpoint taken before any tool call: cursor = 0.
        let mut checkpoint = Checkpoint {
            id: None,
            inner_session_id: inner.id.unwrap(),
            name: Some("before".to_string()),
            state_snapshot: inner.state.clone(),
            transcript_snapshot: inner.transcript.clone(),
            tool_invocations_snapshot: Vec::new(),
            is_auto: true,
            created_at: chrono::Utc::now(),
            user_id: None,
            metadata: Default::default(),
        };
        checkpoint.set_tool_track_position(0);
        let checkpoint = store.create_checkpoint(checkpoint).await.unwrap();

        let r1 = track.get("set_x").unwrap().unwrap().forward.call(&serde_json::json!({"v": 1})).await.unwrap();
        track.record("set_x", serde_json::json!({"v": 1}), r1, true, None).unwrap();
        assert_eq!(x.load(Ordering::SeqCst), 1);

        let engine = RollbackEngine::new(store.clone());
        let outcome = engine
            .rollback_to(checkpoint.id.unwrap(), outer_id, &track, RollbackOptions::default())
            .await
            .unwrap();

        assert_eq!(x.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.reverse_results.len(), 1);
        assert!(outcome.reverse_results[0].ok);
        assert_eq!(outcome.branch.parent_inner_session_id, inner.id);
        assert_eq!(outcome.branch.branch_point_checkpoint_id, checkpoint.id);
        assert_eq!(track.len().unwrap(), 0);

        let current = store.current_inner_session(outer_id).await.unwrap().unwrap();
        assert_eq!(current.id, outcome.branch.id);

        // Old inner session and its checkpoint are untouched.
        let old = store.get_inner_session_by_id(inner.id.unwrap()).await.unwrap().unwrap();
        assert!(!old.is_current);
        let old_checkpoints = store.list_checkpoints_by_inner(inner.id.unwrap(), None).await.unwrap();
        assert_eq!(old_checkpoints.len(), 1);
    }
}
