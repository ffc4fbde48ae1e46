//! `HostApi`: the UI/CLI-facing surface over the Agent Loop, grounded on
//! the top-level `RollbackAgent`/demo-script entry points referenced from
//! `original_source/agents/rollback_agent.py`'s module docstring.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::model::Model;
use crate::state_value::StateValue;
use crate::store::{InnerSession, Store, StoreError};

use super::registry::AgentRegistry;
use super::turn::Agent;

/// Summary view of one inner session, for `HostApi::list_inner_sessions`.
#[derive(Clone, Debug)]
pub struct InnerSessionSummary {
    pub id: i64,
    pub graph_session_id: String,
    pub is_current: bool,
    pub checkpoint_count: i64,
    pub tool_invocation_count: i64,
    pub parent_inner_session_id: Option<i64>,
    pub branch_point_checkpoint_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub message_count: usize,
}

impl From<InnerSession> for InnerSessionSummary {
    fn from(s: InnerSession) -> Self {
        Self {
            id: s.id.expect("persisted inner session"),
            graph_session_id: s.graph_session_id,
            is_current: s.is_current,
            checkpoint_count: s.checkpoint_count,
            tool_invocation_count: s.tool_invocation_count,
            parent_inner_session_id: s.parent_inner_session_id,
            branch_point_checkpoint_id: s.branch_point_checkpoint_id,
            created_at: s.created_at,
            message_count: s.transcript.len(),
        }
    }
}

/// Summary view of one checkpoint, for `HostApi::list_checkpoints`.
#[derive(Clone, Debug)]
pub struct CheckpointSummary {
    pub id: i64,
    pub name: Option<String>,
    pub is_auto: bool,
    pub created_at: DateTime<Utc>,
    pub tool_track_position: usize,
    pub user_id: Option<i64>,
}

impl From<crate::store::Checkpoint> for CheckpointSummary {
    fn from(c: crate::store::Checkpoint) -> Self {
        Self {
            id: c.id.expect("persisted checkpoint"),
            name: c.name.clone(),
            is_auto: c.is_auto,
            created_at: c.created_at,
            tool_track_position: c.tool_track_position(),
            user_id: c.user_id,
        }
    }
}

/// One node of the branch forest returned by `HostApi::branch_tree`: roots
/// are inner sessions with no parent.
#[derive(Clone, Debug)]
pub struct BranchNode {
    pub id: i64,
    pub graph_session_id: String,
    pub is_current: bool,
    pub children: Vec<BranchNode>,
}

/// The host/UI boundary over the Agent Loop: one live [`Agent`] per outer
/// session, cached in an [`AgentRegistry`].
pub struct HostApi {
    store: Arc<dyn Store>,
    model: Arc<dyn Model>,
    registry: AgentRegistry,
}

impl HostApi {
    pub fn new(store: Arc<dyn Store>, model: Arc<dyn Model>) -> Self {
        Self {
            store,
            model,
            registry: AgentRegistry::new(),
        }
    }

    /// Returns the cached agent for `outer_id`, or resumes/creates one bound
    /// to its current inner session. `base_url`/`api_key` overrides are
    /// recorded on the inner session's metadata for observability; no
    /// concrete `Model` provider ships in this crate, so the injected
    /// `Model` is always what actually serves the turn.
    pub async fn create_or_resume(
        &self,
        outer_id: i64,
        base_url_override: Option<&str>,
        api_key_override: Option<&str>,
    ) -> crate::error::Result<Arc<Agent>> {
        if let Some(agent) = self.registry.get(outer_id).await {
            return Ok(agent);
        }

        let mut inner = match self.store.current_inner_session(outer_id).await? {
            Some(inner) => inner,
            None => {
                self.store
                    .create_inner_session(InnerSession::new(outer_id))
                    .await?
            }
        };

        if base_url_override.is_some() || api_key_override.is_some() {
            if let Some(base_url) = base_url_override {
                inner
                    .metadata
                    .insert("model_base_url_override".to_string(), StateValue::String(base_url.to_string()));
            }
            if api_key_override.is_some() {
                inner
                    .metadata
                    .insert("model_api_key_overridden".to_string(), StateValue::Bool(true));
            }
            self.store.update_inner_session(inner.clone()).await?;
        }

        let agent = self.build_agent(outer_id, inner).await?;
        self.registry.insert(outer_id, agent.clone()).await;
        Ok(agent)
    }

    async fn build_agent(&self, outer_id: i64, inner: InnerSession) -> crate::error::Result<Arc<Agent>> {
        let outer = self
            .store
            .get_outer_session(outer_id)
            .await?
            .ok_or(StoreError::NotFound {
                what: "outer_session",
                id: outer_id,
            })?;
        let user = self
            .store
            .find_user_by_id(outer.user_id)
            .await?
            .ok_or(StoreError::NotFound {
                what: "user",
                id: outer.user_id,
            })?;
        let agent_config = user.agent_config();
        let system_prompt = user
            .preferences
            .get("system_prompt")
            .and_then(StateValue::as_str)
            .map(str::to_string);
        Ok(Arc::new(Agent::new(
            self.store.clone(),
            self.model.clone(),
            inner,
            user.id,
            agent_config,
            system_prompt,
        )))
    }

    /// Runs one turn of conversation against the outer session's current
    /// agent, detecting a rollback request in the outcome and, if present,
    /// swapping the cached agent for one bound to the new branch.
    pub async fn send_message(&self, outer_id: i64, text: &str) -> crate::error::Result<super::TurnOutcome> {
        let agent = self.create_or_resume(outer_id, None, None).await?;
        let mut outcome = agent.run_turn(text, None).await?;
        if outcome.rollback_requested {
            let checkpoint_id = outcome
                .rollback_checkpoint_id
                .expect("rollback_requested implies rollback_checkpoint_id is set");
            self.rollback(outer_id, checkpoint_id).await?;
            // The engine has been driven; clear the flag so the caller
            // doesn't re-trigger rollback on this same outcome. The
            // checkpoint id stays for reference.
            outcome.rollback_requested = false;
        }
        Ok(outcome)
    }

    /// Rolls the outer session's current branch back to `checkpoint_id`,
    /// swapping the cached agent for one bound to the resulting branch.
    /// Returns the new branch's inner session id.
    pub async fn rollback(&self, outer_id: i64, checkpoint_id: i64) -> crate::error::Result<i64> {
        let agent = self.create_or_resume(outer_id, None, None).await?;
        let outcome = agent.rollback_to(checkpoint_id, true).await?;
        let branch_id = outcome.branch.id.expect("freshly created branch has an id");

        let new_agent = self.build_agent(outer_id, outcome.branch).await?;
        new_agent.adopt_tools_from(agent.as_ref()).await?;
        self.registry.insert(outer_id, new_agent).await;
        Ok(branch_id)
    }

    pub async fn list_inner_sessions(&self, outer_id: i64) -> crate::error::Result<Vec<InnerSessionSummary>> {
        let sessions = self.store.list_inner_sessions_by_outer(outer_id).await?;
        Ok(sessions.into_iter().map(InnerSessionSummary::from).collect())
    }

    pub async fn list_checkpoints(&self, inner_id: i64) -> crate::error::Result<Vec<CheckpointSummary>> {
        let checkpoints = self.store.list_checkpoints_by_inner(inner_id, None).await?;
        Ok(checkpoints.into_iter().map(CheckpointSummary::from).collect())
    }

    pub async fn branch_tree(&self, outer_id: i64) -> crate::error::Result<Vec<BranchNode>> {
        let sessions = self.store.list_inner_sessions_by_outer(outer_id).await?;
        Ok(build_forest(&sessions, None))
    }
}

fn build_forest(sessions: &[InnerSession], parent: Option<i64>) -> Vec<BranchNode> {
    sessions
        .iter()
        .filter(|s| s.parent_inner_session_id == parent)
        .map(|s| BranchNode {
            id: s.id.expect("persisted inner session"),
            graph_session_id: s.graph_session_id.clone(),
            is_current: s.is_current,
            children: build_forest(sessions, s.id),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::service::AuthService;
    use crate::message::Message;
    use crate::model::{ModelError, ModelReply, ToolCatalogEntry};
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    struct EchoModel;
    #[async_trait]
    impl Model for EchoModel {
        async fn invoke(&self, messages: &[Message], _tools: &[ToolCatalogEntry]) -> std::result::Result<ModelReply, ModelError> {
            let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
            Ok(ModelReply {
                content: format!("echo: {last}"),
                tool_calls: vec![],
            })
        }
    }

    async fn seeded_outer(store: &Arc<InMemoryStore>) -> i64 {
        let auth = AuthService::new(store.clone());
        let user = auth.register("alice", "hunter22", None).await.unwrap();
        let outer = store
            .create_outer_session(crate::store::OuterSession::new(user.id.unwrap(), "chat"))
            .await
            .unwrap();
        outer.id.unwrap()
    }

    #[tokio::test]
    /// create_or_resume lazily creates a current inner session and caches
    /// the agent; a second call returns the same cached instance.
    async fn test_create_or_resume_caches() {
        let store = Arc::new(InMemoryStore::new());
        let outer_id = seeded_outer(&store).await;
        let host = HostApi::new(store.clone(), Arc::new(EchoModel));

        let agent1 = host.create_or_resume(outer_id, None, None).await.unwrap();
        let agent2 = host.create_or_resume(outer_id, None, None).await.unwrap();
        assert!(Arc::ptr_eq(&agent1, &agent2));

        let sessions = host.list_inner_sessions(outer_id).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].is_current);
    }

    #[tokio::test]
    /// send_message round-trips through the echo model and persists a
    /// transcript entry pair.
    async fn test_send_message_round_trip() {
        let store = Arc::new(InMemoryStore::new());
        let outer_id = seeded_outer(&store).await;
        let host = HostApi::new(store.clone(), Arc::new(EchoModel));

        let outcome = host.send_message(outer_id, "hello").await.unwrap();
        assert_eq!(outcome.reply, "echo: hello");
        assert!(!outcome.rollback_requested);
    }

    #[tokio::test]
    /// branch_tree reports a single root with no children for a fresh outer session.
    async fn test_branch_tree_single_root() {
        let store = Arc::new(InMemoryStore::new());
        let outer_id = seeded_outer(&store).await;
        let host = HostApi::new(store.clone(), Arc::new(EchoModel));
        host.create_or_resume(outer_id, None, None).await.unwrap();

        let tree = host.branch_tree(outer_id).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree[0].children.is_empty());
    }
}
