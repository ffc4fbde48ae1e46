//! Keeps one live [`Agent`] per outer session, so a turn always resumes
//! against the same in-process tool track rather than rebuilding it from
//! the store on every request.
//!
//! Grounded on the runtime's session-handle map pattern; the original's
//! equivalent (`AgentManager` in `original_source/agents/`) keeps a
//! similar process-local dict keyed by session id.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tokio::sync::Mutex;

/// A process-local cache of active [`Agent`]s, keyed by outer session id.
///
/// One outer session has at most one live agent at a time: rolling back
/// replaces the cached entry with a fresh agent bound to the branch.
#[derive(Default)]
pub struct AgentRegistry {
    agents: Mutex<FxHashMap<i64, Arc<super::Agent>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, outer_id: i64) -> Option<Arc<super::Agent>> {
        self.agents.lock().await.get(&outer_id).cloned()
    }

    pub async fn insert(&self, outer_id: i64, agent: Arc<super::Agent>) {
        self.agents.lock().await.insert(outer_id, agent);
    }

    pub async fn remove(&self, outer_id: i64) -> Option<Arc<super::Agent>> {
        self.agents.lock().await.remove(&outer_id)
    }

    pub async fn len(&self) -> usize {
        self.agents.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::user::AgentConfig;
    use crate::model::{Model, ModelReply, ModelError};
    use crate::message::Message;
    use crate::store::{InnerSession, OuterSession, memory::InMemoryStore};
    use async_trait::async_trait;

    struct NoopModel;
    #[async_trait]
    impl Model for NoopModel {
        async fn invoke(&self, _messages: &[Message], _tools: &[crate::model::ToolCatalogEntry]) -> std::result::Result<ModelReply, ModelError> {
            Ok(ModelReply::default())
        }
    }

    #[tokio::test]
    /// Insert/get/remove round-trips an agent by outer session id.
    async fn test_registry_round_trip() {
        let store = Arc::new(InMemoryStore::new());
        let user = store
            .save_user(crate::auth::user::User::new("alice"))
            .await
            .unwrap();
        let outer = store
            .create_outer_session(OuterSession::new(user.id.unwrap(), "s"))
            .await
            .unwrap();
        let outer_id = outer.id.unwrap();
        let inner = store
            .create_inner_session(InnerSession::new(outer_id))
            .await
            .unwrap();

        let registry = AgentRegistry::new();
        assert!(registry.get(outer_id).await.is_none());

        let agent = Arc::new(super::super::Agent::new(
            store.clone(),
            Arc::new(NoopModel),
            inner,
            None,
            AgentConfig::default(),
            None,
        ));
        registry.insert(outer_id, agent).await;
        assert!(registry.get(outer_id).await.is_some());
        assert_eq!(registry.len().await, 1);

        registry.remove(outer_id).await;
        assert!(registry.get(outer_id).await.is_none());
    }
}
