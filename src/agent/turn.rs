//! The `Agent` struct: one execution instance bound to a single inner
//! session, driving the agent/tools/checkpoint state machine for a turn.
//!
//! Grounded on `original_source/agents/rollback_agent.py`'s `run`/`arun` and
//! its `_agent_node`/`_tool_node`/`_checkpoint_node` trio.

use std::time::Duration;

use tokio::sync::Mutex;
use tracing::instrument;

use crate::auth::user::AgentConfig;
use crate::checkpoint::CheckpointEngine;
use crate::message::Message;
use crate::model::{Model, ModelError};
use crate::rollback::RollbackEngine;
use crate::state_value::merge_state;
use crate::store::{InnerSession, Store};
use crate::tools::{ToolInvocationRecord, ToolTrackRegistry, is_reserved_tool};

use std::sync::Arc;

use super::catalog::build_tool_catalog;
use super::reserved;
use super::{AgentError, Result};

/// Outcome of one `Agent::run_turn` call.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The last model reply's text content.
    pub reply: String,
    pub tool_invocations_this_turn: Vec<ToolInvocationRecord>,
    pub rollback_requested: bool,
    pub rollback_checkpoint_id: Option<i64>,
    /// Count of user-role transcript entries after this turn.
    pub current_turn: u32,
}

/// One execution instance of the Agent Loop, bound to a single inner
/// session. No two turns of the same inner session may run concurrently;
/// the internal `Mutex` enforces that by construction.
pub struct Agent {
    store: Arc<dyn Store>,
    model: Arc<dyn Model>,
    checkpoint_engine: CheckpointEngine,
    rollback_engine: RollbackEngine,
    track: ToolTrackRegistry,
    inner: Mutex<InnerSession>,
    user_id: Option<i64>,
    agent_config: AgentConfig,
    /// `user_preferences.system_prompt`; prepended for a turn only, never
    /// persisted to the transcript.
    system_prompt: Option<String>,
}

impl Agent {
    pub fn new(
        store: Arc<dyn Store>,
        model: Arc<dyn Model>,
        inner: InnerSession,
        user_id: Option<i64>,
        agent_config: AgentConfig,
        system_prompt: Option<String>,
    ) -> Self {
        Self {
            checkpoint_engine: CheckpointEngine::new(store.clone()),
            rollback_engine: RollbackEngine::new(store.clone()),
            store,
            model,
            track: ToolTrackRegistry::new(),
            inner: Mutex::new(inner),
            user_id,
            agent_config,
            system_prompt,
        }
    }

    /// The agent's tool track registry, exposed so a host can register
    /// reversible tools before driving turns.
    pub fn tools(&self) -> &ToolTrackRegistry {
        &self.track
    }

    pub async fn inner_session_id(&self) -> i64 {
        self.inner
            .lock()
            .await
            .id
            .expect("agent is bound to a persisted inner session")
    }

    pub async fn outer_session_id(&self) -> i64 {
        self.inner.lock().await.outer_session_id
    }

    pub async fn current_inner_session(&self) -> InnerSession {
        self.inner.lock().await.clone()
    }

    /// Drives one user turn through the agent/tools/checkpoint state
    /// machine, with an optional per-turn deadline.
    #[instrument(skip(self, user_text, deadline), fields(outer_session_id = tracing::field::Empty))]
    pub async fn run_turn(&self, user_text: &str, deadline: Option<Duration>) -> Result<TurnOutcome> {
        let mut inner = self.inner.lock().await;
        tracing::Span::current().record("outer_session_id", inner.outer_session_id);
        inner.transcript.push(Message::USER, user_text);

        let mut rollback_requested = false;
        let mut rollback_checkpoint_id = None;
        let mut last_reply = String::new();
        let mut tool_calls_total: i64 = 0;
        let track_start = self.track.len()?;

        loop {
            if rollback_requested {
                break;
            }

            let messages = self.assemble_messages(&inner);
            let catalog = build_tool_catalog(&self.track)?;

            let reply = self.invoke_model(&messages, &catalog, deadline).await?;
            if !reply.content.is_empty() {
                inner.transcript.push(Message::ASSISTANT, &reply.content);
            }
            last_reply = reply.content;

            if reply.tool_calls.is_empty() {
                break;
            }

            let mut any_tool_ran = false;
            let mut any_tool_succeeded = false;
            let mut last_tool_name = String::new();

            for call in &reply.tool_calls {
                tool_calls_total += 1;

                if is_reserved_tool(&call.tool_name) {
                    let outcome = reserved::dispatch(
                        &call.tool_name,
                        &call.args,
                        &self.store,
                        &self.checkpoint_engine,
                        &self.track,
                        &inner,
                        self.user_id,
                    )
                    .await;
                    self.track.record(
                        call.tool_name.clone(),
                        call.args.clone(),
                        outcome.result.clone(),
                        outcome.success,
                        outcome.error_message.clone(),
                    )?;
                    if !outcome.success {
                        inner.transcript.push(
                            Message::ASSISTANT,
                            &format!(
                                "Error running {}: {}",
                                call.tool_name,
                                outcome.error_message.as_deref().unwrap_or("unknown error")
                            ),
                        );
                    }
                    if let Some(id) = outcome.rollback_checkpoint_id {
                        rollback_requested = true;
                        rollback_checkpoint_id = Some(id);
                    }
                    continue;
                }

                any_tool_ran = true;
                last_tool_name = call.tool_name.clone();
                match self.track.get(&call.tool_name)? {
                    Some(spec) => match spec.forward.call(&call.args).await {
                        Ok(result) => {
                            if let serde_json::Value::Object(patch) = &result {
                                let state_patch: crate::state_value::StateMap = patch
                                    .iter()
                                    .map(|(k, v)| (k.clone(), crate::state_value::StateValue::from(v)))
                                    .collect();
                                merge_state(&mut inner.state, state_patch);
                            }
                            self.track
                                .record(call.tool_name.clone(), call.args.clone(), result, true, None)?;
                            any_tool_succeeded = true;
                        }
                        Err(message) => {
                            self.track.record(
                                call.tool_name.clone(),
                                call.args.clone(),
                                serde_json::Value::Null,
                                false,
                                Some(message.clone()),
                            )?;
                            inner.transcript.push(
                                Message::ASSISTANT,
                                &format!("Error running {}: {message}", call.tool_name),
                            );
                        }
                    },
                    None => {
                        self.track.record(
                            call.tool_name.clone(),
                            call.args.clone(),
                            serde_json::Value::Null,
                            false,
                            Some("No forward handler registered".to_string()),
                        )?;
                        inner.transcript.push(
                            Message::ASSISTANT,
                            &format!("Error running {}: tool not registered", call.tool_name),
                        );
                    }
                }
            }

            // Checkpoint phase: skip when every tool this round failed, or
            // when rollback already fired (a reserved tool handled it,
            // nothing to checkpoint).
            if !rollback_requested && any_tool_ran && any_tool_succeeded && self.agent_config.auto_checkpoint {
                self.checkpoint_engine
                    .auto_checkpoint_after_turn(&inner, &self.track, &last_tool_name)
                    .await?;
                // Mirror the engine's store-side `checkpoint_count += 1` onto
                // our in-memory copy so the final `update_inner_session`
                // below doesn't clobber it back to the pre-turn value.
                inner.checkpoint_count += 1;
            }
        }

        let tool_invocations_this_turn: Vec<ToolInvocationRecord> =
            self.track.track()?[track_start..].to_vec();
        let current_turn = inner.transcript.current_turn();

        if tool_calls_total > 0 {
            self.store
                .increment_tool_count(inner.id.expect("persisted inner session"), tool_calls_total)
                .await?;
            // Same mirroring as above for `tool_invocation_count`.
            inner.tool_invocation_count += tool_calls_total;
        }
        self.store.update_inner_session(inner.clone()).await?;

        Ok(TurnOutcome {
            reply: last_reply,
            tool_invocations_this_turn,
            rollback_requested,
            rollback_checkpoint_id,
            current_turn,
        })
    }

    /// Assembles the model message list from the transcript plus, for this
    /// turn only, a prepended system message from `user_preferences.system_prompt`.
    fn assemble_messages(&self, inner: &InnerSession) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt));
        }
        messages.extend(inner.transcript.as_messages());
        messages
    }

    async fn invoke_model(
        &self,
        messages: &[Message],
        catalog: &[crate::model::ToolCatalogEntry],
        deadline: Option<Duration>,
    ) -> Result<crate::model::ModelReply> {
        let fut = self.model.invoke(messages, catalog);
        match deadline {
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(result) => result.map_err(AgentError::from),
                Err(_) => Err(AgentError::Model(ModelError::Provider {
                    message: "model invocation deadline exceeded".to_string(),
                })),
            },
            None => fut.await.map_err(AgentError::from),
        }
    }

    /// Carries over `other`'s registered tool specs and (already-truncated,
    /// in the rollback case) track wholesale. Used by the host layer to
    /// seed a freshly constructed branch agent from the one it replaces.
    pub async fn adopt_tools_from(&self, other: &Agent) -> Result<()> {
        self.track.adopt(&other.track).map_err(Into::into)
    }

    /// Drives a rollback initiated from inside this turn's tool dispatch:
    /// reverses the live track to the checkpoint's cursor, branches a new
    /// inner session, and returns it. The caller
    /// (host layer) is responsible for constructing a fresh `Agent` bound
    /// to the branch and discarding this one.
    pub async fn rollback_to(&self, checkpoint_id: i64, rollback_tools: bool) -> Result<crate::rollback::RollbackOutcome> {
        let outer_id = self.outer_session_id().await;
        self.rollback_engine
            .rollback_to(
                checkpoint_id,
                outer_id,
                &self.track,
                crate::rollback::RollbackOptions { rollback_tools },
            )
            .await
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::user::User;
    use crate::model::{ModelReply, ToolCall, ToolCatalogEntry};
    use crate::store::{OuterSession, memory::InMemoryStore};
    use crate::tools::ToolSpec;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    struct ScriptedModel {
        replies: std::sync::Mutex<Vec<ModelReply>>,
    }

    #[async_trait]
    impl Model for ScriptedModel {
        async fn invoke(&self, _messages: &[Message], _tools: &[ToolCatalogEntry]) -> std::result::Result<ModelReply, ModelError> {
            let mut replies = self.replies.lock().unwrap();
            Ok(if replies.is_empty() {
                ModelReply::default()
            } else {
                replies.remove(0)
            })
        }
    }

    struct SetX(Arc<AtomicI64>);
    #[async_trait]
    impl crate::tools::ToolForward for SetX {
        async fn call(&self, args: &serde_json::Value) -> std::result::Result<serde_json::Value, String> {
            let v = args.get("v").and_then(serde_json::Value::as_i64).unwrap_or(0);
            self.0.store(v, Ordering::SeqCst);
            Ok(serde_json::json!({ "prior": 0 }))
        }
    }

    async fn seeded_inner(store: &Arc<InMemoryStore>) -> InnerSession {
        let user = store.save_user(User::new("alice")).await.unwrap();
        let outer = store
            .create_outer_session(OuterSession::new(user.id.unwrap(), "s"))
            .await
            .unwrap();
        store
            .create_inner_session(InnerSession::new(outer.id.unwrap()))
            .await
            .unwrap()
    }

    #[tokio::test]
    /// A turn with two tool calls auto-checkpoints once, named after the
    /// last tool, with the track stamped at length 2.
    async fn test_auto_checkpoint_after_tool_turn() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let inner = seeded_inner(&store).await;
        let inner_id = inner.id.unwrap();

        let x = Arc::new(AtomicI64::new(0));
        let model = Arc::new(ScriptedModel {
            replies: std::sync::Mutex::new(vec![
                ModelReply {
                    content: "calling set_x twice".to_string(),
                    tool_calls: vec![
                        ToolCall { tool_name: "set_x".to_string(), args: serde_json::json!({"v": 1}) },
                        ToolCall { tool_name: "set_x".to_string(), args: serde_json::json!({"v": 2}) },
                    ],
                },
                ModelReply { content: "done".to_string(), tool_calls: vec![] },
            ]),
        });

        let agent = Agent::new(store.clone(), model, inner, None, AgentConfig::default(), None);
        agent.tools().register(ToolSpec::new("set_x", "sets x", Arc::new(SetX(x.clone())))).unwrap();

        let outcome = agent.run_turn("please set x", None).await.unwrap();
        assert!(!outcome.rollback_requested);
        assert_eq!(agent.tools().len().unwrap(), 2);

        let counts = store.count_checkpoints(inner_id).await.unwrap();
        assert_eq!(counts.auto, 1);
        let cps = store.list_checkpoints_by_inner(inner_id, Some(true)).await.unwrap();
        assert_eq!(cps[0].name.as_deref(), Some("After set_x"));
        assert_eq!(cps[0].tool_track_position(), 2);

        let refreshed = store.get_inner_session_by_id(inner_id).await.unwrap().unwrap();
        assert_eq!(refreshed.checkpoint_count, 1);
    }

    #[tokio::test]
    /// When every tool call in a round fails, no auto-checkpoint fires.
    async fn test_no_checkpoint_when_all_tools_fail() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let inner = seeded_inner(&store).await;
        let inner_id = inner.id.unwrap();

        let model = Arc::new(ScriptedModel {
            replies: std::sync::Mutex::new(vec![
                ModelReply {
                    content: String::new(),
                    tool_calls: vec![ToolCall { tool_name: "unregistered".to_string(), args: serde_json::Value::Null }],
                },
                ModelReply { content: "done".to_string(), tool_calls: vec![] },
            ]),
        });

        let agent = Agent::new(store.clone(), model, inner, None, AgentConfig::default(), None);
        agent.run_turn("do something", None).await.unwrap();

        let counts = store.count_checkpoints(inner_id).await.unwrap();
        assert_eq!(counts.total, 0);
    }

    #[tokio::test]
    /// A reserved tool call is tracked but excluded from auto-checkpoint
    /// triggering, and a create_checkpoint call persists a manual checkpoint.
    async fn test_reserved_tool_creates_manual_checkpoint() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let inner = seeded_inner(&store).await;
        let inner_id = inner.id.unwrap();

        let model = Arc::new(ScriptedModel {
            replies: std::sync::Mutex::new(vec![
                ModelReply {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        tool_name: "create_checkpoint".to_string(),
                        args: serde_json::json!({"name": "manual"}),
                    }],
                },
                ModelReply { content: "done".to_string(), tool_calls: vec![] },
            ]),
        });

        let agent = Agent::new(store.clone(), model, inner, None, AgentConfig::default(), None);
        let outcome = agent.run_turn("checkpoint please", None).await.unwrap();
        assert!(!outcome.rollback_requested);

        let counts = store.count_checkpoints(inner_id).await.unwrap();
        assert_eq!(counts.manual, 1);
        assert_eq!(counts.auto, 0);

        let track = agent.tools().track().unwrap();
        assert_eq!(track.len(), 1);
        assert_eq!(track[0].tool_name, "create_checkpoint");
    }

    #[tokio::test]
    /// rollback_to_checkpoint sets the rollback flags and ends the turn
    /// without invoking the model again.
    async fn test_rollback_tool_sets_flags_and_ends_turn() {
        let store: Arc<InMemoryStore> = Arc::new(InMemoryStore::new());
        let inner = seeded_inner(&store).await;
        let inner_id = inner.id.unwrap();

        let mut checkpoint = crate::store::Checkpoint {
            id: None,
            inner_session_id: inner_id,
            name: Some("before".to_string()),
            state_snapshot: Default::default(),
            transcript_snapshot: Default::default(),
            tool_invocations_snapshot: vec![],
            is_auto: false,
            created_at: chrono::Utc::now(),
            user_id: None,
            metadata: Default::default(),
        };
        checkpoint.set_tool_track_position(0);
        let checkpoint = store.create_checkpoint(checkpoint).await.unwrap();

        let call_count = Arc::new(AtomicUsize::new(0));
        struct CountingModel {
            calls: Arc<AtomicUsize>,
            checkpoint_id: i64,
        }
        #[async_trait]
        impl Model for CountingModel {
            async fn invoke(&self, _messages: &[Message], _tools: &[ToolCatalogEntry]) -> std::result::Result<ModelReply, ModelError> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(ModelReply {
                    content: String::new(),
                    tool_calls: vec![ToolCall {
                        tool_name: "rollback_to_checkpoint".to_string(),
                        args: serde_json::json!({ "id_or_name": self.checkpoint_id.to_string() }),
                    }],
                })
            }
        }

        let model = Arc::new(CountingModel { calls: call_count.clone(), checkpoint_id: checkpoint.id.unwrap() });
        let agent = Agent::new(store.clone(), model, inner, None, AgentConfig::default(), None);
        let outcome = agent.run_turn("roll back", None).await.unwrap();

        assert!(outcome.rollback_requested);
        assert_eq!(outcome.rollback_checkpoint_id, checkpoint.id);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
    }
}
