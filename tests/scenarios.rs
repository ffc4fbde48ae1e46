//! End-to-end scenarios exercised against the crate's public API, one per
//! concrete walkthrough in the design notes: registration/login, an
//! auto-checkpointing tool turn, rollback-branches-while-preserving-the-old-
//! timeline, reserved-tool exclusion from reverse walks, the per-user
//! session cap, and the branch tree shape after two nested rollbacks.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use rollback_agent::agent::HostApi;
use rollback_agent::auth::service::{AuthError, AuthService};
use rollback_agent::message::Message;
use rollback_agent::model::{Model, ModelError, ModelReply, ToolCall, ToolCatalogEntry};
use rollback_agent::store::memory::InMemoryStore;
use rollback_agent::store::{OuterSession, Store};
use rollback_agent::tools::{ToolForward, ToolReverse, ToolSpec};

struct EchoModel;

#[async_trait]
impl Model for EchoModel {
    async fn invoke(&self, messages: &[Message], _tools: &[ToolCatalogEntry]) -> Result<ModelReply, ModelError> {
        let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
        Ok(ModelReply {
            content: format!("echo: {last}"),
            tool_calls: vec![],
        })
    }
}

#[tokio::test]
async fn registration_and_login() {
    let store = Arc::new(InMemoryStore::new());
    let auth = AuthService::new(store.clone());

    let alice = auth.register("alice", "hunter22", Some("hunter22")).await.unwrap();
    assert!(alice.id.unwrap() > 0);

    auth.login("alice", "hunter22").await.unwrap();
    assert!(auth.login("alice", "wrong").await.is_err());

    let err = auth.register("alice", "x", None).await.unwrap_err();
    assert!(matches!(err, AuthError::Validation(ref m) if m.contains("longer than 4")));

    let err = auth.register("alice", "hunter22", None).await.unwrap_err();
    assert!(matches!(err, AuthError::Store(_)));
}

/// A tool that sets a shared counter, with a reverse handler that restores
/// whatever value preceded the forward call.
struct SetX(Arc<AtomicI64>);
#[async_trait]
impl ToolForward for SetX {
    async fn call(&self, args: &serde_json::Value) -> Result<serde_json::Value, String> {
        let v = args.get("v").and_then(serde_json::Value::as_i64).unwrap_or(0);
        let prior = self.0.swap(v, Ordering::SeqCst);
        Ok(serde_json::json!({ "prior": prior }))
    }
}
struct UnsetX(Arc<AtomicI64>);
#[async_trait]
impl ToolReverse for UnsetX {
    async fn call(&self, _args: &serde_json::Value, prior_result: &serde_json::Value) -> Result<(), String> {
        let prior = prior_result.get("prior").and_then(serde_json::Value::as_i64).unwrap_or(0);
        self.0.store(prior, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedModel {
    replies: std::sync::Mutex<Vec<ModelReply>>,
}
#[async_trait]
impl Model for ScriptedModel {
    async fn invoke(&self, _messages: &[Message], _tools: &[ToolCatalogEntry]) -> Result<ModelReply, ModelError> {
        let mut replies = self.replies.lock().unwrap();
        Ok(if replies.is_empty() {
            ModelReply::default()
        } else {
            replies.remove(0)
        })
    }
}

async fn seeded_outer(store: &Arc<InMemoryStore>) -> i64 {
    let auth = AuthService::new(store.clone());
    let user = auth.register("alice", "hunter22", None).await.unwrap();
    let outer = store
        .create_outer_session(OuterSession::new(user.id.unwrap(), "chat"))
        .await
        .unwrap();
    outer.id.unwrap()
}

#[tokio::test]
async fn auto_checkpoint_on_tool_turn() {
    let store = Arc::new(InMemoryStore::new());
    let outer_id = seeded_outer(&store).await;
    let x = Arc::new(AtomicI64::new(0));

    let model = Arc::new(ScriptedModel {
        replies: std::sync::Mutex::new(vec![
            ModelReply {
                content: "setting x twice".to_string(),
                tool_calls: vec![
                    ToolCall { tool_name: "set_x".to_string(), args: serde_json::json!({"v": 1}) },
                    ToolCall { tool_name: "set_x".to_string(), args: serde_json::json!({"v": 2}) },
                ],
            },
            ModelReply { content: "done".to_string(), tool_calls: vec![] },
        ]),
    });

    let host = HostApi::new(store.clone(), model);
    let agent = host.create_or_resume(outer_id, None, None).await.unwrap();
    agent
        .tools()
        .register(ToolSpec::new("set_x", "sets x", Arc::new(SetX(x.clone()))).with_reverse(Arc::new(UnsetX(x.clone()))))
        .unwrap();

    host.send_message(outer_id, "please set x").await.unwrap();

    assert_eq!(agent.tools().len().unwrap(), 2);
    let inner_id = agent.inner_session_id().await;
    let counts = store.count_checkpoints(inner_id).await.unwrap();
    assert_eq!(counts.auto, 1);

    let checkpoints = store.list_checkpoints_by_inner(inner_id, Some(true)).await.unwrap();
    assert_eq!(checkpoints[0].name.as_deref(), Some("After set_x"));
    assert_eq!(checkpoints[0].tool_track_position(), 2);

    let refreshed = store.get_inner_session_by_id(inner_id).await.unwrap().unwrap();
    assert_eq!(refreshed.checkpoint_count, 1);
}

#[tokio::test]
async fn rollback_branches_and_preserves_old_timeline() {
    let store = Arc::new(InMemoryStore::new());
    let outer_id = seeded_outer(&store).await;
    let x = Arc::new(AtomicI64::new(0));

    let model = Arc::new(ScriptedModel {
        replies: std::sync::Mutex::new(vec![
            ModelReply {
                content: String::new(),
                tool_calls: vec![
                    ToolCall { tool_name: "set_x".to_string(), args: serde_json::json!({"v": 1}) },
                    ToolCall { tool_name: "set_x".to_string(), args: serde_json::json!({"v": 2}) },
                ],
            },
            ModelReply { content: "done".to_string(), tool_calls: vec![] },
        ]),
    });

    let host = HostApi::new(store.clone(), model);
    let agent = host.create_or_resume(outer_id, None, None).await.unwrap();
    agent
        .tools()
        .register(ToolSpec::new("set_x", "sets x", Arc::new(SetX(x.clone()))).with_reverse(Arc::new(UnsetX(x.clone()))))
        .unwrap();
    host.send_message(outer_id, "please set x").await.unwrap();
    assert_eq!(x.load(Ordering::SeqCst), 2);

    let original_inner_id = agent.inner_session_id().await;
    let checkpoint = store
        .latest_checkpoint(original_inner_id)
        .await
        .unwrap()
        .expect("auto checkpoint exists");

    let branch_id = host.rollback(outer_id, checkpoint.id.unwrap()).await.unwrap();

    // Reverse handlers ran in order set_x(2) then set_x(1): x is restored
    // to its pre-turn value.
    assert_eq!(x.load(Ordering::SeqCst), 0);

    // Old inner session and its checkpoint are untouched.
    let old = store.get_inner_session_by_id(original_inner_id).await.unwrap().unwrap();
    assert!(!old.is_current);
    let old_checkpoints = store.list_checkpoints_by_inner(original_inner_id, None).await.unwrap();
    assert_eq!(old_checkpoints.len(), 1);

    // The branch is current for the outer session and points back at C.
    let current = store.current_inner_session(outer_id).await.unwrap().unwrap();
    assert_eq!(current.id, Some(branch_id));
    assert_eq!(current.parent_inner_session_id, Some(original_inner_id));
    assert_eq!(current.branch_point_checkpoint_id, checkpoint.id);
}

#[tokio::test]
async fn reserved_tool_excluded_from_reverse_walk() {
    let store = Arc::new(InMemoryStore::new());
    let outer_id = seeded_outer(&store).await;
    let x = Arc::new(AtomicI64::new(0));

    let model = Arc::new(ScriptedModel {
        replies: std::sync::Mutex::new(vec![
            ModelReply {
                content: String::new(),
                tool_calls: vec![
                    ToolCall { tool_name: "set_x".to_string(), args: serde_json::json!({"v": 1}) },
                    ToolCall {
                        tool_name: "create_checkpoint".to_string(),
                        args: serde_json::json!({ "name": "manual" }),
                    },
                ],
            },
            ModelReply { content: "done".to_string(), tool_calls: vec![] },
        ]),
    });

    let host = HostApi::new(store.clone(), model);
    let agent = host.create_or_resume(outer_id, None, None).await.unwrap();
    agent
        .tools()
        .register(ToolSpec::new("set_x", "sets x", Arc::new(SetX(x.clone()))).with_reverse(Arc::new(UnsetX(x.clone()))))
        .unwrap();
    host.send_message(outer_id, "set x then checkpoint").await.unwrap();

    let track = agent.tools().track().unwrap();
    assert_eq!(track.len(), 2);
    assert_eq!(track[1].tool_name, "create_checkpoint");

    let inner_id = agent.inner_session_id().await;
    let manual = store
        .list_checkpoints_by_inner(inner_id, Some(false))
        .await
        .unwrap();
    assert_eq!(manual.len(), 1);

    // Reversing the whole track skips create_checkpoint, only reversing set_x.
    let results = agent.tools().rollback().await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].tool_name, "set_x");
    assert_eq!(x.load(Ordering::SeqCst), 0);

    // The manual checkpoint persists: rollback of the live track never
    // touches the store.
    let still_there = store.get_checkpoint_by_id(manual[0].id.unwrap()).await.unwrap();
    assert!(still_there.is_some());
}

#[tokio::test]
async fn session_limit_enforced_across_outer_sessions() {
    let store = Arc::new(InMemoryStore::new());
    let auth = AuthService::new(store.clone());
    let mut user = auth.register("carol", "hunter22", None).await.unwrap();
    user.session_limit = 2;
    let user = store.save_user(user).await.unwrap();

    for i in 1..=2 {
        let outer = store
            .create_outer_session(OuterSession::new(user.id.unwrap(), format!("chat {i}")))
            .await
            .unwrap();
        auth.add_session(user.id.unwrap(), outer.id.unwrap()).await.unwrap();
    }

    let third = store
        .create_outer_session(OuterSession::new(user.id.unwrap(), "chat 3"))
        .await
        .unwrap();
    let err = auth
        .add_session(user.id.unwrap(), third.id.unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::SessionLimitReached { limit: 2 }));
}

#[tokio::test]
async fn branch_tree_reflects_two_nested_rollbacks() {
    let store = Arc::new(InMemoryStore::new());
    let outer_id = seeded_outer(&store).await;
    let host = HostApi::new(store.clone(), Arc::new(EchoModel));

    let i1 = host.create_or_resume(outer_id, None, None).await.unwrap();
    let i1_id = i1.inner_session_id().await;
    let checkpoint1 = {
        let engine = rollback_agent::checkpoint::CheckpointEngine::new(store.clone());
        let inner = i1.current_inner_session().await;
        engine.snapshot(&inner, i1.tools(), Some("cp1".to_string()), false, None).await.unwrap()
    };

    let i2_id = host.rollback(outer_id, checkpoint1.id.unwrap()).await.unwrap();
    assert_eq!(store.get_inner_session_by_id(i2_id).await.unwrap().unwrap().parent_inner_session_id, Some(i1_id));

    let i2 = host.create_or_resume(outer_id, None, None).await.unwrap();
    let checkpoint2 = {
        let engine = rollback_agent::checkpoint::CheckpointEngine::new(store.clone());
        let inner = i2.current_inner_session().await;
        engine.snapshot(&inner, i2.tools(), Some("cp2".to_string()), false, None).await.unwrap()
    };
    let i3_id = host.rollback(outer_id, checkpoint2.id.unwrap()).await.unwrap();
    assert_eq!(store.get_inner_session_by_id(i3_id).await.unwrap().unwrap().parent_inner_session_id, Some(i2_id));

    let tree = host.branch_tree(outer_id).await.unwrap();
    assert_eq!(tree.len(), 1);
    assert_eq!(tree[0].id, i1_id);
    assert_eq!(tree[0].children.len(), 1);
    assert_eq!(tree[0].children[0].id, i2_id);
    assert_eq!(tree[0].children[0].children.len(), 1);
    assert_eq!(tree[0].children[0].children[0].id, i3_id);
}
