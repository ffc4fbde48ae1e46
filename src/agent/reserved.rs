//! Implementations of the reserved tool surface, grounded on
//! `original_source/core/rollback_protocol.py`'s reserved-tool handlers.
//!
//! Reserved tools manipulate the [`Store`]/[`CheckpointEngine`] directly
//! under the agent's identity rather than going through the generic
//! forward/reverse [`ToolSpec`](crate::tools::ToolSpec) contract — they are
//! never registered into the [`ToolTrackRegistry`]'s tool map, only
//! recorded on its track. Reserved tool names are excluded from reverse
//! walks.

use std::sync::Arc;

use serde_json::Value;

use crate::checkpoint::CheckpointEngine;
use crate::store::{InnerSession, Store};
use crate::tools::{ToolTrackRegistry, is_reserved_tool};

/// The outcome of dispatching one reserved tool call.
pub struct ReservedOutcome {
    pub result: Value,
    pub success: bool,
    pub error_message: Option<String>,
    /// Set only by `rollback_to_checkpoint` on success.
    pub rollback_checkpoint_id: Option<i64>,
}

impl ReservedOutcome {
    fn ok(result: impl Into<String>) -> Self {
        Self {
            result: Value::String(result.into()),
            success: true,
            error_message: None,
            rollback_checkpoint_id: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            result: Value::Null,
            success: false,
            error_message: Some(message),
            rollback_checkpoint_id: None,
        }
    }
}

/// Dispatches one reserved tool call by name. `inner` is the live inner
/// session (its id must be persisted); `user_id` attributes a manually
/// created checkpoint to a caller via `Checkpoint.user_id`.
pub async fn dispatch(
    name: &str,
    args: &Value,
    store: &Arc<dyn Store>,
    checkpoint_engine: &CheckpointEngine,
    track: &ToolTrackRegistry,
    inner: &InnerSession,
    user_id: Option<i64>,
) -> ReservedOutcome {
    debug_assert!(is_reserved_tool(name), "dispatch called with non-reserved tool {name}");
    match name {
        "create_checkpoint" => create_checkpoint(args, checkpoint_engine, track, inner, user_id).await,
        "list_checkpoints" => list_checkpoints(store, inner).await,
        "rollback_to_checkpoint" => rollback_to_checkpoint(args, store, inner).await,
        "delete_checkpoint" => delete_checkpoint(args, store, inner).await,
        "get_checkpoint_info" => get_checkpoint_info(args, store).await,
        "cleanup_auto_checkpoints" => cleanup_auto_checkpoints(args, checkpoint_engine, inner).await,
        other => ReservedOutcome::err(format!("unknown reserved tool: {other}")),
    }
}

async fn create_checkpoint(
    args: &Value,
    checkpoint_engine: &CheckpointEngine,
    track: &ToolTrackRegistry,
    inner: &InnerSession,
    user_id: Option<i64>,
) -> ReservedOutcome {
    let name = args
        .get("name")
        .and_then(Value::as_str)
        .map(str::to_string);
    match checkpoint_engine
        .snapshot(inner, track, name.clone(), false, user_id)
        .await
    {
        Ok(checkpoint) => ReservedOutcome::ok(format!(
            "Created checkpoint '{}' (id {})",
            name.as_deref().unwrap_or("unnamed"),
            checkpoint.id.expect("persisted checkpoint has an id")
        )),
        Err(e) => ReservedOutcome::err(e.to_string()),
    }
}

async fn list_checkpoints(store: &Arc<dyn Store>, inner: &InnerSession) -> ReservedOutcome {
    let inner_id = inner.id.expect("dispatch requires a persisted inner session");
    match store.list_checkpoints_by_inner(inner_id, None).await {
        Ok(checkpoints) if checkpoints.is_empty() => ReservedOutcome::ok("No checkpoints yet."),
        Ok(checkpoints) => {
            let lines: Vec<String> = checkpoints
                .iter()
                .map(|c| {
                    format!(
                        "- [{}] {} ({}) at {}",
                        c.id.unwrap_or(-1),
                        c.name.as_deref().unwrap_or("unnamed"),
                        if c.is_auto { "auto" } else { "manual" },
                        c.created_at.to_rfc3339(),
                    )
                })
                .collect();
            ReservedOutcome::ok(lines.join("\n"))
        }
        Err(e) => ReservedOutcome::err(e.to_string()),
    }
}

/// Resolves by numeric id first, else case-insensitive name match within
/// the current inner session.
async fn rollback_to_checkpoint(args: &Value, store: &Arc<dyn Store>, inner: &InnerSession) -> ReservedOutcome {
    let inner_id = inner.id.expect("dispatch requires a persisted inner session");
    let id_or_name = match args.get("id_or_name").and_then(Value::as_str) {
        Some(s) => s,
        None => return ReservedOutcome::err("id_or_name is required"),
    };

    if let Ok(id) = id_or_name.parse::<i64>() {
        match store.get_checkpoint_by_id(id).await {
            Ok(Some(checkpoint)) if checkpoint.inner_session_id == inner_id => {
                return ReservedOutcome {
                    result: Value::String(format!("Rolling back to checkpoint {id}.")),
                    success: true,
                    error_message: None,
                    rollback_checkpoint_id: Some(id),
                };
            }
            Ok(Some(_)) => return ReservedOutcome::err(format!("checkpoint {id} is not in this session")),
            Ok(None) => {}
            Err(e) => return ReservedOutcome::err(e.to_string()),
        }
    }

    let checkpoints = match store.list_checkpoints_by_inner(inner_id, None).await {
        Ok(c) => c,
        Err(e) => return ReservedOutcome::err(e.to_string()),
    };
    let needle = id_or_name.to_lowercase();
    match checkpoints
        .into_iter()
        .find(|c| c.name.as_deref().map(str::to_lowercase).as_deref() == Some(needle.as_str()))
    {
        Some(checkpoint) => ReservedOutcome {
            result: Value::String(format!(
                "Rolling back to checkpoint '{id_or_name}' (id {}).",
                checkpoint.id.unwrap_or(-1)
            )),
            success: true,
            error_message: None,
            rollback_checkpoint_id: checkpoint.id,
        },
        None => ReservedOutcome::err(format!("no checkpoint named or numbered '{id_or_name}'")),
    }
}

async fn delete_checkpoint(args: &Value, store: &Arc<dyn Store>, inner: &InnerSession) -> ReservedOutcome {
    let inner_id = inner.id.expect("dispatch requires a persisted inner session");
    let id = match args.get("id").and_then(Value::as_i64) {
        Some(id) => id,
        None => return ReservedOutcome::err("id is required"),
    };
    match store.get_checkpoint_by_id(id).await {
        Ok(Some(checkpoint)) if checkpoint.inner_session_id == inner_id => {
            match store.delete_checkpoint(id).await {
                Ok(()) => ReservedOutcome::ok(format!("Deleted checkpoint {id}.")),
                Err(e) => ReservedOutcome::err(e.to_string()),
            }
        }
        Ok(Some(_)) => ReservedOutcome::err(format!("checkpoint {id} is not in this session")),
        Ok(None) => ReservedOutcome::err(format!("checkpoint {id} not found")),
        Err(e) => ReservedOutcome::err(e.to_string()),
    }
}

async fn get_checkpoint_info(args: &Value, store: &Arc<dyn Store>) -> ReservedOutcome {
    let id = match args.get("id").and_then(Value::as_i64) {
        Some(id) => id,
        None => return ReservedOutcome::err("id is required"),
    };
    match store.get_checkpoint_by_id(id).await {
        Ok(Some(c)) => ReservedOutcome::ok(format!(
            "Checkpoint {} '{}': {} created at {}, tool_track_position={}, transcript_len={}, state_keys={}",
            id,
            c.name.as_deref().unwrap_or("unnamed"),
            if c.is_auto { "auto" } else { "manual" },
            c.created_at.to_rfc3339(),
            c.tool_track_position(),
            c.transcript_snapshot.len(),
            c.state_snapshot.len(),
        )),
        Ok(None) => ReservedOutcome::err(format!("checkpoint {id} not found")),
        Err(e) => ReservedOutcome::err(e.to_string()),
    }
}

async fn cleanup_auto_checkpoints(
    args: &Value,
    checkpoint_engine: &CheckpointEngine,
    inner: &InnerSession,
) -> ReservedOutcome {
    let inner_id = inner.id.expect("dispatch requires a persisted inner session");
    let keep_latest = args.get("keep_latest").and_then(Value::as_i64).unwrap_or(5);
    match checkpoint_engine.cleanup_auto(inner_id, keep_latest).await {
        Ok(deleted) => ReservedOutcome::ok(format!("Deleted {deleted} auto checkpoint(s).")),
        Err(e) => ReservedOutcome::err(e.to_string()),
    }
}
