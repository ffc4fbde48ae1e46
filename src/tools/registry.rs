//! The tool track registry: an in-process, append-only log of tool
//! invocations with registered forward/reverse handlers.
//!
//! Grounded on `original_source/core/rollback_protocol.py`'s
//! `ToolRollbackRegistry`. Shape follows the runtime's in-memory
//! checkpointer, which uses the same `RwLock<FxHashMap<...>>` pattern for
//! interior mutability.

use std::sync::RwLock;

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use super::spec::{ReverseResult, ToolInvocationRecord, ToolSpec, is_reserved_tool};

#[derive(Debug, Error, Diagnostic)]
pub enum ToolRegistryError {
    #[error("truncate position {position} out of range [0, {len}]")]
    #[diagnostic(code(rollback_agent::tools::out_of_range))]
    OutOfRange { position: usize, len: usize },

    #[error("registry lock poisoned: {0}")]
    #[diagnostic(code(rollback_agent::tools::poisoned))]
    Poisoned(String),
}

pub type Result<T> = std::result::Result<T, ToolRegistryError>;

/// Per-agent append-only track of tool invocations plus the registered
/// tool specs that know how to reverse them.
#[derive(Default)]
pub struct ToolTrackRegistry {
    tools: RwLock<FxHashMap<String, ToolSpec>>,
    track: RwLock<Vec<ToolInvocationRecord>>,
}

impl ToolTrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool, idempotent by name; re-registering replaces the
    /// stored spec (including its reverse handler).
    pub fn register(&self, spec: ToolSpec) -> Result<()> {
        let mut tools = self
            .tools
            .write()
            .map_err(|e| ToolRegistryError::Poisoned(e.to_string()))?;
        tools.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Option<ToolSpec>> {
        let tools = self
            .tools
            .read()
            .map_err(|e| ToolRegistryError::Poisoned(e.to_string()))?;
        Ok(tools.get(name).cloned())
    }

    /// All registered tool specs, for catalog assembly (name/description
    /// only matter to callers; order is unspecified).
    pub fn list(&self) -> Result<Vec<ToolSpec>> {
        let tools = self
            .tools
            .read()
            .map_err(|e| ToolRegistryError::Poisoned(e.to_string()))?;
        Ok(tools.values().cloned().collect())
    }

    /// Replaces this registry's tool specs and track wholesale, used when a
    /// branch continues from its parent's already-truncated track after a
    /// rollback ("truncate the new agent's in-memory tool track").
    pub fn adopt(&self, other: &ToolTrackRegistry) -> Result<()> {
        let other_tools = other
            .tools
            .read()
            .map_err(|e| ToolRegistryError::Poisoned(e.to_string()))?
            .clone();
        let other_track = other.track()?;
        *self
            .tools
            .write()
            .map_err(|e| ToolRegistryError::Poisoned(e.to_string()))? = other_tools;
        *self
            .track
            .write()
            .map_err(|e| ToolRegistryError::Poisoned(e.to_string()))? = other_track;
        Ok(())
    }

    /// Appends a record unconditionally, success or failure.
    pub fn record(
        &self,
        tool_name: impl Into<String>,
        args: Value,
        result: Value,
        success: bool,
        error_message: Option<String>,
    ) -> Result<()> {
        let mut track = self
            .track
            .write()
            .map_err(|e| ToolRegistryError::Poisoned(e.to_string()))?;
        track.push(ToolInvocationRecord {
            tool_name: tool_name.into(),
            args,
            result,
            success,
            error_message,
        });
        Ok(())
    }

    /// A snapshot copy of the track; callers never see the live slice.
    pub fn track(&self) -> Result<Vec<ToolInvocationRecord>> {
        let track = self
            .track
            .read()
            .map_err(|e| ToolRegistryError::Poisoned(e.to_string()))?;
        Ok(track.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self
            .track
            .read()
            .map_err(|e| ToolRegistryError::Poisoned(e.to_string()))?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Retains `[0, position)` only.
    pub fn truncate(&self, position: usize) -> Result<()> {
        let mut track = self
            .track
            .write()
            .map_err(|e| ToolRegistryError::Poisoned(e.to_string()))?;
        if position > track.len() {
            return Err(ToolRegistryError::OutOfRange {
                position,
                len: track.len(),
            });
        }
        track.truncate(position);
        Ok(())
    }

    /// Walks the full track in reverse, invoking reverse handlers for every
    /// non-reserved record, then clears the track.
    pub async fn rollback(&self) -> Result<Vec<ReverseResult>> {
        let results = self.reverse_walk(0).await?;
        self.truncate(0)?;
        Ok(results)
    }

    /// Walks `[len-1 .. start]` in reverse without clearing the track,
    /// for partial rollback to a checkpoint's cursor.
    pub async fn rollback_from_track_index(&self, start: usize) -> Result<Vec<ReverseResult>> {
        self.reverse_walk(start).await
    }

    async fn reverse_walk(&self, start: usize) -> Result<Vec<ReverseResult>> {
        let track = self.track()?;
        let mut results = Vec::new();
        if start > track.len() {
            return Ok(results);
        }
        for record in track[start..].iter().rev() {
            if is_reserved_tool(&record.tool_name) {
                continue;
            }
            let spec = self.get(&record.tool_name)?;
            match spec.and_then(|s| s.reverse) {
                None => results.push(ReverseResult {
                    tool_name: record.tool_name.clone(),
                    ok: false,
                    err: Some("No reverse handler registered".to_string()),
                }),
                Some(reverse) => match reverse.call(&record.args, &record.result).await {
                    Ok(()) => results.push(ReverseResult {
                        tool_name: record.tool_name.clone(),
                        ok: true,
                        err: None,
                    }),
                    Err(message) => results.push(ReverseResult {
                        tool_name: record.tool_name.clone(),
                        ok: false,
                        err: Some(message),
                    }),
                },
            }
        }
        Ok(results)
    }

    /// Drains the track, then re-invokes `forward` for each prior record in
    /// original order, appending a new record (success or failure) for each.
    pub async fn redo(&self) -> Result<Vec<ToolInvocationRecord>> {
        let old_track = self.track()?;
        self.truncate(0)?;

        for record in &old_track {
            let spec = self.get(&record.tool_name)?;
            match spec {
                Some(s) => match s.forward.call(&record.args).await {
                    Ok(result) => self.record(record.tool_name.clone(), record.args.clone(), result, true, None)?,
                    Err(message) => self.record(
                        record.tool_name.clone(),
                        record.args.clone(),
                        Value::Null,
                        false,
                        Some(message),
                    )?,
                },
                None => self.record(
                    record.tool_name.clone(),
                    record.args.clone(),
                    Value::Null,
                    false,
                    Some("No forward handler registered".to_string()),
                )?,
            }
        }
        self.track()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::spec::ToolForward;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;

    struct SetX(Arc<AtomicI64>);

    #[async_trait::async_trait]
    impl ToolForward for SetX {
        async fn call(&self, args: &Value) -> Result<Value, String> {
            let v = args.get("v").and_then(Value::as_i64).unwrap_or(0);
            let prior = self.0.swap(v, Ordering::SeqCst);
            Ok(serde_json::json!({ "prior": prior }))
        }
    }

    struct UnsetX(Arc<AtomicI64>);

    #[async_trait::async_trait]
    impl crate::tools::spec::ToolReverse for UnsetX {
        async fn call(&self, _args: &Value, prior_result: &Value) -> Result<(), String> {
            let prior = prior_result.get("prior").and_then(Value::as_i64).unwrap_or(0);
            self.0.store(prior, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    /// Truncate(len) is a no-op; Truncate(0) empties the track.
    async fn test_truncate_edges() {
        let registry = ToolTrackRegistry::new();
        registry
            .record("noop", Value::Null, Value::Null, true, None)
            .unwrap();
        registry
            .record("noop", Value::Null, Value::Null, true, None)
            .unwrap();
        let len = registry.len().unwrap();
        registry.truncate(len).unwrap();
        assert_eq!(registry.len().unwrap(), len);

        registry.truncate(0).unwrap();
        assert_eq!(registry.len().unwrap(), 0);
    }

    #[tokio::test]
    /// Truncate past the end of the track is rejected.
    async fn test_truncate_out_of_range() {
        let registry = ToolTrackRegistry::new();
        registry
            .record("noop", Value::Null, Value::Null, true, None)
            .unwrap();
        assert!(registry.truncate(5).is_err());
    }

    #[tokio::test]
    /// Rollback executes reverse handlers in reverse order and empties the track.
    async fn test_rollback_reverses_in_order() {
        let x = Arc::new(AtomicI64::new(0));
        let registry = ToolTrackRegistry::new();
        registry
            .register(
                ToolSpec::new("set_x", "sets x", Arc::new(SetX(x.clone())))
                    .with_reverse(Arc::new(UnsetX(x.clone()))),
            )
            .unwrap();

        let r1 = registry
            .get("set_x")
            .unwrap()
            .unwrap()
            .forward
            .call(&serde_json::json!({ "v": 1 }))
            .await
            .unwrap();
        registry
            .record("set_x", serde_json::json!({ "v": 1 }), r1, true, None)
            .unwrap();
        let r2 = registry
            .get("set_x")
            .unwrap()
            .unwrap()
            .forward
            .call(&serde_json::json!({ "v": 2 }))
            .await
            .unwrap();
        registry
            .record("set_x", serde_json::json!({ "v": 2 }), r2, true, None)
            .unwrap();

        assert_eq!(x.load(Ordering::SeqCst), 2);
        let results = registry.rollback().await.unwrap();
        assert_eq!(x.load(Ordering::SeqCst), 0);
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.ok));
        assert_eq!(registry.len().unwrap(), 0);
    }

    #[tokio::test]
    /// A reserved tool name is skipped during the reverse walk.
    async fn test_reserved_tool_skipped() {
        let registry = ToolTrackRegistry::new();
        registry
            .record("create_checkpoint", Value::Null, Value::Null, true, None)
            .unwrap();
        let results = registry.rollback().await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    /// Missing a reverse handler is reported rather than panicking.
    async fn test_missing_reverse_handler() {
        let registry = ToolTrackRegistry::new();
        registry
            .record("irreversible", Value::Null, Value::Null, true, None)
            .unwrap();
        let results = registry.rollback().await.unwrap();
        assert_eq!(results.len(), 1);
        assert!(!results[0].ok);
        assert_eq!(results[0].err.as_deref(), Some("No reverse handler registered"));
    }
}
