//! Tool specifications and invocation records.
//!
//! Grounded on `original_source/core/rollback_protocol.py`'s `ToolSpec` and
//! `ToolInvocationRecord` dataclasses; the Rust shape uses `async_trait`
//! objects passed around as `Arc<dyn ...>` rather than plain function
//! pointers, since tool closures need to capture shared external state
//! (the thing they mutate).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool's forward (effectful) implementation.
#[async_trait]
pub trait ToolForward: Send + Sync {
    async fn call(&self, args: &Value) -> Result<Value, String>;
}

/// A tool's reverse (compensating) implementation, given the original args
/// and the result the forward call produced.
#[async_trait]
pub trait ToolReverse: Send + Sync {
    async fn call(&self, args: &Value, prior_result: &Value) -> Result<(), String>;
}

#[async_trait]
impl<F, Fut> ToolForward for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<Value, String>> + Send,
{
    async fn call(&self, args: &Value) -> Result<Value, String> {
        (self)(args.clone()).await
    }
}

#[async_trait]
impl<F, Fut> ToolReverse for F
where
    F: Fn(Value, Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), String>> + Send,
{
    async fn call(&self, args: &Value, prior_result: &Value) -> Result<(), String> {
        (self)(args.clone(), prior_result.clone()).await
    }
}

/// A registered tool: its unique name and, optionally, a compensating
/// handler. Grounded on `ToolSpec` (`rollback_protocol.py`).
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub forward: Arc<dyn ToolForward>,
    pub reverse: Option<Arc<dyn ToolReverse>>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>, forward: Arc<dyn ToolForward>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            forward,
            reverse: None,
        }
    }

    pub fn with_reverse(mut self, reverse: Arc<dyn ToolReverse>) -> Self {
        self.reverse = Some(reverse);
        self
    }
}

/// One entry in the per-agent tool track.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocationRecord {
    pub tool_name: String,
    pub args: Value,
    pub result: Value,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Outcome of reversing a single track record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReverseResult {
    pub tool_name: String,
    pub ok: bool,
    pub err: Option<String>,
}

/// Tool names that manage checkpoints directly and are therefore excluded
/// from reverse walks.
pub const RESERVED_TOOL_NAMES: &[&str] = &[
    "create_checkpoint",
    "list_checkpoints",
    "rollback_to_checkpoint",
    "delete_checkpoint",
    "get_checkpoint_info",
    "cleanup_auto_checkpoints",
];

pub fn is_reserved_tool(name: &str) -> bool {
    RESERVED_TOOL_NAMES.contains(&name)
}
