//! The language model is an external collaborator: an opaque
//! text-completion service with tool calling. This module defines only the
//! interface the Agent Loop consumes.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::message::Message;

/// One entry in the tool catalog offered to the model for a turn.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCatalogEntry {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// A tool call the model asked to have dispatched.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCall {
    pub tool_name: String,
    pub args: Value,
}

/// The model's reply to one `invoke` call.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ModelReply {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
}

#[derive(Debug, Error, Diagnostic)]
pub enum ModelError {
    #[error("model provider error: {message}")]
    #[diagnostic(code(rollback_agent::model::provider))]
    Provider { message: String },
}

/// Sends the transcript and current tool catalog to the model, returning
/// its reply and any tool calls it asked to have dispatched.
#[async_trait]
pub trait Model: Send + Sync {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolCatalogEntry],
    ) -> Result<ModelReply, ModelError>;
}
