//! The Agent Loop: the request/response cycle that assembles a
//! turn's messages from an inner session's transcript, invokes the
//! [`crate::model::Model`], dispatches any tool calls through the
//! [`crate::tools::ToolTrackRegistry`], and checkpoints via the
//! [`crate::checkpoint::CheckpointEngine`] when a turn ran a tool.
//!
//! Grounded on `original_source/agents/rollback_agent.py`'s
//! `_build_graph`/`_agent_node`/`_tool_node`/`_checkpoint_node` state
//! machine; the Rust shape follows the thin-service-over-a-trait pattern
//! used throughout `store`/`auth` rather than re-creating a graph
//! execution engine for a three-node loop.

mod catalog;
mod host;
mod registry;
mod reserved;
mod turn;

pub use catalog::build_tool_catalog;
pub use host::{BranchNode, CheckpointSummary, HostApi, InnerSessionSummary};
pub use registry::AgentRegistry;
pub use turn::{Agent, TurnOutcome};

use miette::Diagnostic;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::model::ModelError;
use crate::rollback::RollbackError;
use crate::store::StoreError;
use crate::tools::ToolRegistryError;

#[derive(Debug, Error, Diagnostic)]
pub enum AgentError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    ToolRegistry(#[from] ToolRegistryError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Rollback(#[from] RollbackError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Model(#[from] ModelError),

    #[error("no current inner session for outer session {outer_id}")]
    #[diagnostic(code(rollback_agent::agent::no_current_session))]
    NoCurrentSession { outer_id: i64 },
}

pub type Result<T> = std::result::Result<T, AgentError>;
