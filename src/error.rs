//! Crate-wide error aggregation.
//!
//! Each component owns a leaf error enum (see `store`, `tools`, `checkpoint`,
//! `rollback`, `agent`, `auth`). This module only aggregates them so callers
//! at the crate boundary can propagate a single type with `?`.

use miette::Diagnostic;
use thiserror::Error;

use crate::agent::AgentError;
use crate::auth::AuthError;
use crate::checkpoint::CheckpointError;
use crate::rollback::RollbackError;
use crate::store::StoreError;
use crate::tools::ToolRegistryError;

#[derive(Debug, Error, Diagnostic)]
pub enum RollbackAgentError {
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
    Agent(#[from] AgentError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] crate::config::ConfigError),
}

pub type Result<T> = std::result::Result<T, RollbackAgentError>;
