//! The Store component: durable persistence for users, outer sessions,
//! inner sessions, and checkpoints.
//!
//! `Store` is an `async_trait` with three implementors, mirroring a
//! runtime checkpointer's in-memory/SQLite split: [`memory::InMemoryStore`]
//! (always available, dependency-free, backs unit tests), `sqlite::SqliteStore`
//! (feature `sqlite`) and `postgres::PostgresStore` (feature `postgres`).

pub mod memory;
pub mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use model::{Checkpoint, CheckpointCounts, InnerSession, OuterSession};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use thiserror::Error;

use crate::auth::user::User;
use crate::state_value::StateMap;

#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("{what} not found: {id}")]
    #[diagnostic(code(rollback_agent::store::not_found))]
    NotFound { what: &'static str, id: i64 },

    #[error("username '{username}' is already taken")]
    #[diagnostic(code(rollback_agent::store::username_taken))]
    UsernameTaken { username: String },

    #[error("store backend error: {0}")]
    #[diagnostic(code(rollback_agent::store::backend))]
    Backend(String),

    #[error("serialization error: {0}")]
    #[diagnostic(code(rollback_agent::store::serde))]
    Serde(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable persistence for users, outer sessions, inner sessions, and
/// checkpoints. Every operation that mutates referential state (cascade
/// deletes, the single-`is_current`-per-outer-session invariant) enforces
/// it atomically inside a single transaction: no partial writes.
#[async_trait]
pub trait Store: Send + Sync {
    // --- User ---
    async fn save_user(&self, user: User) -> Result<User>;
    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>>;
    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>>;
    async fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>>;
    async fn find_all_users(&self) -> Result<Vec<User>>;
    async fn update_last_login(&self, id: i64, ts: DateTime<Utc>) -> Result<()>;
    async fn update_api_key(&self, id: i64, api_key: Option<String>) -> Result<()>;
    async fn delete_user(&self, id: i64) -> Result<()>;

    // --- OuterSession ---
    async fn create_outer_session(&self, session: OuterSession) -> Result<OuterSession>;
    /// No-op if `graph_id` is already present; updates `updated_at` either
    /// way. When `is_branch` is set, increments `branch_count` too, per
    /// `external_session.py::add_internal_session`.
    async fn add_inner_session(&self, outer_id: i64, graph_id: &str, is_branch: bool) -> Result<()>;
    async fn set_current_inner(&self, outer_id: i64, graph_id: &str) -> Result<bool>;
    async fn get_outer_session(&self, id: i64) -> Result<Option<OuterSession>>;
    async fn list_outer_sessions_by_user(&self, user_id: i64) -> Result<Vec<OuterSession>>;
    /// Bumps the denormalized `total_checkpoints` counter, per
    /// `external_session.py::increment_checkpoints`.
    async fn increment_total_checkpoints(&self, outer_id: i64) -> Result<()>;

    // --- InnerSession ---
    /// Assigns an id. If `session.is_current`, atomically clears
    /// `is_current` on all siblings under the same outer session first.
    async fn create_inner_session(&self, session: InnerSession) -> Result<InnerSession>;
    /// Same current-bit discipline as `create_inner_session`.
    async fn update_inner_session(&self, session: InnerSession) -> Result<()>;
    async fn get_inner_session_by_id(&self, id: i64) -> Result<Option<InnerSession>>;
    async fn get_inner_session_by_graph_id(&self, graph_id: &str) -> Result<Option<InnerSession>>;
    async fn list_inner_sessions_by_outer(&self, outer_id: i64) -> Result<Vec<InnerSession>>;
    async fn current_inner_session(&self, outer_id: i64) -> Result<Option<InnerSession>>;
    async fn set_current_inner_session(&self, id: i64) -> Result<()>;
    async fn delete_inner_session(&self, id: i64) -> Result<()>;
    async fn increment_tool_count(&self, id: i64, n: i64) -> Result<()>;
    async fn list_branches_of(&self, parent_id: i64) -> Result<Vec<InnerSession>>;
    /// Root-to-node path of inner sessions (walking `parent_inner_session_id`).
    async fn lineage(&self, id: i64) -> Result<Vec<InnerSession>>;

    // --- Checkpoint ---
    async fn create_checkpoint(&self, checkpoint: Checkpoint) -> Result<Checkpoint>;
    async fn get_checkpoint_by_id(&self, id: i64) -> Result<Option<Checkpoint>>;
    /// Descending by `created_at`. `auto_only = Some(true)`/`Some(false)`
    /// filters; `None` returns all.
    async fn list_checkpoints_by_inner(
        &self,
        inner_id: i64,
        auto_only: Option<bool>,
    ) -> Result<Vec<Checkpoint>>;
    async fn latest_checkpoint(&self, inner_id: i64) -> Result<Option<Checkpoint>>;
    async fn delete_checkpoint(&self, id: i64) -> Result<()>;
    /// Deletes all auto-checkpoints of `inner_id` except the `keep_latest`
    /// most recent by `created_at`; returns the number deleted.
    async fn delete_auto_keeping_latest(&self, inner_id: i64, keep_latest: i64) -> Result<i64>;
    async fn count_checkpoints(&self, inner_id: i64) -> Result<CheckpointCounts>;
    async fn list_checkpoints_by_user(&self, user_id: i64, limit: Option<i64>) -> Result<Vec<Checkpoint>>;
    async fn list_checkpoints_with_tool_invocations(&self, inner_id: i64) -> Result<Vec<Checkpoint>>;
    async fn update_checkpoint_metadata(&self, id: i64, merge: StateMap) -> Result<()>;
    /// `LIKE` over `name` and the serialized snapshot blob.
    async fn search_checkpoints(&self, inner_id: i64, term: &str) -> Result<Vec<Checkpoint>>;
}
