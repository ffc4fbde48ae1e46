//! Domain types for the Store component: `OuterSession`, `InnerSession`,
//! `Checkpoint`. `User` lives in [`crate::auth::user`]
//! since it is owned by the Auth component, not the Store directly, but
//! the Store persists it.

use chrono::{DateTime, Duration, Utc};

use crate::message::Transcript;
use crate::state_value::StateMap;
use crate::tools::ToolInvocationRecord;

/// Generates a branch/session id in the `langgraph_<12hex>` format,
/// grounded on `internal_session.py::create_branch_from_checkpoint`.
pub fn new_graph_session_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("langgraph_{}", &hex[..12])
}

/// A user-visible conversation container.
#[derive(Clone, Debug, PartialEq)]
pub struct OuterSession {
    pub id: Option<i64>,
    pub user_id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
    /// Ordered list of `graph_session_id`s.
    pub inner_session_ids: Vec<String>,
    pub current_inner_session_id: Option<String>,
    pub branch_count: i64,
    pub total_checkpoints: i64,
    pub metadata: StateMap,
}

impl OuterSession {
    pub fn new(user_id: i64, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            user_id,
            name: name.into(),
            created_at: now,
            updated_at: now,
            is_active: true,
            inner_session_ids: Vec::new(),
            current_inner_session_id: None,
            branch_count: 0,
            total_checkpoints: 0,
            metadata: StateMap::default(),
        }
    }

    /// Time elapsed since creation, grounded on
    /// `original_source/sessions/external_session.py::get_session_age`.
    pub fn age(&self) -> Duration {
        Utc::now() - self.created_at
    }
}

/// One execution timeline within an outer session.
#[derive(Clone, Debug, PartialEq)]
pub struct InnerSession {
    pub id: Option<i64>,
    pub outer_session_id: i64,
    pub graph_session_id: String,
    pub state: StateMap,
    pub transcript: Transcript,
    pub created_at: DateTime<Utc>,
    pub is_current: bool,
    pub checkpoint_count: i64,
    pub parent_inner_session_id: Option<i64>,
    pub branch_point_checkpoint_id: Option<i64>,
    pub tool_invocation_count: i64,
    pub metadata: StateMap,
}

impl InnerSession {
    pub fn new(outer_session_id: i64) -> Self {
        Self {
            id: None,
            outer_session_id,
            graph_session_id: new_graph_session_id(),
            state: StateMap::default(),
            transcript: Transcript::new(),
            created_at: Utc::now(),
            is_current: true,
            checkpoint_count: 0,
            parent_inner_session_id: None,
            branch_point_checkpoint_id: None,
            tool_invocation_count: 0,
            metadata: StateMap::default(),
        }
    }

    /// A session is a branch iff it carries a parent pointer.
    pub fn is_branch(&self) -> bool {
        self.parent_inner_session_id.is_some()
    }
}

/// A durable, value-copied snapshot of an inner session.
#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub id: Option<i64>,
    pub inner_session_id: i64,
    pub name: Option<String>,
    pub state_snapshot: StateMap,
    pub transcript_snapshot: Transcript,
    pub tool_invocations_snapshot: Vec<ToolInvocationRecord>,
    pub is_auto: bool,
    pub created_at: DateTime<Utc>,
    pub user_id: Option<i64>,
    pub metadata: StateMap,
}

impl Checkpoint {
    /// `metadata.tool_track_position`, defaulting to 0 if absent, per
    /// `checkpoint.py::get_tool_track_position`.
    pub fn tool_track_position(&self) -> usize {
        self.metadata
            .get("tool_track_position")
            .and_then(|v| v.as_i64())
            .map(|n| n.max(0) as usize)
            .unwrap_or(0)
    }

    pub fn set_tool_track_position(&mut self, position: usize) {
        self.metadata.insert(
            "tool_track_position".to_string(),
            crate::state_value::StateValue::Int(position as i64),
        );
    }

    pub fn has_tool_invocations(&self) -> bool {
        !self.tool_invocations_snapshot.is_empty()
    }
}

/// Totals returned by `Store::count_checkpoints`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckpointCounts {
    pub total: i64,
    pub auto: i64,
    pub manual: i64,
}
