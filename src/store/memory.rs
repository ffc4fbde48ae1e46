//! A dependency-free, in-process `Store` implementation, grounded on the
//! runtime's in-memory checkpointer and its `RwLock<FxHashMap<...>>`
//! shape. Always available (no feature gate), used by this crate's unit
//! and scenario tests in place of a real database.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;

use crate::auth::user::User;
use crate::state_value::StateMap;

use super::model::{Checkpoint, CheckpointCounts, InnerSession, OuterSession};
use super::{Result, Store, StoreError};

#[derive(Default)]
struct Tables {
    users: FxHashMap<i64, User>,
    outer_sessions: FxHashMap<i64, OuterSession>,
    inner_sessions: FxHashMap<i64, InnerSession>,
    checkpoints: FxHashMap<i64, Checkpoint>,
    next_user_id: i64,
    next_outer_id: i64,
    next_inner_id: i64,
    next_checkpoint_id: i64,
}

/// In-memory `Store`. A single `rootusr` admin is seeded at construction,
/// matching the built-in admin created on first schema init.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        let mut tables = Tables::default();
        tables.next_user_id = 1;
        tables.next_outer_id = 1;
        tables.next_inner_id = 1;
        tables.next_checkpoint_id = 1;

        let mut root = User::new("rootusr");
        root.is_admin = true;
        root.set_password("1234");
        root.id = Some(tables.next_user_id);
        tables.users.insert(tables.next_user_id, root);
        tables.next_user_id += 1;

        Self {
            tables: RwLock::new(tables),
        }
    }

    fn lock(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn save_user(&self, mut user: User) -> Result<User> {
        let mut tables = self.lock();
        if let Some(id) = user.id {
            if !tables.users.contains_key(&id) {
                return Err(StoreError::NotFound { what: "user", id });
            }
            if tables
                .users
                .values()
                .any(|u| u.id != Some(id) && u.username == user.username)
            {
                return Err(StoreError::UsernameTaken {
                    username: user.username,
                });
            }
            tables.users.insert(id, user.clone());
            Ok(user)
        } else {
            if tables.users.values().any(|u| u.username == user.username) {
                return Err(StoreError::UsernameTaken {
                    username: user.username,
                });
            }
            let id = tables.next_user_id;
            tables.next_user_id += 1;
            user.id = Some(id);
            if user.created_at.is_none() {
                user.created_at = Some(Utc::now());
            }
            tables.users.insert(id, user.clone());
            Ok(user)
        }
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self.read().users.get(&id).cloned())
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        Ok(self
            .read()
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        Ok(self
            .read()
            .users
            .values()
            .find(|u| u.api_key.as_deref() == Some(api_key))
            .cloned())
    }

    async fn find_all_users(&self) -> Result<Vec<User>> {
        Ok(self.read().users.values().cloned().collect())
    }

    async fn update_last_login(&self, id: i64, ts: DateTime<Utc>) -> Result<()> {
        let mut tables = self.lock();
        let user = tables
            .users
            .get_mut(&id)
            .ok_or(StoreError::NotFound { what: "user", id })?;
        user.last_login = Some(ts);
        Ok(())
    }

    async fn update_api_key(&self, id: i64, api_key: Option<String>) -> Result<()> {
        let mut tables = self.lock();
        let user = tables
            .users
            .get_mut(&id)
            .ok_or(StoreError::NotFound { what: "user", id })?;
        user.api_key = api_key;
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<()> {
        let mut tables = self.lock();
        if tables.users.remove(&id).is_none() {
            return Err(StoreError::NotFound { what: "user", id });
        }
        for checkpoint in tables.checkpoints.values_mut() {
            if checkpoint.user_id == Some(id) {
                checkpoint.user_id = None;
            }
        }
        Ok(())
    }

    async fn create_outer_session(&self, mut session: OuterSession) -> Result<OuterSession> {
        let mut tables = self.lock();
        let id = tables.next_outer_id;
        tables.next_outer_id += 1;
        session.id = Some(id);
        tables.outer_sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn add_inner_session(&self, outer_id: i64, graph_id: &str, is_branch: bool) -> Result<()> {
        let mut tables = self.lock();
        let outer = tables
            .outer_sessions
            .get_mut(&outer_id)
            .ok_or(StoreError::NotFound {
                what: "outer_session",
                id: outer_id,
            })?;
        if !outer.inner_session_ids.iter().any(|g| g == graph_id) {
            outer.inner_session_ids.push(graph_id.to_string());
            if is_branch {
                outer.branch_count += 1;
            }
        }
        outer.updated_at = Utc::now();
        Ok(())
    }

    async fn set_current_inner(&self, outer_id: i64, graph_id: &str) -> Result<bool> {
        let mut tables = self.lock();
        let outer = tables
            .outer_sessions
            .get_mut(&outer_id)
            .ok_or(StoreError::NotFound {
                what: "outer_session",
                id: outer_id,
            })?;
        if !outer.inner_session_ids.iter().any(|g| g == graph_id) {
            return Ok(false);
        }
        outer.current_inner_session_id = Some(graph_id.to_string());
        outer.updated_at = Utc::now();
        Ok(true)
    }

    async fn get_outer_session(&self, id: i64) -> Result<Option<OuterSession>> {
        Ok(self.read().outer_sessions.get(&id).cloned())
    }

    async fn list_outer_sessions_by_user(&self, user_id: i64) -> Result<Vec<OuterSession>> {
        let mut out: Vec<_> = self
            .read()
            .outer_sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.id);
        Ok(out)
    }

    async fn increment_total_checkpoints(&self, outer_id: i64) -> Result<()> {
        let mut tables = self.lock();
        let outer = tables
            .outer_sessions
            .get_mut(&outer_id)
            .ok_or(StoreError::NotFound {
                what: "outer_session",
                id: outer_id,
            })?;
        outer.total_checkpoints += 1;
        outer.updated_at = Utc::now();
        Ok(())
    }

    async fn create_inner_session(&self, mut session: InnerSession) -> Result<InnerSession> {
        let mut tables = self.lock();
        let id = tables.next_inner_id;
        tables.next_inner_id += 1;
        session.id = Some(id);
        if session.is_current {
            for other in tables.inner_sessions.values_mut() {
                if other.outer_session_id == session.outer_session_id {
                    other.is_current = false;
                }
            }
        }
        tables.inner_sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn update_inner_session(&self, session: InnerSession) -> Result<()> {
        let mut tables = self.lock();
        let id = session.id.ok_or(StoreError::NotFound {
            what: "inner_session",
            id: -1,
        })?;
        if !tables.inner_sessions.contains_key(&id) {
            return Err(StoreError::NotFound {
                what: "inner_session",
                id,
            });
        }
        if session.is_current {
            for (other_id, other) in tables.inner_sessions.iter_mut() {
                if *other_id != id && other.outer_session_id == session.outer_session_id {
                    other.is_current = false;
                }
            }
        }
        tables.inner_sessions.insert(id, session);
        Ok(())
    }

    async fn get_inner_session_by_id(&self, id: i64) -> Result<Option<InnerSession>> {
        Ok(self.read().inner_sessions.get(&id).cloned())
    }

    async fn get_inner_session_by_graph_id(&self, graph_id: &str) -> Result<Option<InnerSession>> {
        Ok(self
            .read()
            .inner_sessions
            .values()
            .find(|s| s.graph_session_id == graph_id)
            .cloned())
    }

    async fn list_inner_sessions_by_outer(&self, outer_id: i64) -> Result<Vec<InnerSession>> {
        let mut out: Vec<_> = self
            .read()
            .inner_sessions
            .values()
            .filter(|s| s.outer_session_id == outer_id)
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn current_inner_session(&self, outer_id: i64) -> Result<Option<InnerSession>> {
        Ok(self
            .read()
            .inner_sessions
            .values()
            .find(|s| s.outer_session_id == outer_id && s.is_current)
            .cloned())
    }

    async fn set_current_inner_session(&self, id: i64) -> Result<()> {
        let mut tables = self.lock();
        let outer_id = tables
            .inner_sessions
            .get(&id)
            .ok_or(StoreError::NotFound {
                what: "inner_session",
                id,
            })?
            .outer_session_id;
        for (other_id, other) in tables.inner_sessions.iter_mut() {
            if other.outer_session_id == outer_id {
                other.is_current = *other_id == id;
            }
        }
        Ok(())
    }

    async fn delete_inner_session(&self, id: i64) -> Result<()> {
        let mut tables = self.lock();
        if tables.inner_sessions.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                what: "inner_session",
                id,
            });
        }
        tables.checkpoints.retain(|_, c| c.inner_session_id != id);
        for other in tables.inner_sessions.values_mut() {
            if other.parent_inner_session_id == Some(id) {
                other.parent_inner_session_id = None;
            }
        }
        Ok(())
    }

    async fn increment_tool_count(&self, id: i64, n: i64) -> Result<()> {
        let mut tables = self.lock();
        let session = tables
            .inner_sessions
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                what: "inner_session",
                id,
            })?;
        session.tool_invocation_count += n;
        Ok(())
    }

    async fn list_branches_of(&self, parent_id: i64) -> Result<Vec<InnerSession>> {
        let mut out: Vec<_> = self
            .read()
            .inner_sessions
            .values()
            .filter(|s| s.parent_inner_session_id == Some(parent_id))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.created_at);
        Ok(out)
    }

    async fn lineage(&self, id: i64) -> Result<Vec<InnerSession>> {
        let tables = self.read();
        let mut path = Vec::new();
        let mut current = tables
            .inner_sessions
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                what: "inner_session",
                id,
            })?;
        loop {
            let parent_id = current.parent_inner_session_id;
            path.push(current.clone());
            match parent_id {
                Some(pid) => match tables.inner_sessions.get(&pid) {
                    Some(parent) => current = parent.clone(),
                    None => break,
                },
                None => break,
            }
        }
        path.reverse();
        Ok(path)
    }

    async fn create_checkpoint(&self, mut checkpoint: Checkpoint) -> Result<Checkpoint> {
        let mut tables = self.lock();
        let id = tables.next_checkpoint_id;
        tables.next_checkpoint_id += 1;
        checkpoint.id = Some(id);
        tables.checkpoints.insert(id, checkpoint.clone());
        Ok(checkpoint)
    }

    async fn get_checkpoint_by_id(&self, id: i64) -> Result<Option<Checkpoint>> {
        Ok(self.read().checkpoints.get(&id).cloned())
    }

    async fn list_checkpoints_by_inner(
        &self,
        inner_id: i64,
        auto_only: Option<bool>,
    ) -> Result<Vec<Checkpoint>> {
        let mut out: Vec<_> = self
            .read()
            .checkpoints
            .values()
            .filter(|c| {
                c.inner_session_id == inner_id && auto_only.is_none_or(|flag| c.is_auto == flag)
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn latest_checkpoint(&self, inner_id: i64) -> Result<Option<Checkpoint>> {
        Ok(self.list_checkpoints_by_inner(inner_id, None).await?.into_iter().next())
    }

    async fn delete_checkpoint(&self, id: i64) -> Result<()> {
        let mut tables = self.lock();
        if tables.checkpoints.remove(&id).is_none() {
            return Err(StoreError::NotFound {
                what: "checkpoint",
                id,
            });
        }
        Ok(())
    }

    async fn delete_auto_keeping_latest(&self, inner_id: i64, keep_latest: i64) -> Result<i64> {
        let mut tables = self.lock();
        let mut autos: Vec<_> = tables
            .checkpoints
            .values()
            .filter(|c| c.inner_session_id == inner_id && c.is_auto)
            .map(|c| (c.id.unwrap(), c.created_at))
            .collect();
        autos.sort_by(|a, b| b.1.cmp(&a.1));
        let to_delete: Vec<i64> = autos
            .into_iter()
            .skip(keep_latest.max(0) as usize)
            .map(|(id, _)| id)
            .collect();
        let deleted = to_delete.len() as i64;
        for id in to_delete {
            tables.checkpoints.remove(&id);
        }
        Ok(deleted)
    }

    async fn count_checkpoints(&self, inner_id: i64) -> Result<CheckpointCounts> {
        let tables = self.read();
        let mut counts = CheckpointCounts::default();
        for c in tables.checkpoints.values().filter(|c| c.inner_session_id == inner_id) {
            counts.total += 1;
            if c.is_auto {
                counts.auto += 1;
            } else {
                counts.manual += 1;
            }
        }
        Ok(counts)
    }

    async fn list_checkpoints_by_user(&self, user_id: i64, limit: Option<i64>) -> Result<Vec<Checkpoint>> {
        let mut out: Vec<_> = self
            .read()
            .checkpoints
            .values()
            .filter(|c| c.user_id == Some(user_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            out.truncate(limit.max(0) as usize);
        }
        Ok(out)
    }

    async fn list_checkpoints_with_tool_invocations(&self, inner_id: i64) -> Result<Vec<Checkpoint>> {
        Ok(self
            .list_checkpoints_by_inner(inner_id, None)
            .await?
            .into_iter()
            .filter(Checkpoint::has_tool_invocations)
            .collect())
    }

    async fn update_checkpoint_metadata(&self, id: i64, merge: StateMap) -> Result<()> {
        let mut tables = self.lock();
        let checkpoint = tables
            .checkpoints
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                what: "checkpoint",
                id,
            })?;
        crate::state_value::merge_state(&mut checkpoint.metadata, merge);
        Ok(())
    }

    async fn search_checkpoints(&self, inner_id: i64, term: &str) -> Result<Vec<Checkpoint>> {
        let needle = term.to_lowercase();
        Ok(self
            .list_checkpoints_by_inner(inner_id, None)
            .await?
            .into_iter()
            .filter(|c| {
                c.name
                    .as_deref()
                    .is_some_and(|n| n.to_lowercase().contains(&needle))
                    || format!("{:?}", c.state_snapshot).to_lowercase().contains(&needle)
            })
            .collect())
    }
}
