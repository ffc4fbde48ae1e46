//! Postgres-backed `Store` (feature `postgres`), the same schema and JSON
//! blob strategy as [`super::sqlite::SqliteStore`] but against `PgPool`,
//! following the same connect/migrate pattern as the SQLite sibling
//! backend.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::instrument;

use crate::auth::user::User;
use crate::message::Transcript;
use crate::state_value::StateMap;
use crate::tools::ToolInvocationRecord;

use super::model::{Checkpoint, CheckpointCounts, InnerSession, OuterSession};
use super::{Result, Store, StoreError};

fn backend(e: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn serde_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Serde(e.to_string())
}

fn state_to_json(state: &StateMap) -> Result<String> {
    let value: serde_json::Value = serde_json::Value::Object(
        state
            .iter()
            .map(|(k, v)| (k.clone(), v.clone().into()))
            .collect(),
    );
    serde_json::to_string(&value).map_err(serde_err)
}

fn json_to_state(raw: &str) -> Result<StateMap> {
    let value: serde_json::Value = serde_json::from_str(raw).map_err(serde_err)?;
    let obj = value.as_object().cloned().unwrap_or_default();
    Ok(obj
        .into_iter()
        .map(|(k, v)| (k, crate::state_value::StateValue::from(&v)))
        .collect())
}

#[derive(serde::Serialize, serde::Deserialize)]
struct CheckpointPayload {
    state_snapshot: serde_json::Value,
    transcript_snapshot: Vec<crate::message::TranscriptEntry>,
    tool_invocations_snapshot: Vec<ToolInvocationRecord>,
    metadata: serde_json::Value,
}

/// Inserts the built-in `rootusr` admin if no user of that name exists yet,
/// grounded on `database/connection.py`'s first-schema-init seed.
/// `ON CONFLICT DO NOTHING` makes it idempotent across restarts.
async fn seed_root_user(pool: &PgPool) -> Result<()> {
    let mut root = User::new("rootusr");
    root.is_admin = true;
    root.set_password("1234");
    let created_at = root.created_at.unwrap_or_else(Utc::now);
    sqlx::query(
        r#"
        INSERT INTO users
            (username, password_hash, is_admin, created_at, session_limit, preferences, active_session_ids)
        VALUES ($1, $2, TRUE, $3, $4, '{}', '[]')
        ON CONFLICT (username) DO NOTHING
        "#,
    )
    .bind(&root.username)
    .bind(&root.password_hash)
    .bind(created_at)
    .bind(root.session_limit)
    .execute(pool)
    .await
    .map_err(backend)?;
    Ok(())
}

/// Postgres-backed [`Store`] (feature `postgres`).
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish()
    }
}

impl PostgresStore {
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await.map_err(backend)?;
        #[cfg(feature = "postgres-migrations")]
        {
            sqlx::migrate!("./migrations/postgres")
                .run(&pool)
                .await
                .map_err(backend)?;
        }
        seed_root_user(&pool).await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }

    fn row_to_user(row: &PgRow) -> Result<User> {
        let preferences: String = row.get("preferences");
        let active_session_ids: String = row.get("active_session_ids");
        Ok(User {
            id: Some(row.get::<i64, _>("id")),
            username: row.get("username"),
            password_hash: row.get("password_hash"),
            is_admin: row.get("is_admin"),
            created_at: row.get::<Option<DateTime<Utc>>, _>("created_at"),
            last_login: row.get::<Option<DateTime<Utc>>, _>("last_login"),
            active_session_ids: serde_json::from_str(&active_session_ids).map_err(serde_err)?,
            preferences: json_to_state(&preferences)?,
            api_key: row.get("api_key"),
            session_limit: row.get("session_limit"),
        })
    }

    fn row_to_outer(row: &PgRow) -> Result<OuterSession> {
        let inner_ids: String = row.get("internal_session_ids");
        let metadata: String = row.get("metadata");
        Ok(OuterSession {
            id: Some(row.get::<i64, _>("id")),
            user_id: row.get("user_id"),
            name: row.get("session_name"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
            is_active: row.get("is_active"),
            inner_session_ids: serde_json::from_str(&inner_ids).map_err(serde_err)?,
            current_inner_session_id: row.get("current_internal_session_id"),
            branch_count: row.get("branch_count"),
            total_checkpoints: row.get("total_checkpoints"),
            metadata: json_to_state(&metadata)?,
        })
    }

    fn row_to_inner(row: &PgRow) -> Result<InnerSession> {
        let state: String = row.get("state");
        let transcript: String = row.get("transcript");
        let metadata: String = row.get("metadata");
        let entries: Vec<crate::message::TranscriptEntry> =
            serde_json::from_str(&transcript).map_err(serde_err)?;
        Ok(InnerSession {
            id: Some(row.get::<i64, _>("id")),
            outer_session_id: row.get("outer_session_id"),
            graph_session_id: row.get("graph_session_id"),
            state: json_to_state(&state)?,
            transcript: Transcript(entries),
            created_at: row.get("created_at"),
            is_current: row.get("is_current"),
            checkpoint_count: row.get("checkpoint_count"),
            parent_inner_session_id: row.get("parent_session_id"),
            branch_point_checkpoint_id: row.get("branch_point_checkpoint_id"),
            tool_invocation_count: row.get("tool_invocation_count"),
            metadata: json_to_state(&metadata)?,
        })
    }

    fn row_to_checkpoint(row: &PgRow) -> Result<Checkpoint> {
        let data: String = row.get("checkpoint_data");
        let payload: CheckpointPayload = serde_json::from_str(&data).map_err(serde_err)?;
        let state_snapshot = payload
            .state_snapshot
            .as_object()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, crate::state_value::StateValue::from(&v)))
            .collect();
        let metadata = payload
            .metadata
            .as_object()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, crate::state_value::StateValue::from(&v)))
            .collect();
        Ok(Checkpoint {
            id: Some(row.get::<i64, _>("id")),
            inner_session_id: row.get("inner_session_id"),
            name: row.get("name"),
            state_snapshot,
            transcript_snapshot: Transcript(payload.transcript_snapshot),
            tool_invocations_snapshot: payload.tool_invocations_snapshot,
            is_auto: row.get("is_auto"),
            created_at: row.get("created_at"),
            user_id: row.get("user_id"),
            metadata,
        })
    }
}

#[async_trait::async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self, user), err)]
    async fn save_user(&self, mut user: User) -> Result<User> {
        let preferences = state_to_json(&user.preferences)?;
        let active_session_ids = serde_json::to_string(&user.active_session_ids).map_err(serde_err)?;

        if let Some(id) = user.id {
            sqlx::query(
                r#"
                UPDATE users SET username = $1, password_hash = $2, is_admin = $3,
                    last_login = $4, api_key = $5, session_limit = $6,
                    preferences = $7, active_session_ids = $8
                WHERE id = $9
                "#,
            )
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(user.is_admin)
            .bind(user.last_login)
            .bind(&user.api_key)
            .bind(user.session_limit)
            .bind(&preferences)
            .bind(&active_session_ids)
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::UsernameTaken {
                        username: user.username.clone(),
                    }
                } else {
                    backend(e)
                }
            })?;
            Ok(user)
        } else {
            let created_at = user.created_at.unwrap_or_else(Utc::now);
            let row = sqlx::query(
                r#"
                INSERT INTO users (username, password_hash, is_admin, created_at, last_login,
                    api_key, session_limit, preferences, active_session_ids)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                RETURNING id
                "#,
            )
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(user.is_admin)
            .bind(created_at)
            .bind(user.last_login)
            .bind(&user.api_key)
            .bind(user.session_limit)
            .bind(&preferences)
            .bind(&active_session_ids)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::UsernameTaken {
                        username: user.username.clone(),
                    }
                } else {
                    backend(e)
                }
            })?;
            user.id = Some(row.get("id"));
            user.created_at = Some(created_at);
            Ok(user)
        }
    }

    async fn find_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn find_user_by_username(&self, username: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn find_user_by_api_key(&self, api_key: &str) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::row_to_user).transpose()
    }

    async fn find_all_users(&self) -> Result<Vec<User>> {
        let rows = sqlx::query("SELECT * FROM users ORDER BY id")
            .fetch_all(&*self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(Self::row_to_user).collect()
    }

    async fn update_last_login(&self, id: i64, ts: DateTime<Utc>) -> Result<()> {
        let result = sqlx::query("UPDATE users SET last_login = $1 WHERE id = $2")
            .bind(ts)
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { what: "user", id });
        }
        Ok(())
    }

    async fn update_api_key(&self, id: i64, api_key: Option<String>) -> Result<()> {
        let result = sqlx::query("UPDATE users SET api_key = $1 WHERE id = $2")
            .bind(api_key)
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { what: "user", id });
        }
        Ok(())
    }

    async fn delete_user(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { what: "user", id });
        }
        sqlx::query("UPDATE checkpoints SET user_id = NULL WHERE user_id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn create_outer_session(&self, mut session: OuterSession) -> Result<OuterSession> {
        let inner_ids = serde_json::to_string(&session.inner_session_ids).map_err(serde_err)?;
        let metadata = state_to_json(&session.metadata)?;
        let row = sqlx::query(
            r#"
            INSERT INTO outer_sessions (user_id, session_name, created_at, updated_at,
                is_active, internal_session_ids, current_internal_session_id,
                metadata, branch_count, total_checkpoints)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING id
            "#,
        )
        .bind(session.user_id)
        .bind(&session.name)
        .bind(session.created_at)
        .bind(session.updated_at)
        .bind(session.is_active)
        .bind(&inner_ids)
        .bind(&session.current_inner_session_id)
        .bind(&metadata)
        .bind(session.branch_count)
        .bind(session.total_checkpoints)
        .fetch_one(&*self.pool)
        .await
        .map_err(backend)?;
        session.id = Some(row.get("id"));
        Ok(session)
    }

    async fn add_inner_session(&self, outer_id: i64, graph_id: &str, is_branch: bool) -> Result<()> {
        let Some(mut outer) = self.get_outer_session(outer_id).await? else {
            return Err(StoreError::NotFound {
                what: "outer_session",
                id: outer_id,
            });
        };
        if !outer.inner_session_ids.iter().any(|g| g == graph_id) {
            outer.inner_session_ids.push(graph_id.to_string());
            if is_branch {
                outer.branch_count += 1;
            }
        }
        outer.updated_at = Utc::now();
        let inner_ids = serde_json::to_string(&outer.inner_session_ids).map_err(serde_err)?;
        sqlx::query(
            "UPDATE outer_sessions SET internal_session_ids = $1, updated_at = $2, branch_count = $3 WHERE id = $4",
        )
        .bind(&inner_ids)
        .bind(outer.updated_at)
        .bind(outer.branch_count)
        .bind(outer_id)
        .execute(&*self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn set_current_inner(&self, outer_id: i64, graph_id: &str) -> Result<bool> {
        let Some(outer) = self.get_outer_session(outer_id).await? else {
            return Err(StoreError::NotFound {
                what: "outer_session",
                id: outer_id,
            });
        };
        if !outer.inner_session_ids.iter().any(|g| g == graph_id) {
            return Ok(false);
        }
        sqlx::query(
            "UPDATE outer_sessions SET current_internal_session_id = $1, updated_at = $2 WHERE id = $3",
        )
        .bind(graph_id)
        .bind(Utc::now())
        .bind(outer_id)
        .execute(&*self.pool)
        .await
        .map_err(backend)?;
        Ok(true)
    }

    async fn get_outer_session(&self, id: i64) -> Result<Option<OuterSession>> {
        let row = sqlx::query("SELECT * FROM outer_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::row_to_outer).transpose()
    }

    async fn list_outer_sessions_by_user(&self, user_id: i64) -> Result<Vec<OuterSession>> {
        let rows = sqlx::query("SELECT * FROM outer_sessions WHERE user_id = $1 ORDER BY created_at DESC")
            .bind(user_id)
            .fetch_all(&*self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(Self::row_to_outer).collect()
    }

    async fn increment_total_checkpoints(&self, outer_id: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE outer_sessions SET total_checkpoints = total_checkpoints + 1, updated_at = $1 WHERE id = $2",
        )
        .bind(Utc::now())
        .bind(outer_id)
        .execute(&*self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: "outer_session",
                id: outer_id,
            });
        }
        Ok(())
    }

    async fn create_inner_session(&self, mut session: InnerSession) -> Result<InnerSession> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        if session.is_current {
            sqlx::query("UPDATE inner_sessions SET is_current = false WHERE outer_session_id = $1")
                .bind(session.outer_session_id)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
        }
        let state = state_to_json(&session.state)?;
        let transcript = serde_json::to_string(&session.transcript.0).map_err(serde_err)?;
        let metadata = state_to_json(&session.metadata)?;
        let row = sqlx::query(
            r#"
            INSERT INTO inner_sessions (outer_session_id, graph_session_id, state, transcript,
                created_at, is_current, checkpoint_count, parent_session_id,
                branch_point_checkpoint_id, tool_invocation_count, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id
            "#,
        )
        .bind(session.outer_session_id)
        .bind(&session.graph_session_id)
        .bind(&state)
        .bind(&transcript)
        .bind(session.created_at)
        .bind(session.is_current)
        .bind(session.checkpoint_count)
        .bind(session.parent_inner_session_id)
        .bind(session.branch_point_checkpoint_id)
        .bind(session.tool_invocation_count)
        .bind(&metadata)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        session.id = Some(row.get("id"));
        Ok(session)
    }

    async fn update_inner_session(&self, session: InnerSession) -> Result<()> {
        let id = session.id.ok_or(StoreError::NotFound {
            what: "inner_session",
            id: -1,
        })?;
        let mut tx = self.pool.begin().await.map_err(backend)?;
        if session.is_current {
            sqlx::query(
                "UPDATE inner_sessions SET is_current = false WHERE outer_session_id = $1 AND id != $2",
            )
            .bind(session.outer_session_id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }
        let state = state_to_json(&session.state)?;
        let transcript = serde_json::to_string(&session.transcript.0).map_err(serde_err)?;
        let metadata = state_to_json(&session.metadata)?;
        let result = sqlx::query(
            r#"
            UPDATE inner_sessions SET state = $1, transcript = $2, is_current = $3,
                checkpoint_count = $4, parent_session_id = $5, branch_point_checkpoint_id = $6,
                tool_invocation_count = $7, metadata = $8
            WHERE id = $9
            "#,
        )
        .bind(&state)
        .bind(&transcript)
        .bind(session.is_current)
        .bind(session.checkpoint_count)
        .bind(session.parent_inner_session_id)
        .bind(session.branch_point_checkpoint_id)
        .bind(session.tool_invocation_count)
        .bind(&metadata)
        .bind(id)
        .execute(&mut *tx)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: "inner_session",
                id,
            });
        }
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn get_inner_session_by_id(&self, id: i64) -> Result<Option<InnerSession>> {
        let row = sqlx::query("SELECT * FROM inner_sessions WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::row_to_inner).transpose()
    }

    async fn get_inner_session_by_graph_id(&self, graph_id: &str) -> Result<Option<InnerSession>> {
        let row = sqlx::query("SELECT * FROM inner_sessions WHERE graph_session_id = $1")
            .bind(graph_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::row_to_inner).transpose()
    }

    async fn list_inner_sessions_by_outer(&self, outer_id: i64) -> Result<Vec<InnerSession>> {
        let rows = sqlx::query("SELECT * FROM inner_sessions WHERE outer_session_id = $1 ORDER BY created_at")
            .bind(outer_id)
            .fetch_all(&*self.pool)
            .await
            .map_err(backend)?;
        rows.iter().map(Self::row_to_inner).collect()
    }

    async fn current_inner_session(&self, outer_id: i64) -> Result<Option<InnerSession>> {
        let row = sqlx::query(
            "SELECT * FROM inner_sessions WHERE outer_session_id = $1 AND is_current = true",
        )
        .bind(outer_id)
        .fetch_optional(&*self.pool)
        .await
        .map_err(backend)?;
        row.as_ref().map(Self::row_to_inner).transpose()
    }

    async fn set_current_inner_session(&self, id: i64) -> Result<()> {
        let Some(session) = self.get_inner_session_by_id(id).await? else {
            return Err(StoreError::NotFound {
                what: "inner_session",
                id,
            });
        };
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("UPDATE inner_sessions SET is_current = false WHERE outer_session_id = $1")
            .bind(session.outer_session_id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("UPDATE inner_sessions SET is_current = true WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn delete_inner_session(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM inner_sessions WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: "inner_session",
                id,
            });
        }
        Ok(())
    }

    async fn increment_tool_count(&self, id: i64, n: i64) -> Result<()> {
        let result = sqlx::query(
            "UPDATE inner_sessions SET tool_invocation_count = tool_invocation_count + $1 WHERE id = $2",
        )
        .bind(n)
        .bind(id)
        .execute(&*self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: "inner_session",
                id,
            });
        }
        Ok(())
    }

    async fn list_branches_of(&self, parent_id: i64) -> Result<Vec<InnerSession>> {
        let rows = sqlx::query(
            "SELECT * FROM inner_sessions WHERE parent_session_id = $1 ORDER BY created_at",
        )
        .bind(parent_id)
        .fetch_all(&*self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(Self::row_to_inner).collect()
    }

    async fn lineage(&self, id: i64) -> Result<Vec<InnerSession>> {
        let mut path = Vec::new();
        let mut current_id = Some(id);
        while let Some(cur) = current_id {
            let Some(session) = self.get_inner_session_by_id(cur).await? else {
                if path.is_empty() {
                    return Err(StoreError::NotFound {
                        what: "inner_session",
                        id,
                    });
                }
                break;
            };
            current_id = session.parent_inner_session_id;
            path.push(session);
        }
        path.reverse();
        Ok(path)
    }

    async fn create_checkpoint(&self, mut checkpoint: Checkpoint) -> Result<Checkpoint> {
        let payload = CheckpointPayload {
            state_snapshot: serde_json::Value::Object(
                checkpoint
                    .state_snapshot
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone().into()))
                    .collect(),
            ),
            transcript_snapshot: checkpoint.transcript_snapshot.0.clone(),
            tool_invocations_snapshot: checkpoint.tool_invocations_snapshot.clone(),
            metadata: serde_json::Value::Object(
                checkpoint
                    .metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone().into()))
                    .collect(),
            ),
        };
        let data = serde_json::to_string(&payload).map_err(serde_err)?;
        let row = sqlx::query(
            r#"
            INSERT INTO checkpoints (inner_session_id, name, checkpoint_data, is_auto, created_at, user_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id
            "#,
        )
        .bind(checkpoint.inner_session_id)
        .bind(&checkpoint.name)
        .bind(&data)
        .bind(checkpoint.is_auto)
        .bind(checkpoint.created_at)
        .bind(checkpoint.user_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(backend)?;
        checkpoint.id = Some(row.get("id"));
        Ok(checkpoint)
    }

    async fn get_checkpoint_by_id(&self, id: i64) -> Result<Option<Checkpoint>> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn list_checkpoints_by_inner(
        &self,
        inner_id: i64,
        auto_only: Option<bool>,
    ) -> Result<Vec<Checkpoint>> {
        let rows = match auto_only {
            Some(flag) => {
                sqlx::query(
                    "SELECT * FROM checkpoints WHERE inner_session_id = $1 AND is_auto = $2 ORDER BY created_at DESC",
                )
                .bind(inner_id)
                .bind(flag)
                .fetch_all(&*self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM checkpoints WHERE inner_session_id = $1 ORDER BY created_at DESC",
                )
                .bind(inner_id)
                .fetch_all(&*self.pool)
                .await
            }
        }
        .map_err(backend)?;
        rows.iter().map(Self::row_to_checkpoint).collect()
    }

    async fn latest_checkpoint(&self, inner_id: i64) -> Result<Option<Checkpoint>> {
        Ok(self
            .list_checkpoints_by_inner(inner_id, None)
            .await?
            .into_iter()
            .next())
    }

    async fn delete_checkpoint(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM checkpoints WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: "checkpoint",
                id,
            });
        }
        Ok(())
    }

    async fn delete_auto_keeping_latest(&self, inner_id: i64, keep_latest: i64) -> Result<i64> {
        let autos = self.list_checkpoints_by_inner(inner_id, Some(true)).await?;
        let to_delete: Vec<i64> = autos
            .into_iter()
            .skip(keep_latest.max(0) as usize)
            .filter_map(|c| c.id)
            .collect();
        let deleted = to_delete.len() as i64;
        for id in to_delete {
            sqlx::query("DELETE FROM checkpoints WHERE id = $1")
                .bind(id)
                .execute(&*self.pool)
                .await
                .map_err(backend)?;
        }
        Ok(deleted)
    }

    async fn count_checkpoints(&self, inner_id: i64) -> Result<CheckpointCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) as total,
                COALESCE(SUM(CASE WHEN is_auto THEN 1 ELSE 0 END), 0) as auto,
                COALESCE(SUM(CASE WHEN is_auto THEN 0 ELSE 1 END), 0) as manual
            FROM checkpoints WHERE inner_session_id = $1
            "#,
        )
        .bind(inner_id)
        .fetch_one(&*self.pool)
        .await
        .map_err(backend)?;
        Ok(CheckpointCounts {
            total: row.get("total"),
            auto: row.get("auto"),
            manual: row.get("manual"),
        })
    }

    async fn list_checkpoints_by_user(&self, user_id: i64, limit: Option<i64>) -> Result<Vec<Checkpoint>> {
        let rows = sqlx::query(
            "SELECT * FROM checkpoints WHERE user_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(user_id)
        .bind(limit.unwrap_or(i64::MAX))
        .fetch_all(&*self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(Self::row_to_checkpoint).collect()
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
        let Some(mut checkpoint) = self.get_checkpoint_by_id(id).await? else {
            return Err(StoreError::NotFound {
                what: "checkpoint",
                id,
            });
        };
        crate::state_value::merge_state(&mut checkpoint.metadata, merge);
        let payload = CheckpointPayload {
            state_snapshot: serde_json::Value::Object(
                checkpoint
                    .state_snapshot
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone().into()))
                    .collect(),
            ),
            transcript_snapshot: checkpoint.transcript_snapshot.0.clone(),
            tool_invocations_snapshot: checkpoint.tool_invocations_snapshot.clone(),
            metadata: serde_json::Value::Object(
                checkpoint
                    .metadata
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone().into()))
                    .collect(),
            ),
        };
        let data = serde_json::to_string(&payload).map_err(serde_err)?;
        sqlx::query("UPDATE checkpoints SET checkpoint_data = $1 WHERE id = $2")
            .bind(&data)
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn search_checkpoints(&self, inner_id: i64, term: &str) -> Result<Vec<Checkpoint>> {
        let pattern = format!("%{term}%");
        let rows = sqlx::query(
            r#"
            SELECT * FROM checkpoints
            WHERE inner_session_id = $1 AND (name LIKE $2 OR checkpoint_data LIKE $2)
            ORDER BY created_at DESC
            "#,
        )
        .bind(inner_id)
        .bind(&pattern)
        .fetch_all(&*self.pool)
        .await
        .map_err(backend)?;
        rows.iter().map(Self::row_to_checkpoint).collect()
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}
