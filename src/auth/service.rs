//! Auth/User service: registration, login, API keys, sessions, and
//! preferences, layered over a generic [`Store`]. Grounded on
//! `original_source/agents/agent_service.py`'s `AuthService`-equivalent
//! methods, following the same pattern of a thin service struct wrapping
//! a store handle used by the runtime's session layer.

use std::sync::Arc;

use chrono::Utc;
use miette::Diagnostic;
use thiserror::Error;

use crate::state_value::{StateMap, merge_state};
use crate::store::{Store, StoreError};

use super::user::User;
use super::validators;

#[derive(Debug, Error, Diagnostic)]
pub enum AuthError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("invalid credentials")]
    #[diagnostic(code(rollback_agent::auth::invalid_credentials))]
    InvalidCredentials,

    #[error("validation failed: {0}")]
    #[diagnostic(code(rollback_agent::auth::validation))]
    Validation(String),

    #[error("the built-in rootusr account cannot be deleted")]
    #[diagnostic(code(rollback_agent::auth::protected_account))]
    ProtectedAccount,

    #[error("permission denied: {0}")]
    #[diagnostic(code(rollback_agent::auth::permission_denied))]
    PermissionDenied(String),

    #[error("session limit reached ({limit})")]
    #[diagnostic(code(rollback_agent::auth::session_limit))]
    SessionLimitReached { limit: i64 },
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// Thin service layer over a [`Store`] implementing user/session operations.
pub struct AuthService {
    store: Arc<dyn Store>,
}

impl AuthService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn require_user(&self, user_id: i64) -> StoreError {
        StoreError::NotFound {
            what: "user",
            id: user_id,
        }
    }

    pub async fn register(
        &self,
        username: &str,
        password: &str,
        confirm_password: Option<&str>,
    ) -> Result<User> {
        validators::validate_registration_data(username, password, confirm_password)
            .map_err(AuthError::Validation)?;
        let mut user = User::new(username);
        user.set_password(password);
        self.store.save_user(user).await.map_err(Into::into)
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<User> {
        let user = self
            .store
            .find_user_by_username(username)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if !user.verify_password(password) {
            return Err(AuthError::InvalidCredentials);
        }
        // A failed last_login write doesn't invalidate an otherwise successful
        // login, grounded on `auth_service.py::login`.
        if let Err(e) = self
            .store
            .update_last_login(user.id.expect("persisted user has id"), Utc::now())
            .await
        {
            tracing::warn!(error = %e, user_id = ?user.id, "failed to update last_login");
        }
        Ok(user)
    }

    pub async fn login_with_api_key(&self, api_key: &str) -> Result<User> {
        validators::validate_api_key_format(api_key).map_err(AuthError::Validation)?;
        let user = self
            .store
            .find_user_by_api_key(api_key)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;
        if let Err(e) = self
            .store
            .update_last_login(user.id.expect("persisted user has id"), Utc::now())
            .await
        {
            tracing::warn!(error = %e, user_id = ?user.id, "failed to update last_login");
        }
        Ok(user)
    }

    pub async fn change_password(
        &self,
        user_id: i64,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let mut user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| self.require_user(user_id))?;
        if !user.verify_password(old_password) {
            return Err(AuthError::InvalidCredentials);
        }
        validators::validate_password(new_password).map_err(AuthError::Validation)?;
        user.set_password(new_password);
        self.store.save_user(user).await?;
        Ok(())
    }

    /// Resets `rootusr`'s password back to the documented bootstrap value,
    /// grounded on `agent_service.py`'s admin-recovery path.
    pub async fn reset_admin_password(&self) -> Result<()> {
        let mut root = self
            .store
            .find_user_by_username("rootusr")
            .await?
            .ok_or_else(|| self.require_user(0))?;
        root.set_password("1234");
        self.store.save_user(root).await?;
        Ok(())
    }

    pub async fn generate_api_key(&self, user_id: i64) -> Result<String> {
        let mut user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| self.require_user(user_id))?;
        let key = user.generate_api_key();
        self.store.update_api_key(user_id, Some(key.clone())).await?;
        Ok(key)
    }

    pub async fn revoke_api_key(&self, user_id: i64) -> Result<()> {
        self.store.update_api_key(user_id, None).await?;
        Ok(())
    }

    pub async fn update_preferences(&self, user_id: i64, patch: StateMap) -> Result<User> {
        validators::validate_preferences(&patch).map_err(AuthError::Validation)?;
        let mut user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| self.require_user(user_id))?;
        merge_state(&mut user.preferences, patch);
        self.store.save_user(user).await.map_err(Into::into)
    }

    pub async fn add_session(&self, user_id: i64, session_id: i64) -> Result<()> {
        let mut user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| self.require_user(user_id))?;
        let limit = user.session_limit;
        if !user.add_session(session_id) {
            return Err(AuthError::SessionLimitReached { limit });
        }
        self.store.save_user(user).await?;
        Ok(())
    }

    pub async fn remove_session(&self, user_id: i64, session_id: i64) -> Result<()> {
        let mut user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| self.require_user(user_id))?;
        user.remove_session(session_id);
        self.store.save_user(user).await?;
        Ok(())
    }

    /// Drops any session id from `user_id`'s active list that is not present
    /// in `live_session_ids`; returns the number removed.
    pub async fn cleanup_sessions(&self, user_id: i64, live_session_ids: &[i64]) -> Result<usize> {
        let mut user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| self.require_user(user_id))?;
        let before = user.active_session_ids.len();
        user.active_session_ids
            .retain(|id| live_session_ids.contains(id));
        let removed = before - user.active_session_ids.len();
        if removed > 0 {
            self.store.save_user(user).await?;
        }
        Ok(removed)
    }

    pub async fn verify_session_ownership(&self, user_id: i64, session_id: i64) -> Result<bool> {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or_else(|| self.require_user(user_id))?;
        Ok(user.has_session(session_id))
    }

    /// Deletes `target_id`. Requires `caller_id` to be an admin, `target_id`
    /// to not be `rootusr`, and `target_id != caller_id`: admins cannot
    /// delete themselves or other admins.
    pub async fn delete_user(&self, caller_id: i64, target_id: i64) -> Result<()> {
        let caller = self
            .store
            .find_user_by_id(caller_id)
            .await?
            .ok_or_else(|| self.require_user(caller_id))?;
        if !caller.is_admin {
            return Err(AuthError::PermissionDenied(
                "only an admin may delete a user".to_string(),
            ));
        }
        if target_id == caller_id {
            return Err(AuthError::PermissionDenied(
                "an admin cannot delete themselves".to_string(),
            ));
        }
        let target = self
            .store
            .find_user_by_id(target_id)
            .await?
            .ok_or_else(|| self.require_user(target_id))?;
        if target.username == "rootusr" {
            return Err(AuthError::ProtectedAccount);
        }
        if target.is_admin {
            return Err(AuthError::PermissionDenied(
                "an admin cannot delete another admin".to_string(),
            ));
        }
        self.store.delete_user(target_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStore;

    fn service_with_store() -> (AuthService, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (AuthService::new(store.clone()), store)
    }

    fn service() -> AuthService {
        service_with_store().0
    }

    #[tokio::test]
    /// Registering and logging in round-trips through the hashed password.
    async fn test_register_then_login() {
        let svc = service();
        svc.register("alice", "hunter22", Some("hunter22")).await.unwrap();
        let user = svc.login("alice", "hunter22").await.unwrap();
        assert_eq!(user.username, "alice");
        assert!(svc.login("alice", "wrong").await.is_err());
    }

    #[tokio::test]
    /// A non-admin caller cannot delete anyone.
    async fn test_delete_user_requires_admin() {
        let svc = service();
        let alice = svc.register("alice", "hunter22", None).await.unwrap();
        let bob = svc.register("bob", "hunter22", None).await.unwrap();
        let err = svc
            .delete_user(alice.id.unwrap(), bob.id.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied(_)));
    }

    #[tokio::test]
    /// An admin cannot delete rootusr, another admin, or themselves, but can
    /// delete an ordinary user.
    async fn test_admin_delete_rules() {
        let (svc, store) = service_with_store();
        let root = svc.login("rootusr", "1234").await.unwrap();

        let mut other_admin = User::new("moderator");
        other_admin.is_admin = true;
        other_admin.set_password("hunter22");
        let other_admin = store.save_user(other_admin).await.unwrap();

        let alice = svc.register("alice", "hunter22", None).await.unwrap();

        let err = svc
            .delete_user(root.id.unwrap(), root.id.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied(_)));

        let err = svc
            .delete_user(root.id.unwrap(), other_admin.id.unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::PermissionDenied(_)));

        svc.delete_user(root.id.unwrap(), alice.id.unwrap())
            .await
            .unwrap();
        assert!(store.find_user_by_id(alice.id.unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    /// A generated API key round-trips through login_with_api_key.
    async fn test_api_key_login() {
        let svc = service();
        let user = svc.register("bob", "hunter22", None).await.unwrap();
        let key = svc.generate_api_key(user.id.unwrap()).await.unwrap();
        let found = svc.login_with_api_key(&key).await.unwrap();
        assert_eq!(found.id, user.id);

        svc.revoke_api_key(user.id.unwrap()).await.unwrap();
        assert!(svc.login_with_api_key(&key).await.is_err());
    }

    #[tokio::test]
    /// Session limit (default 5) is enforced by add_session.
    async fn test_session_limit_enforced() {
        let svc = service();
        let user = svc.register("carol", "hunter22", None).await.unwrap();
        for i in 1..=5 {
            svc.add_session(user.id.unwrap(), i).await.unwrap();
        }
        let err = svc.add_session(user.id.unwrap(), 99).await.unwrap_err();
        assert!(matches!(err, AuthError::SessionLimitReached { limit: 5 }));
    }

    #[tokio::test]
    /// update_preferences rejects an out-of-range value before touching the store.
    async fn test_update_preferences_validates() {
        let svc = service();
        let user = svc.register("dave", "hunter22", None).await.unwrap();
        let mut patch = StateMap::default();
        patch.insert(
            "temperature".to_string(),
            crate::state_value::StateValue::Float(9.0),
        );
        let err = svc
            .update_preferences(user.id.unwrap(), patch)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }
}
