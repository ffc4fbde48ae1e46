use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::state_value::StateMap;

/// Default agent behavior derived from a user's preferences, grounded on
/// `User.get_agent_config()` in the source.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentConfig {
    pub temperature: f32,
    pub max_tokens: u32,
    pub model: String,
    pub auto_checkpoint: bool,
    pub checkpoint_frequency: u32,
    pub max_checkpoints: u32,
    pub enable_tool_rollback: bool,
    pub custom_tools: Option<Vec<String>>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 2000,
            model: "gpt-4".to_string(),
            auto_checkpoint: true,
            checkpoint_frequency: 5,
            max_checkpoints: 50,
            enable_tool_rollback: true,
            custom_tools: None,
        }
    }
}

/// A registered user of the system.
///
/// `password_hash` is never serialized to a host-facing surface; use
/// [`UserPublic`] for that.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: Option<i64>,
    pub username: String,
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub active_session_ids: Vec<i64>,
    pub preferences: StateMap,
    pub api_key: Option<String>,
    pub session_limit: i64,
}

impl Default for User {
    fn default() -> Self {
        Self {
            id: None,
            username: String::new(),
            password_hash: String::new(),
            is_admin: false,
            created_at: None,
            last_login: None,
            active_session_ids: Vec::new(),
            preferences: Default::default(),
            api_key: None,
            session_limit: 5,
        }
    }
}

impl User {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            created_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn hash_password(password: &str) -> String {
        let digest = Sha256::digest(password.as_bytes());
        format!("{digest:x}")
    }

    pub fn verify_password(&self, password: &str) -> bool {
        self.password_hash == Self::hash_password(password)
    }

    pub fn set_password(&mut self, password: &str) {
        self.password_hash = Self::hash_password(password);
    }

    pub fn generate_api_key(&mut self) -> String {
        let body: String = (0..32)
            .map(|_| {
                const CHARS: &[u8] =
                    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";
                let idx = (uuid::Uuid::new_v4().as_u128() % CHARS.len() as u128) as usize;
                CHARS[idx] as char
            })
            .collect();
        let key = format!("sk-{body}");
        self.api_key = Some(key.clone());
        key
    }

    pub fn verify_api_key(&self, api_key: &str) -> bool {
        self.api_key.as_deref() == Some(api_key)
    }

    /// Adds `session_id` if under the cap; idempotent on a duplicate.
    /// Returns `false` if the cap (`session_limit`) is already reached.
    pub fn add_session(&mut self, session_id: i64) -> bool {
        if self.active_session_ids.contains(&session_id) {
            return true;
        }
        if self.active_session_ids.len() as i64 >= self.session_limit {
            return false;
        }
        self.active_session_ids.push(session_id);
        true
    }

    pub fn remove_session(&mut self, session_id: i64) {
        self.active_session_ids.retain(|&id| id != session_id);
    }

    pub fn has_session(&self, session_id: i64) -> bool {
        self.active_session_ids.contains(&session_id)
    }

    pub fn agent_config(&self) -> AgentConfig {
        let mut cfg = AgentConfig::default();
        if let Some(v) = self.preferences.get("temperature").and_then(|v| v.as_f64()) {
            cfg.temperature = v as f32;
        }
        if let Some(v) = self.preferences.get("max_tokens").and_then(|v| v.as_i64()) {
            cfg.max_tokens = v as u32;
        }
        if let Some(v) = self.preferences.get("model").and_then(|v| v.as_str()) {
            cfg.model = v.to_string();
        }
        if let Some(v) = self
            .preferences
            .get("auto_checkpoint")
            .and_then(|v| v.as_bool())
        {
            cfg.auto_checkpoint = v;
        }
        if let Some(v) = self
            .preferences
            .get("checkpoint_frequency")
            .and_then(|v| v.as_i64())
        {
            cfg.checkpoint_frequency = v as u32;
        }
        if let Some(v) = self
            .preferences
            .get("max_checkpoints")
            .and_then(|v| v.as_i64())
        {
            cfg.max_checkpoints = v as u32;
        }
        if let Some(v) = self
            .preferences
            .get("enable_tool_rollback")
            .and_then(|v| v.as_bool())
        {
            cfg.enable_tool_rollback = v;
        }
        if let Some(crate::state_value::StateValue::List(list)) =
            self.preferences.get("custom_tools")
        {
            cfg.custom_tools = Some(
                list.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect(),
            );
        }
        cfg
    }

    pub fn to_public(&self) -> UserPublic {
        UserPublic {
            id: self.id,
            username: self.username.clone(),
            is_admin: self.is_admin,
            created_at: self.created_at,
            last_login: self.last_login,
            active_session_ids: self.active_session_ids.clone(),
            session_limit: self.session_limit,
        }
    }
}

/// Host-facing view of a [`User`] that never carries `password_hash` or
/// `api_key`, grounded on `User.to_dict()`'s field exclusion in the source.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserPublic {
    pub id: Option<i64>,
    pub username: String,
    pub is_admin: bool,
    pub created_at: Option<DateTime<Utc>>,
    pub last_login: Option<DateTime<Utc>>,
    pub active_session_ids: Vec<i64>,
    pub session_limit: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Round-trips a password through set/verify.
    fn test_password_set_and_verify() {
        let mut u = User::new("alice");
        u.set_password("hunter22");
        assert!(u.verify_password("hunter22"));
        assert!(!u.verify_password("wrong"));
    }

    #[test]
    /// Session caps: add_session stops accepting once the limit is reached.
    fn test_session_limit_enforced() {
        let mut u = User::new("alice");
        u.session_limit = 2;
        assert!(u.add_session(1));
        assert!(u.add_session(2));
        assert!(!u.add_session(3));
        assert_eq!(u.active_session_ids, vec![1, 2]);
    }

    #[test]
    /// Adding the same session id twice is a no-op, not a limit violation.
    fn test_add_session_idempotent() {
        let mut u = User::new("alice");
        u.session_limit = 1;
        assert!(u.add_session(1));
        assert!(u.add_session(1));
        assert_eq!(u.active_session_ids, vec![1]);
    }

    #[test]
    /// Generated API keys carry the sk- prefix and pass format validation.
    fn test_generate_api_key_format() {
        let mut u = User::new("alice");
        let key = u.generate_api_key();
        assert!(key.starts_with("sk-"));
        assert!(crate::auth::validators::validate_api_key_format(&key).is_ok());
    }

    #[test]
    /// agent_config() falls back to the documented defaults when no preferences are set.
    fn test_agent_config_defaults() {
        let u = User::new("alice");
        let cfg = u.agent_config();
        assert_eq!(cfg.model, "gpt-4");
        assert_eq!(cfg.max_tokens, 2000);
        assert!(cfg.auto_checkpoint);
    }
}
