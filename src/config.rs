//! Environment configuration resolution.
//!
//! Loads `.env` via `dotenvy` then falls back to defaults read straight
//! from `std::env`.

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("DATABASE must be one of `sqlite` or `postgres`, got `{got}`")]
    #[diagnostic(code(rollback_agent::config::bad_backend))]
    UnknownBackend { got: String },

    #[error("DATABASE_URL is required when DATABASE=postgres")]
    #[diagnostic(code(rollback_agent::config::missing_url))]
    MissingDatabaseUrl,

    #[error("DATABASE_URL `{got}` must begin with `postgresql://` or `postgres://`")]
    #[diagnostic(code(rollback_agent::config::bad_url_scheme))]
    BadPostgresUrl { got: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Sqlite,
    Postgres,
}

/// Resolved configuration for a process: backend selection, connection
/// string, and the model provider endpoint/credential.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub database_url: String,
    pub base_url: Option<String>,
    pub openai_api_key: Option<String>,
}

impl Config {
    /// Load `.env` (if present) and resolve configuration from the process
    /// environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let backend = match std::env::var("DATABASE")
            .unwrap_or_else(|_| "sqlite".to_string())
            .as_str()
        {
            "sqlite" => Backend::Sqlite,
            "postgres" => Backend::Postgres,
            other => {
                return Err(ConfigError::UnknownBackend {
                    got: other.to_string(),
                });
            }
        };

        let database_url = match backend {
            Backend::Postgres => {
                let url = std::env::var("DATABASE_URL")
                    .map_err(|_| ConfigError::MissingDatabaseUrl)?;
                if !(url.starts_with("postgresql://") || url.starts_with("postgres://")) {
                    return Err(ConfigError::BadPostgresUrl { got: url });
                }
                url
            }
            Backend::Sqlite => std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/rollback_agent.db".to_string()),
        };

        let base_url = std::env::var("BASE_URL").ok().map(|raw| sanitize_base_url(&raw));
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        Ok(Config {
            backend,
            database_url,
            base_url,
            openai_api_key,
        })
    }
}

/// Trims whitespace, strips a trailing `/`, and prefixes `https://` when no
/// scheme is present.
fn sanitize_base_url(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    /// Confirms a scheme-less base URL is prefixed with https://.
    fn test_sanitize_adds_scheme() {
        assert_eq!(sanitize_base_url("api.example.com/"), "https://api.example.com");
    }

    #[test]
    /// Confirms an existing scheme is left untouched aside from trimming.
    fn test_sanitize_keeps_scheme() {
        assert_eq!(
            sanitize_base_url(" http://api.example.com/ "),
            "http://api.example.com"
        );
    }
}
