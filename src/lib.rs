//! # rollback_agent: non-destructive time travel for conversational agents
//!
//! This crate gives a conversational agent loop a branching, checkpointable
//! history instead of a single linear transcript. An outer session (what a
//! user thinks of as "a conversation") contains a forest of inner sessions
//! (execution timelines); rolling back to a checkpoint never destroys the
//! timeline you came from, it branches a new one from that point.
//!
//! ## Core Concepts
//!
//! - **Store**: durable persistence for users, sessions, and checkpoints
//! - **Tool Track Registry**: an append-only log of tool calls with
//!   registered reverse handlers, so effects can be undone on rollback
//! - **Checkpoint Engine**: whole-inner-session snapshots, manual or
//!   automatic after a tool-bearing turn
//! - **Branch/Rollback Engine**: turns a checkpoint back into a fresh,
//!   independent inner session
//! - **Agent Loop**: the request/response cycle tying the above together
//! - **Auth**: users, passwords, API keys, and per-user agent preferences
//!
//! ## Quick Start
//!
//! ### Registering a user and starting a conversation
//!
//! ```
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use rollback_agent::auth::service::AuthService;
//! use rollback_agent::message::Message;
//! use rollback_agent::model::{Model, ModelError, ModelReply, ToolCatalogEntry};
//! use rollback_agent::agent::HostApi;
//! use rollback_agent::store::{OuterSession, memory::InMemoryStore};
//!
//! struct EchoModel;
//!
//! #[async_trait]
//! impl Model for EchoModel {
//!     async fn invoke(
//!         &self,
//!         messages: &[Message],
//!         _tools: &[ToolCatalogEntry],
//!     ) -> Result<ModelReply, ModelError> {
//!         let last = messages.last().map(|m| m.content.clone()).unwrap_or_default();
//!         Ok(ModelReply { content: format!("echo: {last}"), tool_calls: vec![] })
//!     }
//! }
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryStore::new());
//! let auth = AuthService::new(store.clone());
//! let user = auth.register("alice", "hunter22", None).await?;
//!
//! let outer = store
//!     .create_outer_session(OuterSession::new(user.id.unwrap(), "first chat"))
//!     .await?;
//!
//! let host = HostApi::new(store.clone(), Arc::new(EchoModel));
//! let outcome = host.send_message(outer.id.unwrap(), "hello there").await?;
//! assert_eq!(outcome.reply, "echo: hello there");
//! # Ok(())
//! # }
//! ```
//!
//! ### Messages
//!
//! ```
//! use rollback_agent::message::Message;
//!
//! let user_msg = Message::user("What's the weather like?");
//! let assistant_msg = Message::assistant("It's sunny and 75°F!");
//! let system_msg = Message::system("You are a helpful assistant.");
//!
//! assert!(user_msg.has_role(Message::USER));
//! assert!(!user_msg.has_role(Message::ASSISTANT));
//! # let _ = (assistant_msg, system_msg);
//! ```
//!
//! ## Module Guide
//!
//! - [`store`] - durable persistence for users, sessions, and checkpoints
//! - [`tools`] - the tool track registry and reverse-handler contract
//! - [`checkpoint`] - the checkpoint engine
//! - [`rollback`] - the branch/rollback engine
//! - [`agent`] - the agent loop and host-facing API
//! - [`auth`] - user registration, login, and preferences
//! - [`message`] - message and transcript types
//! - [`model`] - the opaque language model interface the agent loop invokes
//! - [`state_value`] - the typed value used in session state and metadata
//! - [`config`] - environment-driven configuration
//! - [`telemetry`] - tracing subscriber bootstrap
//! - [`error`] - crate-wide error aggregation

pub mod agent;
pub mod auth;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod message;
pub mod model;
pub mod rollback;
pub mod state_value;
pub mod store;
pub mod telemetry;
pub mod tools;
