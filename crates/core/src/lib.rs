//! # HookClaw Core
//!
//! Domain types, traits, and error definitions for the HookClaw agent runtime.
//! Every collaborator of the agent loop (model backend, tools, session store,
//! message transport) is described here as a trait or a plain value type, and
//! implemented in its own crate.
//!
//! ## Design Philosophy
//!
//! - Implementations are swappable through configuration
//! - Tests plug in scripted mocks without touching the loop
//! - All crates depend inward on core

pub mod bus;
pub mod error;
pub mod message;
pub mod provider;
pub mod session;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use bus::{InboundMessage, MessageBus, OutboundMessage};
pub use error::{Error, Result};
pub use message::{Message, Role};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition};
pub use session::{Session, SessionMessage, SessionStore, archive_path};
pub use tool::{ERROR_MARKER, Tool, ToolCall, ToolRegistry};
