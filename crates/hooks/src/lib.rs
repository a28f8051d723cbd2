//! Lifecycle hooks — the policy layer of the agent loop.
//!
//! Hooks are small interceptors consulted at fixed checkpoints of every
//! iteration round. Each one looks at the [`InterceptionContext`] and either
//! stays silent, queues guidance for the model, or aborts the whole turn.
//!
//! # Checkpoints
//!
//! ```text
//!  round ──▶ before_plan ──▶ model call ──▶ for each tool call:
//!                                             before_act ──▶ execute ──▶ after_act
//! ```
//!
//! - `before_plan` runs once per round, before the model is called
//! - `before_act` runs before every requested tool call; a `Hint` skips the call
//! - `after_act` runs after a tool call completed; its outcome is not acted on
//!
//! The registry is a short-circuiting pipeline: hooks run in registration
//! order and the first non-`Ok` outcome wins. Register higher-priority rules
//! first.
//!
//! # Example
//!
//! ```
//! use hookclaw_hooks::{FnHook, HookOutcome, HookRegistry, InterceptionContext, Stage};
//!
//! let mut registry = HookRegistry::new();
//! registry.register(
//!     Stage::BeforeAct,
//!     FnHook::new("no_rm", |ctx: &InterceptionContext| {
//!         match ctx.param_str("command") {
//!             Some(cmd) if cmd.starts_with("rm ") => HookOutcome::abort("rm is not allowed"),
//!             _ => HookOutcome::Ok,
//!         }
//!     }),
//! );
//!
//! let mut ctx = InterceptionContext::new("clean up");
//! ctx.set_action("exec", serde_json::json!({"command": "rm -rf build"}));
//! assert!(registry.trigger(Stage::BeforeAct, &mut ctx).is_abort());
//! ```

pub mod context;
pub mod registry;
pub mod rules;

pub use context::{ActionRecord, InterceptionContext};
pub use registry::{FnHook, Hook, HookOutcome, HookRegistry, Stage};
pub use rules::{
    EscalatingReadDetector, ReadBeforeEdit, SensitiveFileGuard, SkillSuggestion, default_registry,
};
