//! The hook-driven agent loop — the heart of HookClaw.
//!
//! Every inbound message is one **turn**:
//!
//! 1. **Plan** (optional): a one-shot planner call when the input asks for one
//! 2. **Iterate**: call the model, run the requested tools, feed the results
//!    back; every round and every tool call passes the hook registry first
//! 3. **Compress**: if the turn was aborted or hit its round cap, ask the
//!    model for a summary of the work so far
//! 4. **Persist & respond**: store the exchange and publish the answer
//!
//! The loop ends when the model answers without tool calls, a hook aborts,
//! or the round cap is reached.

pub mod context;
pub mod loop_runner;
pub mod structured;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::ContextBuilder;
pub use loop_runner::{AgentLoop, PlanOutcome};
pub use structured::{Fragment, ParseError};
