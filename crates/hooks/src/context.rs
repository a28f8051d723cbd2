//! The per-turn interception context.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub name: String,
    pub params: serde_json::Value,
}

impl ActionRecord {
    pub fn new(name: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            params,
        }
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(|v| v.as_i64())
    }
}

/// Mutable state shared by all hooks during one turn.
///
/// Created when a turn starts and dropped when it ends. `action_history`
/// holds exactly the tool calls that were executed, oldest first.
#[derive(Debug, Clone, Default)]
pub struct InterceptionContext {
    /// Original user input for this turn
    pub input: String,

    /// Tool currently under consideration
    pub action: Option<String>,

    /// Arguments of the tool under consideration
    pub params: serde_json::Value,

    pub action_history: Vec<ActionRecord>,

    /// Result of the most recently executed tool
    pub observation: Option<String>,

    /// Completed model rounds
    pub loop_count: u32,

    /// Ids of fire-once hooks that already fired this turn
    pub seen_once: HashSet<String>,

    /// Guidance to inject into the next model call
    pub pending_guidance: Option<String>,

    /// Run the compression phase even if a final answer arrives
    pub force_summary: bool,
}

impl InterceptionContext {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            params: serde_json::Value::Null,
            ..Self::default()
        }
    }

    /// Point the context at the next pending tool call.
    pub fn set_action(&mut self, name: impl Into<String>, params: serde_json::Value) {
        self.action = Some(name.into());
        self.params = params;
    }

    pub fn is_action(&self, name: &str) -> bool {
        self.action.as_deref() == Some(name)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.params.get(key).and_then(|v| v.as_i64())
    }

    /// Record an executed tool call and its result.
    pub fn record_execution(&mut self, name: impl Into<String>, params: serde_json::Value, observation: String) {
        self.action_history.push(ActionRecord::new(name, params));
        self.observation = Some(observation);
    }

    /// Remove and return the queued guidance.
    pub fn take_guidance(&mut self) -> Option<String> {
        self.pending_guidance.take()
    }

    /// The `n` most recent history entries, most recent first.
    pub fn recent_actions(&self, n: usize) -> impl Iterator<Item = &ActionRecord> {
        self.action_history.iter().rev().take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_context_is_empty() {
        let ctx = InterceptionContext::new("hello");
        assert_eq!(ctx.input, "hello");
        assert!(ctx.action.is_none());
        assert!(ctx.action_history.is_empty());
        assert_eq!(ctx.loop_count, 0);
        assert!(!ctx.force_summary);
    }

    #[test]
    fn set_action_exposes_params() {
        let mut ctx = InterceptionContext::new("x");
        ctx.set_action("read_file", json!({"path": "a.txt", "limit": 10}));
        assert!(ctx.is_action("read_file"));
        assert_eq!(ctx.param_str("path"), Some("a.txt"));
        assert_eq!(ctx.param_i64("limit"), Some(10));
        assert_eq!(ctx.param_i64("offset"), None);
    }

    #[test]
    fn record_execution_appends_in_order() {
        let mut ctx = InterceptionContext::new("x");
        ctx.record_execution("read_file", json!({"path": "a"}), "A".into());
        ctx.record_execution("exec", json!({"command": "ls"}), "B".into());
        assert_eq!(ctx.action_history.len(), 2);
        assert_eq!(ctx.observation.as_deref(), Some("B"));
        let recent: Vec<_> = ctx.recent_actions(1).map(|a| a.name.as_str()).collect();
        assert_eq!(recent, vec!["exec"]);
    }

    #[test]
    fn take_guidance_clears_slot() {
        let mut ctx = InterceptionContext::new("x");
        ctx.pending_guidance = Some("read first".into());
        assert_eq!(ctx.take_guidance().as_deref(), Some("read first"));
        assert!(ctx.pending_guidance.is_none());
    }
}
