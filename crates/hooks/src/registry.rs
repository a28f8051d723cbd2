//! Hook registry — ordered, stage-keyed interceptors.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::context::InterceptionContext;

/// A checkpoint in the iteration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    BeforePlan,
    BeforeAct,
    AfterAct,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::BeforePlan => "before_plan",
            Stage::BeforeAct => "before_act",
            Stage::AfterAct => "after_act",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "before_plan" => Ok(Stage::BeforePlan),
            "before_act" => Ok(Stage::BeforeAct),
            "after_act" => Ok(Stage::AfterAct),
            other => Err(format!("unknown hook stage '{other}'")),
        }
    }
}

/// What a hook decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "signal", content = "message", rename_all = "snake_case")]
pub enum HookOutcome {
    /// No objection.
    Ok,
    /// Advisory guidance for the model. At `before_act` the pending tool
    /// call is skipped.
    Hint(String),
    /// Stop the whole turn with this message.
    Abort(String),
}

impl HookOutcome {
    pub fn hint(message: impl Into<String>) -> Self {
        HookOutcome::Hint(message.into())
    }

    pub fn abort(message: impl Into<String>) -> Self {
        HookOutcome::Abort(message.into())
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, HookOutcome::Ok)
    }

    pub fn is_hint(&self) -> bool {
        matches!(self, HookOutcome::Hint(_))
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, HookOutcome::Abort(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            HookOutcome::Ok => None,
            HookOutcome::Hint(m) | HookOutcome::Abort(m) => Some(m),
        }
    }
}

/// An interceptor consulted at one or more stages.
pub trait Hook: Send + Sync {
    /// Stable identifier, used for fire-once bookkeeping and logs.
    fn id(&self) -> &str;

    /// Inspect the context and decide.
    fn evaluate(&self, ctx: &InterceptionContext) -> HookOutcome;
}

/// Adapts a closure into a [`Hook`].
pub struct FnHook<F> {
    id: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&InterceptionContext) -> HookOutcome + Send + Sync,
{
    pub fn new(id: impl Into<String>, f: F) -> Self {
        Self { id: id.into(), f }
    }
}

impl<F> Hook for FnHook<F>
where
    F: Fn(&InterceptionContext) -> HookOutcome + Send + Sync,
{
    fn id(&self) -> &str {
        &self.id
    }

    fn evaluate(&self, ctx: &InterceptionContext) -> HookOutcome {
        (self.f)(ctx)
    }
}

struct HookEntry {
    hook: Arc<dyn Hook>,
    fire_once: bool,
}

/// Stage-keyed hook lists.
///
/// Built once at startup and shared read-only (behind an `Arc`) with the
/// agent loop; all per-turn state lives in the [`InterceptionContext`].
#[derive(Default)]
pub struct HookRegistry {
    stages: HashMap<Stage, Vec<HookEntry>>,
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut dbg = f.debug_struct("HookRegistry");
        for stage in [Stage::BeforePlan, Stage::BeforeAct, Stage::AfterAct] {
            dbg.field(stage.as_str(), &self.hook_ids(stage));
        }
        dbg.finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook to a stage.
    pub fn register(&mut self, stage: Stage, hook: impl Hook + 'static) {
        self.push(stage, Arc::new(hook), false);
    }

    /// Append a hook that fires at most once per turn.
    pub fn register_once(&mut self, stage: Stage, hook: impl Hook + 'static) {
        self.push(stage, Arc::new(hook), true);
    }

    /// Append an already-shared hook.
    pub fn register_shared(&mut self, stage: Stage, hook: Arc<dyn Hook>, fire_once: bool) {
        self.push(stage, hook, fire_once);
    }

    fn push(&mut self, stage: Stage, hook: Arc<dyn Hook>, fire_once: bool) {
        debug!(stage = %stage, hook = hook.id(), fire_once, "Registered hook");
        self.stages
            .entry(stage)
            .or_default()
            .push(HookEntry { hook, fire_once });
    }

    /// Run the hooks of `stage` in registration order.
    ///
    /// Fire-once hooks that already fired this turn are skipped. The first
    /// `Hint` or `Abort` ends the run: a fire-once hook is marked as seen, a
    /// `Hint` message is queued as `ctx.pending_guidance`, and the outcome
    /// is returned without consulting later hooks.
    pub fn trigger(&self, stage: Stage, ctx: &mut InterceptionContext) -> HookOutcome {
        let Some(entries) = self.stages.get(&stage) else {
            return HookOutcome::Ok;
        };

        for entry in entries {
            let id = entry.hook.id();
            if entry.fire_once && ctx.seen_once.contains(id) {
                continue;
            }

            let outcome = entry.hook.evaluate(ctx);
            if outcome.is_ok() {
                continue;
            }

            if entry.fire_once {
                ctx.seen_once.insert(id.to_string());
            }

            match &outcome {
                HookOutcome::Hint(message) => {
                    info!(stage = %stage, hook = id, action = ?ctx.action, "Hook hinted: {message}");
                    ctx.pending_guidance = Some(message.clone());
                }
                HookOutcome::Abort(message) => {
                    warn!(stage = %stage, hook = id, action = ?ctx.action, "Hook aborted turn: {message}");
                }
                HookOutcome::Ok => {}
            }
            return outcome;
        }

        HookOutcome::Ok
    }

    /// Hook ids registered for `stage`, in evaluation order.
    pub fn hook_ids(&self, stage: Stage) -> Vec<&str> {
        self.stages
            .get(&stage)
            .map(|entries| entries.iter().map(|e| e.hook.id()).collect())
            .unwrap_or_default()
    }

    /// Total number of registrations across all stages.
    pub fn len(&self) -> usize {
        self.stages.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
