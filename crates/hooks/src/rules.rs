//! Built-in hook rules.

use std::sync::LazyLock;

use crate::context::InterceptionContext;
use crate::registry::{Hook, HookOutcome, HookRegistry, Stage};

static SENSITIVE_READ: LazyLock<regex_lite::Regex> = LazyLock::new(|| {
    regex_lite::Regex::new(r"cat.*(\.env|\.ssh/|API_KEY)").expect("sensitive read pattern")
});

/// Suggest reading a file before editing it.
///
/// Fires on `edit_file` when no `read_file` of the same path was executed
/// earlier in the turn.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReadBeforeEdit;

impl Hook for ReadBeforeEdit {
    fn id(&self) -> &str {
        "read_before_edit"
    }

    fn evaluate(&self, ctx: &InterceptionContext) -> HookOutcome {
        if !ctx.is_action("edit_file") {
            return HookOutcome::Ok;
        }
        let Some(target) = ctx.param_str("path").filter(|p| !p.is_empty()) else {
            return HookOutcome::Ok;
        };

        let already_read = ctx
            .action_history
            .iter()
            .any(|a| a.name == "read_file" && a.param_str("path") == Some(target));
        if already_read {
            HookOutcome::Ok
        } else {
            HookOutcome::hint(format!(
                "Read the current contents of `{target}` before editing it"
            ))
        }
    }
}

/// Abort shell commands that print credentials or key material.
#[derive(Debug, Default, Clone, Copy)]
pub struct SensitiveFileGuard;

impl Hook for SensitiveFileGuard {
    fn id(&self) -> &str {
        "block_secrets"
    }

    fn evaluate(&self, ctx: &InterceptionContext) -> HookOutcome {
        if !ctx.is_action("exec") {
            return HookOutcome::Ok;
        }
        let command = ctx.param_str("command").unwrap_or_default();
        if SENSITIVE_READ.is_match(command) {
            HookOutcome::abort("Access to sensitive files is forbidden")
        } else {
            HookOutcome::Ok
        }
    }
}

/// Point the model at a skill document when the input mentions a known
/// trigger keyword.
///
/// Only fires once some tool has already run this turn. Meant to be
/// registered with [`HookRegistry::register_once`] at `before_plan`.
#[derive(Debug, Clone)]
pub struct SkillSuggestion {
    triggers: Vec<(String, String)>,
}

impl Default for SkillSuggestion {
    fn default() -> Self {
        Self::new()
            .with_trigger("自举", "self-improvement")
            .with_trigger("联网搜索", "tavily-search")
    }
}

impl SkillSuggestion {
    /// An instance with no triggers.
    pub fn new() -> Self {
        Self {
            triggers: Vec::new(),
        }
    }

    /// Map `keyword` in the user input to `skill`. Earlier triggers win.
    pub fn with_trigger(mut self, keyword: impl Into<String>, skill: impl Into<String>) -> Self {
        self.triggers.push((keyword.into(), skill.into()));
        self
    }
}

impl Hook for SkillSuggestion {
    fn id(&self) -> &str {
        "suggest_skill"
    }

    fn evaluate(&self, ctx: &InterceptionContext) -> HookOutcome {
        if ctx.action_history.is_empty() {
            return HookOutcome::Ok;
        }
        self.triggers
            .iter()
            .find(|(keyword, _)| ctx.input.contains(keyword.as_str()))
            .map(|(keyword, skill)| {
                HookOutcome::hint(format!(
                    "Detected `{keyword}`: consider read_skill({skill}) first"
                ))
            })
            .unwrap_or(HookOutcome::Ok)
    }
}

/// Suggest a search tool when the model keeps re-reading one file with a
/// growing `limit`.
///
/// Fires when the pending call and the two most recent executed calls are
/// all `read_file` of the same path, each carries a `limit`, and the limits
/// are strictly increasing in execution order.
#[derive(Debug, Default, Clone, Copy)]
pub struct EscalatingReadDetector;

impl Hook for EscalatingReadDetector {
    fn id(&self) -> &str {
        "suggest_grep_for_repeated_reads"
    }

    fn evaluate(&self, ctx: &InterceptionContext) -> HookOutcome {
        if !ctx.is_action("read_file") {
            return HookOutcome::Ok;
        }
        let Some(target) = ctx.param_str("path").filter(|p| !p.is_empty()) else {
            return HookOutcome::Ok;
        };

        let recent: Vec<_> = ctx.recent_actions(2).collect();
        let [last, before_last] = recent.as_slice() else {
            return HookOutcome::Ok;
        };
        let same_file = |name: &str, path: Option<&str>| name == "read_file" && path == Some(target);
        if !same_file(&last.name, last.param_str("path"))
            || !same_file(&before_last.name, before_last.param_str("path"))
        {
            return HookOutcome::Ok;
        }

        let (Some(first), Some(second), Some(third)) = (
            before_last.param_i64("limit"),
            last.param_i64("limit"),
            ctx.param_i64("limit"),
        ) else {
            return HookOutcome::Ok;
        };

        if first < second && second < third {
            HookOutcome::hint(format!(
                "`{target}` was read three times in a row with a growing limit. \
                 Locate the relevant lines with rg/grep first"
            ))
        } else {
            HookOutcome::Ok
        }
    }
}

/// The stock rule set.
///
/// `before_act` runs, in order, read-before-edit, the sensitive file guard,
/// and the escalating read detector. `before_plan` carries the fire-once
/// skill suggestion.
pub fn default_registry() -> HookRegistry {
    let mut registry = HookRegistry::new();
    registry.register(Stage::BeforeAct, ReadBeforeEdit);
    registry.register(Stage::BeforeAct, SensitiveFileGuard);
    registry.register(Stage::BeforeAct, EscalatingReadDetector);
    registry.register_once(Stage::BeforePlan, SkillSuggestion::default());
    registry
}
