//! Context builder — assembles the prompts the iteration loop sends.
//!
//! The system prompt is layered (later layers append):
//!
//! 1. **Built-in identity**, with the current time and workspace path
//! 2. **Bootstrap files** from the workspace: `AGENTS.md`, `SOUL.md`,
//!    `USER.md`, `TOOLS.md`
//!
//! Each file is optional. Missing or empty files are skipped.
//!
//! The builder also owns the plan prompt (`PLAN.md` in the workspace, or a
//! built-in default) and the two prompts of the compression phase.

use hookclaw_core::message::{Message, Role};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Workspace files appended to the system prompt, in order.
pub const BOOTSTRAP_FILES: [&str; 4] = ["AGENTS.md", "SOUL.md", "USER.md", "TOOLS.md"];

/// Workspace file overriding the built-in plan prompt.
pub const PLAN_FILE: &str = "PLAN.md";

const DEFAULT_IDENTITY: &str = concat!(
    "You are HookClaw, a helpful AI assistant. ",
    "You have tools to read, write and edit files and to run shell commands. ",
    "Use them when they help accomplish the user's goal. ",
    "Some tool calls may be skipped with a [Hint]; follow the hint and try again.",
);

const DEFAULT_PLAN_PROMPT: &str = r#"You are the planner. Before any tool runs, decide whether the task below is clear enough to act on and outline how to do it.

Reply with these elements and nothing else:

<clarity>true or false</clarity>
<unclear_points>If clarity is false: the questions the user must answer</unclear_points>
<task>The task restated in one or two sentences</task>
<tools_and_actions>The tools you expect to use, in order, and what each call does</tools_and_actions>
<warnings>Risks, destructive operations or assumptions to double-check</warnings>

Escape `<`, `>` and `&` inside element text."#;

const SUMMARY_SYSTEM_PROMPT: &str = r#"You are summarizing an agent session that has run out of iterations or was interrupted. Read the whole conversation, including the tool calls and their results, and report what was achieved."#;

const SUMMARY_USER_PROMPT: &str = r#"Stop calling tools. Summarize the work so far as:

<analysis>What was attempted, what worked and what failed</analysis>
<summary>The answer for the user: results, current state and the remaining steps</summary>"#;

/// Builds system prompts and per-turn message lists.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    workspace: PathBuf,
    identity: String,
}

impl ContextBuilder {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            identity: DEFAULT_IDENTITY.into(),
        }
    }

    /// Replace the built-in identity paragraph.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Identity, environment and every bootstrap file present.
    pub fn build_system_prompt(&self) -> String {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");
        let mut prompt = format!(
            "{}\n\n## Current Time\n{now}\n\n## Workspace\nYour workspace is at: {}",
            self.identity,
            self.workspace.display()
        );

        for name in BOOTSTRAP_FILES {
            if let Some(content) = self.read_workspace_file(name) {
                debug!(file = name, "Loaded bootstrap file");
                prompt.push_str(&format!("\n\n## {name}\n\n{content}"));
            }
        }
        prompt
    }

    /// `[system, ...history, user]` for one turn. Media paths are listed
    /// after the user's text.
    pub fn build_messages(&self, history: Vec<Message>, current: &str, media: &[String]) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(self.build_system_prompt()));
        messages.extend(history);
        messages.push(Message::user(Self::user_content(current, media)));
        messages
    }

    fn user_content(text: &str, media: &[String]) -> String {
        if media.is_empty() {
            return text.to_string();
        }
        let mut content = format!("{text}\n\n[Attached media]");
        for path in media {
            content.push_str(&format!("\n- {path}"));
        }
        content
    }

    /// The planner instruction, or `None` when `PLAN.md` exists but is empty.
    pub fn plan_prompt(&self) -> Option<String> {
        let path = self.workspace.join(PLAN_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) if content.trim().is_empty() => None,
            Ok(content) => Some(content.trim().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Some(DEFAULT_PLAN_PROMPT.into()),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read plan prompt");
                None
            }
        }
    }

    /// The planner request for `task`: prior turns plus one user message.
    pub fn build_plan_messages(&self, plan_prompt: &str, history: Vec<Message>, task: &str) -> Vec<Message> {
        let mut messages = history;
        messages.push(Message::user(format!("{plan_prompt}\n\n## User Task\n\n{task}")));
        messages
    }

    pub fn summary_system_prompt(&self) -> &'static str {
        SUMMARY_SYSTEM_PROMPT
    }

    pub fn summary_user_prompt(&self) -> &'static str {
        SUMMARY_USER_PROMPT
    }

    /// Swap the leading system prompt for the compression instruction and
    /// append the summary directive.
    pub fn prepare_summary(&self, messages: &mut Vec<Message>) {
        match messages.first_mut() {
            Some(first) if first.role == Role::System => {
                first.content = SUMMARY_SYSTEM_PROMPT.into();
            }
            _ => messages.insert(0, Message::system(SUMMARY_SYSTEM_PROMPT)),
        }
        messages.push(Message::user(SUMMARY_USER_PROMPT));
    }

    fn read_workspace_file(&self, name: &str) -> Option<String> {
        let path = self.workspace.join(name);
        match std::fs::read_to_string(&path) {
            Ok(content) if !content.trim().is_empty() => Some(content.trim().to_string()),
            Ok(_) => None,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read bootstrap file");
                None
            }
        }
    }
}
