//! Exec tool — run shell commands.
//!
//! Supports a per-call timeout and optional confinement to the workspace.

use async_trait::async_trait;
use hookclaw_core::error::ToolError;
use hookclaw_core::tool::Tool;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::path::{is_within, resolve_path};

/// Output longer than this is cut.
const MAX_OUTPUT_CHARS: usize = 10_000;

/// Command fragments refused outright.
const DENY_PATTERNS: [&str; 6] = ["rm -rf /", "mkfs", "dd if=", ":(){", "shutdown", "reboot"];

/// Execute shell commands with safety constraints.
pub struct ShellTool {
    working_dir: Option<PathBuf>,
    timeout: Duration,
    restrict_to_workspace: bool,
}

impl ShellTool {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            working_dir: None,
            timeout: Duration::from_secs(timeout_secs),
            restrict_to_workspace: false,
        }
    }

    /// Run commands in `dir` by default.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Refuse commands that reference paths outside the working directory.
    pub fn restrict_to_workspace(mut self, restrict: bool) -> Self {
        self.restrict_to_workspace = restrict;
        self
    }

    /// Why `command` may not run in `cwd`, if it may not.
    fn guard_command(&self, command: &str, cwd: Option<&Path>) -> Option<String> {
        let lowered = command.to_lowercase();
        if let Some(pattern) = DENY_PATTERNS.iter().find(|p| lowered.contains(*p)) {
            return Some(format!("command contains blocked pattern '{pattern}'"));
        }

        if !self.restrict_to_workspace {
            return None;
        }
        let Some(root) = cwd else {
            return None;
        };
        if command.contains("../") || command.contains("..\\") {
            return Some("path traversal outside the workspace".into());
        }
        command
            .split_whitespace()
            .map(|token| token.trim_matches(|c| c == '"' || c == '\''))
            .filter(|token| token.starts_with('/') || token.starts_with('~'))
            .find(|token| !is_within(&resolve_path(token, None), root))
            .map(|token| format!("path '{token}' is outside the workspace"))
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return its output. Use this for running programs, searching files, git operations, etc."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Optional working directory for the command"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;
        let cwd = arguments["working_dir"]
            .as_str()
            .map(|d| resolve_path(d, self.working_dir.as_deref()))
            .or_else(|| self.working_dir.clone());

        if let Some(reason) = self.guard_command(command, self.working_dir.as_deref()) {
            warn!(command = %command, "Blocked command: {reason}");
            return Ok(format!("Error: Command blocked by safety guard ({reason})"));
        }
        if self.restrict_to_workspace
            && let (Some(dir), Some(root)) = (&cwd, &self.working_dir)
            && !is_within(dir, root)
        {
            return Ok("Error: Command blocked by safety guard (working_dir is outside the workspace)".into());
        }

        debug!(command = %command, cwd = ?cwd, "Executing shell command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        if let Some(dir) = &cwd {
            cmd.current_dir(dir);
        }
        cmd.kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "exec".into(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(command = %command, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Ok(format!(
                    "Error: Command timed out after {} seconds",
                    self.timeout.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut text = stdout.trim_end().to_string();
        if !stderr.trim().is_empty() {
            text.push_str(&format!("\n[stderr]: {}", stderr.trim_end()));
        }
        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            text.push_str(&format!("\n[exit code: {code}]"));
        }

        let text = text.trim().to_string();
        if text.is_empty() {
            return Ok("(no output)".into());
        }
        let total = text.chars().count();
        if total > MAX_OUTPUT_CHARS {
            let kept: String = text.chars().take(MAX_OUTPUT_CHARS).collect();
            return Ok(format!(
                "{kept}\n... (truncated, {} more chars)",
                total - MAX_OUTPUT_CHARS
            ));
        }
        Ok(text)
    }
}
