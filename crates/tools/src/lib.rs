//! Tools for the HookClaw agent.
//!
//! - Reference tools: `read_file`, `write_file`, `edit_file`, `exec`
//! - [`ToolDispatcher`]: runs a tool by name and reports a [`ToolUsage`]
//! - [`ToolUsageLogger`]: the JSONL-backed [`UsageSink`] with optional
//!   channel notifications

pub mod dispatch;
pub mod file_edit;
pub mod file_read;
pub mod file_write;
pub mod logger;
pub mod path;
pub mod shell;
pub mod usage;

use hookclaw_config::AppConfig;
use hookclaw_core::tool::ToolRegistry;

pub use dispatch::ToolDispatcher;
pub use logger::ToolUsageLogger;
pub use usage::{NoopUsageSink, ToolUsage, UsageSink};

/// Registry with the reference tools, rooted at the configured workspace.
pub fn default_registry(config: &AppConfig) -> ToolRegistry {
    let workspace = config.workspace_path();
    let exec = &config.tools.exec;

    let mut registry = ToolRegistry::new();
    registry.register(Box::new(file_read::FileReadTool::with_base_dir(&workspace)));
    registry.register(Box::new(file_write::FileWriteTool::with_base_dir(&workspace)));
    registry.register(Box::new(file_edit::FileEditTool::with_base_dir(&workspace)));
    registry.register(Box::new(
        shell::ShellTool::new(exec.timeout_secs)
            .with_working_dir(&workspace)
            .restrict_to_workspace(exec.restrict_to_workspace),
    ));
    registry
}
