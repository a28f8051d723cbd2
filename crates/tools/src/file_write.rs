//! File write tool — create, overwrite, or append to text files.

use async_trait::async_trait;
use hookclaw_core::error::ToolError;
use hookclaw_core::tool::Tool;
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;

use crate::path::{looks_binary, resolve_path};

pub struct FileWriteTool {
    base_dir: Option<PathBuf>,
}

impl FileWriteTool {
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a text file, creating parent directories if needed. Overwrites by default; set append to add to the end."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write to"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                },
                "append": {
                    "type": "boolean",
                    "description": "Append instead of overwriting (default: false)"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let raw = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;
        let append = arguments["append"].as_bool().unwrap_or(false);
        let path = resolve_path(raw, self.base_dir.as_deref());

        if looks_binary(content.as_bytes()) {
            return Ok("Error: Content appears to be binary".into());
        }
        if path.is_dir() {
            return Ok(format!("Error: Path is a directory: {raw}"));
        }
        if let Ok(existing) = tokio::fs::read(&path).await
            && looks_binary(&existing)
        {
            return Ok(format!("Error: Cannot write to binary file: {raw}"));
        }

        if let Some(parent) = path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return Ok(format!("Error: Failed to create directories for {raw}: {e}"));
        }

        let written = if append {
            append_to(&path, content).await
        } else {
            tokio::fs::write(&path, content).await
        };

        match written {
            Ok(()) => {
                let action = if append { "appended" } else { "wrote" };
                Ok(format!("Successfully {action} {} bytes to {raw}", content.len()))
            }
            Err(e) => Ok(format!("Error: Failed to write file {raw}: {e}")),
        }
    }
}

async fn append_to(path: &std::path::Path, content: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}
