//! File read tool — paginated, line-numbered reads.

use async_trait::async_trait;
use hookclaw_core::error::ToolError;
use hookclaw_core::tool::Tool;
use std::path::PathBuf;

use crate::path::{looks_binary, resolve_path};

/// Files above this size must be read with `offset` and `limit`.
pub const MAX_FILE_SIZE: u64 = 20 * 1024;

/// Lines returned when no `limit` is given.
pub const DEFAULT_LIMIT: usize = 50;

pub struct FileReadTool {
    /// Relative paths are resolved against this directory.
    base_dir: Option<PathBuf>,
}

impl FileReadTool {
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file with line numbers. For large files, use offset and limit to read in chunks."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read"
                },
                "offset": {
                    "type": "integer",
                    "description": "0-based line to start from (default: 0)",
                    "minimum": 0
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default: 50)",
                    "minimum": 1
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let raw = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let offset = arguments["offset"].as_u64().map(|v| v as usize);
        let limit = arguments["limit"].as_u64().map(|v| v as usize);
        let path = resolve_path(raw, self.base_dir.as_deref());

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(_) => return Ok(format!("Error: File not found: {raw}")),
        };
        if !meta.is_file() {
            return Ok(format!("Error: Not a file: {raw}"));
        }
        if meta.len() > MAX_FILE_SIZE && (offset.is_none() || limit.is_none()) {
            return Ok(format!(
                "Error: File is too large ({:.2}KB, limit is {}KB). Use 'offset' and 'limit' to read it in chunks",
                meta.len() as f64 / 1024.0,
                MAX_FILE_SIZE / 1024
            ));
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => return Ok(format!("Error: Failed to read file {raw}: {e}")),
        };
        if looks_binary(&bytes) {
            return Ok(format!("Error: Cannot read binary file: {raw}"));
        }
        let Ok(content) = String::from_utf8(bytes) else {
            return Ok(format!("Error: File is not valid UTF-8: {raw}"));
        };

        let lines: Vec<&str> = content.split_inclusive('\n').collect();
        let start = offset.unwrap_or(0);
        if offset.is_some() && start >= lines.len() {
            return Ok(format!(
                "Error: Offset {start} exceeds file length ({} lines)",
                lines.len()
            ));
        }

        let take = limit.unwrap_or(DEFAULT_LIMIT);
        let body: String = lines
            .iter()
            .enumerate()
            .skip(start)
            .take(take)
            .map(|(i, line)| format!("{:6}\t{line}", i + 1))
            .collect();

        if body.trim().is_empty() {
            return Ok(format!("(empty) {raw}"));
        }
        Ok(body)
    }
}
