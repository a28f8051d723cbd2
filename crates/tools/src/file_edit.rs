//! File edit tool — exact text replacement.

use async_trait::async_trait;
use hookclaw_core::error::ToolError;
use hookclaw_core::tool::Tool;
use std::path::PathBuf;

use crate::path::{looks_binary, resolve_path};

/// Replaces `old_text` with `new_text`. The number of occurrences must equal
/// `expected_replacements` (default 1), so an ambiguous match is refused.
pub struct FileEditTool {
    base_dir: Option<PathBuf>,
}

impl FileEditTool {
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
        }
    }
}

impl Default for FileEditTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileEditTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing old_text with new_text. old_text must match exactly, including whitespace."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to edit"
                },
                "old_text": {
                    "type": "string",
                    "description": "The exact text to replace"
                },
                "new_text": {
                    "type": "string",
                    "description": "The replacement text"
                },
                "expected_replacements": {
                    "type": "integer",
                    "description": "Occurrences expected (default: 1); the edit fails on mismatch",
                    "minimum": 1
                }
            },
            "required": ["path", "old_text", "new_text"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<String, ToolError> {
        let raw = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
        let old_text = arguments["old_text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'old_text' argument".into()))?;
        let new_text = arguments["new_text"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'new_text' argument".into()))?;
        let expected = arguments["expected_replacements"].as_u64().unwrap_or(1) as usize;
        let path = resolve_path(raw, self.base_dir.as_deref());

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(_) => return Ok(format!("Error: File not found: {raw}")),
        };
        if looks_binary(&bytes) {
            return Ok(format!("Error: Cannot edit binary file: {raw}"));
        }
        let Ok(content) = String::from_utf8(bytes) else {
            return Ok(format!("Error: File is not valid UTF-8: {raw}"));
        };

        if old_text.is_empty() {
            return Ok("Error: old_text cannot be empty".into());
        }
        if old_text == new_text {
            return Ok("Error: old_text and new_text are identical".into());
        }

        let found = content.matches(old_text).count();
        if found == 0 {
            return Ok(format!(
                "Error: old_text not found in {raw}. Read the file first to copy the exact text"
            ));
        }
        if found != expected {
            return Ok(format!(
                "Error: Expected {expected} replacement(s) but found {found} occurrence(s). \
                 Make old_text more specific or set expected_replacements to {found}"
            ));
        }

        let updated = content.replacen(old_text, new_text, expected);
        match tokio::fs::write(&path, updated).await {
            Ok(()) => Ok(format!(
                "Successfully edited {raw}: replaced {expected} occurrence(s)"
            )),
            Err(e) => Ok(format!("Error: Failed to write file {raw}: {e}")),
        }
    }
}
