//! Tool usage records and the sink they are handed to.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hookclaw_core::tool::is_error_result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One executed tool call, as persisted to the usage log.
///
/// `success` and `error` are derived from the result text: a result that
/// starts with the error marker is a failure and is also copied to `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub tool_name: String,

    /// Input parameters (sanitized before persisting)
    pub parameters: serde_json::Value,

    /// Execution result (truncated before persisting)
    pub result: String,

    /// When the call started
    pub timestamp: DateTime<Utc>,

    /// `channel:chat_id`
    pub session_key: String,

    #[serde(default)]
    pub duration_ms: Option<f64>,

    pub success: bool,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolUsage {
    pub fn new(
        tool_name: impl Into<String>,
        parameters: serde_json::Value,
        result: impl Into<String>,
        session_key: impl Into<String>,
    ) -> Self {
        let result = result.into();
        let success = !is_error_result(&result);
        Self {
            tool_name: tool_name.into(),
            parameters,
            error: (!success).then(|| result.clone()),
            result,
            timestamp: Utc::now(),
            session_key: session_key.into(),
            duration_ms: None,
            success,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Record the elapsed time, rounded to two decimals of a millisecond.
    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        let ms = elapsed.as_secs_f64() * 1000.0;
        self.duration_ms = Some((ms * 100.0).round() / 100.0);
        self
    }

    /// Cut `result` to `max_chars` characters, noting how many were dropped.
    ///
    /// `"abcdef"` with a limit of 4 becomes `"abcd... 2[truncated]"`.
    pub fn truncate_result(&mut self, max_chars: usize) {
        let total = self.result.chars().count();
        if total <= max_chars {
            return;
        }
        let kept: String = self.result.chars().take(max_chars).collect();
        self.result = format!("{kept}... {}[truncated]", total - max_chars);
    }
}

/// Receives usage records after each tool call.
///
/// Implementations must return promptly and never fail the caller; slow work
/// (file writes, notifications) is expected to happen in background tasks.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn log_usage(&self, usage: ToolUsage, channel: &str, chat_id: &str);
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopUsageSink;

#[async_trait]
impl UsageSink for NoopUsageSink {
    async fn log_usage(&self, _usage: ToolUsage, _channel: &str, _chat_id: &str) {}
}
