//! File-backed tool usage logger.
//!
//! Every record is appended as one JSON line to a per-chat log file under the
//! sessions directory (`{prefix}{channel}_{chat_id}.jsonl`). Optionally a
//! notice is published to the originating chat through the message bus.
//! Both happen on detached tasks so tool execution never waits on disk.

use async_trait::async_trait;
use hookclaw_config::ToolLoggingConfig;
use hookclaw_core::bus::{MessageBus, OutboundMessage};
use hookclaw_core::session::archive_path;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::usage::{ToolUsage, UsageSink};

const REDACTED: &str = "[REDACTED]";
const SENSITIVE_KEY_FRAGMENTS: [&str; 4] = ["key", "pass", "token", "secret"];
const NOTIFY_PARAMS_MAX: usize = 200;
const NOTIFY_RESULT_MAX: usize = 100;

/// Writes [`ToolUsage`] records to JSONL files and notifies channels.
///
/// Cheap to clone; clones share the same per-file locks.
#[derive(Clone)]
pub struct ToolUsageLogger {
    inner: Arc<LoggerInner>,
}

/// One lock per log file, created on first use and kept for the lifetime
/// of the logger and everything derived from it.
type FileLocks = Arc<std::sync::Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>;

struct LoggerInner {
    config: ToolLoggingConfig,
    log_dir: PathBuf,
    bus: Option<Arc<MessageBus>>,
    file_locks: FileLocks,
}

impl ToolUsageLogger {
    pub fn new(config: ToolLoggingConfig, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                config,
                log_dir: log_dir.into(),
                bus: None,
                file_locks: FileLocks::default(),
            }),
        }
    }

    /// Publish notifications to this bus when `notify_channel` is enabled.
    ///
    /// The returned logger keeps the per-file locks of `self`, so clones
    /// taken before and after attaching the bus serialize on the same files.
    pub fn with_bus(self, bus: Arc<MessageBus>) -> Self {
        let inner = LoggerInner {
            config: self.inner.config.clone(),
            log_dir: self.inner.log_dir.clone(),
            bus: Some(bus),
            file_locks: Arc::clone(&self.inner.file_locks),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &ToolLoggingConfig {
        &self.inner.config
    }

    pub fn log_dir(&self) -> &Path {
        &self.inner.log_dir
    }

    /// Path of the log file for one chat.
    pub fn log_file_path(&self, channel: &str, chat_id: &str) -> PathBuf {
        let safe_key = format!("{channel}:{chat_id}").replace(':', "_");
        self.inner
            .log_dir
            .join(format!("{}{safe_key}.jsonl", self.inner.config.log_file_prefix))
    }

    fn is_excluded(&self, tool_name: &str) -> bool {
        self.inner.config.exclude_tools.iter().any(|t| t == tool_name)
    }

    /// Replace sensitive top-level parameter values with `[REDACTED]`.
    ///
    /// A key is sensitive when it is on the blacklist, or when its value is a
    /// string and the lowercased key contains `key`, `pass`, `token`, or
    /// `secret`.
    pub fn sanitize_parameters(&self, params: &serde_json::Value) -> serde_json::Value {
        let config = &self.inner.config;
        let (true, Some(map)) = (config.sanitize_parameters, params.as_object()) else {
            return params.clone();
        };

        let sanitized = map
            .iter()
            .map(|(key, value)| {
                let blacklisted = config.parameter_blacklist.iter().any(|b| b == key);
                let lowered = key.to_lowercase();
                let looks_sensitive = value.is_string()
                    && SENSITIVE_KEY_FRAGMENTS.iter().any(|f| lowered.contains(f));
                if blacklisted || looks_sensitive {
                    (key.clone(), serde_json::Value::String(REDACTED.into()))
                } else {
                    (key.clone(), value.clone())
                }
            })
            .collect();
        serde_json::Value::Object(sanitized)
    }

    /// Human-readable notice for one record.
    pub fn format_notification(usage: &ToolUsage) -> String {
        let params = serde_json::to_string(&usage.parameters).unwrap_or_default();
        let status = if usage.success { "✅" } else { "❌" };

        let mut lines = vec![
            format!("🛠️ 工具执行: {}", usage.tool_name),
            format!("📁 参数: {}", ellipsize(&params, NOTIFY_PARAMS_MAX)),
            format!("{status} 结果: {}", ellipsize(&usage.result, NOTIFY_RESULT_MAX)),
        ];
        if let Some(ms) = usage.duration_ms.filter(|ms| *ms > 0.0) {
            lines.push(format!("⏱️ 耗时: {ms:.0}ms"));
        }
        if let Some(error) = &usage.error {
            lines.push(format!("⚠️ 错误: {error}"));
        }
        lines.join("\n")
    }

    fn file_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .inner
            .file_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(path.to_path_buf()).or_default().clone()
    }

    /// Append one record to the chat's log file.
    ///
    /// Sanitizes parameters and truncates the result first. Errors are
    /// logged, never returned.
    pub async fn write_record(&self, mut usage: ToolUsage, channel: &str, chat_id: &str) {
        let config = &self.inner.config;
        if !config.enabled || self.is_excluded(&usage.tool_name) {
            return;
        }

        usage.parameters = self.sanitize_parameters(&usage.parameters);
        usage.truncate_result(config.max_result_length);

        let path = self.log_file_path(channel, chat_id);
        let line = match serde_json::to_string(&usage) {
            Ok(line) => line,
            Err(e) => {
                error!(tool = %usage.tool_name, "Failed to serialize tool usage: {e}");
                return;
            }
        };

        let lock = self.file_lock(&path);
        let _guard = lock.lock().await;
        if let Err(e) = append_line(&path, &line).await {
            error!(path = %path.display(), "Failed to write tool usage log: {e}");
            return;
        }
        debug!(tool = %usage.tool_name, path = %path.display(), "Logged tool usage");
    }

    /// Publish the channel notice for one record.
    ///
    /// With `typing_only` the notice is empty, which channels treat as a
    /// typing indicator.
    pub async fn send_notification(&self, usage: &ToolUsage, channel: &str, chat_id: &str) {
        let config = &self.inner.config;
        if !config.notify_channel || self.is_excluded(&usage.tool_name) {
            return;
        }
        let Some(bus) = &self.inner.bus else {
            return;
        };

        let content = if config.typing_only {
            String::new()
        } else {
            Self::format_notification(usage)
        };
        match bus
            .publish_outbound(OutboundMessage::new(channel, chat_id, content))
            .await
        {
            Ok(()) => debug!(tool = %usage.tool_name, channel, chat_id, "Sent tool notification"),
            Err(e) => error!(tool = %usage.tool_name, "Failed to send tool notification: {e}"),
        }
    }

    /// Move the chat's log aside with a `-YYYYmmddHHMMSS` suffix.
    ///
    /// Returns the new path, or `None` when there was no log to move.
    pub async fn rename_with_timestamp(
        &self,
        channel: &str,
        chat_id: &str,
    ) -> std::io::Result<Option<PathBuf>> {
        let path = self.log_file_path(channel, chat_id);
        let lock = self.file_lock(&path);
        let _guard = lock.lock().await;

        if !tokio::fs::try_exists(&path).await? {
            return Ok(None);
        }
        let renamed = archive_path(&path);
        tokio::fs::rename(&path, &renamed).await?;
        info!(
            from = %path.display(),
            to = %renamed.display(),
            "Renamed tool usage log"
        );
        Ok(Some(renamed))
    }
}

#[async_trait]
impl UsageSink for ToolUsageLogger {
    async fn log_usage(&self, usage: ToolUsage, channel: &str, chat_id: &str) {
        if !self.inner.config.enabled {
            return;
        }

        if self.inner.config.notify_channel {
            let logger = self.clone();
            let notice = usage.clone();
            let (channel, chat_id) = (channel.to_string(), chat_id.to_string());
            tokio::spawn(async move {
                logger.send_notification(&notice, &channel, &chat_id).await;
            });
        }

        let logger = self.clone();
        let (channel, chat_id) = (channel.to_string(), chat_id.to_string());
        tokio::spawn(async move {
            logger.write_record(usage, &channel, &chat_id).await;
        });
    }
}

async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{line}\n").as_bytes()).await?;
    file.flush().await
}

fn ellipsize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}...")
}
