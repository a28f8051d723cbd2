//! Tool dispatch — run a tool by name and report its usage.

use hookclaw_core::tool::ToolRegistry;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::usage::{NoopUsageSink, ToolUsage, UsageSink};

/// Executes tools from a registry and hands a [`ToolUsage`] record for
/// every call to the configured sink.
#[derive(Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    sink: Arc<dyn UsageSink>,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            sink: Arc::new(NoopUsageSink),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn UsageSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run `tool_name` and return its result text.
    ///
    /// Failures come back as `Error…` strings from the registry; this never
    /// fails. The usage record is timestamped at the start of the call.
    pub async fn execute(
        &self,
        tool_name: &str,
        params: serde_json::Value,
        channel: &str,
        chat_id: &str,
    ) -> String {
        let started_at = chrono::Utc::now();
        let clock = Instant::now();
        let result = self.registry.execute(tool_name, params.clone()).await;
        let elapsed = clock.elapsed();

        debug!(
            tool = tool_name,
            elapsed_ms = elapsed.as_millis() as u64,
            result_len = result.len(),
            "Tool finished"
        );

        let usage = ToolUsage::new(tool_name, params, result.clone(), format!("{channel}:{chat_id}"))
            .with_timestamp(started_at)
            .with_duration(elapsed);
        self.sink.log_usage(usage, channel, chat_id).await;

        result
    }
}
