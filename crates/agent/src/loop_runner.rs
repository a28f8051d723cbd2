//! The agent iteration loop.

use hookclaw_config::{AgentSettings, AppConfig};
use hookclaw_core::bus::{InboundMessage, MessageBus, OutboundMessage};
use hookclaw_core::error::Result;
use hookclaw_core::message::{Message, Role};
use hookclaw_core::provider::{Provider, ProviderRequest};
use hookclaw_core::session::SessionStore;
use hookclaw_core::tool::{ToolCall, ToolRegistry, is_error_result};
use hookclaw_hooks::{HookOutcome, HookRegistry, InterceptionContext, Stage};
use hookclaw_tools::{ToolDispatcher, ToolUsageLogger};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::context::ContextBuilder;
use crate::structured::{Fragment, extract_between};

/// How long `run` waits on the inbound queue before rechecking `running`.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Words in the first line of the input that request a plan phase.
const PLAN_KEYWORDS: [&str; 2] = ["plan", "计划"];

const SYSTEM_CHANNEL: &str = "system";
const DEFAULT_ORIGIN_CHANNEL: &str = "cli";
const BACKGROUND_DONE: &str = "Background task completed.";
const UNCLEAR_PLAN: &str = "The plan is unclear.";
const DIGEST_HEADER: &str = "🔧 工具使用:";
const DIGEST_LINE_CHARS: usize = 70;

/// What the plan phase decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanOutcome {
    /// Not requested, or the planner reply was unusable.
    Skipped,
    /// The planner needs answers before any tool runs.
    Unclear(String),
    /// The plan was published and spliced into the turn. Carries the
    /// advisory tool allow-list, if the planner gave one.
    Ready { allow_list: Option<String> },
}

enum ActOutcome {
    Executed,
    Skipped(String),
    Aborted(String),
}

/// State of one turn.
struct Turn<'a> {
    msg: &'a InboundMessage,
    ctx: InterceptionContext,
    messages: Vec<Message>,
    /// One status line per executed tool call
    digest: Vec<String>,
    allow_list: Option<String>,
}

/// The core agent loop: drains the inbound queue and runs one turn per
/// message.
///
/// A turn is bounded by the round cap and policed by the hook registry:
///
/// ```text
///  plan (optional) ─▶ round: before_plan ─▶ model ─▶ per call: before_act ─▶ tool ─▶ after_act
///                        ╰─▶ compression (abort flag / force_summary / cap reached)
///                              ─▶ persist ─▶ outbound
/// ```
pub struct AgentLoop {
    bus: Arc<MessageBus>,
    provider: Arc<dyn Provider>,
    sessions: Arc<dyn SessionStore>,
    dispatcher: ToolDispatcher,
    /// Kept for `/restart`, which rotates the usage log
    usage_logger: Option<ToolUsageLogger>,
    hooks: Arc<HookRegistry>,
    context: ContextBuilder,
    model: String,
    planner_model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    settings: AgentSettings,
    abort: Arc<AtomicBool>,
    running: AtomicBool,
}

impl AgentLoop {
    /// Create a loop with the stock hook rules and default settings. Both
    /// models start as the provider's default model.
    pub fn new(
        bus: Arc<MessageBus>,
        provider: Arc<dyn Provider>,
        sessions: Arc<dyn SessionStore>,
        tools: Arc<ToolRegistry>,
        context: ContextBuilder,
    ) -> Self {
        let model = provider.default_model().to_string();
        Self {
            bus,
            provider,
            sessions,
            dispatcher: ToolDispatcher::new(tools),
            usage_logger: None,
            hooks: Arc::new(hookclaw_hooks::default_registry()),
            context,
            planner_model: model.clone(),
            model,
            temperature: 0.0,
            max_tokens: None,
            settings: AgentSettings::default(),
            abort: Arc::new(AtomicBool::new(false)),
            running: AtomicBool::new(false),
        }
    }

    /// Apply models, sampling and iteration settings from the configuration.
    pub fn with_config(self, config: &AppConfig) -> Self {
        self.with_model(&config.default_model)
            .with_planner_model(&config.planner_model)
            .with_sampling(config.temperature, Some(config.max_tokens))
            .with_settings(config.agent.clone())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_planner_model(mut self, model: impl Into<String>) -> Self {
        self.planner_model = model.into();
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: Option<u32>) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_settings(mut self, settings: AgentSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the stock hook rules.
    pub fn with_hooks(mut self, hooks: Arc<HookRegistry>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Report every tool call to `logger`.
    pub fn with_usage_logger(mut self, logger: ToolUsageLogger) -> Self {
        self.dispatcher = self.dispatcher.with_sink(Arc::new(logger.clone()));
        self.usage_logger = Some(logger);
        self
    }

    /// Setting this flag stops the current turn at the next round boundary
    /// and sends it through compression. Cleared when the next message is
    /// handled.
    pub fn abort_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.abort)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Drain the inbound queue until [`stop`](Self::stop) is called.
    pub async fn run(&self) {
        self.running.store(true, Ordering::SeqCst);
        info!(model = %self.model, "Agent loop started");

        while self.running.load(Ordering::SeqCst) {
            let msg = match tokio::time::timeout(POLL_INTERVAL, self.bus.consume_inbound()).await {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    warn!("Inbound queue closed");
                    break;
                }
                Err(_) => continue,
            };

            let reply = match self.handle(&msg).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!(session = %msg.session_key(), error = %e, "Error processing message");
                    Some(OutboundMessage::new(
                        &msg.channel,
                        &msg.chat_id,
                        format!("Sorry, I encountered an error: {e}"),
                    ))
                }
            };
            if let Some(reply) = reply
                && let Err(e) = self.bus.publish_outbound(reply).await
            {
                error!(error = %e, "Failed to publish response");
            }
        }
        info!("Agent loop stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        info!("Agent loop stopping");
    }

    /// Route one inbound message to command handling or a full turn.
    /// Clears the abort flag before routing.
    pub async fn handle(&self, msg: &InboundMessage) -> Result<Option<OutboundMessage>> {
        self.abort.store(false, Ordering::SeqCst);
        if msg.is_command() {
            return self.process_command(msg).await.map(Some);
        }
        self.process_message(msg).await
    }

    /// Run one turn. Returns `None` for a plan-only request (input ending in
    /// `plan` whose plan was published); any other turn gets a reply.
    pub async fn process_message(&self, msg: &InboundMessage) -> Result<Option<OutboundMessage>> {
        if msg.channel == SYSTEM_CHANNEL {
            return self.process_system_message(msg).await.map(Some);
        }

        let key = msg.session_key();
        let preview: String = msg.content.chars().take(80).collect();
        info!(session = %key, sender = %msg.sender_id, "Processing message: {preview}");

        let mut session = self.sessions.get_or_create(&key).await?;
        let history = session.history(self.settings.history_limit);
        let mut messages = self.context.build_messages(history.clone(), &msg.content, &msg.media);

        let allow_list = match self.plan(msg, history, &mut messages).await {
            PlanOutcome::Unclear(points) => {
                session.add_message(Role::User, &msg.content);
                session.add_message(Role::Assistant, &points);
                self.sessions.save(&session).await?;
                return Ok(Some(OutboundMessage::new(&msg.channel, &msg.chat_id, points)));
            }
            PlanOutcome::Ready { .. } if msg.content.ends_with("plan") => {
                info!(session = %key, "Plan-only request, stopping after the plan phase");
                return Ok(None);
            }
            PlanOutcome::Ready { allow_list } => allow_list,
            PlanOutcome::Skipped => None,
        };

        let cap = self.iteration_cap(&msg.content);
        let mut turn = Turn {
            msg,
            ctx: InterceptionContext::new(&msg.content),
            messages,
            digest: Vec::new(),
            allow_list,
        };

        let mut final_content = self.iterate(&mut turn, cap).await?;
        if self.needs_compression(&turn.ctx, final_content.as_deref(), cap) {
            info!(
                session = %key,
                force_summary = turn.ctx.force_summary,
                rounds = turn.ctx.loop_count,
                "Compressing turn"
            );
            final_content = Some(self.compress(&mut turn.messages).await?);
        }
        let content = final_content.unwrap_or_default();

        session.add_message(Role::User, &msg.content);
        session.add_message(Role::Assistant, &content);
        self.sessions.save(&session).await?;

        let mut reply = OutboundMessage::new(&msg.channel, &msg.chat_id, content);
        if !turn.digest.is_empty() {
            reply = reply.with_collapsible(render_digest(&turn.digest));
        }
        Ok(Some(reply))
    }

    /// Rounds until a final answer, an abort, or the cap.
    async fn iterate(&self, turn: &mut Turn<'_>, cap: u32) -> Result<Option<String>> {
        let tools = self.dispatcher.registry().definitions();

        while turn.ctx.loop_count < cap && !self.abort.load(Ordering::SeqCst) {
            if let HookOutcome::Abort(message) = self.hooks.trigger(Stage::BeforePlan, &mut turn.ctx) {
                return Ok(Some(message));
            }
            if let Some(guidance) = turn.ctx.take_guidance() {
                turn.messages.push(hint_message(&guidance));
            }

            let request = ProviderRequest::new(&self.model, turn.messages.clone())
                .with_tools(tools.clone())
                .with_sampling(self.temperature, self.max_tokens);
            let response = self.provider.chat(request).await?;
            if !response.has_tool_calls() {
                return Ok(Some(response.content));
            }

            let calls = response.tool_calls;
            debug!(round = turn.ctx.loop_count, calls = calls.len(), "Model requested tools");
            turn.messages
                .push(Message::assistant_with_tool_calls(response.content, calls.clone()));

            // Hint turns go after the whole batch so tool results stay
            // contiguous with the assistant record.
            let mut hints = Vec::new();
            for (i, call) in calls.iter().enumerate() {
                match self.act(turn, call).await {
                    ActOutcome::Executed => {}
                    ActOutcome::Skipped(hint) => hints.push(hint),
                    ActOutcome::Aborted(message) => {
                        for pending in &calls[i..] {
                            turn.messages.push(Message::tool_result(
                                &pending.id,
                                &pending.name,
                                "Skipped: turn aborted",
                            ));
                        }
                        return Ok(Some(message));
                    }
                }
            }
            turn.messages.extend(hints.iter().map(|h| hint_message(h)));
            turn.ctx.loop_count += 1;
        }
        Ok(None)
    }

    /// Police and run a single tool call.
    async fn act(&self, turn: &mut Turn<'_>, call: &ToolCall) -> ActOutcome {
        if let Some(allowed) = turn.allow_list.as_deref()
            && !allowed.contains(call.name.as_str())
        {
            warn!(tool = %call.name, "Tool is not in the plan's allow-list");
            self.notify(turn.msg, format!("{} not in allow({allowed})", call.name))
                .await;
        }

        turn.ctx.set_action(&call.name, call.arguments.clone());
        match self.hooks.trigger(Stage::BeforeAct, &mut turn.ctx) {
            HookOutcome::Abort(message) => return ActOutcome::Aborted(message),
            HookOutcome::Hint(message) => {
                turn.ctx.pending_guidance = None;
                turn.messages.push(Message::tool_result(
                    &call.id,
                    &call.name,
                    format!("Skipped by hook: {message}"),
                ));
                return ActOutcome::Skipped(message);
            }
            HookOutcome::Ok => {}
        }

        let result = self
            .dispatcher
            .execute(&call.name, call.arguments.clone(), &turn.msg.channel, &turn.msg.chat_id)
            .await;
        let icon = if is_error_result(&result) { "× " } else { "√ " };
        let line = format!("{icon}{}{}", call.name, call.arguments);
        debug!(tool = %call.name, "{line}");
        turn.digest.push(line);

        turn.ctx
            .record_execution(&call.name, call.arguments.clone(), result.clone());
        turn.messages
            .push(Message::tool_result(&call.id, &call.name, result));
        // after_act never changes control flow; a hint waits for the next round
        if let HookOutcome::Abort(message) = self.hooks.trigger(Stage::AfterAct, &mut turn.ctx) {
            debug!(tool = %call.name, "Ignoring after_act abort: {message}");
        }
        ActOutcome::Executed
    }

    /// Optional one-shot planner call. Planner failures never fail the turn.
    async fn plan(&self, msg: &InboundMessage, history: Vec<Message>, messages: &mut [Message]) -> PlanOutcome {
        let first_line = msg.content.lines().next().unwrap_or_default();
        if !PLAN_KEYWORDS.iter().any(|k| first_line.contains(k)) {
            return PlanOutcome::Skipped;
        }
        let Some(prompt) = self.context.plan_prompt() else {
            return PlanOutcome::Skipped;
        };

        info!(session = %msg.session_key(), model = %self.planner_model, "Running plan phase");
        let request = ProviderRequest::new(
            &self.planner_model,
            self.context.build_plan_messages(&prompt, history, &msg.content),
        )
        .with_sampling(self.temperature, self.max_tokens);
        let reply = match self.provider.chat(request).await {
            Ok(response) => response.content,
            Err(e) => {
                warn!(error = %e, "Plan phase failed, continuing without a plan");
                return PlanOutcome::Skipped;
            }
        };
        let fragment = match Fragment::parse(&reply) {
            Ok(fragment) => fragment,
            Err(e) => {
                warn!(error = %e, "Unparseable plan reply, continuing without a plan");
                return PlanOutcome::Skipped;
            }
        };

        if fragment
            .get("clarity")
            .is_some_and(|c| c.eq_ignore_ascii_case("false"))
        {
            let points = fragment.get_non_empty("unclear_points").unwrap_or(UNCLEAR_PLAN);
            info!(session = %msg.session_key(), "Plan is unclear, asking the user");
            return PlanOutcome::Unclear(points.to_string());
        }

        let field = |name| fragment.get(name).unwrap_or_default();
        let block = format!(
            "\n\n## Plan\n\n**Task:** {}\n\n**Tools and Actions:** {}\n\n**Warnings:** {}",
            field("task"),
            field("tools_and_actions"),
            field("warnings"),
        );
        self.notify(msg, block.trim_start()).await;
        if let Some(last) = messages.last_mut()
            && last.role == Role::User
        {
            last.content.push_str(&block);
        }

        PlanOutcome::Ready {
            allow_list: fragment.get_non_empty("tools_and_actions").map(str::to_string),
        }
    }

    /// Abort flag, `force_summary`, or the cap reached with no answer.
    fn needs_compression(&self, ctx: &InterceptionContext, final_content: Option<&str>, cap: u32) -> bool {
        self.abort.load(Ordering::SeqCst)
            || ctx.force_summary
            || (final_content.is_none() && ctx.loop_count >= cap)
    }

    /// One tool-less call that turns the conversation so far into an answer.
    async fn compress(&self, messages: &mut Vec<Message>) -> Result<String> {
        self.context.prepare_summary(messages);
        let request = ProviderRequest::new(&self.model, messages.clone())
            .with_sampling(self.temperature, self.max_tokens);
        let response = self.provider.chat(request).await?;
        Ok(read_summary(&response.content))
    }

    /// Handle a slash command. The reply goes back to the sending chat.
    pub async fn process_command(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        let command = msg.content.trim();
        let key = msg.session_key();
        info!(session = %key, command, "Processing command");

        let reply = match command {
            "/restart" => {
                self.restart_session(msg).await?;
                format!("{key} restart ok")
            }
            "/config" => format!(
                "config:\nmodel: {}\nplanner_model: {}",
                self.model, self.planner_model
            ),
            other => format!("{other} command not support"),
        };
        Ok(OutboundMessage::new(&msg.channel, &msg.chat_id, reply))
    }

    async fn restart_session(&self, msg: &InboundMessage) -> Result<()> {
        let key = msg.session_key();
        if let Some(archived) = self.sessions.rotate(&key).await? {
            info!(session = %key, archived = %archived, "Archived session");
        }
        if let Some(logger) = &self.usage_logger {
            match logger.rename_with_timestamp(&msg.channel, &msg.chat_id).await {
                Ok(Some(path)) => info!(session = %key, log = %path.display(), "Archived tool usage log"),
                Ok(None) => {}
                Err(e) => warn!(session = %key, error = %e, "Failed to archive tool usage log"),
            }
        }

        let mut session = self.sessions.get_or_create(&key).await?;
        session.clear();
        self.sessions.save(&session).await?;
        Ok(())
    }

    /// Background events. `chat_id` carries the origin as
    /// `channel:chat_id`; the answer is routed there.
    async fn process_system_message(&self, msg: &InboundMessage) -> Result<OutboundMessage> {
        let (origin_channel, origin_chat) = msg
            .chat_id
            .split_once(':')
            .unwrap_or((DEFAULT_ORIGIN_CHANNEL, msg.chat_id.as_str()));
        let key = format!("{origin_channel}:{origin_chat}");
        info!(sender = %msg.sender_id, origin = %key, "Processing system message");

        let mut session = self.sessions.get_or_create(&key).await?;
        let history = session.history(self.settings.history_limit);
        let mut messages = self.context.build_messages(history, &msg.content, &msg.media);
        let tools = self.dispatcher.registry().definitions();

        let mut final_content = None;
        for _ in 0..self.settings.max_tool_iterations {
            let request = ProviderRequest::new(&self.model, messages.clone())
                .with_tools(tools.clone())
                .with_sampling(self.temperature, self.max_tokens);
            let response = self.provider.chat(request).await?;
            if !response.has_tool_calls() {
                final_content = Some(response.content);
                break;
            }

            let calls = response.tool_calls;
            messages.push(Message::assistant_with_tool_calls(response.content, calls.clone()));
            for call in &calls {
                let result = self
                    .dispatcher
                    .execute(&call.name, call.arguments.clone(), origin_channel, origin_chat)
                    .await;
                messages.push(Message::tool_result(&call.id, &call.name, result));
            }
        }
        let content = final_content.unwrap_or_else(|| BACKGROUND_DONE.to_string());

        session.add_message(
            Role::User,
            format!("[System: {}] {}", msg.sender_id, msg.content),
        );
        session.add_message(Role::Assistant, &content);
        self.sessions.save(&session).await?;

        Ok(OutboundMessage::new(origin_channel, origin_chat, content))
    }

    /// Run one input outside the queue and return the reply text.
    ///
    /// `session_key` is `channel:chat_id` (bare ids use the `cli` channel).
    /// Input starting with `/` is handled as a command.
    pub async fn process_direct(&self, content: &str, session_key: &str) -> Result<String> {
        let (channel, chat_id) = session_key
            .split_once(':')
            .unwrap_or((DEFAULT_ORIGIN_CHANNEL, session_key));
        let mut msg = InboundMessage::new(channel, "user", chat_id, content);
        if content.trim_start().starts_with('/') {
            msg = msg.as_command();
        }
        let reply = self.handle(&msg).await?;
        Ok(reply.map(|r| r.content).unwrap_or_default())
    }

    fn iteration_cap(&self, content: &str) -> u32 {
        let marker = &self.settings.think_harder_marker;
        if !marker.is_empty() && content.trim().starts_with(marker.as_str()) {
            self.settings.think_harder_iterations
        } else {
            self.settings.max_tool_iterations
        }
    }

    async fn notify(&self, msg: &InboundMessage, content: impl Into<String>) {
        let notice = OutboundMessage::new(&msg.channel, &msg.chat_id, content);
        if let Err(e) = self.bus.publish_outbound(notice).await {
            warn!(error = %e, "Failed to publish notice");
        }
    }
}

fn hint_message(guidance: &str) -> Message {
    Message::user(format!("[Hint] {guidance}"))
}

fn render_digest(lines: &[String]) -> String {
    let mut digest = DIGEST_HEADER.to_string();
    for line in lines {
        digest.push('\n');
        digest.extend(line.chars().take(DIGEST_LINE_CHARS));
    }
    digest
}

/// The `summary` element of a compression reply, else the raw text between
/// the summary tags, else the whole reply.
fn read_summary(raw: &str) -> String {
    match Fragment::parse(raw) {
        Ok(fragment) => match fragment.get_non_empty("summary") {
            Some(summary) => {
                if let Some(analysis) = fragment.get_non_empty("analysis") {
                    info!("Compression analysis: {analysis}");
                }
                return summary.to_string();
            }
            None => warn!("Compression reply has no summary element"),
        },
        Err(e) => error!(error = %e, "Failed to parse compression reply"),
    }

    extract_between(raw, "summary")
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use hookclaw_core::tool::Tool;
    use hookclaw_hooks::FnHook;
    use hookclaw_session::InMemorySessionStore;
    use serde_json::json;

    struct Harness {
        agent: AgentLoop,
        bus: Arc<MessageBus>,
        provider: Arc<SequentialMockProvider>,
        sessions: Arc<InMemorySessionStore>,
        _workspace: tempfile::TempDir,
    }

    fn harness(responses: Vec<hookclaw_core::provider::ProviderResponse>, tools: Vec<Box<dyn Tool>>) -> Harness {
        let workspace = tempfile::tempdir().unwrap();
        let bus = Arc::new(MessageBus::new(64));
        let provider = Arc::new(SequentialMockProvider::new(responses));
        let sessions = Arc::new(InMemorySessionStore::new());
        let mut registry = ToolRegistry::new();
        for tool in tools {
            registry.register(tool);
        }
        let agent = AgentLoop::new(
            Arc::clone(&bus),
            provider.clone(),
            sessions.clone(),
            Arc::new(registry),
            ContextBuilder::new(workspace.path()),
        );
        Harness {
            agent,
            bus,
            provider,
            sessions,
            _workspace: workspace,
        }
    }

    fn inbound(content: &str) -> InboundMessage {
        InboundMessage::new("telegram", "u1", "42", content)
    }

    async fn drain(bus: &MessageBus) -> Vec<OutboundMessage> {
        let mut out = Vec::new();
        while let Some(msg) = bus.try_consume_outbound().await {
            out.push(msg);
        }
        out
    }

    fn settings(max: u32) -> AgentSettings {
        AgentSettings {
            max_tool_iterations: max,
            ..AgentSettings::default()
        }
    }

    #[tokio::test]
    async fn text_answer_is_final_and_persisted() {
        let h = harness(vec![make_text_response("Hello!")], vec![]);
        let reply = h.agent.process_message(&inbound("hi")).await.unwrap().unwrap();

        assert_eq!(reply.content, "Hello!");
        assert_eq!(reply.chat_id, "42");
        assert!(reply.collapsible().is_none());

        let session = h.sessions.get_or_create("telegram:42").await.unwrap();
        assert_eq!(session.len(), 2);
        assert_eq!(session.messages[0].content, "hi");
        assert_eq!(session.messages[1].content, "Hello!");
    }

    #[tokio::test]
    async fn stored_history_is_replayed() {
        let h = harness(
            vec![make_text_response("first"), make_text_response("second")],
            vec![],
        );
        h.agent.process_message(&inbound("one")).await.unwrap();
        h.agent.process_message(&inbound("two")).await.unwrap();

        let requests = h.provider.requests();
        let second: Vec<&str> = requests[1].messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(&second[1..], &["one", "first", "two"]);
        assert_eq!(requests[1].messages[0].role, Role::System);
    }

    #[tokio::test]
    async fn tool_round_then_answer_attaches_digest() {
        let tool = RecordingTool::new("lookup", "found it");
        let calls = tool.calls();
        let h = harness(
            vec![
                make_tool_call_response(vec![make_tool_call("c1", "lookup", json!({"q": "x"}))], ""),
                make_text_response("done"),
            ],
            vec![Box::new(tool)],
        );

        let reply = h.agent.process_message(&inbound("find x")).await.unwrap().unwrap();
        assert_eq!(reply.content, "done");
        assert_eq!(calls.lock().unwrap().len(), 1);
        assert_eq!(
            reply.collapsible(),
            Some("🔧 工具使用:\n√ lookup{\"q\":\"x\"}")
        );

        let last = &h.provider.requests()[1].messages;
        let result = last.last().unwrap();
        assert_eq!(result.role, Role::Tool);
        assert_eq!(result.tool_call_id.as_deref(), Some("c1"));
        assert_eq!(result.content, "found it");
    }

    #[tokio::test]
    async fn failed_tool_gets_cross_and_long_lines_are_cut() {
        let long_arg = "a".repeat(100);
        let h = harness(
            vec![
                make_tool_call_response(
                    vec![make_tool_call("c1", "missing_tool", json!({"arg": long_arg}))],
                    "",
                ),
                make_text_response("ok"),
            ],
            vec![],
        );

        let reply = h.agent.process_message(&inbound("go")).await.unwrap().unwrap();
        let digest = reply.collapsible().unwrap();
        let line = digest.lines().nth(1).unwrap();
        assert!(line.starts_with("× missing_tool"));
        assert_eq!(line.chars().count(), DIGEST_LINE_CHARS);

        let request = &h.provider.requests()[1];
        assert!(request.messages.last().unwrap().content.starts_with("Error"));
    }

    #[tokio::test]
    async fn loop_cap_triggers_single_compression() {
        let tool = RecordingTool::new("lookup", "more");
        let calls = tool.calls();
        let mut responses: Vec<_> = (0..3)
            .map(|i| make_tool_call_response(vec![make_tool_call(&format!("c{i}"), "lookup", json!({"n": i}))], ""))
            .collect();
        responses.push(make_text_response(
            "<analysis>three lookups</analysis><summary>Partial result</summary>",
        ));
        let h = harness(responses, vec![Box::new(tool)]);
        let agent = h.agent.with_settings(settings(3));

        let reply = agent.process_message(&inbound("keep going")).await.unwrap().unwrap();
        assert_eq!(reply.content, "Partial result");
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert_eq!(h.provider.call_count(), 4);

        let summary_request = h.provider.requests().pop().unwrap();
        assert!(summary_request.tools.is_empty());
        assert_eq!(
            summary_request.messages[0].content,
            agent.context.summary_system_prompt()
        );
        assert_eq!(
            summary_request.messages.last().unwrap().content,
            agent.context.summary_user_prompt()
        );
    }

    #[tokio::test]
    async fn think_harder_marker_widens_cap() {
        let mut responses: Vec<_> = (0..3)
            .map(|i| make_tool_call_response(vec![make_tool_call(&format!("c{i}"), "lookup", json!({}))], ""))
            .collect();
        responses.push(make_text_response("finished"));
        let h = harness(responses, vec![Box::new(RecordingTool::new("lookup", "r"))]);
        let agent = h.agent.with_settings(AgentSettings {
            max_tool_iterations: 2,
            think_harder_iterations: 5,
            ..AgentSettings::default()
        });

        let reply = agent
            .process_message(&inbound("  好好想想 what is wrong"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, "finished");
        assert_eq!(h.provider.call_count(), 4);
    }

    #[tokio::test]
    async fn before_act_abort_stops_all_execution() {
        let tool = RecordingTool::new("exec", "should not run");
        let calls = tool.calls();
        let h = harness(
            vec![make_tool_call_response(
                vec![
                    make_tool_call("c1", "exec", json!({"command": "cat ~/.ssh/id_rsa"})),
                    make_tool_call("c2", "exec", json!({"command": "ls"})),
                ],
                "",
            )],
            vec![Box::new(tool)],
        );

        let reply = h.agent.process_message(&inbound("show my key")).await.unwrap().unwrap();
        assert_eq!(reply.content, "Access to sensitive files is forbidden");
        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(h.provider.call_count(), 1);
        assert!(reply.collapsible().is_none());
    }

    #[tokio::test]
    async fn before_plan_abort_ends_turn_without_model_call() {
        let mut hooks = HookRegistry::new();
        hooks.register(
            Stage::BeforePlan,
            FnHook::new("closed", |_: &InterceptionContext| HookOutcome::abort("Closed for maintenance")),
        );
        let h = harness(vec![], vec![]);
        let agent = h.agent.with_hooks(Arc::new(hooks));

        let reply = agent.process_message(&inbound("hi")).await.unwrap().unwrap();
        assert_eq!(reply.content, "Closed for maintenance");
        assert_eq!(h.provider.call_count(), 0);
    }

    #[tokio::test]
    async fn hint_skips_call_and_keeps_history_unchanged() {
        let mut hooks = HookRegistry::new();
        hooks.register(
            Stage::BeforeAct,
            FnHook::new("no_deletes", |ctx: &InterceptionContext| {
                if ctx.is_action("delete") {
                    HookOutcome::hint("use trash instead")
                } else {
                    HookOutcome::Ok
                }
            }),
        );
        hooks.register(
            Stage::AfterAct,
            FnHook::new("history_probe", |ctx: &InterceptionContext| {
                assert!(ctx.action_history.iter().all(|a| a.name != "delete"));
                HookOutcome::Ok
            }),
        );
        let delete = RecordingTool::new("delete", "deleted");
        let deleted = delete.calls();
        let h = harness(
            vec![
                make_tool_call_response(
                    vec![
                        make_tool_call("c1", "delete", json!({"path": "a.txt"})),
                        make_tool_call("c2", "lookup", json!({})),
                    ],
                    "",
                ),
                make_text_response("ok"),
            ],
            vec![Box::new(delete), Box::new(RecordingTool::new("lookup", "r"))],
        );
        let agent = h.agent.with_hooks(Arc::new(hooks));

        let reply = agent.process_message(&inbound("clean")).await.unwrap().unwrap();
        assert_eq!(reply.content, "ok");
        assert!(deleted.lock().unwrap().is_empty());
        // only the executed call shows up in the digest
        assert_eq!(reply.collapsible(), Some("🔧 工具使用:\n√ lookup{}"));

        let second = &h.provider.requests()[1].messages;
        let n = second.len();
        assert_eq!(second[n - 3].content, "Skipped by hook: use trash instead");
        assert_eq!(second[n - 3].tool_call_id.as_deref(), Some("c1"));
        assert_eq!(second[n - 2].content, "r");
        assert_eq!(second[n - 1].role, Role::User);
        assert_eq!(second[n - 1].content, "[Hint] use trash instead");
        assert_eq!(second.iter().filter(|m| m.content.starts_with("[Hint]")).count(), 1);
    }

    #[tokio::test]
    async fn edit_without_read_is_skipped_with_path() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "old line\n").unwrap();
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(hookclaw_tools::file_read::FileReadTool::with_base_dir(dir.path())));
        registry.register(Box::new(hookclaw_tools::file_edit::FileEditTool::with_base_dir(dir.path())));

        let edit = || make_tool_call("e", "edit_file", json!({"path": "notes.md", "old_text": "old", "new_text": "new"}));
        let provider = Arc::new(SequentialMockProvider::new(vec![
            make_tool_call_response(vec![edit()], ""),
            make_tool_call_response(vec![make_tool_call("r", "read_file", json!({"path": "notes.md"}))], ""),
            make_tool_call_response(vec![edit()], ""),
            make_text_response("edited"),
        ]));
        let agent = AgentLoop::new(
            Arc::new(MessageBus::new(16)),
            provider.clone(),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(registry),
            ContextBuilder::new(dir.path()),
        );

        let reply = agent.process_message(&inbound("fix the notes")).await.unwrap().unwrap();
        assert_eq!(reply.content, "edited");

        let second = &provider.requests()[1].messages;
        let skip = second.iter().find(|m| m.role == Role::Tool).unwrap();
        assert!(skip.content.starts_with("Skipped by hook:"));
        assert!(skip.content.contains("notes.md"));
        assert!(second.last().unwrap().content.starts_with("[Hint] "));

        assert_eq!(std::fs::read_to_string(dir.path().join("notes.md")).unwrap(), "new line\n");
    }

    #[tokio::test]
    async fn external_abort_compresses_immediately() {
        let h = harness(
            vec![make_text_response("<summary>Stopped early</summary>")],
            vec![],
        );
        h.agent.abort_handle().store(true, Ordering::SeqCst);

        let reply = h.agent.process_message(&inbound("long task")).await.unwrap().unwrap();
        assert_eq!(reply.content, "Stopped early");
        assert_eq!(h.provider.call_count(), 1);
        assert!(h.provider.requests()[0].tools.is_empty());
    }

    #[test]
    fn compression_triggers() {
        let h = harness(vec![], vec![]);
        let mut ctx = InterceptionContext::new("task");
        ctx.loop_count = 2;

        assert!(!h.agent.needs_compression(&ctx, Some("answer"), 3));
        assert!(!h.agent.needs_compression(&ctx, None, 3));
        assert!(h.agent.needs_compression(&ctx, None, 2));

        ctx.force_summary = true;
        assert!(h.agent.needs_compression(&ctx, Some("answer"), 3));

        ctx.force_summary = false;
        h.agent.abort_handle().store(true, Ordering::SeqCst);
        assert!(h.agent.needs_compression(&ctx, Some("answer"), 3));
    }

    #[test]
    fn summary_fallbacks() {
        assert_eq!(read_summary("<analysis>x</analysis><summary>y</summary>"), "y");
        assert_eq!(read_summary("<analysis>a < b</analysis><summary>kept</summary>"), "kept");
        assert_eq!(read_summary("<summary>unterminated <b></summary>"), "unterminated <b>");
        assert_eq!(read_summary("no structure at all"), "no structure at all");
        assert_eq!(read_summary("<summary></summary>"), "<summary></summary>");
    }

    #[tokio::test]
    async fn plan_only_request_stops_after_plan() {
        let h = harness(
            vec![make_text_response(
                "<clarity>true</clarity><task>Fix the build</task>\
                 <tools_and_actions>exec cargo build</tools_and_actions><warnings>none</warnings>",
            )],
            vec![],
        );

        let reply = h.agent.process_message(&inbound("fix the build plan")).await.unwrap();
        assert!(reply.is_none());
        assert_eq!(h.provider.call_count(), 1);

        let notices = drain(&h.bus).await;
        assert_eq!(notices.len(), 1);
        assert!(notices[0].content.starts_with("## Plan"));
        assert!(notices[0].content.contains("**Task:** Fix the build"));
        assert!(h.sessions.get_or_create("telegram:42").await.unwrap().is_empty());

        let plan_request = &h.provider.requests()[0];
        assert!(plan_request.tools.is_empty());
        assert!(plan_request.messages.last().unwrap().content.ends_with("## User Task\n\nfix the build plan"));
    }

    #[tokio::test]
    async fn plan_is_spliced_and_allow_list_is_advisory() {
        let tool = RecordingTool::new("exec", "ok");
        let calls = tool.calls();
        let h = harness(
            vec![
                make_text_response(
                    "<clarity>TRUE</clarity><task>List files</task>\
                     <tools_and_actions>read_file</tools_and_actions><warnings></warnings>",
                ),
                make_tool_call_response(vec![make_tool_call("c1", "exec", json!({"command": "ls"}))], ""),
                make_text_response("listed"),
            ],
            vec![Box::new(tool)],
        );
        let agent = h.agent.with_planner_model("planner-x");

        let reply = agent
            .process_message(&inbound("plan: list the files\nplease"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, "listed");
        assert_eq!(calls.lock().unwrap().len(), 1);

        let requests = h.provider.requests();
        assert_eq!(requests[0].model, "planner-x");
        assert_eq!(requests[1].model, "mock-model");
        let user_turn = requests[1].messages.last().unwrap();
        assert!(user_turn.content.starts_with("plan: list the files\nplease\n\n## Plan"));
        assert!(user_turn.content.contains("**Tools and Actions:** read_file"));

        let notices: Vec<String> = drain(&h.bus).await.into_iter().map(|m| m.content).collect();
        assert_eq!(notices.len(), 2);
        assert_eq!(notices[1], "exec not in allow(read_file)");
    }

    #[tokio::test]
    async fn unclear_plan_asks_user_and_stops() {
        let h = harness(
            vec![make_text_response(
                "<clarity>False</clarity><unclear_points>Which branch?</unclear_points>",
            )],
            vec![],
        );

        let reply = h.agent.process_message(&inbound("计划 deploy it")).await.unwrap().unwrap();
        assert_eq!(reply.content, "Which branch?");
        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(h.sessions.get_or_create("telegram:42").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unclear_plan_without_points_uses_default() {
        let h = harness(vec![make_text_response("<clarity>false</clarity>")], vec![]);
        let reply = h.agent.process_message(&inbound("plan it")).await.unwrap().unwrap();
        assert_eq!(reply.content, UNCLEAR_PLAN);
    }

    #[tokio::test]
    async fn broken_plan_reply_falls_through_to_iteration() {
        let h = harness(
            vec![make_text_response("<task>oops</warnings>"), make_text_response("answered")],
            vec![],
        );
        let reply = h.agent.process_message(&inbound("plan a trip\nto Rome")).await.unwrap().unwrap();
        assert_eq!(reply.content, "answered");
        assert!(drain(&h.bus).await.is_empty());
    }

    #[tokio::test]
    async fn plan_word_past_first_line_runs_a_normal_turn() {
        let h = harness(vec![make_text_response("Summary, then the plan")], vec![]);

        let reply = h
            .agent
            .process_message(&inbound("summarize the doc\nthen tell me the plan"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.content, "Summary, then the plan");
        assert_eq!(h.provider.call_count(), 1);
        assert_eq!(h.provider.requests()[0].model, "mock-model");
        assert_eq!(h.sessions.get_or_create("telegram:42").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn planner_failure_on_plan_only_input_still_answers() {
        let workspace = tempfile::tempdir().unwrap();
        let provider = Arc::new(
            SequentialMockProvider::new(vec![make_text_response("deployed")]).failing_first(1),
        );
        let sessions = Arc::new(InMemorySessionStore::new());
        let bus = Arc::new(MessageBus::new(16));
        let agent = AgentLoop::new(
            Arc::clone(&bus),
            provider.clone(),
            sessions.clone(),
            Arc::new(ToolRegistry::new()),
            ContextBuilder::new(workspace.path()),
        );

        let reply = agent.process_message(&inbound("deploy plan")).await.unwrap().unwrap();
        assert_eq!(reply.content, "deployed");
        assert_eq!(provider.call_count(), 2);
        assert!(drain(&bus).await.is_empty());
        assert_eq!(sessions.get_or_create("telegram:42").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unparseable_plan_on_plan_only_input_still_answers() {
        let h = harness(
            vec![make_text_response("<task>oops</warnings>"), make_text_response("answered")],
            vec![],
        );
        let reply = h.agent.process_message(&inbound("release plan")).await.unwrap().unwrap();
        assert_eq!(reply.content, "answered");
        assert_eq!(h.provider.call_count(), 2);
    }

    #[tokio::test]
    async fn after_act_outcomes_do_not_change_control_flow() {
        let mut hooks = HookRegistry::new();
        hooks.register(
            Stage::AfterAct,
            FnHook::new("after_act_verdicts", |ctx: &InterceptionContext| {
                match ctx.action.as_deref() {
                    Some("first") => HookOutcome::abort("stop everything"),
                    Some("second") => HookOutcome::hint("double-check the output"),
                    _ => HookOutcome::Ok,
                }
            }),
        );
        let first = RecordingTool::new("first", "one");
        let second = RecordingTool::new("second", "two");
        let (first_calls, second_calls) = (first.calls(), second.calls());
        let h = harness(
            vec![
                make_tool_call_response(
                    vec![
                        make_tool_call("c1", "first", json!({})),
                        make_tool_call("c2", "second", json!({})),
                    ],
                    "",
                ),
                make_text_response("both ran"),
            ],
            vec![Box::new(first), Box::new(second)],
        );
        let agent = h.agent.with_hooks(Arc::new(hooks));

        let reply = agent.process_message(&inbound("run both")).await.unwrap().unwrap();
        assert_eq!(reply.content, "both ran");
        assert_eq!(first_calls.lock().unwrap().len(), 1);
        assert_eq!(second_calls.lock().unwrap().len(), 1);
        assert_eq!(h.provider.call_count(), 2);
        assert_eq!(reply.collapsible(), Some("🔧 工具使用:\n√ first{}\n√ second{}"));

        // The abort is dropped; the hint becomes guidance for the next round.
        let next_round = &h.provider.requests()[1].messages;
        let n = next_round.len();
        assert_eq!(next_round[n - 3].content, "one");
        assert_eq!(next_round[n - 2].content, "two");
        assert_eq!(next_round[n - 1].role, Role::User);
        assert_eq!(next_round[n - 1].content, "[Hint] double-check the output");
        assert!(next_round.iter().all(|m| !m.content.contains("stop everything")));
    }

    #[tokio::test]
    async fn stale_abort_is_cleared_for_the_next_message() {
        let h = harness(vec![make_text_response("fresh answer")], vec![]);
        h.agent.abort_handle().store(true, Ordering::SeqCst);

        let reply = h.agent.handle(&inbound("hi")).await.unwrap().unwrap();
        assert_eq!(reply.content, "fresh answer");
        assert!(!h.agent.abort_handle().load(Ordering::SeqCst));

        // A real round ran instead of compression.
        let request = &h.provider.requests()[0];
        assert_eq!(request.messages.last().unwrap().content, "hi");
    }

    #[tokio::test]
    async fn commands() {
        let h = harness(vec![make_text_response("hello")], vec![]);
        h.agent.process_message(&inbound("hi")).await.unwrap();
        h.agent.abort_handle().store(true, Ordering::SeqCst);

        let restart = h.agent.handle(&inbound("/restart").as_command()).await.unwrap().unwrap();
        assert_eq!(restart.content, "telegram:42 restart ok");
        assert!(!h.agent.abort_handle().load(Ordering::SeqCst));
        assert!(h.sessions.get_or_create("telegram:42").await.unwrap().is_empty());
        assert_eq!(
            h.sessions.get_or_create("telegram:42#1").await.unwrap().len(),
            2
        );

        let config = h.agent.handle(&inbound("/config").as_command()).await.unwrap().unwrap();
        assert!(config.content.starts_with("config:\nmodel: mock-model"));

        let unknown = h.agent.handle(&inbound("/dance").as_command()).await.unwrap().unwrap();
        assert_eq!(unknown.content, "/dance command not support");
    }

    #[tokio::test]
    async fn restart_rotates_usage_log() {
        let logs = tempfile::tempdir().unwrap();
        let logger = ToolUsageLogger::new(
            hookclaw_config::ToolLoggingConfig {
                enabled: true,
                ..Default::default()
            },
            logs.path(),
        );
        let log_path = logger.log_file_path("telegram", "42");
        std::fs::write(&log_path, "{}\n").unwrap();

        let h = harness(vec![], vec![]);
        let agent = h.agent.with_usage_logger(logger);
        agent.process_command(&inbound("/restart")).await.unwrap();

        assert!(!log_path.exists());
        assert_eq!(std::fs::read_dir(logs.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn system_message_routes_to_origin() {
        let tool = RecordingTool::new("lookup", "r");
        let calls = tool.calls();
        let h = harness(
            vec![
                make_tool_call_response(vec![make_tool_call("c1", "lookup", json!({}))], ""),
                make_text_response(""),
            ],
            vec![Box::new(tool)],
        );

        let msg = InboundMessage::new("system", "cron", "telegram:42", "nightly report");
        let reply = h.agent.process_message(&msg).await.unwrap().unwrap();
        assert_eq!(reply.channel, "telegram");
        assert_eq!(reply.chat_id, "42");
        assert_eq!(reply.content, "");
        assert_eq!(calls.lock().unwrap().len(), 1);

        let session = h.sessions.get_or_create("telegram:42").await.unwrap();
        assert_eq!(session.messages[0].content, "[System: cron] nightly report");
    }

    #[tokio::test]
    async fn system_message_defaults_and_cap() {
        let h = harness(
            vec![
                make_tool_call_response(vec![make_tool_call("c1", "lookup", json!({}))], ""),
                make_tool_call_response(vec![make_tool_call("c2", "lookup", json!({}))], ""),
            ],
            vec![Box::new(RecordingTool::new("lookup", "r"))],
        );
        let agent = h.agent.with_settings(settings(2));

        let msg = InboundMessage::new("system", "subagent", "direct", "done");
        let reply = agent.process_message(&msg).await.unwrap().unwrap();
        assert_eq!(reply.channel, "cli");
        assert_eq!(reply.chat_id, "direct");
        assert_eq!(reply.content, BACKGROUND_DONE);
        assert_eq!(h.provider.call_count(), 2);
    }

    #[tokio::test]
    async fn process_direct_uses_session_key() {
        let h = harness(vec![make_text_response("pong")], vec![]);
        assert_eq!(h.agent.process_direct("ping", "cli:tests").await.unwrap(), "pong");
        assert_eq!(h.sessions.get_or_create("cli:tests").await.unwrap().len(), 2);
        assert_eq!(
            h.agent.process_direct("/nope", "cli:tests").await.unwrap(),
            "/nope command not support"
        );
    }

    #[tokio::test]
    async fn run_loop_answers_and_reports_errors() {
        let bus = Arc::new(MessageBus::new(16));
        let workspace = tempfile::tempdir().unwrap();
        let agent = Arc::new(AgentLoop::new(
            Arc::clone(&bus),
            Arc::new(FailingProvider),
            Arc::new(InMemorySessionStore::new()),
            Arc::new(ToolRegistry::new()),
            ContextBuilder::new(workspace.path()),
        ));

        let runner = Arc::clone(&agent);
        let handle = tokio::spawn(async move { runner.run().await });

        bus.publish_inbound(inbound("hi")).await.unwrap();
        let reply = bus.consume_outbound().await.unwrap();
        assert!(reply.content.starts_with("Sorry, I encountered an error:"));
        assert!(reply.content.contains("connection refused"));

        bus.publish_inbound(inbound("/config").as_command()).await.unwrap();
        let reply = bus.consume_outbound().await.unwrap();
        assert!(reply.content.starts_with("config:"));

        agent.stop();
        handle.await.unwrap();
    }
}
