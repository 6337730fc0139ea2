//! Runtime orchestration loop for conversation, tools, and the approval gate.

use std::sync::Arc;
use std::time::Duration;

use proto::{
    AgentMessage, ApprovalError, ApprovalPolicy, ChannelId, LlmError, ReviewDecision,
    ReviewHandler, ReviewRequest, Role, SessionId, ToolResult,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::{
    llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, TokenUsage},
    memory::SqliteMemory,
    tool_registry::ToolRegistry,
};

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are duka, a customer order assistant.
You can look up orders and collect payments through the available tools.
Payments are initiated with an M-Pesa STK push and always require explicit
human approval before they are sent. Never claim a payment has been made
unless the tool result confirms it."#;
const MAX_CONTEXT_MESSAGES: usize = 40;
const MAX_TOOL_RESULT_CHARS: usize = 16_000;

/// Outcome of consulting the approval gate for one tool call.
enum GateOutcome {
    /// Execute with these arguments (original or reviewer-edited).
    Execute(Value),
    /// Do not execute; record this text as a failed tool result.
    Rejected(String),
}

/// The main agent runtime: manages the ReAct loop
pub struct AgentRuntime {
    llm: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    memory: Arc<SqliteMemory>,
    model: String,
    temperature: Option<f32>,
    max_tool_rounds: usize,
    /// Which tool calls must be reviewed before execution.
    policy: ApprovalPolicy,
    /// Handler that obtains a decision for gated calls.
    review: Arc<dyn ReviewHandler>,
    /// Optional deadline for a review; expiry rejects the call.
    review_timeout: Option<Duration>,
}

impl AgentRuntime {
    /// Creates a new agent runtime with LLM provider, tools, memory, and
    /// the approval gate configuration.
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        memory: Arc<SqliteMemory>,
        model: impl Into<String>,
        max_tool_rounds: usize,
        policy: ApprovalPolicy,
        review: Arc<dyn ReviewHandler>,
    ) -> Self {
        Self {
            llm,
            tools,
            memory,
            model: model.into(),
            temperature: None,
            max_tool_rounds,
            policy,
            review,
            review_timeout: None,
        }
    }

    /// Sets the sampling temperature passed to the LLM.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets a deadline for reviews; when it expires the gated call is
    /// rejected. Without a deadline the runtime waits indefinitely.
    pub fn with_review_timeout(mut self, timeout: Duration) -> Self {
        self.review_timeout = Some(timeout);
        self
    }

    pub fn memory(&self) -> &Arc<SqliteMemory> {
        &self.memory
    }

    /// Applies the approval gate to one proposed tool call.
    ///
    /// Non-gated tools pass straight through with their original
    /// arguments. Gated tools suspend on the review handler; the returned
    /// decision is validated against the tool's rule, and any decision
    /// outside the allowed set fails closed.
    async fn gate_tool_call(&self, call_id: &str, tool_name: &str, arguments: &Value) -> GateOutcome {
        let Some(rule) = self.policy.rule(tool_name) else {
            return GateOutcome::Execute(arguments.clone());
        };

        let req = ReviewRequest::new(
            self.policy.description_prefix(),
            call_id,
            tool_name,
            arguments.clone(),
            rule.allowed_decisions.clone(),
        );
        info!("Review requested for tool {tool_name} (call_id: {call_id})");

        let decision = match self.review_timeout {
            Some(deadline) => {
                match tokio::time::timeout(deadline, self.review.request_review(req)).await {
                    Ok(decision) => decision,
                    Err(_) => {
                        let err = ApprovalError::Timeout(deadline.as_secs());
                        warn!("Review for {tool_name} (call_id: {call_id}) timed out");
                        return GateOutcome::Rejected(err.to_string());
                    }
                }
            }
            None => self.review.request_review(req).await,
        };

        if !rule.allows(decision.kind()) {
            let err = ApprovalError::DecisionNotAllowed {
                tool: tool_name.to_string(),
                decision: decision.kind(),
            };
            error!("Review returned a disallowed decision: {err}");
            return GateOutcome::Rejected(format!("Configuration error: {err}"));
        }

        match decision {
            ReviewDecision::Approve => {
                info!("Tool {tool_name} (call_id: {call_id}) approved");
                GateOutcome::Execute(arguments.clone())
            }
            ReviewDecision::Edit(edited) => {
                info!("Tool {tool_name} (call_id: {call_id}) approved with edited arguments");
                GateOutcome::Execute(edited)
            }
            ReviewDecision::Reject => {
                info!("Tool {tool_name} (call_id: {call_id}) rejected");
                GateOutcome::Rejected("Tool call rejected by reviewer".to_string())
            }
        }
    }

    /// Process a user message and return the agent's final text response
    pub async fn process(
        &self,
        channel_id: &ChannelId,
        session_id: &SessionId,
        user_message: &str,
    ) -> Result<(String, TokenUsage), proto::Error> {
        // Ensure session exists
        self.memory
            .ensure_session(session_id, channel_id.as_str())
            .await
            .map_err(proto::Error::Database)?;

        // Save user message
        let user_msg = AgentMessage::new(session_id.clone(), Role::User, user_message);
        self.memory
            .save_message(&user_msg)
            .await
            .map_err(proto::Error::Database)?;

        // Load conversation history
        let history = self
            .memory
            .load_session(session_id)
            .await
            .map_err(proto::Error::Database)?;

        let history = trim_session_history(history);

        let mut messages = history_to_chat_messages(DEFAULT_SYSTEM_PROMPT, &history);

        // ReAct loop
        let tool_defs = self.tools.definitions();
        let mut round = 0;
        let mut total_usage = TokenUsage::default();

        loop {
            if round >= self.max_tool_rounds {
                warn!(
                    "Max tool rounds ({}) reached for session {session_id}",
                    self.max_tool_rounds
                );
                return Err(proto::Error::Llm(LlmError::MaxToolRoundsExceeded));
            }
            let req = ChatRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
                model: self.model.clone(),
                temperature: self.temperature,
            };
            debug!("LLM call (round {round}) for session {session_id}");
            let response = self.llm.chat(req).await.map_err(proto::Error::Llm)?;

            match response {
                ChatResponse::Text(text, usage) => {
                    info!("Agent final response for session {session_id}: {text:.50}...");
                    total_usage.add(&usage);
                    // Save assistant response
                    let assistant_msg =
                        AgentMessage::new(session_id.clone(), Role::Assistant, &text);
                    self.memory
                        .save_message(&assistant_msg)
                        .await
                        .map_err(proto::Error::Database)?;

                    self.memory
                        .touch_session(session_id)
                        .await
                        .map_err(proto::Error::Database)?;

                    return Ok((text, total_usage));
                }

                ChatResponse::ToolCalls(tool_calls, usage) => {
                    debug!(
                        "Tool calls requested: {:?}",
                        tool_calls.iter().map(|tc| &tc.name).collect::<Vec<_>>()
                    );
                    total_usage.add(&usage);
                    // Persist assistant tool-call message so replayed history remains valid.
                    let assistant_tool_calls_msg =
                        AgentMessage::assistant_tool_calls(session_id.clone(), tool_calls.clone());
                    self.memory
                        .save_message(&assistant_tool_calls_msg)
                        .await
                        .map_err(proto::Error::Database)?;
                    // Add assistant message with tool calls to history
                    let assistant_msg = ChatMessage {
                        role: Role::Assistant,
                        content: String::new(),
                        tool_call_id: None,
                        tool_name: None,
                        tool_calls: Some(tool_calls.clone()),
                    };
                    messages.push(assistant_msg);
                    for tc in &tool_calls {
                        // The approval gate decides whether (and with which
                        // arguments) this call may execute.
                        let result = match self
                            .gate_tool_call(&tc.id, &tc.name, &tc.arguments)
                            .await
                        {
                            GateOutcome::Execute(args) => {
                                self.tools.execute(&tc.id, &tc.name, args).await
                            }
                            GateOutcome::Rejected(reason) => {
                                ToolResult::error(&tc.id, &tc.name, reason)
                            }
                        };

                        // Save tool result message to memory
                        let tool_msg = AgentMessage::tool_result(
                            session_id.clone(),
                            &tc.id,
                            &tc.name,
                            &result.output,
                        );
                        self.memory
                            .save_message(&tool_msg)
                            .await
                            .map_err(proto::Error::Database)?;
                        // Add to in-memory conversation
                        let llm_output = truncate_tool_result(&result.output, MAX_TOOL_RESULT_CHARS);
                        messages.push(ChatMessage::tool_result(&tc.id, &tc.name, &llm_output));
                    }
                    round += 1;
                }
            }
        }
    }
}

/// Trims loaded session history to stay within context limits while preserving
/// message-sequence integrity around user boundaries.
fn trim_session_history(history: Vec<AgentMessage>) -> Vec<AgentMessage> {
    if history.len() <= MAX_CONTEXT_MESSAGES {
        return history;
    }

    let start = history.len() - MAX_CONTEXT_MESSAGES;
    // Advance to next User boundary to preserve tool-call integrity.
    let offset = history[start..]
        .iter()
        .position(|m| m.role == Role::User)
        .unwrap_or(0);
    history[start + offset..].to_vec()
}

/// Converts persisted session history into model input messages, including
/// tool-output truncation safeguards.
fn history_to_chat_messages(system_prompt: &str, history: &[AgentMessage]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = vec![ChatMessage::system(system_prompt)];
    for msg in history {
        match msg.role {
            Role::User => messages.push(ChatMessage::user(&msg.content)),
            Role::Assistant => {
                let mut assistant = ChatMessage::assistant(&msg.content);
                assistant.tool_calls = msg.tool_calls.clone();
                messages.push(assistant);
            }
            Role::Tool => {
                let content = truncate_tool_result(&msg.content, MAX_TOOL_RESULT_CHARS);
                messages.push(ChatMessage::tool_result(
                    msg.tool_call_id.as_deref().unwrap_or(""),
                    msg.tool_name.as_deref().unwrap_or(""),
                    &content,
                ));
            }
            Role::System => {} // skip stored system messages
        }
    }
    messages
}

/// Truncates a tool result to at most `max_chars` characters.
/// If the result is longer, it appends a note with how many characters were cut.
fn truncate_tool_result(output: &str, max_chars: usize) -> String {
    let total_chars = output.chars().count();
    if total_chars <= max_chars {
        return output.to_string();
    }

    let kept = output.chars().take(max_chars).collect::<String>();
    let cut = total_chars - max_chars;
    format!("{kept}\n...[output truncated: {cut} chars omitted]")
}
