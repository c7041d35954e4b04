//! Agentic orchestrator, the single canonical agentic loop.
//!
//! `Agent` owns the conversation and drives it through rounds:
//! request the model, assemble its response, dispatch the tool calls it
//! asked for, feed the results back, until the model stops calling tools.
//!
//! ```text
//!  ┌─────────────┐   ModelRequest    ┌─────────────┐
//!  │    Agent    │ ────────────────► │ ModelClient │
//!  │             │ ◄──────────────── │             │
//!  └─────────────┘    StreamPart     └─────────────┘
//!     │      ▲
//!     │ call │ ToolResult
//!     ▼      │
//!  ┌─────────────┐  PendingConfirmation  ┌──────────────────┐
//!  │ Dispatcher  │ ────────────────────► │ ConfirmationGate │
//!  └─────────────┘                       └──────────────────┘
//! ```
//!
//! Callers observe a turn through `AgentEvent`s or collect its entries with
//! `process_user_message`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ai::client::{ModelClient, ModelError, ModelRequest, DEFAULT_MODEL};
use crate::ai::streaming::StreamPart;
use crate::ai::types::{AiTool, Content, ModelMessage, Role, ToolCallRequest};
use crate::tools::implementations::BashTool;
use crate::tools::registry::{Tool, ToolContext, ToolResult};

use super::cancellation::{AgentCancellation, TurnToken};
use super::conversation::{ConversationEntry, ConversationLog};
use super::dispatcher::{ToolDispatcher, CANCELLED_MESSAGE, DEFAULT_TOOL_TIMEOUT};
use super::loop_events::{AgentEvent, TurnOutcome};
use super::state::AgentState;
use super::stream::{self, StreamOutcome, STREAM_TIMEOUT};

pub const DEFAULT_MAX_ROUNDS: usize = 400;

pub const ROUND_LIMIT_MESSAGE: &str =
    "Maximum tool execution rounds reached. Stopping to prevent infinite loops.";

/// Configuration for an agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: String,
    /// Tool rounds allowed per user message
    pub max_rounds: usize,
    pub system_prompt: Option<String>,
    pub working_dir: PathBuf,
    /// Stream responses, or request single completions
    pub streaming: bool,
    pub tool_timeout: Duration,
    /// Inactivity bound on a streamed response
    pub stream_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            system_prompt: None,
            working_dir: PathBuf::from("."),
            streaming: true,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            stream_timeout: STREAM_TIMEOUT,
        }
    }
}

/// The conversational agent. Cheap to clone; clones share one conversation.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    client: Arc<dyn ModelClient>,
    dispatcher: ToolDispatcher,
    config: parking_lot::RwLock<AgentConfig>,
    log: ConversationLog,
    /// Model-facing history. Holding the lock is holding the turn.
    messages: Mutex<Vec<ModelMessage>>,
    state: parking_lot::RwLock<AgentState>,
    cancellation: AgentCancellation,
    ctx: ToolContext,
}

impl Agent {
    pub fn new(client: Arc<dyn ModelClient>, dispatcher: ToolDispatcher, config: AgentConfig) -> Self {
        let dispatcher = dispatcher.with_timeout(config.tool_timeout);
        let ctx = ToolContext::new(config.working_dir.clone());
        Self {
            inner: Arc::new(AgentInner {
                client,
                dispatcher,
                config: parking_lot::RwLock::new(config),
                log: ConversationLog::new(),
                messages: Mutex::new(Vec::new()),
                state: parking_lot::RwLock::new(AgentState::Idle),
                cancellation: AgentCancellation::new(),
                ctx,
            }),
        }
    }

    /// Run a turn in the background, streaming its events.
    ///
    /// The last event is always `Done`.
    pub fn process_user_message_stream(
        &self,
        text: impl Into<String>,
    ) -> mpsc::UnboundedReceiver<AgentEvent> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        // Registered now so an abort issued before the turn starts still lands
        let turn = self.inner.cancellation.begin_turn();
        let agent = self.clone();
        let text = text.into();
        tokio::spawn(async move {
            agent.run_turn(text, turn, event_tx).await;
        });
        event_rx
    }

    /// Run a turn to completion and return the entries it added.
    ///
    /// A model API failure is an error here; the conversation stays usable.
    pub async fn process_user_message(
        &self,
        text: impl Into<String>,
    ) -> anyhow::Result<Vec<ConversationEntry>> {
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let turn = self.inner.cancellation.begin_turn();
        let (start, outcome) = self.run_turn(text.into(), turn, event_tx).await;
        match outcome {
            TurnOutcome::Failed { error } => Err(anyhow!(error)),
            _ => Ok(self.inner.log.since(start)),
        }
    }

    pub fn set_model(&self, model: impl Into<String>) {
        let model = model.into();
        info!("Switching model to {}", model);
        self.inner.config.write().model = model;
    }

    pub fn current_model(&self) -> String {
        self.inner.config.read().model.clone()
    }

    pub fn config(&self) -> AgentConfig {
        self.inner.config.read().clone()
    }

    /// Abort whatever the current turn is doing
    pub fn abort_current_operation(&self) {
        info!("Aborting current operation");
        self.inner.cancellation.cancel();
    }

    /// Run a shell command directly, bypassing the model and confirmation.
    ///
    /// Waits for any running turn; the result is appended to the conversation.
    pub async fn execute_bash_command(&self, command: &str) -> ToolResult {
        let _turn = self.inner.messages.lock().await;
        let call = ToolCallRequest::new(
            format!("user_bash_{}", self.inner.log.len()),
            BashTool.name(),
            json!({ "command": command }),
        );
        let result = BashTool.execute(call.arguments.clone(), &self.inner.ctx).await;
        self.inner
            .log
            .push(ConversationEntry::tool_result(&call, result.clone()));
        result
    }

    pub fn entries(&self) -> Vec<ConversationEntry> {
        self.inner.log.snapshot()
    }

    /// Live view of the conversation
    pub fn conversation(&self) -> ConversationLog {
        self.inner.log.clone()
    }

    pub fn state(&self) -> AgentState {
        *self.inner.state.read()
    }

    pub fn working_dir(&self) -> PathBuf {
        self.inner.ctx.cwd()
    }

    /// Forget the conversation and every remembered approval
    pub async fn clear_conversation(&self) {
        let mut messages = self.inner.messages.lock().await;
        messages.clear();
        self.inner.log.clear();
        self.inner.dispatcher.gate().reset();
        self.set_state(AgentState::Idle);
    }

    /// Tool catalog sent to the model
    pub async fn tools(&self) -> Vec<AiTool> {
        self.inner.dispatcher.tools().await
    }

    pub fn dispatcher(&self) -> &ToolDispatcher {
        &self.inner.dispatcher
    }

    fn set_state(&self, state: AgentState) {
        *self.inner.state.write() = state;
    }

    async fn run_turn(
        &self,
        text: String,
        turn: TurnToken,
        event_tx: mpsc::UnboundedSender<AgentEvent>,
    ) -> (usize, TurnOutcome) {
        let mut messages = self.inner.messages.lock().await;
        let cancel = turn.token().clone();
        let start = self.inner.log.len();

        self.inner.log.push(ConversationEntry::user(text.clone()));
        messages.push(ModelMessage::user_text(text));

        let outcome = self.run_rounds(&mut messages, &event_tx, &cancel).await;

        let state = match &outcome {
            TurnOutcome::Completed | TurnOutcome::RoundLimit { .. } => AgentState::Done,
            TurnOutcome::Aborted => AgentState::Aborted,
            TurnOutcome::Failed { .. } => AgentState::Error,
        };
        self.set_state(state);

        if let TurnOutcome::Failed { error } = &outcome {
            warn!("Turn failed: {}", error);
            self.inner.log.push(ConversationEntry::assistant(format!(
                "Sorry, I encountered an error: {}",
                error
            )));
            let _ = event_tx.send(AgentEvent::Error {
                error: error.clone(),
            });
        }
        let _ = event_tx.send(AgentEvent::Done {
            outcome: outcome.clone(),
        });
        (start, outcome)
    }

    async fn run_rounds(
        &self,
        messages: &mut Vec<ModelMessage>,
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> TurnOutcome {
        let mut rounds = 0usize;

        loop {
            if cancel.is_cancelled() {
                return TurnOutcome::Aborted;
            }

            let config = self.config();
            let request = ModelRequest {
                model: config.model.clone(),
                system_prompt: config.system_prompt.clone(),
                messages: messages.clone(),
                tools: self.tools().await,
            };

            self.set_state(AgentState::Requesting);
            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return TurnOutcome::Aborted,
                opened = self.open_response(request, config.streaming) => opened,
            };
            let api_rx = match opened {
                Ok(rx) => rx,
                Err(e) => return TurnOutcome::Failed {
                    error: e.to_string(),
                },
            };

            self.set_state(AgentState::Streaming);
            let result = stream::process_stream(
                api_rx,
                event_tx,
                &self.inner.log,
                cancel,
                config.stream_timeout,
            )
            .await;
            self.finalize_assistant(&result);

            if let Some(message) = assistant_message(&result) {
                messages.push(message);
            }
            if result.cancelled {
                return TurnOutcome::Aborted;
            }
            if let Some(error) = result.error {
                return TurnOutcome::Failed { error };
            }
            if result.tool_calls.is_empty() {
                info!(rounds, "Turn complete");
                return TurnOutcome::Completed;
            }

            self.set_state(AgentState::ToolRound);
            let results = self
                .run_tools(&result.tool_calls, event_tx, cancel)
                .await;
            messages.push(ModelMessage {
                role: Role::Tool,
                content: results,
            });

            if cancel.is_cancelled() {
                return TurnOutcome::Aborted;
            }

            rounds += 1;
            if rounds >= config.max_rounds {
                warn!(rounds, "Round limit reached");
                self.inner
                    .log
                    .push(ConversationEntry::assistant(ROUND_LIMIT_MESSAGE));
                messages.push(ModelMessage {
                    role: Role::Assistant,
                    content: vec![Content::Text {
                        text: ROUND_LIMIT_MESSAGE.to_string(),
                    }],
                });
                return TurnOutcome::RoundLimit { rounds };
            }
        }
    }

    /// Start a response. Non-streamed completions are replayed as parts so
    /// both modes go through the same assembler.
    async fn open_response(
        &self,
        request: ModelRequest,
        streaming: bool,
    ) -> Result<mpsc::UnboundedReceiver<StreamPart>, ModelError> {
        if streaming {
            return self.inner.client.stream(request).await;
        }
        let response = self.inner.client.complete(request).await?;
        let (tx, rx) = mpsc::unbounded_channel();
        for part in response.into_parts() {
            let _ = tx.send(part);
        }
        Ok(rx)
    }

    /// Close the streaming entry, or add one to hang tool calls on
    fn finalize_assistant(&self, result: &StreamOutcome) {
        if result.opened_entry {
            self.inner.log.update_last(|entry| {
                entry.is_streaming = false;
                entry.tool_calls = result.tool_calls.clone();
            });
        } else if !result.tool_calls.is_empty() {
            let mut entry = ConversationEntry::assistant("");
            entry.tool_calls = result.tool_calls.clone();
            self.inner.log.push(entry);
        }
    }

    async fn run_tools(
        &self,
        calls: &[ToolCallRequest],
        event_tx: &mpsc::UnboundedSender<AgentEvent>,
        cancel: &CancellationToken,
    ) -> Vec<Content> {
        let mut contents = Vec::with_capacity(calls.len());

        for call in calls {
            // Unexecuted calls still need a result or the next request is malformed
            let result = if cancel.is_cancelled() {
                ToolResult::error(CANCELLED_MESSAGE)
            } else {
                self.inner.log.push(ConversationEntry::tool_call(call));
                let result = self
                    .inner
                    .dispatcher
                    .execute(call, &self.inner.ctx, cancel)
                    .await;
                self.inner
                    .log
                    .update_last(|entry| entry.complete_tool(result.clone()));
                let _ = event_tx.send(AgentEvent::ToolResult {
                    tool_call: call.clone(),
                    result: result.clone(),
                });
                result
            };

            contents.push(Content::ToolResult {
                tool_use_id: call.id.clone(),
                output: serde_json::Value::String(result.model_content()),
                is_error: (!result.success).then_some(true),
            });
        }

        contents
    }
}

fn assistant_message(result: &StreamOutcome) -> Option<ModelMessage> {
    let mut content = Vec::with_capacity(result.tool_calls.len() + 1);
    if !result.text.is_empty() {
        content.push(Content::Text {
            text: result.text.clone(),
        });
    }
    for call in &result.tool_calls {
        content.push(Content::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: if call.argument_error.is_some() {
                json!({})
            } else {
                call.arguments.clone()
            },
        });
    }
    (!content.is_empty()).then_some(ModelMessage {
        role: Role::Assistant,
        content,
    })
}
