//! Agent Session Runtime
//!
//! An [`AgentSession`] owns one conversation in one room. Once started it runs
//! as its own task and drives the voice pipeline:
//!
//! - microphone audio is segmented by the VAD, transcribed by the STT adapter
//!   and scored by the turn detector before a user turn is committed;
//! - typed messages are committed immediately;
//! - each committed turn goes to the LLM together with the agent's tools,
//!   tool calls are executed over an in-process MCP channel, and the final
//!   text is published as a transcription and synthesized to audio.
//!
//! Every adapter call emits a [`MetricsEvent`] to the registered handlers.

use crate::{
    llm_client::{LLMAction, LLMClient, ToolCall},
    metrics::{EouMetrics, LlmMetrics, MetricsEvent, SttMetrics, TtsMetrics, VadMetrics},
    room::{Room, RoomEvent, RoomOutput, Speaker},
    speech::{SpeechToText, TextToSpeech},
    turn::TurnDetector,
    vad::{VadEvent, VadStream, VoiceActivityDetector},
    audio::AudioFrame,
};
use anyhow::{Context, Result, anyhow, bail};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs,
    FunctionObjectArgs,
};
use async_trait::async_trait;
use rmcp::{
    ServerHandler, ServiceExt,
    model::{CallToolRequestParam, RawContent},
    service::{RoleClient, RunningService},
};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::time::Duration;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
    time::{Instant, sleep_until},
};
use tracing::{Instrument, Span, debug, error, info, warn};

/// Maximum tool rounds executed within one turn. The request after the last
/// round is sent without tools.
pub const MAX_TOOL_STEPS: usize = 3;

/// Conversation messages kept across turns, excluding the system prompt.
pub const MAX_HISTORY_MESSAGES: usize = 40;

/// A persona that can be attached to a session.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// MCP tool server exposing the agent's callable functions.
    type Tools: ServerHandler;

    /// System prompt sent with every LLM request.
    fn instructions(&self) -> &str;

    fn tools(&self) -> Self::Tools;

    /// Called once, right after the session starts running.
    async fn on_enter(&self, session: &AgentSession) -> Result<()> {
        let _ = session;
        Ok(())
    }
}

/// Handler invoked synchronously for every emitted metrics event.
pub type MetricsHandler = Box<dyn Fn(&MetricsEvent) + Send + Sync>;

/// The five adapters a session streams through.
#[derive(Clone)]
pub struct SessionAdapters {
    pub vad: Arc<dyn VoiceActivityDetector>,
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LLMClient>,
    pub tts: Arc<dyn TextToSpeech>,
    pub turn_detector: Arc<dyn TurnDetector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoiseCancellation {
    /// Background voice cancellation.
    Bvc,
}

#[derive(Debug, Clone)]
pub struct RoomInputOptions {
    pub text_enabled: bool,
    pub audio_enabled: bool,
    /// Not available in this runtime; a configured value is logged and ignored.
    pub noise_cancellation: Option<NoiseCancellation>,
}

impl Default for RoomInputOptions {
    fn default() -> Self {
        Self {
            text_enabled: true,
            audio_enabled: true,
            noise_cancellation: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomOutputOptions {
    /// Publish user and agent transcriptions to the room.
    pub transcription_enabled: bool,
    pub audio_enabled: bool,
}

impl Default for RoomOutputOptions {
    fn default() -> Self {
        Self {
            transcription_enabled: true,
            audio_enabled: true,
        }
    }
}

/// How long to wait after the user stops speaking before replying.
#[derive(Debug, Clone)]
pub struct EndpointingOptions {
    /// Delay when the turn detector thinks the user is done.
    pub min_delay: Duration,
    /// Delay when the turn detector thinks the user will continue.
    pub max_delay: Duration,
}

impl Default for EndpointingOptions {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(6),
        }
    }
}

#[derive(Debug)]
enum SessionCommand {
    GenerateReply { user_input: Option<String> },
    Close,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SessionInner {
    adapters: SessionAdapters,
    metrics_handlers: RwLock<Vec<MetricsHandler>>,
}

impl SessionInner {
    fn emit(&self, event: MetricsEvent) {
        let handlers = self
            .metrics_handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for handler in handlers.iter() {
            handler(&event);
        }
    }
}

/// One running conversation between an agent and a room.
pub struct AgentSession {
    inner: Arc<SessionInner>,
    endpointing: EndpointingOptions,
    commands: OnceLock<mpsc::Sender<SessionCommand>>,
    task: Mutex<Option<JoinHandle<()>>>,
    closed_tx: Mutex<Option<watch::Sender<bool>>>,
    closed_rx: watch::Receiver<bool>,
}

impl AgentSession {
    pub fn new(adapters: SessionAdapters) -> Self {
        let (closed_tx, closed_rx) = watch::channel(false);
        Self {
            inner: Arc::new(SessionInner {
                adapters,
                metrics_handlers: RwLock::new(Vec::new()),
            }),
            endpointing: EndpointingOptions::default(),
            commands: OnceLock::new(),
            task: Mutex::new(None),
            closed_tx: Mutex::new(Some(closed_tx)),
            closed_rx,
        }
    }

    pub fn with_endpointing(mut self, endpointing: EndpointingOptions) -> Self {
        self.endpointing = endpointing;
        self
    }

    /// Registers a handler for every metrics event this session emits.
    pub fn on_metrics_collected<F>(&self, handler: F)
    where
        F: Fn(&MetricsEvent) + Send + Sync + 'static,
    {
        self.inner
            .metrics_handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Box::new(handler));
    }

    /// Delivers `event` to the registered metrics handlers, in registration order.
    pub fn emit_metrics(&self, event: MetricsEvent) {
        self.inner.emit(event);
    }

    /// Starts the session in `room` with `agent` attached.
    ///
    /// Returns once the agent's tools are registered, the session task is
    /// running and `on_enter` has completed. A session can be started once.
    pub async fn start<A: Agent>(
        &self,
        agent: A,
        room: Arc<dyn Room>,
        input: RoomInputOptions,
        output: RoomOutputOptions,
    ) -> Result<()> {
        let closed_tx = lock(&self.closed_tx)
            .take()
            .context("Session was already started")?;

        if let Some(mode) = input.noise_cancellation {
            warn!(?mode, "Noise cancellation is not available; continuing without it");
        }

        // Serve the agent's tools on one end of an in-memory pipe and talk to
        // them as an MCP client on the other.
        let (server_transport, client_transport) = tokio::io::duplex(4096);
        let tool_service = agent.tools();
        let tool_task = tokio::spawn(
            async move {
                if let Ok(service) = tool_service.serve(server_transport).await {
                    let _ = service.waiting().await;
                }
            }
            .instrument(Span::current()),
        );
        let connected = connect_tools(client_transport, room.as_ref()).await;
        let (tool_client, tools, events) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                tool_task.abort();
                return Err(e);
            }
        };
        info!(tools = tools.len(), "Agent tools registered");

        let (command_tx, command_rx) = mpsc::channel(16);
        if self.commands.set(command_tx).is_err() {
            tool_task.abort();
            bail!("Session was already started");
        }

        let runner = SessionRunner {
            inner: self.inner.clone(),
            vad_stream: self.inner.adapters.vad.stream(),
            room,
            input,
            output,
            endpointing: self.endpointing.clone(),
            instructions: agent.instructions().to_string(),
            history: Vec::new(),
            tools,
            tool_client,
            pending_transcript: String::new(),
            commit_deadline: None,
        };
        let handle = tokio::spawn(
            async move {
                runner.run(command_rx, events).await;
                tool_task.abort();
                let _ = closed_tx.send(true);
            }
            .instrument(Span::current()),
        );
        *lock(&self.task) = Some(handle);

        if let Err(e) = agent.on_enter(self).await {
            self.aclose().await;
            return Err(e.context("Agent failed to enter the session"));
        }
        Ok(())
    }

    /// Asks the session to produce a reply, optionally to new user input.
    ///
    /// With `None` the agent speaks from its instructions and history alone.
    pub async fn generate_reply(&self, user_input: Option<String>) -> Result<()> {
        let commands = self.commands.get().context("Session has not been started")?;
        commands
            .send(SessionCommand::GenerateReply { user_input })
            .await
            .map_err(|_| anyhow!("Session is closed"))
    }

    pub fn is_running(&self) -> bool {
        lock(&self.task)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stops the session after the current turn and waits for it to finish.
    pub async fn aclose(&self) {
        if let Some(commands) = self.commands.get() {
            let _ = commands.send(SessionCommand::Close).await;
        }
        let handle = lock(&self.task).take();
        match handle {
            Some(handle) => {
                if let Err(e) = handle.await {
                    error!(error = ?e, "Agent session task failed");
                }
            }
            None => {
                if let Some(closed_tx) = lock(&self.closed_tx).take() {
                    let _ = closed_tx.send(true);
                }
            }
        }
    }

    /// Resolves once the session has ended.
    pub async fn closed(&self) {
        let mut closed = self.closed_rx.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

/// Connects to the agent's tool service and takes the room's input stream.
async fn connect_tools(
    transport: tokio::io::DuplexStream,
    room: &dyn Room,
) -> Result<(
    RunningService<RoleClient, ()>,
    Vec<ChatCompletionTool>,
    mpsc::Receiver<RoomEvent>,
)> {
    let tool_client = ()
        .serve(transport)
        .await
        .map_err(|e| anyhow!("Failed to connect to agent tool service: {e}"))?;
    let tools = list_tools(&tool_client).await?;
    let events = room
        .subscribe()
        .context("Room input is already consumed by another session")?;
    Ok((tool_client, tools, events))
}

/// Drops the oldest turns until at most `max` messages remain.
///
/// Cuts only in front of a user message so tool calls stay paired with
/// their results. The newest user turn is always kept.
fn trim_history(history: &mut Vec<ChatCompletionRequestMessage>, max: usize) {
    if history.len() <= max {
        return;
    }
    let excess = history.len() - max;
    let cut = history
        .iter()
        .enumerate()
        .skip(excess)
        .find(|(_, message)| matches!(message, ChatCompletionRequestMessage::User(_)))
        .or_else(|| {
            history
                .iter()
                .enumerate()
                .rev()
                .find(|(_, message)| matches!(message, ChatCompletionRequestMessage::User(_)))
        })
        .map(|(index, _)| index)
        .unwrap_or(0);
    if cut > 0 {
        history.drain(..cut);
        debug!(dropped = cut, "Trimmed conversation history");
    }
}

/// Converts the tools advertised by the agent into LLM tool definitions.
async fn list_tools(client: &RunningService<RoleClient, ()>) -> Result<Vec<ChatCompletionTool>> {
    client
        .list_all_tools()
        .await?
        .into_iter()
        .map(|t| {
            Ok(ChatCompletionToolArgs::default()
                .function(
                    FunctionObjectArgs::default()
                        .name(t.name)
                        .description(t.description.unwrap_or_default())
                        .parameters(serde_json::to_value(&*t.input_schema)?)
                        .build()?,
                )
                .build()?)
        })
        .collect::<Result<Vec<_>>>()
}

struct SessionRunner {
    inner: Arc<SessionInner>,
    vad_stream: Box<dyn VadStream>,
    room: Arc<dyn Room>,
    input: RoomInputOptions,
    output: RoomOutputOptions,
    endpointing: EndpointingOptions,
    instructions: String,
    history: Vec<ChatCompletionRequestMessage>,
    tools: Vec<ChatCompletionTool>,
    tool_client: RunningService<RoleClient, ()>,
    pending_transcript: String,
    commit_deadline: Option<Instant>,
}

impl SessionRunner {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        mut events: mpsc::Receiver<RoomEvent>,
    ) {
        info!("Agent session running");
        loop {
            let deadline = self.commit_deadline;
            tokio::select! {
                command = commands.recv() => match command {
                    Some(SessionCommand::GenerateReply { user_input }) => {
                        if let Err(e) = self.reply(user_input).await {
                            error!(error = ?e, "Failed to generate reply");
                        }
                    }
                    Some(SessionCommand::Close) | None => {
                        info!("Session close requested");
                        break;
                    }
                },
                event = events.recv() => match event {
                    Some(RoomEvent::Text(text)) => self.on_text(text).await,
                    Some(RoomEvent::Audio(frame)) => self.on_audio(frame).await,
                    Some(RoomEvent::Disconnected) | None => {
                        info!("Participant disconnected");
                        break;
                    }
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.commit_deadline = None;
                    let transcript = std::mem::take(&mut self.pending_transcript);
                    self.commit_user_turn(transcript).await;
                }
            }
        }
        info!("Agent session finished.");
    }

    async fn on_text(&mut self, text: String) {
        if !self.input.text_enabled {
            debug!("Text input is disabled; ignoring message");
            return;
        }
        self.commit_deadline = None;
        let mut turn = std::mem::take(&mut self.pending_transcript);
        if !turn.is_empty() {
            turn.push(' ');
        }
        turn.push_str(text.trim());
        self.commit_user_turn(turn).await;
    }

    async fn on_audio(&mut self, frame: AudioFrame) {
        if !self.input.audio_enabled {
            return;
        }
        match self.vad_stream.push_frame(&frame) {
            Some(VadEvent::StartOfSpeech) => {
                if self.commit_deadline.take().is_some() {
                    debug!("User resumed speaking; holding the reply");
                }
            }
            Some(VadEvent::EndOfSpeech { speech, duration }) => {
                if let Err(e) = self.on_end_of_speech(speech, duration).await {
                    error!(error = ?e, "Failed to process user speech");
                }
            }
            None => {}
        }
    }

    async fn on_end_of_speech(&mut self, speech: AudioFrame, duration: Duration) -> Result<()> {
        self.inner.emit(MetricsEvent::Vad(VadMetrics {
            speech_duration: duration,
        }));

        let stt = &self.inner.adapters.stt;
        let started = std::time::Instant::now();
        let transcript = stt
            .transcribe(&speech)
            .await
            .context("Speech-to-text failed")?;
        self.inner.emit(MetricsEvent::Stt(SttMetrics {
            model: stt.model().to_string(),
            duration: started.elapsed(),
            audio_duration: duration,
        }));

        let transcript = transcript.trim();
        if transcript.is_empty() {
            debug!("Empty transcript; ignoring utterance");
            return Ok(());
        }
        if self.output.transcription_enabled {
            self.room
                .publish(RoomOutput::Transcription {
                    speaker: Speaker::User,
                    text: transcript.to_string(),
                    is_final: true,
                })
                .await?;
        }
        if !self.pending_transcript.is_empty() {
            self.pending_transcript.push(' ');
        }
        self.pending_transcript.push_str(transcript);

        let detector = &self.inner.adapters.turn_detector;
        let probability = detector
            .predict_end_of_turn(&self.pending_transcript)
            .await
            .context("Turn detection failed")?;
        let delay = if probability < detector.unlikely_threshold() {
            self.endpointing.max_delay
        } else {
            self.endpointing.min_delay
        };
        self.inner.emit(MetricsEvent::Eou(EouMetrics {
            probability,
            end_of_utterance_delay: delay,
        }));
        self.commit_deadline = Some(Instant::now() + delay);
        Ok(())
    }

    async fn commit_user_turn(&mut self, transcript: String) {
        if transcript.trim().is_empty() {
            return;
        }
        if let Err(e) = self.reply(Some(transcript)).await {
            error!(error = ?e, "Failed to generate reply");
        }
    }

    async fn reply(&mut self, user_input: Option<String>) -> Result<()> {
        if let Some(text) = user_input {
            debug!(%text, "User turn committed");
            self.history.push(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(text)
                    .build()?
                    .into(),
            );
            trim_history(&mut self.history, MAX_HISTORY_MESSAGES);
        }

        let text = self.run_llm().await?;
        if text.trim().is_empty() {
            return Ok(());
        }
        self.history.push(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(text.clone())
                .build()?
                .into(),
        );

        if self.output.transcription_enabled {
            self.room
                .publish(RoomOutput::Transcription {
                    speaker: Speaker::Agent,
                    text: text.clone(),
                    is_final: true,
                })
                .await?;
        }

        if self.output.audio_enabled {
            let tts = &self.inner.adapters.tts;
            let started = std::time::Instant::now();
            let audio = tts
                .synthesize(&text)
                .await
                .context("Text-to-speech failed")?;
            self.inner.emit(MetricsEvent::Tts(TtsMetrics {
                model: tts.model().to_string(),
                duration: started.elapsed(),
                characters_count: text.chars().count(),
                audio_duration: audio.duration(),
            }));
            self.room.publish(RoomOutput::Audio(audio)).await?;
        }
        Ok(())
    }

    /// Runs the LLM until it answers with text, executing tool calls in between.
    async fn run_llm(&mut self) -> Result<String> {
        let llm = self.inner.adapters.llm.clone();
        for step in 0..=MAX_TOOL_STEPS {
            let mut messages: Vec<ChatCompletionRequestMessage> =
                Vec::with_capacity(self.history.len() + 1);
            messages.push(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(self.instructions.clone())
                    .build()?
                    .into(),
            );
            messages.extend(self.history.iter().cloned());
            let tools = if step < MAX_TOOL_STEPS {
                self.tools.clone()
            } else {
                Vec::new()
            };

            let started = std::time::Instant::now();
            let response = llm
                .decide_action(messages, tools)
                .await
                .context("LLM request failed")?;
            self.inner.emit(MetricsEvent::Llm(LlmMetrics {
                model: llm.model().to_string(),
                duration: started.elapsed(),
                prompt_tokens: response.usage.prompt_tokens,
                completion_tokens: response.usage.completion_tokens,
            }));

            match response.action {
                LLMAction::TextResponse(text) => return Ok(text),
                LLMAction::ToolCall(_) if step == MAX_TOOL_STEPS => break,
                LLMAction::ToolCall(tool_calls) => {
                    self.history.push(
                        ChatCompletionRequestAssistantMessageArgs::default()
                            .tool_calls(tool_calls.clone())
                            .build()?
                            .into(),
                    );
                    for call in &tool_calls {
                        let result = self.call_tool(call).await;
                        self.history.push(
                            ChatCompletionRequestToolMessageArgs::default()
                                .tool_call_id(call.id.clone())
                                .content(result)
                                .build()?
                                .into(),
                        );
                    }
                }
            }
        }
        bail!("LLM kept requesting tools after {MAX_TOOL_STEPS} rounds")
    }

    /// Executes one tool call. Failures are reported back to the model as text.
    async fn call_tool(&self, call: &ToolCall) -> String {
        info!(tool = %call.function.name, "Executing tool call");
        match self.try_call_tool(call).await {
            Ok(text) => text,
            Err(e) => {
                warn!(tool = %call.function.name, error = ?e, "Tool call failed");
                serde_json::json!({ "error": e.to_string() }).to_string()
            }
        }
    }

    async fn try_call_tool(&self, call: &ToolCall) -> Result<String> {
        let arguments = if call.function.arguments.trim().is_empty() {
            serde_json::Map::new()
        } else {
            serde_json::from_str(&call.function.arguments)
                .context("Tool arguments are not a JSON object")?
        };
        let result = self
            .tool_client
            .peer()
            .call_tool(CallToolRequestParam {
                name: call.function.name.clone().into(),
                arguments: Some(arguments),
            })
            .await?;

        let annotated_content = result
            .content
            .context("Tool call returned no content")?
            .pop()
            .context("Content list was empty")?;
        match annotated_content.raw {
            RawContent::Text(text_content) => Ok(text_content.text),
            _ => bail!("Unexpected content type from tool"),
        }
    }
}
