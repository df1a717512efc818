//! Session Assembly
//!
//! Turns one accepted connection (a [`JobContext`]) into a running
//! [`AgentSession`] with the MindBot persona attached.

use crate::{config::AgentConfig, prewarm::ProcessResources};
use anyhow::{Context, Result, ensure};
use async_openai::config::OpenAIConfig;
use futures::future::BoxFuture;
use mindbot_core::{
    llm_client::{LLMClient, OpenAICompatibleClient},
    metrics::{UsageCollector, log_metrics},
    persona::MindBotAgent,
    room::Room,
    session::{AgentSession, RoomInputOptions, RoomOutputOptions, SessionAdapters},
    speech::{DeepgramStt, ElevenLabsTts, SpeechToText, TextToSpeech},
    turn::{HeuristicTurnDetector, TurnDetector},
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{Instrument, Span, error, info, instrument};

type ShutdownCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Everything a job needs: the room it serves and the process it runs in.
pub struct JobContext {
    room: Arc<dyn Room>,
    proc: Arc<ProcessResources>,
    shutdown_callbacks: Mutex<Vec<ShutdownCallback>>,
}

impl JobContext {
    pub fn new(room: Arc<dyn Room>, proc: Arc<ProcessResources>) -> Self {
        Self {
            room,
            proc,
            shutdown_callbacks: Mutex::new(Vec::new()),
        }
    }

    pub fn room(&self) -> &Arc<dyn Room> {
        &self.room
    }

    pub fn proc(&self) -> &ProcessResources {
        &self.proc
    }

    /// Registers `callback` to run when the job ends.
    pub fn add_shutdown_callback<F, Fut>(&self, callback: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        lock(&self.shutdown_callbacks).push(Box::new(move || Box::pin(callback())));
    }

    pub async fn connect(&self) -> Result<()> {
        self.room
            .connect()
            .await
            .with_context(|| format!("Failed to connect to room '{}'", self.room.name()))
    }

    /// Runs the registered callbacks in order. Each runs at most once.
    pub async fn shutdown(&self) {
        let callbacks = std::mem::take(&mut *lock(&self.shutdown_callbacks));
        for callback in callbacks {
            callback().await;
        }
    }
}

/// Builds the provider-backed adapters for a session.
#[cfg_attr(test, mockall::automock)]
pub trait AdapterFactory: Send + Sync {
    fn stt(&self, config: &AgentConfig) -> Result<Arc<dyn SpeechToText>>;
    fn llm(&self, config: &AgentConfig) -> Result<Arc<dyn LLMClient>>;
    fn tts(&self, config: &AgentConfig) -> Result<Arc<dyn TextToSpeech>>;
    fn turn_detector(&self, config: &AgentConfig) -> Result<Arc<dyn TurnDetector>>;
}

/// Deepgram, OpenAI and ElevenLabs, plus the heuristic turn detector.
pub struct ProviderAdapters;

impl AdapterFactory for ProviderAdapters {
    fn stt(&self, config: &AgentConfig) -> Result<Arc<dyn SpeechToText>> {
        let api_key = config.deepgram_api_key.as_deref().unwrap_or_default();
        Ok(Arc::new(DeepgramStt::new(
            api_key,
            &config.stt_model,
            &config.stt_language,
        )?))
    }

    fn llm(&self, config: &AgentConfig) -> Result<Arc<dyn LLMClient>> {
        let api_key = config.openai_api_key.as_deref().unwrap_or_default();
        ensure!(!api_key.is_empty(), "OpenAI API key is empty");
        let openai_config = OpenAIConfig::new().with_api_key(api_key);
        Ok(Arc::new(OpenAICompatibleClient::new(
            openai_config,
            config.llm_model.clone(),
        )))
    }

    fn tts(&self, config: &AgentConfig) -> Result<Arc<dyn TextToSpeech>> {
        let api_key = config.eleven_api_key.as_deref().unwrap_or_default();
        Ok(Arc::new(ElevenLabsTts::new(
            api_key,
            &config.tts_voice_id,
            &config.tts_model,
        )?))
    }

    fn turn_detector(&self, _config: &AgentConfig) -> Result<Arc<dyn TurnDetector>> {
        Ok(Arc::new(HeuristicTurnDetector::default()))
    }
}

/// Starts a MindBot session for `ctx`.
///
/// Every log line emitted for the session, including those from its spawned
/// tasks, carries the `room` and `agent` fields. Failures are logged here and
/// returned; nothing is retried.
#[instrument(
    name = "job",
    skip_all,
    fields(room = %ctx.room().name(), agent = %config.agent_name)
)]
pub async fn entrypoint(
    ctx: &JobContext,
    config: &AgentConfig,
    adapters: &dyn AdapterFactory,
) -> Result<Arc<AgentSession>> {
    info!("Starting new agent session");
    match assemble(ctx, config, adapters).await {
        Ok(session) => Ok(session),
        Err(e) => {
            error!(error = ?e, "Failed to start agent session");
            Err(e)
        }
    }
}

async fn assemble(
    ctx: &JobContext,
    config: &AgentConfig,
    adapters: &dyn AdapterFactory,
) -> Result<Arc<AgentSession>> {
    config
        .require_credentials()
        .context("Invalid configuration - missing required API keys")?;

    let session_adapters = SessionAdapters {
        vad: ctx.proc().vad()?,
        stt: adapters.stt(config).context("Failed to create STT adapter")?,
        llm: adapters.llm(config).context("Failed to create LLM adapter")?,
        tts: adapters.tts(config).context("Failed to create TTS adapter")?,
        turn_detector: adapters
            .turn_detector(config)
            .context("Failed to create turn detector")?,
    };
    let session = Arc::new(AgentSession::new(session_adapters));

    let usage = Arc::new(Mutex::new(UsageCollector::new()));
    let collector = usage.clone();
    session.on_metrics_collected(move |event| {
        log_metrics(event);
        lock(&collector).collect(event);
    });

    let span = Span::current();
    ctx.add_shutdown_callback(move || {
        async move {
            let summary = lock(&usage).summary();
            info!(%summary, "Session usage summary");
        }
        .instrument(span)
    });

    let agent = MindBotAgent::new(&config.agent_name, &config.agent_nickname);
    let input = RoomInputOptions {
        text_enabled: true,
        audio_enabled: true,
        noise_cancellation: None,
    };
    let output = RoomOutputOptions {
        transcription_enabled: true,
        audio_enabled: true,
    };
    session
        .start(agent, ctx.room().clone(), input, output)
        .await
        .context("Failed to start agent session")?;

    if let Err(e) = ctx.connect().await {
        session.aclose().await;
        return Err(e);
    }
    info!("Agent session started");
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        LogBuffer, credentials, mock_factory, prewarmed, wait_for_greeting_audio,
    };
    use anyhow::bail;
    use async_trait::async_trait;
    use mindbot_core::{
        metrics::{MetricsEvent, VadMetrics},
        room::{LocalRoom, RoomEvent, RoomOutput},
    };
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tracing::instrument::WithSubscriber;

    /// A room whose signalling server cannot be reached.
    struct UnreachableRoom(LocalRoom);

    #[async_trait]
    impl Room for UnreachableRoom {
        fn name(&self) -> &str {
            self.0.name()
        }

        async fn connect(&self) -> Result<()> {
            bail!("signalling server unreachable")
        }

        fn subscribe(&self) -> Option<mpsc::Receiver<RoomEvent>> {
            self.0.subscribe()
        }

        async fn publish(&self, output: RoomOutput) -> Result<()> {
            self.0.publish(output).await
        }
    }

    #[tokio::test]
    async fn test_missing_credential_fails_before_adapters() {
        for missing in 0..3 {
            let mut config = credentials();
            match missing {
                0 => config.deepgram_api_key = Some(String::new()),
                1 => config.openai_api_key = None,
                _ => config.eleven_api_key = Some(String::new()),
            }

            let mut factory = MockAdapterFactory::new();
            factory.expect_stt().never();
            factory.expect_llm().never();
            factory.expect_tts().never();
            factory.expect_turn_detector().never();

            let (room, _participant) = LocalRoom::new("no-keys");
            let room = Arc::new(room);
            let ctx = JobContext::new(room.clone(), prewarmed());
            let err = entrypoint(&ctx, &config, &factory)
                .await
                .err()
                .expect("session start should fail");
            assert!(format!("{err:#}").contains("missing required API keys"));
            assert!(!room.is_connected());
        }
    }

    #[tokio::test]
    async fn test_adapter_failure_aborts_start() {
        let mut factory = MockAdapterFactory::new();
        factory
            .expect_stt()
            .returning(|_| Err(anyhow::anyhow!("deepgram unreachable")));
        factory.expect_tts().never();

        let (room, _participant) = LocalRoom::new("broken");
        let ctx = JobContext::new(Arc::new(room), prewarmed());
        let err = entrypoint(&ctx, &credentials(), &factory)
            .await
            .err()
            .expect("session start should fail");
        assert!(format!("{err:#}").contains("Failed to create STT adapter"));
    }

    #[tokio::test]
    async fn test_entrypoint_requires_prewarm() {
        let (room, _participant) = LocalRoom::new("cold");
        let ctx = JobContext::new(Arc::new(room), Arc::new(ProcessResources::new()));
        assert!(entrypoint(&ctx, &credentials(), &mock_factory()).await.is_err());
    }

    #[tokio::test]
    async fn test_connect_failure_closes_started_session() {
        let (room, mut participant) = LocalRoom::new("offline");
        let ctx = JobContext::new(Arc::new(UnreachableRoom(room)), prewarmed());
        let err = entrypoint(&ctx, &credentials(), &mock_factory())
            .await
            .err()
            .expect("connect should fail");
        assert!(format!("{err:#}").contains("signalling server unreachable"));

        // Once the job lets go of the room, nothing else may hold it.
        drop(ctx);
        tokio::time::timeout(Duration::from_secs(5), async {
            while participant.output.recv().await.is_some() {}
        })
        .await
        .expect("a session task still holds the room");
    }

    #[tokio::test]
    async fn test_entrypoint_connects_and_greets() {
        let (room, mut participant) = LocalRoom::new("living-room");
        let room = Arc::new(room);
        let ctx = JobContext::new(room.clone(), prewarmed());
        let session = entrypoint(&ctx, &credentials(), &mock_factory()).await.unwrap();

        assert!(room.is_connected());
        assert!(session.is_running());
        wait_for_greeting_audio(&mut participant).await;
        session.aclose().await;
        ctx.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_logs_collected_usage_once() {
        let logs = LogBuffer::default();

        async {
            let (room, mut participant) = LocalRoom::new("metrics-room");
            let ctx = JobContext::new(Arc::new(room), prewarmed());
            let session = entrypoint(&ctx, &credentials(), &mock_factory()).await.unwrap();

            // The greeting contributes one LLM and one TTS event.
            wait_for_greeting_audio(&mut participant).await;
            for _ in 0..5 {
                session.emit_metrics(MetricsEvent::Vad(VadMetrics {
                    speech_duration: Duration::from_millis(250),
                }));
            }
            session.aclose().await;
            ctx.shutdown().await;
            ctx.shutdown().await;
        }
        .with_subscriber(logs.subscriber())
        .await;

        let output = logs.contents();
        assert_eq!(output.matches("Session usage summary").count(), 1);
        assert!(output.contains("events=7 "), "{output}");
        assert!(output.contains("room=metrics-room"), "{output}");
    }

    #[tokio::test]
    async fn test_shutdown_callbacks_run_in_order() {
        let (room, _participant) = LocalRoom::new("order");
        let ctx = JobContext::new(Arc::new(room), Arc::new(ProcessResources::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = seen.clone();
            ctx.add_shutdown_callback(move || async move {
                lock(&seen).push(i);
            });
        }
        ctx.shutdown().await;
        ctx.shutdown().await;
        assert_eq!(*lock(&seen), vec![0, 1, 2]);
    }
}
