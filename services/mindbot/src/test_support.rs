//! Fixtures shared by the worker's unit tests.

use crate::{
    config::AgentConfig,
    entrypoint::MockAdapterFactory,
    prewarm::{ProcessResources, prewarm},
};
use mindbot_core::{
    llm_client::LLMClient,
    room::{LocalParticipant, RoomOutput, Speaker},
    speech::{SpeechToText, TextToSpeech},
    testing::{fixed_turn_detector, scripted_llm, silent_tts, stt_hearing},
    turn::TurnDetector,
    vad::VadOptions,
};
use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

const WAIT: Duration = Duration::from_secs(5);

/// Captures formatted log output in memory.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        let bytes = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn subscriber(&self) -> impl tracing::Subscriber + Send + Sync + 'static {
        tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_ansi(false)
            .finish()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub fn credentials() -> AgentConfig {
    AgentConfig {
        deepgram_api_key: Some("dg".into()),
        openai_api_key: Some("sk".into()),
        eleven_api_key: Some("el".into()),
        ..AgentConfig::default()
    }
}

pub fn prewarmed() -> Arc<ProcessResources> {
    let proc = Arc::new(ProcessResources::new());
    prewarm(&proc, VadOptions::default()).unwrap();
    proc
}

/// Adapters that hear "yo" and answer every request with the fallback line.
pub fn mock_factory() -> MockAdapterFactory {
    let mut factory = MockAdapterFactory::new();
    factory.expect_stt().returning(|_| {
        let stt: Arc<dyn SpeechToText> = Arc::new(stt_hearing("yo"));
        Ok(stt)
    });
    factory.expect_llm().returning(|_| {
        let (llm, _) = scripted_llm([]);
        let llm: Arc<dyn LLMClient> = Arc::new(llm);
        Ok(llm)
    });
    factory.expect_tts().returning(|_| {
        let tts: Arc<dyn TextToSpeech> = Arc::new(silent_tts());
        Ok(tts)
    });
    factory.expect_turn_detector().returning(|_| {
        let detector: Arc<dyn TurnDetector> = Arc::new(fixed_turn_detector(0.9));
        Ok(detector)
    });
    factory
}

pub async fn next_agent_transcription(participant: &mut LocalParticipant) -> String {
    tokio::time::timeout(WAIT, async {
        loop {
            if let Some(RoomOutput::Transcription {
                speaker: Speaker::Agent,
                text,
                ..
            }) = participant.output.recv().await
            {
                return text;
            }
        }
    })
    .await
    .expect("timed out waiting for the agent")
}

pub async fn wait_for_greeting_audio(participant: &mut LocalParticipant) {
    tokio::time::timeout(WAIT, async {
        while let Some(output) = participant.output.recv().await {
            if matches!(output, RoomOutput::Audio(_)) {
                return;
            }
        }
    })
    .await
    .expect("timed out waiting for the greeting");
}
