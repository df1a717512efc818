//! Preconfigured adapter mocks.
//!
//! Each helper returns a `mockall` mock with its expectations already set, so
//! a full session can run without credentials or network access.

use crate::{
    audio::{AudioFrame, PIPELINE_SAMPLE_RATE},
    llm_client::{LLMAction, LLMResponse, MockLLMClient, TokenUsage, ToolCall},
    speech::{MockSpeechToText, MockTextToSpeech},
    turn::MockTurnDetector,
};
use async_openai::types::{ChatCompletionRequestMessage, ChatCompletionToolType, FunctionCall};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// What a scripted LLM answers once its script runs out.
pub const FALLBACK_REPLY: &str = "Whoa, that's wild, dude.";

/// Transcribes every utterance as `transcript`.
pub fn stt_hearing(transcript: &str) -> MockSpeechToText {
    let transcript = transcript.to_string();
    let mut stt = MockSpeechToText::new();
    stt.expect_model().return_const("mock-stt".to_string());
    stt.expect_transcribe().returning(move |_| Ok(transcript.clone()));
    stt
}

/// Produces 10 ms of silence per character of input.
pub fn silent_tts() -> MockTextToSpeech {
    let mut tts = MockTextToSpeech::new();
    tts.expect_model().return_const("mock-tts".to_string());
    tts.expect_synthesize().returning(|text| {
        let duration = Duration::from_millis(10 * text.chars().count() as u64);
        Ok(AudioFrame::silence(duration, PIPELINE_SAMPLE_RATE))
    });
    tts
}

/// Reports `probability` for every transcript.
pub fn fixed_turn_detector(probability: f32) -> MockTurnDetector {
    let mut detector = MockTurnDetector::new();
    detector
        .expect_predict_end_of_turn()
        .returning(move |_| Ok(probability));
    detector.expect_unlikely_threshold().return_const(0.15f32);
    detector
}

/// A request seen by a scripted LLM.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<ChatCompletionRequestMessage>,
    pub tool_names: Vec<String>,
}

/// Shared log of the requests a scripted LLM received, oldest first.
#[derive(Debug, Clone, Default)]
pub struct RequestLog(Arc<Mutex<Vec<RecordedRequest>>>);

impl RequestLog {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, request: RecordedRequest) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);
    }
}

/// Plays back `script` one action per request, then answers with [`FALLBACK_REPLY`].
pub fn scripted_llm(script: impl IntoIterator<Item = LLMAction>) -> (MockLLMClient, RequestLog) {
    let log = RequestLog::default();
    let recorder = log.clone();
    let mut script: VecDeque<LLMAction> = script.into_iter().collect();

    let mut llm = MockLLMClient::new();
    llm.expect_model().return_const("scripted-llm".to_string());
    llm.expect_decide_action().returning(move |messages, tools| {
        let prompt_tokens = messages.len() as u32;
        recorder.record(RecordedRequest {
            messages,
            tool_names: tools.iter().map(|t| t.function.name.clone()).collect(),
        });
        let action = script
            .pop_front()
            .unwrap_or_else(|| LLMAction::TextResponse(FALLBACK_REPLY.to_string()));
        Ok(LLMResponse {
            action,
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens: 1,
            },
        })
    });
    (llm, log)
}

/// Builds a function tool call the way the OpenAI API returns it.
pub fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.to_string(),
        r#type: ChatCompletionToolType::Function,
        function: FunctionCall {
            name: name.to_string(),
            arguments: arguments.to_string(),
        },
    }
}
