//! Session metrics and usage accounting.
//!
//! The session runtime emits one [`MetricsEvent`] per adapter call. Callers
//! usually log each event with [`log_metrics`] and fold it into a
//! [`UsageCollector`] whose [`UsageSummary`] is reported when the session ends.

use std::fmt;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct LlmMetrics {
    pub model: String,
    pub duration: Duration,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SttMetrics {
    pub model: String,
    pub duration: Duration,
    pub audio_duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TtsMetrics {
    pub model: String,
    pub duration: Duration,
    pub characters_count: usize,
    pub audio_duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VadMetrics {
    pub speech_duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EouMetrics {
    pub probability: f32,
    pub end_of_utterance_delay: Duration,
}

/// A metrics sample pushed by the session runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsEvent {
    Llm(LlmMetrics),
    Stt(SttMetrics),
    Tts(TtsMetrics),
    Vad(VadMetrics),
    Eou(EouMetrics),
}

/// Writes one metrics event to the log.
pub fn log_metrics(event: &MetricsEvent) {
    match event {
        MetricsEvent::Llm(m) => info!(
            model = %m.model,
            duration_ms = m.duration.as_millis() as u64,
            prompt_tokens = m.prompt_tokens,
            completion_tokens = m.completion_tokens,
            "LLM metrics"
        ),
        MetricsEvent::Stt(m) => info!(
            model = %m.model,
            duration_ms = m.duration.as_millis() as u64,
            audio_duration_s = m.audio_duration.as_secs_f64(),
            "STT metrics"
        ),
        MetricsEvent::Tts(m) => info!(
            model = %m.model,
            duration_ms = m.duration.as_millis() as u64,
            characters = m.characters_count,
            audio_duration_s = m.audio_duration.as_secs_f64(),
            "TTS metrics"
        ),
        MetricsEvent::Vad(m) => info!(
            speech_duration_s = m.speech_duration.as_secs_f64(),
            "VAD metrics"
        ),
        MetricsEvent::Eou(m) => info!(
            probability = m.probability,
            delay_ms = m.end_of_utterance_delay.as_millis() as u64,
            "EOU metrics"
        ),
    }
}

/// Aggregated usage for one session.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSummary {
    /// Number of metrics events folded into this summary.
    pub events: usize,
    pub llm_prompt_tokens: u64,
    pub llm_completion_tokens: u64,
    pub tts_characters_count: u64,
    pub tts_audio_duration: Duration,
    pub stt_audio_duration: Duration,
}

impl fmt::Display for UsageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={} llm_prompt_tokens={} llm_completion_tokens={} tts_characters_count={} tts_audio_duration={:.2}s stt_audio_duration={:.2}s",
            self.events,
            self.llm_prompt_tokens,
            self.llm_completion_tokens,
            self.tts_characters_count,
            self.tts_audio_duration.as_secs_f64(),
            self.stt_audio_duration.as_secs_f64()
        )
    }
}

/// Accumulates metrics events for a single session.
#[derive(Debug, Default)]
pub struct UsageCollector {
    summary: UsageSummary,
}

impl UsageCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collect(&mut self, event: &MetricsEvent) {
        let summary = &mut self.summary;
        summary.events += 1;
        match event {
            MetricsEvent::Llm(m) => {
                summary.llm_prompt_tokens += u64::from(m.prompt_tokens);
                summary.llm_completion_tokens += u64::from(m.completion_tokens);
            }
            MetricsEvent::Stt(m) => summary.stt_audio_duration += m.audio_duration,
            MetricsEvent::Tts(m) => {
                summary.tts_characters_count += m.characters_count as u64;
                summary.tts_audio_duration += m.audio_duration;
            }
            MetricsEvent::Vad(_) | MetricsEvent::Eou(_) => {}
        }
    }

    pub fn summary(&self) -> UsageSummary {
        self.summary.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm(prompt: u32, completion: u32) -> MetricsEvent {
        MetricsEvent::Llm(LlmMetrics {
            model: "gpt-4.1".into(),
            duration: Duration::from_millis(350),
            prompt_tokens: prompt,
            completion_tokens: completion,
        })
    }

    #[test]
    fn test_empty_summary() {
        let collector = UsageCollector::new();
        assert_eq!(collector.summary(), UsageSummary::default());
        assert!(collector.summary().to_string().starts_with("events=0 "));
    }

    #[test]
    fn test_collect_counts_every_event() {
        let mut collector = UsageCollector::new();
        for n in 0..7 {
            collector.collect(&llm(n, 1));
        }
        collector.collect(&MetricsEvent::Vad(VadMetrics {
            speech_duration: Duration::from_secs(1),
        }));
        collector.collect(&MetricsEvent::Eou(EouMetrics {
            probability: 0.9,
            end_of_utterance_delay: Duration::from_millis(500),
        }));

        let summary = collector.summary();
        assert_eq!(summary.events, 9);
        assert_eq!(summary.llm_prompt_tokens, 21);
        assert_eq!(summary.llm_completion_tokens, 7);
    }

    #[test]
    fn test_collect_aggregates_audio() {
        let mut collector = UsageCollector::new();
        collector.collect(&MetricsEvent::Stt(SttMetrics {
            model: "nova-3".into(),
            duration: Duration::from_millis(200),
            audio_duration: Duration::from_millis(1500),
        }));
        collector.collect(&MetricsEvent::Tts(TtsMetrics {
            model: "eleven_flash_v2_5".into(),
            duration: Duration::from_millis(300),
            characters_count: 42,
            audio_duration: Duration::from_millis(2500),
        }));
        collector.collect(&MetricsEvent::Tts(TtsMetrics {
            model: "eleven_flash_v2_5".into(),
            duration: Duration::from_millis(300),
            characters_count: 8,
            audio_duration: Duration::from_millis(500),
        }));

        let summary = collector.summary();
        assert_eq!(summary.events, 3);
        assert_eq!(summary.stt_audio_duration, Duration::from_millis(1500));
        assert_eq!(summary.tts_characters_count, 50);
        assert_eq!(summary.tts_audio_duration, Duration::from_secs(3));
        assert_eq!(
            summary.to_string(),
            "events=3 llm_prompt_tokens=0 llm_completion_tokens=0 tts_characters_count=50 tts_audio_duration=3.00s stt_audio_duration=1.50s"
        );
    }
}
