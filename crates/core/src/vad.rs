use crate::audio::{AudioFrame, PIPELINE_SAMPLE_RATE};
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VadError {
    #[error("Unsupported sample rate: {0} Hz (expected 8000 or 16000)")]
    UnsupportedSampleRate(u32),
    #[error("Threshold {0} is outside the range (0, 1)")]
    ThresholdOutOfRange(f32),
    #[error("Activation threshold {activation} must not be below deactivation threshold {deactivation}")]
    ThresholdOrder { activation: f32, deactivation: f32 },
    #[error("Minimum speech and silence durations must be non-zero")]
    ZeroDuration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VadEvent {
    StartOfSpeech,
    /// The user stopped talking. `speech` includes the prefix padding.
    EndOfSpeech {
        speech: AudioFrame,
        duration: Duration,
    },
}

/// A loaded voice activity model. Shared read-only across sessions.
pub trait VoiceActivityDetector: Send + Sync {
    /// Opens an independent detection stream for one audio source.
    fn stream(&self) -> Box<dyn VadStream>;
}

/// Stateful speech segmentation over a single audio source.
pub trait VadStream: Send + Sync {
    fn push_frame(&mut self, frame: &AudioFrame) -> Option<VadEvent>;
}

#[derive(Debug, Clone)]
pub struct VadOptions {
    pub sample_rate: u32,
    /// RMS level (0..1) above which a frame counts as speech.
    pub activation_threshold: f32,
    /// RMS level below which a frame counts as silence once speaking.
    pub deactivation_threshold: f32,
    pub min_speech_duration: Duration,
    pub min_silence_duration: Duration,
    pub prefix_padding: Duration,
    /// Speech is flushed once this much has been buffered.
    pub max_buffered_speech: Duration,
}

impl Default for VadOptions {
    fn default() -> Self {
        Self {
            sample_rate: PIPELINE_SAMPLE_RATE,
            activation_threshold: 0.02,
            deactivation_threshold: 0.01,
            min_speech_duration: Duration::from_millis(50),
            min_silence_duration: Duration::from_millis(550),
            prefix_padding: Duration::from_millis(500),
            max_buffered_speech: Duration::from_secs(60),
        }
    }
}

/// Energy-based voice activity detector with hysteresis.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    options: VadOptions,
}

impl EnergyVad {
    /// Validates `options` and returns a detector ready to open streams.
    pub fn load(options: VadOptions) -> Result<Self, VadError> {
        if !matches!(options.sample_rate, 8000 | 16000) {
            return Err(VadError::UnsupportedSampleRate(options.sample_rate));
        }
        for threshold in [options.activation_threshold, options.deactivation_threshold] {
            if !(threshold > 0.0 && threshold < 1.0) {
                return Err(VadError::ThresholdOutOfRange(threshold));
            }
        }
        if options.activation_threshold < options.deactivation_threshold {
            return Err(VadError::ThresholdOrder {
                activation: options.activation_threshold,
                deactivation: options.deactivation_threshold,
            });
        }
        if options.min_speech_duration.is_zero() || options.min_silence_duration.is_zero() {
            return Err(VadError::ZeroDuration);
        }
        Ok(Self { options })
    }

    pub fn options(&self) -> &VadOptions {
        &self.options
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn stream(&self) -> Box<dyn VadStream> {
        Box::new(EnergyVadStream::new(self.options.clone()))
    }
}

struct EnergyVadStream {
    options: VadOptions,
    speaking: bool,
    speech_run: Duration,
    silence_run: Duration,
    prefix: VecDeque<i16>,
    prefix_capacity: usize,
    speech: Vec<i16>,
}

impl EnergyVadStream {
    fn new(options: VadOptions) -> Self {
        let padding = options.prefix_padding + options.min_speech_duration;
        let prefix_capacity =
            (padding.as_secs_f64() * options.sample_rate as f64).round() as usize;
        Self {
            options,
            speaking: false,
            speech_run: Duration::ZERO,
            silence_run: Duration::ZERO,
            prefix: VecDeque::with_capacity(prefix_capacity),
            prefix_capacity,
            speech: Vec::new(),
        }
    }

    fn buffered_speech(&self) -> Duration {
        Duration::from_secs_f64(self.speech.len() as f64 / self.options.sample_rate as f64)
    }

    fn end_of_speech(&mut self) -> VadEvent {
        self.speaking = false;
        self.speech_run = Duration::ZERO;
        self.silence_run = Duration::ZERO;
        let speech = AudioFrame::new(std::mem::take(&mut self.speech), self.options.sample_rate);
        let duration = speech.duration();
        debug!(duration_ms = duration.as_millis() as u64, "End of speech");
        VadEvent::EndOfSpeech { speech, duration }
    }
}

impl VadStream for EnergyVadStream {
    fn push_frame(&mut self, frame: &AudioFrame) -> Option<VadEvent> {
        if frame.sample_rate != self.options.sample_rate {
            warn!(
                expected = self.options.sample_rate,
                actual = frame.sample_rate,
                "Dropping audio frame with mismatched sample rate"
            );
            return None;
        }
        let level = frame.rms();
        let frame_duration = frame.duration();

        if !self.speaking {
            self.prefix.extend(frame.samples.iter().copied());
            let overflow = self.prefix.len().saturating_sub(self.prefix_capacity);
            self.prefix.drain(..overflow);

            if level >= self.options.activation_threshold {
                self.speech_run += frame_duration;
                if self.speech_run >= self.options.min_speech_duration {
                    self.speaking = true;
                    self.silence_run = Duration::ZERO;
                    self.speech = self.prefix.drain(..).collect();
                    debug!("Start of speech");
                    return Some(VadEvent::StartOfSpeech);
                }
            } else {
                self.speech_run = Duration::ZERO;
            }
            return None;
        }

        self.speech.extend_from_slice(&frame.samples);
        if level < self.options.deactivation_threshold {
            self.silence_run += frame_duration;
            if self.silence_run >= self.options.min_silence_duration {
                return Some(self.end_of_speech());
            }
        } else {
            self.silence_run = Duration::ZERO;
        }

        if self.buffered_speech() >= self.options.max_buffered_speech {
            return Some(self.end_of_speech());
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: Duration = Duration::from_millis(20);

    fn silence() -> AudioFrame {
        AudioFrame::silence(FRAME, 16000)
    }

    fn loud() -> AudioFrame {
        AudioFrame::new(vec![8000; 320], 16000)
    }

    fn run(stream: &mut dyn VadStream, frames: impl IntoIterator<Item = AudioFrame>) -> Vec<VadEvent> {
        frames
            .into_iter()
            .filter_map(|f| stream.push_frame(&f))
            .collect()
    }

    #[test]
    fn test_load_rejects_bad_options() {
        let bad_rate = VadOptions {
            sample_rate: 44100,
            ..Default::default()
        };
        assert_eq!(
            EnergyVad::load(bad_rate).unwrap_err(),
            VadError::UnsupportedSampleRate(44100)
        );

        let inverted = VadOptions {
            activation_threshold: 0.01,
            deactivation_threshold: 0.05,
            ..Default::default()
        };
        assert!(matches!(
            EnergyVad::load(inverted),
            Err(VadError::ThresholdOrder { .. })
        ));

        let out_of_range = VadOptions {
            activation_threshold: 1.5,
            ..Default::default()
        };
        assert_eq!(
            EnergyVad::load(out_of_range).unwrap_err(),
            VadError::ThresholdOutOfRange(1.5)
        );

        let zero = VadOptions {
            min_silence_duration: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(EnergyVad::load(zero).unwrap_err(), VadError::ZeroDuration);
    }

    #[test]
    fn test_silence_produces_no_events() {
        let vad = EnergyVad::load(VadOptions::default()).unwrap();
        let mut stream = vad.stream();
        let events = run(stream.as_mut(), std::iter::repeat_with(silence).take(100));
        assert!(events.is_empty());
    }

    #[test]
    fn test_speech_burst_is_segmented() {
        let vad = EnergyVad::load(VadOptions::default()).unwrap();
        let mut stream = vad.stream();

        let frames = std::iter::repeat_with(silence)
            .take(10)
            .chain(std::iter::repeat_with(loud).take(20))
            .chain(std::iter::repeat_with(silence).take(40));
        let events = run(stream.as_mut(), frames);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], VadEvent::StartOfSpeech);
        match &events[1] {
            VadEvent::EndOfSpeech { speech, duration } => {
                // 20 loud frames, 28 trailing silent frames and the 10 silent prefix frames.
                assert_eq!(speech.samples.len(), (20 + 28 + 10) * 320);
                assert_eq!(*duration, speech.duration());
            }
            other => panic!("expected end of speech, got {other:?}"),
        }
    }

    #[test]
    fn test_short_click_is_ignored() {
        let vad = EnergyVad::load(VadOptions::default()).unwrap();
        let mut stream = vad.stream();
        let frames = [silence(), loud(), silence(), loud(), silence()];
        assert!(run(stream.as_mut(), frames).is_empty());
    }

    #[test]
    fn test_streams_are_independent() {
        let vad = EnergyVad::load(VadOptions::default()).unwrap();
        let mut first = vad.stream();
        let mut second = vad.stream();
        let started = run(first.as_mut(), std::iter::repeat_with(loud).take(5));
        assert_eq!(started, vec![VadEvent::StartOfSpeech]);
        assert!(run(second.as_mut(), std::iter::repeat_with(silence).take(5)).is_empty());
    }

    #[test]
    fn test_long_speech_is_flushed() {
        let vad = EnergyVad::load(VadOptions {
            max_buffered_speech: Duration::from_millis(200),
            ..Default::default()
        })
        .unwrap();
        let mut stream = vad.stream();
        let events = run(stream.as_mut(), std::iter::repeat_with(loud).take(20));
        assert!(events
            .iter()
            .any(|e| matches!(e, VadEvent::EndOfSpeech { .. })));
    }

    #[test]
    fn test_mismatched_sample_rate_is_dropped() {
        let vad = EnergyVad::load(VadOptions::default()).unwrap();
        let mut stream = vad.stream();
        let frame = AudioFrame::new(vec![8000; 160], 8000);
        assert!(stream.push_frame(&frame).is_none());
    }
}
