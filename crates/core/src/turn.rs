use anyhow::Result;
use async_trait::async_trait;

/// Estimates whether the user has finished their conversational turn.
#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
#[async_trait]
pub trait TurnDetector: Send + Sync {
    /// Probability in `0.0..=1.0` that `transcript` is a complete turn.
    async fn predict_end_of_turn(&self, transcript: &str) -> Result<f32>;

    /// Below this probability the session waits longer before replying.
    fn unlikely_threshold(&self) -> f32;
}

const TERMINAL_PUNCTUATION: &[char] = &['.', '!', '?', '。', '！', '？', '؟', '।'];
const CONTINUATION_PUNCTUATION: &[char] = &[',', ';', ':', '-', '–', '、', '，'];

// Words that rarely end a turn, across the languages the STT model is run with.
const TRAILING_WORDS: &[&str] = &[
    "and", "but", "or", "so", "because", "um", "uh", "like", "the", "a", "an", "to", "of", "with",
    "if", "then", "my", "your", "y", "o", "pero", "porque", "que", "el", "la", "et", "mais",
    "donc", "le", "und", "aber", "oder", "weil", "der", "die", "das", "e", "ma", "perché",
];

/// Punctuation and vocabulary heuristics over the transcript tail.
///
/// Works with any language the transcriber punctuates; the vocabulary list
/// only sharpens the "still talking" signal.
#[derive(Debug, Clone)]
pub struct HeuristicTurnDetector {
    unlikely_threshold: f32,
}

impl Default for HeuristicTurnDetector {
    fn default() -> Self {
        Self {
            unlikely_threshold: 0.15,
        }
    }
}

impl HeuristicTurnDetector {
    pub fn new(unlikely_threshold: f32) -> Self {
        Self {
            unlikely_threshold: unlikely_threshold.clamp(0.0, 1.0),
        }
    }

    pub fn score(transcript: &str) -> f32 {
        let text = transcript.trim_end();
        if text.is_empty() {
            return 0.0;
        }
        if text.ends_with("...") || text.ends_with('…') {
            return 0.1;
        }
        if text.ends_with(TERMINAL_PUNCTUATION) {
            return 0.95;
        }
        if text.ends_with(CONTINUATION_PUNCTUATION) {
            return 0.05;
        }
        let last_word = text
            .rsplit(char::is_whitespace)
            .next()
            .unwrap_or_default()
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if TRAILING_WORDS.contains(&last_word.as_str()) {
            return 0.05;
        }
        0.5
    }
}

#[async_trait]
impl TurnDetector for HeuristicTurnDetector {
    async fn predict_end_of_turn(&self, transcript: &str) -> Result<f32> {
        Ok(Self::score(transcript))
    }

    fn unlikely_threshold(&self) -> f32 {
        self.unlikely_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_punctuation_is_likely() {
        assert!(HeuristicTurnDetector::score("What's the weather in Paris?") > 0.9);
        assert!(HeuristicTurnDetector::score("That's wild.") > 0.9);
        assert!(HeuristicTurnDetector::score("天気はどうですか？") > 0.9);
    }

    #[test]
    fn test_trailing_words_are_unlikely() {
        let detector = HeuristicTurnDetector::default();
        for text in ["I was thinking and", "tell me about the", "pero", "Ich glaube, aber"] {
            assert!(
                HeuristicTurnDetector::score(text) < detector.unlikely_threshold(),
                "{text}"
            );
        }
    }

    #[test]
    fn test_continuation_punctuation_and_ellipsis() {
        assert!(HeuristicTurnDetector::score("So, like,") < 0.15);
        assert!(HeuristicTurnDetector::score("Well...") < 0.15);
        assert_eq!(HeuristicTurnDetector::score("   "), 0.0);
    }

    #[test]
    fn test_unpunctuated_is_neutral() {
        assert_eq!(HeuristicTurnDetector::score("tell me a space fact"), 0.5);
    }

    #[tokio::test]
    async fn test_predict_matches_score() {
        let detector = HeuristicTurnDetector::new(2.0);
        assert_eq!(detector.unlikely_threshold(), 1.0);
        let p = detector.predict_end_of_turn("Thanks, dude!").await.unwrap();
        assert_eq!(p, HeuristicTurnDetector::score("Thanks, dude!"));
    }
}
