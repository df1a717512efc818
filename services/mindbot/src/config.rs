use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

pub const DEEPGRAM_API_KEY: &str = "DEEPGRAM_API_KEY";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
pub const ELEVEN_API_KEY: &str = "ELEVEN_API_KEY";

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub agent_name: String,
    pub agent_nickname: String,
    pub llm_model: String,
    pub stt_model: String,
    pub stt_language: String,
    pub tts_voice_id: String,
    pub tts_model: String,
    pub deepgram_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub eleven_api_key: Option<String>,
    pub bind_address: SocketAddr,
    pub log_level: Level,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_name: "MindBot".to_string(),
            agent_nickname: "Stoner MindBot".to_string(),
            llm_model: "gpt-4.1".to_string(),
            stt_model: "nova-3".to_string(),
            stt_language: "multi".to_string(),
            tts_voice_id: "5I61ElyiGkOaijpW7NOD".to_string(),
            tts_model: "eleven_flash_v2_5".to_string(),
            deepgram_api_key: None,
            openai_api_key: None,
            eleven_api_key: None,
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: Level::INFO,
        }
    }
}

fn var_or(name: &str, default: String) -> String {
    std::env::var(name).unwrap_or(default)
}

impl AgentConfig {
    /// Loads configuration from environment variables.
    ///
    /// Missing credentials are not an error here; see [`AgentConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        let defaults = Self::default();

        let bind_address = match std::env::var("BIND_ADDRESS") {
            Ok(value) => value
                .parse::<SocketAddr>()
                .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?,
            Err(_) => defaults.bind_address,
        };

        let log_level = match std::env::var("RUST_LOG") {
            Ok(value) => value.parse::<Level>().map_err(|_| {
                ConfigError::InvalidValue(
                    "RUST_LOG".to_string(),
                    format!("'{}' is not a valid log level", value),
                )
            })?,
            Err(_) => defaults.log_level,
        };

        Ok(Self {
            agent_name: var_or("AGENT_NAME", defaults.agent_name),
            agent_nickname: var_or("AGENT_NICKNAME", defaults.agent_nickname),
            llm_model: var_or("LLM_MODEL", defaults.llm_model),
            stt_model: var_or("STT_MODEL", defaults.stt_model),
            stt_language: var_or("STT_LANGUAGE", defaults.stt_language),
            tts_voice_id: var_or("TTS_VOICE_ID", defaults.tts_voice_id),
            tts_model: var_or("TTS_MODEL", defaults.tts_model),
            deepgram_api_key: std::env::var(DEEPGRAM_API_KEY).ok(),
            openai_api_key: std::env::var(OPENAI_API_KEY).ok(),
            eleven_api_key: std::env::var(ELEVEN_API_KEY).ok(),
            bind_address,
            log_level,
        })
    }

    /// True iff every credential is present and non-empty.
    pub fn validate(&self) -> bool {
        self.missing_credentials().is_empty()
    }

    /// Names of the credential variables that are absent or empty.
    pub fn missing_credentials(&self) -> Vec<&'static str> {
        [
            (DEEPGRAM_API_KEY, &self.deepgram_api_key),
            (OPENAI_API_KEY, &self.openai_api_key),
            (ELEVEN_API_KEY, &self.eleven_api_key),
        ]
        .into_iter()
        .filter(|(_, key)| key.as_deref().is_none_or(|k| k.trim().is_empty()))
        .map(|(name, _)| name)
        .collect()
    }

    /// Fails with [`ConfigError::MissingVar`] naming every absent credential.
    pub fn require_credentials(&self) -> Result<(), ConfigError> {
        let missing = self.missing_credentials();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingVar(missing.join(", ")))
        }
    }
}
