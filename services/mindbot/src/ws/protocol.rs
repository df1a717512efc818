//! Defines the WebSocket message protocol between a client and the worker.
//!
//! Text frames carry the JSON messages below. Binary frames from the client
//! carry raw little-endian PCM16 microphone audio at the rate declared in
//! `join`.

use mindbot_core::{audio::PIPELINE_SAMPLE_RATE, room::Speaker};
use serde::{Deserialize, Serialize};

fn default_sample_rate() -> u32 {
    PIPELINE_SAMPLE_RATE
}

/// Messages sent from the client to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Joins a room. This must be the first message.
    Join {
        room: String,
        /// Rate of the client's microphone audio and of the audio it expects back.
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
    },
    /// A text message from the user to the agent.
    UserMessage { text: String },
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
}

impl From<Speaker> for Role {
    fn from(speaker: Speaker) -> Self {
        match speaker {
            Speaker::User => Role::User,
            Speaker::Agent => Role::Agent,
        }
    }
}

/// Messages sent from the server to the client.
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirms the join; the agent will greet shortly.
    Joined { room: String },
    /// A final transcription of what the user or the agent said.
    Transcription {
        role: Role,
        text: String,
        is_final: bool,
    },
    /// A chunk of audio data (base64 encoded PCM16) for the agent's voice.
    AudioChunk { data: String, sample_rate: u32 },
    /// Reports an error to the client.
    Error { message: String },
}
