//! Room Abstraction
//!
//! A room is the transport between one remote participant and an agent
//! session: it delivers user input and carries agent output back.

use crate::audio::AudioFrame;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Agent,
}

/// Input arriving from the remote participant.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomEvent {
    /// A typed chat message.
    Text(String),
    /// A block of microphone audio.
    Audio(AudioFrame),
    /// The participant left; the session should end.
    Disconnected,
}

/// Output published by the session.
#[derive(Debug, Clone, PartialEq)]
pub enum RoomOutput {
    Transcription {
        speaker: Speaker,
        text: String,
        is_final: bool,
    },
    Audio(AudioFrame),
}

#[async_trait]
pub trait Room: Send + Sync {
    fn name(&self) -> &str;

    /// Joins the room. Input may be buffered before this is called.
    async fn connect(&self) -> Result<()>;

    /// Takes the input receiver. Only the first caller gets it.
    fn subscribe(&self) -> Option<mpsc::Receiver<RoomEvent>>;

    async fn publish(&self, output: RoomOutput) -> Result<()>;
}

/// In-process room backed by channels.
pub struct LocalRoom {
    name: String,
    connected: AtomicBool,
    input: Mutex<Option<mpsc::Receiver<RoomEvent>>>,
    output: mpsc::UnboundedSender<RoomOutput>,
}

/// The participant's side of a [`LocalRoom`].
pub struct LocalParticipant {
    pub input: mpsc::Sender<RoomEvent>,
    pub output: mpsc::UnboundedReceiver<RoomOutput>,
}

impl LocalRoom {
    pub fn new(name: impl Into<String>) -> (Self, LocalParticipant) {
        let (input_tx, input_rx) = mpsc::channel(64);
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let room = Self {
            name: name.into(),
            connected: AtomicBool::new(false),
            input: Mutex::new(Some(input_rx)),
            output: output_tx,
        };
        let participant = LocalParticipant {
            input: input_tx,
            output: output_rx,
        };
        (room, participant)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Room for LocalRoom {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> Result<()> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self) -> Option<mpsc::Receiver<RoomEvent>> {
        match self.input.lock() {
            Ok(mut input) => input.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    async fn publish(&self, output: RoomOutput) -> Result<()> {
        self.output
            .send(output)
            .map_err(|_| anyhow!("Participant left room '{}'", self.name))
    }
}
