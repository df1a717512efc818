//! Console room: talk to the agent from a terminal.
//!
//! Each stdin line is sent as a typed user message; transcriptions are printed
//! to stdout. Agent audio is dropped because there is no playback device.

use mindbot_core::room::{LocalParticipant, LocalRoom, RoomEvent, RoomOutput, Speaker};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, warn};

pub const CONSOLE_ROOM: &str = "console";

/// Creates the console room and starts bridging it to stdin and stdout.
pub fn console_room() -> (LocalRoom, JoinHandle<()>, JoinHandle<()>) {
    let (room, LocalParticipant { input, output }) = LocalRoom::new(CONSOLE_ROOM);
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let reader = tokio::spawn(read_lines(stdin, input).instrument(Span::current()));
    let writer = tokio::spawn(print_output(tokio::io::stdout(), output).instrument(Span::current()));
    (room, reader, writer)
}

fn label(speaker: Speaker) -> &'static str {
    match speaker {
        Speaker::User => "you",
        Speaker::Agent => "agent",
    }
}

/// Forwards non-empty lines as text input; end of input disconnects.
async fn read_lines<R>(reader: R, input: mpsc::Sender<RoomEvent>)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if input.send(RoomEvent::Text(line.to_string())).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to read from stdin");
                break;
            }
        }
    }
    debug!("Console input closed");
    let _ = input.send(RoomEvent::Disconnected).await;
}

async fn print_output<W>(mut writer: W, mut output: mpsc::UnboundedReceiver<RoomOutput>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(out) = output.recv().await {
        let line = match out {
            // Typed input is already on screen.
            RoomOutput::Transcription {
                speaker: Speaker::User,
                ..
            } => continue,
            RoomOutput::Transcription { speaker, text, .. } => {
                format!("{}: {}\n", label(speaker), text)
            }
            RoomOutput::Audio(frame) => {
                debug!(
                    duration_ms = frame.duration().as_millis() as u64,
                    "Dropping agent audio in console mode"
                );
                continue;
            }
        };
        if writer.write_all(line.as_bytes()).await.is_err() || writer.flush().await.is_err() {
            return;
        }
    }
}
