//! Manages the WebSocket connection lifecycle for one agent job.
//!
//! After the `join` handshake the socket is bridged to an in-process room:
//! client frames become room input, room output becomes server messages.

use super::protocol::{ClientMessage, ServerMessage};
use crate::{audio_utils::PcmResampler, audio_utils::SUPPORTED_CLIENT_RATES, worker::Worker};
use anyhow::{Result, anyhow, ensure};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use mindbot_core::{
    audio::{AudioFrame, PIPELINE_SAMPLE_RATE, encode_i16},
    room::{LocalParticipant, LocalRoom, RoomEvent, RoomOutput},
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{Instrument, Span, debug, error, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(worker): State<Arc<Worker>>) -> Response {
    ws.on_upgrade(move |socket| worker.track(handle_socket(socket, worker.clone())))
}

/// Parses the `join` message into a room name and client sample rate.
fn parse_join(text: &str) -> Result<(String, u32)> {
    match serde_json::from_str::<ClientMessage>(text)? {
        ClientMessage::Join { room, sample_rate } => {
            ensure!(!room.trim().is_empty(), "`room` must not be empty");
            ensure!(
                SUPPORTED_CLIENT_RATES.contains(&sample_rate),
                "Unsupported sample rate {sample_rate} Hz"
            );
            Ok((room, sample_rate))
        }
        _ => Err(anyhow!("First message must be `join`")),
    }
}

/// Main handler for an individual WebSocket connection.
#[instrument(name = "ws_session", skip_all, fields(connection_id))]
async fn handle_socket(socket: WebSocket, worker: Arc<Worker>) {
    Span::current().record("connection_id", &Uuid::new_v4().to_string());
    info!("New WebSocket connection. Awaiting join...");

    let (mut socket_tx, mut socket_rx) = socket.split();

    let join = match socket_rx.next().await {
        Some(Ok(Message::Text(text))) => parse_join(&text),
        Some(Ok(_)) => Err(anyhow!("First message was not a text `join` message.")),
        Some(Err(e)) => {
            warn!(error = %e, "WebSocket error before join.");
            return;
        }
        None => {
            info!("Client disconnected before joining.");
            return;
        }
    };
    let resamplers = join.and_then(|(room, sample_rate)| {
        let input = PcmResampler::between(sample_rate, PIPELINE_SAMPLE_RATE)?;
        let output = PcmResampler::between(PIPELINE_SAMPLE_RATE, sample_rate)?;
        Ok((room, sample_rate, input, output))
    });
    let (room_name, sample_rate, input_resampler, output_resampler) = match resamplers {
        Ok(joined) => joined,
        Err(e) => {
            error!("Join failed: {:?}", e);
            let _ = send_msg(
                &mut socket_tx,
                ServerMessage::Error {
                    message: e.to_string(),
                },
            )
            .await;
            return;
        }
    };

    if send_msg(
        &mut socket_tx,
        ServerMessage::Joined {
            room: room_name.clone(),
        },
    )
    .await
    .is_err()
    {
        error!("Failed to send Joined message to client.");
        return;
    }

    let (room, LocalParticipant { input, output }) = LocalRoom::new(room_name);
    let reader = tokio::spawn(
        forward_input(socket_rx, input, sample_rate, input_resampler).instrument(Span::current()),
    );
    let writer = tokio::spawn(
        forward_output(socket_tx, output, sample_rate, output_resampler)
            .instrument(Span::current()),
    );

    let result = worker.run_job(Arc::new(room)).await;
    reader.abort();

    // The writer finishes once the job has dropped the room.
    let mut socket_tx = match writer.await {
        Ok(socket_tx) => socket_tx,
        Err(e) => {
            error!(error = ?e, "Output task failed.");
            return;
        }
    };
    if let Err(e) = result {
        error!(error = ?e, "Agent job terminated with error.");
        let _ = send_msg(
            &mut socket_tx,
            ServerMessage::Error {
                message: format!("{e:#}"),
            },
        )
        .await;
    }
    let _ = socket_tx.close().await;
    info!("WebSocket connection closed.");
}

/// Turns client frames into room input until the client leaves.
async fn forward_input(
    mut socket_rx: SplitStream<WebSocket>,
    input: mpsc::Sender<RoomEvent>,
    sample_rate: u32,
    mut resampler: Option<PcmResampler>,
) {
    while let Some(msg_result) = socket_rx.next().await {
        let event = match msg_result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::UserMessage { text }) => RoomEvent::Text(text),
                Ok(_) => {
                    warn!("Ignoring unexpected message after join.");
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed client message.");
                    continue;
                }
            },
            Ok(Message::Binary(data)) => {
                let frame = AudioFrame::from_le_bytes(&data, sample_rate);
                let samples = match resampler.as_mut() {
                    Some(resampler) => match resampler.push(&frame.samples) {
                        Ok(samples) => samples,
                        Err(e) => {
                            error!(error = ?e, "Failed to resample client audio.");
                            continue;
                        }
                    },
                    None => frame.samples,
                };
                if samples.is_empty() {
                    continue;
                }
                RoomEvent::Audio(AudioFrame::new(samples, PIPELINE_SAMPLE_RATE))
            }
            Ok(Message::Close(_)) => {
                info!("Client sent close frame.");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => continue,
            Err(e) => {
                error!("Error receiving from client WebSocket: {:?}", e);
                break;
            }
        };
        if input.send(event).await.is_err() {
            debug!("Session stopped reading room input.");
            return;
        }
    }
    let _ = input.send(RoomEvent::Disconnected).await;
}

/// Sends room output to the client. Returns the sink once the room is gone.
async fn forward_output(
    mut socket_tx: SplitSink<WebSocket, Message>,
    mut output: mpsc::UnboundedReceiver<RoomOutput>,
    sample_rate: u32,
    mut resampler: Option<PcmResampler>,
) -> SplitSink<WebSocket, Message> {
    while let Some(out) = output.recv().await {
        let msg = match out {
            RoomOutput::Transcription {
                speaker,
                text,
                is_final,
            } => ServerMessage::Transcription {
                role: speaker.into(),
                text,
                is_final,
            },
            RoomOutput::Audio(frame) => {
                let samples = match resampler.as_mut() {
                    Some(resampler) => match resampler.convert(&frame.samples) {
                        Ok(samples) => samples,
                        Err(e) => {
                            error!(error = ?e, "Failed to resample agent audio.");
                            continue;
                        }
                    },
                    None => frame.samples,
                };
                ServerMessage::AudioChunk {
                    data: encode_i16(&samples),
                    sample_rate,
                }
            }
        };
        if let Err(e) = send_msg(&mut socket_tx, msg).await {
            warn!(error = ?e, "Failed to send to client; dropping further output.");
            break;
        }
    }
    socket_tx
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
