//! MindBot Worker Library Crate
//!
//! Configuration, logging, prewarming and session assembly for the MindBot
//! voice agent, plus the console and WebSocket rooms it can serve. The
//! `mindbot` binary is a thin wrapper around this library.

pub mod audio_utils;
pub mod cli;
pub mod config;
pub mod console;
pub mod entrypoint;
pub mod logging;
pub mod prewarm;
pub mod router;
pub mod worker;
pub mod ws;
#[cfg(test)]
mod test_support;
