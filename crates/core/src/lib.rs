pub mod audio;
pub mod facts;
pub mod llm_client;
pub mod metrics;
pub mod persona;
pub mod room;
pub mod session;
pub mod speech;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;
pub mod tools;
pub mod turn;
pub mod vad;
