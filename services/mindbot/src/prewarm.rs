//! Per-process resources loaded once, before the first job.

use mindbot_core::vad::{EnergyVad, VadError, VadOptions, VoiceActivityDetector};
use std::sync::{Arc, OnceLock};
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum PrewarmError {
    #[error("Failed to load VAD: {0}")]
    VadLoad(#[from] VadError),
    #[error("Process resources were already prewarmed")]
    AlreadyPrewarmed,
    #[error("Process resources were not prewarmed; the VAD is unavailable")]
    NotPrewarmed,
}

/// Shared, read-only state handed to every job in this process.
#[derive(Default)]
pub struct ProcessResources {
    vad: OnceLock<Arc<dyn VoiceActivityDetector>>,
}

impl ProcessResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// The prewarmed VAD. Jobs share it; they never load their own.
    pub fn vad(&self) -> Result<Arc<dyn VoiceActivityDetector>, PrewarmError> {
        self.vad.get().cloned().ok_or(PrewarmError::NotPrewarmed)
    }

    pub fn is_prewarmed(&self) -> bool {
        self.vad.get().is_some()
    }
}

/// Loads the VAD into `proc`. Runs once per process.
pub fn prewarm(proc: &ProcessResources, options: VadOptions) -> Result<(), PrewarmError> {
    info!("Prewarming models and resources...");
    if proc.is_prewarmed() {
        return Err(PrewarmError::AlreadyPrewarmed);
    }

    let vad = EnergyVad::load(options).inspect_err(|e| {
        error!(error = %e, "Error during prewarming");
    })?;
    proc.vad
        .set(Arc::new(vad))
        .map_err(|_| PrewarmError::AlreadyPrewarmed)?;

    info!("VAD model loaded successfully");
    Ok(())
}
