//! Daemon - the assistant service
//!
//! Wires the peripheral, the stage clients, and the trigger sources to the
//! pipeline controller, then runs until interrupted.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::llm::QueryClient;
use crate::pipeline::{PipelineController, PipelineStages};
use crate::trigger::{spawn_console_source, spawn_pin_source};
use crate::voice::arbiter::{AudioArbiter, AudioRole};
use crate::voice::device::CpalDevice;
use crate::voice::playback::SpeechPlayer;
use crate::voice::stt::TranscriptionClient;
use crate::voice::tts::SynthesisFetcher;
use crate::Result;

/// The assistant daemon
pub struct Daemon {
    config: Config,
}

impl Daemon {
    /// Create a daemon from loaded configuration
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run until interrupted
    ///
    /// # Errors
    ///
    /// Returns error if startup fails (data directory, audio device,
    /// missing API keys) or if the pipeline dies unrecoverably.
    pub async fn run(self) -> Result<()> {
        std::fs::create_dir_all(&self.config.data_dir)?;
        tracing::info!(data_dir = %self.config.data_dir.display(), "data directory ready");

        // The microphone configuration is installed before the first
        // trigger so a press can start recording immediately
        let mut arbiter = AudioArbiter::new(Box::new(CpalDevice::new()));
        arbiter.reconfigure(AudioRole::Capture)?;

        let transcriber =
            TranscriptionClient::new(&self.config.stt, Some(self.config.transcript_path()))?;
        let query = QueryClient::new(&self.config.llm)?;
        let synthesizer = SynthesisFetcher::new(&self.config.tts, self.config.synthesis_path())?;

        let stages = PipelineStages {
            arbiter,
            capture: self.config.capture.clone(),
            recording_path: self.config.recording_path(),
            transcriber: Box::new(transcriber),
            query: Box::new(query),
            synthesizer: Box::new(synthesizer),
            player: Arc::new(SpeechPlayer),
        };

        let (trigger_tx, trigger_rx) = mpsc::channel(4);
        spawn_console_source(trigger_tx.clone());
        if let Some(pin) = &self.config.trigger_pin {
            tracing::info!(pin = %pin.display(), "watching push-to-talk pin");
            spawn_pin_source(pin.clone(), trigger_tx.clone());
        }
        // Held so the controller outlives any one trigger source
        let _trigger_tx = trigger_tx;

        let (controller, mut status_rx) = PipelineController::new(stages, trigger_rx);

        // The display collaborator's seam: every transition and failure
        // reason arrives here
        tokio::spawn(async move {
            while status_rx.changed().await.is_ok() {
                let update = status_rx.borrow_and_update().clone();
                tracing::info!(state = %update.state, "{}", update.message);
            }
        });

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = shutdown_tx.send(()).await;
            }
        });

        tracing::info!("assistant ready - press the button or type 's'");
        controller.run(&mut shutdown_rx).await?;

        tracing::info!("daemon stopped");
        Ok(())
    }
}
