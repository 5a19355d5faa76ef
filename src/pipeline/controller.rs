//! Pipeline controller
//!
//! The controller is the single writer of the pipeline state. Triggers
//! arrive over a channel; a trigger is accepted only while the controller
//! still holds the stage bundle. On acceptance the bundle moves into a
//! spawned turn task and comes back through its join handle, so "busy" is
//! not a flag anyone else can race on, it is ownership. Two triggers in
//! the same window cannot both start a run.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::CaptureConfig;
use crate::pipeline::{PipelineState, StatusUpdate};
use crate::trigger::Trigger;
use crate::voice::arbiter::{AudioArbiter, AudioRole};
use crate::voice::capture::CaptureWorker;
use crate::voice::playback::Player;
use crate::voice::stt::Transcriber;
use crate::voice::tts::SpeechSynthesizer;
use crate::llm::QueryEngine;
use crate::{Error, Result};

/// Everything one voice interaction needs, owned as a unit
///
/// The bundle moves into the turn task when a trigger is accepted and is
/// returned when the turn ends, success or failure.
pub struct PipelineStages {
    /// Arbiter holding the shared audio peripheral
    pub arbiter: AudioArbiter,
    /// Capture settings for the recording stage
    pub capture: CaptureConfig,
    /// Where the recording stage writes its segment
    pub recording_path: PathBuf,
    /// Transcription stage
    pub transcriber: Box<dyn Transcriber>,
    /// Query stage
    pub query: Box<dyn QueryEngine>,
    /// Synthesis stage
    pub synthesizer: Box<dyn SpeechSynthesizer>,
    /// Playback stage
    pub player: Arc<dyn Player>,
}

/// The state machine driver
pub struct PipelineController {
    stages: Option<PipelineStages>,
    trigger_rx: mpsc::Receiver<Trigger>,
    status_tx: watch::Sender<StatusUpdate>,
}

impl PipelineController {
    /// Create a controller and the status channel the display surface
    /// subscribes to
    #[must_use]
    pub fn new(
        stages: PipelineStages,
        trigger_rx: mpsc::Receiver<Trigger>,
    ) -> (Self, watch::Receiver<StatusUpdate>) {
        let (status_tx, status_rx) = watch::channel(StatusUpdate::ready());
        (
            Self {
                stages: Some(stages),
                trigger_rx,
                status_tx,
            },
            status_rx,
        )
    }

    /// Drive the pipeline until shutdown or until all trigger sources are
    /// gone
    ///
    /// # Errors
    ///
    /// Returns error if a turn task dies without handing the stage bundle
    /// back (a panic in a worker).
    pub async fn run(mut self, shutdown_rx: &mut mpsc::Receiver<()>) -> Result<()> {
        let mut in_flight: Option<JoinHandle<(PipelineStages, String)>> = None;

        loop {
            tokio::select! {
                maybe_trigger = self.trigger_rx.recv() => {
                    let Some(trigger) = maybe_trigger else { break };
                    match self.stages.take() {
                        Some(stages) => {
                            tracing::info!(source = %trigger, "trigger accepted");
                            publish(&self.status_tx, PipelineState::Capturing, "listening, speak now");
                            in_flight = Some(tokio::spawn(run_turn(stages, self.status_tx.clone())));
                        }
                        None => {
                            tracing::warn!(source = %trigger, "pipeline busy, trigger ignored");
                        }
                    }
                }
                finished = async { in_flight.as_mut().expect("in-flight handle").await },
                    if in_flight.is_some() =>
                {
                    in_flight = None;
                    match finished {
                        Ok((stages, message)) => {
                            // The bundle is back before Idle is announced,
                            // so an observer seeing Idle can trigger again
                            self.stages = Some(stages);
                            publish(&self.status_tx, PipelineState::Idle, message);
                        }
                        Err(e) => {
                            return Err(Error::Audio(format!("pipeline task failed: {e}")));
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("shutdown requested");
                    break;
                }
            }
        }

        // Let an in-flight turn finish before tearing down
        if let Some(handle) = in_flight {
            if let Ok((stages, _)) = handle.await {
                self.stages = Some(stages);
            }
        }

        Ok(())
    }
}

/// How a turn ended when no stage failed
enum TurnOutcome {
    /// The response played to completion
    Played,
    /// The transcript was empty; later stages never ran
    NoSpeech,
}

/// One full voice interaction; always hands the bundle back along with
/// the terminal status line (published by the controller once the bundle
/// is restored)
async fn run_turn(
    mut stages: PipelineStages,
    status: watch::Sender<StatusUpdate>,
) -> (PipelineStages, String) {
    let message = match run_stages(&mut stages, &status).await {
        Ok(TurnOutcome::Played) => "ready".to_string(),
        Ok(TurnOutcome::NoSpeech) => "no speech detected, try again".to_string(),
        Err(e) => {
            tracing::error!(error = %e, "pipeline run failed");
            format!("failed: {e}")
        }
    };
    (stages, message)
}

async fn run_stages(
    stages: &mut PipelineStages,
    status: &watch::Sender<StatusUpdate>,
) -> Result<TurnOutcome> {
    // Capturing: the worker gets the lease and runs on a blocking task;
    // the lease comes back through the join result on every path
    let lease = stages.arbiter.acquire_capture()?;
    let worker = CaptureWorker::new(stages.capture.clone(), stages.recording_path.clone());
    let stop = Arc::new(AtomicBool::new(false));
    let capture = tokio::task::spawn_blocking(move || worker.run(lease, &stop));
    let (lease, segment) = capture
        .await
        .map_err(|e| Error::Capture(format!("capture task failed: {e}")))?;
    stages.arbiter.release_capture(lease);
    let segment = segment?;

    publish(status, PipelineState::Transcribing, "transcribing audio");
    let transcript = stages.transcriber.transcribe(&segment).await?;
    if transcript.trim().is_empty() {
        tracing::info!("no speech detected");
        return Ok(TurnOutcome::NoSpeech);
    }

    publish(status, PipelineState::Querying, "asking the assistant");
    let reply = stages.query.ask(transcript.trim()).await?;
    tracing::info!(reply = %reply, "assistant replied");

    publish(status, PipelineState::Synthesizing, "fetching speech");
    let asset = stages.synthesizer.fetch(&reply).await?;

    publish(status, PipelineState::Playing, "playing response");
    let lease = stages.arbiter.acquire_playback()?;
    let player = Arc::clone(&stages.player);
    let asset_path = asset.path.clone();
    let playback = tokio::task::spawn_blocking(move || {
        let mut lease = lease;
        let result = player.play(&asset_path, &mut lease);
        (lease, result)
    });
    let (lease, played) = playback
        .await
        .map_err(|e| Error::Playback(format!("playback task failed: {e}")))?;
    stages.arbiter.release_playback(lease);

    // The microphone configuration comes back before the outcome is
    // reported, whether playback succeeded or not
    stages.arbiter.reconfigure(AudioRole::Capture)?;
    played?;

    // The asset is consumed; the next turn overwrites the path anyway
    if let Err(e) = std::fs::remove_file(&asset.path) {
        tracing::debug!(error = %e, "asset cleanup failed");
    }

    Ok(TurnOutcome::Played)
}

fn publish(
    status: &watch::Sender<StatusUpdate>,
    state: PipelineState,
    message: impl Into<String>,
) {
    let update = StatusUpdate {
        state,
        message: message.into(),
    };
    tracing::debug!(state = %update.state, message = %update.message, "status");
    status.send_replace(update);
}
