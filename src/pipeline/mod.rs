//! Pipeline state machine
//!
//! One voice interaction is a strict sequence of stages over a single
//! shared audio peripheral. The controller owns the stage bundle and the
//! only copy of the state; everything else observes through a watch
//! channel.

mod controller;

pub use controller::{PipelineController, PipelineStages};

/// Where the pipeline currently is
///
/// Exactly one value at any instant, owned by the controller. A new
/// capture may only start from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Waiting for a trigger
    Idle,
    /// Recording from the microphone
    Capturing,
    /// Waiting on the transcription service
    Transcribing,
    /// Waiting on the language model
    Querying,
    /// Streaming synthesized speech to storage
    Synthesizing,
    /// Playing the response
    Playing,
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Transcribing => "transcribing",
            Self::Querying => "querying",
            Self::Synthesizing => "synthesizing",
            Self::Playing => "playing",
        };
        f.write_str(name)
    }
}

/// State plus a human-readable line for the display surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Current pipeline state
    pub state: PipelineState,
    /// What just happened, suitable for a small screen
    pub message: String,
}

impl StatusUpdate {
    /// Initial status before the first trigger
    #[must_use]
    pub fn ready() -> Self {
        Self {
            state: PipelineState::Idle,
            message: "ready".to_string(),
        }
    }
}
