//! Lark - push-to-talk voice assistant pipeline for shared-audio devices
//!
//! One button press runs one interaction: record from the microphone,
//! transcribe remotely, ask a language model, fetch synthesized speech,
//! and play it back - over a single audio peripheral that can be wired
//! for only one of those roles at a time.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                Trigger sources                │
//! │        push-to-talk pin  │  console           │
//! └──────────────────┬────────────────────────────┘
//!                    │ channel
//! ┌──────────────────▼────────────────────────────┐
//! │             Pipeline controller               │
//! │  Idle → Capture → Transcribe → Query          │
//! │       → Synthesize → Play → Idle              │
//! └───────┬──────────────────────────────┬────────┘
//!         │ leases                       │ HTTP
//! ┌───────▼────────┐            ┌────────▼────────┐
//! │ Audio arbiter  │            │ STT / LLM / TTS │
//! │ mic ⇄ speaker  │            │    services     │
//! └────────────────┘            └─────────────────┘
//! ```
//!
//! The controller is the only writer of the pipeline state. The shared
//! peripheral is granted to exactly one role at a time through the
//! arbiter's leases, and a trigger is accepted only while the controller
//! holds the stage bundle.

pub mod config;
pub mod daemon;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod retry;
pub mod trigger;
pub mod voice;

pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, Result};
pub use pipeline::{PipelineController, PipelineStages, PipelineState, StatusUpdate};
pub use trigger::Trigger;
