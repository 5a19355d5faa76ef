use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lark_assistant::config::CaptureConfig;
use lark_assistant::voice::arbiter::AudioArbiter;
use lark_assistant::voice::capture::CaptureWorker;
use lark_assistant::voice::device::CpalDevice;
use lark_assistant::voice::playback::{Player, SpeechPlayer};
use lark_assistant::voice::tts::{SpeechSynthesizer, SynthesisFetcher};
use lark_assistant::{Config, Daemon};

/// Lark - push-to-talk voice assistant
#[derive(Parser)]
#[command(name = "lark", version, about)]
struct Cli {
    /// Path to a config file (default: the standard config location)
    #[arg(short, long, env = "LARK_CONFIG")]
    config: Option<PathBuf>,

    /// GPIO value file for the push-to-talk pin (active-low)
    #[arg(long, env = "LARK_TRIGGER_PIN")]
    trigger_pin: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input by recording a short segment
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output with a generated tone
    TestSpeaker,
    /// Fetch and play synthesis for arbitrary text
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the speech output.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,lark_assistant=info",
        1 => "info,lark_assistant=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(pin) = cli.trigger_pin {
        config.trigger_pin = Some(pin);
    }

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker(),
            Command::Say { text } => say(&config, &text).await,
        };
    }

    tracing::info!(trigger_pin = ?config.trigger_pin, "starting assistant");
    Daemon::new(config).run().await?;
    Ok(())
}

/// Record a short segment and report what landed on disk
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Recording for {duration} seconds - speak into your microphone!");

    let mut arbiter = AudioArbiter::new(Box::new(CpalDevice::new()));
    let lease = arbiter.acquire_capture()?;

    let path = std::env::temp_dir().join("lark-mic-test.wav");
    let capture_config = CaptureConfig {
        max_duration: Duration::from_secs(duration),
        block_bytes: 8 * 1024,
        read_timeout: Duration::from_millis(500),
    };
    let worker = CaptureWorker::new(capture_config, path);
    let stop = Arc::new(AtomicBool::new(false));

    let (lease, result) = tokio::task::spawn_blocking(move || worker.run(lease, &stop)).await?;
    arbiter.release_capture(lease);
    let segment = result?;

    println!(
        "Recorded {} PCM bytes to {}",
        segment.data_bytes,
        segment.path.display()
    );
    if segment.data_bytes == 0 {
        println!("No audio arrived - check your input device and levels.");
    }
    Ok(())
}

/// Play two seconds of a 440 Hz tone
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn test_speaker() -> anyhow::Result<()> {
    println!("Playing a 440 Hz tone for 2 seconds...");

    let mut arbiter = AudioArbiter::new(Box::new(CpalDevice::new()));
    let mut lease = arbiter.acquire_playback()?;

    let sample_rate = 24_000u32;
    let samples: Vec<i16> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            let value = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.3;
            (value * 32767.0) as i16
        })
        .collect();

    lease.write_samples(&samples, sample_rate, 1)?;
    lease.drain()?;
    arbiter.release_playback(lease);

    println!("Done. If you heard nothing, check your output device.");
    Ok(())
}

/// Fetch synthesis for `text` and play it
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Fetching synthesis for: \"{text}\"");

    std::fs::create_dir_all(&config.data_dir)?;
    let fetcher = SynthesisFetcher::new(&config.tts, config.synthesis_path())?;
    let asset = fetcher.fetch(text).await?;
    println!("Got {} bytes of audio", asset.bytes);

    let mut arbiter = AudioArbiter::new(Box::new(CpalDevice::new()));
    let mut lease = arbiter.acquire_playback()?;
    SpeechPlayer.play(&asset.path, &mut lease)?;
    arbiter.release_playback(lease);

    Ok(())
}
