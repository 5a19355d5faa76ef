//! Trigger sources for the pipeline
//!
//! Two surfaces start an interaction: a push-to-talk pin (active-low,
//! polled from its GPIO value file) and a single character on the debug
//! console. Both feed the same channel into the controller; no other
//! console input is recognized.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Which surface fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// The push-to-talk pin
    Button,
    /// The debug console
    Console,
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Button => f.write_str("button"),
            Self::Console => f.write_str("console"),
        }
    }
}

/// How often the pin is sampled
const PIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Hold-off after a press so one push fires once
const PIN_DEBOUNCE: Duration = Duration::from_millis(500);

/// A low level on an active-low pin reads as "0"
fn level_is_low(raw: &str) -> bool {
    raw.trim() == "0"
}

/// A press is the high-to-low transition, not the held level
const fn falling_edge(was_low: bool, is_low: bool) -> bool {
    is_low && !was_low
}

/// Watch the console for the record command (`s`)
pub fn spawn_console_source(tx: mpsc::Sender<Trigger>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut stdin = tokio::io::stdin();
        let mut byte = [0u8; 1];

        loop {
            match stdin.read(&mut byte).await {
                Ok(0) => break,
                Ok(_) => {
                    if matches!(byte[0], b's' | b'S')
                        && tx.send(Trigger::Console).await.is_err()
                    {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "console read failed");
                    break;
                }
            }
        }
        tracing::debug!("console trigger source stopped");
    })
}

/// Poll the push-to-talk pin's value file
pub fn spawn_pin_source(path: PathBuf, tx: mpsc::Sender<Trigger>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PIN_POLL_INTERVAL);
        let mut was_low = false;
        let mut reported_error = false;

        loop {
            interval.tick().await;

            let raw = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => {
                    reported_error = false;
                    raw
                }
                Err(e) => {
                    if !reported_error {
                        tracing::warn!(path = %path.display(), error = %e, "pin read failed");
                        reported_error = true;
                    }
                    continue;
                }
            };

            let is_low = level_is_low(&raw);
            if falling_edge(was_low, is_low) {
                tracing::debug!("button pressed");
                if tx.send(Trigger::Button).await.is_err() {
                    break;
                }
                tokio::time::sleep(PIN_DEBOUNCE).await;
            }
            was_low = is_low;
        }
        tracing::debug!("pin trigger source stopped");
    })
}
