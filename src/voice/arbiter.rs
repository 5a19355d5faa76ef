//! Arbitration of the shared audio peripheral
//!
//! One peripheral, two roles, never both. The arbiter owns the device and
//! hands it out as a role-scoped lease; acquiring a lease for one role
//! tears down whatever configuration the other role left behind and
//! installs the requested one. At most one lease can be outstanding: the
//! device is moved out of the arbiter into the lease, so a second acquire
//! fails until the first lease is returned.
//!
//! The arbiter holds no lock of its own. Callers serialize through the
//! pipeline controller, whose state machine never runs a capture-active
//! and a playback-active worker at the same time.

use std::time::Duration;

use super::device::AudioDevice;
use crate::{Error, Result};

/// Role the peripheral is currently configured for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioRole {
    /// Microphone input
    Capture,
    /// Speaker output
    Playback,
}

/// Owner and gatekeeper of the shared audio peripheral
pub struct AudioArbiter {
    device: Option<Box<dyn AudioDevice>>,
    configured: Option<AudioRole>,
}

impl AudioArbiter {
    /// Wrap a peripheral; no role is configured yet
    #[must_use]
    pub fn new(device: Box<dyn AudioDevice>) -> Self {
        Self {
            device: Some(device),
            configured: None,
        }
    }

    /// Role the peripheral is currently configured for, if any
    #[must_use]
    pub const fn configured_role(&self) -> Option<AudioRole> {
        self.configured
    }

    /// Tear down the active configuration and install `role` without
    /// granting a lease, leaving the peripheral ready for the next stage
    ///
    /// # Errors
    ///
    /// Returns error if a lease is outstanding or the device cannot be
    /// configured.
    pub fn reconfigure(&mut self, role: AudioRole) -> Result<()> {
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| Error::Audio("peripheral already leased".to_string()))?;
        install(device.as_mut(), role)?;
        self.configured = Some(role);
        Ok(())
    }

    /// Grant exclusive microphone access
    ///
    /// # Errors
    ///
    /// Returns error if a lease is outstanding or configuration fails.
    pub fn acquire_capture(&mut self) -> Result<CaptureLease> {
        let mut device = self
            .device
            .take()
            .ok_or_else(|| Error::Audio("peripheral already leased".to_string()))?;

        if let Err(e) = install(device.as_mut(), AudioRole::Capture) {
            self.device = Some(device);
            return Err(e);
        }
        self.configured = Some(AudioRole::Capture);
        tracing::debug!("capture lease granted");
        Ok(CaptureLease { device })
    }

    /// Grant exclusive speaker access
    ///
    /// # Errors
    ///
    /// Returns error if a lease is outstanding or configuration fails.
    pub fn acquire_playback(&mut self) -> Result<PlaybackLease> {
        let mut device = self
            .device
            .take()
            .ok_or_else(|| Error::Audio("peripheral already leased".to_string()))?;

        if let Err(e) = install(device.as_mut(), AudioRole::Playback) {
            self.device = Some(device);
            return Err(e);
        }
        self.configured = Some(AudioRole::Playback);
        tracing::debug!("playback lease granted");
        Ok(PlaybackLease { device })
    }

    /// Return a capture lease; the microphone configuration stays active
    pub fn release_capture(&mut self, lease: CaptureLease) {
        self.device = Some(lease.device);
        tracing::debug!("capture lease returned");
    }

    /// Return a playback lease; the speaker configuration stays active
    pub fn release_playback(&mut self, lease: PlaybackLease) {
        self.device = Some(lease.device);
        tracing::debug!("playback lease returned");
    }
}

/// Tear down and install the requested role
fn install(device: &mut dyn AudioDevice, role: AudioRole) -> Result<()> {
    device.teardown();
    match role {
        AudioRole::Capture => device.configure_capture(),
        AudioRole::Playback => device.configure_playback(),
    }
}

/// Exclusive microphone ownership for the duration of one capture
pub struct CaptureLease {
    device: Box<dyn AudioDevice>,
}

impl CaptureLease {
    /// Read up to `buf.len()` bytes of raw sample words
    ///
    /// # Errors
    ///
    /// Returns error if the peripheral read fails.
    pub fn read_block(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.device.read_block(buf, timeout)
    }
}

/// Exclusive speaker ownership for the duration of one playback
pub struct PlaybackLease {
    device: Box<dyn AudioDevice>,
}

impl PlaybackLease {
    /// Queue decoded samples for output
    ///
    /// # Errors
    ///
    /// Returns error if the peripheral write fails.
    pub fn write_samples(&mut self, samples: &[i16], sample_rate: u32, channels: u16) -> Result<()> {
        self.device.write_samples(samples, sample_rate, channels)
    }

    /// Block until queued output has played out
    ///
    /// # Errors
    ///
    /// Returns error if the peripheral is unavailable.
    pub fn drain(&mut self) -> Result<()> {
        self.device.drain()
    }
}
