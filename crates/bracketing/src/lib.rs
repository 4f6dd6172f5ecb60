//! Bracket/HDR Sequencer
//!
//! Drives multi-frame exposure or focus sweeps during a burst capture:
//! - Linear stepping from `min` to `max` over the burst length
//! - Frame skipping that keeps the sweep aligned with the sensor latency
//! - Saving and restoring the 3A modes around the sweep

mod sequencer;
mod timeline;

pub use sequencer::BracketSequencer;
pub use timeline::TimelinePlan;

use aaa_control::AaaError;
use camera_capture::DeviceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bracketing error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BracketError {
    #[error("Invalid bracket range: {0}")]
    InvalidRange(String),

    #[error("3A error: {0}")]
    Aaa(#[from] AaaError),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),
}

/// Control swept by the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BracketMode {
    #[default]
    None,
    /// Exposure bias in EV
    Exposure,
    /// Lens position in driver steps
    Focus,
}

/// Inclusive sweep range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BracketRange {
    pub min: f32,
    pub max: f32,
}

impl BracketRange {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Check that the bounds are finite and ordered
    pub fn validate(&self) -> Result<(), BracketError> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(BracketError::InvalidRange(format!(
                "non-finite bounds {}..{}",
                self.min, self.max
            )));
        }
        if self.min > self.max {
            return Err(BracketError::InvalidRange(format!(
                "min {} above max {}",
                self.min, self.max
            )));
        }
        Ok(())
    }
}

/// Current position of a sweep
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BracketState {
    pub mode: BracketMode,
    /// Value applied by the next step
    pub current: f32,
    pub min: f32,
    pub max: f32,
    pub step: f32,
}

impl BracketState {
    /// Check if a sweep is in progress
    pub fn is_active(&self) -> bool {
        self.mode != BracketMode::None
    }
}
