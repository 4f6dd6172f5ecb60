//! 3A Control
//!
//! Interface to the auto-exposure / auto-focus / auto-white-balance
//! subsystem. The algorithms themselves live behind [`AaaControl`];
//! asynchronous results (autofocus completion, scene detection) are pushed to
//! an [`AaaListener`] registered by the orchestrator.

mod mock;

pub use mock::{AaaCall, MockAaa, MockAaaProbe};

use camera_capture::DeviceError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// 3A error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AaaError {
    #[error("3A is not enabled")]
    NotEnabled,

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("3A call failed: {0}")]
    Failed(String),

    #[error("Sensor write failed: {0}")]
    Device(#[from] DeviceError),
}

/// Focus mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FocusMode {
    #[default]
    Auto,
    Macro,
    Continuous,
    Infinity,
    Fixed,
    /// Lens position driven externally (focus bracketing)
    Manual,
}

impl FocusMode {
    /// Check if an autofocus search makes sense in this mode
    pub fn supports_search(&self) -> bool {
        matches!(self, FocusMode::Auto | FocusMode::Macro | FocusMode::Continuous)
    }
}

/// Auto-exposure mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AeMode {
    #[default]
    Auto,
    /// Exposure driven externally (exposure bracketing)
    Manual,
}

/// Scene reported by scene detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SceneMode {
    Auto,
    Portrait,
    Landscape,
    Night,
    Backlight,
    Sports,
}

/// Receiver of asynchronous 3A results
pub trait AaaListener: Send + Sync {
    /// Autofocus search finished
    fn auto_focus_done(&self, success: bool);

    /// Scene detection changed its verdict
    fn scene_detected(&self, scene: SceneMode, hdr_recommended: bool);
}

/// 3A subsystem as seen by the orchestrator
pub trait AaaControl: Send {
    /// Register the receiver of asynchronous results
    fn set_listener(&mut self, listener: Arc<dyn AaaListener>);

    /// Enable or disable 3A processing (tied to streaming)
    fn enable(&mut self, enabled: bool) -> Result<(), AaaError>;

    fn focus_mode(&self) -> FocusMode;
    fn set_focus_mode(&mut self, mode: FocusMode) -> Result<(), AaaError>;

    fn ae_mode(&self) -> AeMode;
    fn set_ae_mode(&mut self, mode: AeMode) -> Result<(), AaaError>;

    /// Start an autofocus search; completion arrives via the listener
    fn run_auto_focus(&mut self) -> Result<(), AaaError>;
    fn cancel_auto_focus(&mut self) -> Result<(), AaaError>;

    /// Write an exposure bias (EV) to the sensor
    fn apply_exposure_value(&mut self, ev: f32) -> Result<(), AaaError>;

    /// Move the lens to an absolute position ahead of a focus sweep
    fn seek_focus(&mut self, position: i32) -> Result<(), AaaError>;

    /// Set the lens position for the next frames
    fn set_focus_position(&mut self, position: i32) -> Result<(), AaaError>;
}
