//! Camera Capture Library
//!
//! Provides the device-side half of the camera pipeline:
//! - Frame descriptors for preview, video, still and postview buffers
//! - The ISP driver interface the orchestrator drives
//! - A simulated ISP for tests and the pipeline simulator

pub mod device;
pub mod frame;
pub mod mock;

pub use device::{CameraDevice, DeviceMode, DeviceParameter, StaleExt};
pub use frame::{Buffer, BufferId, BufferKind, BufferOwner, BufferStatus, FrameMetadata, PixelFormat, Size};
pub use mock::{DeviceCall, MockDevice, MockDeviceConfig, MockDeviceProbe};

use thiserror::Error;

/// Device driver error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    /// Buffer belongs to a previous device configuration
    #[error("Stale {kind:?} buffer {id} (generation {generation})")]
    StaleBuffer {
        kind: BufferKind,
        id: BufferId,
        generation: u32,
    },

    #[error("Device is not streaming")]
    NotStreaming,

    #[error("Operation not supported in {0:?} mode")]
    WrongMode(DeviceMode),

    #[error("Unknown {kind:?} buffer {id}")]
    UnknownBuffer { kind: BufferKind, id: BufferId },

    #[error("No {0:?} buffer available")]
    NoBufferAvailable(BufferKind),

    #[error("Driver call failed: {0}")]
    Driver(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

impl DeviceError {
    /// Check if this error only reports a buffer from an earlier configuration
    pub fn is_stale(&self) -> bool {
        matches!(self, DeviceError::StaleBuffer { .. })
    }
}
