//! ISP device driver interface

use crate::{Buffer, DeviceError, Size};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Streaming mode of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceMode {
    /// Preview stream only
    Preview,
    /// Coupled preview + recording streams
    Video,
    /// Single still capture (snapshot + postview)
    Capture,
    /// Back-to-back still capture for bursts
    ContinuousCapture,
}

impl DeviceMode {
    /// Check if the mode produces snapshot/postview pairs
    pub fn is_capture(&self) -> bool {
        matches!(self, DeviceMode::Capture | DeviceMode::ContinuousCapture)
    }
}

/// Device parameter written with [`CameraDevice::set_parameter`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum DeviceParameter {
    PreviewSize(Size),
    VideoSize(Size),
    SnapshotSize(Size),
    PostviewSize(Size),
    /// Exposure bias in EV, takes effect after the sensor latency
    ExposureBias(f32),
    /// Lens position in driver steps, takes effect after the sensor latency
    FocusPosition(i32),
}

/// Streaming imaging device (ISP + sensor).
///
/// Every acquired buffer must be released through the matching release call.
/// A release may report [`DeviceError::StaleBuffer`] when the device was
/// restarted while the buffer was out; callers treat that as benign.
pub trait CameraDevice: Send {
    /// Start streaming in `mode`
    fn start(&mut self, mode: DeviceMode) -> Result<(), DeviceError>;

    /// Stop streaming; all outstanding buffers become stale
    fn stop(&mut self) -> Result<(), DeviceError>;

    /// Current streaming mode, `None` when stopped
    fn mode(&self) -> Option<DeviceMode>;

    /// Check if a frame can be acquired for the current mode.
    /// May block for up to one frame interval.
    fn data_available(&mut self) -> bool;

    /// Write a device parameter
    fn set_parameter(&mut self, param: DeviceParameter) -> Result<(), DeviceError>;

    fn acquire_preview_frame(&mut self) -> Result<Buffer, DeviceError>;
    fn release_preview_frame(&mut self, buffer: Buffer) -> Result<(), DeviceError>;

    /// Recording frame from the same slot as the last acquired preview frame
    fn acquire_recording_frame(&mut self) -> Result<Buffer, DeviceError>;
    fn release_recording_frame(&mut self, buffer: Buffer) -> Result<(), DeviceError>;

    /// Snapshot and matching postview
    fn acquire_snapshot(&mut self) -> Result<(Buffer, Buffer), DeviceError>;
    fn release_snapshot(&mut self, snapshot: Buffer, postview: Buffer) -> Result<(), DeviceError>;
}

impl<D: CameraDevice + ?Sized> CameraDevice for Box<D> {
    fn start(&mut self, mode: DeviceMode) -> Result<(), DeviceError> {
        (**self).start(mode)
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        (**self).stop()
    }

    fn mode(&self) -> Option<DeviceMode> {
        (**self).mode()
    }

    fn data_available(&mut self) -> bool {
        (**self).data_available()
    }

    fn set_parameter(&mut self, param: DeviceParameter) -> Result<(), DeviceError> {
        (**self).set_parameter(param)
    }

    fn acquire_preview_frame(&mut self) -> Result<Buffer, DeviceError> {
        (**self).acquire_preview_frame()
    }

    fn release_preview_frame(&mut self, buffer: Buffer) -> Result<(), DeviceError> {
        (**self).release_preview_frame(buffer)
    }

    fn acquire_recording_frame(&mut self) -> Result<Buffer, DeviceError> {
        (**self).acquire_recording_frame()
    }

    fn release_recording_frame(&mut self, buffer: Buffer) -> Result<(), DeviceError> {
        (**self).release_recording_frame(buffer)
    }

    fn acquire_snapshot(&mut self) -> Result<(Buffer, Buffer), DeviceError> {
        (**self).acquire_snapshot()
    }

    fn release_snapshot(&mut self, snapshot: Buffer, postview: Buffer) -> Result<(), DeviceError> {
        (**self).release_snapshot(snapshot, postview)
    }
}

/// Absorb stale-buffer results of release calls
pub trait StaleExt {
    /// Turn [`DeviceError::StaleBuffer`] into `Ok(())`, logging it
    fn absorb_stale(self, context: &str) -> Result<(), DeviceError>;
}

impl StaleExt for Result<(), DeviceError> {
    fn absorb_stale(self, context: &str) -> Result<(), DeviceError> {
        match self {
            Err(e) if e.is_stale() => {
                debug!("{}: ignoring {}", context, e);
                Ok(())
            }
            other => other,
        }
    }
}
