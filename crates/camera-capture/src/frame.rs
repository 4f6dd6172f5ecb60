//! Frame descriptor types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Nv12,
    Nv21,
    Yuyv,
    Rgb24,
    Mjpeg,
}

impl PixelFormat {
    /// Bytes per line for the luma (or packed) plane
    pub fn bytes_per_line(&self, width: u32) -> u32 {
        match self {
            PixelFormat::Nv12 | PixelFormat::Nv21 => width,
            PixelFormat::Yuyv => width * 2,
            PixelFormat::Rgb24 => width * 3,
            // Compressed, no meaningful stride
            PixelFormat::Mjpeg => 0,
        }
    }

    /// Total bytes for a frame with the given stride and height
    pub fn frame_bytes(&self, stride: u32, height: u32) -> usize {
        let rows = height as usize;
        let stride = stride as usize;
        match self {
            PixelFormat::Nv12 | PixelFormat::Nv21 => stride * rows * 3 / 2,
            PixelFormat::Yuyv | PixelFormat::Rgb24 => stride * rows,
            PixelFormat::Mjpeg => 0,
        }
    }
}

/// Frame resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Check that neither dimension is zero
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Unique buffer identifier (unique per device instance)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u64);

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Stream a buffer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferKind {
    Preview,
    Video,
    Still,
    Postview,
}

/// Current holder of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferOwner {
    /// Enqueued in the driver
    Device,
    /// Held by the coupling tracker while consumers work on it
    Tracker,
    /// Preview rendering/callback consumer
    PreviewConsumer,
    /// Client holding a recording frame
    Client,
    /// Picture encoder
    Encoder,
}

/// Frame status reported by the driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferStatus {
    #[default]
    Ok,
    Corrupted,
    NotApplicable,
}

/// Per-frame capture settings, as effective on the sensor for this frame
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Exposure bias in EV
    pub exposure_bias: f32,
    /// Lens position in driver steps
    pub focus_position: i32,
    /// Capture timestamp (nanoseconds)
    pub timestamp_ns: u64,
}

/// Descriptor of one hardware-owned frame buffer.
///
/// A `Buffer` carries ownership metadata, not memory. It has exactly one owner
/// at a time and moves between owners only through explicit acquire, release
/// and hand-off calls.
#[derive(Debug, Clone, PartialEq)]
pub struct Buffer {
    /// Unique id
    pub id: BufferId,
    /// Device-side slot index
    pub index: u32,
    /// Device configuration that produced the buffer
    pub generation: u32,
    /// Stream kind
    pub kind: BufferKind,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub format: PixelFormat,
    /// Current holder
    pub owner: Option<BufferOwner>,
    /// Frame status
    pub status: BufferStatus,
    /// Raw device frame number within the current streaming session
    pub sequence: u64,
    /// Settings effective for this frame
    pub metadata: FrameMetadata,
}

impl Buffer {
    /// Transfer the buffer to a new owner
    pub fn hand_to(mut self, owner: BufferOwner) -> Self {
        self.owner = Some(owner);
        self
    }

    /// Frame resolution
    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Check if the driver flagged this frame as corrupted
    pub fn is_corrupted(&self) -> bool {
        self.status == BufferStatus::Corrupted
    }

    /// Payload size in bytes
    pub fn frame_bytes(&self) -> usize {
        self.format.frame_bytes(self.stride, self.height)
    }
}
