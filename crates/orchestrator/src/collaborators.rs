//! Consumer interfaces the orchestrator hands frames to
//!
//! Every hand-off moves buffer ownership to the collaborator. Ownership comes
//! back through the [`Notifier`] passed along with the frame, which posts a
//! completion message into the orchestrator queue.

use crate::{CameraError, Notifier};
use aaa_control::SceneMode;
use camera_capture::{Buffer, BufferId, FrameMetadata, Size};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Frames behind one encoder job
#[derive(Debug, Clone, PartialEq)]
pub enum PictureSource {
    /// Snapshot with its postview, released together
    Still { snapshot: Buffer, postview: Buffer },
    /// Recording frame taken during a video snapshot
    VideoSnapshot { frame: Buffer },
}

/// Encoder job handed out by the capture loop and returned on completion
#[derive(Debug, Clone, PartialEq)]
pub struct PictureRequest {
    /// Position in the burst (0-based)
    pub index: u32,
    /// Frames in the burst
    pub burst_length: u32,
    pub source: PictureSource,
}

impl PictureRequest {
    /// Full-resolution frame to encode
    pub fn frame(&self) -> &Buffer {
        match &self.source {
            PictureSource::Still { snapshot, .. } => snapshot,
            PictureSource::VideoSnapshot { frame } => frame,
        }
    }
}

/// Result of encoding one picture
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedPicture {
    pub index: u32,
    pub burst_length: u32,
    pub size: Size,
    /// Raw device frame number
    pub sequence: u64,
    pub metadata: FrameMetadata,
    /// Encoded payload size
    pub bytes: usize,
    pub video_snapshot: bool,
}

/// Recording frame lent to the client until `release_recording_frame`
#[derive(Debug, PartialEq)]
pub struct RecordingHandle {
    buffer: Buffer,
}

impl RecordingHandle {
    pub(crate) fn new(buffer: Buffer) -> Self {
        Self { buffer }
    }

    pub fn id(&self) -> BufferId {
        self.buffer.id
    }

    /// Frame being recorded
    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub(crate) fn into_buffer(self) -> Buffer {
        self.buffer
    }
}

/// Consumer of preview frames (display, preview callbacks)
pub trait PreviewConsumer: Send {
    /// Take a preview frame; it must come back through
    /// [`Notifier::preview_done`]
    fn preview_frame(&mut self, frame: Buffer, notifier: &Notifier);
}

/// Still picture encoder
pub trait PictureEncoder: Send {
    /// Take an encoder job; it must come back through
    /// [`Notifier::picture_done`]
    fn encode(&mut self, request: PictureRequest, notifier: &Notifier);
}

/// Client-visible notifications
pub trait CameraCallbacks: Send + Sync {
    /// First frame of a capture was taken
    fn shutter(&self) {}

    /// A preview frame was rendered
    fn preview_frame(&self, _frame: &Buffer) {}

    /// A picture finished encoding
    fn picture_taken(&self, _picture: &EncodedPicture) {}

    /// A recording frame is available; the handle must be released
    fn recording_frame(&self, frame: RecordingHandle, notifier: &Notifier) {
        if let Err(e) = notifier.release_recording_frame(frame) {
            warn!("Failed to return unused recording frame: {}", e);
        }
    }

    fn auto_focus_done(&self, _success: bool) {}

    fn scene_detected(&self, _scene: SceneMode, _hdr_recommended: bool) {}

    /// Asynchronous error (capture iteration failures and aborts)
    fn error(&self, _error: &CameraError) {}
}

/// Callbacks that ignore everything and return recording frames at once
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCallbacks;

impl CameraCallbacks for NoCallbacks {}
