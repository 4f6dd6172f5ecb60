//! Client-facing camera parameters

use crate::CameraError;
use aaa_control::FocusMode;
use bracketing::{BracketMode, BracketRange};
use camera_capture::Size;
use serde::{Deserialize, Serialize};

/// Per-session camera settings set with `set_parameters`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameters {
    pub preview_size: Size,
    pub video_size: Size,
    /// Still capture resolution
    pub picture_size: Size,
    /// Postview (thumbnail shown after capture) resolution
    pub postview_size: Size,
    pub focus_mode: FocusMode,
    /// Frames per `take_picture`
    pub burst_length: u32,
    /// Device frames skipped between burst frames
    pub burst_skip: u32,
    pub bracket_mode: BracketMode,
    /// Sweep override; the configured EV or focus range is used when unset
    pub bracket_range: Option<BracketRange>,
    /// Capture an exposure-bracketed set for HDR composition
    pub hdr: bool,
    /// `take_picture` while recording grabs a recording frame instead of
    /// stopping the recording
    pub video_snapshot: bool,
    /// Forward scene detection results to callbacks
    pub scene_detection: bool,
}

impl Default for Parameters {
    fn default() -> Self {
        Self {
            preview_size: Size::new(640, 480),
            video_size: Size::new(1280, 720),
            picture_size: Size::new(2560, 1920),
            postview_size: Size::new(640, 480),
            focus_mode: FocusMode::Auto,
            burst_length: 1,
            burst_skip: 0,
            bracket_mode: BracketMode::None,
            bracket_range: None,
            hdr: false,
            video_snapshot: false,
            scene_detection: false,
        }
    }
}

impl Parameters {
    /// Check the parameter set against the configured limits
    pub fn validate(&self, max_burst_length: u32) -> Result<(), CameraError> {
        let sizes = [
            ("preview_size", self.preview_size),
            ("video_size", self.video_size),
            ("picture_size", self.picture_size),
            ("postview_size", self.postview_size),
        ];
        for (name, size) in sizes {
            if !size.is_valid() {
                return Err(CameraError::BadRequest(format!("{} {} is empty", name, size)));
            }
        }

        if self.burst_length == 0 || self.burst_length > max_burst_length {
            return Err(CameraError::BadRequest(format!(
                "burst_length {} outside 1..={}",
                self.burst_length, max_burst_length
            )));
        }

        if let Some(range) = &self.bracket_range {
            range
                .validate()
                .map_err(|e| CameraError::BadRequest(e.to_string()))?;
        }
        Ok(())
    }

    /// Check if a change to `other` needs the preview/video stream restarted
    pub fn stream_sizes_differ(&self, other: &Parameters) -> bool {
        self.preview_size != other.preview_size || self.video_size != other.video_size
    }
}
