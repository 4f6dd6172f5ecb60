//! Completion injection handle

use crate::{CameraError, CameraQueue, Message, PictureRequest, RecordingHandle};
use aaa_control::{AaaListener, SceneMode};
use camera_capture::Buffer;
use std::sync::Arc;
use tracing::{debug, error};

/// Posts collaborator completions into the orchestrator queue.
///
/// Cheap to clone; never blocks. Buffer returns are accepted at any queue
/// depth and only fail once the orchestrator has exited.
#[derive(Clone)]
pub struct Notifier {
    queue: Arc<CameraQueue>,
}

impl Notifier {
    pub fn new(queue: Arc<CameraQueue>) -> Self {
        Self { queue }
    }

    /// Return a preview frame
    pub fn preview_done(&self, frame: Buffer) -> Result<(), CameraError> {
        self.post(Message::PreviewDone(frame))
    }

    /// Return an encoder job
    pub fn picture_done(&self, request: PictureRequest) -> Result<(), CameraError> {
        self.post(Message::PictureDone(request))
    }

    /// Return a recording frame
    pub fn release_recording_frame(&self, frame: RecordingHandle) -> Result<(), CameraError> {
        self.post(Message::ReleaseRecordingFrame(frame))
    }

    fn post(&self, msg: Message) -> Result<(), CameraError> {
        let kind = actor_queue::Message::kind(&msg);
        self.queue.send(msg).map_err(|e| {
            error!("Dropping {:?} completion: {}", kind, e);
            CameraError::from(e)
        })
    }
}

impl AaaListener for Notifier {
    fn auto_focus_done(&self, success: bool) {
        debug!("3A reports autofocus done (success={})", success);
        let _ = self.post(Message::AutoFocusDone { success });
    }

    fn scene_detected(&self, scene: SceneMode, hdr_recommended: bool) {
        let _ = self.post(Message::SceneDetected {
            scene,
            hdr_recommended,
        });
    }
}
