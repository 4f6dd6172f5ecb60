//! Client handle

use crate::{CameraError, CameraQueue, Message, OrchestratorState, Parameters, RecordingHandle, Reply};
use std::sync::Arc;

/// Camera client API. Every command is a synchronous call into the
/// orchestrator thread.
#[derive(Clone)]
pub struct CameraClient {
    queue: Arc<CameraQueue>,
}

impl CameraClient {
    pub fn new(queue: Arc<CameraQueue>) -> Self {
        Self { queue }
    }

    fn call(&self, msg: Message) -> Result<Reply, CameraError> {
        self.queue.send_and_wait(msg)?
    }

    fn command(&self, msg: Message) -> Result<(), CameraError> {
        match self.call(msg)? {
            Reply::Ack => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Start streaming preview frames; `video` selects the coupled
    /// preview + recording stream
    pub fn start_preview(&self, video: bool) -> Result<(), CameraError> {
        self.command(Message::StartPreview { video })
    }

    pub fn stop_preview(&self) -> Result<(), CameraError> {
        self.command(Message::StopPreview)
    }

    pub fn start_recording(&self) -> Result<(), CameraError> {
        self.command(Message::StartRecording)
    }

    pub fn stop_recording(&self) -> Result<(), CameraError> {
        self.command(Message::StopRecording)
    }

    /// Start a capture with the current parameters
    pub fn take_picture(&self) -> Result<(), CameraError> {
        self.command(Message::TakePicture)
    }

    pub fn cancel_picture(&self) -> Result<(), CameraError> {
        self.command(Message::CancelPicture)
    }

    /// Start an autofocus search; the result arrives through callbacks
    pub fn auto_focus(&self) -> Result<(), CameraError> {
        self.command(Message::AutoFocus)
    }

    pub fn cancel_auto_focus(&self) -> Result<(), CameraError> {
        self.command(Message::CancelAutoFocus)
    }

    pub fn set_parameters(&self, params: Parameters) -> Result<(), CameraError> {
        self.command(Message::SetParameters(Box::new(params)))
    }

    pub fn parameters(&self) -> Result<Parameters, CameraError> {
        match self.call(Message::GetParameters)? {
            Reply::Parameters(params) => Ok(*params),
            other => Err(unexpected(other)),
        }
    }

    pub fn state(&self) -> Result<OrchestratorState, CameraError> {
        match self.call(Message::GetState)? {
            Reply::State(state) => Ok(state),
            other => Err(unexpected(other)),
        }
    }

    /// Hand a recording frame back; does not wait
    pub fn release_recording_frame(&self, frame: RecordingHandle) -> Result<(), CameraError> {
        Ok(self.queue.send(Message::ReleaseRecordingFrame(frame))?)
    }
}

fn unexpected(reply: Reply) -> CameraError {
    CameraError::BadRequest(format!("unexpected reply {:?}", reply))
}
