//! Orchestrator messages

use crate::{CameraError, OrchestratorState, Parameters, PictureRequest, RecordingHandle};
use aaa_control::SceneMode;
use actor_queue::{ActorQueue, Message as QueueMessage};
use camera_capture::Buffer;

/// Queue owned by the orchestrator thread
pub type CameraQueue = ActorQueue<Message, CameraReply>;

/// Result of a synchronous call
pub type CameraReply = Result<Reply, CameraError>;

/// Payload of a successful synchronous call
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Ack,
    Parameters(Box<Parameters>),
    State(OrchestratorState),
}

/// Message kind, one reply slot per synchronous kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Exit,
    StartPreview,
    StopPreview,
    StartRecording,
    StopRecording,
    TakePicture,
    CancelPicture,
    AutoFocus,
    CancelAutoFocus,
    SetParameters,
    GetParameters,
    GetState,
    ReleaseRecordingFrame,
    PreviewDone,
    PictureDone,
    AutoFocusDone,
    SceneDetected,
}

impl MessageKind {
    /// Kinds whose sender waits for a reply
    pub const SYNCHRONOUS: [MessageKind; 11] = [
        MessageKind::StartPreview,
        MessageKind::StopPreview,
        MessageKind::StartRecording,
        MessageKind::StopRecording,
        MessageKind::TakePicture,
        MessageKind::CancelPicture,
        MessageKind::AutoFocus,
        MessageKind::CancelAutoFocus,
        MessageKind::SetParameters,
        MessageKind::GetParameters,
        MessageKind::GetState,
    ];

    /// Kinds handing a device buffer back; never refused for capacity
    pub const BUFFER_RETURNS: [MessageKind; 3] = [
        MessageKind::ReleaseRecordingFrame,
        MessageKind::PreviewDone,
        MessageKind::PictureDone,
    ];
}

/// Message handled by the orchestrator thread
#[derive(Debug)]
pub enum Message {
    Exit,

    // Client commands
    StartPreview { video: bool },
    StopPreview,
    StartRecording,
    StopRecording,
    TakePicture,
    CancelPicture,
    AutoFocus,
    CancelAutoFocus,
    SetParameters(Box<Parameters>),
    GetParameters,
    GetState,
    ReleaseRecordingFrame(RecordingHandle),

    // Collaborator completions
    PreviewDone(Buffer),
    PictureDone(PictureRequest),
    AutoFocusDone { success: bool },
    SceneDetected { scene: SceneMode, hdr_recommended: bool },
}

impl QueueMessage for Message {
    type Kind = MessageKind;

    fn kind(&self) -> MessageKind {
        match self {
            Message::Exit => MessageKind::Exit,
            Message::StartPreview { .. } => MessageKind::StartPreview,
            Message::StopPreview => MessageKind::StopPreview,
            Message::StartRecording => MessageKind::StartRecording,
            Message::StopRecording => MessageKind::StopRecording,
            Message::TakePicture => MessageKind::TakePicture,
            Message::CancelPicture => MessageKind::CancelPicture,
            Message::AutoFocus => MessageKind::AutoFocus,
            Message::CancelAutoFocus => MessageKind::CancelAutoFocus,
            Message::SetParameters(_) => MessageKind::SetParameters,
            Message::GetParameters => MessageKind::GetParameters,
            Message::GetState => MessageKind::GetState,
            Message::ReleaseRecordingFrame(_) => MessageKind::ReleaseRecordingFrame,
            Message::PreviewDone(_) => MessageKind::PreviewDone,
            Message::PictureDone(_) => MessageKind::PictureDone,
            Message::AutoFocusDone { .. } => MessageKind::AutoFocusDone,
            Message::SceneDetected { .. } => MessageKind::SceneDetected,
        }
    }
}

/// Build the orchestrator queue with a reply slot for every synchronous kind.
///
/// Buffer returns bypass the capacity: the device pool bounds how many can be
/// in flight, and refusing one would leak its slot.
pub fn camera_queue(capacity: usize) -> CameraQueue {
    ActorQueue::builder("camera-control")
        .capacity(capacity)
        .reply_kinds(MessageKind::SYNCHRONOUS)
        .uncapped_kinds(MessageKind::BUFFER_RETURNS)
        .build()
}
