//! Camera Error Types

use crate::OrchestratorState;
use aaa_control::AaaError;
use actor_queue::QueueError;
use bracketing::BracketError;
use camera_capture::DeviceError;
use thiserror::Error;

/// Errors reported to camera clients and callbacks
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CameraError {
    /// Operation not allowed in the current state
    #[error("{op} not allowed in {state:?} state")]
    InvalidState {
        op: &'static str,
        state: OrchestratorState,
    },

    /// Orchestrator queue could not take the message
    #[error("Queue full: {0}")]
    QueueFull(String),

    /// Driver failure
    #[error("Device error: {0}")]
    Device(DeviceError),

    /// Buffer from an earlier device configuration
    #[error("Stale buffer: {0}")]
    StaleBuffer(String),

    /// Malformed request or parameters
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// No buffer could be obtained
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Orchestrator thread has exited
    #[error("Orchestrator is not running")]
    Disconnected,

    #[error("3A error: {0}")]
    Aaa(#[from] AaaError),

    #[error("Bracketing error: {0}")]
    Bracket(BracketError),

    /// Worker thread could not be started
    #[error("Thread error: {0}")]
    Thread(String),
}

impl From<QueueError> for CameraError {
    fn from(e: QueueError) -> Self {
        match e {
            QueueError::QueueFull { .. } => CameraError::QueueFull(e.to_string()),
            QueueError::BadRequest { reason, .. } => CameraError::BadRequest(reason),
            QueueError::Closed { .. } => CameraError::Disconnected,
        }
    }
}

impl From<DeviceError> for CameraError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::StaleBuffer { .. } => CameraError::StaleBuffer(e.to_string()),
            DeviceError::NoBufferAvailable(kind) => {
                CameraError::OutOfMemory(format!("no {:?} buffer available", kind))
            }
            other => CameraError::Device(other),
        }
    }
}

impl From<BracketError> for CameraError {
    fn from(e: BracketError) -> Self {
        match e {
            BracketError::Device(e) => e.into(),
            BracketError::Aaa(e) => CameraError::Aaa(e),
            other => CameraError::Bracket(other),
        }
    }
}

impl From<std::io::Error> for CameraError {
    fn from(e: std::io::Error) -> Self {
        CameraError::Thread(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{BufferId, BufferKind};

    #[test]
    fn test_queue_errors_map_to_camera_errors() {
        let closed = QueueError::Closed {
            queue: "camera-control".into(),
        };
        assert_eq!(CameraError::from(closed), CameraError::Disconnected);

        let full = QueueError::QueueFull {
            queue: "camera-control".into(),
            capacity: 32,
        };
        assert!(matches!(CameraError::from(full), CameraError::QueueFull(_)));
    }

    #[test]
    fn test_device_errors_map_to_camera_errors() {
        let stale = DeviceError::StaleBuffer {
            kind: BufferKind::Preview,
            id: BufferId(3),
            generation: 1,
        };
        assert!(matches!(CameraError::from(stale), CameraError::StaleBuffer(_)));

        let oom = DeviceError::NoBufferAvailable(BufferKind::Still);
        assert!(matches!(CameraError::from(oom), CameraError::OutOfMemory(_)));

        let nested = BracketError::Device(DeviceError::NotStreaming);
        assert_eq!(
            CameraError::from(nested),
            CameraError::Device(DeviceError::NotStreaming)
        );
    }
}
