//! Camera Pipeline Orchestrator
//!
//! Sits between a streaming imaging device and its asynchronous consumers:
//! - Control thread running the preview/record/capture state machine
//! - Buffer coupling for video mode, where one device slot feeds several consumers
//! - Burst and bracketed (HDR) capture sequencing
//! - Encoder and preview worker threads
//!
//! Clients talk to the control thread through a [`CameraClient`];
//! collaborators hand buffers back through a [`Notifier`].

mod client;
mod collaborators;
mod control;
pub mod coupling;
mod error;
mod message;
mod notifier;
mod parameters;
mod settings;
mod workers;

pub use client::CameraClient;
pub use collaborators::{
    CameraCallbacks, EncodedPicture, NoCallbacks, PictureEncoder, PictureRequest, PictureSource, PreviewConsumer,
    RecordingHandle,
};
pub use control::OrchestratorState;
pub use error::CameraError;
pub use message::{camera_queue, CameraQueue, CameraReply, Message, MessageKind, Reply};
pub use notifier::Notifier;
pub use parameters::Parameters;
pub use settings::{ConfigError, OrchestratorConfig, CONFIG_FILE, ENV_PREFIX};
pub use workers::{EncoderWorker, PreviewWorker};

use aaa_control::AaaControl;
use actor_queue::spawn_actor;
use camera_capture::CameraDevice;
use control::ControlThread;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Everything the control thread drives
pub struct Collaborators {
    pub device: Box<dyn CameraDevice>,
    pub aaa: Box<dyn AaaControl>,
    pub encoder: Box<dyn PictureEncoder>,
    pub preview: Box<dyn PreviewConsumer>,
    pub callbacks: Arc<dyn CameraCallbacks>,
}

impl Collaborators {
    /// Device and 3A with threaded encoder and preview workers
    pub fn with_workers(
        device: Box<dyn CameraDevice>,
        aaa: Box<dyn AaaControl>,
        callbacks: Arc<dyn CameraCallbacks>,
        config: &OrchestratorConfig,
    ) -> Result<Self, CameraError> {
        let encoder = EncoderWorker::spawn(Arc::clone(&callbacks), config.worker_queue_capacity)?;
        let preview = PreviewWorker::spawn(Arc::clone(&callbacks), config.worker_queue_capacity, None)?;
        Ok(Self {
            device,
            aaa,
            encoder: Box::new(encoder),
            preview: Box::new(preview),
            callbacks,
        })
    }
}

/// Running orchestrator: the control thread plus its queue
pub struct Orchestrator {
    queue: Arc<CameraQueue>,
    thread: Option<JoinHandle<()>>,
}

impl Orchestrator {
    /// Start the control thread
    pub fn spawn(config: OrchestratorConfig, mut collaborators: Collaborators) -> Result<Self, CameraError> {
        info!(
            "Starting camera orchestrator (queue capacity {}, latency {} frames)",
            config.queue_capacity, config.latency_frames
        );
        let queue = Arc::new(camera_queue(config.queue_capacity));
        let notifier = Notifier::new(Arc::clone(&queue));
        collaborators.aaa.set_listener(Arc::new(notifier.clone()));

        let control = ControlThread::new(config, collaborators, notifier);
        let thread = spawn_actor(Arc::clone(&queue), control)?;

        Ok(Self {
            queue,
            thread: Some(thread),
        })
    }

    /// New client handle
    pub fn client(&self) -> CameraClient {
        CameraClient::new(Arc::clone(&self.queue))
    }

    /// New completion handle
    pub fn notifier(&self) -> Notifier {
        Notifier::new(Arc::clone(&self.queue))
    }

    /// Check if the control thread is still running
    pub fn is_running(&self) -> bool {
        !self.queue.is_closed()
    }

    /// Send `Exit` and wait for the control thread
    pub fn shutdown(mut self) -> Result<(), CameraError> {
        self.stop()
    }

    fn stop(&mut self) -> Result<(), CameraError> {
        let Some(thread) = self.thread.take() else {
            return Ok(());
        };

        while let Err(e) = self.queue.send(Message::Exit) {
            if self.queue.is_closed() {
                break;
            }
            warn!("Orchestrator busy ({}), retrying exit", e);
            thread::sleep(Duration::from_millis(1));
        }

        thread
            .join()
            .map_err(|_| CameraError::Thread("orchestrator thread panicked".into()))
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            error!("Orchestrator shutdown failed: {}", e);
        }
    }
}

/// Install the global tracing subscriber (INFO unless `RUST_LOG` says otherwise)
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        warn!("Tracing subscriber already installed");
    }
}
