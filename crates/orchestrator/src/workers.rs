//! Consumer worker threads
//!
//! Each worker owns an actor queue and runs its jobs on a dedicated thread,
//! handing buffers back through the [`Notifier`] when a job is done.

use crate::{
    CameraCallbacks, CameraError, EncodedPicture, Notifier, PictureEncoder, PictureRequest, PictureSource,
    PreviewConsumer,
};
use actor_queue::{spawn_actor, ActorQueue, Flow, Handler, Message};
use camera_capture::{Buffer, BufferOwner};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Simulated compression ratio of the picture encoder
const COMPRESSION_RATIO: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum WorkKind {
    Job,
    Exit,
}

enum Work<T> {
    Job(T, Notifier),
    Exit,
}

impl<T: Send> Message for Work<T> {
    type Kind = WorkKind;

    fn kind(&self) -> WorkKind {
        match self {
            Work::Job(..) => WorkKind::Job,
            Work::Exit => WorkKind::Exit,
        }
    }
}

struct JobRunner<F> {
    run: F,
}

impl<T, F> Handler<Work<T>> for JobRunner<F>
where
    T: Send,
    F: FnMut(T, &Notifier) + Send,
{
    fn handle(&mut self, msg: Work<T>, _queue: &ActorQueue<Work<T>>) -> Flow {
        match msg {
            Work::Job(job, notifier) => {
                (self.run)(job, &notifier);
                Flow::Continue
            }
            Work::Exit => Flow::Exit,
        }
    }
}

/// Thread running one kind of job
struct Worker<T: Send + 'static> {
    queue: Arc<ActorQueue<Work<T>>>,
    thread: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Worker<T> {
    fn spawn<F>(name: &str, capacity: usize, run: F) -> Result<Self, CameraError>
    where
        F: FnMut(T, &Notifier) + Send + 'static,
    {
        let queue = Arc::new(ActorQueue::new(name, capacity));
        let thread = spawn_actor(Arc::clone(&queue), JobRunner { run })?;
        Ok(Self {
            queue,
            thread: Some(thread),
        })
    }

    /// Queue a job, or give it back when the worker cannot take it
    fn submit(&self, job: T, notifier: &Notifier) -> Result<(), T> {
        match self.queue.try_send(Work::Job(job, notifier.clone())) {
            Ok(()) => Ok(()),
            Err((e, Work::Job(job, _))) => {
                debug!("Worker '{}' cannot take a job: {}", self.queue.name(), e);
                Err(job)
            }
            Err((e, Work::Exit)) => {
                error!("Worker '{}' handed back an exit request: {}", self.queue.name(), e);
                Ok(())
            }
        }
    }
}

impl<T: Send + 'static> Drop for Worker<T> {
    fn drop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        while let Err(e) = self.queue.send(Work::Exit) {
            if self.queue.is_closed() {
                break;
            }
            debug!("Worker '{}' busy ({}), retrying exit", self.queue.name(), e);
            thread::sleep(Duration::from_millis(1));
        }
        if thread.join().is_err() {
            error!("Worker '{}' panicked", self.queue.name());
        }
    }
}

/// Picture encoder running on its own thread.
///
/// Encoding is simulated: the payload size is derived from the frame size.
pub struct EncoderWorker {
    worker: Worker<PictureRequest>,
}

impl EncoderWorker {
    pub fn spawn(callbacks: Arc<dyn CameraCallbacks>, capacity: usize) -> Result<Self, CameraError> {
        let worker = Worker::spawn("camera-encoder", capacity, move |request: PictureRequest, notifier: &Notifier| {
            let picture = encode_picture(&request);
            debug!(
                "Encoded picture {}/{} ({} bytes)",
                picture.index + 1,
                picture.burst_length,
                picture.bytes
            );
            callbacks.picture_taken(&picture);
            if let Err(e) = notifier.picture_done(request) {
                error!("Encoder could not return picture buffers: {}", e);
            }
        })?;
        Ok(Self { worker })
    }
}

fn encode_picture(request: &PictureRequest) -> EncodedPicture {
    let frame = request.frame();
    EncodedPicture {
        index: request.index,
        burst_length: request.burst_length,
        size: frame.size(),
        sequence: frame.sequence,
        metadata: frame.metadata,
        bytes: frame.frame_bytes() / COMPRESSION_RATIO,
        video_snapshot: matches!(request.source, PictureSource::VideoSnapshot { .. }),
    }
}

impl PictureEncoder for EncoderWorker {
    fn encode(&mut self, request: PictureRequest, notifier: &Notifier) {
        if let Err(request) = self.worker.submit(request, notifier) {
            warn!("Encoder unavailable, dropping picture {}", request.index);
            if let Err(e) = notifier.picture_done(request) {
                error!("Could not return dropped picture: {}", e);
            }
        }
    }
}

/// Preview consumer running on its own thread.
///
/// Forwards each frame to the preview callback, optionally holding it for a
/// simulated render time.
pub struct PreviewWorker {
    worker: Worker<Buffer>,
}

impl PreviewWorker {
    pub fn spawn(
        callbacks: Arc<dyn CameraCallbacks>,
        capacity: usize,
        render_time: Option<Duration>,
    ) -> Result<Self, CameraError> {
        let worker = Worker::spawn("camera-preview", capacity, move |frame: Buffer, notifier: &Notifier| {
            callbacks.preview_frame(&frame);
            if let Some(render_time) = render_time {
                thread::sleep(render_time);
            }
            if let Err(e) = notifier.preview_done(frame) {
                error!("Preview could not return frame: {}", e);
            }
        })?;
        Ok(Self { worker })
    }
}

impl PreviewConsumer for PreviewWorker {
    fn preview_frame(&mut self, frame: Buffer, notifier: &Notifier) {
        let frame = frame.hand_to(BufferOwner::PreviewConsumer);
        if let Err(frame) = self.worker.submit(frame, notifier) {
            debug!("Preview consumer unavailable, skipping frame {}", frame.id);
            if let Err(e) = notifier.preview_done(frame) {
                error!("Could not return skipped preview frame: {}", e);
            }
        }
    }
}
