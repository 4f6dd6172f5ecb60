//! Shared rig: orchestrator wired to the simulated device and 3A

#![allow(dead_code)]

use aaa_control::{MockAaa, MockAaaProbe, SceneMode};
use camera_capture::{Buffer, MockDevice, MockDeviceConfig, MockDeviceProbe};
use orchestrator::{
    CameraCallbacks, CameraClient, CameraError, Collaborators, EncodedPicture, EncoderWorker, Notifier, Orchestrator,
    OrchestratorConfig, OrchestratorState, PictureEncoder, PictureRequest, PreviewConsumer, RecordingHandle,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub const TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Shutter,
    Picture(EncodedPicture),
    AutoFocus(bool),
    Scene(SceneMode, bool),
    Error(CameraError),
}

/// Callback sink recording every notification
#[derive(Default)]
pub struct Events {
    log: Mutex<Vec<Event>>,
    held: Mutex<Vec<RecordingHandle>>,
    recorded: Mutex<Vec<Buffer>>,
    hold_recording: AtomicBool,
}

impl Events {
    pub fn snapshot(&self) -> Vec<Event> {
        self.log.lock().unwrap().clone()
    }

    pub fn pictures(&self) -> Vec<EncodedPicture> {
        self.snapshot()
            .into_iter()
            .filter_map(|e| match e {
                Event::Picture(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.log.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// Keep recording frames instead of releasing them right away
    pub fn hold_recording_frames(&self, hold: bool) {
        self.hold_recording.store(hold, Ordering::SeqCst);
    }

    pub fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }

    pub fn take_held(&self) -> Vec<RecordingHandle> {
        std::mem::take(&mut *self.held.lock().unwrap())
    }

    pub fn recorded_count(&self) -> usize {
        self.recorded.lock().unwrap().len()
    }

    fn push(&self, event: Event) {
        self.log.lock().unwrap().push(event);
    }
}

impl CameraCallbacks for Events {
    fn shutter(&self) {
        self.push(Event::Shutter);
    }

    fn picture_taken(&self, picture: &EncodedPicture) {
        self.push(Event::Picture(picture.clone()));
    }

    fn recording_frame(&self, frame: RecordingHandle, notifier: &Notifier) {
        self.recorded.lock().unwrap().push(frame.buffer().clone());
        if self.hold_recording.load(Ordering::SeqCst) {
            self.held.lock().unwrap().push(frame);
        } else {
            notifier.release_recording_frame(frame).unwrap();
        }
    }

    fn auto_focus_done(&self, success: bool) {
        self.push(Event::AutoFocus(success));
    }

    fn scene_detected(&self, scene: SceneMode, hdr_recommended: bool) {
        self.push(Event::Scene(scene, hdr_recommended));
    }

    fn error(&self, error: &CameraError) {
        self.push(Event::Error(error.clone()));
    }
}

/// Preview consumer returning every frame at once, keeping a copy
#[derive(Clone, Default)]
pub struct EchoPreview {
    pub frames: Arc<Mutex<Vec<Buffer>>>,
}

impl PreviewConsumer for EchoPreview {
    fn preview_frame(&mut self, frame: Buffer, notifier: &Notifier) {
        self.frames.lock().unwrap().push(frame.clone());
        notifier.preview_done(frame).unwrap();
    }
}

/// Encoder keeping jobs until the test completes them
#[derive(Clone, Default)]
pub struct HeldEncoder {
    pub jobs: Arc<Mutex<Vec<(PictureRequest, Notifier)>>>,
}

impl HeldEncoder {
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    /// Return every held job to the orchestrator
    pub fn complete_all(&self) {
        for (request, notifier) in self.jobs.lock().unwrap().drain(..) {
            notifier.picture_done(request).unwrap();
        }
    }
}

impl PictureEncoder for HeldEncoder {
    fn encode(&mut self, request: PictureRequest, notifier: &Notifier) {
        self.jobs.lock().unwrap().push((request, notifier.clone()));
    }
}

pub struct Rig {
    pub orchestrator: Orchestrator,
    pub client: CameraClient,
    pub device: MockDeviceProbe,
    pub aaa: MockAaaProbe,
    pub events: Arc<Events>,
    pub preview: EchoPreview,
    pub held: Option<HeldEncoder>,
}

pub fn device_config() -> MockDeviceConfig {
    MockDeviceConfig {
        frame_interval: Some(Duration::from_millis(2)),
        ..Default::default()
    }
}

/// Orchestrator with the threaded encoder
pub fn rig() -> Rig {
    build(device_config(), OrchestratorConfig::default(), false)
}

/// Orchestrator whose encoder holds jobs until `HeldEncoder::complete_all`
pub fn rig_with_held_encoder() -> Rig {
    build(device_config(), OrchestratorConfig::default(), true)
}

pub fn build(device_config: MockDeviceConfig, config: OrchestratorConfig, hold_pictures: bool) -> Rig {
    let device = MockDevice::new(device_config);
    let device_probe = device.probe();
    let aaa = MockAaa::with_sensor(device.probe());
    let aaa_probe = aaa.probe();
    let events = Arc::new(Events::default());
    let preview = EchoPreview::default();

    let held = hold_pictures.then(HeldEncoder::default);
    let encoder: Box<dyn PictureEncoder> = match &held {
        Some(held) => Box::new(held.clone()),
        None => Box::new(EncoderWorker::spawn(events.clone(), 16).unwrap()),
    };

    let collaborators = Collaborators {
        device: Box::new(device),
        aaa: Box::new(aaa),
        encoder,
        preview: Box::new(preview.clone()),
        callbacks: events.clone(),
    };
    let orchestrator = Orchestrator::spawn(config, collaborators).unwrap();
    let client = orchestrator.client();

    Rig {
        orchestrator,
        client,
        device: device_probe,
        aaa: aaa_probe,
        events,
        preview,
        held,
    }
}

/// Poll `cond` until it holds or `TIMEOUT` passes
pub fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}

pub fn wait_for_state(client: &CameraClient, state: OrchestratorState) -> bool {
    wait_until(|| client.state().unwrap() == state)
}
