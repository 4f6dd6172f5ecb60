//! Orchestrator control thread
//!
//! Owns the device, 3A and consumer collaborators and runs the
//! preview/record/capture state machine. Messages always win over device
//! polling; frames are pulled only when the queue is empty.

use crate::coupling::{CouplingTracker, Half};
use crate::{
    CameraCallbacks, CameraError, CameraQueue, CameraReply, Collaborators, Message, Notifier, OrchestratorConfig,
    Parameters, PictureEncoder, PictureRequest, PictureSource, PreviewConsumer, RecordingHandle, Reply,
};
use aaa_control::{AaaControl, SceneMode};
use actor_queue::{Flow, Handler, Idle, Message as _};
use bracketing::{BracketError, BracketMode, BracketRange, BracketSequencer, TimelinePlan};
use camera_capture::{Buffer, BufferId, BufferOwner, CameraDevice, DeviceMode, DeviceParameter, StaleExt};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrchestratorState {
    #[default]
    Stopped,
    /// Preview only
    PreviewStill,
    /// Coupled preview + recording stream, recording half unused
    PreviewVideo,
    /// Recording frames go to the client
    Recording,
    /// Burst capture in progress
    Capturing,
}

impl OrchestratorState {
    /// Check if a preview stream is running
    pub fn is_previewing(&self) -> bool {
        matches!(
            self,
            OrchestratorState::PreviewStill | OrchestratorState::PreviewVideo | OrchestratorState::Recording
        )
    }

    /// Check if the device is streaming
    pub fn is_streaming(&self) -> bool {
        self.is_previewing() || *self == OrchestratorState::Capturing
    }
}

/// Progress of the running burst
#[derive(Debug, Clone, Copy)]
struct Burst {
    length: u32,
    captured: u32,
    plan: TimelinePlan,
    /// Frames before the next real frame were discarded
    skipped: bool,
    /// Bracket step for the next real frame was applied
    stepped: bool,
}

impl Burst {
    fn all_captured(&self) -> bool {
        self.captured >= self.length
    }
}

pub(crate) struct ControlThread {
    config: OrchestratorConfig,
    notifier: Notifier,
    device: Box<dyn CameraDevice>,
    aaa: Box<dyn AaaControl>,
    encoder: Box<dyn PictureEncoder>,
    preview: Box<dyn PreviewConsumer>,
    callbacks: Arc<dyn CameraCallbacks>,
    state: OrchestratorState,
    params: Parameters,
    tracker: CouplingTracker,
    bracket: BracketSequencer,
    burst: Option<Burst>,
    /// Snapshots of the running burst still held by the encoder
    encoding: HashSet<BufferId>,
    video_snapshot_pending: bool,
    focus_running: bool,
}

impl ControlThread {
    pub(crate) fn new(config: OrchestratorConfig, collaborators: Collaborators, notifier: Notifier) -> Self {
        let Collaborators {
            device,
            aaa,
            encoder,
            preview,
            callbacks,
        } = collaborators;

        Self {
            config,
            notifier,
            device,
            aaa,
            encoder,
            preview,
            callbacks,
            state: OrchestratorState::Stopped,
            params: Parameters::default(),
            tracker: CouplingTracker::new(),
            bracket: BracketSequencer::new(),
            burst: None,
            encoding: HashSet::new(),
            video_snapshot_pending: false,
            focus_running: false,
        }
    }

    fn set_state(&mut self, next: OrchestratorState) {
        if self.state != next {
            info!("State {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    fn invalid(&self, op: &'static str) -> CameraError {
        CameraError::InvalidState { op, state: self.state }
    }

    // ---- device plumbing ----

    fn start_device(&mut self, mode: DeviceMode) -> Result<(), CameraError> {
        let sizes = [
            DeviceParameter::PreviewSize(self.params.preview_size),
            DeviceParameter::VideoSize(self.params.video_size),
            DeviceParameter::SnapshotSize(self.params.picture_size),
            DeviceParameter::PostviewSize(self.params.postview_size),
        ];
        for param in sizes {
            self.device.set_parameter(param)?;
        }
        self.device.start(mode)?;
        debug!("Device streaming in {:?} mode", mode);
        Ok(())
    }

    /// Stop the device; every buffer still out becomes stale
    fn stop_device(&mut self) {
        if let Err(e) = self.device.stop() {
            warn!("Device stop failed: {}", e);
        }
        self.tracker.clear();
        self.video_snapshot_pending = false;
    }

    fn enter_preview(&mut self, mode: DeviceMode) -> Result<(), CameraError> {
        self.start_device(mode)?;
        self.aaa.enable(true)?;
        self.aaa.set_focus_mode(self.params.focus_mode)?;
        Ok(())
    }

    fn disable_aaa(&mut self) {
        self.focus_running = false;
        if let Err(e) = self.aaa.enable(false) {
            warn!("Failed to disable 3A: {}", e);
        }
    }

    fn end_bracketing(&mut self) {
        self.burst = None;
        self.encoding.clear();
        if let Err(e) = self.bracket.end(&mut *self.aaa) {
            warn!("Failed to restore 3A modes: {}", e);
        }
    }

    /// Fall back to `Stopped` after a failed transition
    fn fail_transition(&mut self, op: &str, err: CameraError) -> CameraError {
        error!("{} failed: {}", op, err);
        self.end_bracketing();
        self.stop_device();
        self.disable_aaa();
        self.set_state(OrchestratorState::Stopped);
        err
    }

    // ---- client commands ----

    fn start_preview(&mut self, video: bool) -> CameraReply {
        if self.state != OrchestratorState::Stopped {
            return Err(self.invalid("startPreview"));
        }

        let (mode, next) = if video {
            (DeviceMode::Video, OrchestratorState::PreviewVideo)
        } else {
            (DeviceMode::Preview, OrchestratorState::PreviewStill)
        };
        if let Err(e) = self.enter_preview(mode) {
            return Err(self.fail_transition("startPreview", e));
        }
        self.set_state(next);
        Ok(Reply::Ack)
    }

    fn stop_preview(&mut self) -> CameraReply {
        match self.state {
            OrchestratorState::Stopped => {
                debug!("stopPreview: already stopped");
                Ok(Reply::Ack)
            }
            OrchestratorState::Capturing => Err(self.invalid("stopPreview")),
            _ => {
                self.stop_device();
                self.disable_aaa();
                self.set_state(OrchestratorState::Stopped);
                Ok(Reply::Ack)
            }
        }
    }

    fn start_recording(&mut self) -> CameraReply {
        match self.state {
            OrchestratorState::PreviewVideo => {}
            OrchestratorState::PreviewStill => {
                info!("Restarting device in video mode for recording");
                self.stop_device();
                if let Err(e) = self.start_device(DeviceMode::Video) {
                    return Err(self.fail_transition("startRecording", e));
                }
            }
            _ => return Err(self.invalid("startRecording")),
        }
        self.video_snapshot_pending = false;
        self.set_state(OrchestratorState::Recording);
        Ok(Reply::Ack)
    }

    fn stop_recording(&mut self) -> CameraReply {
        if self.state != OrchestratorState::Recording {
            return Err(self.invalid("stopRecording"));
        }
        self.video_snapshot_pending = false;
        self.set_state(OrchestratorState::PreviewVideo);
        Ok(Reply::Ack)
    }

    fn take_picture(&mut self) -> CameraReply {
        match self.state {
            OrchestratorState::Stopped | OrchestratorState::Capturing => Err(self.invalid("takePicture")),
            OrchestratorState::Recording if self.params.video_snapshot => {
                if self.video_snapshot_pending {
                    return Err(self.invalid("takePicture"));
                }
                info!("Video snapshot requested");
                self.video_snapshot_pending = true;
                Ok(Reply::Ack)
            }
            _ => self.start_capture(),
        }
    }

    /// Bracket mode, burst length and sweep range for the next capture
    fn capture_plan(&self) -> (BracketMode, u32, BracketRange) {
        if self.params.hdr {
            // A range set for another bracket mode is not an EV range
            let range = match self.params.bracket_mode {
                BracketMode::Exposure | BracketMode::None => self.params.bracket_range,
                BracketMode::Focus => None,
            };
            return (
                BracketMode::Exposure,
                self.config.hdr_frame_count,
                range.unwrap_or(self.config.ev_range),
            );
        }
        let default_range = match self.params.bracket_mode {
            BracketMode::Focus => self.config.focus_range,
            _ => self.config.ev_range,
        };
        (
            self.params.bracket_mode,
            self.params.burst_length,
            self.params.bracket_range.unwrap_or(default_range),
        )
    }

    fn start_capture(&mut self) -> CameraReply {
        let (mode, length, range) = self.capture_plan();
        let device_mode = if length > 1 {
            DeviceMode::ContinuousCapture
        } else {
            DeviceMode::Capture
        };

        self.stop_device();
        if let Err(e) = self.start_device(device_mode) {
            return Err(self.fail_transition("takePicture", e));
        }
        if let Err(e) = self.bracket.begin(&mut *self.aaa, mode, length, range) {
            return Err(self.fail_transition("takePicture", e.into()));
        }

        let plan = TimelinePlan::new(
            self.params.burst_skip,
            self.config.latency_frames,
            self.bracket.is_active(),
        );
        debug!("Capture timeline: {:?}", plan);
        self.burst = Some(Burst {
            length,
            captured: 0,
            plan,
            skipped: false,
            stepped: false,
        });
        info!("Capturing {} frame(s), bracketing {:?}", length, mode);
        self.set_state(OrchestratorState::Capturing);
        Ok(Reply::Ack)
    }

    /// Stop once every frame was captured and the encoder returned them all
    fn finish_capture_if_done(&mut self) {
        let Some(burst) = self.burst else {
            return;
        };
        if burst.all_captured() && self.encoding.is_empty() {
            info!("Burst of {} complete", burst.length);
            self.end_capture();
        }
    }

    /// Leave `Capturing` for `Stopped`, finished or cancelled
    fn end_capture(&mut self) {
        self.end_bracketing();
        self.stop_device();
        self.disable_aaa();
        self.set_state(OrchestratorState::Stopped);
    }

    fn abort_capture(&mut self, err: CameraError) {
        error!("Capture aborted: {}", err);
        self.callbacks.error(&err);
        self.end_capture();
    }

    fn cancel_picture(&mut self) -> CameraReply {
        match self.state {
            OrchestratorState::Capturing => {
                info!("Capture cancelled");
                self.end_capture();
            }
            OrchestratorState::Recording if self.video_snapshot_pending => {
                info!("Video snapshot cancelled");
                self.video_snapshot_pending = false;
            }
            _ => debug!("cancelPicture: no capture in progress"),
        }
        Ok(Reply::Ack)
    }

    fn auto_focus(&mut self) -> CameraReply {
        if !self.state.is_previewing() {
            warn!("autoFocus while {:?}", self.state);
            self.callbacks.auto_focus_done(false);
            return Ok(Reply::Ack);
        }

        let mode = self.aaa.focus_mode();
        if !mode.supports_search() {
            debug!("autoFocus in {:?} mode completes immediately", mode);
            self.callbacks.auto_focus_done(true);
            return Ok(Reply::Ack);
        }

        self.focus_running = true;
        if let Err(e) = self.aaa.run_auto_focus() {
            warn!("Autofocus failed to start: {}", e);
            self.focus_running = false;
            self.callbacks.auto_focus_done(false);
        }
        Ok(Reply::Ack)
    }

    fn cancel_auto_focus(&mut self) -> CameraReply {
        self.focus_running = false;
        self.aaa.cancel_auto_focus()?;
        Ok(Reply::Ack)
    }

    fn set_parameters(&mut self, params: Parameters) -> CameraReply {
        params.validate(self.config.max_burst_length)?;
        match self.state {
            OrchestratorState::Capturing => return Err(self.invalid("setParameters")),
            OrchestratorState::Recording if params.video_size != self.params.video_size => {
                return Err(self.invalid("setParameters(video_size)"))
            }
            _ => {}
        }

        if params.focus_mode != self.params.focus_mode {
            self.aaa.set_focus_mode(params.focus_mode)?;
        }

        let restart = self.state.is_previewing() && self.params.stream_sizes_differ(&params);
        self.params = params;

        if restart {
            let mode = if self.state == OrchestratorState::PreviewStill {
                DeviceMode::Preview
            } else {
                DeviceMode::Video
            };
            info!(
                "Stream size changed to {} / {}, restarting device",
                self.params.preview_size, self.params.video_size
            );
            self.stop_device();
            if let Err(e) = self.start_device(mode) {
                return Err(self.fail_transition("setParameters", e));
            }
        }
        Ok(Reply::Ack)
    }

    // ---- completions ----

    fn preview_done(&mut self, frame: Buffer) {
        if let Err(e) = self.tracker.on_consumer_done(&mut *self.device, Half::Preview, frame) {
            warn!("Preview frame release failed: {}", e);
        }
    }

    fn release_recording_frame(&mut self, frame: RecordingHandle) {
        let frame = frame.into_buffer();
        if let Err(e) = self.tracker.on_consumer_done(&mut *self.device, Half::Recording, frame) {
            warn!("Recording frame release failed: {}", e);
        }
    }

    fn picture_done(&mut self, request: PictureRequest) {
        let result = match request.source {
            PictureSource::Still { snapshot, postview } => {
                let burst_frame = self.encoding.remove(&snapshot.id);
                let released = self
                    .device
                    .release_snapshot(snapshot, postview)
                    .absorb_stale("snapshot release")
                    .map_err(CameraError::from);
                if burst_frame {
                    self.finish_capture_if_done();
                }
                released
            }
            PictureSource::VideoSnapshot { frame } => self
                .tracker
                .on_consumer_done(&mut *self.device, Half::Extra, frame)
                .map(|_| ()),
        };
        if let Err(e) = result {
            warn!("Picture {} release failed: {}", request.index, e);
        }
    }

    fn auto_focus_done(&mut self, success: bool) {
        if !self.focus_running {
            debug!("Dropping autofocus result, no search running");
            return;
        }
        self.focus_running = false;
        info!("Autofocus done (success={})", success);
        self.callbacks.auto_focus_done(success);
    }

    fn scene_detected(&mut self, scene: SceneMode, hdr_recommended: bool) {
        if self.params.scene_detection {
            debug!("Scene {:?} (hdr recommended: {})", scene, hdr_recommended);
            self.callbacks.scene_detected(scene, hdr_recommended);
        }
    }

    fn shutdown(&mut self) {
        info!("Orchestrator exiting in {:?} state", self.state);
        if self.state.is_streaming() {
            self.end_bracketing();
            self.stop_device();
            self.disable_aaa();
            self.set_state(OrchestratorState::Stopped);
        }
    }

    // ---- frame routing ----

    /// Pull one preview (or coupled preview + recording) frame and hand it
    /// to its consumers. Returns `false` when nothing could be pulled.
    fn process_frame(&mut self) -> bool {
        match self.state {
            OrchestratorState::PreviewStill => {
                let frame = match self.device.acquire_preview_frame() {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("Preview frame acquisition failed: {}", e);
                        return false;
                    }
                };
                if frame.is_corrupted() {
                    warn!("Corrupted preview frame {}, returning it", frame.id);
                    if let Err(e) = self.device.release_preview_frame(frame).absorb_stale("corrupted preview") {
                        warn!("Corrupted preview release failed: {}", e);
                    }
                    return true;
                }
                self.preview.preview_frame(frame, &self.notifier);
                true
            }
            OrchestratorState::PreviewVideo | OrchestratorState::Recording => self.process_video_frame(),
            _ => false,
        }
    }

    fn process_video_frame(&mut self) -> bool {
        let preview = match self.device.acquire_preview_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Preview frame acquisition failed: {}", e);
                return false;
            }
        };
        let recording = match self.device.acquire_recording_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Recording frame acquisition failed: {}", e);
                if let Err(e) = self.device.release_preview_frame(preview).absorb_stale("uncoupled preview") {
                    warn!("Preview release failed: {}", e);
                }
                return false;
            }
        };

        if preview.is_corrupted() || recording.is_corrupted() {
            warn!("Corrupted frame in slot {}, returning it", preview.index);
            let recording = self.device.release_recording_frame(recording).absorb_stale("corrupted recording");
            let preview = self.device.release_preview_frame(preview).absorb_stale("corrupted preview");
            if let Err(e) = recording.and(preview) {
                warn!("Corrupted frame release failed: {}", e);
            }
            return true;
        }

        let recording_consumer = self.state == OrchestratorState::Recording;
        let extra = recording_consumer && self.video_snapshot_pending;
        self.tracker.on_acquire(&preview, &recording, extra);
        self.preview.preview_frame(preview, &self.notifier);

        if extra {
            self.video_snapshot_pending = false;
            self.callbacks.shutter();
            let request = PictureRequest {
                index: 0,
                burst_length: 1,
                source: PictureSource::VideoSnapshot {
                    frame: recording.clone().hand_to(BufferOwner::Encoder),
                },
            };
            self.encoder.encode(request, &self.notifier);
        }

        if recording_consumer {
            let handle = RecordingHandle::new(recording.hand_to(BufferOwner::Client));
            self.callbacks.recording_frame(handle, &self.notifier);
        } else if let Err(e) = self.tracker.on_consumer_done(&mut *self.device, Half::Recording, recording) {
            warn!("Unused recording frame release failed: {}", e);
        }
        true
    }

    /// Run one capture iteration. Returns `false` when no frame was taken
    /// and the loop should wait before trying again.
    fn capture_iteration(&mut self) -> bool {
        let Some(burst) = self.burst else {
            warn!("Capturing without a burst, stopping");
            self.end_capture();
            return false;
        };

        if burst.all_captured() {
            return false;
        }

        if !burst.skipped {
            let (count, apply) = if burst.captured == 0 {
                // Warm-up steps survive a failed attempt
                let pending = burst.plan.warmup_apply.saturating_sub(self.bracket.applied());
                (burst.plan.warmup, pending)
            } else {
                (burst.plan.inter_frame_skip, 0)
            };
            match self.bracket.skip_frames(&mut *self.device, &mut *self.aaa, count, apply) {
                Ok(()) => self.update_burst(|b| b.skipped = true),
                Err(BracketError::Device(e)) => {
                    let e = CameraError::from(e);
                    error!("Skipping frames before {}/{} failed: {}", burst.captured + 1, burst.length, e);
                    self.callbacks.error(&e);
                    return false;
                }
                Err(e) => {
                    self.abort_capture(e.into());
                    return false;
                }
            }
        }

        if !burst.stepped {
            if let Err(e) = self.bracket.advance(&mut *self.aaa) {
                self.abort_capture(e.into());
                return false;
            }
            self.update_burst(|b| b.stepped = true);
        }

        let (snapshot, postview) = match self.device.acquire_snapshot() {
            Ok(pair) => pair,
            Err(e) => {
                let e = CameraError::from(e);
                error!("Capture of frame {}/{} failed: {}", burst.captured + 1, burst.length, e);
                self.callbacks.error(&e);
                return false;
            }
        };

        if snapshot.is_corrupted() {
            warn!("Corrupted snapshot {}, returning it", snapshot.id);
            if let Err(e) = self.device.release_snapshot(snapshot, postview).absorb_stale("corrupted snapshot") {
                warn!("Corrupted snapshot release failed: {}", e);
            }
            return true;
        }

        if burst.captured == 0 {
            self.callbacks.shutter();
        }
        debug!(
            "Captured frame {}/{} (raw frame {}, ev {})",
            burst.captured + 1,
            burst.length,
            snapshot.sequence,
            snapshot.metadata.exposure_bias
        );
        self.encoding.insert(snapshot.id);
        let request = PictureRequest {
            index: burst.captured,
            burst_length: burst.length,
            source: PictureSource::Still {
                snapshot: snapshot.hand_to(BufferOwner::Encoder),
                postview: postview.hand_to(BufferOwner::Encoder),
            },
        };
        self.encoder.encode(request, &self.notifier);

        let captured = burst.captured + 1;
        self.update_burst(|b| {
            b.captured = captured;
            b.skipped = false;
            b.stepped = false;
        });
        if captured >= burst.length {
            debug!("All {} frame(s) captured, waiting for the encoder", burst.length);
        }
        true
    }

    fn update_burst(&mut self, f: impl FnOnce(&mut Burst)) {
        if let Some(burst) = self.burst.as_mut() {
            f(burst);
        }
    }
}

impl Handler<Message, CameraReply> for ControlThread {
    fn handle(&mut self, msg: Message, queue: &CameraQueue) -> Flow {
        let kind = msg.kind();
        let reply = match msg {
            Message::Exit => {
                self.shutdown();
                return Flow::Exit;
            }
            Message::StartPreview { video } => self.start_preview(video),
            Message::StopPreview => self.stop_preview(),
            Message::StartRecording => self.start_recording(),
            Message::StopRecording => self.stop_recording(),
            Message::TakePicture => self.take_picture(),
            Message::CancelPicture => self.cancel_picture(),
            Message::AutoFocus => self.auto_focus(),
            Message::CancelAutoFocus => self.cancel_auto_focus(),
            Message::SetParameters(params) => self.set_parameters(*params),
            Message::GetParameters => Ok(Reply::Parameters(Box::new(self.params.clone()))),
            Message::GetState => Ok(Reply::State(self.state)),
            Message::ReleaseRecordingFrame(frame) => {
                self.release_recording_frame(frame);
                return Flow::Continue;
            }
            Message::PreviewDone(frame) => {
                self.preview_done(frame);
                return Flow::Continue;
            }
            Message::PictureDone(request) => {
                self.picture_done(request);
                return Flow::Continue;
            }
            Message::AutoFocusDone { success } => {
                self.auto_focus_done(success);
                return Flow::Continue;
            }
            Message::SceneDetected {
                scene,
                hdr_recommended,
            } => {
                self.scene_detected(scene, hdr_recommended);
                return Flow::Continue;
            }
        };

        if let Err(e) = &reply {
            warn!("{:?} rejected: {}", kind, e);
        }
        if let Err(e) = queue.reply(kind, reply) {
            error!("Failed to reply to {:?}: {}", kind, e);
        }
        Flow::Continue
    }

    fn on_idle(&mut self, _queue: &CameraQueue) -> Idle {
        if !self.state.is_streaming() {
            return Idle::Block;
        }
        if self.burst.is_some_and(|b| b.all_captured()) {
            // Only encoder completions can move the capture on
            return Idle::Block;
        }
        if !self.device.data_available() {
            return Idle::Wait(self.config.poll_interval());
        }

        let progressed = if self.state == OrchestratorState::Capturing {
            self.capture_iteration()
        } else {
            self.process_frame()
        };
        if progressed {
            Idle::Again
        } else {
            Idle::Wait(self.config.poll_interval())
        }
    }
}
