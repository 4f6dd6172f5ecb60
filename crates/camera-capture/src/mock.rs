//! Simulated ISP device
//!
//! Behaves like a buffer-pool driver: a fixed number of slots per stream,
//! a generation counter bumped on every start/stop so that late releases are
//! reported as stale, and a configurable latency between writing an
//! exposure/focus parameter and the first frame that reflects it.

use crate::{
    Buffer, BufferId, BufferKind, BufferOwner, BufferStatus, CameraDevice, DeviceError, DeviceMode,
    DeviceParameter, FrameMetadata, PixelFormat, Size,
};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Nominal frame period used for timestamps (30 fps)
const FRAME_PERIOD_NS: u64 = 33_333_333;

/// Simulated device configuration
#[derive(Debug, Clone)]
pub struct MockDeviceConfig {
    pub preview_size: Size,
    pub video_size: Size,
    pub snapshot_size: Size,
    pub postview_size: Size,
    pub format: PixelFormat,
    /// Preview/video slots
    pub preview_buffers: u32,
    /// Snapshot/postview slots
    pub snapshot_buffers: u32,
    /// Frames between a parameter write and the first frame reflecting it
    pub latency_frames: u64,
    /// Simulated frame period; `None` makes frames available immediately
    pub frame_interval: Option<Duration>,
}

impl Default for MockDeviceConfig {
    fn default() -> Self {
        Self {
            preview_size: Size::new(640, 480),
            video_size: Size::new(1280, 720),
            snapshot_size: Size::new(2560, 1920),
            postview_size: Size::new(640, 480),
            format: PixelFormat::Nv12,
            preview_buffers: 6,
            snapshot_buffers: 4,
            latency_frames: 2,
            frame_interval: None,
        }
    }
}

/// Driver call recorded by the simulated device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    Start(DeviceMode),
    Stop,
    SetParameter(DeviceParameter),
    AcquirePreview(u32),
    AcquireRecording(u32),
    AcquireSnapshot(u32),
    ReleasePreview(u32),
    ReleaseRecording(u32),
    ReleaseSnapshot(u32),
    StaleRelease(BufferKind, u32),
}

#[derive(Debug, Default, Clone)]
struct StreamSlot {
    preview: Option<BufferId>,
    recording: Option<BufferId>,
    /// Preview taken in video mode, recording half not yet dequeued
    recording_pending: Option<(u64, FrameMetadata)>,
}

impl StreamSlot {
    fn is_free(&self) -> bool {
        self.preview.is_none() && self.recording.is_none() && self.recording_pending.is_none()
    }
}

#[derive(Debug)]
struct MockState {
    config: MockDeviceConfig,
    mode: Option<DeviceMode>,
    generation: u32,
    next_id: u64,
    frame_number: u64,
    slots: Vec<StreamSlot>,
    recording_ready: Vec<u32>,
    snapshots: Vec<Option<(BufferId, BufferId)>>,
    exposure_bias: f32,
    focus_position: i32,
    pending: Vec<(u64, DeviceParameter)>,
    fail_next_start: bool,
    failing_snapshots: u32,
    corrupt_frames: u32,
    last_frame: Option<Instant>,
    calls: Vec<DeviceCall>,
}

impl MockState {
    fn new(config: MockDeviceConfig) -> Self {
        Self {
            config,
            mode: None,
            generation: 0,
            next_id: 1,
            frame_number: 0,
            slots: Vec::new(),
            recording_ready: Vec::new(),
            snapshots: Vec::new(),
            exposure_bias: 0.0,
            focus_position: 0,
            pending: Vec::new(),
            fail_next_start: false,
            failing_snapshots: 0,
            corrupt_frames: 0,
            last_frame: None,
            calls: Vec::new(),
        }
    }

    fn streaming_mode(&self) -> Result<DeviceMode, DeviceError> {
        self.mode.ok_or(DeviceError::NotStreaming)
    }

    fn apply(&mut self, param: DeviceParameter) {
        match param {
            DeviceParameter::ExposureBias(ev) => self.exposure_bias = ev,
            DeviceParameter::FocusPosition(pos) => self.focus_position = pos,
            DeviceParameter::PreviewSize(s) => self.config.preview_size = s,
            DeviceParameter::VideoSize(s) => self.config.video_size = s,
            DeviceParameter::SnapshotSize(s) => self.config.snapshot_size = s,
            DeviceParameter::PostviewSize(s) => self.config.postview_size = s,
        }
    }

    fn write_parameter(&mut self, param: DeviceParameter) -> Result<(), DeviceError> {
        self.calls.push(DeviceCall::SetParameter(param));
        match param {
            DeviceParameter::ExposureBias(_) | DeviceParameter::FocusPosition(_) => {
                if self.mode.is_some() {
                    let effective_at = self.frame_number + self.config.latency_frames;
                    self.pending.push((effective_at, param));
                } else {
                    self.apply(param);
                }
                Ok(())
            }
            _ if self.mode.is_some() => Err(DeviceError::InvalidParameter(format!(
                "{:?} while streaming",
                param
            ))),
            _ => {
                self.apply(param);
                Ok(())
            }
        }
    }

    /// Advance the sensor by one frame and return its number and settings
    fn next_frame(&mut self) -> (u64, FrameMetadata, BufferStatus) {
        let number = self.frame_number;
        let (due, later): (Vec<_>, Vec<_>) = self
            .pending
            .drain(..)
            .partition(|(effective_at, _)| *effective_at <= number);
        self.pending = later;
        for (_, param) in due {
            self.apply(param);
        }

        self.frame_number += 1;
        self.last_frame = Some(Instant::now());

        let status = if self.corrupt_frames > 0 {
            self.corrupt_frames -= 1;
            BufferStatus::Corrupted
        } else {
            BufferStatus::Ok
        };

        let metadata = FrameMetadata {
            exposure_bias: self.exposure_bias,
            focus_position: self.focus_position,
            timestamp_ns: number * FRAME_PERIOD_NS,
        };
        (number, metadata, status)
    }

    fn make_buffer(
        &mut self,
        kind: BufferKind,
        index: u32,
        size: Size,
        sequence: u64,
        metadata: FrameMetadata,
        status: BufferStatus,
    ) -> Buffer {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        let format = self.config.format;
        Buffer {
            id,
            index,
            generation: self.generation,
            kind,
            width: size.width,
            height: size.height,
            stride: format.bytes_per_line(size.width),
            format,
            owner: Some(BufferOwner::Device),
            status,
            sequence,
            metadata,
        }
    }

    fn check_generation(&mut self, buffer: &Buffer) -> Result<(), DeviceError> {
        if buffer.generation != self.generation {
            self.calls.push(DeviceCall::StaleRelease(buffer.kind, buffer.index));
            return Err(DeviceError::StaleBuffer {
                kind: buffer.kind,
                id: buffer.id,
                generation: buffer.generation,
            });
        }
        Ok(())
    }

    fn reset_pools(&mut self) {
        self.slots = vec![StreamSlot::default(); self.config.preview_buffers as usize];
        self.snapshots = vec![None; self.config.snapshot_buffers as usize];
        self.recording_ready.clear();
    }

    fn outstanding(&self) -> usize {
        let stream: usize = self
            .slots
            .iter()
            .map(|s| s.preview.is_some() as usize + s.recording.is_some() as usize)
            .sum();
        let stills = self.snapshots.iter().filter(|s| s.is_some()).count() * 2;
        stream + stills
    }
}

fn lock(state: &Mutex<MockState>) -> MutexGuard<'_, MockState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated ISP implementing [`CameraDevice`]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    /// Create a simulated device
    pub fn new(config: MockDeviceConfig) -> Self {
        info!(
            "Creating mock device: preview={} video={} snapshot={} latency={} frames",
            config.preview_size, config.video_size, config.snapshot_size, config.latency_frames
        );
        Self {
            state: Arc::new(Mutex::new(MockState::new(config))),
        }
    }

    /// Inspection and fault-injection handle sharing this device's state
    pub fn probe(&self) -> MockDeviceProbe {
        MockDeviceProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new(MockDeviceConfig::default())
    }
}

impl CameraDevice for MockDevice {
    fn start(&mut self, mode: DeviceMode) -> Result<(), DeviceError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.calls.push(DeviceCall::Start(mode));

        if state.fail_next_start {
            state.fail_next_start = false;
            warn!("Mock device: injected start failure ({:?})", mode);
            return Err(DeviceError::Driver(format!("failed to start {:?} stream", mode)));
        }
        if let Some(current) = state.mode {
            return Err(DeviceError::Driver(format!("already streaming in {:?} mode", current)));
        }

        // Settings written while stopped are already effective
        let pending: Vec<_> = state.pending.drain(..).map(|(_, p)| p).collect();
        for param in pending {
            state.apply(param);
        }

        state.generation += 1;
        state.frame_number = 0;
        state.last_frame = None;
        state.reset_pools();
        state.mode = Some(mode);
        debug!("Mock device started in {:?} mode (generation {})", mode, state.generation);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), DeviceError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.calls.push(DeviceCall::Stop);
        if state.mode.take().is_some() {
            state.generation += 1;
            state.reset_pools();
            debug!("Mock device stopped (generation {})", state.generation);
        }
        Ok(())
    }

    fn mode(&self) -> Option<DeviceMode> {
        lock(&self.state).mode
    }

    fn data_available(&mut self) -> bool {
        let wait = {
            let state = lock(&self.state);
            match (state.config.frame_interval, state.last_frame) {
                (Some(interval), Some(last)) => interval.checked_sub(last.elapsed()),
                _ => None,
            }
        };
        if let Some(wait) = wait {
            std::thread::sleep(wait);
        }

        let state = lock(&self.state);
        match state.mode {
            None => false,
            Some(DeviceMode::Preview) | Some(DeviceMode::Video) => {
                state.slots.iter().any(StreamSlot::is_free)
            }
            Some(_) => state.snapshots.iter().any(Option::is_none),
        }
    }

    fn set_parameter(&mut self, param: DeviceParameter) -> Result<(), DeviceError> {
        lock(&self.state).write_parameter(param)
    }

    fn acquire_preview_frame(&mut self) -> Result<Buffer, DeviceError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let mode = state.streaming_mode()?;
        if mode.is_capture() {
            return Err(DeviceError::WrongMode(mode));
        }

        let index = state
            .slots
            .iter()
            .position(StreamSlot::is_free)
            .ok_or(DeviceError::NoBufferAvailable(BufferKind::Preview))? as u32;

        let (sequence, metadata, status) = state.next_frame();
        let size = state.config.preview_size;
        let buffer = state.make_buffer(BufferKind::Preview, index, size, sequence, metadata, status);

        let slot = &mut state.slots[index as usize];
        slot.preview = Some(buffer.id);
        if mode == DeviceMode::Video {
            slot.recording_pending = Some((sequence, metadata));
            state.recording_ready.push(index);
        }
        state.calls.push(DeviceCall::AcquirePreview(index));
        Ok(buffer)
    }

    fn release_preview_frame(&mut self, buffer: Buffer) -> Result<(), DeviceError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.check_generation(&buffer)?;

        let slot = state
            .slots
            .get_mut(buffer.index as usize)
            .filter(|s| s.preview == Some(buffer.id))
            .ok_or(DeviceError::UnknownBuffer {
                kind: buffer.kind,
                id: buffer.id,
            })?;
        slot.preview = None;
        state.calls.push(DeviceCall::ReleasePreview(buffer.index));
        Ok(())
    }

    fn acquire_recording_frame(&mut self) -> Result<Buffer, DeviceError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let mode = state.streaming_mode()?;
        if mode != DeviceMode::Video {
            return Err(DeviceError::WrongMode(mode));
        }
        if state.recording_ready.is_empty() {
            return Err(DeviceError::NoBufferAvailable(BufferKind::Video));
        }
        let index = state.recording_ready.remove(0);

        let (sequence, metadata) = state.slots[index as usize]
            .recording_pending
            .take()
            .ok_or(DeviceError::NoBufferAvailable(BufferKind::Video))?;
        let size = state.config.video_size;
        let buffer = state.make_buffer(BufferKind::Video, index, size, sequence, metadata, BufferStatus::Ok);
        state.slots[index as usize].recording = Some(buffer.id);
        state.calls.push(DeviceCall::AcquireRecording(index));
        Ok(buffer)
    }

    fn release_recording_frame(&mut self, buffer: Buffer) -> Result<(), DeviceError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.check_generation(&buffer)?;

        let slot = state
            .slots
            .get_mut(buffer.index as usize)
            .filter(|s| s.recording == Some(buffer.id))
            .ok_or(DeviceError::UnknownBuffer {
                kind: buffer.kind,
                id: buffer.id,
            })?;
        slot.recording = None;
        state.calls.push(DeviceCall::ReleaseRecording(buffer.index));
        Ok(())
    }

    fn acquire_snapshot(&mut self) -> Result<(Buffer, Buffer), DeviceError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        let mode = state.streaming_mode()?;
        if !mode.is_capture() {
            return Err(DeviceError::WrongMode(mode));
        }
        if state.failing_snapshots > 0 {
            state.failing_snapshots -= 1;
            return Err(DeviceError::Driver("snapshot dequeue failed".to_string()));
        }

        let index = state
            .snapshots
            .iter()
            .position(Option::is_none)
            .ok_or(DeviceError::NoBufferAvailable(BufferKind::Still))? as u32;

        let (sequence, metadata, status) = state.next_frame();
        let snapshot_size = state.config.snapshot_size;
        let postview_size = state.config.postview_size;
        let snapshot = state.make_buffer(BufferKind::Still, index, snapshot_size, sequence, metadata, status);
        let postview = state.make_buffer(BufferKind::Postview, index, postview_size, sequence, metadata, status);

        state.snapshots[index as usize] = Some((snapshot.id, postview.id));
        state.calls.push(DeviceCall::AcquireSnapshot(index));
        Ok((snapshot, postview))
    }

    fn release_snapshot(&mut self, snapshot: Buffer, postview: Buffer) -> Result<(), DeviceError> {
        let mut guard = lock(&self.state);
        let state = &mut *guard;
        state.check_generation(&snapshot)?;

        let entry = state
            .snapshots
            .get_mut(snapshot.index as usize)
            .filter(|s| **s == Some((snapshot.id, postview.id)))
            .ok_or(DeviceError::UnknownBuffer {
                kind: snapshot.kind,
                id: snapshot.id,
            })?;
        *entry = None;
        state.calls.push(DeviceCall::ReleaseSnapshot(snapshot.index));
        Ok(())
    }
}

/// Shared handle for inspecting and steering a [`MockDevice`] from tests and
/// from collaborators that write sensor settings directly
#[derive(Clone)]
pub struct MockDeviceProbe {
    state: Arc<Mutex<MockState>>,
}

impl MockDeviceProbe {
    /// All driver calls so far
    pub fn calls(&self) -> Vec<DeviceCall> {
        lock(&self.state).calls.clone()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Number of recorded calls matching `pred`
    pub fn count(&self, pred: impl Fn(&DeviceCall) -> bool) -> usize {
        lock(&self.state).calls.iter().filter(|c| pred(c)).count()
    }

    pub fn start_count(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::Start(_)))
    }

    pub fn stop_count(&self) -> usize {
        self.count(|c| matches!(c, DeviceCall::Stop))
    }

    /// Current streaming mode
    pub fn mode(&self) -> Option<DeviceMode> {
        lock(&self.state).mode
    }

    /// Current buffer generation
    pub fn generation(&self) -> u32 {
        lock(&self.state).generation
    }

    /// Buffers currently held outside the device
    pub fn outstanding(&self) -> usize {
        lock(&self.state).outstanding()
    }

    /// Exposure bias currently effective on the sensor
    pub fn exposure_bias(&self) -> f32 {
        lock(&self.state).exposure_bias
    }

    /// Lens position currently effective
    pub fn focus_position(&self) -> i32 {
        lock(&self.state).focus_position
    }

    /// Write a sensor setting, subject to the device latency
    pub fn write_parameter(&self, param: DeviceParameter) -> Result<(), DeviceError> {
        lock(&self.state).write_parameter(param)
    }

    /// Make the next `start` fail
    pub fn fail_next_start(&self) {
        lock(&self.state).fail_next_start = true;
    }

    /// Make the next `count` snapshot acquisitions fail
    pub fn fail_snapshots(&self, count: u32) {
        lock(&self.state).failing_snapshots = count;
    }

    /// Flag the next `count` produced frames as corrupted
    pub fn corrupt_next_frames(&self, count: u32) {
        lock(&self.state).corrupt_frames = count;
    }
}
