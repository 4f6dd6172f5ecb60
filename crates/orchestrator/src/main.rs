//! Camera Pipeline - Simulator Entry Point
//!
//! Runs a scripted camera session (preview, autofocus, single shot,
//! recording with a video snapshot, HDR burst) against the simulated ISP.

use aaa_control::MockAaa;
use camera_capture::{MockDevice, MockDeviceConfig};
use orchestrator::{
    init_logging, CameraCallbacks, CameraClient, CameraError, Collaborators, EncodedPicture, Notifier, Orchestrator,
    OrchestratorConfig, OrchestratorState, RecordingHandle,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Counts what the session produced
#[derive(Default)]
struct SessionLog {
    previews: AtomicUsize,
    pictures: AtomicUsize,
    recorded: AtomicUsize,
    errors: AtomicUsize,
}

impl CameraCallbacks for SessionLog {
    fn shutter(&self) {
        info!("*click*");
    }

    fn preview_frame(&self, _frame: &camera_capture::Buffer) {
        self.previews.fetch_add(1, Ordering::Relaxed);
    }

    fn picture_taken(&self, picture: &EncodedPicture) {
        self.pictures.fetch_add(1, Ordering::Relaxed);
        info!(
            "Picture {}/{}: {} at {:+.1} EV, {} bytes{}",
            picture.index + 1,
            picture.burst_length,
            picture.size,
            picture.metadata.exposure_bias,
            picture.bytes,
            if picture.video_snapshot { " (video snapshot)" } else { "" }
        );
    }

    fn recording_frame(&self, frame: RecordingHandle, notifier: &Notifier) {
        self.recorded.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = notifier.release_recording_frame(frame) {
            warn!("Failed to release recording frame: {}", e);
        }
    }

    fn auto_focus_done(&self, success: bool) {
        info!("Autofocus {}", if success { "locked" } else { "failed" });
    }

    fn error(&self, error: &CameraError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        error!("Camera error: {}", error);
    }
}

fn wait_for_state(client: &CameraClient, state: OrchestratorState, timeout: Duration) -> Result<(), CameraError> {
    let deadline = Instant::now() + timeout;
    while client.state()? != state {
        if Instant::now() >= deadline {
            return Err(CameraError::BadRequest(format!("timed out waiting for {:?}", state)));
        }
        thread::sleep(Duration::from_millis(10));
    }
    Ok(())
}

fn run_session(client: &CameraClient) -> Result<(), CameraError> {
    info!("--- Preview and single shot ---");
    client.start_preview(false)?;
    thread::sleep(Duration::from_millis(300));
    client.auto_focus()?;
    thread::sleep(Duration::from_millis(100));
    client.take_picture()?;
    wait_for_state(client, OrchestratorState::Stopped, Duration::from_secs(5))?;

    info!("--- Recording with video snapshot ---");
    let mut params = client.parameters()?;
    params.video_snapshot = true;
    client.set_parameters(params.clone())?;
    client.start_preview(true)?;
    client.start_recording()?;
    thread::sleep(Duration::from_millis(500));
    client.take_picture()?;
    thread::sleep(Duration::from_millis(500));
    client.stop_recording()?;
    client.stop_preview()?;

    info!("--- HDR burst ---");
    params.video_snapshot = false;
    params.hdr = true;
    client.set_parameters(params)?;
    client.start_preview(false)?;
    thread::sleep(Duration::from_millis(200));
    client.take_picture()?;
    wait_for_state(client, OrchestratorState::Stopped, Duration::from_secs(5))?;

    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    info!("=== Camera Pipeline v{} ===", env!("CARGO_PKG_VERSION"));
    let config = OrchestratorConfig::load(None)?;

    let device = MockDevice::new(MockDeviceConfig {
        latency_frames: config.latency_frames as u64,
        frame_interval: Some(Duration::from_millis(33)),
        ..Default::default()
    });
    let aaa = MockAaa::with_sensor(device.probe());
    aaa.probe().auto_complete_focus(true);

    let log = Arc::new(SessionLog::default());
    let collaborators = Collaborators::with_workers(Box::new(device), Box::new(aaa), log.clone(), &config)?;
    let orchestrator = Orchestrator::spawn(config, collaborators)?;

    let result = run_session(&orchestrator.client());
    orchestrator.shutdown()?;
    result?;

    info!(
        "Session done: {} preview frames, {} recorded frames, {} pictures, {} errors",
        log.previews.load(Ordering::Relaxed),
        log.recorded.load(Ordering::Relaxed),
        log.pictures.load(Ordering::Relaxed),
        log.errors.load(Ordering::Relaxed)
    );
    Ok(())
}
