//! Simulated 3A

use crate::{AaaControl, AaaError, AaaListener, AeMode, FocusMode, SceneMode};
use camera_capture::{DeviceParameter, MockDeviceProbe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// 3A call recorded by the simulator
#[derive(Debug, Clone, PartialEq)]
pub enum AaaCall {
    Enable(bool),
    SetFocusMode(FocusMode),
    SetAeMode(AeMode),
    RunAutoFocus,
    CancelAutoFocus,
    ApplyExposure(f32),
    SeekFocus(i32),
    SetFocusPosition(i32),
}

#[derive(Default)]
struct AaaState {
    enabled: bool,
    focus_mode: FocusMode,
    ae_mode: AeMode,
    af_running: bool,
    /// Result reported immediately when a search starts
    auto_complete: Option<bool>,
    /// Exposure writes left before injected failures start
    exposure_budget: Option<u32>,
    listener: Option<Arc<dyn AaaListener>>,
    calls: Vec<AaaCall>,
}

fn lock(state: &Mutex<AaaState>) -> MutexGuard<'_, AaaState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Simulated 3A writing exposure and focus through the simulated sensor
pub struct MockAaa {
    sensor: Option<MockDeviceProbe>,
    state: Arc<Mutex<AaaState>>,
}

impl MockAaa {
    /// 3A that only records calls
    pub fn new() -> Self {
        Self {
            sensor: None,
            state: Arc::new(Mutex::new(AaaState::default())),
        }
    }

    /// 3A driving exposure and lens position on a simulated device
    pub fn with_sensor(sensor: MockDeviceProbe) -> Self {
        info!("Creating mock 3A bound to mock sensor");
        Self {
            sensor: Some(sensor),
            ..Self::new()
        }
    }

    /// Inspection and steering handle
    pub fn probe(&self) -> MockAaaProbe {
        MockAaaProbe {
            state: Arc::clone(&self.state),
        }
    }

    fn write_sensor(&self, param: DeviceParameter) -> Result<(), AaaError> {
        if let Some(sensor) = &self.sensor {
            sensor.write_parameter(param)?;
        }
        Ok(())
    }
}

impl Default for MockAaa {
    fn default() -> Self {
        Self::new()
    }
}

impl AaaControl for MockAaa {
    fn set_listener(&mut self, listener: Arc<dyn AaaListener>) {
        lock(&self.state).listener = Some(listener);
    }

    fn enable(&mut self, enabled: bool) -> Result<(), AaaError> {
        let mut state = lock(&self.state);
        state.calls.push(AaaCall::Enable(enabled));
        state.enabled = enabled;
        if !enabled {
            state.af_running = false;
        }
        Ok(())
    }

    fn focus_mode(&self) -> FocusMode {
        lock(&self.state).focus_mode
    }

    fn set_focus_mode(&mut self, mode: FocusMode) -> Result<(), AaaError> {
        let mut state = lock(&self.state);
        state.calls.push(AaaCall::SetFocusMode(mode));
        state.focus_mode = mode;
        Ok(())
    }

    fn ae_mode(&self) -> AeMode {
        lock(&self.state).ae_mode
    }

    fn set_ae_mode(&mut self, mode: AeMode) -> Result<(), AaaError> {
        let mut state = lock(&self.state);
        state.calls.push(AaaCall::SetAeMode(mode));
        state.ae_mode = mode;
        Ok(())
    }

    fn run_auto_focus(&mut self) -> Result<(), AaaError> {
        let (listener, result) = {
            let mut state = lock(&self.state);
            state.calls.push(AaaCall::RunAutoFocus);
            if !state.enabled {
                return Err(AaaError::NotEnabled);
            }
            if !state.focus_mode.supports_search() {
                return Err(AaaError::Unsupported(format!(
                    "autofocus in {:?} mode",
                    state.focus_mode
                )));
            }
            state.af_running = true;
            match state.auto_complete {
                Some(result) => {
                    state.af_running = false;
                    (state.listener.clone(), Some(result))
                }
                None => (None, None),
            }
        };

        if let (Some(listener), Some(success)) = (listener, result) {
            debug!("Mock 3A: autofocus completes immediately (success={})", success);
            listener.auto_focus_done(success);
        }
        Ok(())
    }

    fn cancel_auto_focus(&mut self) -> Result<(), AaaError> {
        let mut state = lock(&self.state);
        state.calls.push(AaaCall::CancelAutoFocus);
        state.af_running = false;
        Ok(())
    }

    fn apply_exposure_value(&mut self, ev: f32) -> Result<(), AaaError> {
        {
            let mut state = lock(&self.state);
            state.calls.push(AaaCall::ApplyExposure(ev));
            if let Some(budget) = state.exposure_budget.as_mut() {
                if *budget == 0 {
                    return Err(AaaError::Failed(format!("exposure write {} rejected", ev)));
                }
                *budget -= 1;
            }
        }
        self.write_sensor(DeviceParameter::ExposureBias(ev))
    }

    fn seek_focus(&mut self, position: i32) -> Result<(), AaaError> {
        lock(&self.state).calls.push(AaaCall::SeekFocus(position));
        self.write_sensor(DeviceParameter::FocusPosition(position))
    }

    fn set_focus_position(&mut self, position: i32) -> Result<(), AaaError> {
        lock(&self.state).calls.push(AaaCall::SetFocusPosition(position));
        self.write_sensor(DeviceParameter::FocusPosition(position))
    }
}

/// Shared handle for inspecting and steering a [`MockAaa`]
#[derive(Clone)]
pub struct MockAaaProbe {
    state: Arc<Mutex<AaaState>>,
}

impl MockAaaProbe {
    /// All recorded calls
    pub fn calls(&self) -> Vec<AaaCall> {
        lock(&self.state).calls.clone()
    }

    /// Exposure values written so far
    pub fn exposures(&self) -> Vec<f32> {
        lock(&self.state)
            .calls
            .iter()
            .filter_map(|c| match c {
                AaaCall::ApplyExposure(ev) => Some(*ev),
                _ => None,
            })
            .collect()
    }

    pub fn is_enabled(&self) -> bool {
        lock(&self.state).enabled
    }

    pub fn focus_mode(&self) -> FocusMode {
        lock(&self.state).focus_mode
    }

    pub fn ae_mode(&self) -> AeMode {
        lock(&self.state).ae_mode
    }

    /// Check if an autofocus search is in progress
    pub fn af_running(&self) -> bool {
        lock(&self.state).af_running
    }

    /// Report autofocus searches as finished as soon as they start
    pub fn auto_complete_focus(&self, success: bool) {
        lock(&self.state).auto_complete = Some(success);
    }

    /// Allow `count` more exposure writes, then fail every following one
    pub fn fail_exposure_after(&self, count: u32) {
        lock(&self.state).exposure_budget = Some(count);
    }

    /// Finish a running autofocus search
    pub fn complete_auto_focus(&self, success: bool) {
        let listener = {
            let mut state = lock(&self.state);
            state.af_running = false;
            state.listener.clone()
        };
        if let Some(listener) = listener {
            listener.auto_focus_done(success);
        }
    }

    /// Emit a scene detection result
    pub fn detect_scene(&self, scene: SceneMode, hdr_recommended: bool) {
        let listener = lock(&self.state).listener.clone();
        if let Some(listener) = listener {
            listener.scene_detected(scene, hdr_recommended);
        }
    }
}
