//! Bracket sweep state machine

use crate::{BracketError, BracketMode, BracketRange, BracketState};
use aaa_control::{AaaControl, AeMode, FocusMode};
use camera_capture::{CameraDevice, DeviceMode, StaleExt};
use tracing::{debug, info, warn};

/// Steps exposure or focus across the frames of a burst.
///
/// The sequencer only touches 3A and the device when called; the capture loop
/// decides when to skip frames and when to advance.
#[derive(Debug, Default)]
pub struct BracketSequencer {
    state: BracketState,
    frame_count: u32,
    applied: u32,
    /// 3A modes in effect before the sweep took over
    saved: Option<(AeMode, FocusMode)>,
}

impl BracketSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current sweep position
    pub fn state(&self) -> &BracketState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Number of steps applied so far
    pub fn applied(&self) -> u32 {
        self.applied
    }

    /// Start a sweep of `frame_count` values over `range`.
    ///
    /// A mode of [`BracketMode::None`] or a single frame leaves bracketing off.
    /// Otherwise the current AE/AF modes are saved and the swept control is
    /// switched to manual; for focus the lens is moved to `range.min` once.
    pub fn begin<A>(
        &mut self,
        aaa: &mut A,
        mode: BracketMode,
        frame_count: u32,
        range: BracketRange,
    ) -> Result<(), BracketError>
    where
        A: AaaControl + ?Sized,
    {
        if self.is_active() {
            self.end(aaa)?;
        }

        if mode == BracketMode::None || frame_count <= 1 {
            debug!("Bracketing disabled ({:?}, {} frames)", mode, frame_count);
            self.reset();
            return Ok(());
        }
        range.validate()?;

        let step = (range.max - range.min) / (frame_count - 1) as f32;
        self.state = BracketState {
            mode,
            current: range.min,
            min: range.min,
            max: range.max,
            step,
        };
        self.frame_count = frame_count;
        self.applied = 0;
        self.saved = Some((aaa.ae_mode(), aaa.focus_mode()));

        if let Err(e) = Self::take_manual_control(aaa, mode, range.min) {
            warn!("Failed to enter {:?} bracketing: {}", mode, e);
            self.end(aaa)?;
            return Err(e);
        }

        info!(
            "{:?} bracketing: {} frames from {} to {} (step {})",
            mode, frame_count, range.min, range.max, step
        );
        Ok(())
    }

    fn take_manual_control<A>(aaa: &mut A, mode: BracketMode, start: f32) -> Result<(), BracketError>
    where
        A: AaaControl + ?Sized,
    {
        match mode {
            BracketMode::Exposure => aaa.set_ae_mode(AeMode::Manual)?,
            BracketMode::Focus => {
                aaa.set_focus_mode(FocusMode::Manual)?;
                aaa.seek_focus(start.round() as i32)?;
            }
            BracketMode::None => {}
        }
        Ok(())
    }

    /// Apply the current value and step to the next one.
    ///
    /// Returns the applied value, or `None` once every step has been applied
    /// or when no sweep is active.
    pub fn advance<A>(&mut self, aaa: &mut A) -> Result<Option<f32>, BracketError>
    where
        A: AaaControl + ?Sized,
    {
        if !self.is_active() || self.applied >= self.frame_count {
            return Ok(None);
        }

        let value = self.state.current;
        match self.state.mode {
            BracketMode::Exposure => aaa.apply_exposure_value(value)?,
            BracketMode::Focus => aaa.set_focus_position(value.round() as i32)?,
            BracketMode::None => return Ok(None),
        }
        debug!("Bracket step {}/{}: {}", self.applied + 1, self.frame_count, value);

        self.applied += 1;
        self.state.current = if self.applied + 1 >= self.frame_count {
            self.state.max
        } else {
            self.state.min + self.state.step * self.applied as f32
        };
        Ok(Some(value))
    }

    /// Discard `count` device frames, applying a bracket step before each of
    /// the first `apply_for_first_n`
    pub fn skip_frames<D, A>(
        &mut self,
        device: &mut D,
        aaa: &mut A,
        count: u32,
        apply_for_first_n: u32,
    ) -> Result<(), BracketError>
    where
        D: CameraDevice + ?Sized,
        A: AaaControl + ?Sized,
    {
        for i in 0..count {
            if i < apply_for_first_n {
                self.advance(aaa)?;
            }
            Self::discard_frame(device)?;
        }
        if count > 0 {
            debug!("Skipped {} frames", count);
        }
        Ok(())
    }

    fn discard_frame<D>(device: &mut D) -> Result<(), BracketError>
    where
        D: CameraDevice + ?Sized,
    {
        match device.mode() {
            Some(mode) if mode.is_capture() => {
                let (snapshot, postview) = device.acquire_snapshot()?;
                device.release_snapshot(snapshot, postview).absorb_stale("skip")?;
            }
            Some(DeviceMode::Video) => {
                let preview = device.acquire_preview_frame()?;
                let recording = device.acquire_recording_frame()?;
                device.release_recording_frame(recording).absorb_stale("skip")?;
                device.release_preview_frame(preview).absorb_stale("skip")?;
            }
            _ => {
                let preview = device.acquire_preview_frame()?;
                device.release_preview_frame(preview).absorb_stale("skip")?;
            }
        }
        Ok(())
    }

    /// Finish or abort the sweep, restoring the saved AE/AF modes
    pub fn end<A>(&mut self, aaa: &mut A) -> Result<(), BracketError>
    where
        A: AaaControl + ?Sized,
    {
        let saved = self.saved.take();
        let mode = self.state.mode;
        self.reset();

        if let Some((ae_mode, focus_mode)) = saved {
            let ae = aaa.set_ae_mode(ae_mode);
            let af = aaa.set_focus_mode(focus_mode);
            debug!("{:?} bracketing ended, restored {:?}/{:?}", mode, ae_mode, focus_mode);
            ae?;
            af?;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.state = BracketState::default();
        self.frame_count = 0;
        self.applied = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TimelinePlan;
    use aaa_control::{AaaCall, MockAaa};
    use camera_capture::{MockDevice, MockDeviceConfig};
    use proptest::prelude::*;

    /// Run a burst the way the capture loop does and collect
    /// (raw frame number, exposure, focus) of each real frame
    fn run_burst(
        device: &mut MockDevice,
        aaa: &mut MockAaa,
        seq: &mut BracketSequencer,
        plan: TimelinePlan,
        frames: u32,
    ) -> Vec<(u64, f32, i32)> {
        let mut seen = Vec::new();
        seq.skip_frames(device, aaa, plan.warmup, plan.warmup_apply).unwrap();
        for n in 0..frames {
            seq.advance(aaa).unwrap();
            let (snapshot, postview) = device.acquire_snapshot().unwrap();
            seen.push((
                snapshot.sequence,
                snapshot.metadata.exposure_bias,
                snapshot.metadata.focus_position,
            ));
            device.release_snapshot(snapshot, postview).unwrap();
            if n + 1 < frames {
                seq.skip_frames(device, aaa, plan.inter_frame_skip, 0).unwrap();
            }
        }
        seen
    }

    fn capture_rig(latency: u64) -> (MockDevice, MockAaa) {
        let mut device = MockDevice::new(MockDeviceConfig {
            latency_frames: latency,
            ..Default::default()
        });
        let aaa = MockAaa::with_sensor(device.probe());
        device.start(DeviceMode::ContinuousCapture).unwrap();
        (device, aaa)
    }

    #[test]
    fn test_exposure_timeline_without_skip() {
        let (mut device, mut aaa) = capture_rig(2);
        let mut seq = BracketSequencer::new();
        seq.begin(&mut aaa, BracketMode::Exposure, 5, BracketRange::new(-2.0, 2.0))
            .unwrap();

        let plan = TimelinePlan::new(0, 2, true);
        let seen = run_burst(&mut device, &mut aaa, &mut seq, plan, 5);
        let frames: Vec<(u64, f32)> = seen.iter().map(|(n, ev, _)| (*n, *ev)).collect();
        assert_eq!(
            frames,
            vec![(2, -2.0), (4, -1.0), (6, 0.0), (8, 1.0), (10, 2.0)]
        );
    }

    #[test]
    fn test_exposure_timeline_with_burst_skip() {
        let (mut device, mut aaa) = capture_rig(2);
        let mut seq = BracketSequencer::new();
        seq.begin(&mut aaa, BracketMode::Exposure, 3, BracketRange::new(-1.0, 1.0))
            .unwrap();

        let plan = TimelinePlan::new(3, 2, true);
        let seen = run_burst(&mut device, &mut aaa, &mut seq, plan, 3);
        let frames: Vec<(u64, f32)> = seen.iter().map(|(n, ev, _)| (*n, *ev)).collect();
        assert_eq!(frames, vec![(3, -1.0), (7, 0.0), (11, 1.0)]);
    }

    #[test]
    fn test_focus_sweep_seeks_and_restores() {
        let (mut device, mut aaa) = capture_rig(2);
        let mut seq = BracketSequencer::new();
        seq.begin(&mut aaa, BracketMode::Focus, 3, BracketRange::new(100.0, 300.0))
            .unwrap();
        assert_eq!(aaa.focus_mode(), FocusMode::Manual);
        assert!(aaa.probe().calls().contains(&AaaCall::SeekFocus(100)));

        let plan = TimelinePlan::new(0, 2, true);
        let seen = run_burst(&mut device, &mut aaa, &mut seq, plan, 3);
        let positions: Vec<i32> = seen.iter().map(|(_, _, pos)| *pos).collect();
        assert_eq!(positions, vec![100, 200, 300]);

        seq.end(&mut aaa).unwrap();
        assert!(!seq.is_active());
        assert_eq!(aaa.focus_mode(), FocusMode::Auto);
    }

    #[test]
    fn test_single_frame_disables_bracketing() {
        let mut aaa = MockAaa::new();
        let mut seq = BracketSequencer::new();
        seq.begin(&mut aaa, BracketMode::Exposure, 1, BracketRange::new(-2.0, 2.0))
            .unwrap();
        assert!(!seq.is_active());
        assert_eq!(seq.advance(&mut aaa).unwrap(), None);
        assert_eq!(aaa.ae_mode(), AeMode::Auto);
        assert!(aaa.probe().calls().is_empty());
    }

    #[test]
    fn test_advance_past_end_is_noop() {
        let mut aaa = MockAaa::new();
        let mut seq = BracketSequencer::new();
        seq.begin(&mut aaa, BracketMode::Exposure, 2, BracketRange::new(0.0, 1.0))
            .unwrap();

        assert_eq!(seq.advance(&mut aaa).unwrap(), Some(0.0));
        assert_eq!(seq.advance(&mut aaa).unwrap(), Some(1.0));
        assert_eq!(seq.advance(&mut aaa).unwrap(), None);
        assert_eq!(seq.applied(), 2);
        assert_eq!(aaa.probe().exposures(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_skip_failure_keeps_applied_steps() {
        let (mut device, mut aaa) = capture_rig(2);
        let probe = device.probe();
        let mut seq = BracketSequencer::new();
        seq.begin(&mut aaa, BracketMode::Exposure, 3, BracketRange::new(-2.0, 2.0))
            .unwrap();

        probe.fail_snapshots(1);
        let err = seq.skip_frames(&mut device, &mut aaa, 2, 1).unwrap_err();
        assert!(matches!(err, BracketError::Device(_)));
        assert_eq!(seq.applied(), 1);

        // Retry with the step already counted
        let pending = 1u32.saturating_sub(seq.applied());
        seq.skip_frames(&mut device, &mut aaa, 2, pending).unwrap();
        assert_eq!(seq.applied(), 1);
        assert_eq!(aaa.probe().exposures(), vec![-2.0]);
        assert_eq!(probe.outstanding(), 0);
    }

    #[test]
    fn test_invalid_range_rejected() {
        let mut aaa = MockAaa::new();
        let mut seq = BracketSequencer::new();
        let err = seq
            .begin(&mut aaa, BracketMode::Exposure, 3, BracketRange::new(2.0, -2.0))
            .unwrap_err();
        assert!(matches!(err, BracketError::InvalidRange(_)));
        assert!(!seq.is_active());
    }

    #[test]
    fn test_end_restores_modes_after_failure() {
        let mut aaa = MockAaa::new();
        aaa.probe().fail_exposure_after(1);
        let mut seq = BracketSequencer::new();
        seq.begin(&mut aaa, BracketMode::Exposure, 3, BracketRange::new(-1.0, 1.0))
            .unwrap();
        assert_eq!(aaa.ae_mode(), AeMode::Manual);

        seq.advance(&mut aaa).unwrap();
        assert!(matches!(seq.advance(&mut aaa), Err(BracketError::Aaa(_))));

        seq.end(&mut aaa).unwrap();
        assert_eq!(aaa.ae_mode(), AeMode::Auto);
    }

    proptest! {
        #[test]
        fn prop_one_new_value_per_real_frame(
            skip in 0u32..5,
            latency in 0u32..4,
            frames in 2u32..6,
        ) {
            let (mut device, mut aaa) = capture_rig(latency as u64);
            let mut seq = BracketSequencer::new();
            let max = (frames - 1) as f32;
            seq.begin(&mut aaa, BracketMode::Exposure, frames, BracketRange::new(0.0, max))
                .unwrap();

            let plan = TimelinePlan::new(skip, latency, true);
            let seen = run_burst(&mut device, &mut aaa, &mut seq, plan, frames);

            for (n, (raw, ev, _)) in seen.iter().enumerate() {
                prop_assert_eq!(*raw, plan.raw_frame(n as u32));
                prop_assert_eq!(*ev, n as f32);
            }
        }
    }
}
