//! Buffer Coupling Tracker
//!
//! In video mode the device hands out a preview and a recording buffer from
//! the same slot. The slot goes back to the device only once every consumer
//! of both halves is done.

use crate::CameraError;
use camera_capture::{Buffer, BufferKind, BufferOwner, CameraDevice, StaleExt};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Consumer-side half of a coupled slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    /// Preview consumer
    Preview,
    /// Recording consumer (client)
    Recording,
    /// Extra consumer of the recording frame (video snapshot encoder)
    Extra,
}

#[derive(Debug)]
struct CoupledSlot {
    preview: Buffer,
    recording: Buffer,
    preview_released: bool,
    recording_released: bool,
    extra_active: bool,
    extra_released: bool,
}

impl CoupledSlot {
    fn is_done(&self) -> bool {
        self.preview_released && self.recording_released && (!self.extra_active || self.extra_released)
    }

    fn holds(&self, half: Half, buffer: &Buffer) -> bool {
        match half {
            Half::Preview => self.preview.id == buffer.id,
            Half::Recording | Half::Extra => self.recording.id == buffer.id,
        }
    }
}

/// Tracks coupled preview/recording slots by device slot index
#[derive(Debug, Default)]
pub struct CouplingTracker {
    slots: HashMap<u32, CoupledSlot>,
}

impl CouplingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of slots waiting for consumers
    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    /// Start tracking a freshly acquired preview/recording pair
    pub fn on_acquire(&mut self, preview: &Buffer, recording: &Buffer, extra_active: bool) {
        if preview.index != recording.index {
            warn!(
                "Coupled buffers from different slots ({} vs {})",
                preview.index, recording.index
            );
        }
        let slot = CoupledSlot {
            preview: preview.clone().hand_to(BufferOwner::Tracker),
            recording: recording.clone().hand_to(BufferOwner::Tracker),
            preview_released: false,
            recording_released: false,
            extra_active,
            extra_released: false,
        };
        if let Some(old) = self.slots.insert(preview.index, slot) {
            warn!(
                "Slot {} reused while buffers {}/{} were still tracked",
                preview.index, old.preview.id, old.recording.id
            );
        }
    }

    /// Mark one consumer of `buffer` as done. Returns the device buffers to
    /// the device (recording first) once every active half is released.
    ///
    /// Returns `true` when the slot went back to the device.
    pub fn on_consumer_done<D>(&mut self, device: &mut D, half: Half, buffer: Buffer) -> Result<bool, CameraError>
    where
        D: CameraDevice + ?Sized,
    {
        let Some(slot) = self
            .slots
            .get_mut(&buffer.index)
            .filter(|slot| slot.holds(half, &buffer))
        else {
            // Slot dropped by a device stop, or never coupled
            debug!("Untracked {:?} buffer {} returned by {:?} consumer", buffer.kind, buffer.id, half);
            Self::release_direct(device, buffer)?;
            return Ok(true);
        };

        let released = match half {
            Half::Preview => &mut slot.preview_released,
            Half::Recording => &mut slot.recording_released,
            Half::Extra => &mut slot.extra_released,
        };
        if *released {
            warn!("{:?} half of slot {} released twice", half, buffer.index);
            return Err(CameraError::BadRequest(format!(
                "{:?} buffer {} already released",
                half, buffer.id
            )));
        }
        *released = true;

        if !slot.is_done() {
            return Ok(false);
        }

        let Some(slot) = self.slots.remove(&buffer.index) else {
            return Ok(false);
        };
        device
            .release_recording_frame(slot.recording)
            .absorb_stale("coupled recording release")?;
        device
            .release_preview_frame(slot.preview)
            .absorb_stale("coupled preview release")?;
        Ok(true)
    }

    fn release_direct<D>(device: &mut D, buffer: Buffer) -> Result<(), CameraError>
    where
        D: CameraDevice + ?Sized,
    {
        let result = match buffer.kind {
            BufferKind::Preview => device.release_preview_frame(buffer),
            BufferKind::Video => device.release_recording_frame(buffer),
            kind => {
                return Err(CameraError::BadRequest(format!(
                    "{:?} buffer cannot be coupled",
                    kind
                )))
            }
        };
        Ok(result.absorb_stale("late release")?)
    }

    /// Forget every slot after a device stop; the device reclaimed the buffers
    pub fn clear(&mut self) {
        if !self.slots.is_empty() {
            debug!("Dropping {} coupled slots", self.slots.len());
        }
        self.slots.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::{DeviceCall, DeviceMode, MockDevice};
    use proptest::prelude::*;

    fn coupled_pair(device: &mut MockDevice) -> (Buffer, Buffer) {
        let preview = device.acquire_preview_frame().unwrap();
        let recording = device.acquire_recording_frame().unwrap();
        (preview, recording)
    }

    #[test]
    fn test_release_waits_for_all_halves() {
        let mut device = MockDevice::default();
        device.start(DeviceMode::Video).unwrap();
        let probe = device.probe();
        let mut tracker = CouplingTracker::new();

        let (preview, recording) = coupled_pair(&mut device);
        tracker.on_acquire(&preview, &recording, false);
        probe.clear_calls();

        assert!(!tracker
            .on_consumer_done(&mut device, Half::Preview, preview)
            .unwrap());
        assert_eq!(probe.outstanding(), 2);

        assert!(tracker
            .on_consumer_done(&mut device, Half::Recording, recording)
            .unwrap());
        assert_eq!(probe.outstanding(), 0);
        assert_eq!(tracker.pending(), 0);
        assert_eq!(
            probe.calls(),
            vec![DeviceCall::ReleaseRecording(0), DeviceCall::ReleasePreview(0)]
        );
    }

    #[test]
    fn test_extra_consumer_holds_slot() {
        let mut device = MockDevice::default();
        device.start(DeviceMode::Video).unwrap();
        let mut tracker = CouplingTracker::new();

        let (preview, recording) = coupled_pair(&mut device);
        tracker.on_acquire(&preview, &recording, true);

        tracker
            .on_consumer_done(&mut device, Half::Preview, preview)
            .unwrap();
        tracker
            .on_consumer_done(&mut device, Half::Recording, recording.clone())
            .unwrap();
        assert_eq!(tracker.pending(), 1);

        assert!(tracker
            .on_consumer_done(&mut device, Half::Extra, recording)
            .unwrap());
        assert_eq!(device.probe().outstanding(), 0);
    }

    #[test]
    fn test_double_release_rejected() {
        let mut device = MockDevice::default();
        device.start(DeviceMode::Video).unwrap();
        let mut tracker = CouplingTracker::new();

        let (preview, recording) = coupled_pair(&mut device);
        tracker.on_acquire(&preview, &recording, false);
        tracker
            .on_consumer_done(&mut device, Half::Preview, preview.clone())
            .unwrap();
        assert!(tracker
            .on_consumer_done(&mut device, Half::Preview, preview)
            .is_err());
        assert_eq!(tracker.pending(), 1);
    }

    #[test]
    fn test_late_release_after_clear_is_absorbed() {
        let mut device = MockDevice::default();
        device.start(DeviceMode::Video).unwrap();
        let probe = device.probe();
        let mut tracker = CouplingTracker::new();

        let (preview, recording) = coupled_pair(&mut device);
        tracker.on_acquire(&preview, &recording, false);

        device.stop().unwrap();
        tracker.clear();
        device.start(DeviceMode::Video).unwrap();

        assert!(tracker
            .on_consumer_done(&mut device, Half::Preview, preview)
            .is_ok());
        assert!(tracker
            .on_consumer_done(&mut device, Half::Recording, recording)
            .is_ok());
        assert_eq!(probe.count(|c| matches!(c, DeviceCall::StaleRelease(..))), 2);
    }

    proptest! {
        #[test]
        fn prop_slot_released_only_after_last_half(
            extra in any::<bool>(),
            order in Just(vec![Half::Preview, Half::Recording, Half::Extra]).prop_shuffle(),
        ) {
            let mut device = MockDevice::default();
            device.start(DeviceMode::Video).unwrap();
            let probe = device.probe();
            let mut tracker = CouplingTracker::new();

            let (preview, recording) = coupled_pair(&mut device);
            tracker.on_acquire(&preview, &recording, extra);
            probe.clear_calls();

            let halves: Vec<Half> = order
                .into_iter()
                .filter(|h| extra || *h != Half::Extra)
                .collect();
            let last = halves.len() - 1;

            for (i, half) in halves.into_iter().enumerate() {
                let buffer = match half {
                    Half::Preview => preview.clone(),
                    _ => recording.clone(),
                };
                let released = tracker.on_consumer_done(&mut device, half, buffer).unwrap();
                prop_assert_eq!(released, i == last);
                prop_assert_eq!(probe.outstanding(), if i == last { 0 } else { 2 });
            }

            prop_assert_eq!(
                probe.calls(),
                vec![DeviceCall::ReleaseRecording(0), DeviceCall::ReleasePreview(0)]
            );
        }
    }
}
