//! Burst frame timeline

use serde::{Deserialize, Serialize};

/// How many raw device frames to discard around the real frames of a burst.
///
/// With bracketing, a value written on raw frame `n` shows up on frame
/// `n + latency`. Applying the first step during the warm-up and one step per
/// real frame keeps exactly one new value landing on each real frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelinePlan {
    /// Frames discarded before the first real frame
    pub warmup: u32,
    /// Warm-up frames that also apply a bracket step
    pub warmup_apply: u32,
    /// Frames discarded between two real frames
    pub inter_frame_skip: u32,
}

impl TimelinePlan {
    /// Plan a burst with `burst_skip` requested skipped frames and a sensor
    /// latency of `latency` frames
    pub fn new(burst_skip: u32, latency: u32, bracketing: bool) -> Self {
        if !bracketing {
            return Self {
                warmup: 0,
                warmup_apply: 0,
                inter_frame_skip: burst_skip,
            };
        }

        // Without latency the first real frame applies its own value
        let warmup = burst_skip.max(latency);
        Self {
            warmup,
            warmup_apply: if latency > 0 { 1 } else { 0 },
            inter_frame_skip: burst_skip.max(latency.saturating_sub(1)),
        }
    }

    /// Raw device frame number of the `n`th real frame (0-based)
    pub fn raw_frame(&self, n: u32) -> u64 {
        self.warmup as u64 + n as u64 * (self.inter_frame_skip as u64 + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_without_bracketing() {
        let plan = TimelinePlan::new(3, 2, false);
        assert_eq!(plan.warmup, 0);
        assert_eq!(plan.warmup_apply, 0);
        assert_eq!(plan.inter_frame_skip, 3);
        assert_eq!(plan.raw_frame(2), 8);
    }

    #[test]
    fn test_plan_with_bracketing() {
        let plan = TimelinePlan::new(0, 2, true);
        assert_eq!((plan.warmup, plan.warmup_apply, plan.inter_frame_skip), (2, 1, 1));
        let frames: Vec<u64> = (0..5).map(|n| plan.raw_frame(n)).collect();
        assert_eq!(frames, vec![2, 4, 6, 8, 10]);

        let plan = TimelinePlan::new(3, 2, true);
        assert_eq!((plan.warmup, plan.warmup_apply, plan.inter_frame_skip), (3, 1, 3));
        assert_eq!(plan.raw_frame(0), 3);
        assert_eq!(plan.raw_frame(1), 7);
    }

    #[test]
    fn test_zero_latency_applies_on_real_frames() {
        let plan = TimelinePlan::new(0, 0, true);
        assert_eq!((plan.warmup, plan.warmup_apply, plan.inter_frame_skip), (0, 0, 0));

        let plan = TimelinePlan::new(2, 0, true);
        assert_eq!((plan.warmup, plan.warmup_apply, plan.inter_frame_skip), (2, 0, 2));
    }
}
