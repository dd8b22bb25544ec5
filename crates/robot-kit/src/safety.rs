//! Per-axis rotation limits.

use serde::{Deserialize, Serialize};

use crate::driver::HeadPose;

/// Default maximum roll in degrees.
pub const DEFAULT_MAX_ROLL: f64 = 30.0;
/// Default maximum pitch in degrees.
pub const DEFAULT_MAX_PITCH: f64 = 30.0;
/// Default maximum yaw in degrees.
pub const DEFAULT_MAX_YAW: f64 = 45.0;

/// Symmetric rotation limits applied to every head command.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SafetyLimits {
    pub max_roll: f64,
    pub max_pitch: f64,
    pub max_yaw: f64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_roll: DEFAULT_MAX_ROLL,
            max_pitch: DEFAULT_MAX_PITCH,
            max_yaw: DEFAULT_MAX_YAW,
        }
    }
}

impl SafetyLimits {
    /// Clamp roll/pitch/yaw into `[-max, max]`. `z` is passed through.
    pub fn clamp(&self, pose: HeadPose) -> HeadPose {
        HeadPose {
            roll: clamp_axis(pose.roll, self.max_roll),
            pitch: clamp_axis(pose.pitch, self.max_pitch),
            yaw: clamp_axis(pose.yaw, self.max_yaw),
            z: pose.z,
        }
    }
}

fn clamp_axis(value: f64, max: f64) -> f64 {
    let max = max.abs();
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(-max, max)
}
