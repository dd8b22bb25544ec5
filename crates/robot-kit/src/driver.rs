//! Driver trait and shared robot types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::RobotError;

// ── Head pose ─────────────────────────────────────────────────────

/// Head orientation in degrees plus vertical offset in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct HeadPose {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    pub z: f64,
}

impl HeadPose {
    /// Neutral pose: looking straight ahead.
    pub const NEUTRAL: HeadPose = HeadPose {
        roll: 0.0,
        pitch: 0.0,
        yaw: 0.0,
        z: 0.0,
    };

    pub fn pitch(pitch: f64) -> Self {
        Self {
            pitch,
            ..Self::NEUTRAL
        }
    }

    pub fn roll_pitch(roll: f64, pitch: f64) -> Self {
        Self {
            roll,
            pitch,
            ..Self::NEUTRAL
        }
    }
}

// ── Capabilities ──────────────────────────────────────────────────

/// Optional features a driver supports, resolved once at connection time.
///
/// Head and antenna motion are mandatory for every driver; everything
/// listed here may be missing depending on the robot model and SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct Capabilities {
    /// Recorded emotion moves (`play_emotion`).
    pub emotions: bool,
    /// Recorded dance routines (`dance`).
    pub dance: bool,
    /// Camera frame capture.
    pub camera: bool,
    /// Built-in text-to-speech / speaker playback.
    pub speech: bool,
    /// Microphone sampling (`read_audio_chunk`).
    pub microphone: bool,
}

// ── Connection mode ───────────────────────────────────────────────

/// How to locate the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Try the local daemon first, then the network hostname.
    #[default]
    Auto,
    /// Only the daemon on this machine.
    LocalhostOnly,
    /// Only the robot on the local network.
    Network,
}

impl ConnectionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::LocalhostOnly => "localhost_only",
            Self::Network => "network",
        }
    }
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ConnectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "localhost_only" | "localhost-only" | "localhost" => Ok(Self::LocalhostOnly),
            "network" => Ok(Self::Network),
            other => Err(format!(
                "Unknown connection mode '{other}'. Supported values: auto, localhost_only, network"
            )),
        }
    }
}

// ── Camera frame ──────────────────────────────────────────────────

/// Encoded camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl Frame {
    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/png" => "png",
            _ => "jpg",
        }
    }

    pub fn to_base64(&self) -> String {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode(&self.data)
    }
}

// ── Driver trait ──────────────────────────────────────────────────

/// Narrow command interface the rest of ReachyClaw uses to move the robot.
///
/// Optional operations default to [`RobotError::Unsupported`]; check
/// [`RobotDriver::capabilities`] before relying on them.
#[async_trait]
pub trait RobotDriver: Send + Sync {
    /// Short driver name for logs and status reports.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Enable motors and play the wake-up move.
    async fn wake(&self) -> Result<(), RobotError>;

    /// Return to the rest position and release motors.
    async fn sleep(&self) -> Result<(), RobotError>;

    /// Set the head target immediately (no interpolation).
    async fn set_head_pose(&self, pose: HeadPose) -> Result<(), RobotError>;

    /// Move the head with interpolation over `duration`.
    async fn goto_head_pose(&self, pose: HeadPose, duration: Duration) -> Result<(), RobotError>;

    /// Set antenna targets in radians.
    async fn set_antenna_positions(&self, left: f64, right: f64) -> Result<(), RobotError>;

    /// Move antennas with interpolation over `duration`.
    async fn goto_antennas(&self, left: f64, right: f64, duration: Duration)
        -> Result<(), RobotError>;

    async fn play_emotion(&self, _name: &str) -> Result<(), RobotError> {
        Err(RobotError::Unsupported("emotions"))
    }

    async fn dance(&self, _name: &str) -> Result<(), RobotError> {
        Err(RobotError::Unsupported("dance"))
    }

    async fn capture_frame(&self) -> Result<Frame, RobotError> {
        Err(RobotError::Unsupported("camera"))
    }

    async fn say(&self, _text: &str) -> Result<(), RobotError> {
        Err(RobotError::Unsupported("speech"))
    }

    /// Next microphone chunk as normalized f32 samples, `None` when no data is ready.
    async fn read_audio_chunk(&self) -> Result<Option<Vec<f32>>, RobotError> {
        Err(RobotError::Unsupported("microphone"))
    }
}
