//! In-process robot that records commands instead of moving hardware.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;

use crate::driver::{Capabilities, Frame, HeadPose, RobotDriver};
use crate::error::RobotError;
use crate::safety::SafetyLimits;

/// A command observed by the simulator.
#[derive(Debug, Clone, PartialEq)]
pub enum RobotCommand {
    Wake,
    Sleep,
    HeadPose(HeadPose),
    GotoHead { pose: HeadPose, duration: Duration },
    Antennas { left: f64, right: f64 },
    GotoAntennas { left: f64, right: f64, duration: Duration },
    Emotion(String),
    Dance(String),
    CaptureFrame,
    Say(String),
}

/// Simulation-mode driver.
///
/// Used when no daemon is reachable and throughout the test suite: every
/// command is clamped, logged at debug level, and appended to a history.
pub struct SimulatedRobot {
    limits: SafetyLimits,
    capabilities: Capabilities,
    history: Mutex<Vec<RobotCommand>>,
    frame: Option<Frame>,
    audio: Mutex<VecDeque<Vec<f32>>>,
}

impl SimulatedRobot {
    pub fn new(limits: SafetyLimits) -> Self {
        Self {
            limits,
            capabilities: Capabilities {
                emotions: true,
                dance: true,
                camera: false,
                speech: true,
                microphone: false,
            },
            history: Mutex::new(Vec::new()),
            frame: None,
            audio: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Serve this frame from `capture_frame` (enables the camera capability).
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.capabilities.camera = true;
        self.frame = Some(frame);
        self
    }

    /// Queue microphone chunks (enables the microphone capability).
    pub fn with_audio(mut self, chunks: Vec<Vec<f32>>) -> Self {
        self.capabilities.microphone = true;
        self.audio = Mutex::new(chunks.into());
        self
    }

    /// Snapshot of every command received so far.
    pub fn history(&self) -> Vec<RobotCommand> {
        self.history.lock().clone()
    }

    /// Most recent command, if any.
    pub fn last_command(&self) -> Option<RobotCommand> {
        self.history.lock().last().cloned()
    }

    fn record(&self, command: RobotCommand) {
        tracing::debug!(command = ?command, "Simulated robot command");
        self.history.lock().push(command);
    }
}

#[async_trait]
impl RobotDriver for SimulatedRobot {
    fn name(&self) -> &str {
        "simulated"
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    async fn wake(&self) -> Result<(), RobotError> {
        self.record(RobotCommand::Wake);
        Ok(())
    }

    async fn sleep(&self) -> Result<(), RobotError> {
        self.record(RobotCommand::Sleep);
        Ok(())
    }

    async fn set_head_pose(&self, pose: HeadPose) -> Result<(), RobotError> {
        self.record(RobotCommand::HeadPose(self.limits.clamp(pose)));
        Ok(())
    }

    async fn goto_head_pose(&self, pose: HeadPose, duration: Duration) -> Result<(), RobotError> {
        self.record(RobotCommand::GotoHead {
            pose: self.limits.clamp(pose),
            duration,
        });
        Ok(())
    }

    async fn set_antenna_positions(&self, left: f64, right: f64) -> Result<(), RobotError> {
        self.record(RobotCommand::Antennas { left, right });
        Ok(())
    }

    async fn goto_antennas(
        &self,
        left: f64,
        right: f64,
        duration: Duration,
    ) -> Result<(), RobotError> {
        self.record(RobotCommand::GotoAntennas {
            left,
            right,
            duration,
        });
        Ok(())
    }

    async fn play_emotion(&self, name: &str) -> Result<(), RobotError> {
        if !self.capabilities.emotions {
            return Err(RobotError::Unsupported("emotions"));
        }
        self.record(RobotCommand::Emotion(name.to_string()));
        Ok(())
    }

    async fn dance(&self, name: &str) -> Result<(), RobotError> {
        if !self.capabilities.dance {
            return Err(RobotError::Unsupported("dance"));
        }
        self.record(RobotCommand::Dance(name.to_string()));
        Ok(())
    }

    async fn capture_frame(&self) -> Result<Frame, RobotError> {
        let frame = self.frame.clone().ok_or(RobotError::Unsupported("camera"))?;
        self.record(RobotCommand::CaptureFrame);
        Ok(frame)
    }

    async fn say(&self, text: &str) -> Result<(), RobotError> {
        if !self.capabilities.speech {
            return Err(RobotError::Unsupported("speech"));
        }
        tracing::info!("[robot says] {text}");
        self.record(RobotCommand::Say(text.to_string()));
        Ok(())
    }

    async fn read_audio_chunk(&self) -> Result<Option<Vec<f32>>, RobotError> {
        if !self.capabilities.microphone {
            return Err(RobotError::Unsupported("microphone"));
        }
        Ok(self.audio.lock().pop_front())
    }
}
