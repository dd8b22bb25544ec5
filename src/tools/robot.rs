//! The seven `reachy_*` tools.

use anyhow::Context;
use async_trait::async_trait;
use reachyclaw_robot_kit::HeadPose;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{failure, parse_args, positive_secs, success, Tool, ToolContext};

pub(crate) fn all_tools(ctx: Arc<ToolContext>) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(MoveHeadTool(ctx.clone())),
        Box::new(MoveAntennasTool(ctx.clone())),
        Box::new(PlayEmotionTool(ctx.clone())),
        Box::new(DanceTool(ctx.clone())),
        Box::new(CaptureImageTool(ctx.clone())),
        Box::new(SayTool(ctx.clone())),
        Box::new(StatusTool(ctx)),
    ]
}

// ── Head ───────────────────────────────────────────────────────────

pub struct MoveHeadTool(Arc<ToolContext>);

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MoveHeadArgs {
    z: f64,
    roll: f64,
    pitch: f64,
    yaw: f64,
    duration: Option<f64>,
}

#[async_trait]
impl Tool for MoveHeadTool {
    fn name(&self) -> &str {
        "reachy_move_head"
    }

    fn description(&self) -> &str {
        "Move the robot's head. Angles in degrees, z in millimetres; angles are clamped to the safety limits."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "z": { "type": "number", "description": "Vertical offset in mm", "default": 0 },
                "roll": { "type": "number", "description": "Roll in degrees", "default": 0 },
                "pitch": { "type": "number", "description": "Pitch in degrees", "default": 0 },
                "yaw": { "type": "number", "description": "Yaw in degrees", "default": 0 },
                "duration": { "type": "number", "description": "Movement duration in seconds" }
            }
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let args: MoveHeadArgs = parse_args(args)?;
        let pose = self.0.limits.clamp(HeadPose {
            roll: args.roll,
            pitch: args.pitch,
            yaw: args.yaw,
            z: args.z,
        });
        let duration = match args.duration {
            Some(secs) => positive_secs(secs, self.0.default_duration.as_secs_f64()),
            None => self.0.default_duration,
        };

        self.0.robot.goto_head_pose(pose, duration).await?;
        Ok(success(json!({
            "position": { "z": pose.z, "roll": pose.roll, "pitch": pose.pitch, "yaw": pose.yaw },
            "duration": duration.as_secs_f64(),
        })))
    }
}

// ── Antennas ───────────────────────────────────────────────────────

pub struct MoveAntennasTool(Arc<ToolContext>);

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct MoveAntennasArgs {
    left: f64,
    right: f64,
    duration: Option<f64>,
}

#[async_trait]
impl Tool for MoveAntennasTool {
    fn name(&self) -> &str {
        "reachy_move_antennas"
    }

    fn description(&self) -> &str {
        "Move the robot's antennas (angles in degrees)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "left": { "type": "number", "description": "Left antenna angle in degrees", "default": 0 },
                "right": { "type": "number", "description": "Right antenna angle in degrees", "default": 0 },
                "duration": { "type": "number", "description": "Movement duration in seconds" }
            }
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let args: MoveAntennasArgs = parse_args(args)?;
        let duration = match args.duration {
            Some(secs) => positive_secs(secs, self.0.antenna_duration.as_secs_f64()),
            None => self.0.antenna_duration,
        };

        self.0
            .robot
            .goto_antennas(args.left.to_radians(), args.right.to_radians(), duration)
            .await?;
        Ok(success(json!({
            "antennas": { "left": args.left, "right": args.right },
            "duration": duration.as_secs_f64(),
        })))
    }
}

// ── Emotion and dance ──────────────────────────────────────────────

pub struct PlayEmotionTool(Arc<ToolContext>);

#[derive(Debug, Deserialize)]
struct EmotionArgs {
    emotion: String,
}

#[async_trait]
impl Tool for PlayEmotionTool {
    fn name(&self) -> &str {
        "reachy_play_emotion"
    }

    fn description(&self) -> &str {
        "Play a recorded emotion, e.g. happy, sad, surprised, angry, thinking."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "emotion": { "type": "string", "description": "Emotion name" }
            },
            "required": ["emotion"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let EmotionArgs { emotion } = parse_args(args)?;
        if !self.0.robot.capabilities().emotions {
            return Ok(failure("This robot cannot play emotions"));
        }
        self.0.robot.play_emotion(&emotion).await?;
        Ok(success(json!({ "emotion": emotion })))
    }
}

pub struct DanceTool(Arc<ToolContext>);

#[derive(Debug, Deserialize)]
struct DanceArgs {
    dance_name: String,
}

#[async_trait]
impl Tool for DanceTool {
    fn name(&self) -> &str {
        "reachy_dance"
    }

    fn description(&self) -> &str {
        "Play a recorded dance routine."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "dance_name": { "type": "string", "description": "Dance routine name" }
            },
            "required": ["dance_name"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let DanceArgs { dance_name } = parse_args(args)?;
        if !self.0.robot.capabilities().dance {
            return Ok(failure("This robot cannot dance"));
        }
        self.0.robot.dance(&dance_name).await?;
        Ok(success(json!({ "dance": dance_name })))
    }
}

// ── Camera ─────────────────────────────────────────────────────────

pub struct CaptureImageTool(Arc<ToolContext>);

#[async_trait]
impl Tool for CaptureImageTool {
    fn name(&self) -> &str {
        "reachy_capture_image"
    }

    fn description(&self) -> &str {
        "Capture a camera frame and save it; returns the file path."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
        if !self.0.robot.capabilities().camera {
            return Ok(failure("This robot has no camera"));
        }
        let frame = self.0.robot.capture_frame().await?;

        let dir = &self.0.capture_dir;
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = dir.join(format!("capture_{timestamp}.{}", frame.extension()));
        tokio::fs::write(&path, &frame.data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!(path = %path.display(), bytes = frame.data.len(), "Captured camera frame");
        Ok(success(json!({
            "filepath": path.to_string_lossy(),
            "mime_type": frame.mime_type,
        })))
    }
}

// ── Speech ─────────────────────────────────────────────────────────

pub struct SayTool(Arc<ToolContext>);

#[derive(Debug, Deserialize)]
struct SayArgs {
    text: String,
    #[serde(default)]
    voice: Option<String>,
}

#[async_trait]
impl Tool for SayTool {
    fn name(&self) -> &str {
        "reachy_say"
    }

    fn description(&self) -> &str {
        "Speak text through the robot's speaker."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": { "type": "string", "description": "Text to speak" },
                "voice": { "type": "string", "description": "Voice name, if supported" }
            },
            "required": ["text"]
        })
    }

    async fn execute(&self, args: Value) -> anyhow::Result<Value> {
        let SayArgs { text, voice } = parse_args(args)?;
        if text.trim().is_empty() {
            return Ok(failure("Nothing to say"));
        }
        if !self.0.robot.capabilities().speech {
            return Ok(failure("This robot cannot speak"));
        }
        if let Some(voice) = voice.as_deref() {
            tracing::debug!(voice = voice, "Voice selection is not supported, using default");
        }
        self.0.robot.say(&text).await?;
        Ok(success(json!({ "text": text })))
    }
}

// ── Status ─────────────────────────────────────────────────────────

pub struct StatusTool(Arc<ToolContext>);

#[async_trait]
impl Tool for StatusTool {
    fn name(&self) -> &str {
        "reachy_status"
    }

    fn description(&self) -> &str {
        "Report the robot driver, its capabilities and the connection settings."
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _args: Value) -> anyhow::Result<Value> {
        let robot = &self.0.robot;
        Ok(success(json!({
            "connected": true,
            "driver": robot.name(),
            "simulated": robot.name() == "simulated",
            "capabilities": robot.capabilities(),
            "config": {
                "connection_mode": self.0.connection_mode.as_str(),
                "max_roll": self.0.limits.max_roll,
                "max_pitch": self.0.limits.max_pitch,
                "max_yaw": self.0.limits.max_yaw,
            },
        })))
    }
}
