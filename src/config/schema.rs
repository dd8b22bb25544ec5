use reachyclaw_robot_kit::{ConnectionMode, SafetyLimits};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ── Top-level ──────────────────────────────────────────────────────

/// ReachyClaw configuration (`~/.reachyclaw/config.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Config {
    /// Path the config was loaded from (not serialized).
    #[serde(skip)]
    #[schemars(skip)]
    pub config_path: PathBuf,

    pub gateway: GatewayConfig,
    pub robot: RobotConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub audio: AudioConfig,
    pub behavior: BehaviorConfig,
}

// ── Gateway ────────────────────────────────────────────────────────

/// Request method used for chat turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
pub enum ChatMethod {
    /// `chat.send` with a per-client session key and idempotency key.
    #[default]
    #[serde(rename = "chat.send")]
    ChatSend,
    /// `agent.run` against the shared `agent:main:reachy-mini` session.
    #[serde(rename = "agent.run")]
    AgentRun,
}

impl ChatMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ChatSend => "chat.send",
            Self::AgentRun => "agent.run",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Bearer token (`OPENCLAW_TOKEN`).
    pub token: Option<String>,
    pub chat_method: ChatMethod,
    /// Bound on each handshake wait, in seconds.
    pub handshake_timeout_secs: u64,
    /// Bound on each reply or stream chunk, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 18789,
            token: None,
            chat_method: ChatMethod::default(),
            handshake_timeout_secs: 10,
            request_timeout_secs: 120,
        }
    }
}

impl GatewayConfig {
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }
}

// ── Robot ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct RobotConfig {
    /// `auto`, `localhost_only` or `network`.
    #[schemars(with = "String")]
    pub connection_mode: ConnectionMode,
    /// Explicit daemon URL, overriding the connection mode's candidates.
    pub daemon_url: Option<String>,
    /// Skip the robot entirely and use the simulator.
    pub simulate: bool,
    /// Maximum head roll in degrees.
    pub max_roll: f64,
    pub max_pitch: f64,
    pub max_yaw: f64,
    /// Default duration of head moves, in seconds.
    pub default_duration: f64,
    /// Default duration of antenna moves, in seconds.
    pub antenna_duration: f64,
    /// Where captured camera frames are written.
    pub capture_dir: String,
}

impl Default for RobotConfig {
    fn default() -> Self {
        let limits = SafetyLimits::default();
        Self {
            connection_mode: ConnectionMode::Auto,
            daemon_url: None,
            simulate: false,
            max_roll: limits.max_roll,
            max_pitch: limits.max_pitch,
            max_yaw: limits.max_yaw,
            default_duration: 1.0,
            antenna_duration: 0.5,
            capture_dir: "~/.reachyclaw/captures".into(),
        }
    }
}

impl RobotConfig {
    pub fn safety_limits(&self) -> SafetyLimits {
        SafetyLimits {
            max_roll: self.max_roll,
            max_pitch: self.max_pitch,
            max_yaw: self.max_yaw,
        }
    }
}

// ── Speech-to-text ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum SttBackend {
    /// Local `whisper` command-line program.
    #[default]
    Whisper,
    /// Local `faster-whisper` command-line program.
    FasterWhisper,
    /// OpenAI transcription API.
    Openai,
}

impl SttBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whisper => "whisper",
            Self::FasterWhisper => "faster-whisper",
            Self::Openai => "openai",
        }
    }
}

impl std::str::FromStr for SttBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "whisper" => Ok(Self::Whisper),
            "faster-whisper" | "faster_whisper" => Ok(Self::FasterWhisper),
            "openai" => Ok(Self::Openai),
            other => Err(format!(
                "Unknown STT backend '{other}'. Supported values: whisper, faster-whisper, openai"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct SttConfig {
    pub backend: SttBackend,
    /// Whisper model size (`tiny`, `base`, `small`, `medium`, `large`).
    pub whisper_model: String,
    /// Program run for the `whisper` backend.
    pub whisper_command: String,
    /// Program run for the `faster-whisper` backend.
    pub faster_whisper_command: String,
    /// Spoken language hint (ISO code); autodetected when unset.
    pub language: Option<String>,
    /// OpenAI API key (`OPENAI_API_KEY`).
    pub openai_api_key: Option<String>,
    pub openai_model: String,
    pub openai_base_url: String,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            backend: SttBackend::Whisper,
            whisper_model: "base".into(),
            whisper_command: "whisper".into(),
            faster_whisper_command: "whisper-ctranslate2".into(),
            language: None,
            openai_api_key: None,
            openai_model: "whisper-1".into(),
            openai_base_url: "https://api.openai.com/v1".into(),
        }
    }
}

// ── Text-to-speech ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TtsConfig {
    /// Prefer the robot's own speaker when it supports speech.
    pub use_robot: bool,
    /// Fallback program that speaks its last argument. Empty disables it.
    pub command: String,
    pub args: Vec<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            use_robot: true,
            command: "espeak-ng".into(),
            args: Vec::new(),
        }
    }
}

// ── Audio capture ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AudioSource {
    /// Robot microphone when available, otherwise the capture command.
    #[default]
    Auto,
    Robot,
    /// External program writing raw S16LE mono to stdout.
    Command,
    /// Typed text on stdin (no audio).
    Console,
}

impl std::str::FromStr for AudioSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "robot" => Ok(Self::Robot),
            "command" => Ok(Self::Command),
            "console" => Ok(Self::Console),
            other => Err(format!(
                "Unknown audio source '{other}'. Supported values: auto, robot, command, console"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AudioConfig {
    pub source: AudioSource,
    pub sample_rate: u32,
    /// Mean absolute amplitude above which a frame counts as speech.
    pub silence_threshold: f32,
    /// Seconds of silence that end an utterance.
    pub silence_duration: f32,
    /// Hard cap on one utterance, in seconds.
    pub max_recording_duration: f32,
    /// Capture program for the `command` source.
    pub capture_command: String,
    pub capture_args: Vec<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            source: AudioSource::Auto,
            sample_rate: 16_000,
            silence_threshold: 0.01,
            silence_duration: 1.5,
            max_recording_duration: 30.0,
            capture_command: "arecord".into(),
            capture_args: ["-q", "-t", "raw", "-f", "S16_LE", "-c", "1", "-r", "16000"]
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
        }
    }
}

// ── Behavior ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BehaviorConfig {
    /// Only respond after this phrase is heard (case-insensitive).
    pub wake_word: Option<String>,
    pub play_emotions: bool,
    pub idle_animations: bool,
    /// Echo transcripts locally instead of calling the gateway.
    pub standalone_mode: bool,
    /// Stream replies chunk by chunk instead of waiting for the whole text.
    pub stream_replies: bool,
    pub cache_dir: String,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            wake_word: None,
            play_emotions: true,
            idle_animations: true,
            standalone_mode: false,
            stream_replies: false,
            cache_dir: "~/.reachyclaw/cache".into(),
        }
    }
}
