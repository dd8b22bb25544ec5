//! Utterance capture: energy-based voice activity detection over 1024-sample
//! frames, plus the microphone and console input sources.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reachyclaw_robot_kit::RobotDriver;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

use crate::config::{AudioConfig, AudioSource};

/// Samples per analysis frame.
pub const FRAME_SIZE: usize = 1024;

/// Frames averaged for the periodic energy debug log (about one second).
const ENERGY_LOG_FRAMES: usize = 16;

/// Poll interval when the robot microphone has no data ready.
const MIC_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Mean absolute amplitude of a frame.
pub fn frame_energy(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let len = frame.len() as f32;
    frame.iter().map(|s| s.abs()).sum::<f32>() / len
}

// ── Voice activity detection ───────────────────────────────────────

/// Thresholds for one utterance, derived from [`AudioConfig`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadSettings {
    pub threshold: f32,
    /// Consecutive silent frames that end an utterance.
    pub silence_frames: usize,
    /// Cap on recorded frames.
    pub max_frames: usize,
}

impl VadSettings {
    pub fn from_config(config: &AudioConfig) -> Self {
        Self {
            threshold: config.silence_threshold,
            silence_frames: seconds_to_frames(config.silence_duration, config.sample_rate),
            max_frames: seconds_to_frames(config.max_recording_duration, config.sample_rate),
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn seconds_to_frames(seconds: f32, sample_rate: u32) -> usize {
    let frames = f64::from(seconds) * f64::from(sample_rate) / FRAME_SIZE as f64;
    (frames.max(1.0)) as usize
}

/// Result of feeding one frame to the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderState {
    /// No speech yet; the frame was dropped.
    Waiting,
    Recording,
    /// Enough trailing silence or the length cap was reached.
    Complete,
}

/// Accumulates frames from the first loud one until enough silence follows.
#[derive(Debug)]
pub struct UtteranceRecorder {
    settings: VadSettings,
    samples: Vec<f32>,
    frames: usize,
    silent_frames: usize,
    speech_detected: bool,
    recent_energy: Vec<f32>,
}

impl UtteranceRecorder {
    pub fn new(settings: VadSettings) -> Self {
        Self {
            settings,
            samples: Vec::new(),
            frames: 0,
            silent_frames: 0,
            speech_detected: false,
            recent_energy: Vec::with_capacity(ENERGY_LOG_FRAMES),
        }
    }

    pub fn push(&mut self, frame: &[f32]) -> RecorderState {
        let energy = frame_energy(frame);
        self.log_energy(energy);

        if energy > self.settings.threshold {
            if !self.speech_detected {
                tracing::info!("🗣️ Speech detected");
            }
            self.speech_detected = true;
            self.silent_frames = 0;
        } else if self.speech_detected {
            self.silent_frames += 1;
        } else {
            return RecorderState::Waiting;
        }

        self.samples.extend_from_slice(frame);
        self.frames += 1;

        if self.silent_frames >= self.settings.silence_frames {
            tracing::info!("⏹️ End of speech detected");
            RecorderState::Complete
        } else if self.frames >= self.settings.max_frames {
            tracing::info!(frames = self.frames, "Maximum recording length reached");
            RecorderState::Complete
        } else {
            RecorderState::Recording
        }
    }

    pub fn speech_detected(&self) -> bool {
        self.speech_detected
    }

    /// The recorded utterance, or `None` if nobody spoke.
    pub fn finish(self) -> Option<Vec<f32>> {
        (self.speech_detected && !self.samples.is_empty()).then_some(self.samples)
    }

    fn log_energy(&mut self, energy: f32) {
        self.recent_energy.push(energy);
        if self.recent_energy.len() == ENERGY_LOG_FRAMES {
            #[allow(clippy::cast_precision_loss)]
            let avg = self.recent_energy.iter().sum::<f32>() / ENERGY_LOG_FRAMES as f32;
            tracing::debug!(energy = avg, threshold = self.settings.threshold, "Audio energy");
            self.recent_energy.clear();
        }
    }
}

// ── Frame readers ──────────────────────────────────────────────────

/// A stream of mono f32 audio frames.
#[async_trait]
pub trait FrameReader: Send {
    /// Next frame, or `None` once the source has ended.
    async fn read_frame(&mut self) -> Result<Option<Vec<f32>>>;
}

/// The robot's own microphone.
pub struct RobotMicrophone {
    robot: Arc<dyn RobotDriver>,
}

impl RobotMicrophone {
    pub fn new(robot: Arc<dyn RobotDriver>) -> Self {
        Self { robot }
    }
}

#[async_trait]
impl FrameReader for RobotMicrophone {
    async fn read_frame(&mut self) -> Result<Option<Vec<f32>>> {
        loop {
            match self.robot.read_audio_chunk().await? {
                Some(chunk) if !chunk.is_empty() => return Ok(Some(chunk)),
                _ => tokio::time::sleep(MIC_POLL_INTERVAL).await,
            }
        }
    }
}

/// Raw signed 16-bit little-endian mono PCM from any byte stream.
pub struct PcmReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> PcmReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: vec![0; FRAME_SIZE * 2],
        }
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> FrameReader for PcmReader<R> {
    async fn read_frame(&mut self) -> Result<Option<Vec<f32>>> {
        let mut filled = 0;
        while filled < self.buf.len() {
            let n = self
                .inner
                .read(&mut self.buf[filled..])
                .await
                .context("Failed to read audio")?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled < 2 {
            return Ok(None);
        }
        let frame = self.buf[..filled - filled % 2]
            .chunks_exact(2)
            .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
            .collect();
        Ok(Some(frame))
    }
}

/// Microphone captured by an external program (`arecord` by default)
/// writing raw PCM to stdout. The program is killed when dropped.
pub struct CommandMicrophone {
    _child: tokio::process::Child,
    reader: PcmReader<tokio::process::ChildStdout>,
}

impl CommandMicrophone {
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let mut child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start audio capture program '{program}'"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("Audio capture program has no stdout"))?;
        tracing::info!(program = program, "Audio capture started");
        Ok(Self {
            _child: child,
            reader: PcmReader::new(stdout),
        })
    }
}

#[async_trait]
impl FrameReader for CommandMicrophone {
    async fn read_frame(&mut self) -> Result<Option<Vec<f32>>> {
        self.reader.read_frame().await
    }
}

// ── Listeners ──────────────────────────────────────────────────────

/// What one listening step produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Heard {
    /// An utterance to transcribe.
    Audio(Vec<f32>),
    /// Text typed on the console.
    Text(String),
}

/// Produces one user utterance per call.
#[async_trait]
pub trait Listener: Send {
    /// Wait for the next utterance. `None` means the input has ended.
    async fn listen(&mut self) -> Result<Option<Heard>>;

    /// Whether the utterance needs transcribing.
    fn is_audio(&self) -> bool {
        true
    }
}

/// Microphone frames cut into utterances by [`UtteranceRecorder`].
pub struct VoiceListener {
    reader: Box<dyn FrameReader>,
    settings: VadSettings,
}

impl VoiceListener {
    pub fn new(reader: Box<dyn FrameReader>, settings: VadSettings) -> Self {
        Self { reader, settings }
    }
}

#[async_trait]
impl Listener for VoiceListener {
    async fn listen(&mut self) -> Result<Option<Heard>> {
        let mut recorder = UtteranceRecorder::new(self.settings);
        loop {
            let Some(frame) = self.reader.read_frame().await? else {
                // Source ended; keep whatever was said before it did.
                return Ok(recorder.finish().map(Heard::Audio));
            };
            if recorder.push(&frame) == RecorderState::Complete {
                break;
            }
        }
        Ok(recorder.finish().map(Heard::Audio))
    }
}

/// Typed input, one line per utterance (demo mode without a microphone).
pub struct ConsoleListener<R> {
    lines: tokio::io::Lines<R>,
}

impl ConsoleListener<BufReader<tokio::io::Stdin>> {
    pub fn stdin() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()))
    }
}

impl<R: AsyncBufRead + Unpin + Send> ConsoleListener<R> {
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> Listener for ConsoleListener<R> {
    async fn listen(&mut self) -> Result<Option<Heard>> {
        loop {
            match self.lines.next_line().await.context("Failed to read console input")? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return Ok(Some(Heard::Text(line.trim().to_string()))),
                None => return Ok(None),
            }
        }
    }

    fn is_audio(&self) -> bool {
        false
    }
}

/// Open the configured input source.
pub fn open_listener(config: &AudioConfig, robot: &Arc<dyn RobotDriver>) -> Result<Box<dyn Listener>> {
    let settings = VadSettings::from_config(config);
    let has_mic = robot.capabilities().microphone;

    let source = match config.source {
        AudioSource::Auto if has_mic => AudioSource::Robot,
        AudioSource::Auto => AudioSource::Command,
        AudioSource::Robot if !has_mic => {
            anyhow::bail!("audio.source = \"robot\" but the {} robot has no microphone", robot.name())
        }
        other => other,
    };

    let listener: Box<dyn Listener> = match source {
        AudioSource::Robot => {
            tracing::info!("Listening through the robot microphone");
            Box::new(VoiceListener::new(Box::new(RobotMicrophone::new(robot.clone())), settings))
        }
        AudioSource::Command => {
            let mic = CommandMicrophone::spawn(&config.capture_command, &config.capture_args)?;
            Box::new(VoiceListener::new(Box::new(mic), settings))
        }
        AudioSource::Console | AudioSource::Auto => {
            tracing::info!("Reading utterances from the console, one per line");
            Box::new(ConsoleListener::stdin())
        }
    };
    Ok(listener)
}

// ── Wake word ──────────────────────────────────────────────────────

/// Case-insensitive wake phrase matched against transcripts.
#[derive(Debug, Clone)]
pub struct WakeWordDetector {
    wake_word: String,
}

impl WakeWordDetector {
    pub fn new(wake_word: &str) -> Self {
        Self {
            wake_word: wake_word.trim().to_lowercase(),
        }
    }

    pub fn wake_word(&self) -> &str {
        &self.wake_word
    }

    pub fn detect(&self, text: &str) -> bool {
        !self.wake_word.is_empty() && text.to_lowercase().contains(&self.wake_word)
    }

    /// Lowercase `text` and drop the wake phrase and any separator after it.
    pub fn strip(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        let stripped = if self.wake_word.is_empty() {
            lowered
        } else {
            lowered.replace(&self.wake_word, "")
        };
        stripped
            .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | '.' | '!' | '?'))
            .trim_end()
            .to_string()
    }
}
