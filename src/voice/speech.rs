//! Speech output.

use anyhow::{Context, Result};
use reachyclaw_robot_kit::{animation, RobotDriver};
use std::process::Stdio;
use std::sync::Arc;

use super::RunningAnimation;
use crate::config::TtsConfig;

/// Drop markdown emphasis and code markers that would be read aloud.
pub fn clean_for_speech(text: &str) -> String {
    text.replace("**", "").replace(['*', '`'], "").trim().to_string()
}

/// How an utterance was delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechOutput {
    Robot,
    Command,
    /// No speech path worked; the text was only logged.
    Logged,
    /// Nothing left to say after cleaning.
    Skipped,
}

pub struct Speaker {
    robot: Arc<dyn RobotDriver>,
    tts: TtsConfig,
    animate: bool,
}

impl Speaker {
    pub fn new(robot: Arc<dyn RobotDriver>, tts: TtsConfig) -> Self {
        Self {
            robot,
            tts,
            animate: true,
        }
    }

    /// Disable the head bob while speaking.
    pub fn without_animation(mut self) -> Self {
        self.animate = false;
        self
    }

    /// Speak `text`, bobbing the head for the duration.
    ///
    /// Tries the robot speaker, then the TTS command, then logs the text.
    /// Never fails: a silent robot must not end the conversation.
    pub async fn speak(&self, text: &str) -> SpeechOutput {
        let clean = clean_for_speech(text);
        if clean.is_empty() {
            return SpeechOutput::Skipped;
        }

        let bob = self.animate.then(|| {
            let robot = self.robot.clone();
            RunningAnimation::spawn(move |token| animation::head_bob(robot, token))
        });

        let output = self.deliver(&clean).await;

        if let Some(bob) = bob {
            bob.stop().await;
        }
        output
    }

    async fn deliver(&self, text: &str) -> SpeechOutput {
        if self.tts.use_robot && self.robot.capabilities().speech {
            match self.robot.say(text).await {
                Ok(()) => return SpeechOutput::Robot,
                Err(e) => tracing::warn!(error = %e, "Robot speech failed, falling back"),
            }
        }

        if !self.tts.command.trim().is_empty() {
            match self.run_command(text).await {
                Ok(()) => return SpeechOutput::Command,
                Err(e) => tracing::error!(error = %e, "TTS failed"),
            }
        }

        tracing::info!("[TTS] {text}");
        SpeechOutput::Logged
    }

    async fn run_command(&self, text: &str) -> Result<()> {
        let status = tokio::process::Command::new(&self.tts.command)
            .args(&self.tts.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .with_context(|| format!("Failed to run '{}'", self.tts.command))?;
        if !status.success() {
            anyhow::bail!("'{}' exited with {status}", self.tts.command);
        }
        Ok(())
    }
}

// ── Streaming ──────────────────────────────────────────────────────

/// Splits streamed reply chunks into sentences that can be spoken early.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    pending: String,
}

impl SentenceBuffer {
    /// Append a chunk and take every sentence it completed.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);
        let mut sentences = Vec::new();
        while let Some(end) = self.sentence_end() {
            let rest = self.pending.split_off(end);
            let sentence = std::mem::replace(&mut self.pending, rest);
            let sentence = sentence.trim();
            if !sentence.is_empty() {
                sentences.push(sentence.to_string());
            }
        }
        sentences
    }

    /// Whatever is left once the stream has ended.
    pub fn finish(self) -> Option<String> {
        let rest = self.pending.trim();
        (!rest.is_empty()).then(|| rest.to_string())
    }

    /// Byte index just past the first terminator followed by whitespace.
    fn sentence_end(&self) -> Option<usize> {
        let mut chars = self.pending.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '\n' {
                return Some(i + 1);
            }
            if matches!(c, '.' | '!' | '?') {
                if let Some(&(j, next)) = chars.peek() {
                    if next.is_whitespace() {
                        return Some(j);
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reachyclaw_robot_kit::{Capabilities, HeadPose, RobotCommand, SafetyLimits, SimulatedRobot};
    use std::time::Duration;

    fn robot(speech: bool) -> Arc<SimulatedRobot> {
        Arc::new(SimulatedRobot::new(SafetyLimits::default()).with_capabilities(Capabilities {
            speech,
            ..Capabilities::default()
        }))
    }

    fn silent_tts() -> TtsConfig {
        TtsConfig {
            use_robot: true,
            command: String::new(),
            args: Vec::new(),
        }
    }

    #[test]
    fn markdown_is_removed() {
        assert_eq!(clean_for_speech("**Bold** and *soft* `code`"), "Bold and soft code");
        assert_eq!(clean_for_speech(" ** "), "");
    }

    #[tokio::test]
    async fn robot_speaker_is_preferred_and_head_bobs() {
        let robot = robot(true);
        let speaker = Speaker::new(robot.clone(), silent_tts());

        assert_eq!(speaker.speak("Hello **there**").await, SpeechOutput::Robot);
        let history = robot.history();
        assert!(history.contains(&RobotCommand::Say("Hello there".into())));
        // head bob always returns to neutral
        assert!(matches!(history.last(), Some(RobotCommand::HeadPose(p)) if p.pitch == 0.0));
    }

    #[tokio::test]
    async fn falls_back_to_log_without_speech() {
        let robot = robot(false);
        let speaker = Speaker::new(robot.clone(), silent_tts()).without_animation();
        assert_eq!(speaker.speak("hi").await, SpeechOutput::Logged);
        assert!(robot.history().is_empty());
    }

    #[tokio::test]
    async fn empty_text_is_skipped() {
        let speaker = Speaker::new(robot(true), silent_tts());
        assert_eq!(speaker.speak("``").await, SpeechOutput::Skipped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn tts_command_receives_text() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("spoken.txt");
        let tts = TtsConfig {
            use_robot: false,
            command: "sh".into(),
            args: vec!["-c".into(), format!("printf '%s' \"$0\" > {}", out.display())],
        };
        let speaker = Speaker::new(robot(true), tts).without_animation();

        assert_eq!(speaker.speak("good *morning*").await, SpeechOutput::Command);
        assert_eq!(std::fs::read_to_string(&out).unwrap(), "good morning");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_falls_back_to_log() {
        let tts = TtsConfig {
            use_robot: false,
            command: "false".into(),
            args: Vec::new(),
        };
        let speaker = Speaker::new(robot(false), tts).without_animation();
        assert_eq!(speaker.speak("hi").await, SpeechOutput::Logged);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn interrupted_speech_leaves_head_neutral() {
        let robot = robot(true);
        let tts = TtsConfig {
            use_robot: false,
            command: "sleep".into(),
            args: Vec::new(),
        };
        let speaker = Speaker::new(robot.clone(), tts);

        let interrupted = tokio::time::timeout(Duration::from_millis(300), speaker.speak("5")).await;
        assert!(interrupted.is_err());

        tokio::time::sleep(Duration::from_millis(100)).await;
        let settled = robot.history();
        assert_eq!(settled.last(), Some(&RobotCommand::HeadPose(HeadPose::NEUTRAL)));
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(robot.history().len(), settled.len(), "head kept moving after speech was dropped");
    }

    #[test]
    fn sentences_are_split_as_chunks_arrive() {
        let mut buf = SentenceBuffer::default();
        assert!(buf.push("Hello the").is_empty());
        assert_eq!(buf.push("re. How are"), vec!["Hello there."]);
        assert_eq!(buf.push(" you? Fine!\nVersion 1.5 is"), vec!["How are you?", "Fine!"]);
        assert!(buf.push(" out").is_empty());
        assert_eq!(buf.finish().as_deref(), Some("Version 1.5 is out"));
    }

    #[test]
    fn empty_buffer_finishes_with_nothing() {
        let mut buf = SentenceBuffer::default();
        assert!(buf.push("  \n").is_empty());
        assert_eq!(buf.finish(), None);
    }
}
