//! Conversation loop: listen, transcribe, ask the gateway, speak.

use anyhow::Result;
use reachyclaw_robot_kit::{animation, RobotDriver};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::audio::{Heard, Listener, WakeWordDetector};
use super::speech::{SentenceBuffer, Speaker};
use super::RunningAnimation;
use crate::config::{BehaviorConfig, Config};
use crate::gateway::{GatewayClient, GatewayError};
use crate::stt::Transcriber;

/// Pause after a failed listen so a broken source does not spin.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Settle time after waking the motors.
const WAKE_SETTLE: Duration = Duration::from_millis(500);

// ── State ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InterfaceState {
    Idle,
    Listening,
    Processing,
    Speaking,
    Error,
}

impl InterfaceState {
    /// Nothing is being processed or said; idle gestures may run.
    pub fn allows_fidget(self) -> bool {
        matches!(self, Self::Idle | Self::Listening)
    }
}

/// Counters for one run of the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConversationStats {
    /// Utterances heard (audio or typed).
    pub utterances: u64,
    /// Utterances that produced text.
    pub transcripts: u64,
    /// Replies spoken.
    pub replies: u64,
    pub errors: u64,
}

/// Result of one conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Replied,
    /// Nothing to answer: silence, empty transcript, or no wake word yet.
    Ignored,
    Failed,
    /// The input source has ended.
    InputClosed,
}

// ── Interface ──────────────────────────────────────────────────────

pub struct VoiceInterface {
    behavior: BehaviorConfig,
    sample_rate: u32,
    robot: Arc<dyn RobotDriver>,
    gateway: Option<Arc<GatewayClient>>,
    stt: Arc<dyn Transcriber>,
    listener: Box<dyn Listener>,
    speaker: Speaker,
    wake: Option<WakeWordDetector>,
    conversation_active: bool,
    state: watch::Sender<InterfaceState>,
    stats: ConversationStats,
}

impl VoiceInterface {
    pub fn new(
        config: &Config,
        robot: Arc<dyn RobotDriver>,
        stt: Arc<dyn Transcriber>,
        listener: Box<dyn Listener>,
    ) -> Self {
        let wake = config
            .behavior
            .wake_word
            .as_deref()
            .filter(|w| !w.trim().is_empty())
            .map(WakeWordDetector::new);
        let (state, _) = watch::channel(InterfaceState::Idle);
        Self {
            behavior: config.behavior.clone(),
            sample_rate: config.audio.sample_rate,
            speaker: Speaker::new(robot.clone(), config.tts.clone()),
            robot,
            gateway: None,
            stt,
            listener,
            wake,
            conversation_active: false,
            state,
            stats: ConversationStats::default(),
        }
    }

    /// Send transcripts to this gateway (ignored in standalone mode).
    pub fn with_gateway(mut self, gateway: Arc<GatewayClient>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    pub fn state(&self) -> InterfaceState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<InterfaceState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> &ConversationStats {
        &self.stats
    }

    fn set_state(&self, next: InterfaceState) {
        self.state.send_if_modified(|s| {
            if *s == next {
                return false;
            }
            tracing::debug!(from = ?*s, to = ?next, "Interface state");
            *s = next;
            true
        });
    }

    /// Run turns until `shutdown` fires or the input ends, then stop.
    pub async fn run(&mut self, shutdown: CancellationToken) -> Result<ConversationStats> {
        if !self.behavior.standalone_mode && self.gateway.is_none() {
            anyhow::bail!("No gateway client configured and standalone mode is off");
        }

        self.start().await;

        let idle = self.behavior.idle_animations.then(|| {
            let robot = self.robot.clone();
            let state = self.state.subscribe();
            RunningAnimation::spawn(move |token| {
                animation::idle_fidget(robot, token, move || state.borrow().allows_fidget())
            })
        });

        tracing::info!("Entering conversation loop");
        loop {
            let outcome = tokio::select! {
                () = shutdown.cancelled() => {
                    tracing::info!("Conversation loop cancelled");
                    break;
                }
                outcome = self.turn() => outcome,
            };
            if outcome == TurnOutcome::InputClosed {
                tracing::info!("Input ended");
                break;
            }
        }

        if let Some(idle) = idle {
            idle.stop().await;
        }
        self.stop().await;
        Ok(self.stats.clone())
    }

    async fn start(&self) {
        tracing::info!(driver = self.robot.name(), "🦞 Waking up Reachy");
        match self.robot.wake().await {
            Ok(()) => tokio::time::sleep(WAKE_SETTLE).await,
            Err(e) => tracing::warn!(error = %e, "Robot wake-up failed"),
        }

        tracing::info!("✨ Reachy Mini interface started");
        match &self.wake {
            Some(wake) => tracing::info!("Say \"{}\" to activate", wake.wake_word()),
            None => tracing::info!("Speak anytime, always listening"),
        }
        animation::claw_snap(self.robot.as_ref()).await;
    }

    async fn stop(&mut self) {
        tracing::info!("Stopping Reachy Mini interface");
        if let Some(gateway) = &self.gateway {
            gateway.disconnect().await;
        }
        animation::reset_head(self.robot.as_ref()).await;
        animation::reset_antennas(self.robot.as_ref()).await;
        if let Err(e) = self.robot.sleep().await {
            tracing::debug!(error = %e, "Robot sleep failed");
        }
        self.set_state(InterfaceState::Idle);
        tracing::info!(
            utterances = self.stats.utterances,
            replies = self.stats.replies,
            errors = self.stats.errors,
            "Reachy Mini interface stopped"
        );
    }

    /// One full turn. Failures are logged and end the turn, never the loop.
    pub async fn turn(&mut self) -> TurnOutcome {
        self.set_state(InterfaceState::Listening);
        if self.listener.is_audio() {
            tracing::info!("🎤 Listening... (speak now)");
        }
        let heard = match self.listener.listen().await {
            Ok(Some(heard)) => heard,
            Ok(None) => return TurnOutcome::InputClosed,
            Err(e) => {
                tracing::error!(error = %e, "Error capturing audio");
                self.fail();
                tokio::time::sleep(RETRY_DELAY).await;
                return TurnOutcome::Failed;
            }
        };
        self.stats.utterances += 1;

        self.set_state(InterfaceState::Processing);
        let text = match heard {
            Heard::Audio(samples) => {
                tracing::info!("🔄 Processing speech...");
                match self.stt.transcribe(&samples, self.sample_rate).await {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(backend = self.stt.name(), error = %e, "Transcription failed");
                        self.fail();
                        return TurnOutcome::Failed;
                    }
                }
            }
            Heard::Text(text) => text,
        };
        let text = text.trim();
        if text.is_empty() {
            tracing::info!("(no speech detected)");
            self.set_state(InterfaceState::Idle);
            return TurnOutcome::Ignored;
        }
        self.stats.transcripts += 1;
        tracing::info!("📝 You said: \"{text}\"");

        let Some(text) = self.apply_wake_word(text).await else {
            self.set_state(InterfaceState::Idle);
            return TurnOutcome::Ignored;
        };

        let replied = if self.behavior.standalone_mode {
            let reply = format!("I heard you say: {text}");
            self.say(&reply).await;
            Ok(())
        } else {
            self.ask_gateway(&text).await
        };

        match replied {
            Ok(()) => {
                self.stats.replies += 1;
                self.set_state(InterfaceState::Idle);
                tracing::info!("✅ Ready for next turn");
                TurnOutcome::Replied
            }
            Err(e) => {
                tracing::error!(error = %e, "Gateway error");
                if self.behavior.play_emotions {
                    self.play_emotion("sad").await;
                }
                self.fail();
                TurnOutcome::Failed
            }
        }
    }

    fn fail(&mut self) {
        self.stats.errors += 1;
        self.set_state(InterfaceState::Error);
    }

    /// Gate on the wake word until it has been heard once.
    async fn apply_wake_word(&mut self, text: &str) -> Option<String> {
        let stripped = match &self.wake {
            Some(wake) if !self.conversation_active => {
                if !wake.detect(text) {
                    tracing::info!("⏳ Waiting for wake word \"{}\"...", wake.wake_word());
                    return None;
                }
                wake.strip(text)
            }
            _ => return Some(text.to_string()),
        };

        tracing::info!("✅ Wake word detected");
        animation::claw_snap(self.robot.as_ref()).await;
        self.conversation_active = true;
        (!stripped.is_empty()).then_some(stripped)
    }

    async fn ask_gateway(&mut self, text: &str) -> Result<(), GatewayError> {
        let Some(gateway) = self.gateway.clone() else {
            return Err(GatewayError::NotConnected);
        };
        tracing::info!("🤖 Sending to AI...");
        let robot = self.robot.clone();
        let thinking = RunningAnimation::spawn(move |token| animation::thinking_claws(robot, token));

        if !self.behavior.stream_replies {
            let reply = gateway.send_message(text, None).await;
            thinking.stop().await;
            let reply = reply?;
            tracing::info!("💬 Response: \"{reply}\"");
            self.say(&reply).await;
            return Ok(());
        }

        let mut stream = match gateway.stream_message(text).await {
            Ok(stream) => stream,
            Err(e) => {
                thinking.stop().await;
                return Err(e);
            }
        };
        let mut thinking = Some(thinking);
        let mut sentences = SentenceBuffer::default();
        while let Some(chunk) = stream.next_chunk().await {
            if let Some(thinking) = thinking.take() {
                thinking.stop().await;
            }
            for sentence in sentences.push(&chunk?) {
                tracing::info!("💬 {sentence}");
                self.say(&sentence).await;
            }
        }
        if let Some(thinking) = thinking.take() {
            thinking.stop().await;
        }
        if let Some(rest) = sentences.finish() {
            tracing::info!("💬 {rest}");
            self.say(&rest).await;
        }
        Ok(())
    }

    async fn say(&self, text: &str) {
        self.set_state(InterfaceState::Speaking);
        tracing::info!("🔊 Speaking response...");
        let output = self.speaker.speak(text).await;
        tracing::debug!(output = ?output, "Speech delivered");
    }

    async fn play_emotion(&self, emotion: &str) {
        if !self.robot.capabilities().emotions {
            return;
        }
        if let Err(e) = self.robot.play_emotion(emotion).await {
            tracing::debug!(emotion = emotion, error = %e, "Emotion playback failed");
        }
    }
}
