//! Voice conversation with the robot.
//!
//! ## Design
//! - `audio`: energy-based utterance capture from the robot microphone, an
//!   external capture program, or typed console input, plus the wake word
//! - `speech`: markdown-free speech through the robot speaker or a TTS
//!   command, with a head bob while talking
//! - `interface`: the listen → transcribe → ask → speak loop and its states

pub mod audio;
pub mod interface;
pub mod speech;

pub use audio::{open_listener, Heard, Listener, WakeWordDetector};
pub use interface::{ConversationStats, InterfaceState, TurnOutcome, VoiceInterface};
pub use speech::{clean_for_speech, Speaker, SpeechOutput};

use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A spawned animation cancelled when stopped or dropped.
///
/// Dropping it only cancels; the animation still finishes its reset to
/// neutral on its own task.
pub(crate) struct RunningAnimation {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl RunningAnimation {
    pub(crate) fn spawn<F, Fut>(animation: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let token = CancellationToken::new();
        let handle = tokio::spawn(animation(token.clone()));
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Cancel and wait for the reset-to-neutral to finish.
    pub(crate) async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for RunningAnimation {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
