//! Speech-to-text backends.
//!
//! Every backend receives mono f32 samples in `[-1.0, 1.0]` and returns the
//! trimmed transcript. Backends are selected by `stt.backend`.

pub mod local;
pub mod openai;

pub use local::LocalWhisper;
pub use openai::OpenAiTranscriber;

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{SttBackend, SttConfig};

#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    /// Check the backend is usable before the first utterance.
    async fn preload(&self) -> Result<()> {
        Ok(())
    }

    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String>;
}

/// Build the configured backend.
pub fn create_transcriber(config: &SttConfig) -> Result<Arc<dyn Transcriber>> {
    let transcriber: Arc<dyn Transcriber> = match config.backend {
        SttBackend::Whisper => Arc::new(LocalWhisper::whisper(config)),
        SttBackend::FasterWhisper => Arc::new(LocalWhisper::faster_whisper(config)),
        SttBackend::Openai => {
            let api_key = config
                .openai_api_key
                .as_deref()
                .filter(|k| !k.trim().is_empty())
                .ok_or_else(|| anyhow::anyhow!("OpenAI API key required for OpenAI STT backend"))?;
            Arc::new(OpenAiTranscriber::new(
                api_key,
                &config.openai_model,
                &config.openai_base_url,
                config.language.clone(),
            ))
        }
    };
    Ok(transcriber)
}

// ── WAV encoding ───────────────────────────────────────────────────

/// Encode samples as a 16-bit PCM mono WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    const BITS_PER_SAMPLE: u16 = 16;
    const CHANNELS: u16 = 1;

    let data_len = u32::try_from(samples.len() * 2).unwrap_or(u32::MAX - 36);
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * u32::from(block_align);

    let mut out = Vec::with_capacity(44 + samples.len() * 2);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for sample in samples {
        out.extend_from_slice(&to_pcm16(*sample).to_le_bytes());
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn to_pcm16(sample: f32) -> i16 {
    let clamped = if sample.is_finite() { sample.clamp(-1.0, 1.0) } else { 0.0 };
    (clamped * f32::from(i16::MAX)) as i16
}
