//! Local Whisper command-line programs.
//!
//! `whisper` (openai-whisper) and `whisper-ctranslate2` (faster-whisper)
//! share the same interface: the utterance is written to a temporary WAV,
//! transcribed with `--output_format txt`, and the text file is read back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;

use super::{encode_wav, Transcriber};
use crate::config::SttConfig;

const UTTERANCE_STEM: &str = "utterance";

pub struct LocalWhisper {
    name: &'static str,
    program: String,
    /// Extra leading arguments, e.g. `-m whisper` for `python3 -m whisper`.
    program_args: Vec<String>,
    model: String,
    language: Option<String>,
    extra_args: Vec<String>,
}

impl LocalWhisper {
    pub fn whisper(config: &SttConfig) -> Self {
        Self::new("whisper", &config.whisper_command, config)
            .with_extra_args(&["--fp16", "False"])
    }

    pub fn faster_whisper(config: &SttConfig) -> Self {
        Self::new("faster-whisper", &config.faster_whisper_command, config)
            .with_extra_args(&["--compute_type", "int8"])
    }

    fn new(name: &'static str, command: &str, config: &SttConfig) -> Self {
        let mut words = command.split_whitespace().map(str::to_string);
        let program = words.next().unwrap_or_else(|| name.to_string());
        Self {
            name,
            program,
            program_args: words.collect(),
            model: config.whisper_model.clone(),
            language: config.language.clone(),
            extra_args: Vec::new(),
        }
    }

    fn with_extra_args(mut self, args: &[&str]) -> Self {
        self.extra_args = args.iter().map(|a| (*a).to_string()).collect();
        self
    }

    fn command(&self, wav: &Path, out_dir: &Path) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.program_args)
            .arg(wav)
            .args(["--model", &self.model])
            .args(["--output_format", "txt"])
            .arg("--output_dir")
            .arg(out_dir)
            .args(&self.extra_args);
        if let Some(language) = &self.language {
            cmd.args(["--language", language]);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl Transcriber for LocalWhisper {
    fn name(&self) -> &str {
        self.name
    }

    async fn preload(&self) -> Result<()> {
        tracing::info!(
            backend = self.name,
            program = %self.program,
            model = %self.model,
            "Using local speech recognition"
        );
        Ok(())
    }

    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String> {
        if samples.is_empty() {
            return Ok(String::new());
        }

        let dir = tempfile::tempdir().context("Failed to create temporary directory")?;
        let wav = dir.path().join(format!("{UTTERANCE_STEM}.wav"));
        tokio::fs::write(&wav, encode_wav(samples, sample_rate))
            .await
            .context("Failed to write utterance WAV")?;

        let output = self
            .command(&wav, dir.path())
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }

        let transcript = dir.path().join(format!("{UTTERANCE_STEM}.txt"));
        let text = tokio::fs::read_to_string(&transcript)
            .await
            .with_context(|| format!("{} produced no transcript", self.program))?;
        Ok(normalize_transcript(&text))
    }
}

/// Join transcript lines (one per segment) into a single sentence.
fn normalize_transcript(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// A stand-in for `whisper`, run through `sh`, that writes a fixed
    /// transcript into `--output_dir`.
    fn fake_whisper(dir: &Path, transcript: &str) -> SttConfig {
        let script = dir.join("fake_whisper.sh");
        std::fs::write(
            &script,
            format!(
                "out=''\nlang=''\nwhile [ $# -gt 0 ]; do\n  \
                 if [ \"$1\" = \"--output_dir\" ]; then out=\"$2\"; fi\n  \
                 if [ \"$1\" = \"--language\" ]; then lang=\"$2\"; fi\n  \
                 shift\ndone\n\
                 printf '%s\\n' '{transcript}' \"$lang\" > \"$out/utterance.txt\"\n"
            ),
        )
        .unwrap();
        SttConfig {
            whisper_command: format!("sh {}", script.display()),
            ..SttConfig::default()
        }
    }

    #[tokio::test]
    async fn reads_transcript_written_by_program() {
        let dir = tempfile::tempdir().unwrap();
        let config = SttConfig {
            language: Some("en".into()),
            ..fake_whisper(dir.path(), " Hello  there")
        };
        let stt = LocalWhisper::whisper(&config);
        assert_eq!(stt.program, "sh");

        let text = stt.transcribe(&[0.3; 1024], 16_000).await.unwrap();
        assert_eq!(text, "Hello there en");
    }

    #[tokio::test]
    async fn failing_program_surfaces_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("broken.sh");
        std::fs::write(&script, "echo 'model not found' >&2\nexit 3\n").unwrap();
        let config = SttConfig {
            faster_whisper_command: format!("sh {}", script.display()),
            ..SttConfig::default()
        };

        let err = LocalWhisper::faster_whisper(&config)
            .transcribe(&[0.3; 1024], 16_000)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("model not found"), "{err}");
    }

    #[tokio::test]
    async fn missing_program_is_an_error() {
        let config = SttConfig {
            whisper_command: "/nonexistent/whisper-binary".into(),
            ..SttConfig::default()
        };
        assert!(LocalWhisper::whisper(&config)
            .transcribe(&[0.3; 16], 16_000)
            .await
            .is_err());
    }

    #[test]
    fn transcript_lines_are_joined() {
        assert_eq!(normalize_transcript(" one\n two \n\n"), "one two");
    }
}
