use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reachyclaw::config::{AudioSource, Config, SttBackend};
use reachyclaw::gateway::{GatewayClient, GatewayOptions};
use reachyclaw::stt::create_transcriber;
use reachyclaw::tools::{RobotTools, ToolContext};
use reachyclaw::voice::{open_listener, VoiceInterface};
use reachyclaw_robot_kit::{connect_or_simulate, ConnectionMode, RobotDriver, SimulatedRobot};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Reachy Mini voice interface for OpenClaw.
#[derive(Parser, Debug)]
#[command(name = "reachyclaw", version, about)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ~/.reachyclaw/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// OpenClaw gateway host
    #[arg(long)]
    gateway_host: Option<String>,

    /// OpenClaw gateway port
    #[arg(long)]
    gateway_port: Option<u16>,

    /// OpenClaw gateway authentication token
    #[arg(long)]
    gateway_token: Option<String>,

    /// Reachy Mini connection mode: auto, localhost_only, network
    #[arg(long)]
    reachy_mode: Option<ConnectionMode>,

    /// Run without a robot, logging motion commands instead
    #[arg(long)]
    simulate: bool,

    /// Speech-to-text backend: whisper, faster-whisper, openai
    #[arg(long)]
    stt: Option<SttBackend>,

    /// Whisper model size
    #[arg(long, value_parser = ["tiny", "base", "small", "medium", "large"])]
    whisper_model: Option<String>,

    /// Audio input: auto, robot, command, console
    #[arg(long)]
    audio_source: Option<AudioSource>,

    /// Wake word to activate listening (e.g. "hey reachy")
    #[arg(long)]
    wake_word: Option<String>,

    /// Disable emotion animations
    #[arg(long)]
    no_emotions: bool,

    /// Disable idle animations
    #[arg(long)]
    no_idle: bool,

    /// Echo what was heard instead of asking the gateway
    #[arg(long)]
    standalone: bool,

    /// Speak streamed replies sentence by sentence
    #[arg(long)]
    stream: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect the configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the JSON schema of the config file
    Schema,
    /// Print the effective configuration with secrets masked
    Show,
}

impl Cli {
    /// CLI flags win over the file and the environment.
    fn apply(&self, config: &mut Config) {
        if let Some(host) = &self.gateway_host {
            config.gateway.host.clone_from(host);
        }
        if let Some(port) = self.gateway_port {
            config.gateway.port = port;
        }
        if let Some(token) = &self.gateway_token {
            config.gateway.token = Some(token.clone());
        }
        if let Some(mode) = self.reachy_mode {
            config.robot.connection_mode = mode;
        }
        if self.simulate {
            config.robot.simulate = true;
        }
        if let Some(backend) = self.stt {
            config.stt.backend = backend;
        }
        if let Some(model) = &self.whisper_model {
            config.stt.whisper_model.clone_from(model);
        }
        if let Some(source) = self.audio_source {
            config.audio.source = source;
        }
        if let Some(wake_word) = &self.wake_word {
            config.behavior.wake_word = Some(wake_word.clone());
        }
        if self.no_emotions {
            config.behavior.play_emotions = false;
        }
        if self.no_idle {
            config.behavior.idle_animations = false;
        }
        if self.standalone {
            config.behavior.standalone_mode = true;
        }
        if self.stream {
            config.behavior.stream_replies = true;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Fatal error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "reachyclaw=debug,reachyclaw_robot_kit=debug"
    } else {
        "reachyclaw=info,reachyclaw_robot_kit=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    cli.apply(&mut config);

    if let Some(Command::Config { action }) = &cli.command {
        let output = match action {
            ConfigAction::Schema => Config::json_schema()?,
            ConfigAction::Show => config.masked().to_toml()?,
        };
        println!("{output}");
        return Ok(());
    }

    config.validate()?;
    config.ensure_dirs()?;

    tracing::info!("Starting Reachy Mini OpenClaw interface");
    tracing::info!("Gateway: {}", config.gateway.url());
    tracing::info!("STT: {} ({})", config.stt.backend.as_str(), config.stt.whisper_model);
    if let Some(wake_word) = &config.behavior.wake_word {
        tracing::info!("Wake word: {wake_word}");
    }

    let limits = config.robot.safety_limits();
    let robot: Arc<dyn RobotDriver> = if config.robot.simulate {
        tracing::info!("Simulation mode requested, not looking for a robot");
        Arc::new(SimulatedRobot::new(limits))
    } else {
        connect_or_simulate(
            config.robot.connection_mode,
            config.robot.daemon_url.as_deref(),
            limits,
        )
        .await
    };

    tracing::info!("🧠 Loading speech recognition...");
    let stt = create_transcriber(&config.stt)?;
    stt.preload().await.context("Speech recognition is not available")?;
    tracing::info!("✅ Speech recognition ready");

    let listener = open_listener(&config.audio, &robot)?;
    let mut interface = VoiceInterface::new(&config, robot.clone(), stt, listener);

    if config.behavior.standalone_mode {
        tracing::info!("Running in standalone mode - no gateway connection");
    } else {
        let gateway = Arc::new(GatewayClient::new(GatewayOptions::from_config(&config.gateway)));
        let tools = RobotTools::new(ToolContext::from_config(robot.clone(), &config));
        tracing::debug!(tools = ?tools.names(), "Registering robot tools");
        gateway.set_tool_handler(Arc::new(tools));
        gateway
            .connect()
            .await
            .with_context(|| format!("Failed to connect to OpenClaw gateway at {}", config.gateway.url()))?;
        interface = interface.with_gateway(gateway);
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let stats = interface.run(shutdown).await?;
    tracing::info!(
        utterances = stats.utterances,
        replies = stats.replies,
        errors = stats.errors,
        "Goodbye"
    );
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "reachyclaw",
            "--gateway-host",
            "10.0.0.2",
            "--gateway-port",
            "9999",
            "--gateway-token",
            "tok",
            "--reachy-mode",
            "network",
            "--stt",
            "faster-whisper",
            "--whisper-model",
            "small",
            "--wake-word",
            "hey reachy",
            "--no-emotions",
            "--no-idle",
            "--standalone",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);

        let mut config = Config::default();
        cli.apply(&mut config);
        assert_eq!(config.gateway.url(), "ws://10.0.0.2:9999");
        assert_eq!(config.gateway.token.as_deref(), Some("tok"));
        assert_eq!(config.robot.connection_mode, ConnectionMode::Network);
        assert_eq!(config.stt.backend, SttBackend::FasterWhisper);
        assert_eq!(config.stt.whisper_model, "small");
        assert_eq!(config.behavior.wake_word.as_deref(), Some("hey reachy"));
        assert!(!config.behavior.play_emotions);
        assert!(!config.behavior.idle_animations);
        assert!(config.behavior.standalone_mode);
    }

    #[test]
    fn absent_flags_keep_config() {
        let cli = Cli::try_parse_from(["reachyclaw"]).unwrap();
        let mut config = Config::default();
        config.gateway.host = "from-file".into();
        cli.apply(&mut config);
        assert_eq!(config.gateway.host, "from-file");
        assert!(config.behavior.play_emotions);
        assert!(cli.command.is_none());
    }

    #[test]
    fn invalid_choices_are_rejected() {
        assert!(Cli::try_parse_from(["reachyclaw", "--stt", "vosk"]).is_err());
        assert!(Cli::try_parse_from(["reachyclaw", "--whisper-model", "huge"]).is_err());
        assert!(Cli::try_parse_from(["reachyclaw", "--reachy-mode", "bluetooth"]).is_err());
    }

    #[test]
    fn config_subcommands_parse() {
        let cli = Cli::try_parse_from(["reachyclaw", "config", "show", "--config", "/tmp/x.toml"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config { action: ConfigAction::Show })
        ));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
    }
}
