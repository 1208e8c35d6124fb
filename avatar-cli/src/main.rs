// Avatar session command line interface
// Start a live avatar session, talk to it, and tear it down from a terminal

mod console;

use anyhow::{anyhow, Context};
use avatar_session::transport::{LoopbackConnector, SignalConnector};
use avatar_session::{
    ControllerTimeouts, Outcome, PresentationSurface, RoomConnector, SessionConfig,
    SessionController, StreamingApiClient, TaskType,
};
use clap::{Parser, Subcommand};
use console::{AvatarConsole, ConsoleSurface};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "avatar")]
#[command(about = "Drive a live talking-avatar session from the terminal", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Streaming API base URL
    #[arg(long, global = true)]
    server: Option<String>,

    /// Avatar to stream
    #[arg(long, global = true)]
    avatar_id: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Join rooms in-process instead of over the network
    #[arg(long, global = true)]
    loopback: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive console (default)
    Console,

    /// Start a session, speak one line, then stop
    Say {
        /// Text for the avatar
        text: String,

        /// Repeat the text verbatim instead of responding to it
        #[arg(long)]
        repeat: bool,

        /// Seconds to keep the session open after sending
        #[arg(long, default_value = "10")]
        hold_secs: u64,
    },
}

/// Plain-text log filter for `--log-level`
fn log_filter(level: &str) -> anyhow::Result<EnvFilter> {
    EnvFilter::try_new(level).context("Invalid log level")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => log_filter(&cli.log_level)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(&cli)?;
    let surface = Arc::new(ConsoleSurface::new());
    let controller = build_controller(&config, surface, cli.loopback)?;

    match cli.command.unwrap_or(Commands::Console) {
        Commands::Console => {
            let mut console = AvatarConsole::new(controller, config.server_url.clone());
            console.run().await?;
        }
        Commands::Say { text, repeat, hold_secs } => {
            let task_type = if repeat { TaskType::Repeat } else { TaskType::Talk };
            say_once(&controller, &text, task_type, Duration::from_secs(hold_secs)).await?;
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> anyhow::Result<SessionConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = SessionConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            config.apply_env();
            config
        }
        None => SessionConfig::from_env(),
    };
    apply_flags(cli, &mut config);

    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
    Ok(config)
}

/// Command line flags win over file and environment
fn apply_flags(cli: &Cli, config: &mut SessionConfig) {
    if let Some(server) = &cli.server {
        config.server_url = server.clone();
    }
    if let Some(avatar_id) = &cli.avatar_id {
        config.avatar_id = avatar_id.clone();
    }
}

fn build_controller(
    config: &SessionConfig,
    surface: Arc<dyn PresentationSurface>,
    loopback: bool,
) -> anyhow::Result<Arc<SessionController>> {
    let client = StreamingApiClient::new(config)?;
    let connector: Arc<dyn RoomConnector> = if loopback {
        info!("Using in-process room transport");
        Arc::new(LoopbackConnector::new())
    } else {
        Arc::new(SignalConnector::new(config.connect_timeout()))
    };

    Ok(SessionController::new(
        Arc::new(client),
        connector,
        surface,
        config.avatar_id.clone(),
        ControllerTimeouts::from_config(config),
    ))
}

async fn say_once(
    controller: &Arc<SessionController>,
    text: &str,
    task_type: TaskType,
    hold: Duration,
) -> anyhow::Result<()> {
    // The surface already printed why a start failed
    if let Outcome::Ignored(reason) = controller.start().await? {
        return Err(anyhow!("Session not started: {}", reason));
    }

    let sent = controller.say(text, task_type).await;
    if matches!(sent, Ok(Outcome::Applied)) {
        println!("✅ Sent {} task", task_type);
        tokio::select! {
            _ = tokio::time::sleep(hold) => {}
            _ = tokio::signal::ctrl_c() => warn!("Interrupted, stopping session"),
        }
    }

    controller.stop().await;
    controller.shutdown().await;

    match sent? {
        Outcome::Applied => Ok(()),
        Outcome::Ignored(reason) => Err(anyhow!("Nothing sent: {}", reason)),
    }
}
