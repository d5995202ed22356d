//! tether entry point.
//!
//! ```text
//! tether                        Connect using tether.toml (or defaults)
//! tether --config <path>        Load a custom config TOML
//! tether --url wss://host:3001  Override the backend URL
//! tether --gen-config           Write default config to stdout
//! tether --init                 Write default config to --config path
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tether_core::DualChannelCoordinator;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tether_cli::config::CliConfig;
use tether_cli::console::Console;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tether", about = "Chat and shell console over tether channels")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "tether.toml")]
    config: PathBuf,

    /// Backend base URL (overrides `server.url`).
    #[arg(long)]
    url: Option<String>,

    /// Auth token (overrides `server.token`).
    #[arg(long)]
    token: Option<String>,

    /// Project path for the chat channel.
    #[arg(short, long)]
    project: Option<String>,

    /// Initial working directory for the shell channel.
    #[arg(long)]
    cwd: Option<String>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the `--config` path and exit.
    #[arg(long)]
    init: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&CliConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    if cli.init {
        CliConfig::write_default(&cli.config)?;
        println!("Wrote {}", cli.config.display());
        return Ok(());
    }

    // Load config, then apply flag overrides.
    let mut config = CliConfig::load(&cli.config);
    if let Some(url) = cli.url {
        config.server.url = url;
    }
    if let Some(token) = cli.token {
        config.server.token = token;
    }
    if let Some(project) = cli.project {
        config.chat.project_path = project;
    }
    if let Some(cwd) = cli.cwd {
        config.shell.working_dir = cwd;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("tether v{}", env!("CARGO_PKG_VERSION"));
    info!("server: {}", config.server.url);
    info!("project: {}", config.chat.project_path);

    let coordinator = DualChannelCoordinator::open(
        config.chat_identity()?,
        config.shell_identity()?,
        config.transport.clone(),
    )?;
    let ack_timeout = (config.chat.ack_timeout_secs > 0)
        .then(|| Duration::from_secs(config.chat.ack_timeout_secs));
    let console = Console::new(coordinator.clone(), ack_timeout);

    coordinator.connect_all().await?;

    let stdin = BufReader::new(tokio::io::stdin());
    tokio::select! {
        result = console.run(stdin) => result?,
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received, shutting down"),
    }

    coordinator.disconnect_all().await?;
    Ok(())
}
