use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use llmrtc_domain::config::Config;
use llmrtc_server::dev::{DevEchoLlm, DevStt, DevTts};
use llmrtc_server::{bootstrap, ServerBuilder};

#[derive(Parser)]
#[command(name = "llmrtcd", about = "LLMRTC real-time voice AI server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to the config file (default: ./llmrtc.toml if present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve with the development loopback providers.
    Run,
    /// Validate the config file and exit.
    ConfigValidate,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Run) => {
            init_tracing();
            let config = load_config(cli.config.as_deref())?;
            run_server(config).await
        }
        Some(Command::ConfigValidate) => {
            let config = load_config(cli.config.as_deref())?;
            let issues = config.validate();
            for issue in &issues {
                eprintln!("{issue}");
            }
            if issues.is_empty() {
                println!("config ok");
            }
            Ok(())
        }
        Some(Command::Version) => {
            println!("llmrtcd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LLMRTC_LOG")
                .unwrap_or_else(|_| EnvFilter::new("info,llmrtc_server=debug")),
        )
        .init();
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<Config> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => {
            let default = PathBuf::from("llmrtc.toml");
            if !default.exists() {
                tracing::info!("no config file; using defaults");
                return Ok(Config::default());
            }
            default
        }
    };
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    tracing::info!(path = %path.display(), "config loaded");
    Ok(config)
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::warn!(
        "running with development loopback providers; inject real providers via ServerBuilder"
    );
    let state = ServerBuilder::new(config)
        .llm(Arc::new(DevEchoLlm))
        .stt(Arc::new(DevStt))
        .tts(Arc::new(DevTts))
        .build()?;
    bootstrap::serve(state).await
}
