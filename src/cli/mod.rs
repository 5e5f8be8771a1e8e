//! Command-line interface for umca.
//!
//! Provides commands for serving the HTTP API, running a single pipeline
//! locally, previewing runtime selection, and inspecting configuration.

use std::io::{self, IsTerminal, Read};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{self, GateMode, ResolvedConfig};
use crate::core::{self as pipeline_core, GatePipeline};
use crate::domain::{PipelineOutcome, TaskSpecification};
use crate::events::{self, EventPublisher};
use crate::server;

/// umca - Gated execution pipeline with live event streaming
#[derive(Parser, Debug)]
#[command(name = "umca")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP server and event bridge
    Serve {
        /// Address to bind to (overrides PORT / UMCA_LISTEN)
        #[arg(short, long)]
        listen: Option<SocketAddr>,
    },

    /// Run one task specification through the pipeline
    Run {
        /// JSON specification file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Read specification from stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Show which runtime a specification would be dispatched to
    Select {
        /// JSON specification file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Read specification from stdin
        #[arg(long)]
        stdin: bool,
    },

    /// Show resolved configuration (secrets masked)
    Config,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve { listen } => serve(listen).await,
            Commands::Run { input, stdin } => run_spec(input, stdin).await,
            Commands::Select { input, stdin } => select_runtime(input, stdin),
            Commands::Config => show_config(),
        }
    }
}

fn load_config() -> Result<ResolvedConfig> {
    config::load_config().context("Failed to load configuration")
}

/// Read a JSON specification from a file or stdin
fn read_spec(input_file: Option<PathBuf>, use_stdin: bool) -> Result<serde_json::Value> {
    let input = if let Some(path) = input_file {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    } else if use_stdin || !io::stdin().is_terminal() {
        // Read from stdin if --stdin flag or if stdin is piped
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No input provided. Use --input <file> or pipe to stdin");
    };

    if input.trim().is_empty() {
        anyhow::bail!("Input is empty");
    }

    serde_json::from_str(&input).context("Specification is not valid JSON")
}

async fn serve(listen: Option<SocketAddr>) -> Result<()> {
    let cfg = load_config()?;
    let listen = listen.unwrap_or(cfg.listen);
    server::serve(&cfg, listen).await
}

async fn run_spec(input_file: Option<PathBuf>, use_stdin: bool) -> Result<()> {
    let spec = read_spec(input_file, use_stdin)?;
    let cfg = load_config()?;

    let broker = events::connect_broker(&cfg.broker)
        .with_context(|| format!("Failed to open broker at {}", cfg.broker.address))?;
    let publisher = Arc::new(EventPublisher::new(broker));
    let pipeline = GatePipeline::from_config(&cfg, publisher);

    match pipeline.run_value(spec).await? {
        PipelineOutcome::Complete(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            eprintln!("\n[Run {} completed successfully]", result.run_id);
        }
        PipelineOutcome::GateFailed(failure) => {
            println!("{}", serde_json::to_string_pretty(&failure)?);
            eprintln!("\n[Run {} stopped at {}: {}]", failure.run_id, failure.gate, failure.error);
            std::process::exit(1);
        }
    }

    Ok(())
}

fn select_runtime(input_file: Option<PathBuf>, use_stdin: bool) -> Result<()> {
    let spec = TaskSpecification::from_value(read_spec(input_file, use_stdin)?)
        .context("Malformed task specification")?;
    println!("{}", pipeline_core::select(&spec));
    Ok(())
}

/// Show the resolved configuration (for debugging)
fn show_config() -> Result<()> {
    let cfg = load_config()?;

    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!(
        "Gate mode:   {}",
        match cfg.scoring.gate_mode() {
            GateMode::Scored { .. } => "scored",
            GateMode::Degraded => "degraded (gates pass without evaluation)",
        }
    );
    println!();
    print!("{}", cfg.to_yaml().context("Failed to render configuration")?);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serve_listen_flag() {
        let cli = Cli::try_parse_from(["umca", "serve", "--listen", "127.0.0.1:9000"]).unwrap();
        match cli.command {
            Commands::Serve { listen } => {
                assert_eq!(listen, Some(SocketAddr::from(([127, 0, 0, 1], 9000))))
            }
            other => panic!("expected serve, got {:?}", other),
        }
    }

    #[test]
    fn test_serve_without_listen_defers_to_config() {
        let cli = Cli::try_parse_from(["umca", "serve"]).unwrap();
        assert!(matches!(cli.command, Commands::Serve { listen: None }));
    }

    #[test]
    fn test_invalid_listen_rejected() {
        assert!(Cli::try_parse_from(["umca", "serve", "--listen", "not-an-addr"]).is_err());
    }
}
