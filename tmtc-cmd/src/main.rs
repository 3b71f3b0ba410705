mod inspect;
mod run;

use std::{io::stderr, path::PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the links of a configuration file.
    ///
    /// Received packets are written to stdout as JSON lines. Each line read from stdin is
    /// a hex encoded command which is routed to the first TC link that accepts it. Links are
    /// stopped once stdin is closed.
    Run {
        /// JSON file holding a list of link configurations.
        #[arg(short, long, value_name = "path")]
        config: PathBuf,

        /// Sequence number of the first command read from stdin.
        #[arg(long, default_value_t = 0)]
        first_command: u32,
    },
    /// Frame and preprocess a recorded packet file and summarize its contents.
    Inspect {
        /// Input packet file
        input: PathBuf,

        /// Packet framing as JSON, e.g. '{"type": "FIXED_SIZE", "packetSize": 1024}'.
        #[arg(long, value_name = "json")]
        framing: Option<String>,

        /// Preprocessor as JSON, e.g. '{"type": "CCSDS", "errorDetection": "NONE"}'.
        #[arg(long, value_name = "json")]
        preprocessor: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: inspect::Format,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(stderr)
        .with_ansi(false)
        .with_env_filter(
            EnvFilter::try_from_env("TMTC_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    debug!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    match &cli.command {
        Commands::Run {
            config,
            first_command,
        } => run::run(config, *first_command),
        Commands::Inspect {
            input,
            framing,
            preprocessor,
            format,
        } => inspect::inspect(
            input,
            framing.as_deref(),
            preprocessor.as_deref(),
            *format,
        ),
    }
}
