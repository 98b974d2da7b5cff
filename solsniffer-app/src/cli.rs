use clap::{Args, Parser, Subcommand};

/// The main CLI structure for SOLSniffer.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the sniffer: backfill on startup (if enabled), then monitor the live stream
    /// until Ctrl+C or SIGTERM.
    Run(ConfigArgs),
    /// Run a single backfill pass from the stored checkpoint to the chain head and exit.
    Backfill(ConfigArgs),
    /// Print the stored checkpoint and exit.
    Checkpoint(ConfigArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path to the configuration TOML file.
    /// Without one, defaults plus `SOLSNIFFER__*` environment overrides are used.
    #[arg(short, long)]
    pub config: Option<String>,
}
