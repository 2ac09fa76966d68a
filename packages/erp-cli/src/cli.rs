use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "erp",
    version,
    about = "Real-time stimulus-locked epoch averaging",
    long_about = "Stimulus-locked epoch averaging over blocked multichannel streams.\n\
                  Configuration is read from --config, $ERP_CONFIG or the user config \
                  directory; individual flags override file values."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Average a synthetic acquisition stream and print the final averages
    Simulate(SimulateArgs),
    /// Check a configuration and report the window geometry
    Validate(ValidateArgs),
    /// Show version, defaults and configuration search paths
    Info(InfoArgs),
}

/// Averaging settings shared by every command that builds a configuration
#[derive(Args, Default)]
pub struct ConfigArgs {
    /// Averaging configuration file (JSON)
    #[arg(long, env = "ERP_CONFIG")]
    pub config: Option<String>,

    /// Pre-stimulus samples per epoch
    #[arg(long)]
    pub pre: Option<usize>,

    /// Post-stimulus samples per epoch
    #[arg(long)]
    pub post: Option<usize>,

    /// Maximum epochs averaged per stimulus
    #[arg(long)]
    pub num_averages: Option<usize>,

    /// Ingestion buffer capacity in blocks
    #[arg(long)]
    pub capacity: Option<usize>,

    /// Sampling rate in Hz
    #[arg(long)]
    pub sample_rate: Option<f64>,

    /// Name of the raw digital trigger channel to ignore
    #[arg(long)]
    pub raw_digital_channel: Option<String>,
}

#[derive(Args)]
pub struct SimulateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Number of EEG-like channels
    #[arg(long, default_value_t = 4)]
    pub eeg_channels: usize,

    /// Number of stimulus channels
    #[arg(long, default_value_t = 1)]
    pub stim_channels: usize,

    /// Samples per block
    #[arg(long, default_value_t = 32)]
    pub block_len: usize,

    /// Number of blocks to stream
    #[arg(long, default_value_t = 200)]
    pub blocks: u64,

    /// Samples between consecutive pulses of one stimulus
    #[arg(long, default_value_t = 500)]
    pub period: usize,

    /// Output file (default: stdout)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Compact JSON output (no indentation)
    #[arg(long, default_value_t = false)]
    pub compact: bool,

    /// Suppress progress messages on stderr
    #[arg(long, default_value_t = false)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Samples per block, enables the window geometry check
    #[arg(long)]
    pub block_len: Option<usize>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args)]
pub struct InfoArgs {
    /// Averaging configuration file (JSON)
    #[arg(long, env = "ERP_CONFIG")]
    pub config: Option<String>,

    /// Output as JSON
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
