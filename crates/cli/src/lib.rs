use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "streamx")]
#[command(about = "StreamX - real-time market data aggregation engine")]
#[command(version = "0.1.0")]
pub struct Cli {
    /// Log output format; overrides `engine.log_format` from the config
    #[arg(long, value_enum, global = true)]
    pub log_format: Option<LogOutput>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the engine over newline-delimited JSON records
    Run {
        /// Path to the configuration file
        #[arg(short, long, default_value = "configs/streamx.yaml")]
        config: PathBuf,

        /// Input file; standard input when omitted
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Topic patterns to print (`*`, `candle:*`, `vwap:AAPL`)
        #[arg(short, long = "subscribe", default_value = "*")]
        subscribe: Vec<String>,

        /// JSON file with the position book
        #[arg(short, long)]
        positions: Option<PathBuf>,

        /// How often window timers are fired
        #[arg(long, default_value_t = 1000)]
        tick_ms: u64,

        /// Time source for window timers
        #[arg(long, value_enum, default_value = "event")]
        clock: ClockMode,
    },

    /// Validate configuration without starting the engine
    Validate {
        /// Path to the configuration file
        #[arg(short, long, default_value = "configs/streamx.yaml")]
        config: PathBuf,
    },

    /// Initialize a new configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "streamx.yaml")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockMode {
    /// Wall-clock time; for live feeds
    System,

    /// Latest event timestamp seen; for recorded data
    Event,
}

impl ClockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClockMode::System => "system",
            ClockMode::Event => "event",
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogOutput {
    Pretty,
    Json,
    Compact,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
