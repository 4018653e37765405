//! StreamX CLI binary
//!
//! Reads newline-delimited JSON market data records from a file or standard
//! input, runs them through the engine and prints the subscribed topics as
//! JSON lines on standard output. Logs go to standard error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cli::{Cli, ClockMode, Commands, LogOutput};
use config::{generate_default_config, load_config, save_config, validate_config, EngineSettings, StreamConfig};
use observability::{init_logging_with_level, init_metrics, LogFormat};
use risk_engine::{Position, StaticPositionFeed};
use stream_engine::{Clock, ManualClock, StreamEngine, SystemClock};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct RunOptions {
    config: PathBuf,
    input: Option<PathBuf>,
    subscribe: Vec<String>,
    positions: Option<PathBuf>,
    tick_ms: u64,
    clock: ClockMode,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    // Only `run` reads a config before logging starts; a broken file is
    // reported properly once logging is up
    let engine_settings = match &cli.command {
        Commands::Run { config, .. } => load_config(config).map(|c| c.engine).unwrap_or_default(),
        _ => EngineSettings::default(),
    };
    let format = match cli.log_format {
        Some(output) => log_format(output),
        None => LogFormat::parse(&engine_settings.log_format).unwrap_or_default(),
    };
    init_logging_with_level("streamx", format, &engine_settings.log_level)?;
    debug!(?cli, "CLI arguments parsed");

    match cli.command {
        Commands::Run {
            config,
            input,
            subscribe,
            positions,
            tick_ms,
            clock,
        } => {
            info!("Executing 'run' command");
            run_command(RunOptions {
                config,
                input,
                subscribe,
                positions,
                tick_ms,
                clock,
            })
            .await
        }
        Commands::Validate { config } => {
            info!("Executing 'validate' command");
            validate_command(config)
        }
        Commands::Init { output } => {
            info!("Executing 'init' command");
            init_command(output)
        }
    }
}

fn log_format(output: LogOutput) -> LogFormat {
    match output {
        LogOutput::Pretty => LogFormat::Pretty,
        LogOutput::Json => LogFormat::Json,
        LogOutput::Compact => LogFormat::Compact,
    }
}

fn load_valid_config(path: &Path) -> Result<StreamConfig> {
    let config = load_config(path)?;
    let report = validate_config(&config);

    if !report.warnings.is_empty() {
        warn!("Configuration warnings:");
        for warning in &report.warnings {
            warn!(field = %warning.field, message = %warning.message);
        }
    }

    if !report.is_valid() {
        error!(error_count = report.errors.len(), "Configuration validation failed");
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!("Cannot start engine due to configuration errors");
    }
    Ok(config)
}

async fn run_command(options: RunOptions) -> Result<()> {
    let config = load_valid_config(&options.config)?;

    if let Some(port) = config.engine.metrics_port {
        init_metrics(port)?;
    }

    // Event mode follows the newest event time so recorded data closes
    // windows as it would have live
    let event_clock = Arc::new(ManualClock::new(0));
    let clock: Arc<dyn Clock> = match options.clock {
        ClockMode::System => Arc::new(SystemClock),
        ClockMode::Event => event_clock.clone(),
    };

    let engine = StreamEngine::builder(config).clock(clock).build()?;

    if let Some(path) = &options.positions {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read positions file: {:?}", path))?;
        let positions: Vec<Position> =
            serde_json::from_str(&content).with_context(|| format!("Failed to parse positions file: {:?}", path))?;
        let count = engine.sync_positions(&StaticPositionFeed::new(positions)).await?;
        info!(count, "Positions loaded");
    }

    for pattern in &options.subscribe {
        engine.subscribe(pattern, |event| {
            println!("{}", serde_json::to_string(event)?);
            Ok(())
        })?;
    }

    let reader: Box<dyn AsyncBufRead + Unpin + Send> = match &options.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open input: {:?}", path))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };
    let mut lines = reader.lines();

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, initiating graceful shutdown...");
                ctrl_c.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl+C"),
        }
    });

    let mut ticker = tokio::time::interval(Duration::from_millis(options.tick_ms.max(1)));
    let mut accepted = 0u64;
    let mut rejected = 0u64;

    info!(
        input = ?options.input,
        clock = options.clock.as_str(),
        subscriptions = ?options.subscribe,
        "Engine running"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                engine.tick();
            }
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    debug!("End of input");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match engine.ingest_json(&line) {
                    Ok(event) => {
                        accepted += 1;
                        if options.clock == ClockMode::Event && event.timestamp > event_clock.now_ms() {
                            event_clock.set(event.timestamp);
                        }
                    }
                    // Already logged and counted by the engine
                    Err(_) => rejected += 1,
                }
            }
        }
    }

    engine.finish();
    info!(accepted, rejected, "Input processed");

    if let Some(writer) = engine.shutdown() {
        if let Err(e) = writer.await {
            warn!(error = %e, "Durable writer did not finish cleanly");
        }
    }
    Ok(())
}

fn validate_command<P: AsRef<Path>>(config_path: P) -> Result<()> {
    info!(path = ?config_path.as_ref(), "Validating configuration");

    let config = match load_config(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.defaults_applied.is_empty() {
        println!("Defaults Applied ({}):", report.defaults_applied.len());
        for default in &report.defaults_applied {
            println!("  [info] {} = {}", default.field, default.value);
        }
        println!();
    }

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Engine: {}", config.engine.name);
    println!("Candle intervals: {}", config.windows.candle_intervals.join(", "));
    println!(
        "Indicators on: {}",
        config.effective_indicator_interval().unwrap_or("-")
    );
    println!("Buffer capacity per topic: {}", config.buffer.capacity_per_topic);
    println!("Compute workers: {}", config.compute.workers);

    Ok(())
}

fn init_command<P: AsRef<Path>>(output_path: P) -> Result<()> {
    let output_path = output_path.as_ref();
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("Next steps:");
    println!("  1. Edit the windows, indicators and buffer sections as needed");
    println!("  2. Run 'streamx validate --config {:?}' to check configuration", output_path);
    println!("  3. Run 'streamx run --config {:?} --input trades.ndjson'", output_path);

    Ok(())
}
