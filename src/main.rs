//! CLI Entry Point for imc_core
//!
//! Provides command-line interface for:
//! - Running the supervisor (IMC sampling loop + payload instrument worker)
//! - One-shot channel and mode commands for bench work
//! - Printing the effective configuration
//!
//! # Usage
//!
//! Start sampling (Ctrl+C stops both workers after their cleanup):
//! ```bash
//! imc_core run --config config/imc.toml
//! ```
//!
//! Switch the water-quality monitor on:
//! ```bash
//! imc_core set 3 on
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use imc_core::channel::ChannelId;
use imc_core::config::{ImcConfig, DEFAULT_CONFIG_PATH};
use imc_core::logging::{FileLogSink, ImcStreams};
use imc_core::protocol::{ImcCommander, PowerState, TelemetryMode};
use imc_core::supervisor::{CoreSupervisor, Outcome};
use imc_core::transport::{SerialLink, SerialPortOpener};
use imc_core::tracing_init;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "imc_core")]
#[command(about = "IMC power switching and telemetry sampling", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sampling loop and the payload worker until they finish or Ctrl+C
    Run,

    /// Switch one channel on or off
    Set {
        /// Channel id (1-4)
        channel: u8,
        /// Requested state
        state: Switch,
    },

    /// Power-cycle one channel
    Cycle {
        /// Channel id (1-4)
        channel: u8,
    },

    /// Toggle one channel
    Toggle {
        /// Channel id (1-4)
        channel: u8,
    },

    /// Select the telemetry mode
    Mode {
        /// Telemetry mode
        mode: Mode,
    },

    /// Power on both payload channels
    Activate,

    /// Power off both payload channels
    Deactivate,

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Switch {
    On,
    Off,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    /// Idle / poll (0)
    Poll,
    /// Continuous streaming (1)
    Stream,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = ImcConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    tracing_init::init_from_config(&config)?;

    match cli.command {
        Commands::Run => run(&config).await,
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        command => {
            one_shot(&config, command).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(config: &ImcConfig) -> Result<ExitCode> {
    tracing::info!(
        port = %config.imc.port,
        samples = config.sampling.samples,
        frequency_hz = config.sampling.frequency_hz,
        "starting IMC supervisor"
    );

    let sink = FileLogSink::new(".");
    let supervisor = CoreSupervisor::from_config(config, &sink)?;

    let signal = supervisor.shutdown_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl+C received, stopping workers");
            signal.trigger();
        }
    });

    let report = supervisor.run().await;
    for worker in &report.workers {
        tracing::info!(worker = %worker.name, outcome = ?worker.outcome, "worker finished");
    }

    Ok(match report.outcome {
        Outcome::Success => ExitCode::SUCCESS,
        Outcome::Failure => ExitCode::FAILURE,
    })
}

async fn one_shot(config: &ImcConfig, command: Commands) -> Result<()> {
    let streams = ImcStreams::create(&FileLogSink::new("."), &config.logging)?;
    let link = SerialLink::new(
        SerialPortOpener::new(config.imc.port.clone(), config.imc.baud_rate),
        config.imc.read_timeout(),
        config.imc.drain_window(),
        streams.control.clone(),
    );
    let imc = ImcCommander::new(
        link,
        config.channel_table()?,
        config.payload_channels()?,
        streams.control,
    );

    match command {
        Commands::Set { channel, state } => {
            let state = match state {
                Switch::On => PowerState::On,
                Switch::Off => PowerState::Off,
            };
            imc.set_channel(ChannelId::new(channel)?, state).await?
        }
        Commands::Cycle { channel } => imc.cycle_channel(ChannelId::new(channel)?).await?,
        Commands::Toggle { channel } => imc.toggle_channel(ChannelId::new(channel)?).await?,
        Commands::Mode { mode } => {
            let mode = match mode {
                Mode::Poll => TelemetryMode::Poll,
                Mode::Stream => TelemetryMode::Stream,
            };
            imc.set_mode(mode).await?
        }
        Commands::Activate => imc.activate_payload().await?,
        Commands::Deactivate => imc.deactivate_payload().await?,
        Commands::Run | Commands::Config => {}
    }
    Ok(())
}
