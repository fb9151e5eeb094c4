//! CLI entry point for the mocap console.
//!
//! - `run`: connect to the sensing service and read operator commands from stdin
//! - `init-config`: write the default configuration file
//!
//! # Usage
//!
//! ```bash
//! mocap-console run --config config/console.toml
//! mocap-console run --service 192.168.1.20:3001
//! mocap-console init-config config/console.toml
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use mocap_console::archive::{DirectorySink, ExportProgress};
use mocap_console::calibration::FileStore;
use mocap_console::config::{ConsoleConfig, DEFAULT_CONFIG_PATH};
use mocap_console::context::Outbox;
use mocap_console::events::ConsoleEvent;
use mocap_console::operator::{OperatorCommand, HELP};
use mocap_console::transport::ServiceLink;
use mocap_console::{tracing_setup, Console, ConsoleHandle};

#[derive(Parser)]
#[command(name = "mocap-console")]
#[command(about = "Operator console for a multi-camera motion capture rig", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the sensing service and accept operator commands
    Run {
        /// Configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Override the service address (`host:port`)
        #[arg(long)]
        service: Option<String>,
    },

    /// Write the default configuration
    InitConfig {
        /// Destination file
        #[arg(default_value = DEFAULT_CONFIG_PATH)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, service } => run(config, service).await,
        Commands::InitConfig { path } => {
            ConsoleConfig::default()
                .save_to(&path)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

async fn run(config_path: PathBuf, service: Option<String>) -> Result<()> {
    let mut settings = ConsoleConfig::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(address) = service {
        settings.service.address = address;
    }
    settings.validate()?;
    tracing_setup::init_from_config(&settings).map_err(anyhow::Error::msg)?;

    info!(
        name = %settings.application.name,
        service = %settings.service.address,
        "console starting"
    );

    let settings = Arc::new(settings);
    let (outbox, requests) = Outbox::channel();
    let (event_tx, event_rx) = mpsc::channel(settings.service.event_buffer);

    let storage = Arc::new(FileStore::new(&settings.storage.state_file));
    let sink = Arc::new(DirectorySink::new(&settings.storage.export_dir));
    let console = Console::new(Arc::clone(&settings), outbox, storage, sink);
    let (handle, console_task) = console.start(event_rx, settings.service.event_buffer);

    let link = ServiceLink::new(
        settings.service.address.clone(),
        Duration::from_millis(settings.service.reconnect_delay_ms),
    );
    let link_task = tokio::spawn(link.run(requests, event_tx));

    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            print_event(&event);
        }
    });

    println!("{} - type 'help' for commands", settings.application.name);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else { break };
                match OperatorCommand::parse(&line) {
                    Ok(Some(OperatorCommand::Quit)) => break,
                    Ok(Some(command)) => dispatch(&handle, command).await,
                    Ok(None) => {}
                    Err(e) => eprintln!("{e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("console shutting down");
    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "console already stopped");
    }
    console_task.await.context("console task")?;
    link_task.abort();
    printer.abort();
    Ok(())
}

async fn dispatch(handle: &ConsoleHandle, command: OperatorCommand) {
    let result = match command {
        OperatorCommand::Mode(mode) => handle.request_mode(mode).await,
        OperatorCommand::Toggle(toggle) => handle.toggle(toggle).await,
        OperatorCommand::Arm(procedure) => handle.arm(procedure).await,
        OperatorCommand::Disarm(procedure) => handle.disarm(procedure).await,
        OperatorCommand::Clear(procedure) => handle.clear_captures(procedure).await,
        OperatorCommand::Solve(solve) => handle.solve(solve).await,
        OperatorCommand::StartRecording { name, options } => {
            handle.start_recording(name, options).await
        }
        OperatorCommand::StopRecording => handle.stop_recording().await.map(|summary| {
            println!(
                "Stopped '{}' with {} samples, exporting",
                summary.name, summary.samples
            );
        }),
        OperatorCommand::Export(name) => handle.export_last(name).await,
        OperatorCommand::LoadCalibration => handle.load_calibration().await.map(|fields| {
            println!("Loaded {}", join(&fields));
        }),
        OperatorCommand::SaveCalibration => handle.save_calibration().await.map(|fields| {
            println!("Saved {}", join(&fields));
        }),
        OperatorCommand::EditCalibration { field, raw } => {
            handle.edit_calibration(field, raw).await
        }
        OperatorCommand::Camera { exposure, gain } => {
            handle.update_camera_settings(exposure, gain).await
        }
        OperatorCommand::Threshold(threshold) => handle.update_detection_settings(threshold).await,
        OperatorCommand::Status => handle.status().await.map(|status| {
            match serde_json::to_string_pretty(&status) {
                Ok(text) => println!("{text}"),
                Err(e) => eprintln!("could not render status: {e}"),
            }
        }),
        OperatorCommand::Dismiss => handle.dismiss_notices().await.map(|ids| {
            println!("Dismissed {} notice(s)", ids.len());
        }),
        OperatorCommand::Help => {
            println!("{HELP}");
            Ok(())
        }
        OperatorCommand::Quit => Ok(()),
    };
    if let Err(e) = result {
        eprintln!("error: {e}");
    }
}

fn join<T: std::fmt::Display>(items: &[T]) -> String {
    if items.is_empty() {
        return "nothing".to_string();
    }
    items
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

fn print_event(event: &ConsoleEvent) {
    match event {
        ConsoleEvent::Connected => println!("[link] connected"),
        ConsoleEvent::Disconnected { reason } => println!("[link] disconnected: {reason}"),
        ConsoleEvent::ModeChanged { mode } => println!("[mode] {mode}"),
        ConsoleEvent::NoticeRaised(notice) => {
            let marker = if notice.blocking { "!!" } else { "!" };
            println!("[{marker}] {}", notice.message);
        }
        ConsoleEvent::SampleCaptured { procedure, samples } => {
            println!("[{procedure}] {samples} sample(s)");
        }
        ConsoleEvent::SolveCompleted { procedure, outcome } => {
            println!("[{procedure}] {outcome}");
        }
        ConsoleEvent::CalibrationUpdated { fields } => {
            println!("[calibration] updated {}", join(fields));
        }
        ConsoleEvent::RecordingStarted { name } => println!("[record] started '{name}'"),
        ConsoleEvent::RecordingStopped { name, samples } => {
            println!("[record] stopped '{name}' ({samples} samples)");
        }
        ConsoleEvent::ExportProgress(ExportProgress::Running {
            percent,
            current_file,
        }) => {
            println!("[export] {percent:.0}% {current_file}");
        }
        ConsoleEvent::ExportFinished(report) => {
            println!("[export] {} -> {} ({} bytes)", report.name, report.location, report.size);
        }
        ConsoleEvent::ExportFailed { name, reason } => {
            println!("[export] '{name}' failed: {reason}");
        }
        ConsoleEvent::ExportProgress(ExportProgress::Idle)
        | ConsoleEvent::NoticeCleared { .. }
        | ConsoleEvent::RigStatus(_) => {}
    }
}
