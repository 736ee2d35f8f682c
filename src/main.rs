//! hidkeys-midi - HID keyboard to MIDI note-on translator

use anyhow::Result;
use clap::Parser;
use colored::*;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hidkeys_midi::config::{AppConfig, DeviceMode};
use hidkeys_midi::device::{DeviceProvider, HidProvider};
use hidkeys_midi::engine::{NoteEngine, NoteStrategy};
use hidkeys_midi::layout::LayoutTable;
use hidkeys_midi::lifecycle::{DeviceManager, Event, TokioScheduler};
use hidkeys_midi::midi::{self, MidirSink};
use hidkeys_midi::scale;

/// Play MIDI notes from a HID keyboard
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Key signature, e.g. cmajor, fsharpminor, bflatmajor or twelvetone.
    /// Without one (here or in the config), intervals are added directly
    /// in semitones from middle C.
    #[arg(short, long)]
    key: Option<String>,

    /// Path to configuration file
    #[arg(short, long, default_value = "./config.json")]
    config: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List HID devices and MIDI output ports
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level)?;

    if args.list_devices {
        return list_devices();
    }

    info!("Starting hidkeys-midi v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let config = AppConfig::load(&args.config).await?;
    let layout = LayoutTable::build(&config.layout)?;

    let signature = args.key.as_deref().or(config.key.as_deref());
    let (scale, start_note) = scale::resolve(signature).inspect_err(|e| error!("{}", e))?;
    let strategy = match signature {
        Some(token) => {
            info!("Key signature '{}', starting at note {}", token, start_note);
            NoteStrategy::Scale(scale)
        }
        None => {
            info!("No key signature, chromatic intervals from note {}", start_note);
            NoteStrategy::Direct
        }
    };
    let engine = NoteEngine::new(layout, strategy, start_note);

    let sink = MidirSink::open(&config.midi)?;
    let provider = HidProvider::new(config.device_mode)?;

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let manager = DeviceManager::new(
        provider,
        sink,
        TokioScheduler::new(events_tx.clone()),
        events_tx.clone(),
        config.device_regex()?,
        engine,
    );

    tokio::spawn(shutdown_signal(events_tx));

    manager.run(events_rx).await;

    Ok(())
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .init();

    Ok(())
}

/// Forward Ctrl+C into the event queue
async fn shutdown_signal(events: mpsc::UnboundedSender<Event>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Shutdown signal received");
            let _ = events.send(Event::ShutdownRequested);
        }
        Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
    }
}

fn list_devices() -> Result<()> {
    println!("\n{}", "=== HID Devices ===".bold().cyan());
    let mut provider = HidProvider::new(DeviceMode::Stream)?;
    let devices = provider.enumerate()?;
    if devices.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for device in devices {
        println!("  {}", device.to_string().green());
    }

    println!("\n{}", "=== MIDI Output Ports ===".bold().cyan());
    let ports = midi::list_output_ports()?;
    if ports.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for port in ports {
        println!("  {}", port.yellow());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_key_is_optional_and_help_describes_direct_mode() {
        Args::command().debug_assert();

        let args = Args::try_parse_from(["hidkeys-midi"]).unwrap();
        assert_eq!(args.key, None);
        assert_eq!(args.config, "./config.json");

        let help = Args::command().render_long_help().to_string();
        assert!(help.contains("semitones from middle C"));
        assert!(!help.contains("[default: twelvetone]"));
    }
}
