//! sdstream player - operator console
//!
//! Streams MP3 and WAV files from the media root folder through one or more
//! player slots and reads commands from stdin.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sdstream_common::config::{find_config_file, RootFolderResolver};
use sdstream_common::events::{EventBus, PlayerEvent};
use sdstream_common::PlayerStateKind;
use sdstream_player::audio::{NullSink, OutputSink, WavFileSink};
use sdstream_player::console::{parse_command, Command, HELP};
use sdstream_player::storage::FsStorage;
use sdstream_player::{Engine, FileConfig, StopOutcome};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Interval between progress lines while something is streaming
const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Command-line arguments for sdstream-player
#[derive(Parser, Debug)]
#[command(name = "sdstream-player")]
#[command(about = "Stream MP3/WAV audio from storage to an output sink")]
#[command(version)]
struct Args {
    /// Root folder containing audio files
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Config file (TOML); defaults to $SDSTREAM_CONFIG or the platform config dir
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of player slots (overrides the config file)
    #[arg(short, long)]
    players: Option<usize>,

    /// Render each slot to <DIR>/slot<N>.wav instead of discarding output
    #[arg(long, value_name = "DIR")]
    render: Option<PathBuf>,

    /// Play through the default audio device
    #[cfg(feature = "device")]
    #[arg(long, conflicts_with = "render")]
    device: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args.config.clone().or_else(find_config_file);
    let file_config = match &config_path {
        Some(path) => {
            FileConfig::load(path).with_context(|| format!("Failed to load {}", path.display()))?
        }
        None => FileConfig::default(),
    };

    // RUST_LOG wins over the [logging] table
    let level = &file_config.logging.level;
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("sdstream_player={},sdstream_common={}", level, level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match &config_path {
        Some(path) => info!("Loaded config from {}", path.display()),
        None => info!("No config file, using built-in defaults"),
    }

    let root_folder = RootFolderResolver::new()
        .with_cli_arg(args.root_folder.clone())
        .with_config_file(config_path)
        .resolve();
    info!("Root folder: {}", root_folder.display());

    let mut config = file_config.player;
    if let Some(players) = args.players {
        config.players = players;
    }
    config.validate().context("Invalid player configuration")?;

    // keeps the device stream alive until exit
    let mut device = DeviceSlot::default();
    let sinks = build_sinks(&args, &config, &mut device)?;

    let storage = Arc::new(FsStorage::new(root_folder));
    let events = EventBus::default();
    let engine = Arc::new(
        Engine::start(config, storage, sinks, events.clone()).context("Failed to start engine")?,
    );

    let event_task = tokio::spawn(print_events(events));
    let progress_task = tokio::spawn(print_progress(Arc::clone(&engine)));

    println!("sdstream ready, {} player(s). Type 'help' for commands.", engine.player_count());
    tokio::select! {
        result = run_console(Arc::clone(&engine)) => result?,
        _ = shutdown_signal() => {}
    }

    progress_task.abort();
    event_task.abort();

    let engine_ref = Arc::clone(&engine);
    tokio::task::spawn_blocking(move || engine_ref.shutdown())
        .await
        .context("Shutdown task failed")?
        .context("Engine shutdown failed")?;

    #[cfg(feature = "device")]
    if let Some(output) = &device {
        if output.has_error() {
            warn!("Audio device reported {} stream error(s)", output.error_count());
        }
        output.stop().context("Failed to stop audio device")?;
    }

    info!("Shutdown complete");
    Ok(())
}

#[cfg(feature = "device")]
type DeviceSlot = Option<sdstream_player::audio::DeviceOutput>;
#[cfg(not(feature = "device"))]
type DeviceSlot = ();

fn build_sinks(
    args: &Args,
    config: &sdstream_player::PlayerConfig,
    _device: &mut DeviceSlot,
) -> Result<Vec<Box<dyn OutputSink>>> {
    #[cfg(feature = "device")]
    if args.device {
        let (output, sinks) = sdstream_player::audio::DeviceOutput::open(
            config.players,
            config.sample_rate,
            config.chunk_size,
            config.anti_pop_silence,
        )
        .context("Failed to open audio device")?;
        info!("Playing through {}", output.device_name());
        *_device = Some(output);
        return Ok(sinks
            .into_iter()
            .map(|sink| Box::new(sink) as Box<dyn OutputSink>)
            .collect());
    }

    match &args.render {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            (0..config.players)
                .map(|slot| {
                    let path = dir.join(format!("slot{}.wav", slot));
                    info!("Rendering slot {} to {}", slot, path.display());
                    let sink = WavFileSink::create(&path, config.sample_rate)?;
                    Ok(Box::new(sink) as Box<dyn OutputSink>)
                })
                .collect()
        }
        None => Ok((0..config.players)
            .map(|_| Box::new(NullSink::new(config.anti_pop_silence)) as Box<dyn OutputSink>)
            .collect()),
    }
}

/// Read commands from stdin until `quit` or end of input
async fn run_console(engine: Arc<Engine>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };

        match command {
            Command::Quit => break,
            Command::Help => println!("{}", HELP),
            Command::List => match engine.list() {
                Ok(entries) if entries.is_empty() => println!("No playable files"),
                Ok(entries) => {
                    for entry in entries {
                        println!("{:>10}  {}", entry.size, entry.name);
                    }
                }
                Err(e) => println!("List failed: {}", e),
            },
            Command::Status { slot } => match slot {
                Some(slot) => match engine.status(slot) {
                    Ok(status) => println!("{}", status),
                    Err(e) => println!("{}", e),
                },
                None => {
                    for status in engine.statuses() {
                        println!("{}", status);
                    }
                }
            },
            Command::Volume(level) => {
                engine.set_gain(level as f32 / 100.0);
                println!("Volume {}%", level);
            }
            Command::Play { name, slot } => {
                let engine = Arc::clone(&engine);
                let slot = slot.unwrap_or(0);
                let result = tokio::task::spawn_blocking(move || engine.play(slot, &name))
                    .await
                    .context("Play task failed")?;
                if let Err(e) = result {
                    println!("Play failed: {}", e);
                }
            }
            Command::Stop { slot } => {
                let engine = Arc::clone(&engine);
                let slot = slot.unwrap_or(0);
                let result = tokio::task::spawn_blocking(move || engine.stop(slot))
                    .await
                    .context("Stop task failed")?;
                match result {
                    Ok(StopOutcome::NotActive) => println!("Player {} is not playing", slot),
                    Ok(StopOutcome::Stopped) => println!("Player {} stopped", slot),
                    Ok(StopOutcome::TimedOut) => println!("Player {} did not confirm stop", slot),
                    Err(e) => println!("Stop failed: {}", e),
                }
            }
            Command::StopAll => {
                let engine = Arc::clone(&engine);
                let result = tokio::task::spawn_blocking(move || engine.stop_all())
                    .await
                    .context("Stop task failed")?;
                if let Err(e) = result {
                    println!("Stop failed: {}", e);
                }
            }
        }
    }
    Ok(())
}

async fn print_events(events: EventBus) {
    let mut rx = events.subscribe();
    loop {
        match rx.recv().await {
            Ok(PlayerEvent::FormatDetected { slot, sample_rate, channels, bitrate_kbps, .. }) => {
                println!("[{}] {} Hz, {} ch, {} kbps", slot, sample_rate, channels, bitrate_kbps);
            }
            Ok(PlayerEvent::StreamFinished { slot, name, underruns, .. }) => {
                println!("[{}] finished {} ({} underruns)", slot, name, underruns);
            }
            Ok(PlayerEvent::StreamFailed { slot, name, reason, .. }) => {
                println!("[{}] {} failed: {}", slot, name, reason);
            }
            Ok(PlayerEvent::StopTimedOut { slot, waited_ms }) => {
                println!("[{}] stop timed out after {} ms", slot, waited_ms);
            }
            Ok(PlayerEvent::StateChanged { .. }) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event printer lagged, skipped {} events", skipped);
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn print_progress(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(PROGRESS_INTERVAL);
    loop {
        interval.tick().await;
        for status in engine.statuses() {
            if status.state == PlayerStateKind::Streaming {
                println!("{}", status);
            }
        }
    }
}

/// Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
